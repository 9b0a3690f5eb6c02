// Shared Types and Data Contracts
//
// This module defines the explicit contracts between the reconciliation
// stages: identity resolution, event ingest, per-field reduction, context
// disambiguation and cross-source fact merging. Each type is the input or
// output of exactly one stage so invariants are checked in one place.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Identity Types
// ============================================================================

/// Collection-site pseudonym (PSC1), 12 ASCII digits in well-formed data
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrimaryCode(String);

/// Externally shared pseudonym (PSC2)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecondaryCode(String);

macro_rules! code_newtype {
    ($name:ident) => {
        impl $name {
            pub fn new(code: impl Into<String>) -> Self {
                Self(code.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

code_newtype!(PrimaryCode);
code_newtype!(SecondaryCode);

/// Assessment timepoint encoded as a suffix of the primary code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timepoint {
    #[serde(rename = "BL")]
    Baseline,
    #[serde(rename = "FU1")]
    FollowUp1,
    #[serde(rename = "FU2")]
    FollowUp2,
}

impl Timepoint {
    /// Suffix appended to pseudonyms of this timepoint (none for baseline)
    pub fn suffix(self) -> Option<&'static str> {
        match self {
            Self::Baseline => None,
            Self::FollowUp1 => Some("FU1"),
            Self::FollowUp2 => Some("FU2"),
        }
    }
}

/// Subject identity after crosswalk resolution
///
/// Records of different timepoints are distinct subjects as far as
/// reconciliation is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CanonicalId {
    pub primary: PrimaryCode,
    pub timepoint: Timepoint,
}

impl CanonicalId {
    pub fn baseline(primary: PrimaryCode) -> Self {
        Self {
            primary,
            timepoint: Timepoint::Baseline,
        }
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.timepoint.suffix() {
            Some(suffix) => write!(f, "{}{}", self.primary, suffix),
            None => write!(f, "{}", self.primary),
        }
    }
}

/// Administration round / age band, e.g. `C1`, `C2`, `C3`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextTag(String);

impl ContextTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Human-readable label for an optional context tag
pub fn context_label(context: &Option<ContextTag>) -> &str {
    context.as_ref().map(ContextTag::as_str).unwrap_or("(none)")
}

/// Classification of one raw subject code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectIdentity {
    /// Resolved through the crosswalk
    Canonical {
        id: CanonicalId,
        context: Option<ContextTag>,
    },
    /// Test/demo subject, excluded silently
    Excluded,
    /// Ill-formed or unknown code
    Unresolved { reason: String },
}

// ============================================================================
// Input Rows and Trial Events
// ============================================================================

/// One raw row of a Psytools export, as handed over by the row parser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRow {
    #[serde(rename = "User code")]
    pub user_code: String,
    #[serde(rename = "Trial")]
    pub trial: String,
    #[serde(rename = "Trial result", default)]
    pub trial_result: String,
    #[serde(rename = "Iteration")]
    pub iteration: u32,
    #[serde(rename = "Completed Timestamp")]
    pub completed: String,
    #[serde(rename = "Processed Timestamp")]
    pub processed: String,
    #[serde(rename = "Response", default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

/// Declared type of a questionnaire field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// `DD-MM-YYYY`
    Date,
    /// `MM-YYYY`, stored as the first day of the month
    Month,
    Integer,
    Text,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Date => "date",
            Self::Month => "month",
            Self::Integer => "integer",
            Self::Text => "text",
        };
        f.write_str(name)
    }
}

/// Typed answer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Date(NaiveDate),
    Integer(i64),
    Text(String),
}

impl FieldValue {
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(d) => Some(*d),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Date(d) => write!(f, "{}", d.format("%d-%m-%Y")),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Validated, typed trial event
#[derive(Debug, Clone, PartialEq)]
pub struct TrialEvent {
    pub subject_code: String,
    pub canonical_id: CanonicalId,
    pub context: Option<ContextTag>,
    pub field: String,
    pub iteration: u32,
    pub raw_value: String,
    pub value: FieldValue,
    pub completed_at: NaiveDateTime,
    pub processed_at: NaiveDateTime,
}

// ============================================================================
// Ingest Rejections
// ============================================================================

/// Why a raw row did not become a trial event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    ExcludedSubject,
    UnresolvedSubject,
    IdentityCheckField,
    BackNavigation,
    EmptyValue,
    InvalidIteration,
    UndeclaredField,
    MalformedTimestamp,
    MalformedValue,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExcludedSubject => "excluded_subject",
            Self::UnresolvedSubject => "unresolved_subject",
            Self::IdentityCheckField => "identity_check_field",
            Self::BackNavigation => "back_navigation",
            Self::EmptyValue => "empty_value",
            Self::InvalidIteration => "invalid_iteration",
            Self::UndeclaredField => "undeclared_field",
            Self::MalformedTimestamp => "malformed_timestamp",
            Self::MalformedValue => "malformed_value",
        }
    }

    /// Rejections that denote bad data rather than expected filtering
    pub fn is_error(self) -> bool {
        matches!(
            self,
            Self::UnresolvedSubject
                | Self::InvalidIteration
                | Self::MalformedTimestamp
                | Self::MalformedValue
        )
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected row outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub reason: RejectReason,
    pub detail: String,
}

impl Rejection {
    pub fn new(reason: RejectReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.detail)
    }
}

// ============================================================================
// Reduction Output
// ============================================================================

/// Output of the iteration reducer for one (subject, context, field)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum ResolvedFieldValue {
    Present(FieldValue),
    Absent,
}

impl ResolvedFieldValue {
    pub fn value(&self) -> Option<&FieldValue> {
        match self {
            Self::Present(v) => Some(v),
            Self::Absent => None,
        }
    }
}

/// First and last timestamp of a set of events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampRange {
    pub first: NaiveDateTime,
    pub last: NaiveDateTime,
}

impl TimestampRange {
    pub fn at(timestamp: NaiveDateTime) -> Self {
        Self {
            first: timestamp,
            last: timestamp,
        }
    }

    pub fn include(&mut self, timestamp: NaiveDateTime) {
        if timestamp < self.first {
            self.first = timestamp;
        }
        if timestamp > self.last {
            self.last = timestamp;
        }
    }

    /// Range spanning every timestamp, None when the iterator is empty
    pub fn spanning<I: IntoIterator<Item = NaiveDateTime>>(timestamps: I) -> Option<Self> {
        let mut iter = timestamps.into_iter();
        let mut range = Self::at(iter.next()?);
        for ts in iter {
            range.include(ts);
        }
        Some(range)
    }
}

/// Provenance notes attached to a canonical subject record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProvenanceNote {
    /// Other administrations of the instrument were discarded
    SupersededContexts { discarded: Vec<Option<ContextTag>> },
    /// Several administrations share the latest completion timestamp
    AmbiguousContext { tied: Vec<Option<ContextTag>> },
}

/// Reconciled answers of one subject to one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalSubjectRecord {
    pub subject: CanonicalId,
    pub instrument: String,
    pub context: Option<ContextTag>,
    pub fields: BTreeMap<String, ResolvedFieldValue>,
    pub completed: TimestampRange,
    pub processed: TimestampRange,
    pub provenance: Vec<ProvenanceNote>,
}

impl CanonicalSubjectRecord {
    /// Typed value of a field, None when absent or unknown
    pub fn value(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field).and_then(ResolvedFieldValue::value)
    }

    pub fn has_ambiguous_context(&self) -> bool {
        self.provenance
            .iter()
            .any(|note| matches!(note, ProvenanceNote::AmbiguousContext { .. }))
    }

    pub fn superseded_contexts(&self) -> &[Option<ContextTag>] {
        self.provenance
            .iter()
            .find_map(|note| match note {
                ProvenanceNote::SupersededContexts { discarded } => Some(discarded.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }
}

// ============================================================================
// Cross-Source Merge Types
// ============================================================================

/// An instrument field asserting a logical fact
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceRef {
    pub instrument: String,
    pub field: String,
}

impl SourceRef {
    pub fn new(instrument: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            field: field.into(),
        }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.instrument, self.field)
    }
}

/// Value asserted by one source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assertion {
    pub source: SourceRef,
    pub value: FieldValue,
}

impl Assertion {
    pub fn new(source: SourceRef, value: FieldValue) -> Self {
        Self { source, value }
    }
}

impl fmt::Display for Assertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.source, self.value)
    }
}

/// How a fact value was decided
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionBasis {
    SingleSource,
    Unanimous,
    Majority { dissent: Vec<Assertion> },
    Reference { discrepancies: Vec<Assertion> },
}

/// Final outcome for one logical fact of one subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FactOutcome {
    Resolved {
        value: FieldValue,
        sources: Vec<SourceRef>,
        basis: ResolutionBasis,
    },
    /// True conflict, requires manual adjudication
    Ambiguous { candidates: Vec<Assertion> },
    Missing,
}

impl FactOutcome {
    pub fn value(&self) -> Option<&FieldValue> {
        match self {
            Self::Resolved { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Ambiguous { .. })
    }
}

/// Everything known about one canonical subject after a batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledSubject {
    pub subject: CanonicalId,
    pub records: BTreeMap<String, CanonicalSubjectRecord>,
    pub facts: BTreeMap<String, FactOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2017, 3, day)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_canonical_id_display_carries_timepoint() {
        let base = CanonicalId::baseline(PrimaryCode::new("110000000001"));
        assert_eq!(base.to_string(), "110000000001");

        let fu = CanonicalId {
            primary: PrimaryCode::new("110000000001"),
            timepoint: Timepoint::FollowUp2,
        };
        assert_eq!(fu.to_string(), "110000000001FU2");
        assert!(base < fu);
    }

    #[test]
    fn test_timestamp_range_spanning() {
        let range = TimestampRange::spanning(vec![ts(12), ts(3), ts(20), ts(7)]).unwrap();
        assert_eq!(range.first, ts(3));
        assert_eq!(range.last, ts(20));
        assert!(TimestampRange::spanning(Vec::new()).is_none());
    }

    #[test]
    fn test_field_value_display_uses_questionnaire_layout() {
        let date = FieldValue::Date(NaiveDate::from_ymd_opt(2005, 4, 12).unwrap());
        assert_eq!(date.to_string(), "12-04-2005");
        assert_eq!(FieldValue::Integer(7).to_string(), "7");
        assert_eq!(FieldValue::Text("F".into()).to_string(), "F");
    }

    #[test]
    fn test_fact_outcome_serialization_is_explicit() {
        let json = serde_json::to_value(FactOutcome::Missing).unwrap();
        assert_eq!(json["status"], "missing");

        let json = serde_json::to_value(FactOutcome::Ambiguous {
            candidates: vec![Assertion::new(
                SourceRef::new("PHIR", "PHIR_01"),
                FieldValue::Text("x".into()),
            )],
        })
        .unwrap();
        assert_eq!(json["status"], "ambiguous");
        assert_eq!(json["candidates"][0]["source"]["instrument"], "PHIR");
    }

    #[test]
    fn test_absent_field_serialization() {
        let json = serde_json::to_value(ResolvedFieldValue::Absent).unwrap();
        assert_eq!(json["status"], "absent");
        let json = serde_json::to_value(ResolvedFieldValue::Present(FieldValue::Integer(3))).unwrap();
        assert_eq!(json["status"], "present");
        assert_eq!(json["value"], 3);
    }
}
