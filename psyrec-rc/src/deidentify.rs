//! Re-keying to secondary codes and date de-identification
//!
//! Shared records never carry primary codes or calendar dates. Dates become
//! ages in days relative to the subject's resolved date of birth; without a
//! resolved date of birth they are withheld.

use crate::crosswalk::Crosswalk;
use crate::error::{ReconcileError, ReconcileResult};
use crate::types::{
    CanonicalSubjectRecord, ContextTag, FactOutcome, FieldValue, ReconciledSubject,
    ResolvedFieldValue, SourceRef,
};
use chrono::{NaiveDate, NaiveDateTime};
use psyrec_common::time::age_in_days;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// De-identified field or fact value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum DeidentifiedValue {
    Present(FieldValue),
    AgeInDays(i64),
    /// Date without a resolved date of birth to anchor it
    Withheld,
    Absent,
}

/// Ages in days at the first and last event of an administration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeRange {
    pub first: i64,
    pub last: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeidentifiedRecord {
    pub instrument: String,
    pub context: Option<ContextTag>,
    pub fields: BTreeMap<String, DeidentifiedValue>,
    /// None when the date of birth is unresolved
    pub completed_age: Option<AgeRange>,
    pub processed_age: Option<AgeRange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeidentifiedFact {
    Resolved { value: DeidentifiedValue },
    /// Candidate values are not disclosed
    Ambiguous { sources: Vec<SourceRef> },
    Missing,
}

/// One subject keyed by secondary code (plus timepoint suffix)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeidentifiedSubject {
    pub subject: String,
    pub records: BTreeMap<String, DeidentifiedRecord>,
    pub facts: BTreeMap<String, DeidentifiedFact>,
}

pub struct Deidentifier {
    crosswalk: Arc<Crosswalk>,
    date_of_birth_fact: String,
}

impl Deidentifier {
    pub fn new(crosswalk: Arc<Crosswalk>, date_of_birth_fact: impl Into<String>) -> Self {
        Self {
            crosswalk,
            date_of_birth_fact: date_of_birth_fact.into(),
        }
    }

    pub fn deidentify(&self, subject: &ReconciledSubject) -> ReconcileResult<DeidentifiedSubject> {
        let secondary = self
            .crosswalk
            .secondary_of(subject.subject.primary.as_str())
            .ok_or_else(|| ReconcileError::UnmappedSubject(subject.subject.to_string()))?;
        let key = match subject.subject.timepoint.suffix() {
            Some(suffix) => format!("{}{}", secondary, suffix),
            None => secondary.to_string(),
        };

        let birth = subject
            .facts
            .get(&self.date_of_birth_fact)
            .and_then(FactOutcome::value)
            .and_then(FieldValue::as_date);
        if birth.is_none() {
            debug!(subject = %key, "Date of birth unresolved; withholding dates");
        }

        let records = subject
            .records
            .iter()
            .map(|(name, record)| (name.clone(), deidentify_record(record, birth)))
            .collect();

        // the date of birth itself is identifying
        let facts = subject
            .facts
            .iter()
            .filter(|(name, _)| **name != self.date_of_birth_fact)
            .map(|(name, outcome)| (name.clone(), deidentify_fact(outcome, birth)))
            .collect();

        Ok(DeidentifiedSubject {
            subject: key,
            records,
            facts,
        })
    }
}

fn deidentify_value(value: &FieldValue, birth: Option<NaiveDate>) -> DeidentifiedValue {
    match (value, birth) {
        (FieldValue::Date(date), Some(birth)) => DeidentifiedValue::AgeInDays(age_in_days(*date, birth)),
        (FieldValue::Date(_), None) => DeidentifiedValue::Withheld,
        (other, _) => DeidentifiedValue::Present(other.clone()),
    }
}

fn age_range(first: NaiveDateTime, last: NaiveDateTime, birth: NaiveDate) -> AgeRange {
    AgeRange {
        first: age_in_days(first.date(), birth),
        last: age_in_days(last.date(), birth),
    }
}

fn deidentify_record(record: &CanonicalSubjectRecord, birth: Option<NaiveDate>) -> DeidentifiedRecord {
    let fields = record
        .fields
        .iter()
        .map(|(field, resolved)| {
            let value = match resolved {
                ResolvedFieldValue::Present(value) => deidentify_value(value, birth),
                ResolvedFieldValue::Absent => DeidentifiedValue::Absent,
            };
            (field.clone(), value)
        })
        .collect();

    DeidentifiedRecord {
        instrument: record.instrument.clone(),
        context: record.context.clone(),
        fields,
        completed_age: birth.map(|b| age_range(record.completed.first, record.completed.last, b)),
        processed_age: birth.map(|b| age_range(record.processed.first, record.processed.last, b)),
    }
}

fn deidentify_fact(outcome: &FactOutcome, birth: Option<NaiveDate>) -> DeidentifiedFact {
    match outcome {
        FactOutcome::Resolved { value, .. } => DeidentifiedFact::Resolved {
            value: deidentify_value(value, birth),
        },
        FactOutcome::Ambiguous { candidates } => DeidentifiedFact::Ambiguous {
            sources: candidates.iter().map(|c| c.source.clone()).collect(),
        },
        FactOutcome::Missing => DeidentifiedFact::Missing,
    }
}
