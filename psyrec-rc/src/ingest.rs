//! Raw row validation and typing
//!
//! Turns one raw Psytools row into a [`TrialEvent`] or a [`Rejection`].
//! Checks run in a fixed order: subject identity, identity-check fields,
//! back navigation, empty answers, iteration, declared fields, timestamps,
//! then typed coercion of the answer.

use crate::config::{IngestSettings, InstrumentSpec};
use crate::identity::{sample, IdentityResolver};
use crate::types::{
    FieldType, FieldValue, RawRow, RejectReason, Rejection, SubjectIdentity, TrialEvent,
};
use chrono::NaiveDateTime;
use psyrec_common::time::{parse_day_month_year, parse_month_year, parse_timestamp};
use std::sync::Arc;
use tracing::{debug, error};

/// Validates rows of one instrument
#[derive(Debug, Clone)]
pub struct EventIngest {
    resolver: Arc<IdentityResolver>,
    settings: IngestSettings,
    instrument: Arc<InstrumentSpec>,
    identity_check_prefixes: Vec<String>,
}

impl EventIngest {
    pub fn new(
        resolver: Arc<IdentityResolver>,
        settings: IngestSettings,
        instrument: Arc<InstrumentSpec>,
    ) -> Self {
        let identity_check_prefixes = settings
            .identity_check_prefixes
            .iter()
            .map(|p| p.to_lowercase())
            .collect();
        Self {
            resolver,
            settings,
            instrument,
            identity_check_prefixes,
        }
    }

    /// Validate and type one raw row
    pub fn ingest(&self, row: &RawRow) -> Result<TrialEvent, Rejection> {
        let instrument = self.instrument.name.as_str();

        let (canonical_id, context) = match self.resolver.resolve(&row.user_code) {
            SubjectIdentity::Canonical { id, context } => (id, context),
            SubjectIdentity::Excluded => {
                debug!(instrument, "Skipping test subject row");
                return Err(Rejection::new(RejectReason::ExcludedSubject, "test subject"));
            }
            SubjectIdentity::Unresolved { reason } => {
                error!(instrument, "{}", reason);
                return Err(Rejection::new(RejectReason::UnresolvedSubject, reason));
            }
        };

        let field = row.trial.trim();

        if self.is_identity_check(field) {
            return Err(Rejection::new(RejectReason::IdentityCheckField, field));
        }

        let sentinel = self.settings.back_sentinel.as_str();
        if row.trial_result.trim() == sentinel
            || row.response.as_deref().map(str::trim) == Some(sentinel)
        {
            return Err(Rejection::new(RejectReason::BackNavigation, field));
        }

        let raw_value = row.trial_result.trim();
        if raw_value.is_empty() {
            return Err(Rejection::new(RejectReason::EmptyValue, field));
        }

        if row.iteration == 0 {
            error!(instrument, subject = %canonical_id, field, "Iteration 0 is not a valid iteration");
            return Err(Rejection::new(
                RejectReason::InvalidIteration,
                format!("{}: iteration 0", field),
            ));
        }

        let field_type = match self.instrument.field_type(field) {
            Some(field_type) => field_type,
            None if self.instrument.declared_only => {
                debug!(instrument, field, "Skipping undeclared field");
                return Err(Rejection::new(RejectReason::UndeclaredField, field));
            }
            None => FieldType::Text,
        };

        let completed_at = self.timestamp(&canonical_id.to_string(), field, &row.completed)?;
        let processed_at = self.timestamp(&canonical_id.to_string(), field, &row.processed)?;

        let value = coerce(raw_value, field_type).map_err(|detail| {
            error!(
                instrument,
                subject = %canonical_id,
                field,
                "Cannot read {} value {}: {}",
                field_type,
                sample(raw_value),
                detail
            );
            Rejection::new(
                RejectReason::MalformedValue,
                format!("{}: {} value {}", field, field_type, sample(raw_value)),
            )
        })?;

        Ok(TrialEvent {
            subject_code: row.user_code.trim().to_string(),
            canonical_id,
            context,
            field: field.to_string(),
            iteration: row.iteration,
            raw_value: raw_value.to_string(),
            value,
            completed_at,
            processed_at,
        })
    }

    /// Whether a field merely re-asks identifying data
    pub fn is_identity_check(&self, field: &str) -> bool {
        let lower = field.to_lowercase();
        self.identity_check_prefixes
            .iter()
            .any(|prefix| lower.starts_with(prefix.as_str()))
    }

    fn timestamp(&self, subject: &str, field: &str, raw: &str) -> Result<NaiveDateTime, Rejection> {
        parse_timestamp(raw, &self.settings.timestamp_format).map_err(|e| {
            error!(instrument = %self.instrument.name, subject, field, "Malformed timestamp: {}", e);
            Rejection::new(
                RejectReason::MalformedTimestamp,
                format!("{}: timestamp {}", field, sample(raw)),
            )
        })
    }
}

/// Coerce a raw answer to its declared type
pub fn coerce(raw: &str, field_type: FieldType) -> Result<FieldValue, String> {
    match field_type {
        FieldType::Date => parse_day_month_year(raw)
            .map(FieldValue::Date)
            .map_err(|e| e.to_string()),
        FieldType::Month => parse_month_year(raw)
            .map(FieldValue::Date)
            .map_err(|e| e.to_string()),
        FieldType::Integer => raw
            .trim()
            .parse::<i64>()
            .map(FieldValue::Integer)
            .map_err(|e| e.to_string()),
        FieldType::Text => Ok(FieldValue::Text(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdentitySettings;
    use crate::crosswalk::Crosswalk;
    use crate::types::{ContextTag, PrimaryCode, SecondaryCode, Timepoint};
    use chrono::NaiveDate;

    fn ingest_for(instrument: InstrumentSpec) -> EventIngest {
        let crosswalk = Crosswalk::from_pairs(vec![(
            PrimaryCode::new("110000000001"),
            SecondaryCode::new("000011112222"),
        )])
        .unwrap();
        let resolver = IdentityResolver::new(Arc::new(crosswalk), IdentitySettings::default());
        EventIngest::new(
            Arc::new(resolver),
            IngestSettings::default(),
            Arc::new(instrument),
        )
    }

    fn phir() -> EventIngest {
        ingest_for(
            InstrumentSpec::new("PHIR")
                .with_field("PHIR_01", FieldType::Date)
                .with_field("PHIR_07", FieldType::Month)
                .with_field("PHIR_02", FieldType::Integer),
        )
    }

    fn row(code: &str, trial: &str, result: &str, iteration: u32) -> RawRow {
        RawRow {
            user_code: code.into(),
            trial: trial.into(),
            trial_result: result.into(),
            iteration,
            completed: "2017-01-21 10:42:07.000000".into(),
            processed: "2017-01-22 08:00:00.000000".into(),
            response: None,
        }
    }

    fn reason(result: Result<TrialEvent, Rejection>) -> RejectReason {
        result.unwrap_err().reason
    }

    #[test]
    fn test_valid_row_becomes_typed_event() {
        let event = phir()
            .ingest(&row("110000000001FU1-C2", "PHIR_01", "12-04-2005", 2))
            .unwrap();
        assert_eq!(event.canonical_id.primary.as_str(), "110000000001");
        assert_eq!(event.canonical_id.timepoint, Timepoint::FollowUp1);
        assert_eq!(event.context, Some(ContextTag::new("C2")));
        assert_eq!(event.iteration, 2);
        assert_eq!(
            event.value,
            FieldValue::Date(NaiveDate::from_ymd_opt(2005, 4, 12).unwrap())
        );
        assert_eq!(event.raw_value, "12-04-2005");
    }

    #[test]
    fn test_month_and_integer_coercion() {
        let ingest = phir();
        let month = ingest.ingest(&row("110000000001-C1", "PHIR_07", "04-2017", 1)).unwrap();
        assert_eq!(
            month.value,
            FieldValue::Date(NaiveDate::from_ymd_opt(2017, 4, 1).unwrap())
        );
        let int = ingest.ingest(&row("110000000001-C1", "PHIR_02", " 42 ", 1)).unwrap();
        assert_eq!(int.value, FieldValue::Integer(42));
    }

    #[test]
    fn test_undeclared_field_defaults_to_text() {
        let event = phir().ingest(&row("110000000001-C1", "PHIR_99", "maybe", 1)).unwrap();
        assert_eq!(event.value, FieldValue::Text("maybe".into()));
    }

    #[test]
    fn test_declared_only_rejects_undeclared_field() {
        let mut spec = InstrumentSpec::new("PHIR").with_field("PHIR_01", FieldType::Date);
        spec.declared_only = true;
        let ingest = ingest_for(spec);
        assert_eq!(
            reason(ingest.ingest(&row("110000000001-C1", "PHIR_99", "x", 1))),
            RejectReason::UndeclaredField
        );
    }

    #[test]
    fn test_test_subject_rejected_silently() {
        assert_eq!(
            reason(phir().ingest(&row("TEST1234-C1", "PHIR_01", "12-04-2005", 1))),
            RejectReason::ExcludedSubject
        );
    }

    #[test]
    fn test_unknown_subject_rejected() {
        assert_eq!(
            reason(phir().ingest(&row("119999999999-C1", "PHIR_01", "12-04-2005", 1))),
            RejectReason::UnresolvedSubject
        );
    }

    #[test]
    fn test_identity_check_fields_dropped() {
        let ingest = phir();
        for field in ["id_check_dob", "ID_check_gender", "Id_Check_name"] {
            assert_eq!(
                reason(ingest.ingest(&row("110000000001-C1", field, "F", 1))),
                RejectReason::IdentityCheckField
            );
        }
    }

    #[test]
    fn test_back_navigation_dropped() {
        let ingest = phir();
        assert_eq!(
            reason(ingest.ingest(&row("110000000001-C1", "PHIR_01", "skip_back", 1))),
            RejectReason::BackNavigation
        );

        let mut with_response = row("110000000001-C1", "PHIR_01", "12-04-2005", 1);
        with_response.response = Some("skip_back".into());
        assert_eq!(reason(ingest.ingest(&with_response)), RejectReason::BackNavigation);
    }

    #[test]
    fn test_empty_value_dropped() {
        assert_eq!(
            reason(phir().ingest(&row("110000000001-C1", "PHIR_01", "   ", 1))),
            RejectReason::EmptyValue
        );
    }

    #[test]
    fn test_iteration_zero_rejected() {
        assert_eq!(
            reason(phir().ingest(&row("110000000001-C1", "PHIR_01", "12-04-2005", 0))),
            RejectReason::InvalidIteration
        );
    }

    #[test]
    fn test_malformed_timestamp_rejected() {
        let mut bad = row("110000000001-C1", "PHIR_01", "12-04-2005", 1);
        bad.processed = "yesterday".into();
        assert_eq!(reason(phir().ingest(&bad)), RejectReason::MalformedTimestamp);
    }

    #[test]
    fn test_malformed_date_rejected() {
        let rejection = phir()
            .ingest(&row("110000000001-C1", "PHIR_01", "31-02-2005", 1))
            .unwrap_err();
        assert_eq!(rejection.reason, RejectReason::MalformedValue);
        assert!(rejection.detail.contains("PHIR_01"));
    }
}
