//! Canonical record construction for one (subject, instrument)

use super::context_disambiguator::ContextDisambiguator;
use super::iteration_reducer::IterationReducer;
use crate::config::InstrumentSpec;
use crate::types::{
    CanonicalId, CanonicalSubjectRecord, ProvenanceNote, ResolvedFieldValue, TimestampRange,
    TrialEvent,
};
use std::collections::BTreeMap;
use tracing::debug;

/// Builds the canonical record of one subject for one instrument
///
/// Events from discarded contexts never leak into the record. Declared
/// fields without a surviving answer are present as `Absent`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubjectReconciler {
    disambiguator: ContextDisambiguator,
    reducer: IterationReducer,
}

impl SubjectReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reconcile(
        &self,
        instrument: &InstrumentSpec,
        subject: &CanonicalId,
        events: &[TrialEvent],
    ) -> Option<CanonicalSubjectRecord> {
        let selection = self.disambiguator.select(subject, &instrument.name, events)?;

        let kept: Vec<&TrialEvent> = events
            .iter()
            .filter(|e| e.context == selection.chosen)
            .collect();

        let mut by_field: BTreeMap<&str, Vec<&TrialEvent>> = BTreeMap::new();
        for event in kept.iter().copied() {
            by_field.entry(event.field.as_str()).or_default().push(event);
        }

        let mut fields: BTreeMap<String, ResolvedFieldValue> = by_field
            .iter()
            .map(|(field, answers)| {
                (
                    field.to_string(),
                    self.reducer.reduce(answers.iter().copied()),
                )
            })
            .collect();
        for declared in instrument.fields.keys() {
            fields
                .entry(declared.clone())
                .or_insert(ResolvedFieldValue::Absent);
        }

        // kept is never empty: the chosen context comes from these events
        let completed = TimestampRange::spanning(kept.iter().map(|e| e.completed_at))?;
        let processed = TimestampRange::spanning(kept.iter().map(|e| e.processed_at))?;

        let mut provenance = Vec::new();
        if !selection.superseded.is_empty() {
            provenance.push(ProvenanceNote::SupersededContexts {
                discarded: selection.superseded.clone(),
            });
        }
        if selection.is_ambiguous() {
            provenance.push(ProvenanceNote::AmbiguousContext {
                tied: selection.tied.clone(),
            });
        }

        debug!(
            subject = %subject,
            instrument = %instrument.name,
            events = kept.len(),
            fields = fields.len(),
            "Reconciled subject record"
        );

        Some(CanonicalSubjectRecord {
            subject: subject.clone(),
            instrument: instrument.name.clone(),
            context: selection.chosen,
            fields,
            completed,
            processed,
            provenance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContextTag, FieldType, FieldValue, PrimaryCode};
    use chrono::{NaiveDate, NaiveDateTime};

    fn subject() -> CanonicalId {
        CanonicalId::baseline(PrimaryCode::new("110000000001"))
    }

    fn on(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2017, 5, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn event(context: &str, field: &str, iteration: u32, value: &str, day: u32) -> TrialEvent {
        TrialEvent {
            subject_code: format!("110000000001-{}", context),
            canonical_id: subject(),
            context: Some(ContextTag::new(context)),
            field: field.into(),
            iteration,
            raw_value: value.into(),
            value: FieldValue::Text(value.into()),
            completed_at: on(day, 10 + iteration),
            processed_at: on(day + 1, 8),
        }
    }

    fn pds() -> InstrumentSpec {
        InstrumentSpec::new("PDS")
            .with_field("PDS_gender", FieldType::Text)
            .with_field("PDS_07a", FieldType::Month)
    }

    #[test]
    fn test_record_keeps_only_freshest_context() {
        let events = vec![
            event("C1", "PDS_gender", 1, "F", 2),
            event("C1", "PDS_01", 1, "old", 2),
            event("C2", "PDS_gender", 1, "M", 9),
            event("C2", "PDS_gender", 2, "F", 9),
        ];

        let record = SubjectReconciler::new()
            .reconcile(&pds(), &subject(), &events)
            .unwrap();

        assert_eq!(record.context, Some(ContextTag::new("C2")));
        assert_eq!(record.value("PDS_gender"), Some(&FieldValue::Text("F".into())));
        assert!(!record.fields.contains_key("PDS_01"));
        assert_eq!(record.superseded_contexts(), &[Some(ContextTag::new("C1"))]);
        assert!(!record.has_ambiguous_context());
    }

    #[test]
    fn test_declared_fields_without_answers_are_absent() {
        let events = vec![event("C1", "PDS_gender", 1, "F", 2)];
        let record = SubjectReconciler::new()
            .reconcile(&pds(), &subject(), &events)
            .unwrap();
        assert_eq!(record.fields.get("PDS_07a"), Some(&ResolvedFieldValue::Absent));
        assert!(record.provenance.is_empty());
    }

    #[test]
    fn test_timestamp_ranges_cover_kept_events() {
        let events = vec![
            event("C1", "PDS_gender", 1, "F", 2),
            event("C1", "PDS_gender", 3, "F", 2),
            event("C1", "PDS_07a", 2, "x", 2),
        ];
        let record = SubjectReconciler::new()
            .reconcile(&pds(), &subject(), &events)
            .unwrap();
        assert_eq!(record.completed.first, on(2, 11));
        assert_eq!(record.completed.last, on(2, 13));
        assert_eq!(record.processed.first, on(3, 8));
    }

    #[test]
    fn test_ambiguous_context_noted() {
        let events = vec![
            event("C1", "PDS_gender", 1, "F", 4),
            event("C3", "PDS_gender", 1, "M", 4),
        ];
        let record = SubjectReconciler::new()
            .reconcile(&pds(), &subject(), &events)
            .unwrap();
        assert!(record.has_ambiguous_context());
        assert_eq!(record.context, Some(ContextTag::new("C3")));
    }

    #[test]
    fn test_no_events_no_record() {
        assert!(SubjectReconciler::new()
            .reconcile(&pds(), &subject(), &[])
            .is_none());
    }
}
