//! Batch reconciliation run
//!
//! Ingests every instrument export, groups accepted events per canonical
//! subject, reconciles (subject, instrument) work units on a bounded pool of
//! blocking workers, then merges the configured facts per subject.
//!
//! Results are gathered into ordered maps, so the report is identical
//! whatever the worker count, the batch size or the input row order.

use crate::config::{InstrumentSpec, ReconcileSettings};
use crate::crosswalk::Crosswalk;
use crate::error::{ReconcileError, ReconcileResult};
use crate::identity::IdentityResolver;
use crate::ingest::EventIngest;
use crate::merge::FieldMerger;
use crate::reconcile::SubjectReconciler;
use crate::statistics::{BatchStatistics, IngestStats};
use crate::types::{
    CanonicalId, CanonicalSubjectRecord, FactOutcome, RawRow, ReconciledSubject, TrialEvent,
};
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use psyrec_common::time::now;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Raw rows of one instrument export
#[derive(Debug, Clone)]
pub struct InstrumentInput {
    pub spec: InstrumentSpec,
    pub rows: Vec<RawRow>,
}

/// Outcome of one batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub crosswalk_digest: Option<String>,
    pub crosswalk_mappings: usize,
    /// Ordered by canonical id
    pub subjects: Vec<ReconciledSubject>,
    pub statistics: BatchStatistics,
}

/// Events of one subject for one instrument
struct WorkUnit {
    instrument: Arc<InstrumentSpec>,
    subject: CanonicalId,
    events: Vec<TrialEvent>,
}

type WorkerHandle = JoinHandle<Vec<CanonicalSubjectRecord>>;

/// Drives a complete reconciliation run
pub struct BatchReconciler {
    crosswalk: Arc<Crosswalk>,
    settings: Arc<ReconcileSettings>,
    resolver: Arc<IdentityResolver>,
    merger: FieldMerger,
}

impl BatchReconciler {
    pub fn new(crosswalk: Arc<Crosswalk>, settings: Arc<ReconcileSettings>) -> Self {
        let resolver = Arc::new(IdentityResolver::new(
            Arc::clone(&crosswalk),
            settings.identity.clone(),
        ));
        Self {
            crosswalk,
            settings,
            resolver,
            merger: FieldMerger::new(),
        }
    }

    /// Validate the rows of one instrument and group accepted events by subject
    pub fn ingest(
        &self,
        spec: &Arc<InstrumentSpec>,
        rows: &[RawRow],
    ) -> (BTreeMap<CanonicalId, Vec<TrialEvent>>, IngestStats) {
        let ingest = EventIngest::new(
            Arc::clone(&self.resolver),
            self.settings.ingest.clone(),
            Arc::clone(spec),
        );

        let mut stats = IngestStats::default();
        let mut grouped: BTreeMap<CanonicalId, Vec<TrialEvent>> = BTreeMap::new();
        for row in rows {
            let outcome = ingest.ingest(row);
            stats.record(row, &outcome);
            if let Ok(event) = outcome {
                grouped.entry(event.canonical_id.clone()).or_default().push(event);
            }
        }

        info!(instrument = %spec.name, "Ingest: {}", stats.display_string());
        (grouped, stats)
    }

    /// Run a complete batch
    ///
    /// The cancellation token is checked before each submission to the
    /// worker pool; batches already submitted run to completion.
    pub async fn run(
        &self,
        inputs: Vec<InstrumentInput>,
        cancel_token: CancellationToken,
    ) -> ReconcileResult<BatchReport> {
        self.settings.validate()?;

        let run_id = Uuid::new_v4();
        let started_at = now();
        info!(
            run_id = %run_id,
            instruments = inputs.len(),
            workers = self.settings.workers,
            "Starting reconciliation run"
        );

        let mut statistics = BatchStatistics::default();
        let mut units = Vec::new();
        let mut seen = HashSet::new();
        for input in inputs {
            if !seen.insert(input.spec.name.clone()) {
                return Err(ReconcileError::Settings(format!(
                    "instrument {} supplied twice",
                    input.spec.name
                )));
            }

            let spec = Arc::new(input.spec);
            let (grouped, stats) = self.ingest(&spec, &input.rows);
            statistics.instruments.insert(spec.name.clone(), stats);
            units.extend(grouped.into_iter().map(|(subject, events)| WorkUnit {
                instrument: Arc::clone(&spec),
                subject,
                events,
            }));
        }

        let mut batches: Vec<Vec<WorkUnit>> = Vec::new();
        let mut units = units.into_iter().peekable();
        while units.peek().is_some() {
            batches.push(units.by_ref().take(self.settings.batch_size).collect());
        }
        let total = batches.len();

        if cancel_token.is_cancelled() {
            info!(run_id = %run_id, "Reconciliation cancelled before any work was submitted");
            return Err(ReconcileError::Cancelled { completed: 0, total });
        }

        let mut pending = batches.into_iter();
        let mut tasks: FuturesUnordered<WorkerHandle> = FuturesUnordered::new();
        for _ in 0..self.settings.workers {
            if !submit(&mut pending, &mut tasks, &cancel_token) {
                break;
            }
        }

        let mut records: BTreeMap<CanonicalId, BTreeMap<String, CanonicalSubjectRecord>> =
            BTreeMap::new();
        let mut completed = 0usize;
        while let Some(joined) = tasks.next().await {
            let batch = joined.map_err(|e| ReconcileError::Worker(e.to_string()))?;
            completed += 1;
            for record in batch {
                records
                    .entry(record.subject.clone())
                    .or_default()
                    .insert(record.instrument.clone(), record);
            }
            submit(&mut pending, &mut tasks, &cancel_token);
        }

        if completed < total {
            warn!(
                run_id = %run_id,
                completed,
                total,
                "Reconciliation cancelled"
            );
            return Err(ReconcileError::Cancelled { completed, total });
        }

        let mut subjects = Vec::with_capacity(records.len());
        for (subject, records) in records {
            let facts: BTreeMap<String, FactOutcome> = self
                .settings
                .facts
                .iter()
                .map(|fact| (fact.name.clone(), self.merger.merge_fact(&subject, fact, &records)))
                .collect();
            statistics.record_subject(records.values(), facts.iter());
            subjects.push(ReconciledSubject {
                subject,
                records,
                facts,
            });
        }

        info!(run_id = %run_id, "Reconciliation complete: {}", statistics.display_string());

        Ok(BatchReport {
            run_id,
            started_at,
            finished_at: now(),
            crosswalk_digest: self.crosswalk.digest().map(str::to_string),
            crosswalk_mappings: self.crosswalk.len(),
            subjects,
            statistics,
        })
    }
}

/// Hand the next batch to a blocking worker; false when nothing was submitted
fn submit<I>(
    pending: &mut I,
    tasks: &mut FuturesUnordered<WorkerHandle>,
    cancel_token: &CancellationToken,
) -> bool
where
    I: Iterator<Item = Vec<WorkUnit>>,
{
    if cancel_token.is_cancelled() {
        return false;
    }
    match pending.next() {
        Some(batch) => {
            tasks.push(tokio::task::spawn_blocking(move || reconcile_batch(batch)));
            true
        }
        None => false,
    }
}

fn reconcile_batch(batch: Vec<WorkUnit>) -> Vec<CanonicalSubjectRecord> {
    let reconciler = SubjectReconciler::new();
    batch
        .iter()
        .filter_map(|unit| reconciler.reconcile(&unit.instrument, &unit.subject, &unit.events))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FieldType, FieldValue, PrimaryCode, SecondaryCode};

    fn crosswalk() -> Arc<Crosswalk> {
        Arc::new(
            Crosswalk::from_pairs(vec![
                (PrimaryCode::new("110000000001"), SecondaryCode::new("000011112222")),
                (PrimaryCode::new("110000000002"), SecondaryCode::new("000033334444")),
            ])
            .unwrap(),
        )
    }

    fn row(code: &str, trial: &str, result: &str, iteration: u32) -> RawRow {
        RawRow {
            user_code: code.into(),
            trial: trial.into(),
            trial_result: result.into(),
            iteration,
            completed: "2017-02-01 09:00:00.000000".into(),
            processed: "2017-02-01 09:30:00.000000".into(),
            response: None,
        }
    }

    fn settings() -> ReconcileSettings {
        ReconcileSettings {
            workers: 2,
            batch_size: 1,
            ..Default::default()
        }
    }

    fn pds_input(rows: Vec<RawRow>) -> InstrumentInput {
        InstrumentInput {
            spec: InstrumentSpec::new("PDS").with_field("PDS_gender", FieldType::Text),
            rows,
        }
    }

    #[tokio::test]
    async fn test_run_produces_ordered_subjects() {
        let reconciler = BatchReconciler::new(crosswalk(), Arc::new(settings()));
        let report = reconciler
            .run(
                vec![pds_input(vec![
                    row("110000000002-C1", "PDS_gender", "M", 1),
                    row("110000000001-C1", "PDS_gender", "F", 1),
                    row("TEST-C1", "PDS_gender", "F", 1),
                ])],
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let ids: Vec<String> = report.subjects.iter().map(|s| s.subject.to_string()).collect();
        assert_eq!(ids, vec!["110000000001", "110000000002"]);
        assert_eq!(report.statistics.subjects, 2);
        assert_eq!(report.statistics.instruments["PDS"].test_subjects, 1);
        assert_eq!(
            report.subjects[0].facts["sex"].value(),
            Some(&FieldValue::Text("F".into()))
        );
        assert_eq!(report.crosswalk_mappings, 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let reconciler = BatchReconciler::new(crosswalk(), Arc::new(settings()));
        let token = CancellationToken::new();
        token.cancel();

        let result = reconciler
            .run(
                vec![pds_input(vec![row("110000000001-C1", "PDS_gender", "F", 1)])],
                token,
            )
            .await;
        assert!(matches!(
            result,
            Err(ReconcileError::Cancelled { completed: 0, total: 1 })
        ));
    }

    #[tokio::test]
    async fn test_duplicate_instrument_input_rejected() {
        let reconciler = BatchReconciler::new(crosswalk(), Arc::new(settings()));
        let result = reconciler
            .run(vec![pds_input(vec![]), pds_input(vec![])], CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ReconcileError::Settings(_))));
    }

    #[test]
    fn test_ingest_groups_by_subject() {
        let reconciler = BatchReconciler::new(crosswalk(), Arc::new(settings()));
        let spec = Arc::new(InstrumentSpec::new("PDS"));
        let (grouped, stats) = reconciler.ingest(
            &spec,
            &[
                row("110000000001-C1", "PDS_gender", "F", 1),
                row("110000000001-C2", "PDS_gender", "F", 1),
                row("110000000002-C1", "PDS_gender", "skip_back", 2),
            ],
        );
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped.values().next().map(Vec::len), Some(2));
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.rows_seen, 3);
    }
}
