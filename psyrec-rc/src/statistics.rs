//! Batch Reconciliation Statistics
//!
//! **Purpose:** Counters reported alongside reconciled subjects so that data
//! managers can see how much of each export was used and why the rest was not.

use crate::types::{
    CanonicalSubjectRecord, FactOutcome, RawRow, RejectReason, Rejection, ResolutionBasis,
    TrialEvent,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// **Ingest Statistics** for one instrument
///
/// Display: "N rows, M accepted, K rejected (T test subjects)"
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestStats {
    /// Raw rows seen
    pub rows_seen: usize,
    /// Rows that became trial events
    pub accepted: usize,
    /// Rejected rows by reason
    pub rejected: BTreeMap<RejectReason, usize>,
    /// Distinct test/demo subjects encountered
    pub test_subjects: usize,
    #[serde(skip)]
    test_codes: HashSet<String>,
}

impl IngestStats {
    /// Count the outcome of one row
    pub fn record(&mut self, row: &RawRow, outcome: &Result<TrialEvent, Rejection>) {
        self.rows_seen += 1;
        match outcome {
            Ok(_) => self.accepted += 1,
            Err(rejection) => {
                *self.rejected.entry(rejection.reason).or_insert(0) += 1;
                if rejection.reason == RejectReason::ExcludedSubject
                    && self.test_codes.insert(row.user_code.trim().to_uppercase())
                {
                    self.test_subjects += 1;
                }
            }
        }
    }

    pub fn rejected_total(&self) -> usize {
        self.rejected.values().sum()
    }

    pub fn rejected_for(&self, reason: RejectReason) -> usize {
        self.rejected.get(&reason).copied().unwrap_or(0)
    }

    pub fn display_string(&self) -> String {
        format!(
            "{} rows, {} accepted, {} rejected ({} test subjects)",
            self.rows_seen,
            self.accepted,
            self.rejected_total(),
            self.test_subjects
        )
    }
}

/// **Fact Statistics** for one logical fact
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactTally {
    pub single_source: usize,
    pub unanimous: usize,
    pub majority: usize,
    pub reference: usize,
    pub ambiguous: usize,
    pub missing: usize,
}

impl FactTally {
    pub fn record(&mut self, outcome: &FactOutcome) {
        match outcome {
            FactOutcome::Resolved { basis, .. } => match basis {
                ResolutionBasis::SingleSource => self.single_source += 1,
                ResolutionBasis::Unanimous => self.unanimous += 1,
                ResolutionBasis::Majority { .. } => self.majority += 1,
                ResolutionBasis::Reference { .. } => self.reference += 1,
            },
            FactOutcome::Ambiguous { .. } => self.ambiguous += 1,
            FactOutcome::Missing => self.missing += 1,
        }
    }

    pub fn resolved(&self) -> usize {
        self.single_source + self.unanimous + self.majority + self.reference
    }
}

/// **Batch Statistics**
///
/// Display: "N subjects, M records, S superseded contexts, A ambiguous contexts"
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchStatistics {
    pub instruments: BTreeMap<String, IngestStats>,
    /// Canonical subjects with at least one record
    pub subjects: usize,
    /// Canonical subject records
    pub records: usize,
    /// Records that discarded at least one other context
    pub superseded_contexts: usize,
    /// Records whose context choice was a tie
    pub ambiguous_contexts: usize,
    pub facts: BTreeMap<String, FactTally>,
}

impl BatchStatistics {
    pub fn record_subject<'a, R, F>(&mut self, records: R, facts: F)
    where
        R: IntoIterator<Item = &'a CanonicalSubjectRecord>,
        F: IntoIterator<Item = (&'a String, &'a FactOutcome)>,
    {
        self.subjects += 1;
        for record in records {
            self.records += 1;
            if !record.superseded_contexts().is_empty() {
                self.superseded_contexts += 1;
            }
            if record.has_ambiguous_context() {
                self.ambiguous_contexts += 1;
            }
        }
        for (name, outcome) in facts {
            self.facts.entry(name.clone()).or_default().record(outcome);
        }
    }

    pub fn display_string(&self) -> String {
        format!(
            "{} subjects, {} records, {} superseded contexts, {} ambiguous contexts",
            self.subjects, self.records, self.superseded_contexts, self.ambiguous_contexts
        )
    }
}
