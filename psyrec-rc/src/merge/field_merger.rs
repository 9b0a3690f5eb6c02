//! Cross-source fact merging
//!
//! The same logical fact (sex, date of birth) is asked by several
//! instruments. Each asserting source gets one vote; a unique majority wins
//! and a tied vote is flagged for manual adjudication. A configured reference
//! source overrides voting whenever it carries a value.

use crate::config::FactSpec;
use crate::types::{
    Assertion, CanonicalId, CanonicalSubjectRecord, FactOutcome, FieldValue, ResolutionBasis,
    SourceRef,
};
use std::collections::BTreeMap;
use tracing::{error, info, warn};

/// Merges independent assertions of one fact into a final outcome
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldMerger;

impl FieldMerger {
    pub fn new() -> Self {
        Self
    }

    /// Merge one configured fact from a subject's canonical records
    pub fn merge_fact(
        &self,
        subject: &CanonicalId,
        fact: &FactSpec,
        records: &BTreeMap<String, CanonicalSubjectRecord>,
    ) -> FactOutcome {
        let reference = fact
            .reference
            .as_ref()
            .and_then(|source| assertion_from(source, records));

        let assertions: Vec<Assertion> = fact
            .sources
            .iter()
            .filter(|source| Some(*source) != fact.reference.as_ref())
            .filter_map(|source| assertion_from(source, records))
            .collect();

        self.merge(subject, &fact.name, assertions, reference)
    }

    /// Merge explicit assertions
    ///
    /// The result depends only on the set of assertions, not their order.
    pub fn merge(
        &self,
        subject: &CanonicalId,
        fact: &str,
        mut assertions: Vec<Assertion>,
        reference: Option<Assertion>,
    ) -> FactOutcome {
        assertions.sort_by(|a, b| a.source.cmp(&b.source).then_with(|| a.value.cmp(&b.value)));

        if let Some(reference) = reference {
            return self.by_reference(subject, fact, assertions, reference);
        }

        match assertions.len() {
            0 => {
                warn!(subject = %subject, fact, "No source asserts this fact");
                FactOutcome::Missing
            }
            1 => {
                let Assertion { source, value } = assertions.remove(0);
                FactOutcome::Resolved {
                    value,
                    sources: vec![source],
                    basis: ResolutionBasis::SingleSource,
                }
            }
            _ => self.by_vote(subject, fact, assertions),
        }
    }

    fn by_reference(
        &self,
        subject: &CanonicalId,
        fact: &str,
        assertions: Vec<Assertion>,
        reference: Assertion,
    ) -> FactOutcome {
        let discrepancies: Vec<Assertion> = assertions
            .into_iter()
            .filter(|a| a.value != reference.value)
            .collect();

        for discrepancy in &discrepancies {
            info!(
                subject = %subject,
                fact,
                "{} disagrees with reference {}",
                discrepancy,
                reference
            );
        }

        FactOutcome::Resolved {
            value: reference.value,
            sources: vec![reference.source],
            basis: ResolutionBasis::Reference { discrepancies },
        }
    }

    fn by_vote(&self, subject: &CanonicalId, fact: &str, assertions: Vec<Assertion>) -> FactOutcome {
        let mut votes: BTreeMap<&FieldValue, Vec<&SourceRef>> = BTreeMap::new();
        for assertion in &assertions {
            votes.entry(&assertion.value).or_default().push(&assertion.source);
        }

        if votes.len() == 1 {
            let Assertion { value, .. } = assertions[0].clone();
            return FactOutcome::Resolved {
                value,
                sources: assertions.into_iter().map(|a| a.source).collect(),
                basis: ResolutionBasis::Unanimous,
            };
        }

        let top = votes.values().map(Vec::len).max().unwrap_or(0);
        let leaders: Vec<&FieldValue> = votes
            .iter()
            .filter(|(_, sources)| sources.len() == top)
            .map(|(value, _)| *value)
            .collect();

        if let [winner] = leaders.as_slice() {
            let winner = (*winner).clone();
            let (supporting, dissent): (Vec<Assertion>, Vec<Assertion>) =
                assertions.into_iter().partition(|a| a.value == winner);

            info!(
                subject = %subject,
                fact,
                "Majority {} ({} of {}) overrides {}",
                winner,
                supporting.len(),
                supporting.len() + dissent.len(),
                join(&dissent)
            );

            return FactOutcome::Resolved {
                value: winner,
                sources: supporting.into_iter().map(|a| a.source).collect(),
                basis: ResolutionBasis::Majority { dissent },
            };
        }

        error!(
            subject = %subject,
            fact,
            "Inconsistent values, manual adjudication required: {}",
            join(&assertions)
        );
        FactOutcome::Ambiguous {
            candidates: assertions,
        }
    }
}

fn assertion_from(
    source: &SourceRef,
    records: &BTreeMap<String, CanonicalSubjectRecord>,
) -> Option<Assertion> {
    records
        .get(&source.instrument)
        .and_then(|record| record.value(&source.field))
        .map(|value| Assertion::new(source.clone(), value.clone()))
}

fn join(assertions: &[Assertion]) -> String {
    assertions
        .iter()
        .map(Assertion::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
