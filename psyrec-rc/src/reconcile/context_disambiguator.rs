//! Administration (context) selection
//!
//! A subject may have taken the same instrument in several contexts, e.g.
//! once with the C1 and once with the C2 version. The context whose latest
//! completion is the most recent is kept and all others are discarded for
//! that instrument. Equal freshness is surfaced instead of silently guessed.

use crate::types::{context_label, CanonicalId, ContextTag, TrialEvent};
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Outcome of context selection for one (subject, instrument)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSelection {
    pub chosen: Option<ContextTag>,
    /// Latest completion timestamp per context
    pub freshness: BTreeMap<Option<ContextTag>, NaiveDateTime>,
    /// Every context not chosen, in tag order
    pub superseded: Vec<Option<ContextTag>>,
    /// Contexts sharing the chosen freshness, chosen one included
    pub tied: Vec<Option<ContextTag>>,
}

impl ContextSelection {
    pub fn is_ambiguous(&self) -> bool {
        self.tied.len() > 1
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ContextDisambiguator;

impl ContextDisambiguator {
    pub fn new() -> Self {
        Self
    }

    /// Pick the freshest context; None when there are no events
    ///
    /// Ties are resolved towards the greatest tag so the result is stable,
    /// and reported through [`ContextSelection::tied`].
    pub fn select(
        &self,
        subject: &CanonicalId,
        instrument: &str,
        events: &[TrialEvent],
    ) -> Option<ContextSelection> {
        let mut freshness: BTreeMap<Option<ContextTag>, NaiveDateTime> = BTreeMap::new();
        for event in events {
            freshness
                .entry(event.context.clone())
                .and_modify(|latest| {
                    if event.completed_at > *latest {
                        *latest = event.completed_at;
                    }
                })
                .or_insert(event.completed_at);
        }

        let newest = *freshness.values().max()?;
        let tied: Vec<Option<ContextTag>> = freshness
            .iter()
            .filter(|(_, latest)| **latest == newest)
            .map(|(context, _)| context.clone())
            .collect();
        let chosen = tied.last().cloned().flatten();
        let superseded: Vec<Option<ContextTag>> = freshness
            .keys()
            .filter(|context| **context != chosen)
            .cloned()
            .collect();

        if tied.len() > 1 {
            warn!(
                subject = %subject,
                instrument,
                "Contexts {} share the latest completion {}; keeping {}",
                labels(&tied),
                newest,
                context_label(&chosen)
            );
        } else if !superseded.is_empty() {
            info!(
                subject = %subject,
                instrument,
                "Keeping context {} over {}",
                context_label(&chosen),
                labels(&superseded)
            );
        }

        Some(ContextSelection {
            chosen,
            freshness,
            superseded,
            tied,
        })
    }
}

fn labels(contexts: &[Option<ContextTag>]) -> String {
    contexts
        .iter()
        .map(context_label)
        .collect::<Vec<_>>()
        .join(", ")
}
