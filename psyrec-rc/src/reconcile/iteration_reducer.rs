//! Per-field iteration reduction
//!
//! Respondents may answer the same question several times within one
//! administration (navigating back and forth). Only the answer from the
//! highest iteration counts. Duplicate rows at that iteration are broken by
//! latest completion, then latest processing, then greatest value, so the
//! winner never depends on input order.

use crate::types::{FieldValue, ResolvedFieldValue, TrialEvent};
use chrono::NaiveDateTime;
use tracing::warn;

/// Selects the final answer among repeated answers to one field
#[derive(Debug, Clone, Copy, Default)]
pub struct IterationReducer;

impl IterationReducer {
    pub fn new() -> Self {
        Self
    }

    /// Final answer of one field, `Absent` when no event survived ingest
    pub fn reduce<'a, I>(&self, events: I) -> ResolvedFieldValue
    where
        I: IntoIterator<Item = &'a TrialEvent>,
    {
        match self.select(events) {
            Some(winner) => ResolvedFieldValue::Present(winner.value.clone()),
            None => ResolvedFieldValue::Absent,
        }
    }

    /// Winning event of one field
    pub fn select<'a, I>(&self, events: I) -> Option<&'a TrialEvent>
    where
        I: IntoIterator<Item = &'a TrialEvent>,
    {
        let mut winner: Option<&'a TrialEvent> = None;
        let mut duplicates = 0usize;

        for event in events {
            match winner {
                None => winner = Some(event),
                Some(current) => {
                    if event.iteration == current.iteration {
                        duplicates += 1;
                    } else if event.iteration > current.iteration {
                        duplicates = 0;
                    }
                    if rank(event) > rank(current) {
                        winner = Some(event);
                    }
                }
            }
        }

        if duplicates > 0 {
            if let Some(w) = winner {
                warn!(
                    subject = %w.canonical_id,
                    field = %w.field,
                    iteration = w.iteration,
                    "Duplicate answers at the same iteration"
                );
            }
        }

        winner
    }
}

fn rank(event: &TrialEvent) -> (u32, NaiveDateTime, NaiveDateTime, &FieldValue) {
    (
        event.iteration,
        event.completed_at,
        event.processed_at,
        &event.value,
    )
}
