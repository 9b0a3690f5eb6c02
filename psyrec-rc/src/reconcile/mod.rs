//! Per-instrument reconciliation
//!
//! Raw events of one subject and one instrument go through context
//! selection, then per-field iteration reduction, producing one
//! [`CanonicalSubjectRecord`](crate::types::CanonicalSubjectRecord).

pub mod context_disambiguator;
pub mod iteration_reducer;
pub mod subject_reconciler;

pub use context_disambiguator::{ContextDisambiguator, ContextSelection};
pub use iteration_reducer::IterationReducer;
pub use subject_reconciler::SubjectReconciler;
