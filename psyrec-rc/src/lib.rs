//! psyrec-rc library interface
//!
//! Questionnaire event reconciliation: identity resolution against the
//! PSC1/PSC2 crosswalk, row ingest, per-instrument reconciliation and
//! cross-source fact merging. The `psyrec-rc` binary is a thin driver.

pub mod batch;
pub mod config;
pub mod crosswalk;
pub mod deidentify;
pub mod error;
pub mod identity;
pub mod ingest;
pub mod merge;
pub mod reconcile;
pub mod statistics;
pub mod types;

pub use crate::batch::{BatchReconciler, BatchReport, InstrumentInput};
pub use crate::config::ReconcileSettings;
pub use crate::crosswalk::Crosswalk;
pub use crate::error::{ReconcileError, ReconcileResult};
