//! Shared fixtures for psyrec-rc integration tests

#![allow(dead_code)]

pub mod log_capture;

use psyrec_rc::config::InstrumentSpec;
use psyrec_rc::types::{FieldType, PrimaryCode, RawRow, SecondaryCode};
use psyrec_rc::{Crosswalk, InstrumentInput, ReconcileSettings};
use std::sync::Arc;

/// Crosswalk with subjects 110000000001..=110000000009
pub fn crosswalk() -> Arc<Crosswalk> {
    let pairs = (1..=9).map(|n| {
        (
            PrimaryCode::new(format!("11000000000{}", n)),
            SecondaryCode::new(format!("00001111000{}", n)),
        )
    });
    Arc::new(Crosswalk::from_pairs(pairs).unwrap())
}

/// Default c-VEDA settings with a deterministic pool size
pub fn settings(workers: usize, batch_size: usize) -> Arc<ReconcileSettings> {
    Arc::new(ReconcileSettings {
        workers,
        batch_size,
        ..Default::default()
    })
}

/// Builder for raw Psytools rows
pub struct RowBuilder {
    row: RawRow,
}

impl RowBuilder {
    pub fn new(code: &str, trial: &str, result: &str) -> Self {
        Self {
            row: RawRow {
                user_code: code.to_string(),
                trial: trial.to_string(),
                trial_result: result.to_string(),
                iteration: 1,
                completed: "2017-03-01 10:00:00.000000".to_string(),
                processed: "2017-03-01 10:05:00.000000".to_string(),
                response: None,
            },
        }
    }

    pub fn iteration(mut self, iteration: u32) -> Self {
        self.row.iteration = iteration;
        self
    }

    /// Completion (and processing, five minutes later) on a day of March 2017
    pub fn on_day(mut self, day: u32) -> Self {
        self.row.completed = format!("2017-03-{:02} 10:00:00.000000", day);
        self.row.processed = format!("2017-03-{:02} 10:05:00.000000", day);
        self
    }

    pub fn build(self) -> RawRow {
        self.row
    }
}

pub fn row(code: &str, trial: &str, result: &str) -> RawRow {
    RowBuilder::new(code, trial, result).build()
}

/// Input for an instrument declared in the default settings
pub fn input(settings: &ReconcileSettings, instrument: &str, rows: Vec<RawRow>) -> InstrumentInput {
    let spec = settings
        .instrument(instrument)
        .cloned()
        .unwrap_or_else(|| InstrumentSpec::new(instrument));
    InstrumentInput { spec, rows }
}

/// Second ACE-IQ style instrument asserting sex
pub fn aceiq_followup_spec() -> InstrumentSpec {
    InstrumentSpec::new("ACEIQ_R").with_field("ACEIQ_C1", FieldType::Text)
}
