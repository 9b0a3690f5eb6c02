//! Reconciliation settings
//!
//! Loaded from `psyrec-rc.toml` through the shared config resolver. Every
//! section has a default matching the c-VEDA Psytools exports, so a partial
//! file only needs to override what differs.

use crate::error::{ReconcileError, ReconcileResult};
use crate::types::{FieldType, SourceRef, Timepoint};
use psyrec_common::config::{resolve_relative, LoggingConfig};
use psyrec_common::time::PSYTOOLS_TIMESTAMP_FORMAT;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Top-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileSettings {
    /// PSC1,PSC2 crosswalk file
    pub crosswalk: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub identity: IdentitySettings,
    pub ingest: IngestSettings,
    /// Number of blocking reconciliation workers
    pub workers: usize,
    /// Work units (subject × instrument) per worker submission
    pub batch_size: usize,
    pub instruments: Vec<InstrumentSpec>,
    pub facts: Vec<FactSpec>,
    pub deidentify: DeidentifySettings,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            crosswalk: None,
            logging: LoggingConfig::default(),
            identity: IdentitySettings::default(),
            ingest: IngestSettings::default(),
            workers: default_workers(),
            batch_size: 256,
            instruments: default_instruments(),
            facts: default_facts(),
            deidentify: DeidentifySettings::default(),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Subject code grammar
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentitySettings {
    /// Digits in a primary code
    pub code_digits: usize,
    /// Accepted context suffixes (after the last `-`)
    pub context_tags: Vec<String>,
    /// Case-insensitive markers of test/demo subjects
    pub test_markers: Vec<String>,
    /// Primary code suffixes denoting a follow-up timepoint
    pub follow_up_suffixes: BTreeMap<String, Timepoint>,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        let follow_up_suffixes = [
            ("FU1", Timepoint::FollowUp1),
            ("FU2", Timepoint::FollowUp2),
            ("FUMRI1", Timepoint::FollowUp1),
            ("FUMRI2", Timepoint::FollowUp2),
        ]
        .into_iter()
        .map(|(suffix, timepoint)| (suffix.to_string(), timepoint))
        .collect();

        Self {
            code_digits: 12,
            context_tags: vec!["C1".into(), "C2".into(), "C3".into()],
            test_markers: ["DEMO", "MOCK", "NPPILOT", "PILOT", "TEST"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            follow_up_suffixes,
        }
    }
}

/// Row filtering and typing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Case-insensitive prefixes of identity-check fields
    pub identity_check_prefixes: Vec<String>,
    /// Answer recorded when the respondent navigated back
    pub back_sentinel: String,
    /// chrono format of the timestamp columns
    pub timestamp_format: String,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            identity_check_prefixes: vec!["id_check_".into()],
            back_sentinel: "skip_back".into(),
            timestamp_format: PSYTOOLS_TIMESTAMP_FORMAT.into(),
        }
    }
}

/// One questionnaire and its declared fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    pub name: String,
    /// JSON-lines export of raw rows
    #[serde(default)]
    pub events: Option<PathBuf>,
    /// Declared field types; undeclared fields are text
    #[serde(default)]
    pub fields: BTreeMap<String, FieldType>,
    /// Reject rows for fields not listed in `fields`
    #[serde(default)]
    pub declared_only: bool,
}

impl InstrumentSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            events: None,
            fields: BTreeMap::new(),
            declared_only: false,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.insert(field.into(), field_type);
        self
    }

    pub fn field_type(&self, field: &str) -> Option<FieldType> {
        self.fields.get(field).copied()
    }
}

/// A logical fact asserted by several instrument fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactSpec {
    pub name: String,
    pub sources: Vec<SourceRef>,
    /// Authoritative source; its value wins whenever present
    #[serde(default)]
    pub reference: Option<SourceRef>,
}

/// De-identified output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeidentifySettings {
    /// Fact holding the date of birth that dates are made relative to
    pub date_of_birth_fact: String,
}

impl Default for DeidentifySettings {
    fn default() -> Self {
        Self {
            date_of_birth_fact: "date_of_birth".into(),
        }
    }
}

fn default_instruments() -> Vec<InstrumentSpec> {
    vec![
        InstrumentSpec::new("ACEIQ")
            .with_field("ACEIQ_C1", FieldType::Text)
            .with_field("ACEIQ_C2", FieldType::Date),
        InstrumentSpec::new("PHIR").with_field("PHIR_01", FieldType::Date),
        InstrumentSpec::new("PDS")
            .with_field("PDS_gender", FieldType::Text)
            .with_field("PDS_07a", FieldType::Month),
        InstrumentSpec::new("SDIM").with_field("SDI_02", FieldType::Text),
    ]
}

fn default_facts() -> Vec<FactSpec> {
    vec![
        FactSpec {
            name: "date_of_birth".into(),
            sources: vec![
                SourceRef::new("ACEIQ", "ACEIQ_C2"),
                SourceRef::new("PHIR", "PHIR_01"),
            ],
            reference: None,
        },
        FactSpec {
            name: "sex".into(),
            sources: vec![
                SourceRef::new("ACEIQ", "ACEIQ_C1"),
                SourceRef::new("PDS", "PDS_gender"),
                SourceRef::new("SDIM", "SDI_02"),
            ],
            reference: None,
        },
    ]
}

impl ReconcileSettings {
    /// Check internal consistency before a run
    pub fn validate(&self) -> ReconcileResult<()> {
        if self.workers == 0 {
            return Err(ReconcileError::Settings("workers must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(ReconcileError::Settings("batch_size must be at least 1".into()));
        }
        if self.identity.code_digits == 0 {
            return Err(ReconcileError::Settings("identity.code_digits must be at least 1".into()));
        }

        let mut names = HashSet::new();
        for instrument in &self.instruments {
            if !names.insert(instrument.name.as_str()) {
                return Err(ReconcileError::Settings(format!(
                    "instrument {} declared twice",
                    instrument.name
                )));
            }
        }

        let mut fact_names = HashSet::new();
        for fact in &self.facts {
            if !fact_names.insert(fact.name.as_str()) {
                return Err(ReconcileError::Settings(format!("fact {} declared twice", fact.name)));
            }
            for source in fact.sources.iter().chain(fact.reference.iter()) {
                if !names.contains(source.instrument.as_str()) {
                    return Err(ReconcileError::Settings(format!(
                        "fact {} refers to unknown instrument {}",
                        fact.name, source.instrument
                    )));
                }
            }
        }

        Ok(())
    }

    /// Make file paths relative to the directory of the settings file
    pub fn resolve_paths(&mut self, settings_file: Option<&Path>) {
        if let Some(path) = self.crosswalk.take() {
            self.crosswalk = Some(resolve_relative(settings_file, &path));
        }
        if let Some(path) = self.logging.file.take() {
            self.logging.file = Some(resolve_relative(settings_file, &path));
        }
        for instrument in &mut self.instruments {
            if let Some(path) = instrument.events.take() {
                instrument.events = Some(resolve_relative(settings_file, &path));
            }
        }
    }

    pub fn instrument(&self, name: &str) -> Option<&InstrumentSpec> {
        self.instruments.iter().find(|i| i.name == name)
    }
}
