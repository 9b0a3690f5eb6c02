//! PSC1 to PSC2 pseudonym crosswalk
//!
//! The crosswalk file holds one `primary,secondary` pair per line. Blank
//! lines are ignored. The mapping must be a bijection: a primary code mapped
//! to two secondary codes (or the reverse) makes the whole file unusable.

use crate::error::{ReconcileError, ReconcileResult};
use crate::types::{PrimaryCode, SecondaryCode};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// Bidirectional, immutable pseudonym mapping
#[derive(Debug, Clone, Default)]
pub struct Crosswalk {
    forward: HashMap<PrimaryCode, SecondaryCode>,
    inverse: HashMap<SecondaryCode, PrimaryCode>,
    digest: Option<String>,
}

impl Crosswalk {
    /// Build from pairs, rejecting any inconsistency
    ///
    /// Exact duplicate pairs are tolerated with a warning.
    pub fn from_pairs<I>(pairs: I) -> ReconcileResult<Self>
    where
        I: IntoIterator<Item = (PrimaryCode, SecondaryCode)>,
    {
        let mut crosswalk = Self::default();
        for (primary, secondary) in pairs {
            crosswalk.insert(primary, secondary)?;
        }
        Ok(crosswalk)
    }

    /// Parse crosswalk file contents
    pub fn parse(content: &str) -> ReconcileResult<Self> {
        let mut crosswalk = Self::default();

        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let columns: Vec<&str> = line.split(',').map(str::trim).collect();
            match columns.as_slice() {
                [primary, secondary] if !primary.is_empty() && !secondary.is_empty() => {
                    crosswalk.insert(PrimaryCode::new(*primary), SecondaryCode::new(*secondary))?;
                }
                _ => {
                    return Err(ReconcileError::CrosswalkFormat {
                        line: index + 1,
                        detail: format!(
                            "expected 'primary,secondary', found {} column(s)",
                            columns.len()
                        ),
                    });
                }
            }
        }

        Ok(crosswalk)
    }

    /// Load a crosswalk file, recording the SHA-256 digest of its contents
    pub fn load(path: &Path) -> ReconcileResult<Self> {
        let bytes = std::fs::read(path)?;
        let digest = format!("{:x}", Sha256::digest(&bytes));
        let content = String::from_utf8_lossy(&bytes);

        let mut crosswalk = Self::parse(&content)?;
        crosswalk.digest = Some(digest);

        info!(
            path = %path.display(),
            mappings = crosswalk.len(),
            digest = crosswalk.digest().unwrap_or_default(),
            "Loaded pseudonym crosswalk"
        );

        Ok(crosswalk)
    }

    fn insert(&mut self, primary: PrimaryCode, secondary: SecondaryCode) -> ReconcileResult<()> {
        if let Some(existing) = self.forward.get(&primary) {
            if *existing == secondary {
                warn!("Duplicate crosswalk entry {},{}", primary, secondary);
                return Ok(());
            }
            return Err(ReconcileError::CrosswalkConflict {
                primary: primary.to_string(),
                first: existing.to_string(),
                second: secondary.to_string(),
            });
        }

        if let Some(existing) = self.inverse.get(&secondary) {
            return Err(ReconcileError::CrosswalkCollision {
                secondary: secondary.to_string(),
                first: existing.to_string(),
                second: primary.to_string(),
            });
        }

        self.inverse.insert(secondary.clone(), primary.clone());
        self.forward.insert(primary, secondary);
        Ok(())
    }

    pub fn secondary_of(&self, primary: &str) -> Option<&SecondaryCode> {
        self.forward.get(primary)
    }

    pub fn primary_of(&self, secondary: &str) -> Option<&PrimaryCode> {
        self.inverse.get(secondary)
    }

    pub fn contains_primary(&self, primary: &str) -> bool {
        self.forward.contains_key(primary)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Hex SHA-256 of the loaded file, None when built in memory
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }
}
