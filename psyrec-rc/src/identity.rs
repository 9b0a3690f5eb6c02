//! Subject code classification
//!
//! A raw user code looks like `110001234567FU1-C2`: a primary code, an
//! optional follow-up suffix and an optional context tag after the last
//! `-`. Codes carrying a test marker anywhere are excluded before any
//! parsing, so they never show up in diagnostics.

use crate::config::IdentitySettings;
use crate::crosswalk::Crosswalk;
use crate::types::{CanonicalId, ContextTag, PrimaryCode, SubjectIdentity, Timepoint};
use std::sync::Arc;

/// Longest raw code sample quoted in diagnostics
const SAMPLE_LIMIT: usize = 30;

/// Classifies raw subject codes against the crosswalk
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    crosswalk: Arc<Crosswalk>,
    settings: IdentitySettings,
    test_markers: Vec<String>,
    /// Longest suffix first, so `FUMRI1` is tried before shorter overlaps
    follow_up_suffixes: Vec<(String, Timepoint)>,
}

impl IdentityResolver {
    pub fn new(crosswalk: Arc<Crosswalk>, settings: IdentitySettings) -> Self {
        let test_markers = settings
            .test_markers
            .iter()
            .map(|m| m.to_uppercase())
            .filter(|m| !m.is_empty())
            .collect();

        let mut follow_up_suffixes: Vec<(String, Timepoint)> = settings
            .follow_up_suffixes
            .iter()
            .map(|(suffix, timepoint)| (suffix.to_uppercase(), *timepoint))
            .collect();
        follow_up_suffixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

        Self {
            crosswalk,
            settings,
            test_markers,
            follow_up_suffixes,
        }
    }

    /// Classify one raw user code
    pub fn resolve(&self, raw: &str) -> SubjectIdentity {
        let code = raw.trim();
        let upper = code.to_uppercase();

        if self.test_markers.iter().any(|m| upper.contains(m.as_str())) {
            return SubjectIdentity::Excluded;
        }

        let (head, context) = match code.rsplit_once('-') {
            Some((head, tag)) => match self.context_tag(tag) {
                Some(context) => (head, Some(context)),
                None => {
                    return SubjectIdentity::Unresolved {
                        reason: format!("unknown context tag in subject code {}", sample(code)),
                    }
                }
            },
            None => (code, None),
        };

        let (digits, timepoint) = self.split_timepoint(head);

        if digits.len() != self.settings.code_digits || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return SubjectIdentity::Unresolved {
                reason: format!("ill-formed subject code {}", sample(code)),
            };
        }

        if !self.crosswalk.contains_primary(digits) {
            return SubjectIdentity::Unresolved {
                reason: format!("subject code {} missing from crosswalk", sample(code)),
            };
        }

        SubjectIdentity::Canonical {
            id: CanonicalId {
                primary: PrimaryCode::new(digits),
                timepoint,
            },
            context,
        }
    }

    fn context_tag(&self, tag: &str) -> Option<ContextTag> {
        let tag = tag.trim();
        self.settings
            .context_tags
            .iter()
            .find(|known| known.eq_ignore_ascii_case(tag))
            .map(|known| ContextTag::new(known.as_str()))
    }

    fn split_timepoint<'a>(&self, head: &'a str) -> (&'a str, Timepoint) {
        let upper = head.to_ascii_uppercase();
        for (suffix, timepoint) in &self.follow_up_suffixes {
            if upper.ends_with(suffix.as_str()) && head.len() >= suffix.len() {
                return (&head[..head.len() - suffix.len()], *timepoint);
            }
        }
        (head, Timepoint::Baseline)
    }
}

/// Quote a raw value for diagnostics, truncated
pub fn sample(raw: &str) -> String {
    if raw.chars().count() > SAMPLE_LIMIT {
        let head: String = raw.chars().take(SAMPLE_LIMIT).collect();
        format!("'{}...'", head)
    } else {
        format!("'{}'", raw)
    }
}
