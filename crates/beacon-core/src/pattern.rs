//! Structural matching of advertisement content.
//!
//! A pattern is an ordered list of sections. A sample matches when every
//! pattern section is present in the sample with the same kind, identifier
//! and byte-for-byte identical payload. Prefixes do not match.

use serde::{Deserialize, Serialize};

use crate::error::{BeaconError, Result};
use crate::types::{AdvertisementSection, ScanSample};

/// Ordered set of sections an advertisement must contain.
///
/// The empty pattern matches every sample.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdvertisementPattern {
    sections: Vec<AdvertisementSection>,
}

impl AdvertisementPattern {
    /// The pattern that matches everything.
    #[must_use]
    pub const fn any() -> Self {
        Self {
            sections: Vec::new(),
        }
    }

    /// A pattern over the given sections.
    #[must_use]
    pub fn new(sections: Vec<AdvertisementSection>) -> Self {
        Self { sections }
    }

    /// Adds a section to match.
    #[must_use]
    pub fn with_section(mut self, section: AdvertisementSection) -> Self {
        self.sections.push(section);
        self
    }

    /// Sections of this pattern.
    #[must_use]
    pub fn sections(&self) -> &[AdvertisementSection] {
        &self.sections
    }

    /// Number of sections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    /// Whether this pattern matches everything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Whether `sample` satisfies this pattern.
    #[must_use]
    pub fn matches(&self, sample: &ScanSample) -> bool {
        matches(self, sample)
    }
}

/// Returns `true` if `sample` contains every section of `pattern`.
#[must_use]
pub fn matches(pattern: &AdvertisementPattern, sample: &ScanSample) -> bool {
    pattern.sections.iter().all(|wanted| {
        sample
            .sections
            .iter()
            .any(|seen| seen.same_slot(wanted) && seen.data == wanted.data)
    })
}

/// A pattern restricted to exactly one section.
///
/// Background triggers can only match a single section, so a background
/// registration takes this type rather than checking at each call site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SingleSectionPattern(AdvertisementPattern);

impl SingleSectionPattern {
    /// Wraps `pattern`, rejecting anything but exactly one section.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::ConfigValidationError`] for zero or several sections.
    pub fn new(pattern: AdvertisementPattern) -> Result<Self> {
        match pattern.len() {
            1 => Ok(Self(pattern)),
            n => Err(BeaconError::ConfigValidationError(format!(
                "background pattern must contain exactly one section (got {n})"
            ))),
        }
    }

    /// The only section.
    #[must_use]
    pub fn section(&self) -> &AdvertisementSection {
        &self.0.sections[0]
    }

    /// The underlying pattern.
    #[must_use]
    pub const fn as_pattern(&self) -> &AdvertisementPattern {
        &self.0
    }

    /// Unwraps into the underlying pattern.
    #[must_use]
    pub fn into_pattern(self) -> AdvertisementPattern {
        self.0
    }
}
