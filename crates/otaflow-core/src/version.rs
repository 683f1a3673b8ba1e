//! Dotted numeric version comparison
//!
//! Device builds and update configs carry plain dotted versions such as
//! `1.5.0` or `2.10`. They are compared component-wise as integers, so
//! `1.2.0 < 1.10.0`, and a missing trailing component counts as `0`.

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A parsed dotted version (`major.minor.patch...`, any number of components)
#[derive(Debug, Clone)]
pub struct DottedVersion {
    components: Vec<u32>,
}

impl DottedVersion {
    /// Parse a dotted version string
    ///
    /// Surrounding whitespace is ignored. Every component must be a
    /// non-empty run of ASCII digits.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let components = trimmed
            .split('.')
            .map(|part| {
                if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(Error::invalid_version(input));
                }
                part.parse::<u32>().map_err(|_| Error::invalid_version(input))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { components })
    }

    pub fn components(&self) -> &[u32] {
        &self.components
    }

    /// Compare against another version.
    ///
    /// Returns the numeric difference of the first differing component
    /// (`self - other`), or `0` when the versions are equal. The magnitude
    /// is meaningful to the fallback policy, so this is deliberately not an
    /// [`Ordering`].
    pub fn compare(&self, other: &Self) -> i64 {
        let len = self.components.len().max(other.components.len());
        for idx in 0..len {
            let a = self.components.get(idx).copied().unwrap_or(0);
            let b = other.components.get(idx).copied().unwrap_or(0);
            if a != b {
                return i64::from(a) - i64::from(b);
            }
        }
        0
    }
}

impl FromStr for DottedVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for DottedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.components.iter().map(u32::to_string).collect();
        write!(f, "{}", parts.join("."))
    }
}

impl PartialEq for DottedVersion {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == 0
    }
}

impl Eq for DottedVersion {}

impl PartialOrd for DottedVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DottedVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other).cmp(&0)
    }
}

/// Compare two version strings, see [`DottedVersion::compare`]
pub fn compare_versions(a: &str, b: &str) -> Result<i64> {
    Ok(DottedVersion::parse(a)?.compare(&DottedVersion::parse(b)?))
}
