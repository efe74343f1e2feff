//! # Semver
//!
//! Extraction of `major.minor.release` from agent and image version strings.
//!
//! Versions coming from the tenant carry a fourth build-timestamp component
//! (`1.201.0.20240101-120000`); only the leading triple takes part in
//! comparisons.

use regex::Regex;
use std::cmp::Ordering;
use std::sync::LazyLock;
use thiserror::Error;

static SEMVER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)\.(\d+)\.(\d+)")
        .expect("Failed to compile semver regex - this should never happen")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SemverError {
    #[error("version '{0}' does not start with major.minor.release")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Semver {
    pub major: u64,
    pub minor: u64,
    pub release: u64,
}

impl std::fmt::Display for Semver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.release)
    }
}

/// Parse the leading `major.minor.release` of `version`
pub fn extract_semver(version: &str) -> Result<Semver, SemverError> {
    let malformed = || SemverError::Malformed(version.to_string());
    let captures = SEMVER_PATTERN.captures(version.trim()).ok_or_else(malformed)?;
    let part = |idx: usize| -> Result<u64, SemverError> {
        captures
            .get(idx)
            .and_then(|m| m.as_str().parse().ok())
            .ok_or_else(malformed)
    };
    Ok(Semver {
        major: part(1)?,
        minor: part(2)?,
        release: part(3)?,
    })
}

/// Compare two version strings
///
/// Malformed inputs compare as `0.0.0`; the first parse error is reported
/// alongside the ordering.
pub fn compare_semver(a: &str, b: &str) -> (Ordering, Option<SemverError>) {
    let mut error = None;
    let mut parse = |v: &str| {
        extract_semver(v).unwrap_or_else(|e| {
            error.get_or_insert(e);
            Semver::default()
        })
    };
    let left = parse(a);
    let right = parse(b);
    (left.cmp(&right), error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_semver() {
        assert_eq!(
            extract_semver("1.201.0.20240101-120000").unwrap(),
            Semver {
                major: 1,
                minor: 201,
                release: 0
            }
        );
        assert_eq!(extract_semver("2.3.4").unwrap().to_string(), "2.3.4");
        assert!(extract_semver("v1.2.3").is_err());
        assert!(extract_semver("1.2").is_err());
        assert!(extract_semver("").is_err());
    }

    #[test]
    fn test_compare_is_numeric_not_lexicographic() {
        assert_eq!(compare_semver("1.200.0", "1.201.0").0, Ordering::Less);
        assert_eq!(compare_semver("1.10.0", "1.9.9").0, Ordering::Greater);
        assert_eq!(compare_semver("1.2.3", "1.2.3.999").0, Ordering::Equal);
    }

    #[test]
    fn test_compare_malformed_as_zero() {
        let (ord, err) = compare_semver("garbage", "0.0.1");
        assert_eq!(ord, Ordering::Less);
        assert_eq!(err, Some(SemverError::Malformed("garbage".to_string())));

        let (ord, err) = compare_semver("garbage", "0.0.0");
        assert_eq!(ord, Ordering::Equal);
        assert!(err.is_some());

        let (_, err) = compare_semver("1.0.0", "2.0.0");
        assert!(err.is_none());
    }
}
