//! Semantic version triples and the matching policy used to pick plugin files.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A `major.minor.patch` triple, ordered by major, then minor, then patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VersionTriple {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl VersionTriple {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for VersionTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for VersionTriple {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_version(s).ok_or_else(|| s.to_string())
    }
}

/// Policy applied when comparing a candidate version with a requested one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionCriteria {
    /// All three components must be equal
    Exact,
    /// The candidate must be greater than or equal to the request
    #[default]
    Minimum,
}

impl VersionCriteria {
    /// Returns whether `candidate` satisfies `requested` under this policy.
    pub fn accepts(self, requested: VersionTriple, candidate: VersionTriple) -> bool {
        match self {
            VersionCriteria::Exact => candidate == requested,
            VersionCriteria::Minimum => candidate >= requested,
        }
    }
}

impl fmt::Display for VersionCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionCriteria::Exact => f.write_str("exact"),
            VersionCriteria::Minimum => f.write_str("minimum"),
        }
    }
}

impl FromStr for VersionCriteria {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact" => Ok(VersionCriteria::Exact),
            "minimum" => Ok(VersionCriteria::Minimum),
            other => Err(format!("unknown version policy '{other}'")),
        }
    }
}

/// Extracts a version triple from a file name or version string.
///
/// The input is split on `-` and `.`. Tokens are skipped until one starts
/// with a digit; that token is the major component and the next two are
/// minor and patch. Each component is read from the token's leading digits,
/// so `plugin_foo-1-2-6.so` and `1.2.6` both yield `(1, 2, 6)`.
pub fn parse_version(text: &str) -> Option<VersionTriple> {
    let mut tokens = text
        .split(['-', '.'])
        .skip_while(|token| !starts_with_digit(token));

    let major = leading_number(tokens.next()?)?;
    let minor = leading_number(tokens.next()?)?;
    let patch = leading_number(tokens.next()?)?;

    Some(VersionTriple::new(major, minor, patch))
}

fn starts_with_digit(token: &str) -> bool {
    token.bytes().next().is_some_and(|b| b.is_ascii_digit())
}

fn leading_number(token: &str) -> Option<u32> {
    let end = token
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(token.len());
    token[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUESTED: VersionTriple = VersionTriple::new(1, 2, 6);

    #[test]
    fn test_minimum_criteria() {
        let accepted = [(1, 2, 6), (1, 2, 7), (1, 3, 0), (2, 0, 0)];
        let rejected = [(1, 2, 5), (1, 1, 9), (0, 9, 9)];

        for (major, minor, patch) in accepted {
            let candidate = VersionTriple::new(major, minor, patch);
            assert!(
                VersionCriteria::Minimum.accepts(REQUESTED, candidate),
                "{candidate} should satisfy minimum {REQUESTED}"
            );
        }
        for (major, minor, patch) in rejected {
            let candidate = VersionTriple::new(major, minor, patch);
            assert!(
                !VersionCriteria::Minimum.accepts(REQUESTED, candidate),
                "{candidate} should not satisfy minimum {REQUESTED}"
            );
        }
    }

    #[test]
    fn test_exact_criteria() {
        assert!(VersionCriteria::Exact.accepts(REQUESTED, REQUESTED));
        for candidate in [
            VersionTriple::new(1, 2, 7),
            VersionTriple::new(1, 2, 5),
            VersionTriple::new(2, 2, 6),
        ] {
            assert!(!VersionCriteria::Exact.accepts(REQUESTED, candidate));
        }
    }

    #[test]
    fn test_parse_file_name() {
        assert_eq!(parse_version("plugin_foo-1-2-6.so"), Some(REQUESTED));
        assert_eq!(parse_version("plugin_foo-1-2-6.dll"), Some(REQUESTED));
        assert_eq!(parse_version("plugin_mp3-10-0-12.dylib"), Some(VersionTriple::new(10, 0, 12)));
    }

    #[test]
    fn test_parse_display_round_trip() {
        let parsed = parse_version("plugin_foo-1-2-6.so").unwrap();
        let reparsed = parse_version(&parsed.to_string()).unwrap();
        assert_eq!(parsed, reparsed);
        assert_eq!(reparsed, REQUESTED);
    }

    #[test]
    fn test_parse_failures() {
        assert_eq!(parse_version("plugin_foo.so"), None);
        assert_eq!(parse_version("plugin_foo-1-2.so"), None);
        assert_eq!(parse_version("plugin_foo-1-x-3.so"), None);
        assert_eq!(parse_version(""), None);
    }

    #[test]
    fn test_criteria_from_str() {
        assert_eq!("exact".parse::<VersionCriteria>(), Ok(VersionCriteria::Exact));
        assert_eq!("minimum".parse::<VersionCriteria>(), Ok(VersionCriteria::Minimum));
        assert!("newest".parse::<VersionCriteria>().is_err());
        assert_eq!(VersionCriteria::default(), VersionCriteria::Minimum);
    }
}
