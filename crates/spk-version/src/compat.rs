//! Compatibility contracts between versions of the same package

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Error, Result, Version, VERSION_SEP};

pub const API_STR: char = 'a';
pub const BINARY_STR: char = 'b';
pub const NONE_STR: char = 'x';

/// The compatibility that a range or request can demand of a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CompatRule {
    API,
    Binary,
}

impl CompatRule {
    pub fn letter(&self) -> char {
        match self {
            CompatRule::API => API_STR,
            CompatRule::Binary => BINARY_STR,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CompatRule::API => "API",
            CompatRule::Binary => "Binary",
        }
    }
}

/// The result of a compatibility check, carrying the reason when the
/// check fails. Reasons end up verbatim in solver notes, so they are
/// written for humans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compatibility {
    Compatible,
    Incompatible(String),
}

pub const COMPATIBLE: Compatibility = Compatibility::Compatible;

impl Compatibility {
    pub fn incompatible(reason: impl Into<String>) -> Compatibility {
        Compatibility::Incompatible(reason.into())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Compatibility::Compatible)
    }

    /// The failure reason, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            Compatibility::Compatible => None,
            Compatibility::Incompatible(reason) => Some(reason),
        }
    }
}

impl std::fmt::Display for Compatibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Compatibility::Compatible => f.write_str("compatible"),
            Compatibility::Incompatible(reason) => f.write_str(reason),
        }
    }
}

/// The capability letters declared for one version position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompatRuleSet(BTreeSet<char>);

impl CompatRuleSet {
    fn parse(source: &str) -> Result<CompatRuleSet> {
        if source.is_empty() {
            return Err(Error::InvalidCompat {
                given: source.to_string(),
                reason: "empty compat position".to_string(),
            });
        }
        let mut letters = BTreeSet::new();
        for letter in source.chars() {
            if !letter.is_ascii_lowercase() {
                return Err(Error::InvalidCompat {
                    given: source.to_string(),
                    reason: format!("\"{letter}\" is not a lowercase capability letter"),
                });
            }
            letters.insert(letter);
        }
        Ok(CompatRuleSet(letters))
    }

    fn allows(&self, required: CompatRule) -> bool {
        self.0.contains(&required.letter())
    }
}

impl std::fmt::Display for CompatRuleSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for letter in &self.0 {
            write!(f, "{letter}")?;
        }
        Ok(())
    }
}

/// A per-position compatibility contract, eg `x.a.b`.
///
/// Each position aligns with a version component and declares what a
/// change at that position preserves: `x` nothing, `a` API
/// compatibility, `b` binary compatibility. Other letters are
/// user-declared capabilities with no built-in semantics.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Compat {
    parts: Vec<CompatRuleSet>,
}

impl Default for Compat {
    fn default() -> Self {
        // x.a.b unless the spec declares otherwise
        parse_compat("x.a.b").expect("default compat must parse")
    }
}

impl Compat {
    pub fn is_default(&self) -> bool {
        self == &Compat::default()
    }

    /// Check if the given version is api compatible with the base.
    pub fn is_api_compatible(&self, base: &Version, other: &Version) -> Compatibility {
        self.check(base, other, CompatRule::API)
    }

    /// Check if the given version is binary compatible with the base.
    pub fn is_binary_compatible(&self, base: &Version, other: &Version) -> Compatibility {
        self.check(base, other, CompatRule::Binary)
    }

    /// Walk the version components and decide compatibility at the
    /// first position where they differ.
    pub fn check(&self, base: &Version, other: &Version, required: CompatRule) -> Compatibility {
        let count = base.parts.len().max(other.parts.len());
        for position in 0..count {
            let declared = base.part(position);
            let actual = other.part(position);
            if actual == declared {
                continue;
            }
            let ruleset = match self.parts.get(position) {
                // changes past the declared contract are unconstrained
                None => return COMPATIBLE,
                Some(ruleset) => ruleset,
            };
            if !ruleset.allows(required) {
                return Compatibility::incompatible(format!(
                    "{other} is not {} compatible with {base} [{self} at pos {}]",
                    required.label(),
                    position + 1,
                ));
            }
            if actual < declared {
                return Compatibility::incompatible(format!(
                    "{other} is older than {base} and cannot be {} compatible with it",
                    required.label(),
                ));
            }
            return COMPATIBLE;
        }
        COMPATIBLE
    }
}

/// Parse a compat contract like `x.a.b` from a string.
pub fn parse_compat(source: impl AsRef<str>) -> Result<Compat> {
    let source = source.as_ref();
    let mut parts = Vec::with_capacity(3);
    for part in source.split(VERSION_SEP) {
        parts.push(CompatRuleSet::parse(part).map_err(|_| Error::InvalidCompat {
            given: source.to_string(),
            reason: "positions must be non-empty sets of lowercase letters".to_string(),
        })?);
    }
    Ok(Compat { parts })
}

impl std::fmt::Display for Compat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rendered = self
            .parts
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(VERSION_SEP);
        f.write_str(&rendered)
    }
}

impl std::str::FromStr for Compat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Compat> {
        parse_compat(s)
    }
}

impl Serialize for Compat {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Compat {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Compat, D::Error> {
        let source = String::deserialize(deserializer)?;
        parse_compat(source).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_version;

    fn version(v: &str) -> Version {
        parse_version(v).unwrap()
    }

    #[test]
    fn test_parse_and_render() {
        for case in ["x.a.b", "x.ab", "x.x.x.c"] {
            let compat = parse_compat(case).unwrap();
            assert_eq!(compat.to_string(), case);
        }
        assert!(parse_compat("x..b").is_err());
        assert!(parse_compat("x.A.b").is_err());
    }

    #[test]
    fn test_default_contract() {
        let compat = Compat::default();
        assert_eq!(compat.to_string(), "x.a.b");

        // major change breaks everything
        assert!(!compat
            .is_binary_compatible(&version("1.0.0"), &version("2.0.0"))
            .is_ok());
        // minor change preserves api, not binary
        assert!(compat
            .is_api_compatible(&version("1.0.0"), &version("1.1.0"))
            .is_ok());
        assert!(!compat
            .is_binary_compatible(&version("1.0.0"), &version("1.1.0"))
            .is_ok());
        // patch change preserves binary
        assert!(compat
            .is_binary_compatible(&version("1.0.0"), &version("1.0.4"))
            .is_ok());
    }

    #[test]
    fn test_older_versions_never_compatible() {
        let compat = Compat::default();
        assert!(!compat
            .is_binary_compatible(&version("1.0.4"), &version("1.0.1"))
            .is_ok());
    }

    #[test]
    fn test_combined_letters() {
        let compat = parse_compat("x.ab").unwrap();
        assert!(compat
            .is_binary_compatible(&version("1.0"), &version("1.4"))
            .is_ok());
        assert!(compat
            .is_api_compatible(&version("1.0"), &version("1.4"))
            .is_ok());
    }

    #[test]
    fn test_changes_past_contract_are_free() {
        let compat = Compat::default();
        assert!(compat
            .is_binary_compatible(&version("1.0.0.1"), &version("1.0.0.2"))
            .is_ok());
    }

    #[test]
    fn test_equal_versions_are_compatible() {
        let compat = parse_compat("x.x.x").unwrap();
        assert!(compat
            .is_binary_compatible(&version("1.2.3"), &version("1.2.3"))
            .is_ok());
    }
}
