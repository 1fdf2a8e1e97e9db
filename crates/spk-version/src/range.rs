//! Version range atoms and filters

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{
    parse_version, Compat, CompatRule, Compatibility, Error, Result, Version, COMPATIBLE,
};

pub const VERSION_RANGE_SEP: &str = ",";

/// One end of a version interval, used for intersection checks.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Bound {
    version: Version,
    inclusive: bool,
}

impl Bound {
    fn inclusive(version: Version) -> Bound {
        Bound {
            version,
            inclusive: true,
        }
    }

    fn exclusive(version: Version) -> Bound {
        Bound {
            version,
            inclusive: false,
        }
    }
}

/// Clone the given parts and increment the last one.
fn bump_last(parts: &[u32]) -> Version {
    let mut parts = parts.to_vec();
    if let Some(last) = parts.last_mut() {
        *last += 1;
    }
    Version::from_parts(parts)
}

/// The first version above every release in the base's major series.
fn next_major(base: &Version) -> Version {
    Version::from_parts([base.major() + 1])
}

/// A version with an optional required-compat prefix.
///
/// A bare base (`1.2.3`) is the literal range `>=1.2.3,<2`: at least
/// the base, below the next major. With a prefix (`Binary:1.2.3`,
/// `API:1.2.3`) it instead accepts any version that the declared spec
/// considers compatible with the base under that requirement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompatRange {
    pub base: Version,
    pub required: Option<CompatRule>,
}

impl CompatRange {
    pub fn new(base: Version) -> CompatRange {
        CompatRange {
            base,
            required: None,
        }
    }
}

impl std::fmt::Display for CompatRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(required) = self.required {
            write!(f, "{}:", required.label())?;
        }
        self.base.fmt(f)
    }
}

/// A single atom in a version range expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VersionRange {
    Compat(CompatRange),
    Equals(Version),
    NotEquals(Version),
    LessThan(Version),
    LessThanOrEqual(Version),
    GreaterThan(Version),
    GreaterThanOrEqual(Version),
    /// `~V`: at least V, within the second-to-last specified component
    LowestSpecified(Version),
    /// `^V`: at least V, within the first non-zero component
    Semver(Version),
}

impl VersionRange {
    /// Check whether a concrete version number can satisfy this atom,
    /// evaluating prefixed compat ranges against the default contract.
    pub fn is_applicable(&self, version: &Version) -> Compatibility {
        self.check(version, &Compat::default())
    }

    /// Check a concrete version against this atom, consulting the
    /// declared compat contract for prefixed compat ranges.
    pub fn check(&self, version: &Version, compat: &Compat) -> Compatibility {
        match self {
            VersionRange::Compat(range) => match range.required {
                // a bare version is the literal range up to the next
                // major and never consults the contract
                None => {
                    let upper = next_major(&range.base);
                    if version < &range.base {
                        Compatibility::incompatible(format!(
                            "{version} is below {}",
                            range.base
                        ))
                    } else if version.base() >= upper {
                        Compatibility::incompatible(format!(
                            "{version} is at or above {upper} [{}]",
                            range.base
                        ))
                    } else {
                        COMPATIBLE
                    }
                }
                Some(required) => {
                    if version.base() == range.base.base() {
                        return COMPATIBLE;
                    }
                    compat.check(&range.base, version, required)
                }
            },
            VersionRange::Equals(base) => {
                if version == base {
                    COMPATIBLE
                } else {
                    Compatibility::incompatible(format!("{version} != {base}"))
                }
            }
            VersionRange::NotEquals(base) => {
                if version == base {
                    Compatibility::incompatible(format!("excluded version: {base}"))
                } else {
                    COMPATIBLE
                }
            }
            VersionRange::LessThan(base) => {
                if version < base {
                    COMPATIBLE
                } else {
                    Compatibility::incompatible(format!("{version} is not < {base}"))
                }
            }
            VersionRange::LessThanOrEqual(base) => {
                if version <= base {
                    COMPATIBLE
                } else {
                    Compatibility::incompatible(format!("{version} is not <= {base}"))
                }
            }
            VersionRange::GreaterThan(base) => {
                if version > base {
                    COMPATIBLE
                } else {
                    Compatibility::incompatible(format!("{version} is not > {base}"))
                }
            }
            VersionRange::GreaterThanOrEqual(base) => {
                if version >= base {
                    COMPATIBLE
                } else {
                    Compatibility::incompatible(format!("{version} is not >= {base}"))
                }
            }
            VersionRange::LowestSpecified(base) => {
                let upper = bump_last(&base.parts[..base.parts.len() - 1]);
                if version < base {
                    Compatibility::incompatible(format!("{version} is below ~{base}"))
                } else if version.base() >= upper {
                    Compatibility::incompatible(format!("{version} is at or above {upper} [~{base}]"))
                } else {
                    COMPATIBLE
                }
            }
            VersionRange::Semver(base) => {
                let upper = self.upper_bound().expect("semver ranges have an upper bound");
                if version < base {
                    Compatibility::incompatible(format!("{version} is below ^{base}"))
                } else if version.base() >= upper.version {
                    Compatibility::incompatible(format!(
                        "{version} is at or above {} [^{base}]",
                        upper.version
                    ))
                } else {
                    COMPATIBLE
                }
            }
        }
    }

    fn lower_bound(&self) -> Option<Bound> {
        match self {
            VersionRange::Compat(range) => Some(Bound::inclusive(range.base.clone())),
            VersionRange::Equals(base) => Some(Bound::inclusive(base.clone())),
            VersionRange::NotEquals(_) => None,
            VersionRange::LessThan(_) | VersionRange::LessThanOrEqual(_) => None,
            VersionRange::GreaterThan(base) => Some(Bound::exclusive(base.clone())),
            VersionRange::GreaterThanOrEqual(base) => Some(Bound::inclusive(base.clone())),
            VersionRange::LowestSpecified(base) => Some(Bound::inclusive(base.clone())),
            VersionRange::Semver(base) => Some(Bound::inclusive(base.clone())),
        }
    }

    fn upper_bound(&self) -> Option<Bound> {
        match self {
            // exact for bare versions; for prefixed ranges the next
            // major only approximates the declared contract, which is
            // enough to detect empty intersections when merging
            VersionRange::Compat(range) => Some(Bound::exclusive(next_major(&range.base))),
            VersionRange::Equals(base) => Some(Bound::inclusive(base.clone())),
            VersionRange::NotEquals(_) => None,
            VersionRange::LessThan(base) => Some(Bound::exclusive(base.clone())),
            VersionRange::LessThanOrEqual(base) => Some(Bound::inclusive(base.clone())),
            VersionRange::GreaterThan(_) | VersionRange::GreaterThanOrEqual(_) => None,
            VersionRange::LowestSpecified(base) => {
                Some(Bound::exclusive(bump_last(&base.parts[..base.parts.len() - 1])))
            }
            VersionRange::Semver(base) => {
                let position = base
                    .parts
                    .iter()
                    .position(|p| *p != 0)
                    .unwrap_or(base.parts.len().saturating_sub(1));
                Some(Bound::exclusive(bump_last(&base.parts[..=position])))
            }
        }
    }

    /// True if the two atoms can be satisfied by at least one common
    /// version number. This is a bound overlap check, so it can
    /// report a sliver of overlap where none exists, but it never
    /// reports emptiness for a satisfiable pair.
    fn intersects(&self, other: &VersionRange) -> bool {
        if let (VersionRange::Equals(a), VersionRange::NotEquals(b)) = (self, other) {
            return a != b;
        }
        if let (VersionRange::NotEquals(a), VersionRange::Equals(b)) = (self, other) {
            return a != b;
        }

        let lower = match (self.lower_bound(), other.lower_bound()) {
            (Some(a), Some(b)) => Some(if a.version >= b.version { a } else { b }),
            (a, b) => a.or(b),
        };
        let upper = match (self.upper_bound(), other.upper_bound()) {
            (Some(a), Some(b)) => Some(if a.version <= b.version { a } else { b }),
            (a, b) => a.or(b),
        };
        match (lower, upper) {
            (Some(lower), Some(upper)) => {
                if lower.version == upper.version {
                    lower.inclusive && upper.inclusive
                } else {
                    lower.version < upper.version
                }
            }
            _ => true,
        }
    }
}

impl std::fmt::Display for VersionRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VersionRange::Compat(range) => range.fmt(f),
            VersionRange::Equals(base) => write!(f, "={base}"),
            VersionRange::NotEquals(base) => write!(f, "!={base}"),
            VersionRange::LessThan(base) => write!(f, "<{base}"),
            VersionRange::LessThanOrEqual(base) => write!(f, "<={base}"),
            VersionRange::GreaterThan(base) => write!(f, ">{base}"),
            VersionRange::GreaterThanOrEqual(base) => write!(f, ">={base}"),
            VersionRange::LowestSpecified(base) => write!(f, "~{base}"),
            VersionRange::Semver(base) => write!(f, "^{base}"),
        }
    }
}

fn parse_range_atom(source: &str) -> Result<VersionRange> {
    let invalid = |reason: String| Error::InvalidRange {
        given: source.to_string(),
        reason,
    };
    let version = |rest: &str| parse_version(rest).map_err(|err| invalid(err.to_string()));

    if let Some(rest) = source.strip_prefix(">=") {
        return Ok(VersionRange::GreaterThanOrEqual(version(rest)?));
    }
    if let Some(rest) = source.strip_prefix("<=") {
        return Ok(VersionRange::LessThanOrEqual(version(rest)?));
    }
    if let Some(rest) = source.strip_prefix("!=") {
        return Ok(VersionRange::NotEquals(version(rest)?));
    }
    if let Some(rest) = source.strip_prefix('>') {
        return Ok(VersionRange::GreaterThan(version(rest)?));
    }
    if let Some(rest) = source.strip_prefix('<') {
        return Ok(VersionRange::LessThan(version(rest)?));
    }
    if let Some(rest) = source.strip_prefix('=') {
        return Ok(VersionRange::Equals(version(rest)?));
    }
    if let Some(rest) = source.strip_prefix('^') {
        let base = version(rest)?;
        if base.parts.is_empty() {
            return Err(invalid("^ requires a version number".to_string()));
        }
        return Ok(VersionRange::Semver(base));
    }
    if let Some(rest) = source.strip_prefix('~') {
        let base = version(rest)?;
        if base.parts.len() < 2 {
            return Err(invalid(
                "~ requires at least two version components".to_string(),
            ));
        }
        return Ok(VersionRange::LowestSpecified(base));
    }
    for (label, required) in [("API:", CompatRule::API), ("Binary:", CompatRule::Binary)] {
        if let Some(rest) = source.strip_prefix(label) {
            return Ok(VersionRange::Compat(CompatRange {
                base: version(rest)?,
                required: Some(required),
            }));
        }
    }

    let base = version(source)?;
    if base.parts.is_empty() {
        return Err(invalid("empty version range atom".to_string()));
    }
    Ok(VersionRange::Compat(CompatRange::new(base)))
}

/// A conjunction of range atoms: a version must satisfy every atom.
///
/// The empty filter places no restriction on the version at all.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VersionFilter {
    pub rules: BTreeSet<VersionRange>,
}

impl VersionFilter {
    pub fn single(atom: VersionRange) -> VersionFilter {
        let mut rules = BTreeSet::new();
        rules.insert(atom);
        VersionFilter { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Check whether the given version number could satisfy this
    /// filter, without reference to any declared compat contract.
    pub fn is_applicable(&self, version: &Version) -> Compatibility {
        for rule in &self.rules {
            let compat = rule.is_applicable(version);
            if !compat.is_ok() {
                return compat;
            }
        }
        COMPATIBLE
    }

    /// Alias of [`VersionFilter::is_applicable`]: range membership.
    pub fn contains(&self, version: &Version) -> Compatibility {
        self.is_applicable(version)
    }

    /// Check a version against this filter using the compat contract
    /// declared by its package spec.
    pub fn is_satisfied_by(&self, version: &Version, compat: &Compat) -> Compatibility {
        for rule in &self.rules {
            let result = rule.check(version, compat);
            if !result.is_ok() {
                return result;
            }
        }
        COMPATIBLE
    }

    /// Reduce this filter to the intersection with another.
    ///
    /// Fails when the two filters cannot be satisfied together.
    pub fn restrict(&mut self, other: &VersionFilter) -> Result<()> {
        for a in &self.rules {
            for b in &other.rules {
                if !a.intersects(b) {
                    return Err(Error::EmptyIntersection {
                        first: a.to_string(),
                        second: b.to_string(),
                    });
                }
            }
        }
        self.rules.extend(other.rules.iter().cloned());
        Ok(())
    }
}

/// Parse a comma-separated conjunction of range atoms.
pub fn parse_version_range(source: impl AsRef<str>) -> Result<VersionFilter> {
    let source = source.as_ref();
    let mut rules = BTreeSet::new();
    if source.is_empty() {
        return Ok(VersionFilter::default());
    }
    for atom in source.split(VERSION_RANGE_SEP) {
        rules.insert(parse_range_atom(atom)?);
    }
    Ok(VersionFilter { rules })
}

impl std::fmt::Display for VersionFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rendered = self
            .rules
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(VERSION_RANGE_SEP);
        f.write_str(&rendered)
    }
}

impl std::str::FromStr for VersionFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<VersionFilter> {
        parse_version_range(s)
    }
}

impl Serialize for VersionFilter {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for VersionFilter {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<VersionFilter, D::Error> {
        let source = String::deserialize(deserializer)?;
        parse_version_range(source).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(v: &str) -> Version {
        parse_version(v).unwrap()
    }

    fn range(r: &str) -> VersionFilter {
        parse_version_range(r).unwrap()
    }

    #[test]
    fn test_parse_and_render() {
        for case in [
            "=1.0.0",
            "!=1.0.0",
            "<1.0",
            "<=1.0",
            ">1.0",
            ">=1.0",
            "~1.2.3",
            "^1.2.3",
            "1.2.3",
            "API:1.2.3",
            "Binary:1.2.3",
        ] {
            assert_eq!(range(case).to_string(), case);
        }
        // conjunctions render sorted and deduplicated
        let filter = range(">=1.0,<2.0");
        assert_eq!(filter.rules.len(), 2);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_version_range("~1").is_err(), "~ needs two components");
        assert!(parse_version_range("^").is_err());
        assert!(parse_version_range(">=1.a").is_err());
        assert!(parse_version_range("1.0,,").is_err());
    }

    #[test]
    fn test_exact_and_exclusion() {
        let filter = range("=1.0.0");
        assert!(filter.is_applicable(&version("1.0.0")).is_ok());
        assert!(filter.is_applicable(&version("1.0")).is_ok());
        assert!(!filter.is_applicable(&version("1.0.1")).is_ok());
        assert!(!filter.is_applicable(&version("1.0.0-alpha.1")).is_ok());

        let filter = range("!=1.1");
        assert!(filter.is_applicable(&version("1.0")).is_ok());
        assert!(!filter.is_applicable(&version("1.1.0")).is_ok());
    }

    #[test]
    fn test_comparison_atoms() {
        let filter = range(">=1.2,<1.4");
        assert!(!filter.is_applicable(&version("1.1.9")).is_ok());
        assert!(filter.is_applicable(&version("1.2")).is_ok());
        assert!(filter.is_applicable(&version("1.3.5")).is_ok());
        assert!(!filter.is_applicable(&version("1.4.0")).is_ok());
    }

    #[test]
    fn test_lowest_specified() {
        let filter = range("~1.2.3");
        assert!(!filter.is_applicable(&version("1.2.2")).is_ok());
        assert!(filter.is_applicable(&version("1.2.3")).is_ok());
        assert!(filter.is_applicable(&version("1.2.9")).is_ok());
        assert!(!filter.is_applicable(&version("1.3.0")).is_ok());

        let filter = range("~2020.0");
        assert!(filter.is_applicable(&version("2020.9")).is_ok());
        assert!(!filter.is_applicable(&version("2021.0")).is_ok());
    }

    #[test]
    fn test_semver() {
        let filter = range("^1.2.3");
        assert!(!filter.is_applicable(&version("1.2.2")).is_ok());
        assert!(filter.is_applicable(&version("1.9.0")).is_ok());
        assert!(!filter.is_applicable(&version("2.0.0")).is_ok());

        // a zero major pins the first non-zero component instead
        let filter = range("^0.1.2");
        assert!(filter.is_applicable(&version("0.1.9")).is_ok());
        assert!(!filter.is_applicable(&version("0.2.0")).is_ok());
    }

    #[test]
    fn test_bare_atom_spans_to_next_major() {
        let filter = range("1.0");
        assert!(filter.is_applicable(&version("1.0.0")).is_ok());
        assert!(filter.is_applicable(&version("1.2.3")).is_ok());
        assert!(filter.is_applicable(&version("1.999.0")).is_ok());
        assert!(!filter.is_applicable(&version("2.0.0")).is_ok());
        assert!(!filter.is_applicable(&version("0.9")).is_ok());
    }

    #[test]
    fn test_bare_atom_never_consults_contract() {
        // even a fully locked-down contract cannot shrink the
        // literal range
        let compat = crate::parse_compat("x.x.x").unwrap();
        let filter = range("1.0.0");
        assert!(filter.is_satisfied_by(&version("1.4.0"), &compat).is_ok());
        assert!(!filter.is_satisfied_by(&version("2.0.0"), &compat).is_ok());
    }

    #[test]
    fn test_prefixed_atom_declared_contract() {
        // a spec declaring no binary compatibility across minors
        let compat = crate::parse_compat("x.x.b").unwrap();
        let filter = range("Binary:1.0.0");
        assert!(!filter.is_satisfied_by(&version("1.1.0"), &compat).is_ok());
        assert!(filter.is_satisfied_by(&version("1.0.5"), &compat).is_ok());

        // an API requirement consults the api letter instead
        let compat = crate::parse_compat("x.a.b").unwrap();
        let filter = range("API:1.0.0");
        assert!(filter.is_satisfied_by(&version("1.1.0"), &compat).is_ok());
    }

    #[test]
    fn test_prefixed_atom_default_contract() {
        // without a spec in hand, prefixed ranges fall back to x.a.b:
        // a minor bump preserves api but not binary compatibility
        let filter = range("Binary:1.0.0");
        assert!(!filter.is_applicable(&version("1.1.0")).is_ok());
        assert!(filter.is_applicable(&version("1.0.4")).is_ok());

        let filter = range("API:1.0.0");
        assert!(filter.is_applicable(&version("1.1.0")).is_ok());
    }

    #[test]
    fn test_restrict_compatible() {
        let mut filter = range(">=1.0");
        filter.restrict(&range("<2.0")).unwrap();
        assert_eq!(filter.to_string(), "<2.0,>=1.0");
        assert!(filter.is_applicable(&version("1.5")).is_ok());
    }

    #[test]
    fn test_restrict_empty_intersection() {
        let mut filter = range("1.0");
        assert!(filter.restrict(&range("2.0")).is_err());

        let mut filter = range("=1.1");
        assert!(filter.restrict(&range("=1.2")).is_err());

        let mut filter = range("~1.2.0");
        assert!(filter.restrict(&range(">=1.3")).is_err());

        let mut filter = range("=1.0");
        assert!(filter.restrict(&range("!=1.0")).is_err());
    }

    #[test]
    fn test_empty_filter_matches_all() {
        let filter = VersionFilter::default();
        assert!(filter.is_applicable(&version("0.0.1")).is_ok());
        assert!(filter.is_applicable(&version("999.9")).is_ok());
    }
}
