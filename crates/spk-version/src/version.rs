//! Version numbers with arbitrary arity and pre/post release tags

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::Write;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Error, Result};

pub const VERSION_SEP: &str = ".";

/// A set of release tags, sorted by tag name.
///
/// Tags are name/number pairs like `alpha.1` or `r.2`. A version
/// carries at most one tag set before the release (`-`) and one
/// after (`+`).
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagSet {
    tags: BTreeMap<String, u32>,
}

impl TagSet {
    pub fn single(name: impl Into<String>, value: u32) -> TagSet {
        let mut tags = BTreeMap::new();
        tags.insert(name.into(), value);
        TagSet { tags }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &u32)> {
        self.tags.iter()
    }

    /// Parse a comma-separated list of `name.number` pairs.
    pub fn parse(source: &str) -> Result<TagSet> {
        let mut tags = BTreeMap::new();
        for part in source.split(',') {
            let (name, num) = match part.rsplit_once('.') {
                Some((name, num)) => {
                    let num = num.parse::<u32>().map_err(|_| Error::InvalidTag {
                        given: part.to_string(),
                        reason: "tag must end with an unsigned integer".to_string(),
                    })?;
                    (name, num)
                }
                None => (part, 0),
            };
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(Error::InvalidTag {
                    given: part.to_string(),
                    reason: "tag name must be alphanumeric".to_string(),
                });
            }
            if name.chars().all(|c| c.is_ascii_digit()) {
                return Err(Error::InvalidTag {
                    given: part.to_string(),
                    reason: "tag name cannot be all digits".to_string(),
                });
            }
            if tags.insert(name.to_string(), num).is_some() {
                return Err(Error::InvalidTag {
                    given: part.to_string(),
                    reason: "duplicate tag name".to_string(),
                });
            }
        }
        Ok(TagSet { tags })
    }
}

impl std::fmt::Display for TagSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rendered = self
            .tags
            .iter()
            .map(|(name, num)| format!("{name}.{num}"))
            .collect::<Vec<_>>()
            .join(",");
        f.write_str(&rendered)
    }
}

/// A package version number.
///
/// Versions are dot-separated unsigned integers of any arity,
/// optionally followed by a pre-release tag set (`-alpha.1`) and/or a
/// post-release tag set (`+r.2`). Missing positions compare as zero,
/// so `1.0` and `1.0.0` are equal.
#[derive(Debug, Default, Clone)]
pub struct Version {
    pub parts: Vec<u32>,
    pub pre: TagSet,
    pub post: TagSet,
}

impl Version {
    pub fn new(major: u32, minor: u32, patch: u32) -> Version {
        Version {
            parts: vec![major, minor, patch],
            ..Default::default()
        }
    }

    pub fn from_parts(parts: impl IntoIterator<Item = u32>) -> Version {
        Version {
            parts: parts.into_iter().collect(),
            ..Default::default()
        }
    }

    /// The value at the given position, or zero when not specified.
    pub fn part(&self, position: usize) -> u32 {
        self.parts.get(position).copied().unwrap_or_default()
    }

    pub fn major(&self) -> u32 {
        self.part(0)
    }

    pub fn minor(&self) -> u32 {
        self.part(1)
    }

    pub fn patch(&self) -> u32 {
        self.part(2)
    }

    /// True if no version number was specified at all.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty() && self.pre.is_empty() && self.post.is_empty()
    }

    pub fn is_pre_release(&self) -> bool {
        !self.pre.is_empty()
    }

    /// The version number without any pre or post release tags.
    pub fn base(&self) -> Version {
        Version {
            parts: self.parts.clone(),
            ..Default::default()
        }
    }

    /// Parts with trailing zeros removed, the canonical identity of
    /// this version number.
    fn normalized_parts(&self) -> &[u32] {
        let mut end = self.parts.len();
        while end > 0 && self.parts[end - 1] == 0 {
            end -= 1;
        }
        &self.parts[..end]
    }
}

/// Parse a version number from the canonical string form.
pub fn parse_version(source: impl AsRef<str>) -> Result<Version> {
    let source = source.as_ref();
    if source.is_empty() {
        return Ok(Version::default());
    }

    let (base, post) = match source.split_once('+') {
        Some((_, post)) if post.is_empty() => {
            return Err(Error::InvalidVersion {
                given: source.to_string(),
                reason: "empty post-release tag after '+'".to_string(),
            })
        }
        Some((base, post)) => (base, Some(post)),
        None => (source, None),
    };
    let (digits, pre) = match base.split_once('-') {
        Some((_, pre)) if pre.is_empty() => {
            return Err(Error::InvalidVersion {
                given: source.to_string(),
                reason: "empty pre-release tag after '-'".to_string(),
            })
        }
        Some((digits, pre)) => (digits, Some(pre)),
        None => (base, None),
    };

    let mut parts = Vec::with_capacity(3);
    for digit in digits.split(VERSION_SEP) {
        let value = digit.parse::<u32>().map_err(|_| Error::InvalidVersion {
            given: source.to_string(),
            reason: format!("\"{digit}\" is not an unsigned integer"),
        })?;
        parts.push(value);
    }

    let mut version = Version {
        parts,
        ..Default::default()
    };
    if let Some(pre) = pre {
        version.pre = TagSet::parse(pre)?;
    }
    if let Some(post) = post {
        version.post = TagSet::parse(post)?;
    }
    Ok(version)
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rendered = self
            .parts
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(VERSION_SEP);
        f.write_str(&rendered)?;
        if !self.pre.is_empty() {
            f.write_char('-')?;
            self.pre.fmt(f)?;
        }
        if !self.post.is_empty() {
            f.write_char('+')?;
            self.post.fmt(f)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Version> {
        parse_version(s)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl std::hash::Hash for Version {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.normalized_parts().hash(state);
        self.pre.hash(state);
        self.post.hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let count = self.parts.len().max(other.parts.len());
        for i in 0..count {
            match self.part(i).cmp(&other.part(i)) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }

        // a pre-release sorts below the same version without one
        match (self.pre.is_empty(), other.pre.is_empty()) {
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            _ => match self.pre.cmp(&other.pre) {
                Ordering::Equal => (),
                ord => return ord,
            },
        }

        // a post-release sorts above the same version without one
        self.post.cmp(&other.post)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Version, D::Error> {
        let source = String::deserialize(deserializer)?;
        parse_version(source).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_render() {
        for case in [
            "1.0.0",
            "0",
            "1.2.3.4.5",
            "1.0.0-alpha.1",
            "1.0.0+r.2",
            "1.0.0-alpha.1+r.2",
            "256.0.999999",
        ] {
            let version = parse_version(case).unwrap();
            assert_eq!(version.to_string(), case);
        }
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_version("1.a.0").is_err());
        assert!(parse_version("1..0").is_err());
        assert!(parse_version("1.0-").is_err());
        assert!(parse_version("1.0+").is_err());
        assert!(parse_version("1.0-1.2").is_err(), "all-digit tag name");
        assert!(parse_version("-1.0").is_err());
    }

    #[test]
    fn test_ordering() {
        let ordered = [
            "0.9",
            "1.0.0-alpha.0",
            "1.0.0-alpha.1",
            "1.0.0-beta.0",
            "1.0.0",
            "1.0.0+r.1",
            "1.0.1",
            "1.1",
            "2",
        ];
        for pair in ordered.windows(2) {
            let a = parse_version(pair[0]).unwrap();
            let b = parse_version(pair[1]).unwrap();
            assert!(a < b, "{} should sort below {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_equality_pads_zeros() {
        let a = parse_version("1.0").unwrap();
        let b = parse_version("1.0.0").unwrap();
        assert_eq!(a, b);

        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut ha = DefaultHasher::new();
        let mut hb = DefaultHasher::new();
        a.hash(&mut ha);
        b.hash(&mut hb);
        assert_eq!(ha.finish(), hb.finish());
    }

    #[test]
    fn test_empty_version() {
        let version = parse_version("").unwrap();
        assert!(version.is_empty());
        assert_eq!(version, Version::default());
    }
}
