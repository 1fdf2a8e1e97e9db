//! Package identifiers: name, version and build

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use spk_version::{parse_version, Version};

use crate::option_map::DIGEST_SIZE;
use crate::{Error, Result};

pub const SRC: &str = "src";
pub const EMBEDDED: &str = "embedded";

lazy_static! {
    static ref NAME_RE: Regex = Regex::new(r"^[a-z][a-z0-9-]*$").unwrap();
    static ref DIGEST_RE: Regex = Regex::new(r"^[A-Z2-7]+$").unwrap();
}

/// Check that the given string is a legal package name.
pub fn validate_name(name: impl AsRef<str>) -> Result<()> {
    let name = name.as_ref();
    if !NAME_RE.is_match(name) {
        return Err(Error::parse(
            "package name",
            name,
            "must be lowercase, begin with a letter and contain only [a-z0-9-]",
        ));
    }
    Ok(())
}

/// The build of a package: a source package, a package embedded in
/// another, or a binary identified by the digest of its build options.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Build {
    Source,
    Embedded,
    Digest(String),
}

impl Build {
    pub fn is_source(&self) -> bool {
        matches!(self, Build::Source)
    }

    pub fn is_embedded(&self) -> bool {
        matches!(self, Build::Embedded)
    }
}

impl std::fmt::Display for Build {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Build::Source => f.write_str(SRC),
            Build::Embedded => f.write_str(EMBEDDED),
            Build::Digest(digest) => f.write_str(digest),
        }
    }
}

/// Parse a build from its string form: `src`, `embedded`, or an
/// option digest.
pub fn parse_build(source: impl AsRef<str>) -> Result<Build> {
    let source = source.as_ref();
    match source {
        SRC => Ok(Build::Source),
        EMBEDDED => Ok(Build::Embedded),
        _ => {
            if source.len() != DIGEST_SIZE || !DIGEST_RE.is_match(source) {
                return Err(Error::parse(
                    "build",
                    source,
                    format!("must be 'src', 'embedded' or a {DIGEST_SIZE}-character option digest"),
                ));
            }
            Ok(Build::Digest(source.to_string()))
        }
    }
}

impl std::str::FromStr for Build {
    type Err = Error;

    fn from_str(s: &str) -> Result<Build> {
        parse_build(s)
    }
}

impl Serialize for Build {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Build {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Build, D::Error> {
        let source = String::deserialize(deserializer)?;
        parse_build(source).map_err(serde::de::Error::custom)
    }
}

/// A package identifier: a name with an optional version and build.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ident {
    pub name: String,
    pub version: Version,
    pub build: Option<Build>,
}

impl Ident {
    pub fn new(name: impl Into<String>) -> Ident {
        Ident {
            name: name.into(),
            version: Version::default(),
            build: None,
        }
    }

    pub fn with_version(mut self, version: Version) -> Ident {
        self.version = version;
        self
    }

    pub fn with_build(mut self, build: Option<Build>) -> Ident {
        self.build = build;
        self
    }

    pub fn is_source(&self) -> bool {
        matches!(self.build, Some(Build::Source))
    }
}

impl std::fmt::Display for Ident {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)?;
        if !self.version.is_empty() || self.build.is_some() {
            write!(f, "/{}", self.version)?;
        }
        if let Some(build) = &self.build {
            write!(f, "/{build}")?;
        }
        Ok(())
    }
}

/// Parse an identifier from `<name>[/<version>[/<build>]]`.
pub fn parse_ident(source: impl AsRef<str>) -> Result<Ident> {
    let source = source.as_ref();
    let mut parts = source.split('/');
    let name = parts.next().unwrap_or_default();
    validate_name(name)?;
    let mut ident = Ident::new(name);
    if let Some(version) = parts.next() {
        ident.version = parse_version(version)?;
    }
    if let Some(build) = parts.next() {
        ident.build = Some(parse_build(build)?);
    }
    if parts.next().is_some() {
        return Err(Error::parse("identifier", source, "too many '/' tokens"));
    }
    Ok(ident)
}

impl std::str::FromStr for Ident {
    type Err = Error;

    fn from_str(s: &str) -> Result<Ident> {
        parse_ident(s)
    }
}

impl Serialize for Ident {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Ident {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Ident, D::Error> {
        let source = String::deserialize(deserializer)?;
        parse_ident(source).map_err(serde::de::Error::custom)
    }
}
