//! Package source locations
//!
//! These are data only: the collectors that fetch and arrange the
//! sources live with the build executor, not the solver.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Package source files in a local directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalSource {
    pub path: String,
}

/// Package source files from a git repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GitSource {
    pub git: String,
    #[serde(rename = "ref", default, skip_serializing_if = "String::is_empty")]
    pub reference: String,
}

/// Package source files from a local or remote tar archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TarSource {
    pub tar: String,
}

/// One source location for a package.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceSpec {
    Local(LocalSource),
    Git(GitSource),
    Tar(TarSource),
}

impl<'de> Deserialize<'de> for SourceSpec {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<SourceSpec, D::Error> {
        let value = serde_yaml::Value::deserialize(deserializer)?;
        if !value.is_mapping() {
            return Err(D::Error::custom("source must be a mapping"));
        }
        if value.get("path").is_some() {
            serde_yaml::from_value(value)
                .map(SourceSpec::Local)
                .map_err(D::Error::custom)
        } else if value.get("git").is_some() {
            serde_yaml::from_value(value)
                .map(SourceSpec::Git)
                .map_err(D::Error::custom)
        } else if value.get("tar").is_some() {
            serde_yaml::from_value(value)
                .map(SourceSpec::Tar)
                .map_err(D::Error::custom)
        } else {
            Err(D::Error::custom(
                "cannot determine source type: expected a 'path', 'git' or 'tar' field",
            ))
        }
    }
}

impl Serialize for SourceSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            SourceSpec::Local(source) => source.serialize(serializer),
            SourceSpec::Git(source) => source.serialize(serializer),
            SourceSpec::Tar(source) => source.serialize(serializer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discriminated_by_key() {
        let source: SourceSpec = serde_yaml::from_str("{path: ./src}").unwrap();
        assert!(matches!(source, SourceSpec::Local(_)));

        let source: SourceSpec =
            serde_yaml::from_str("{git: \"https://host/repo.git\", ref: v1.0}").unwrap();
        match &source {
            SourceSpec::Git(git) => assert_eq!(git.reference, "v1.0"),
            other => panic!("expected a git source, got {other:?}"),
        }

        let source: SourceSpec = serde_yaml::from_str("{tar: archive.tar.gz}").unwrap();
        assert!(matches!(source, SourceSpec::Tar(_)));

        assert!(serde_yaml::from_str::<SourceSpec>("{zip: archive.zip}").is_err());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let res = serde_yaml::from_str::<SourceSpec>("{path: ./src, depth: 1}");
        assert!(res.is_err());
    }
}
