//! Build options declared by package specs

use indexmap::IndexSet;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use spk_version::{parse_version_range, Compatibility, COMPATIBLE};

use crate::option_map::Stringified;
use crate::request::{
    parse_ident_range, PkgRequest, PreReleasePolicy, Request, VarRequest,
};
use crate::Result;

/// How a variable option propagates into packages that build against
/// this one.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum Inheritance {
    /// Does not propagate
    #[default]
    Weak,
    /// Propagates as a var request and an install requirement
    Strong,
    /// Propagates as a var request only
    StrongForBuildOnly,
}

/// A named variable that can be set for a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarOpt {
    pub var: String,
    pub default: String,
    pub choices: IndexSet<String>,
    pub inheritance: Inheritance,
    /// The value frozen into this spec when the build was published.
    pub static_value: Option<String>,
}

impl VarOpt {
    pub fn new(var: impl Into<String>) -> VarOpt {
        VarOpt {
            var: var.into(),
            default: String::new(),
            choices: IndexSet::new(),
            inheritance: Inheritance::default(),
            static_value: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.var
    }

    /// The value this option takes given an input value, if any.
    pub fn get_value(&self, given: Option<&str>) -> String {
        if let Some(value) = &self.static_value {
            return value.clone();
        }
        match given {
            Some(value) if !value.is_empty() => value.to_string(),
            _ => self.default.clone(),
        }
    }

    /// Check that the given value is allowed for this option.
    pub fn validate(&self, given: Option<&str>) -> Compatibility {
        let given = given.filter(|v| !v.is_empty());
        if let (Some(static_value), Some(value)) = (&self.static_value, given) {
            if value != static_value.as_str() {
                return Compatibility::incompatible(format!(
                    "option {} was set to {static_value} at build time and cannot be {value}",
                    self.var
                ));
            }
        }
        if let Some(value) = given {
            if !self.choices.is_empty() && !self.choices.contains(value) {
                return Compatibility::incompatible(format!(
                    "invalid value for {}: {value} must be one of {:?}",
                    self.var, self.choices
                ));
            }
        }
        COMPATIBLE
    }

    /// Turn this option into an equivalent variable request.
    pub fn to_request(&self, given: Option<&str>) -> VarRequest {
        VarRequest::new(self.var.clone(), self.get_value(given))
    }
}

/// A package that must be present in the build environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkgOpt {
    pub pkg: String,
    /// The default version range requested for the package.
    pub default: String,
    pub prerelease_policy: PreReleasePolicy,
    /// The version pinned into this spec when the build was published.
    pub static_value: Option<String>,
}

impl PkgOpt {
    pub fn new(pkg: impl Into<String>) -> PkgOpt {
        PkgOpt {
            pkg: pkg.into(),
            default: String::new(),
            prerelease_policy: PreReleasePolicy::default(),
            static_value: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.pkg
    }

    pub fn get_value(&self, given: Option<&str>) -> String {
        if let Some(value) = &self.static_value {
            return value.clone();
        }
        match given {
            Some(value) if !value.is_empty() => value.to_string(),
            _ => self.default.clone(),
        }
    }

    /// Check that the given value is a usable version range for this
    /// package option.
    pub fn validate(&self, given: Option<&str>) -> Compatibility {
        let given = given.filter(|v| !v.is_empty());
        if let (Some(static_value), Some(value)) = (&self.static_value, given) {
            if value != static_value.as_str() {
                return Compatibility::incompatible(format!(
                    "option {} was pinned to {static_value} at build time and cannot be {value}",
                    self.pkg
                ));
            }
        }
        if let Some(value) = given {
            if let Err(err) = parse_version_range(value) {
                return Compatibility::incompatible(format!(
                    "invalid value for option {}: {err}",
                    self.pkg
                ));
            }
        }
        COMPATIBLE
    }

    /// Turn this option into an equivalent package request.
    pub fn to_request(&self, given: Option<&str>) -> Result<PkgRequest> {
        let value = self.get_value(given);
        let mut request = PkgRequest::new(parse_ident_range(format!("{}/{}", self.pkg, value))?);
        request.prerelease_policy = self.prerelease_policy;
        Ok(request)
    }
}

/// A build option declared by a package spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Opt {
    Var(VarOpt),
    Pkg(PkgOpt),
}

impl Opt {
    pub fn name(&self) -> &str {
        match self {
            Opt::Var(opt) => opt.name(),
            Opt::Pkg(opt) => opt.name(),
        }
    }

    pub fn get_value(&self, given: Option<&str>) -> String {
        match self {
            Opt::Var(opt) => opt.get_value(given),
            Opt::Pkg(opt) => opt.get_value(given),
        }
    }

    pub fn validate(&self, given: Option<&str>) -> Compatibility {
        match self {
            Opt::Var(opt) => opt.validate(given),
            Opt::Pkg(opt) => opt.validate(given),
        }
    }

    pub fn inheritance(&self) -> Inheritance {
        match self {
            Opt::Var(opt) => opt.inheritance,
            Opt::Pkg(_) => Inheritance::Weak,
        }
    }

    /// The request that places this option's value into a build
    /// environment.
    pub fn to_request(&self, given: Option<&str>) -> Result<Request> {
        match self {
            Opt::Var(opt) => Ok(Request::Var(opt.to_request(given))),
            Opt::Pkg(opt) => Ok(Request::Pkg(opt.to_request(given)?)),
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawVarOpt {
    var: String,
    #[serde(default)]
    default: Option<Stringified>,
    #[serde(default)]
    choices: Vec<Stringified>,
    #[serde(default)]
    inheritance: Inheritance,
    #[serde(rename = "static", default)]
    static_value: Option<Stringified>,
}

impl<'de> Deserialize<'de> for VarOpt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<VarOpt, D::Error> {
        let raw = RawVarOpt::deserialize(deserializer)?;
        crate::request::validate_var_name(&raw.var).map_err(D::Error::custom)?;
        Ok(VarOpt {
            var: raw.var,
            default: raw.default.unwrap_or_default().0,
            choices: raw.choices.into_iter().map(|c| c.0).collect(),
            inheritance: raw.inheritance,
            static_value: raw.static_value.map(|v| v.0),
        })
    }
}

impl Serialize for VarOpt {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("var", &self.var)?;
        if !self.default.is_empty() {
            map.serialize_entry("default", &self.default)?;
        }
        if !self.choices.is_empty() {
            map.serialize_entry("choices", &self.choices.iter().collect::<Vec<_>>())?;
        }
        if self.inheritance != Inheritance::default() {
            map.serialize_entry("inheritance", &self.inheritance)?;
        }
        if let Some(value) = &self.static_value {
            map.serialize_entry("static", value)?;
        }
        map.end()
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPkgOpt {
    pkg: String,
    #[serde(default)]
    default: Option<Stringified>,
    #[serde(rename = "prereleasePolicy", default)]
    prerelease_policy: PreReleasePolicy,
    #[serde(rename = "static", default)]
    static_value: Option<Stringified>,
}

impl<'de> Deserialize<'de> for PkgOpt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<PkgOpt, D::Error> {
        let raw = RawPkgOpt::deserialize(deserializer)?;
        // a default range may be given inline: `pkg: name/1.4`
        let (pkg, mut default) = match raw.pkg.split_once('/') {
            Some((pkg, range)) => (pkg.to_string(), range.to_string()),
            None => (raw.pkg, String::new()),
        };
        crate::ident::validate_name(&pkg).map_err(D::Error::custom)?;
        if let Some(given) = raw.default {
            if !default.is_empty() {
                return Err(D::Error::custom(format!(
                    "package option {pkg} cannot have both an inline and explicit default"
                )));
            }
            default = given.0;
        }
        if !default.is_empty() {
            parse_version_range(&default).map_err(D::Error::custom)?;
        }
        Ok(PkgOpt {
            pkg,
            default,
            prerelease_policy: raw.prerelease_policy,
            static_value: raw.static_value.map(|v| v.0),
        })
    }
}

impl Serialize for PkgOpt {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("pkg", &self.pkg)?;
        if !self.default.is_empty() {
            map.serialize_entry("default", &self.default)?;
        }
        if self.prerelease_policy != PreReleasePolicy::default() {
            map.serialize_entry("prereleasePolicy", &self.prerelease_policy)?;
        }
        if let Some(value) = &self.static_value {
            map.serialize_entry("static", value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Opt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Opt, D::Error> {
        let value = serde_yaml::Value::deserialize(deserializer)?;
        if !value.is_mapping() {
            return Err(D::Error::custom("build option must be a mapping"));
        }
        if value.get("var").is_some() {
            serde_yaml::from_value(value).map(Opt::Var).map_err(D::Error::custom)
        } else if value.get("pkg").is_some() {
            serde_yaml::from_value(value).map(Opt::Pkg).map_err(D::Error::custom)
        } else {
            Err(D::Error::custom(
                "cannot determine option type: expected a 'var' or 'pkg' field",
            ))
        }
    }
}

impl Serialize for Opt {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Opt::Var(opt) => opt.serialize(serializer),
            Opt::Pkg(opt) => opt.serialize(serializer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pkg_opt_validation() {
        let opt: PkgOpt = serde_yaml::from_str("{pkg: my-pkg}").unwrap();
        assert!(opt.validate(Some("1")).is_ok());
        assert!(!opt.validate(Some("none")).is_ok());
        assert!(opt.validate(Some("")).is_ok());
        assert!(opt.validate(None).is_ok());
    }

    #[test]
    fn test_pkg_opt_inline_default() {
        let opt: PkgOpt = serde_yaml::from_str("{pkg: my-pkg/1.4}").unwrap();
        assert_eq!(opt.default, "1.4");
        assert!(serde_yaml::from_str::<PkgOpt>("{pkg: my-pkg/1.4, default: \"1.5\"}").is_err());
    }

    #[test]
    fn test_var_opt_validation() {
        let opt: VarOpt = serde_yaml::from_str("{var: my-var, choices: [hello, world]}").unwrap();
        assert!(opt.validate(Some("hello")).is_ok());
        assert!(!opt.validate(Some("bad")).is_ok());
        assert!(opt.validate(Some("")).is_ok());
    }

    #[test]
    fn test_var_opt_static_wins() {
        let opt: VarOpt = serde_yaml::from_str("{var: abi, default: cp27, static: cp37}").unwrap();
        assert_eq!(opt.get_value(Some("cp39")), "cp37");
        assert!(!opt.validate(Some("cp39")).is_ok());
        assert!(opt.validate(Some("cp37")).is_ok());
    }

    #[test]
    fn test_opt_discriminated_by_key() {
        let opt: Opt = serde_yaml::from_str("{var: debug, default: off}").unwrap();
        assert!(matches!(opt, Opt::Var(_)));

        let opt: Opt = serde_yaml::from_str("{pkg: gcc/6.3}").unwrap();
        assert!(matches!(opt, Opt::Pkg(_)));

        assert!(serde_yaml::from_str::<Opt>("{name: what}").is_err());
    }

    #[test]
    fn test_opt_roundtrip() {
        let yaml = "{var: debug, default: off, choices: [on, off], inheritance: Strong}";
        let opt: Opt = serde_yaml::from_str(yaml).unwrap();
        let rendered = serde_yaml::to_string(&opt).unwrap();
        let reparsed: Opt = serde_yaml::from_str(&rendered).unwrap();
        assert_eq!(opt, reparsed);
    }

    #[test]
    fn test_numeric_default_stringified() {
        let opt: VarOpt = serde_yaml::from_str("{var: optimize, default: 2}").unwrap();
        assert_eq!(opt.default, "2");
    }
}
