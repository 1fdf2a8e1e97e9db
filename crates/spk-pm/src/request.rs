//! Package and variable requests

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use spk_version::{
    parse_version_range, Compatibility, Version, VersionFilter, VersionRange, COMPATIBLE,
};

use crate::ident::{parse_build, validate_name, Build, Ident};
use crate::spec::Spec;
use crate::{Error, Result};

/// Whether pre-release versions can satisfy a request.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum PreReleasePolicy {
    #[default]
    ExcludeAll,
    IncludeAll,
}

/// Whether a request must be resolved, or only constrains the
/// package when something else already pulled it in.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum InclusionPolicy {
    #[default]
    Always,
    IfAlreadyPresent,
}

/// Identifies a range of package versions and builds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RangeIdent {
    pub name: String,
    pub version: VersionFilter,
    pub build: Option<Build>,
}

impl RangeIdent {
    /// An ident range which can only be satisfied by the given ident.
    pub fn exact(ident: &Ident) -> RangeIdent {
        RangeIdent {
            name: ident.name.clone(),
            version: if ident.version.is_empty() {
                VersionFilter::default()
            } else {
                VersionFilter::single(VersionRange::Equals(ident.version.clone()))
            },
            build: ident.build.clone(),
        }
    }

    /// True if the given concrete package could fall in this range.
    ///
    /// Applicable versions are not necessarily satisfactory: that
    /// cannot be decided without the full package spec.
    pub fn is_applicable(&self, pkg: &Ident) -> bool {
        if pkg.name != self.name {
            return false;
        }
        if !self.version.is_applicable(&pkg.version).is_ok() {
            return false;
        }
        match &self.build {
            Some(build) => Some(build) == pkg.build.as_ref(),
            None => true,
        }
    }

    /// Check if the given package spec satisfies this range.
    pub fn is_satisfied_by(&self, spec: &Spec) -> Compatibility {
        if spec.pkg.name != self.name {
            return Compatibility::incompatible("different package names");
        }
        let version = self.version.is_satisfied_by(&spec.pkg.version, &spec.compat);
        if !version.is_ok() {
            return version;
        }
        if self.build.is_some() && self.build != spec.pkg.build {
            return Compatibility::incompatible(format!(
                "different builds: {} != {}",
                self.build.as_ref().map(ToString::to_string).unwrap_or_default(),
                spec.pkg.build.as_ref().map(ToString::to_string).unwrap_or_default(),
            ));
        }
        COMPATIBLE
    }

    /// Reduce this range to the intersection with another.
    pub fn restrict(&mut self, other: &RangeIdent) -> Result<()> {
        if let Err(err) = self.version.restrict(&other.version) {
            return Err(Error::ConflictingRequests {
                name: self.name.clone(),
                reason: err.to_string(),
            });
        }
        match (&self.build, &other.build) {
            (_, None) => Ok(()),
            (None, Some(build)) => {
                self.build = Some(build.clone());
                Ok(())
            }
            (Some(mine), Some(theirs)) if mine == theirs => Ok(()),
            (Some(mine), Some(theirs)) => Err(Error::ConflictingRequests {
                name: self.name.clone(),
                reason: format!("incompatible builds: {mine} != {theirs}"),
            }),
        }
    }
}

impl std::fmt::Display for RangeIdent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)?;
        if !self.version.is_empty() {
            write!(f, "/{}", self.version)?;
        }
        if let Some(build) = &self.build {
            if self.version.is_empty() {
                f.write_str("/")?;
            }
            write!(f, "/{build}")?;
        }
        Ok(())
    }
}

/// Parse an ident range from `<name>[/<range>[/<build>]]`.
pub fn parse_ident_range(source: impl AsRef<str>) -> Result<RangeIdent> {
    let source = source.as_ref();
    let mut parts = source.split('/');
    let name = parts.next().unwrap_or_default();
    validate_name(name)?;
    let version = match parts.next() {
        Some(range) => parse_version_range(range)?,
        None => VersionFilter::default(),
    };
    let build = match parts.next() {
        Some(build) => Some(parse_build(build)?),
        None => None,
    };
    if parts.next().is_some() {
        return Err(Error::parse("identifier range", source, "too many '/' tokens"));
    }
    Ok(RangeIdent {
        name: name.to_string(),
        version,
        build,
    })
}

impl std::str::FromStr for RangeIdent {
    type Err = Error;

    fn from_str(s: &str) -> Result<RangeIdent> {
        parse_ident_range(s)
    }
}

impl Serialize for RangeIdent {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RangeIdent {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<RangeIdent, D::Error> {
        let source = String::deserialize(deserializer)?;
        parse_ident_range(source).map_err(serde::de::Error::custom)
    }
}

/// A desired package and the restrictions on how it is selected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PkgRequest {
    pub pkg: RangeIdent,
    pub prerelease_policy: PreReleasePolicy,
    pub inclusion_policy: InclusionPolicy,
    /// An unrendered `fromBuildEnv` template, eg `x.x` or `Binary`.
    pub pin: Option<String>,
}

impl PkgRequest {
    pub fn new(pkg: RangeIdent) -> PkgRequest {
        PkgRequest {
            pkg,
            prerelease_policy: PreReleasePolicy::default(),
            inclusion_policy: InclusionPolicy::default(),
            pin: None,
        }
    }

    /// A request which can only be satisfied by the given package.
    pub fn from_ident(ident: &Ident) -> PkgRequest {
        PkgRequest::new(RangeIdent::exact(ident))
    }

    /// Render the `fromBuildEnv` template against a package resolved
    /// into the build environment.
    pub fn render_pin(&self, pkg: &Ident) -> Result<PkgRequest> {
        let pin = match &self.pin {
            Some(pin) => pin,
            None => {
                return Err(Error::Validation(format!(
                    "request for {} has no pin to render",
                    self.pkg.name
                )))
            }
        };

        let rendered = if pin.contains('x') {
            let mut digits = pkg.version.parts.iter().copied().chain(std::iter::repeat(0));
            pin.chars()
                .map(|c| {
                    if c == 'x' {
                        digits.next().unwrap_or_default().to_string()
                    } else {
                        c.to_string()
                    }
                })
                .collect::<String>()
        } else if pin == "API" || pin == "Binary" {
            format!("{pin}:{}", pkg.version)
        } else {
            return Err(Error::Validation(format!(
                "invalid fromBuildEnv template \"{pin}\" for {}",
                self.pkg.name
            )));
        };

        let mut new = self.clone();
        new.pin = None;
        new.pkg.version = parse_version_range(rendered)?;
        Ok(new)
    }

    /// A cheap check that prunes versions which can never satisfy the
    /// request, without loading the package spec.
    pub fn is_version_applicable(&self, version: &Version) -> Compatibility {
        if self.prerelease_policy == PreReleasePolicy::ExcludeAll && version.is_pre_release() {
            return Compatibility::incompatible("prereleases not allowed");
        }
        self.pkg.version.is_applicable(version)
    }

    /// Check if the given package spec satisfies this request.
    pub fn is_satisfied_by(&self, spec: &Spec) -> Compatibility {
        if spec.deprecated {
            // deprecated builds are only okay if this build
            // was specifically requested
            match (&self.pkg.build, &spec.pkg.build) {
                (Some(requested), Some(actual)) if requested == actual => (),
                _ => {
                    return Compatibility::incompatible(
                        "build is deprecated and was not specifically requested",
                    )
                }
            }
        }
        if self.prerelease_policy == PreReleasePolicy::ExcludeAll
            && spec.pkg.version.is_pre_release()
        {
            return Compatibility::incompatible("prereleases not allowed");
        }
        self.pkg.is_satisfied_by(spec)
    }

    /// Reduce the scope of this request to the intersection with
    /// another, keeping the stricter of each policy.
    pub fn restrict(&mut self, other: &PkgRequest) -> Result<()> {
        self.prerelease_policy = self.prerelease_policy.min(other.prerelease_policy);
        self.inclusion_policy = self.inclusion_policy.min(other.inclusion_policy);
        self.pkg.restrict(&other.pkg)
    }
}

impl std::fmt::Display for PkgRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.pkg.fmt(f)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum PinValue {
    Bool(bool),
    Template(String),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPkgRequest {
    pkg: RangeIdent,
    #[serde(rename = "prereleasePolicy", default)]
    prerelease_policy: PreReleasePolicy,
    #[serde(rename = "include", default)]
    inclusion_policy: InclusionPolicy,
    #[serde(rename = "fromBuildEnv", default)]
    pin: Option<PinValue>,
}

impl<'de> Deserialize<'de> for PkgRequest {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<PkgRequest, D::Error> {
        let raw = RawPkgRequest::deserialize(deserializer)?;
        let pin = match raw.pin {
            None | Some(PinValue::Bool(false)) => None,
            Some(PinValue::Bool(true)) => Some("Binary".to_string()),
            Some(PinValue::Template(template)) => Some(template),
        };
        if pin.is_some() && !raw.pkg.version.is_empty() {
            return Err(D::Error::custom(
                "package request cannot include both a version range and fromBuildEnv",
            ));
        }
        Ok(PkgRequest {
            pkg: raw.pkg,
            prerelease_policy: raw.prerelease_policy,
            inclusion_policy: raw.inclusion_policy,
            pin,
        })
    }
}

impl Serialize for PkgRequest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("pkg", &self.pkg)?;
        if self.prerelease_policy != PreReleasePolicy::default() {
            map.serialize_entry("prereleasePolicy", &self.prerelease_policy)?;
        }
        if self.inclusion_policy != InclusionPolicy::default() {
            map.serialize_entry("include", &self.inclusion_policy)?;
        }
        if let Some(pin) = &self.pin {
            map.serialize_entry("fromBuildEnv", pin)?;
        }
        map.end()
    }
}

/// A requested value for a build variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VarRequest {
    /// Global (`debug`) or namespaced (`python.abi`) variable name.
    pub var: String,
    pub value: String,
    /// When set, the value is taken from the build environment.
    pub pin: bool,
}

impl VarRequest {
    pub fn new(var: impl Into<String>, value: impl Into<String>) -> VarRequest {
        VarRequest {
            var: var.into(),
            value: value.into(),
            pin: false,
        }
    }

    /// The package this variable belongs to, if any.
    pub fn namespace(&self) -> Option<&str> {
        self.var.split_once('.').map(|(ns, _)| ns)
    }

    /// The variable name without any package namespace.
    pub fn base_name(&self) -> &str {
        self.var
            .split_once('.')
            .map(|(_, base)| base)
            .unwrap_or(&self.var)
    }

    /// Render the pinned value from the build environment.
    pub fn render_pin(&self, value: impl Into<String>) -> Result<VarRequest> {
        if !self.pin {
            return Err(Error::Validation(format!(
                "var request for {} has no pin to render",
                self.var
            )));
        }
        Ok(VarRequest {
            var: self.var.clone(),
            value: value.into(),
            pin: false,
        })
    }
}

impl std::fmt::Display for VarRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.var, self.value)
    }
}

/// Check a global or namespaced variable name.
pub fn validate_var_name(name: impl AsRef<str>) -> Result<()> {
    let name = name.as_ref();
    let mut parts = name.split('.');
    let first = parts.next().unwrap_or_default();
    validate_name(first)?;
    if let Some(second) = parts.next() {
        validate_name(second)?;
    }
    if parts.next().is_some() {
        return Err(Error::parse(
            "variable name",
            name,
            "expected at most one '.' namespace separator",
        ));
    }
    Ok(())
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawVarRequest {
    var: String,
    #[serde(rename = "fromBuildEnv", default)]
    pin: bool,
}

impl<'de> Deserialize<'de> for VarRequest {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<VarRequest, D::Error> {
        let raw = RawVarRequest::deserialize(deserializer)?;
        let (var, value) = match raw.var.split_once('/') {
            Some((var, value)) => (var.to_string(), Some(value.to_string())),
            None => (raw.var, None),
        };
        validate_var_name(&var).map_err(D::Error::custom)?;
        match (value, raw.pin) {
            (Some(_), true) => Err(D::Error::custom(
                "var request cannot include both a value and fromBuildEnv",
            )),
            (None, false) => Err(D::Error::custom(
                "var request must have a value (`name/value`) or set fromBuildEnv",
            )),
            (Some(value), false) => Ok(VarRequest {
                var,
                value,
                pin: false,
            }),
            (None, true) => Ok(VarRequest {
                var,
                value: String::new(),
                pin: true,
            }),
        }
    }
}

impl Serialize for VarRequest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(None)?;
        if self.pin {
            map.serialize_entry("var", &self.var)?;
            map.serialize_entry("fromBuildEnv", &true)?;
        } else {
            map.serialize_entry("var", &format!("{}/{}", self.var, self.value))?;
        }
        map.end()
    }
}

/// Either of the two request variants.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Request {
    Pkg(PkgRequest),
    Var(VarRequest),
}

impl Request {
    /// The name that this request constrains: the package name, or
    /// the (possibly namespaced) variable name.
    pub fn name(&self) -> &str {
        match self {
            Request::Pkg(request) => &request.pkg.name,
            Request::Var(request) => &request.var,
        }
    }
}

impl std::fmt::Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Request::Pkg(request) => request.fmt(f),
            Request::Var(request) => request.fmt(f),
        }
    }
}

impl From<PkgRequest> for Request {
    fn from(request: PkgRequest) -> Request {
        Request::Pkg(request)
    }
}

impl From<VarRequest> for Request {
    fn from(request: VarRequest) -> Request {
        Request::Var(request)
    }
}

impl<'de> Deserialize<'de> for Request {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Request, D::Error> {
        let value = serde_yaml::Value::deserialize(deserializer)?;
        if !value.is_mapping() {
            return Err(D::Error::custom("request must be a mapping"));
        }
        if value.get("pkg").is_some() {
            serde_yaml::from_value(value)
                .map(Request::Pkg)
                .map_err(D::Error::custom)
        } else if value.get("var").is_some() {
            serde_yaml::from_value(value)
                .map(Request::Var)
                .map_err(D::Error::custom)
        } else {
            Err(D::Error::custom(
                "cannot determine request type: expected a 'pkg' or 'var' field",
            ))
        }
    }
}

impl Serialize for Request {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Request::Pkg(request) => request.serialize(serializer),
            Request::Var(request) => request.serialize(serializer),
        }
    }
}

/// Parse a request from the command line shorthand:
/// `name[/range][@PreReleasePolicy]` or `name=value`.
pub fn parse_request(source: impl AsRef<str>) -> Result<Request> {
    let source = source.as_ref();
    // an '=' before any '/' marks a variable request; after one it
    // belongs to a version range atom like `lib/=1.1`
    if let Some((var, value)) = source.split_once('=') {
        if !var.contains('/') {
            validate_var_name(var)?;
            return Ok(Request::Var(VarRequest::new(var, value)));
        }
    }

    let (ident, policy) = match source.split_once('@') {
        Some((ident, policy)) => {
            let policy = match policy {
                "IncludeAll" => PreReleasePolicy::IncludeAll,
                "ExcludeAll" => PreReleasePolicy::ExcludeAll,
                _ => {
                    return Err(Error::parse(
                        "request",
                        source,
                        format!("unknown prerelease policy \"{policy}\""),
                    ))
                }
            };
            (ident, policy)
        }
        None => (source, PreReleasePolicy::default()),
    };
    let mut request = PkgRequest::new(parse_ident_range(ident)?);
    request.prerelease_policy = policy;
    Ok(Request::Pkg(request))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::parse_ident;

    #[test]
    fn test_parse_ident_range() {
        let range = parse_ident_range("maya/~2020.0").unwrap();
        assert_eq!(range.name, "maya");
        assert_eq!(range.version.to_string(), "~2020.0");
        assert!(range.build.is_none());

        let range = parse_ident_range("maya").unwrap();
        assert!(range.version.is_empty());

        assert!(parse_ident_range("maya/1.0/2.0/3.0").is_err());
    }

    #[test]
    fn test_prerelease_policy_restrict() {
        let mut a: PkgRequest =
            serde_yaml::from_str("{pkg: something, prereleasePolicy: IncludeAll}").unwrap();
        let b: PkgRequest =
            serde_yaml::from_str("{pkg: something, prereleasePolicy: ExcludeAll}").unwrap();
        a.restrict(&b).unwrap();
        assert_eq!(a.prerelease_policy, PreReleasePolicy::ExcludeAll);
    }

    #[test]
    fn test_inclusion_policy_restrict() {
        let mut a: PkgRequest =
            serde_yaml::from_str("{pkg: something, include: IfAlreadyPresent}").unwrap();
        let b: PkgRequest = serde_yaml::from_str("{pkg: something, include: Always}").unwrap();
        a.restrict(&b).unwrap();
        assert_eq!(a.inclusion_policy, InclusionPolicy::Always);
    }

    #[test]
    fn test_restrict_conflicting_ranges() {
        let mut a: PkgRequest = serde_yaml::from_str("{pkg: lib/1.0}").unwrap();
        let b: PkgRequest = serde_yaml::from_str("{pkg: lib/2.0}").unwrap();
        match a.restrict(&b) {
            Err(Error::ConflictingRequests { name, .. }) => assert_eq!(name, "lib"),
            other => panic!("expected conflicting requests, got {other:?}"),
        }
    }

    #[test]
    fn test_deserialize_value_or_pin() {
        let res = serde_yaml::from_str::<VarRequest>("{var: python.abi/cp27m}");
        assert!(res.is_ok(), "should allow regular name/value");

        let res = serde_yaml::from_str::<VarRequest>("{var: python.abi, fromBuildEnv: true}");
        assert!(res.is_ok(), "should allow no value when pinning build env");

        let res = serde_yaml::from_str::<VarRequest>("{var: python.abi/cp27m, fromBuildEnv: true}");
        assert!(res.is_err(), "should not allow value and pin");

        let res = serde_yaml::from_str::<VarRequest>("{var: python.abi}");
        assert!(res.is_err(), "should not allow omitting value without pin");
    }

    #[test]
    fn test_var_request_empty_value_roundtrip() {
        let req = serde_yaml::from_str::<VarRequest>("{var: python.abi/}").unwrap();
        let yaml = serde_yaml::to_string(&req).unwrap();
        let res = serde_yaml::from_str::<VarRequest>(&yaml);
        assert!(res.is_ok(), "round trip with an empty value should parse");
    }

    #[test]
    fn test_var_request_pinned_roundtrip() {
        let req = serde_yaml::from_str::<VarRequest>("{var: python.abi, fromBuildEnv: true}").unwrap();
        let yaml = serde_yaml::to_string(&req).unwrap();
        let res = serde_yaml::from_str::<VarRequest>(&yaml).unwrap();
        assert!(res.pin, "should preserve the pin through a round trip");
    }

    #[test]
    fn test_pkg_request_pin_rendering() {
        for (version, pin, expected) in [
            ("1.2.3", "x.x.x", "1.2.3"),
            ("1.2.3", "x", "1"),
            ("1.2.3", "x.x", "1.2"),
            ("1.2.3", "~x.x.x.x", "~1.2.3.0"),
            ("1.2.3", "Binary", "Binary:1.2.3"),
            ("1.2.3", "API", "API:1.2.3"),
            ("1.2.3.4.5", "API", "API:1.2.3.4.5"),
            ("1.2.3", "API:x.x", "API:1.2"),
            ("1.2.3", "true", "Binary:1.2.3"),
        ] {
            let pin_yaml = if pin == "true" {
                pin.to_string()
            } else {
                format!("\"{pin}\"")
            };
            let req: PkgRequest =
                serde_yaml::from_str(&format!("{{pkg: test, fromBuildEnv: {pin_yaml}}}")).unwrap();
            let ident = parse_ident(format!("test/{version}")).unwrap();
            let rendered = req.render_pin(&ident).unwrap();
            assert_eq!(rendered.pkg.version.to_string(), expected);
            assert!(rendered.pin.is_none());
        }
    }

    #[test]
    fn test_pin_with_version_rejected() {
        let res = serde_yaml::from_str::<PkgRequest>("{pkg: test/1.0, fromBuildEnv: x.x}");
        assert!(res.is_err(), "should not allow a range and a pin");
    }

    #[test]
    fn test_var_request_base_name() {
        let req = VarRequest::new("pkg.var", "");
        assert_eq!(req.base_name(), "var");
        assert_eq!(req.namespace(), Some("pkg"));

        let req = VarRequest::new("var", "");
        assert_eq!(req.base_name(), "var");
        assert_eq!(req.namespace(), None);
    }

    #[test]
    fn test_parse_request_shorthand() {
        match parse_request("python/3.7").unwrap() {
            Request::Pkg(req) => {
                assert_eq!(req.pkg.name, "python");
                assert_eq!(req.prerelease_policy, PreReleasePolicy::ExcludeAll);
            }
            other => panic!("expected a package request, got {other:?}"),
        }

        match parse_request("python/3.8@IncludeAll").unwrap() {
            Request::Pkg(req) => {
                assert_eq!(req.prerelease_policy, PreReleasePolicy::IncludeAll)
            }
            other => panic!("expected a package request, got {other:?}"),
        }

        match parse_request("python.abi=cp37m").unwrap() {
            Request::Var(req) => {
                assert_eq!(req.var, "python.abi");
                assert_eq!(req.value, "cp37m");
            }
            other => panic!("expected a var request, got {other:?}"),
        }

        assert!(parse_request("python/3.8@Sometimes").is_err());
    }
}
