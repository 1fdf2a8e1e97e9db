// Package spec model
//
// A spec describes one package: its identity, compat contract,
// sources, build configuration, tests and install-time behavior.

mod build_spec;
mod install_spec;
mod option;
mod source_spec;
mod test_spec;

pub use build_spec::{BuildSpec, Script};
pub use install_spec::InstallSpec;
pub use option::{Inheritance, Opt, PkgOpt, VarOpt};
pub use source_spec::{GitSource, LocalSource, SourceSpec, TarSource};
pub use test_spec::{TestSpec, TestStage};

use std::collections::HashSet;
use std::path::Path;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use spk_version::Compat;

use crate::ident::{validate_name, Build, Ident};
use crate::option_map::OptionMap;
use crate::request::Request;
use crate::{Error, Result};

/// A package specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Spec {
    pub pkg: Ident,
    #[serde(default, skip_serializing_if = "Compat::is_default")]
    pub compat: Compat,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deprecated: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceSpec>,
    #[serde(default, skip_serializing_if = "BuildSpec::is_default")]
    pub build: BuildSpec,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tests: Vec<TestSpec>,
    #[serde(default, skip_serializing_if = "InstallSpec::is_default")]
    pub install: InstallSpec,
}

impl Spec {
    /// An empty spec for the identified package.
    pub fn new(pkg: Ident) -> Spec {
        Spec {
            pkg,
            compat: Compat::default(),
            deprecated: false,
            sources: Vec::new(),
            build: BuildSpec::default(),
            tests: Vec::new(),
            install: InstallSpec::default(),
        }
    }

    /// True if this spec describes a source package.
    pub fn is_source(&self) -> bool {
        matches!(self.pkg.build, Some(Build::Source))
    }

    /// The values of this package's options under the given inputs.
    pub fn resolve_all_options(&self, given: &OptionMap) -> OptionMap {
        self.build.resolve_all_options(Some(&self.pkg.name), given)
    }

    /// Check the spec invariants.
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.pkg.name)?;

        let mut seen = HashSet::new();
        for opt in &self.build.options {
            if !seen.insert(opt.name()) {
                return Err(Error::Validation(format!(
                    "duplicate build option \"{}\" in {}",
                    opt.name(),
                    self.pkg
                )));
            }
        }

        for request in &self.install.requirements {
            if let Request::Pkg(request) = request {
                if request.pkg.name == self.pkg.name {
                    return Err(Error::Validation(format!(
                        "package {} cannot require itself at install time",
                        self.pkg.name
                    )));
                }
            }
        }

        install_spec::validate_embedded(&self.pkg, &self.install.embedded)
    }

    /// Parse and validate a spec from yaml source.
    pub fn from_yaml(source: impl AsRef<str>) -> Result<Spec> {
        Ok(serde_yaml::from_str(source.as_ref())?)
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSpec {
    pkg: Ident,
    #[serde(default)]
    compat: Compat,
    #[serde(default)]
    deprecated: bool,
    #[serde(default)]
    sources: Vec<SourceSpec>,
    #[serde(default)]
    build: BuildSpec,
    #[serde(default)]
    tests: Vec<TestSpec>,
    #[serde(default)]
    install: InstallSpec,
}

impl<'de> Deserialize<'de> for Spec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Spec, D::Error> {
        let raw = RawSpec::deserialize(deserializer)?;
        let spec = Spec {
            pkg: raw.pkg,
            compat: raw.compat,
            deprecated: raw.deprecated,
            sources: raw.sources,
            build: raw.build,
            tests: raw.tests,
            install: raw.install,
        };
        spec.validate().map_err(D::Error::custom)?;
        Ok(spec)
    }
}

/// Read and validate a package spec from a yaml file on disk.
pub fn read_spec_file(path: impl AsRef<Path>) -> Result<Spec> {
    let reader = std::fs::File::open(path.as_ref())?;
    Ok(serde_yaml::from_reader(reader)?)
}

/// Save the given spec to a yaml file on disk.
pub fn save_spec_file(path: impl AsRef<Path>, spec: &Spec) -> Result<()> {
    let writer = std::fs::File::create(path.as_ref())?;
    serde_yaml::to_writer(writer, spec)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_spec() {
        let spec = Spec::from_yaml("{pkg: my-pkg/1.0.0}").unwrap();
        assert_eq!(spec.pkg.name, "my-pkg");
        assert!(spec.compat.is_default());
        assert!(!spec.deprecated);
    }

    #[test]
    fn test_full_spec_roundtrip() {
        let spec = Spec::from_yaml(
            r#"
pkg: hello-world/1.0.0
compat: x.x.b
sources:
  - path: ./src
build:
  script:
    - sh ./build.sh
  options:
    - var: debug
      default: off
    - pkg: gcc/6.3
  variants:
    - {debug: on}
    - {debug: off}
tests:
  - stage: install
    script: echo test
install:
  requirements:
    - pkg: gcc/6.3
"#,
        )
        .unwrap();
        let yaml = serde_yaml::to_string(&spec).unwrap();
        let reparsed = Spec::from_yaml(&yaml).unwrap();
        assert_eq!(spec, reparsed);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(Spec::from_yaml("{pkg: my-pkg/1.0.0, colour: blue}").is_err());
    }

    #[test]
    fn test_duplicate_options_rejected() {
        let res = Spec::from_yaml(
            "{pkg: my-pkg/1.0.0, build: {options: [{var: debug}, {var: debug}]}}",
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_self_requirement_rejected() {
        let res = Spec::from_yaml(
            "{pkg: my-pkg/1.0.0, install: {requirements: [{pkg: my-pkg/1.0.0}]}}",
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_embedded_specs() {
        let spec = Spec::from_yaml(
            "{pkg: maya/2020.0, install: {embedded: [{pkg: qt/5.12.6}]}}",
        )
        .unwrap();
        assert_eq!(spec.install.embedded.len(), 1);

        let res = Spec::from_yaml(
            "{pkg: maya/2020.0, install: {embedded: [{pkg: maya/2020.0}]}}",
        );
        assert!(res.is_err(), "a package cannot embed itself");

        let res = Spec::from_yaml(
            "{pkg: maya/2020.0, install: {embedded: [{pkg: qt/5.12.6/src}]}}",
        );
        assert!(res.is_err(), "embedded builds cannot be source packages");
    }
}
