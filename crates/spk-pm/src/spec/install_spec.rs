//! Runtime requirements and embedded packages

use serde::{Deserialize, Serialize};

use crate::ident::{Build, Ident};
use crate::option_map::OptionMap;
use crate::request::Request;
use crate::{Error, Result};

use super::Spec;

/// What a package carries into any environment it is installed in.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstallSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requirements: Vec<Request>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedded: Vec<Spec>,
}

impl InstallSpec {
    pub fn is_default(&self) -> bool {
        self.requirements.is_empty() && self.embedded.is_empty()
    }

    /// Render any `fromBuildEnv` requirements against the resolved
    /// build environment.
    ///
    /// This happens when a binary build is published: the recipe's
    /// pinned requirements become concrete ranges derived from
    /// whatever the build actually ran against.
    pub fn render_all_pins<'a>(
        &mut self,
        options: &OptionMap,
        resolved: impl Iterator<Item = &'a Ident> + Clone,
    ) -> Result<()> {
        for request in self.requirements.iter_mut() {
            match request {
                Request::Pkg(request) if request.pin.is_some() => {
                    let pkg = resolved
                        .clone()
                        .find(|ident| ident.name == request.pkg.name)
                        .ok_or_else(|| {
                            Error::Validation(format!(
                                "fromBuildEnv request for {} is not present in the build environment",
                                request.pkg.name
                            ))
                        })?;
                    *request = request.render_pin(pkg)?;
                }
                Request::Var(request) if request.pin => {
                    let value = options.get(&request.var).or_else(|| {
                        options.get(request.base_name())
                    });
                    let value = value.cloned().unwrap_or_default();
                    *request = request.render_pin(value)?;
                }
                _ => (),
            }
        }
        Ok(())
    }
}

/// Check the embedded packages of a spec, marking their builds.
pub(super) fn validate_embedded(parent: &Ident, embedded: &[Spec]) -> Result<()> {
    for spec in embedded {
        match &spec.pkg.build {
            None | Some(Build::Embedded) => (),
            Some(build) => {
                return Err(Error::Validation(format!(
                    "embedded package {} cannot have build {build}",
                    spec.pkg
                )))
            }
        }
        if spec.pkg.name == parent.name {
            return Err(Error::Validation(format!(
                "package {} cannot embed itself",
                parent.name
            )));
        }
        if !spec.install.embedded.is_empty() {
            return Err(Error::Validation(format!(
                "embedded package {} cannot itself embed packages",
                spec.pkg
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::parse_ident;

    #[test]
    fn test_render_all_pins() {
        let mut install: InstallSpec = serde_yaml::from_str(
            "{requirements: [{pkg: python, fromBuildEnv: x.x}, {var: abi, fromBuildEnv: true}]}",
        )
        .unwrap();
        let resolved = vec![parse_ident("python/3.7.3").unwrap()];
        let options: OptionMap = [("abi".to_string(), "cp37m".to_string())].into_iter().collect();

        install
            .render_all_pins(&options, resolved.iter())
            .unwrap();

        match &install.requirements[0] {
            Request::Pkg(req) => assert_eq!(req.pkg.version.to_string(), "3.7"),
            other => panic!("expected a package request, got {other:?}"),
        }
        match &install.requirements[1] {
            Request::Var(req) => assert_eq!(req.value, "cp37m"),
            other => panic!("expected a var request, got {other:?}"),
        }
    }

    #[test]
    fn test_render_pin_missing_package() {
        let mut install: InstallSpec =
            serde_yaml::from_str("{requirements: [{pkg: python, fromBuildEnv: x.x}]}").unwrap();
        let resolved: Vec<Ident> = Vec::new();
        let res = install.render_all_pins(&OptionMap::default(), resolved.iter());
        assert!(res.is_err());
    }
}
