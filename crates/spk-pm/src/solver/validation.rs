//! Candidate validation against the current solver state

use spk_version::{Compatibility, COMPATIBLE};

use crate::option_map::OptionMap;
use crate::request::Request;
use crate::spec::Spec;

use super::graph::State;

/// A single check that a candidate spec must pass before it can be
/// resolved into a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validator {
    Deprecation,
    Options,
    VarRequirements,
    PkgRequirements,
    EmbeddedPackages,
}

/// The set of validators run against every candidate.
pub fn default_validators() -> Vec<Validator> {
    vec![
        Validator::Deprecation,
        Validator::Options,
        Validator::VarRequirements,
        Validator::PkgRequirements,
        Validator::EmbeddedPackages,
    ]
}

impl Validator {
    /// Check one candidate against the state. `given` is the composed
    /// option input: var requests overlaid by bound state options and
    /// explicit user options.
    pub fn validate(&self, state: &State, spec: &Spec, given: &OptionMap) -> Compatibility {
        match self {
            Validator::Deprecation => validate_deprecation(state, spec),
            Validator::Options => spec.build.validate_options(&spec.pkg.name, given),
            Validator::VarRequirements => validate_var_requirements(state, spec, given),
            Validator::PkgRequirements => validate_pkg_requirements(state, spec),
            Validator::EmbeddedPackages => validate_embedded_packages(state, spec),
        }
    }
}

/// Run all default validators, stopping at the first failure.
pub fn validate(state: &State, spec: &Spec, given: &OptionMap) -> Compatibility {
    for validator in default_validators() {
        let compat = validator.validate(state, spec, given);
        if !compat.is_ok() {
            return compat;
        }
    }
    COMPATIBLE
}

fn validate_deprecation(state: &State, spec: &Spec) -> Compatibility {
    if !spec.deprecated {
        return COMPATIBLE;
    }
    if let Some(request) = state.get_merged_request(&spec.pkg.name) {
        if request.pkg.build.is_some() && request.pkg.build == spec.pkg.build {
            return COMPATIBLE;
        }
    }
    Compatibility::incompatible("build is deprecated and was not specifically requested")
}

fn validate_var_requirements(state: &State, spec: &Spec, given: &OptionMap) -> Compatibility {
    for request in state.var_requests() {
        if request.value.is_empty() {
            continue;
        }
        let option = match request.namespace() {
            Some(ns) if ns == spec.pkg.name => match spec.build.opt(request.base_name()) {
                Some(option) => option,
                None => {
                    return Compatibility::incompatible(format!(
                        "package does not define option {} requested as {request}",
                        request.base_name()
                    ))
                }
            },
            // a global variable only constrains packages that
            // declare an option by that name
            None => match spec.build.opt(&request.var) {
                Some(option) => option,
                None => continue,
            },
            Some(_) => continue,
        };

        let value = given.package_value(&spec.pkg.name, option.name());
        let resolved = option.get_value(value.map(String::as_str));
        if resolved != request.value {
            return Compatibility::incompatible(format!(
                "option {} resolves to {resolved}, but {} is required",
                option.name(),
                request.value
            ));
        }
    }
    COMPATIBLE
}

fn validate_pkg_requirements(state: &State, spec: &Spec) -> Compatibility {
    for request in &spec.install.requirements {
        let request = match request {
            Request::Pkg(request) => request,
            Request::Var(_) => continue,
        };
        if request.pin.is_some() {
            // unrendered pins bind at build time, not at solve time
            continue;
        }

        if let Some((_, resolved, _)) = state.get_current_resolve(&request.pkg.name) {
            let compat = request.is_satisfied_by(resolved);
            if !compat.is_ok() {
                return Compatibility::incompatible(format!(
                    "requirement {request} is not satisfied by resolved {}: {compat}",
                    resolved.pkg
                ));
            }
            continue;
        }
        if let Some(pending) = state.get_merged_request(&request.pkg.name) {
            let mut merged = pending.clone();
            if let Err(err) = merged.restrict(request) {
                return Compatibility::incompatible(format!(
                    "requirement {request} conflicts with pending request {pending}: {err}"
                ));
            }
        }
    }
    COMPATIBLE
}

fn validate_embedded_packages(state: &State, spec: &Spec) -> Compatibility {
    for embedded in &spec.install.embedded {
        if let Some((_, resolved, _)) = state.get_current_resolve(&embedded.pkg.name) {
            return Compatibility::incompatible(format!(
                "embedded package {} conflicts with already resolved {}",
                embedded.pkg, resolved.pkg
            ));
        }
        if let Some(pending) = state.get_merged_request(&embedded.pkg.name) {
            let applicable = pending.is_version_applicable(&embedded.pkg.version);
            if !applicable.is_ok() {
                return Compatibility::incompatible(format!(
                    "embedded package {} does not satisfy pending request {pending}: {applicable}",
                    embedded.pkg
                ));
            }
            match &pending.pkg.build {
                None => (),
                Some(build) if build.is_embedded() => (),
                Some(build) => {
                    return Compatibility::incompatible(format!(
                        "embedded package {} cannot satisfy a request for build {build}",
                        embedded.pkg
                    ))
                }
            }
        }
    }
    COMPATIBLE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{parse_request, Request as R, VarRequest};
    use crate::solver::graph::{RequestPackage, RequestVar, State};
    use crate::spec::Spec;

    fn state_with(changes: Vec<crate::solver::graph::Change>) -> State {
        let mut state = State::default();
        for change in changes {
            state = change.apply(&state).unwrap();
        }
        state
    }

    fn pkg_request(source: &str) -> crate::request::PkgRequest {
        match parse_request(source).unwrap() {
            R::Pkg(request) => request,
            other => panic!("expected a package request, got {other:?}"),
        }
    }

    #[test]
    fn test_var_requirements() {
        let spec = Spec::from_yaml(
            "{pkg: python/3.7.3, build: {options: [{var: abi, default: cp37m}]}}",
        )
        .unwrap();
        let state = state_with(vec![RequestVar::new(VarRequest::new("python.abi", "cp37m"))]);
        assert!(validate(&state, &spec, &Default::default()).is_ok());

        let state = state_with(vec![RequestVar::new(VarRequest::new("python.abi", "cp27m"))]);
        assert!(!validate(&state, &spec, &Default::default()).is_ok());

        // a request for an undeclared option can never be satisfied
        let state = state_with(vec![RequestVar::new(VarRequest::new("python.xyz", "3"))]);
        assert!(!validate(&state, &spec, &Default::default()).is_ok());

        // global variables only constrain packages declaring them
        let state = state_with(vec![RequestVar::new(VarRequest::new("debug", "on"))]);
        assert!(validate(&state, &spec, &Default::default()).is_ok());
    }

    #[test]
    fn test_pkg_requirements_against_pending() {
        let spec = Spec::from_yaml(
            "{pkg: app/1.0.0, install: {requirements: [{pkg: lib/=1.1}]}}",
        )
        .unwrap();
        let state = state_with(vec![RequestPackage::new(pkg_request("lib/1.0"))]);
        assert!(validate(&state, &spec, &Default::default()).is_ok());

        let state = state_with(vec![RequestPackage::new(pkg_request("lib/=1.2"))]);
        assert!(!validate(&state, &spec, &Default::default()).is_ok());
    }

    #[test]
    fn test_deprecation() {
        let spec = Spec::from_yaml("{pkg: old/1.0.0/BGSHW3CN, deprecated: true}").unwrap();
        let state = state_with(vec![RequestPackage::new(pkg_request("old"))]);
        assert!(!validate(&state, &spec, &Default::default()).is_ok());

        let state = state_with(vec![RequestPackage::new(pkg_request("old/=1.0.0/BGSHW3CN"))]);
        assert!(validate(&state, &spec, &Default::default()).is_ok());
    }
}
