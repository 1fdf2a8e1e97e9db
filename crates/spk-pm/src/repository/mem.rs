//! An in-memory repository, mostly useful for testing

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use spk_version::Version;

use crate::ident::{Build, Ident};
use crate::spec::Spec;
use crate::{Error, Result};

use super::{ComponentMap, Repository};

#[derive(Default)]
struct Inner {
    /// version-level recipes: name -> version -> spec
    specs: BTreeMap<String, BTreeMap<Version, Arc<Spec>>>,
    /// published builds: name -> version -> build -> (spec, components)
    packages: BTreeMap<String, BTreeMap<Version, BTreeMap<Build, (Arc<Spec>, ComponentMap)>>>,
}

/// A repository that lives entirely in memory.
pub struct MemRepository {
    name: String,
    inner: RwLock<Inner>,
}

impl MemRepository {
    pub fn new(name: impl Into<String>) -> MemRepository {
        MemRepository {
            name: name.into(),
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl Default for MemRepository {
    fn default() -> Self {
        MemRepository::new("mem")
    }
}

impl Repository for MemRepository {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_packages(&self) -> Result<Vec<String>> {
        let inner = self.inner.read().unwrap();
        let mut names: Vec<_> = inner.specs.keys().cloned().collect();
        names.extend(inner.packages.keys().cloned());
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn list_package_versions(&self, name: &str) -> Result<Vec<Version>> {
        let inner = self.inner.read().unwrap();
        let mut versions: Vec<_> = inner
            .specs
            .get(name)
            .map(|versions| versions.keys().cloned().collect())
            .unwrap_or_default();
        if let Some(builds) = inner.packages.get(name) {
            versions.extend(builds.keys().cloned());
        }
        versions.sort();
        versions.dedup();
        Ok(versions)
    }

    fn list_package_builds(&self, name: &str, version: &Version) -> Result<Vec<Ident>> {
        let inner = self.inner.read().unwrap();
        let builds = inner
            .packages
            .get(name)
            .and_then(|versions| versions.get(version));
        Ok(builds
            .map(|builds| {
                builds
                    .keys()
                    .map(|build| {
                        Ident::new(name)
                            .with_version(version.clone())
                            .with_build(Some(build.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn read_spec(&self, pkg: &Ident) -> Result<Arc<Spec>> {
        let inner = self.inner.read().unwrap();
        match &pkg.build {
            None => inner
                .specs
                .get(&pkg.name)
                .and_then(|versions| versions.get(&pkg.version))
                .cloned()
                .ok_or_else(|| Error::PackageNotFound(pkg.to_string())),
            Some(build) => inner
                .packages
                .get(&pkg.name)
                .and_then(|versions| versions.get(&pkg.version))
                .and_then(|builds| builds.get(build))
                .map(|(spec, _)| spec.clone())
                .ok_or_else(|| Error::PackageNotFound(pkg.to_string())),
        }
    }

    fn get_package(&self, pkg: &Ident) -> Result<ComponentMap> {
        let build = pkg
            .build
            .as_ref()
            .ok_or_else(|| Error::Repository(format!("{pkg} does not identify a build")))?;
        let inner = self.inner.read().unwrap();
        inner
            .packages
            .get(&pkg.name)
            .and_then(|versions| versions.get(&pkg.version))
            .and_then(|builds| builds.get(build))
            .map(|(_, components)| components.clone())
            .ok_or_else(|| Error::PackageNotFound(pkg.to_string()))
    }

    fn publish_spec(&self, spec: &Spec) -> Result<()> {
        if spec.pkg.build.is_some() {
            return Err(Error::Repository(format!(
                "cannot publish a build {} as a version recipe",
                spec.pkg
            )));
        }
        let mut inner = self.inner.write().unwrap();
        let versions = inner.specs.entry(spec.pkg.name.clone()).or_default();
        if versions.contains_key(&spec.pkg.version) {
            return Err(Error::Repository(format!(
                "package version already exists: {}",
                spec.pkg
            )));
        }
        versions.insert(spec.pkg.version.clone(), Arc::new(spec.clone()));
        Ok(())
    }

    fn force_publish_spec(&self, spec: &Spec) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner
            .specs
            .entry(spec.pkg.name.clone())
            .or_default()
            .insert(spec.pkg.version.clone(), Arc::new(spec.clone()));
        Ok(())
    }

    fn publish_package(&self, spec: &Spec, components: ComponentMap) -> Result<()> {
        let build = spec
            .pkg
            .build
            .clone()
            .ok_or_else(|| Error::Repository(format!("{} does not identify a build", spec.pkg)))?;
        let mut inner = self.inner.write().unwrap();
        inner
            .packages
            .entry(spec.pkg.name.clone())
            .or_default()
            .entry(spec.pkg.version.clone())
            .or_default()
            .insert(build, (Arc::new(spec.clone()), components));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::parse_ident;
    use crate::repository::Digest;

    fn build_spec(ident: &str) -> Spec {
        Spec::from_yaml(format!("{{pkg: {ident}}}")).unwrap()
    }

    #[test]
    fn test_publish_and_list() {
        let repo = MemRepository::default();
        let spec = build_spec("my-pkg/1.0.0/BGSHW3CN");
        repo.publish_package(
            &spec,
            [("run".to_string(), Digest::from("abc123"))].into(),
        )
        .unwrap();

        assert_eq!(repo.list_packages().unwrap(), vec!["my-pkg".to_string()]);
        let versions = repo.list_package_versions("my-pkg").unwrap();
        assert_eq!(versions.len(), 1);
        let builds = repo.list_package_builds("my-pkg", &versions[0]).unwrap();
        assert_eq!(builds.len(), 1);
        assert_eq!(builds[0].to_string(), "my-pkg/1.0.0/BGSHW3CN");

        let components = repo.get_package(&builds[0]).unwrap();
        assert_eq!(components.get("run"), Some(&Digest::from("abc123")));
    }

    #[test]
    fn test_publish_spec_twice_fails() {
        let repo = MemRepository::default();
        let spec = build_spec("my-pkg/1.0.0");
        repo.publish_spec(&spec).unwrap();
        assert!(repo.publish_spec(&spec).is_err());
        repo.force_publish_spec(&spec).unwrap();
    }

    #[test]
    fn test_read_spec_missing() {
        let repo = MemRepository::default();
        let pkg = parse_ident("nothing/1.0.0").unwrap();
        match repo.read_spec(&pkg) {
            Err(Error::PackageNotFound(_)) => (),
            other => panic!("expected package not found, got {other:?}"),
        }
    }
}
