// Repository interface - read and publish package specs and builds

mod mem;

pub use mem::MemRepository;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use spk_version::Version;

use crate::ident::Ident;
use crate::spec::Spec;
use crate::Result;

/// An opaque content-addressed identifier for a stored layer.
///
/// The solver never dereferences these; a separate runtime renders
/// them into a filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    pub fn new(digest: impl Into<String>) -> Digest {
        Digest(digest.into())
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Digest {
    fn from(digest: &str) -> Digest {
        Digest::new(digest)
    }
}

impl From<String> for Digest {
    fn from(digest: String) -> Digest {
        Digest(digest)
    }
}

/// The published components of one package build, eg `run`, `build`.
pub type ComponentMap = HashMap<String, Digest>;

/// A source of package specs and built packages.
///
/// One live solver references a repository exclusively at a time, so
/// implementations only need to be read-safe across solvers.
pub trait Repository: Send + Sync {
    /// A name which identifies this repository to humans.
    fn name(&self) -> &str;

    /// The set of package names known to this repository.
    fn list_packages(&self) -> Result<Vec<String>>;

    /// The set of versions available for the named package.
    fn list_package_versions(&self, name: &str) -> Result<Vec<Version>>;

    /// The set of builds published for the given package version.
    fn list_package_builds(&self, name: &str, version: &Version) -> Result<Vec<Ident>>;

    /// Read the spec for the given package.
    ///
    /// With no build, this is the version-level recipe that new
    /// builds would be created from. With a build, it is the spec of
    /// that concrete build.
    fn read_spec(&self, pkg: &Ident) -> Result<Arc<Spec>>;

    /// The layer digests for each published component of a build.
    fn get_package(&self, pkg: &Ident) -> Result<ComponentMap>;

    /// True if the identified build has been deprecated.
    fn is_deprecated(&self, pkg: &Ident) -> Result<bool> {
        Ok(self.read_spec(pkg)?.deprecated)
    }

    /// Publish the version-level recipe for a package.
    ///
    /// Fails if a recipe already exists at this version.
    fn publish_spec(&self, spec: &Spec) -> Result<()>;

    /// Publish the version-level recipe, replacing any existing one.
    fn force_publish_spec(&self, spec: &Spec) -> Result<()>;

    /// Publish a concrete build along with its component layers.
    fn publish_package(&self, spec: &Spec, components: ComponentMap) -> Result<()>;
}
