//! The result of a completed solve

use std::sync::Arc;

use indexmap::IndexMap;

use crate::ident::Ident;
use crate::option_map::OptionMap;
use crate::repository::{ComponentMap, Repository};
use crate::request::PkgRequest;
use crate::spec::Spec;

/// Where a resolved package comes from.
#[derive(Clone)]
pub enum PackageSource {
    /// An existing binary build in a repository.
    Repository {
        repo: Arc<dyn Repository>,
        components: ComponentMap,
    },
    /// The package must be built from source in the recorded
    /// environment.
    BuildFromSource {
        recipe: Arc<Spec>,
        build_env: Box<Solution>,
    },
    /// The package is provided by another resolved package.
    Embedded { parent: Ident },
}

impl PackageSource {
    pub fn is_build_from_source(&self) -> bool {
        matches!(self, PackageSource::BuildFromSource { .. })
    }

    /// A short stable label for logs and state fingerprints.
    pub fn label(&self) -> String {
        match self {
            PackageSource::Repository { repo, .. } => format!("repo={}", repo.name()),
            PackageSource::BuildFromSource { .. } => "source-build".to_string(),
            PackageSource::Embedded { parent } => format!("embedded-in={parent}"),
        }
    }
}

impl std::fmt::Debug for PackageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

/// One entry in a solution: the request, the spec that satisfies it,
/// and where the package comes from.
#[derive(Debug, Clone)]
pub struct SolvedRequest {
    pub request: PkgRequest,
    pub spec: Arc<Spec>,
    pub source: PackageSource,
}

impl SolvedRequest {
    pub fn is_source_build(&self) -> bool {
        self.source.is_build_from_source()
    }
}

/// An ordered set of resolved packages and the options that selected
/// them. Each package name appears at most once.
#[derive(Debug, Default, Clone)]
pub struct Solution {
    options: OptionMap,
    resolved: IndexMap<String, SolvedRequest>,
}

impl Solution {
    pub fn new(options: OptionMap) -> Solution {
        Solution {
            options,
            resolved: IndexMap::new(),
        }
    }

    pub fn add(&mut self, request: PkgRequest, spec: Arc<Spec>, source: PackageSource) {
        self.resolved.insert(
            spec.pkg.name.clone(),
            SolvedRequest {
                request,
                spec,
                source,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&SolvedRequest> {
        self.resolved.get(name)
    }

    /// The resolved packages, in resolution order.
    pub fn items(&self) -> impl Iterator<Item = &SolvedRequest> {
        self.resolved.values()
    }

    pub fn options(&self) -> &OptionMap {
        &self.options
    }

    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }

    /// The distinct repositories that packages were resolved from,
    /// in resolution order.
    pub fn repositories(&self) -> Vec<Arc<dyn Repository>> {
        let mut seen = Vec::new();
        let mut repos: Vec<Arc<dyn Repository>> = Vec::new();
        for solved in self.resolved.values() {
            if let PackageSource::Repository { repo, .. } = &solved.source {
                if !seen.contains(&repo.name().to_string()) {
                    seen.push(repo.name().to_string());
                    repos.push(repo.clone());
                }
            }
        }
        repos
    }

    /// Project this solution onto process environment variables.
    ///
    /// Entries are emitted in resolution order so later packages
    /// shadow earlier ones.
    pub fn to_environment<I>(&self, base: I) -> IndexMap<String, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut env: IndexMap<String, String> = base.into_iter().collect();
        env.insert("SPK_ACTIVE_PREFIX".to_string(), "/spfs".to_string());
        for solved in self.resolved.values() {
            let pkg = &solved.spec.pkg;
            let name = pkg.name.to_uppercase().replace('-', "_");
            let version = pkg.version.to_string();
            env.insert(format!("SPK_PKG_{name}"), version.clone());
            env.insert(format!("SPK_PKG_{name}_VERSION"), version);
            env.insert(
                format!("SPK_PKG_{name}_BUILD"),
                pkg.build
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
            );
            env.insert(
                format!("SPK_PKG_{name}_VERSION_MAJOR"),
                pkg.version.major().to_string(),
            );
            env.insert(
                format!("SPK_PKG_{name}_VERSION_MINOR"),
                pkg.version.minor().to_string(),
            );
            env.insert(
                format!("SPK_PKG_{name}_VERSION_PATCH"),
                pkg.version.patch().to_string(),
            );
        }
        env
    }
}

impl std::fmt::Display for Solution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "options: {}", self.options)?;
        for solved in self.resolved.values() {
            write!(f, "  {}", solved.spec.pkg)?;
            if solved.is_source_build() {
                write!(f, " [build from source]")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
