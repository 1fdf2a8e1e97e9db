//! Package specs, repositories and the dependency solver for the
//! spfs package manager.
//!
//! Given a set of requests, a set of repositories and the options in
//! play, [`Solver`] produces a consistent environment: an ordered
//! list of concrete package builds together with the effective
//! option map.

pub mod error;
pub mod ident;
pub mod option_map;
pub mod repository;
pub mod request;
pub mod solver;
pub mod spec;

pub use error::{Error, Result};
pub use ident::{parse_build, parse_ident, validate_name, Build, Ident};
pub use option_map::{host_options, OptionMap, DIGEST_SIZE};
pub use repository::{ComponentMap, Digest, MemRepository, Repository};
pub use request::{
    parse_ident_range, parse_request, InclusionPolicy, PkgRequest, PreReleasePolicy, RangeIdent,
    Request, VarRequest,
};
pub use solver::{
    Decision, Graph, Note, PackageSource, SolvedRequest, Solution, Solver, SolverRuntime, State,
};
pub use spec::{read_spec_file, save_spec_file, BuildSpec, InstallSpec, Spec, TestSpec};
