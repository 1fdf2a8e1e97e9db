// The dependency solver: states, decisions and the search runtime

mod graph;
mod solution;
mod solver;
pub mod validation;

pub use graph::{
    Change, Decision, Edge, Graph, Node, NodeId, Note, RequestPackage, RequestVar, ResolvePackage,
    SetOptions, State, StepBack, ROOT,
};
pub use solution::{PackageSource, SolvedRequest, Solution};
pub use solver::{Solver, SolverRuntime};
