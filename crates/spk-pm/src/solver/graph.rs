//! Solver states, changes, decisions and the decision graph

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::ident::Ident;
use crate::option_map::OptionMap;
use crate::request::{InclusionPolicy, PkgRequest, VarRequest};
use crate::spec::Spec;
use crate::{Error, Result};

use super::solution::{PackageSource, Solution};

/// An immutable snapshot of solver progress.
///
/// States are only created from the default (empty) root by applying
/// decisions; every constructor recomputes the content fingerprint.
#[derive(Debug, Clone)]
pub struct State {
    /// unresolved package requests, in insertion order, merged by name
    pkg_requests: Vec<PkgRequest>,
    var_requests: Vec<VarRequest>,
    options: OptionMap,
    /// option keys frozen by a resolved build
    static_options: BTreeSet<String>,
    /// resolved packages in resolution order
    packages: Vec<(PkgRequest, Arc<Spec>, PackageSource)>,
    id: u64,
}

impl Default for State {
    fn default() -> Self {
        let mut state = State {
            pkg_requests: Vec::new(),
            var_requests: Vec::new(),
            options: OptionMap::default(),
            static_options: BTreeSet::new(),
            packages: Vec::new(),
            id: 0,
        };
        state.recompute_id();
        state
    }
}

impl State {
    /// A stable fingerprint of the state contents.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pkg_requests(&self) -> &[PkgRequest] {
        &self.pkg_requests
    }

    pub fn var_requests(&self) -> &[VarRequest] {
        &self.var_requests
    }

    pub fn options(&self) -> &OptionMap {
        &self.options
    }

    pub fn packages(&self) -> &[(PkgRequest, Arc<Spec>, PackageSource)] {
        &self.packages
    }

    /// The merged request for the named package, if still unresolved.
    pub fn get_merged_request(&self, name: &str) -> Option<&PkgRequest> {
        self.pkg_requests.iter().find(|r| r.pkg.name == name)
    }

    /// The resolved entry for the named package, if any.
    pub fn get_current_resolve(
        &self,
        name: &str,
    ) -> Option<&(PkgRequest, Arc<Spec>, PackageSource)> {
        self.packages.iter().find(|(_, spec, _)| spec.pkg.name == name)
    }

    /// The next package request that must be resolved, in insertion
    /// order. Requests that only apply if already present never
    /// drive resolution.
    pub fn get_next_request(&self) -> Option<PkgRequest> {
        self.pkg_requests
            .iter()
            .find(|r| r.inclusion_policy == InclusionPolicy::Always)
            .cloned()
    }

    fn recompute_id(&mut self) {
        let mut hasher = DefaultHasher::new();

        // unresolved requests and var requests hash as multisets
        let mut request_hashes: Vec<u64> = self
            .pkg_requests
            .iter()
            .map(|r| {
                let mut h = DefaultHasher::new();
                r.hash(&mut h);
                h.finish()
            })
            .collect();
        request_hashes.sort_unstable();
        request_hashes.hash(&mut hasher);

        let mut var_hashes: Vec<u64> = self
            .var_requests
            .iter()
            .map(|r| {
                let mut h = DefaultHasher::new();
                r.hash(&mut h);
                h.finish()
            })
            .collect();
        var_hashes.sort_unstable();
        var_hashes.hash(&mut hasher);

        self.options.hash(&mut hasher);
        self.static_options.hash(&mut hasher);

        for (request, spec, source) in &self.packages {
            request.hash(&mut hasher);
            spec.pkg.hash(&mut hasher);
            source.label().hash(&mut hasher);
        }

        self.id = hasher.finish();
    }
}

/// A single change that can be applied between two states.
#[derive(Debug, Clone)]
pub enum Change {
    RequestPackage(RequestPackage),
    RequestVar(RequestVar),
    SetOptions(SetOptions),
    ResolvePackage(ResolvePackage),
    StepBack(StepBack),
}

impl Change {
    pub fn apply(&self, base: &State) -> Result<State> {
        match self {
            Change::RequestPackage(change) => change.apply(base),
            Change::RequestVar(change) => change.apply(base),
            Change::SetOptions(change) => change.apply(base),
            Change::ResolvePackage(change) => change.apply(base),
            Change::StepBack(_) => Ok(base.clone()),
        }
    }
}

impl std::fmt::Display for Change {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Change::RequestPackage(c) => write!(f, "REQUEST {}", c.request),
            Change::RequestVar(c) => write!(f, "REQUEST {}", c.request),
            Change::SetOptions(c) => write!(f, "ASSIGN {}", c.options),
            Change::ResolvePackage(c) => write!(f, "RESOLVE {}", c.spec.pkg),
            Change::StepBack(c) => write!(f, "BLOCKED {}", c.cause),
        }
    }
}

/// Add a package request, merging with any existing request for the
/// same package.
#[derive(Debug, Clone)]
pub struct RequestPackage {
    pub request: PkgRequest,
}

impl RequestPackage {
    pub fn new(request: PkgRequest) -> Change {
        Change::RequestPackage(RequestPackage { request })
    }

    fn apply(&self, base: &State) -> Result<State> {
        let mut state = base.clone();
        let name = &self.request.pkg.name;

        // a request for an already-resolved package is either
        // satisfied by that package or a dead end
        if let Some((_, spec, _)) = base.get_current_resolve(name) {
            let compat = self.request.is_satisfied_by(spec);
            if compat.is_ok() {
                return Ok(state);
            }
            return Err(Error::ConflictingRequests {
                name: name.clone(),
                reason: format!("already resolved as {}: {compat}", spec.pkg),
            });
        }

        match state.pkg_requests.iter_mut().find(|r| r.pkg.name == *name) {
            Some(existing) => existing.restrict(&self.request)?,
            None => state.pkg_requests.push(self.request.clone()),
        }
        state.recompute_id();
        Ok(state)
    }
}

/// Add a variable request; a conflicting binding for the same
/// variable aborts the decision.
#[derive(Debug, Clone)]
pub struct RequestVar {
    pub request: VarRequest,
}

impl RequestVar {
    pub fn new(request: VarRequest) -> Change {
        Change::RequestVar(RequestVar { request })
    }

    fn apply(&self, base: &State) -> Result<State> {
        for existing in &base.var_requests {
            if existing.var != self.request.var {
                continue;
            }
            if existing.value == self.request.value {
                return Ok(base.clone());
            }
            return Err(Error::ConflictingRequests {
                name: self.request.var.clone(),
                reason: format!(
                    "conflicting values: {} != {}",
                    existing.value, self.request.value
                ),
            });
        }
        let mut state = base.clone();
        state.var_requests.push(self.request.clone());
        state.recompute_id();
        Ok(state)
    }
}

/// Merge values into the state's options.
#[derive(Debug, Clone)]
pub struct SetOptions {
    pub options: OptionMap,
}

impl SetOptions {
    pub fn new(options: OptionMap) -> Change {
        Change::SetOptions(SetOptions { options })
    }

    fn apply(&self, base: &State) -> Result<State> {
        let mut state = base.clone();
        for (name, value) in self.options.iter() {
            if state.static_options.contains(name) {
                // a frozen option can be bound once but never changed
                match state.options.get(name) {
                    Some(existing) if existing != value => {
                        return Err(Error::ConflictingRequests {
                            name: name.clone(),
                            reason: format!(
                                "option is static at {existing} and cannot become {value}"
                            ),
                        })
                    }
                    _ => (),
                }
            }
            state.options.insert(name.clone(), value.clone());
        }
        state.recompute_id();
        Ok(state)
    }
}

/// Mark a requested package as resolved.
#[derive(Debug, Clone)]
pub struct ResolvePackage {
    pub request: PkgRequest,
    pub spec: Arc<Spec>,
    pub source: PackageSource,
}

impl ResolvePackage {
    pub fn new(request: PkgRequest, spec: Arc<Spec>, source: PackageSource) -> Change {
        Change::ResolvePackage(ResolvePackage {
            request,
            spec,
            source,
        })
    }

    fn apply(&self, base: &State) -> Result<State> {
        let mut state = base.clone();
        let name = &self.spec.pkg.name;
        let position = state.pkg_requests.iter().position(|r| r.pkg.name == *name);
        match position {
            Some(position) => {
                state.pkg_requests.remove(position);
            }
            None => {
                return Err(Error::ConflictingRequests {
                    name: name.clone(),
                    reason: "cannot resolve an unrequested package".to_string(),
                })
            }
        }

        // option values frozen into the build cannot change anymore
        for opt in &self.spec.build.options {
            let is_static = match opt {
                crate::spec::Opt::Var(o) => o.static_value.is_some(),
                crate::spec::Opt::Pkg(o) => o.static_value.is_some(),
            };
            if is_static {
                state
                    .static_options
                    .insert(format!("{name}.{}", opt.name()));
            }
        }

        state
            .packages
            .push((self.request.clone(), self.spec.clone(), self.source.clone()));
        state.recompute_id();
        Ok(state)
    }
}

/// A sentinel recording why the solver stepped back; applies no
/// state change.
#[derive(Debug, Clone)]
pub struct StepBack {
    pub cause: String,
}

impl StepBack {
    pub fn new(cause: impl Into<String>) -> Change {
        Change::StepBack(StepBack {
            cause: cause.into(),
        })
    }
}

/// Diagnostic notes attached to a decision.
#[derive(Debug, Clone)]
pub enum Note {
    SkipPackageBuild { pkg: Ident, reason: String },
    Other(String),
}

impl Note {
    pub fn skip(pkg: Ident, reason: impl Into<String>) -> Note {
        Note::SkipPackageBuild {
            pkg,
            reason: reason.into(),
        }
    }

    /// The package name this note concerns, when there is one.
    pub fn pkg_name(&self) -> Option<&str> {
        match self {
            Note::SkipPackageBuild { pkg, .. } => Some(&pkg.name),
            Note::Other(_) => None,
        }
    }
}

impl std::fmt::Display for Note {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Note::SkipPackageBuild { pkg, reason } => write!(f, "TRY {pkg} - {reason}"),
            Note::Other(message) => f.write_str(message),
        }
    }
}

/// An ordered list of changes that are applied atomically, plus any
/// notes explaining the choice.
#[derive(Debug, Clone)]
pub struct Decision {
    pub changes: Vec<Change>,
    pub notes: Vec<Note>,
}

impl Decision {
    pub fn new(changes: Vec<Change>) -> Decision {
        Decision {
            changes,
            notes: Vec::new(),
        }
    }

    pub fn with_notes(mut self, notes: impl IntoIterator<Item = Note>) -> Decision {
        self.notes.extend(notes);
        self
    }

    /// Apply all changes in order to produce a new state.
    pub fn apply(&self, base: &State) -> Result<State> {
        let mut state = base.clone();
        for change in &self.changes {
            state = change.apply(&state)?;
        }
        Ok(state)
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rendered = self
            .changes
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        f.write_str(&rendered)
    }
}

pub type NodeId = usize;

/// A node in the decision graph.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub state: Arc<State>,
    pub parent: Option<NodeId>,
    pub edges: Vec<Edge>,
}

/// An edge in the decision graph: the decision that led from one
/// state to another.
#[derive(Debug, Clone)]
pub struct Edge {
    pub decision: Decision,
    pub to: NodeId,
}

/// The graph of all states visited during a solve.
///
/// Nodes live in an arena addressed by integer handles and are
/// deduplicated by state fingerprint. The single root is the default
/// (empty) state.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<Node>,
    index: HashMap<u64, NodeId>,
}

pub const ROOT: NodeId = 0;

impl Default for Graph {
    fn default() -> Self {
        Graph::new()
    }
}

impl Graph {
    pub fn new() -> Graph {
        let root_state = Arc::new(State::default());
        let mut index = HashMap::new();
        index.insert(root_state.id(), ROOT);
        Graph {
            nodes: vec![Node {
                id: ROOT,
                state: root_state,
                parent: None,
                edges: Vec::new(),
            }],
            index,
        }
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn root(&self) -> &Node {
        &self.nodes[ROOT]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add the given state to the graph, returning the existing node
    /// when one with the same fingerprint was already visited.
    pub fn add_state(&mut self, parent: NodeId, state: State) -> NodeId {
        if let Some(id) = self.index.get(&state.id()) {
            return *id;
        }
        let id = self.nodes.len();
        self.index.insert(state.id(), id);
        self.nodes.push(Node {
            id,
            state: Arc::new(state),
            parent: Some(parent),
            edges: Vec::new(),
        });
        id
    }

    pub fn add_edge(&mut self, from: NodeId, decision: Decision, to: NodeId) {
        self.nodes[from].edges.push(Edge { decision, to });
    }

    /// A deterministic rendering of every edge, in visit order.
    pub fn walk(&self) -> Vec<String> {
        let mut rendered = Vec::new();
        let mut stack = vec![ROOT];
        let mut seen = std::collections::HashSet::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            for edge in &self.nodes[id].edges {
                rendered.push(format!("{:016x} -> {:016x}: {}", self.nodes[id].state.id(), self.nodes[edge.to].state.id(), edge.decision));
                stack.push(edge.to);
            }
        }
        rendered
    }
}
