//! The depth-first backtracking solver

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use spk_version::Version;

use crate::ident::{Build, Ident};
use crate::option_map::OptionMap;
use crate::repository::Repository;
use crate::request::{PkgRequest, Request, VarRequest};
use crate::spec::{Inheritance, Opt, Spec};
use crate::{Error, Result};

use super::graph::{
    Decision, Graph, NodeId, Note, RequestPackage, RequestVar, ResolvePackage, SetOptions, State,
    StepBack, ROOT,
};
use super::solution::{PackageSource, Solution};
use super::validation;

/// How many build environments may be nested when packages are built
/// from source recursively.
const MAX_BUILD_ENV_DEPTH: usize = 16;

/// How many failure notes are kept per package when stepping back.
const MAX_NOTES_PER_PACKAGE: usize = 5;

/// Resolves a set of requests against the registered repositories.
#[derive(Default, Clone)]
pub struct Solver {
    repos: Vec<Arc<dyn Repository>>,
    requests: Vec<Request>,
    options: OptionMap,
}

impl Solver {
    pub fn new() -> Solver {
        Solver::default()
    }

    /// Add a repository where the solver can get packages.
    ///
    /// Repositories are queried in registration order; the first one
    /// to provide a build wins on collision.
    pub fn add_repository(&mut self, repo: Arc<dyn Repository>) {
        self.repos.push(repo);
    }

    /// Add additional options to solve with.
    pub fn update_options(&mut self, options: OptionMap) {
        self.options.extend(options);
    }

    /// Add a request to this solver.
    pub fn add_request(&mut self, request: impl Into<Request>) {
        self.requests.push(request.into());
    }

    /// Put this solver back into its default state, leaving
    /// registered repositories in place.
    pub fn reset(&mut self) {
        self.requests.clear();
        self.options = OptionMap::default();
    }

    /// Start a new resumable solve.
    pub fn run(&self) -> SolverRuntime {
        SolverRuntime::new(self.clone(), 0)
    }

    /// Run the solve to completion.
    pub fn solve(&self) -> Result<Solution> {
        self.run().run_to_completion()
    }
}

#[derive(Clone)]
enum CandidateSource {
    Binary { repo: Arc<dyn Repository> },
    Source,
}

/// One build that may satisfy the request being worked on.
#[derive(Clone)]
struct Candidate {
    spec: Arc<Spec>,
    source: CandidateSource,
}

/// One level of the depth-first search: the node being expanded, the
/// request chosen for it, and the candidates not yet tried.
struct Frame {
    node: NodeId,
    request: PkgRequest,
    candidates: Vec<Candidate>,
    next: usize,
    notes: Vec<Note>,
}

enum StepOutcome {
    Applied { decision: Decision, state: State },
    Skipped(Note),
}

/// A resumable, deterministic iterator over solver decisions.
///
/// Each step yields the node that was expanded and the decision
/// taken from it; the decision has already been recorded in the
/// graph. Dropping the runtime cancels the solve; the graph and the
/// best-effort current solution remain readable.
pub struct SolverRuntime {
    solver: Solver,
    graph: Graph,
    frames: Vec<Frame>,
    current: NodeId,
    started: bool,
    done: bool,
    solution: Option<Solution>,
    /// step-back causes in the order they happened
    stepbacks: Vec<String>,
    depth: usize,
    versions_cache: HashMap<(usize, String), Arc<Vec<Version>>>,
    builds_cache: HashMap<(usize, String, Version), Arc<Vec<Ident>>>,
    specs_cache: HashMap<(usize, Ident), Arc<Spec>>,
}

impl SolverRuntime {
    fn new(solver: Solver, depth: usize) -> SolverRuntime {
        SolverRuntime {
            solver,
            graph: Graph::new(),
            frames: Vec::new(),
            current: ROOT,
            started: false,
            done: false,
            solution: None,
            stepbacks: Vec::new(),
            depth,
            versions_cache: HashMap::new(),
            builds_cache: HashMap::new(),
            specs_cache: HashMap::new(),
        }
    }

    /// The graph of all states visited so far.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// The deepest node reached by the search so far.
    pub fn current_node(&self) -> &super::graph::Node {
        self.graph.node(self.current)
    }

    /// The solution, once the solve has completed successfully.
    pub fn solution(&self) -> Option<&Solution> {
        self.solution.as_ref()
    }

    /// A best-effort solution from the deepest reached state.
    pub fn current_solution(&self) -> Solution {
        build_solution(&self.graph.node(self.current).state)
    }

    /// Drive the iterator until the solve succeeds or fails.
    pub fn run_to_completion(&mut self) -> Result<Solution> {
        while let Some(step) = self.next() {
            step?;
        }
        match &self.solution {
            Some(solution) => Ok(solution.clone()),
            None => Err(Error::SolverFailed {
                reason: "solve was interrupted".to_string(),
                graph: Box::new(self.graph.clone()),
            }),
        }
    }

    /// The initial decision: bind the user's options and requests
    /// onto the empty root state.
    fn initial_decision(&self) -> Decision {
        let mut changes = Vec::new();
        if !self.solver.options.is_empty() {
            changes.push(SetOptions::new(self.solver.options.clone()));
        }
        for request in &self.solver.requests {
            match request {
                Request::Pkg(request) => changes.push(RequestPackage::new(request.clone())),
                Request::Var(request) => changes.push(RequestVar::new(request.clone())),
            }
        }
        Decision::new(changes)
    }

    fn cached_versions(&mut self, repo_idx: usize, name: &str) -> Result<Arc<Vec<Version>>> {
        let key = (repo_idx, name.to_string());
        if let Some(cached) = self.versions_cache.get(&key) {
            return Ok(cached.clone());
        }
        let versions = Arc::new(self.solver.repos[repo_idx].list_package_versions(name)?);
        self.versions_cache.insert(key, versions.clone());
        Ok(versions)
    }

    fn cached_builds(
        &mut self,
        repo_idx: usize,
        name: &str,
        version: &Version,
    ) -> Result<Arc<Vec<Ident>>> {
        let key = (repo_idx, name.to_string(), version.clone());
        if let Some(cached) = self.builds_cache.get(&key) {
            return Ok(cached.clone());
        }
        let mut builds = self.solver.repos[repo_idx].list_package_builds(name, version)?;
        builds.sort();
        let builds = Arc::new(builds);
        self.builds_cache.insert(key, builds.clone());
        Ok(builds)
    }

    fn cached_spec(&mut self, repo_idx: usize, pkg: &Ident) -> Result<Arc<Spec>> {
        let key = (repo_idx, pkg.clone());
        if let Some(cached) = self.specs_cache.get(&key) {
            return Ok(cached.clone());
        }
        let spec = self.solver.repos[repo_idx].read_spec(pkg)?;
        self.specs_cache.insert(key, spec.clone());
        Ok(spec)
    }

    /// The composed option inputs for the given state: var request
    /// values, overlaid by bound state options, overlaid by the
    /// user's explicit options.
    fn compose_given(&self, state: &State) -> OptionMap {
        let mut given = OptionMap::default();
        for request in state.var_requests() {
            if !request.value.is_empty() {
                given.insert(request.var.clone(), request.value.clone());
            }
        }
        for (name, value) in state.options().iter() {
            given.insert(name.clone(), value.clone());
        }
        for (name, value) in self.solver.options.iter() {
            given.insert(name.clone(), value.clone());
        }
        given
    }

    /// Gather and order every candidate for the given request.
    fn enumerate_candidates(
        &mut self,
        request: &PkgRequest,
        state: &State,
    ) -> Result<(Vec<Candidate>, Vec<Note>)> {
        let name = request.pkg.name.clone();
        let given = self.compose_given(state);

        let mut all_versions: BTreeSet<Version> = BTreeSet::new();
        for repo_idx in 0..self.solver.repos.len() {
            all_versions.extend(self.cached_versions(repo_idx, &name)?.iter().cloned());
        }
        if all_versions.is_empty() {
            return Err(Error::PackageNotFound(name));
        }

        let mut candidates = Vec::new();
        let mut notes = Vec::new();
        // version-level recipes for the source fallback, newest first
        let mut recipes: Vec<Arc<Spec>> = Vec::new();

        for version in all_versions.iter().rev() {
            let versioned = Ident::new(name.as_str()).with_version(version.clone());
            let applicable = request.is_version_applicable(version);
            if !applicable.is_ok() {
                notes.push(Note::skip(versioned, applicable.to_string()));
                continue;
            }

            let mut seen_builds: HashSet<Build> = HashSet::new();
            let mut source_recipe: Option<Arc<Spec>> = None;
            // (score, repo order, ident) - better matches first
            let mut ranked: Vec<(usize, usize, Ident, Candidate)> = Vec::new();

            for repo_idx in 0..self.solver.repos.len() {
                for ident in self.cached_builds(repo_idx, &name, version)?.iter() {
                    let build = match &ident.build {
                        Some(build) => build.clone(),
                        None => continue,
                    };
                    if !seen_builds.insert(build.clone()) {
                        // first registered repository wins
                        continue;
                    }
                    if build.is_embedded() {
                        continue;
                    }
                    let spec = self.cached_spec(repo_idx, ident)?;
                    if build.is_source() {
                        source_recipe.get_or_insert(spec);
                        continue;
                    }
                    if spec.deprecated && request.pkg.build.as_ref() != Some(&build) {
                        notes.push(Note::skip(
                            ident.clone(),
                            "build is deprecated and was not specifically requested",
                        ));
                        continue;
                    }
                    let score = option_match_score(&spec, &given);
                    ranked.push((
                        score,
                        repo_idx,
                        ident.clone(),
                        Candidate {
                            spec,
                            source: CandidateSource::Binary {
                                repo: self.solver.repos[repo_idx].clone(),
                            },
                        },
                    ));
                }
            }

            ranked.sort_by(|(score_a, repo_a, ident_a, _), (score_b, repo_b, ident_b, _)| {
                score_b
                    .cmp(score_a)
                    .then(repo_a.cmp(repo_b))
                    .then(ident_a.cmp(ident_b))
            });
            candidates.extend(ranked.into_iter().map(|(_, _, _, candidate)| candidate));

            // remember a recipe in case no binary can be used
            if source_recipe.is_none() {
                for repo_idx in 0..self.solver.repos.len() {
                    match self.cached_spec(repo_idx, &versioned) {
                        Ok(spec) => {
                            source_recipe = Some(spec);
                            break;
                        }
                        Err(Error::PackageNotFound(_)) => continue,
                        Err(err) => return Err(err),
                    }
                }
            }
            if let Some(recipe) = source_recipe {
                recipes.push(recipe);
            }
        }

        if candidates.is_empty() {
            for recipe in recipes {
                let mut spec = (*recipe).clone();
                spec.pkg.build = Some(Build::Source);
                candidates.push(Candidate {
                    spec: Arc::new(spec),
                    source: CandidateSource::Source,
                });
            }
        }

        Ok((candidates, notes))
    }

    /// Attempt to resolve the request with one candidate, producing
    /// either an applied decision or the note explaining the skip.
    fn try_candidate(
        &mut self,
        state: &State,
        request: &PkgRequest,
        candidate: Candidate,
    ) -> Result<StepOutcome> {
        let spec = candidate.spec.clone();
        let ident = spec.pkg.clone();

        let compat = request.is_satisfied_by(&spec);
        if !compat.is_ok() {
            return Ok(StepOutcome::Skipped(Note::skip(ident, compat.to_string())));
        }

        let given = self.compose_given(state);
        let compat = validation::validate(state, &spec, &given);
        if !compat.is_ok() {
            return Ok(StepOutcome::Skipped(Note::skip(ident, compat.to_string())));
        }

        let source = match &candidate.source {
            CandidateSource::Binary { repo } => PackageSource::Repository {
                components: repo.get_package(&ident)?,
                repo: repo.clone(),
            },
            CandidateSource::Source => {
                match self.resolve_build_env(state, &spec) {
                    Ok(build_env) => {
                        if build_env.get(&ident.name).is_some() {
                            return Ok(StepOutcome::Skipped(Note::skip(
                                ident.clone(),
                                "build environment depends on the package being built",
                            )));
                        }
                        PackageSource::BuildFromSource {
                            recipe: spec.clone(),
                            build_env: Box::new(build_env),
                        }
                    }
                    // seeding violations are hard errors, failed
                    // child solves just invalidate this candidate
                    Err(err @ Error::Validation(_)) => return Err(err),
                    Err(Error::SolverFailed { reason, .. }) => {
                        return Ok(StepOutcome::Skipped(Note::skip(
                            ident,
                            format!("cannot resolve build environment: {reason}"),
                        )))
                    }
                    Err(Error::PackageNotFound(missing)) => {
                        return Ok(StepOutcome::Skipped(Note::skip(
                            ident,
                            format!("build environment requires unknown package {missing}"),
                        )))
                    }
                    Err(Error::ConflictingRequests { name, reason }) => {
                        return Ok(StepOutcome::Skipped(Note::skip(
                            ident,
                            format!("build environment requests conflict on {name}: {reason}"),
                        )))
                    }
                    Err(err) => return Err(err),
                }
            }
        };

        let decision = match self.resolve_decision(state, request, &spec, source) {
            Ok(decision) => decision,
            Err(err) => {
                return Ok(StepOutcome::Skipped(Note::skip(ident, err.to_string())))
            }
        };
        match decision.apply(state) {
            Ok(next_state) => Ok(StepOutcome::Applied {
                decision,
                state: next_state,
            }),
            Err(err) => Ok(StepOutcome::Skipped(Note::skip(ident, err.to_string()))),
        }
    }

    /// Build the decision which resolves the given spec into the
    /// state: the resolve itself, the seeded options, inherited
    /// requests, install requirements and embedded packages.
    fn resolve_decision(
        &self,
        state: &State,
        request: &PkgRequest,
        spec: &Arc<Spec>,
        source: PackageSource,
    ) -> Result<Decision> {
        let name = spec.pkg.name.clone();
        let given = self.compose_given(state);

        let mut changes = vec![ResolvePackage::new(
            request.clone(),
            spec.clone(),
            source,
        )];

        let resolved_options = spec.resolve_all_options(&given);
        if !resolved_options.is_empty() {
            let namespaced: OptionMap = resolved_options
                .iter()
                .map(|(opt, value)| (format!("{name}.{opt}"), value.clone()))
                .collect();
            changes.push(SetOptions::new(namespaced));
        }

        for opt in &spec.build.options {
            let var = match opt {
                Opt::Var(var) => var,
                Opt::Pkg(_) => continue,
            };
            if var.inheritance == Inheritance::Weak {
                continue;
            }
            let value = resolved_options
                .get(&var.var)
                .cloned()
                .unwrap_or_default();
            changes.push(RequestVar::new(VarRequest::new(
                format!("{name}.{}", var.var),
                value,
            )));
            if var.inheritance == Inheritance::Strong {
                let exact = Ident::new(name.as_str()).with_version(spec.pkg.version.clone());
                changes.push(RequestPackage::new(PkgRequest::from_ident(&exact)));
            }
        }

        for requirement in &spec.install.requirements {
            match requirement {
                Request::Pkg(requirement) if requirement.pin.is_none() => {
                    changes.push(RequestPackage::new(requirement.clone()));
                }
                Request::Var(requirement) if !requirement.pin => {
                    changes.push(RequestVar::new(requirement.clone()));
                }
                // unrendered pins bind at build time
                _ => (),
            }
        }

        if !spec.is_source() {
            for embedded in &spec.install.embedded {
                let mut embedded = embedded.clone();
                embedded.pkg.build = Some(Build::Embedded);
                let embedded_request = PkgRequest::from_ident(&embedded.pkg);
                changes.push(RequestPackage::new(embedded_request.clone()));
                changes.push(ResolvePackage::new(
                    embedded_request,
                    Arc::new(embedded),
                    PackageSource::Embedded {
                        parent: spec.pkg.clone(),
                    },
                ));
            }
        }

        Ok(Decision::new(changes))
    }

    /// Resolve the environment in which the given recipe would be
    /// built, using a child solver seeded from the current state.
    fn resolve_build_env(&self, state: &State, recipe: &Spec) -> Result<Solution> {
        if self.depth >= MAX_BUILD_ENV_DEPTH {
            return Err(Error::Validation(format!(
                "build environment recursion exceeded {MAX_BUILD_ENV_DEPTH} levels resolving {}",
                recipe.pkg
            )));
        }

        let mut child = Solver::new();
        for repo in &self.solver.repos {
            child.add_repository(repo.clone());
        }
        let given = self.compose_given(state);
        child.update_options(given.clone());

        // the first declared variant that is not contradicted by the
        // options already in play fills any values left open
        let mut variant = OptionMap::default();
        for declared in &recipe.build.variants {
            let compatible = declared.iter().all(|(opt, value)| {
                match given.package_value(&recipe.pkg.name, opt) {
                    Some(existing) => existing == value,
                    None => true,
                }
            });
            if compatible {
                variant = declared.clone();
                break;
            }
        }

        for opt in &recipe.build.options {
            if let Opt::Pkg(pkg) = opt {
                if pkg.pkg == recipe.pkg.name {
                    return Err(Error::Validation(format!(
                        "build environment of {} cannot depend on the package itself",
                        recipe.pkg.name
                    )));
                }
            }
            let value = given
                .package_value(&recipe.pkg.name, opt.name())
                .or_else(|| variant.get(opt.name()));
            child.add_request(opt.to_request(value.map(String::as_str))?);
        }

        log::debug!(
            "resolving build environment for {} ({} levels deep)",
            recipe.pkg,
            self.depth + 1
        );
        SolverRuntime::new(child, self.depth + 1).run_to_completion()
    }
}

impl Iterator for SolverRuntime {
    type Item = Result<(NodeId, Decision)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if !self.started {
            self.started = true;
            let decision = self.initial_decision();
            if !decision.changes.is_empty() {
                let state = match decision.apply(&self.graph.root().state) {
                    Ok(state) => state,
                    Err(err) => {
                        self.done = true;
                        return Some(Err(err));
                    }
                };
                let node = self.graph.add_state(ROOT, state);
                self.graph.add_edge(ROOT, decision.clone(), node);
                self.current = node;
                return Some(Ok((ROOT, decision)));
            }
        }

        loop {
            let state = self.graph.node(self.current).state.clone();
            let request = match state.get_next_request() {
                Some(request) => request,
                None => {
                    let solution = build_solution(&state);
                    log::info!("found solution with {} packages", solution.len());
                    self.solution = Some(solution);
                    self.done = true;
                    return None;
                }
            };

            if self.frames.last().map(|f| f.node) != Some(self.current) {
                log::debug!("resolving {request}");
                let (candidates, notes) = match self.enumerate_candidates(&request, &state) {
                    Ok(result) => result,
                    Err(err) => {
                        self.done = true;
                        return Some(Err(err));
                    }
                };
                self.frames.push(Frame {
                    node: self.current,
                    request,
                    candidates,
                    next: 0,
                    notes,
                });
            }

            let frame_idx = self.frames.len() - 1;
            let request = self.frames[frame_idx].request.clone();

            loop {
                let candidate = {
                    let frame = &mut self.frames[frame_idx];
                    match frame.candidates.get(frame.next) {
                        Some(candidate) => {
                            frame.next += 1;
                            candidate.clone()
                        }
                        None => break,
                    }
                };
                match self.try_candidate(&state, &request, candidate) {
                    Ok(StepOutcome::Applied { decision, state }) => {
                        let from = self.current;
                        let node = self.graph.add_state(from, state);
                        self.graph.add_edge(from, decision.clone(), node);
                        self.current = node;
                        return Some(Ok((from, decision)));
                    }
                    Ok(StepOutcome::Skipped(note)) => {
                        log::debug!("{note}");
                        self.frames[frame_idx].notes.push(note);
                    }
                    Err(err) => {
                        self.done = true;
                        return Some(Err(err));
                    }
                }
            }

            // every candidate failed: step back to the previous
            // decision point
            let frame = self.frames.pop().expect("a frame exists at this point");
            let cause = format!("could not satisfy '{}'", frame.request);
            log::debug!("{cause}, stepping back");
            self.stepbacks.push(cause.clone());
            let notes = bound_notes(frame.notes);
            let decision =
                Decision::new(vec![StepBack::new(cause.clone())]).with_notes(notes.clone());
            let failed = self.current;

            match self.frames.last() {
                Some(parent) => {
                    self.graph.add_edge(failed, decision.clone(), parent.node);
                    self.current = parent.node;
                    return Some(Ok((failed, decision)));
                }
                None => {
                    self.graph.add_edge(failed, decision.clone(), ROOT);
                    self.done = true;
                    // the most recent unwinds explain the failure best
                    let mut reason = self
                        .stepbacks
                        .iter()
                        .rev()
                        .take(5)
                        .cloned()
                        .collect::<Vec<_>>()
                        .join("; ");
                    if let Some(note) = notes.last() {
                        reason = format!("{reason}: {note}");
                    }
                    return Some(Err(Error::SolverFailed {
                        reason,
                        graph: Box::new(self.graph.clone()),
                    }));
                }
            }
        }
    }
}

/// How many of the build's recorded option values agree with the
/// current inputs. Used to prefer builds made for the options in
/// play.
fn option_match_score(spec: &Spec, given: &OptionMap) -> usize {
    let recorded = spec.resolve_all_options(&OptionMap::default());
    let mut score = 0;
    for (opt, value) in recorded.iter() {
        if given.package_value(&spec.pkg.name, opt) == Some(value) {
            score += 1;
        }
    }
    score
}

/// Keep only the most recent notes for each package.
fn bound_notes(notes: Vec<Note>) -> Vec<Note> {
    let mut per_package: HashMap<String, usize> = HashMap::new();
    let mut keep: Vec<Note> = Vec::new();
    for note in notes.into_iter().rev() {
        match note.pkg_name() {
            Some(name) => {
                let count = per_package.entry(name.to_string()).or_default();
                if *count < MAX_NOTES_PER_PACKAGE {
                    *count += 1;
                    keep.push(note);
                }
            }
            None => keep.push(note),
        }
    }
    keep.reverse();
    keep
}

/// Construct a solution from the packages resolved in a state.
fn build_solution(state: &State) -> Solution {
    let mut solution = Solution::new(state.options().clone());
    for (request, spec, source) in state.packages() {
        solution.add(request.clone(), spec.clone(), source.clone());
    }
    solution
}
