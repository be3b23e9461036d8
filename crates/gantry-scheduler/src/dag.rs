//! DAG resolution for pipeline jobs.

use gantry_core::ids::JobIndex;
use gantry_core::pipeline::{JobDefinition, PipelineDefinition};
use gantry_core::run::Outcome;
use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Duplicate job name: {0}")]
    DuplicateJob(String),
    #[error("Job '{job}' needs unknown job '{dependency}'")]
    UnknownDependency { job: String, dependency: String },
    #[error("Cyclic dependency detected involving job '{0}'")]
    CyclicDependency(String),
    #[error("Empty pipeline")]
    EmptyGraph,
}

/// A node in the job DAG.
#[derive(Debug, Clone)]
pub struct JobNode {
    pub index: JobIndex,
    pub name: String,
    pub definition: JobDefinition,
}

/// Where a job stands with respect to its dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Every dependency succeeded.
    Ready,
    /// Some dependency has not reached a terminal outcome yet.
    Waiting,
    /// This dependency ended in failure, cancellation or skip.
    Blocked(JobIndex),
}

/// Directed acyclic graph of jobs and their `needs` edges.
///
/// Names are resolved to [`JobIndex`] values once, in [`JobGraph::validate`];
/// afterwards readiness queries run over index-addressed adjacency lists.
#[derive(Debug, Default)]
pub struct JobGraph {
    graph: DiGraph<JobNode, ()>,
    name_to_index: HashMap<String, NodeIndex>,
    dependencies: Vec<Vec<JobIndex>>,
    dependents: Vec<Vec<JobIndex>>,
    order: Vec<JobIndex>,
    validated: bool,
}

impl JobGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and validate a graph from a pipeline definition.
    pub fn from_definition(pipeline: &PipelineDefinition) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        for job in &pipeline.jobs {
            graph.add_job(job.clone())?;
        }
        graph.validate()?;
        Ok(graph)
    }

    /// Add a job. Dependencies are resolved later, so forward references are fine.
    pub fn add_job(&mut self, job: JobDefinition) -> Result<JobIndex, GraphError> {
        if self.name_to_index.contains_key(&job.name) {
            return Err(GraphError::DuplicateJob(job.name));
        }

        let index = JobIndex::new(self.graph.node_count());
        let name = job.name.clone();
        let node = self.graph.add_node(JobNode {
            index,
            name: name.clone(),
            definition: job,
        });
        self.name_to_index.insert(name, node);
        self.validated = false;
        Ok(index)
    }

    /// Resolve `needs` edges and reject unknown dependencies and cycles.
    pub fn validate(&mut self) -> Result<(), GraphError> {
        if self.graph.node_count() == 0 {
            return Err(GraphError::EmptyGraph);
        }

        self.graph.clear_edges();
        let count = self.graph.node_count();
        let mut dependencies = vec![Vec::new(); count];
        let mut dependents = vec![Vec::new(); count];

        let mut edges = Vec::new();
        for node in self.graph.node_indices() {
            let job = &self.graph[node];
            let mut seen = BTreeSet::new();
            for dep in &job.definition.needs {
                let dep_node = self.name_to_index.get(dep).copied().ok_or_else(|| {
                    GraphError::UnknownDependency {
                        job: job.name.clone(),
                        dependency: dep.clone(),
                    }
                })?;
                if seen.insert(dep_node) {
                    edges.push((dep_node, node));
                }
            }
        }

        for (from, to) in edges {
            self.graph.add_edge(from, to, ());
            dependencies[to.index()].push(JobIndex::new(from.index()));
            dependents[from.index()].push(JobIndex::new(to.index()));
        }

        let order = toposort(&self.graph, None).map_err(|cycle| {
            GraphError::CyclicDependency(self.graph[cycle.node_id()].name.clone())
        })?;

        self.order = order
            .into_iter()
            .map(|idx| JobIndex::new(idx.index()))
            .collect();
        self.dependencies = dependencies;
        self.dependents = dependents;
        self.validated = true;
        Ok(())
    }

    pub fn is_validated(&self) -> bool {
        self.validated
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn job(&self, index: JobIndex) -> &JobNode {
        &self.graph[NodeIndex::new(index.index())]
    }

    pub fn index_of(&self, name: &str) -> Option<JobIndex> {
        self.name_to_index
            .get(name)
            .map(|idx| JobIndex::new(idx.index()))
    }

    /// All jobs in declaration order.
    pub fn jobs(&self) -> impl Iterator<Item = &JobNode> {
        self.graph.node_weights()
    }

    /// Direct dependencies of a job.
    pub fn dependencies(&self, index: JobIndex) -> &[JobIndex] {
        self.dependencies
            .get(index.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Jobs that directly depend on this one.
    pub fn dependents(&self, index: JobIndex) -> &[JobIndex] {
        self.dependents
            .get(index.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Topological order computed at validation.
    pub fn topological_order(&self) -> &[JobIndex] {
        &self.order
    }

    /// Get the root jobs (jobs with no dependencies).
    pub fn roots(&self) -> Vec<&JobNode> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|idx| &self.graph[idx])
            .collect()
    }

    /// Get jobs that can run after a given job completes.
    pub fn successors(&self, job_name: &str) -> Vec<&JobNode> {
        self.neighbors(job_name, Direction::Outgoing)
    }

    /// Get jobs that must complete before a given job can run.
    pub fn predecessors(&self, job_name: &str) -> Vec<&JobNode> {
        self.neighbors(job_name, Direction::Incoming)
    }

    fn neighbors(&self, job_name: &str, direction: Direction) -> Vec<&JobNode> {
        self.name_to_index
            .get(job_name)
            .map(|&idx| {
                self.graph
                    .neighbors_directed(idx, direction)
                    .map(|n| &self.graph[n])
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Index-based readiness over an outcome table addressed by [`JobIndex`].
    pub fn readiness(&self, index: JobIndex, outcomes: &[Outcome]) -> Readiness {
        let mut waiting = false;
        for &dep in self.dependencies(index) {
            match outcomes[dep.index()] {
                Outcome::Success => {}
                outcome if outcome.is_terminal() => return Readiness::Blocked(dep),
                _ => waiting = true,
            }
        }
        if waiting {
            Readiness::Waiting
        } else {
            Readiness::Ready
        }
    }

    /// Jobs not yet started whose every dependency has outcome `success`.
    pub fn ready_jobs(&self, completed: &HashMap<String, Outcome>) -> BTreeSet<String> {
        self.classify(completed, |r| r == Readiness::Ready)
    }

    /// Jobs not yet started with a dependency that failed, was cancelled or
    /// skipped. These never run and go straight to `skipped`.
    pub fn blocked_jobs(&self, completed: &HashMap<String, Outcome>) -> BTreeSet<String> {
        self.classify(completed, |r| matches!(r, Readiness::Blocked(_)))
    }

    fn classify<F>(&self, completed: &HashMap<String, Outcome>, keep: F) -> BTreeSet<String>
    where
        F: Fn(Readiness) -> bool,
    {
        let outcomes: Vec<Outcome> = self
            .jobs()
            .map(|node| {
                completed
                    .get(&node.name)
                    .copied()
                    .unwrap_or(Outcome::Pending)
            })
            .collect();

        self.jobs()
            .filter(|node| outcomes[node.index.index()] == Outcome::Pending)
            .filter(|node| keep(self.readiness(node.index, &outcomes)))
            .map(|node| node.name.clone())
            .collect()
    }
}
