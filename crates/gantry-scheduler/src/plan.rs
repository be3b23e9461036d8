//! Validated, fully expanded pipeline ready to run.

use crate::dag::{GraphError, JobGraph};
use crate::gate::{ConditionError, ConditionalGate};
use crate::matrix::{JobInstance, MatrixError, MatrixExpander};
use gantry_core::ids::JobIndex;
use gantry_core::pipeline::{JobDefinition, PipelineDefinition};
use thiserror::Error;
use tracing::debug;

/// Configuration errors. All of them surface before anything runs.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error(transparent)]
    Pipeline(#[from] gantry_core::Error),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Matrix(#[from] MatrixError),
    #[error(transparent)]
    Condition(#[from] ConditionError),
}

#[derive(Debug)]
pub struct ExecutionPlan {
    definition: PipelineDefinition,
    graph: JobGraph,
    instances: Vec<Vec<JobInstance>>,
}

impl ExecutionPlan {
    pub fn from_yaml(content: &str) -> Result<Self, PlanError> {
        let definition = PipelineDefinition::from_yaml(content)?;
        Self::from_definition(definition)
    }

    /// Validate the graph and every condition, and expand every matrix.
    pub fn from_definition(definition: PipelineDefinition) -> Result<Self, PlanError> {
        for job in &definition.jobs {
            validate_job(job)?;
        }

        let graph = JobGraph::from_definition(&definition)?;

        let gate = ConditionalGate::new();
        let expander = MatrixExpander::new();
        let mut instances = Vec::with_capacity(graph.len());
        for node in graph.jobs() {
            gate.validate(&node.definition)?;
            instances.push(expander.expand(&node.definition)?);
        }

        debug!(
            pipeline = %definition.name,
            jobs = graph.len(),
            instances = instances.iter().map(Vec::len).sum::<usize>(),
            "Built execution plan"
        );

        Ok(Self {
            definition,
            graph,
            instances,
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    pub fn graph(&self) -> &JobGraph {
        &self.graph
    }

    pub fn job(&self, index: JobIndex) -> &JobDefinition {
        &self.graph.job(index).definition
    }

    pub fn instances(&self, index: JobIndex) -> &[JobInstance] {
        &self.instances[index.index()]
    }

    pub fn total_instances(&self) -> usize {
        self.instances.iter().map(Vec::len).sum()
    }
}

fn validate_job(job: &JobDefinition) -> Result<(), gantry_core::Error> {
    if job.name.trim().is_empty() {
        return Err(gantry_core::Error::InvalidPipeline(
            "job name must not be empty".to_string(),
        ));
    }
    for step in &job.steps {
        if step.run.is_none() && step.uses.is_none() {
            return Err(gantry_core::Error::EmptyStep {
                step: format!("{}/{}", job.name, step.name),
            });
        }
    }
    Ok(())
}
