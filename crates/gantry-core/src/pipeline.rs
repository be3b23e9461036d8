//! Pipeline definition types.
//!
//! These types represent the user-authored pipeline YAML configuration.
//! They are defined once at load time and never mutated during a run.

use crate::events::EventKind;
use crate::glob::Glob;
use crate::{Error, Result};
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PipelineDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "on", skip_serializing_if = "Option::is_none")]
    pub triggers: Option<TriggerConfig>,
    #[serde(default)]
    pub env: IndexMap<String, String>,
    pub jobs: Vec<JobDefinition>,
}

impl PipelineDefinition {
    /// Parse a pipeline from YAML.
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(Error::from)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Look up a job by name.
    pub fn job(&self, name: &str) -> Option<&JobDefinition> {
        self.jobs.iter().find(|j| j.name == name)
    }
}

/// Activation rules. Absent rules never match.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct TriggerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push: Option<PushTrigger>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<PullRequestTrigger>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct PushTrigger {
    /// Branch allow-list; empty means every branch.
    #[serde(default)]
    pub branches: Vec<Glob>,
    /// Tag allow-list; empty means no tags.
    #[serde(default)]
    pub tags: Vec<Glob>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct PullRequestTrigger {
    /// Target branch allow-list; empty means every branch.
    #[serde(default)]
    pub branches: Vec<Glob>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobDefinition {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    #[schemars(with = "Vec<String>")]
    pub needs: Vec<String>,
    #[serde(default)]
    pub condition: Option<Condition>,
    #[serde(default)]
    pub matrix: Option<MatrixConfig>,
    #[serde(default)]
    pub env: IndexMap<String, String>,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

impl JobDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            needs: Vec::new(),
            condition: None,
            matrix: None,
            env: IndexMap::new(),
            steps: Vec::new(),
        }
    }

    pub fn with_needs<I, S>(mut self, needs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.needs = needs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_matrix(mut self, matrix: MatrixConfig) -> Self {
        self.matrix = Some(matrix);
        self
    }

    pub fn with_step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    /// Fail-fast policy for this job's instances.
    pub fn fail_fast(&self) -> bool {
        self.matrix.as_ref().map(|m| m.fail_fast).unwrap_or(true)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StepDefinition {
    pub name: String,
    #[serde(default)]
    pub run: Option<String>,
    /// Reference to a reusable action, passed through to the executor.
    #[serde(default)]
    pub uses: Option<String>,
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub env: IndexMap<String, String>,
    /// Names of secrets this step needs.
    #[serde(default)]
    pub secrets: Vec<String>,
}

impl StepDefinition {
    pub fn run(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            run: Some(command.into()),
            uses: None,
            working_directory: None,
            env: IndexMap::new(),
            secrets: Vec::new(),
        }
    }
}

/// Run condition of a job, evaluated against the activation context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Always,
    Event(EventKind),
    Branch(Glob),
    Tag(Glob),
    /// Matches the fully qualified ref or its short branch/tag name.
    Ref(Glob),
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MatrixConfig {
    /// Axes in declaration order; expansion order follows it.
    pub axes: IndexMap<String, Vec<serde_json::Value>>,
    #[serde(default)]
    pub include: Vec<IndexMap<String, serde_json::Value>>,
    #[serde(default)]
    pub exclude: Vec<IndexMap<String, serde_json::Value>>,
    #[serde(default = "default_true")]
    pub fail_fast: bool,
    #[serde(default)]
    pub max_parallel: Option<u32>,
}

impl MatrixConfig {
    pub fn new() -> Self {
        Self {
            axes: IndexMap::new(),
            include: Vec::new(),
            exclude: Vec::new(),
            fail_fast: true,
            max_parallel: None,
        }
    }

    pub fn axis<I, V>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<serde_json::Value>,
    {
        self.axes
            .insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn max_parallel(mut self, max: u32) -> Self {
        self.max_parallel = Some(max);
        self
    }
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Render a matrix value the way it is handed to steps: strings verbatim,
/// everything else as JSON.
pub fn matrix_value_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn default_true() -> bool {
    true
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PIPELINE: &str = r#"
name: demo
on:
  push:
    branches: [master]
    tags: ["v*"]
  pull_request:
    branches: [master]
jobs:
  - name: lint
    steps:
      - name: fmt
        run: cargo fmt --check
  - name: test
    needs: lint
    matrix:
      axes:
        os: [ubuntu-latest, macos-latest]
        rust: ["1.65", stable]
      fail_fast: false
    steps:
      - name: test
        run: cargo test
  - name: publish
    needs: [lint, test]
    condition:
      tag: "v*"
    steps:
      - name: publish
        run: cargo publish
        secrets: [CARGO_REGISTRY_TOKEN]
"#;

    #[test]
    fn test_parse_pipeline() {
        let def = PipelineDefinition::from_yaml(PIPELINE).unwrap();
        assert_eq!(def.name, "demo");
        assert_eq!(def.jobs.len(), 3);

        let test = def.job("test").unwrap();
        assert_eq!(test.needs, vec!["lint".to_string()]);
        assert!(!test.fail_fast());
        let axes: Vec<&str> = test.matrix.as_ref().unwrap().axes.keys().map(String::as_str).collect();
        assert_eq!(axes, vec!["os", "rust"]);

        let publish = def.job("publish").unwrap();
        assert_eq!(publish.needs, vec!["lint".to_string(), "test".to_string()]);
        assert_eq!(
            publish.condition,
            Some(Condition::Tag(Glob::new("v*").unwrap()))
        );
        assert_eq!(publish.steps[0].secrets, vec!["CARGO_REGISTRY_TOKEN".to_string()]);
    }

    #[test]
    fn test_triggers_parsed() {
        let def = PipelineDefinition::from_yaml(PIPELINE).unwrap();
        let triggers = def.triggers.unwrap();
        let push = triggers.push.unwrap();
        assert_eq!(push.branches[0].as_str(), "master");
        assert_eq!(push.tags[0].as_str(), "v*");
        assert!(triggers.pull_request.is_some());
    }

    #[test]
    fn test_fail_fast_defaults_to_true() {
        let matrix: MatrixConfig = serde_yaml::from_str("axes:\n  os: [a, b]").unwrap();
        assert!(matrix.fail_fast);
        assert_eq!(matrix.max_parallel, None);
        assert!(JobDefinition::new("plain").fail_fast());
    }

    #[test]
    fn test_composite_condition() {
        let yaml = r#"
all:
  - event: tag_push
  - not:
      branch: "wip/*"
  - any:
      - ref: "refs/tags/v*"
      - always
"#;
        let cond: Condition = serde_yaml::from_str(yaml).unwrap();
        match cond {
            Condition::All(parts) => {
                assert_eq!(parts.len(), 3);
                assert_eq!(parts[0], Condition::Event(EventKind::TagPush));
            }
            other => panic!("unexpected condition: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_yaml_is_configuration_error() {
        let err = PipelineDefinition::from_yaml("name: x\njobs: 5").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_matrix_value_string() {
        assert_eq!(matrix_value_string(&serde_json::json!("stable")), "stable");
        assert_eq!(matrix_value_string(&serde_json::json!(1.65)), "1.65");
        assert_eq!(matrix_value_string(&serde_json::json!(true)), "true");
    }
}
