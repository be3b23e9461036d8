//! Serialization tests for gantry-core types.

use chrono::Utc;
use gantry_core::events::{ActivationContext, Event};
use gantry_core::ids::RunId;
use gantry_core::pipeline::{Condition, PipelineDefinition};
use gantry_core::ports::StepStatus;
use gantry_core::run::{InstanceReport, JobReport, Outcome, RunReport, SkipReason, StepReport};
use indexmap::IndexMap;

fn sample_report() -> RunReport {
    let mut matrix = IndexMap::new();
    matrix.insert("os".to_string(), serde_json::json!("ubuntu-latest"));

    let jobs = vec![
        JobReport {
            name: "build".to_string(),
            outcome: Outcome::Failure,
            skip_reason: None,
            instances: vec![
                InstanceReport {
                    index: 0,
                    name: "build (os=ubuntu-latest)".to_string(),
                    matrix: matrix.clone(),
                    outcome: Outcome::Failure,
                    steps: vec![StepReport {
                        name: "compile".to_string(),
                        status: StepStatus::Failure,
                        duration_ms: 12,
                    }],
                    duration_ms: Some(15),
                },
                InstanceReport {
                    index: 1,
                    name: "build (os=macos-latest)".to_string(),
                    matrix: IndexMap::new(),
                    outcome: Outcome::Cancelled,
                    steps: vec![],
                    duration_ms: None,
                },
            ],
        },
        JobReport {
            name: "publish".to_string(),
            outcome: Outcome::Skipped,
            skip_reason: Some(SkipReason::Upstream {
                job: "build".to_string(),
                outcome: Outcome::Failure,
            }),
            instances: vec![],
        },
    ];

    RunReport {
        run_id: RunId::new(),
        pipeline: "ci".to_string(),
        context: ActivationContext::from_event(&Event::push("refs/tags/v1.0.0")),
        outcome: RunReport::overall(&jobs),
        jobs,
        started_at: Utc::now(),
        completed_at: Utc::now(),
        duration_ms: 20,
    }
}

#[test]
fn test_run_report_roundtrip() {
    let report = sample_report();
    assert_eq!(report.outcome, Outcome::Failure);

    let json = serde_json::to_string(&report).expect("serialize");
    let parsed: RunReport = serde_json::from_str(&json).expect("deserialize");

    assert_eq!(parsed.run_id, report.run_id);
    assert_eq!(parsed.outcome_of("build"), Some(Outcome::Failure));
    assert_eq!(
        parsed.job("build").unwrap().instance_outcomes(),
        vec![Outcome::Failure, Outcome::Cancelled]
    );
    assert_eq!(
        parsed.job("publish").unwrap().skip_reason,
        Some(SkipReason::Upstream {
            job: "build".to_string(),
            outcome: Outcome::Failure
        })
    );
}

#[test]
fn test_report_json_shape() {
    let report = sample_report();
    let value = serde_json::to_value(&report).unwrap();

    assert_eq!(value["context"]["ref"], "refs/tags/v1.0.0");
    assert_eq!(value["context"]["kind"], "tag_push");
    assert_eq!(value["jobs"][1]["skip_reason"]["reason"], "upstream");
    // Empty matrices are omitted from instance entries.
    assert!(value["jobs"][0]["instances"][1].get("matrix").is_none());
}

#[test]
fn test_pipeline_yaml_roundtrip_keeps_order_and_conditions() {
    let yaml = r#"
name: ordered
jobs:
  - name: z-first
    steps: []
  - name: a-second
    needs: z-first
    condition:
      any:
        - tag: "v*"
        - branch: master
    matrix:
      axes:
        rust: [stable, nightly]
        os: [linux]
"#;
    let def = PipelineDefinition::from_yaml(yaml).unwrap();
    let again = PipelineDefinition::from_yaml(&def.to_yaml().unwrap()).unwrap();

    let names: Vec<&str> = again.jobs.iter().map(|j| j.name.as_str()).collect();
    assert_eq!(names, vec!["z-first", "a-second"]);

    let job = again.job("a-second").unwrap();
    let axes: Vec<&str> = job
        .matrix
        .as_ref()
        .unwrap()
        .axes
        .keys()
        .map(String::as_str)
        .collect();
    assert_eq!(axes, vec!["rust", "os"]);
    assert!(matches!(job.condition, Some(Condition::Any(ref parts)) if parts.len() == 2));
}

#[test]
fn test_pipeline_schema_generation() {
    let schema = schemars::schema_for!(PipelineDefinition);
    let json = serde_json::to_value(&schema).unwrap();
    assert!(json["definitions"].get("JobDefinition").is_some());
    assert!(json["definitions"].get("Condition").is_some());
}
