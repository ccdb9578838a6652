use std::fs;
use std::path::Path;

use glob::glob;
use report_pipeline::description::{PipelineDescription, load_pipeline, workflow_id_from_path};
use report_pipeline::error::PipelineError;
use report_pipeline::pipeline::StepRegistry;
use report_pipeline::runner::{RunResponse, run_pipeline};
use tempfile::tempdir;

fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

#[test]
fn empty_pipeline_loads_and_runs() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("pipeline007.json");
    write(&path, r#"{"context": {"base_dir": "."}, "pipeline": []}"#);

    let registry = StepRegistry::with_defaults();
    let loaded = load_pipeline(&path, temp.path(), &registry).unwrap();
    assert!(loaded.steps.is_empty());
    assert_eq!(loaded.ctx.workflow_id.as_deref(), Some("7"));

    let response = run_pipeline(&path, temp.path(), &registry);
    assert_eq!(
        response,
        RunResponse::Success {
            message: "Pipeline executed successfully (0 step(s))".into(),
            artifacts: Vec::new(),
        }
    );
}

#[test]
fn unknown_step_fails_at_load_time() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("pipeline.json");
    let marker = temp.path().join("inputs");
    write(
        &path,
        r#"{
            "context": {"base_dir": "."},
            "pipeline": [
                {"step": "InitRun", "params": {"inputs_dir": "inputs"}},
                {"step": "NotARealStep"}
            ]
        }"#,
    );

    let registry = StepRegistry::with_defaults();
    let err = load_pipeline(&path, temp.path(), &registry).err().unwrap();
    match err {
        PipelineError::UnknownStep { name, available } => {
            assert_eq!(name, "NotARealStep");
            assert!(available.contains(&"InitRun".to_string()));
        }
        other => panic!("expected UnknownStep, got {other:?}"),
    }
    assert!(!marker.exists());

    let response = run_pipeline(&path, temp.path(), &registry);
    assert!(!response.is_success());
}

#[test]
fn mismatched_params_name_the_step_and_the_attempted_values() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("pipeline.json");
    write(
        &path,
        r#"{"pipeline": [{"step": "LoadConfig", "params": {"config_file": "x.json"}}]}"#,
    );

    let registry = StepRegistry::with_defaults();
    let err = load_pipeline(&path, temp.path(), &registry).err().unwrap();
    match err {
        PipelineError::Instantiation { step, params, .. } => {
            assert_eq!(step, "LoadConfig");
            assert!(params.contains("config_file"));
        }
        other => panic!("expected Instantiation, got {other:?}"),
    }
}

#[test]
fn missing_description_is_config_not_found() {
    let temp = tempdir().unwrap();
    let err = PipelineDescription::load(&temp.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, PipelineError::ConfigNotFound { .. }));
}

#[test]
fn relative_base_dir_resolves_against_root() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("pipeline.yaml");
    write(
        &path,
        "context:\n  base_dir: data/2025\n  evaluation: simce\n  run_id: run-1\n  outputs_dir: out\n  params:\n    year: 2025\npipeline:\n  - step: InitRun\n",
    );

    let registry = StepRegistry::with_defaults();
    let loaded = load_pipeline(&path, temp.path(), &registry).unwrap();
    let ctx = &loaded.ctx;
    assert_eq!(ctx.base_dir, temp.path().join("data/2025"));
    assert_eq!(ctx.outputs_dir, Some(temp.path().join("data/2025/out")));
    assert_eq!(ctx.evaluation, "simce");
    assert_eq!(ctx.run_id, "run-1");
    assert_eq!(ctx.params["year"], 2025);
    assert_eq!(ctx.workflow_id, None);
    assert_eq!(loaded.steps.len(), 1);
}

#[test]
fn malformed_description_is_a_parse_error() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("pipeline.json");
    write(&path, r#"{"pipeline": [ {"step": "InitRun" ]}"#);
    let err = PipelineDescription::load(&path).unwrap_err();
    assert!(matches!(err, PipelineError::Parse { .. }));
}

#[test]
fn stored_descriptions_only_reference_registered_steps() {
    let registry = StepRegistry::with_defaults();
    let mut checked = 0;
    for entry in glob("pipelines/*.json").unwrap() {
        let path = entry.unwrap();
        let description = PipelineDescription::load(&path).unwrap();
        for spec in &description.pipeline {
            assert!(
                registry.contains(&spec.step),
                "{} references unregistered step '{}'",
                path.display(),
                spec.step
            );
        }
        description
            .instantiate(&registry)
            .unwrap_or_else(|err| panic!("{}: {err}", path.display()));
        assert!(workflow_id_from_path(&path).is_some());
        checked += 1;
    }
    assert!(checked > 0, "no stored descriptions found");
}
