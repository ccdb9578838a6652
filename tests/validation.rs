use std::fs;

use report_pipeline::description::PipelineDescription;
use report_pipeline::lockfile::{description_fingerprint, generate_lock};
use report_pipeline::pipeline::{StepParameters, StepRegistry, StepSpec};
use report_pipeline::validation::validate_description;
use serde_json::json;
use tempfile::tempdir;

fn step_spec(name: &str, params: &[(&str, serde_json::Value)]) -> StepSpec {
    let mut map = StepParameters::default();
    for (key, value) in params {
        map.insert((*key).to_string(), value.clone());
    }
    StepSpec::with_params(name, map)
}

fn description(pipeline: Vec<StepSpec>) -> PipelineDescription {
    PipelineDescription {
        pipeline,
        ..PipelineDescription::default()
    }
}

#[test]
fn validation_catches_bad_params_and_unknown_steps() {
    let desc = description(vec![
        step_spec("LoadConfig", &[]),
        StepSpec::new("NotARealStep"),
    ]);
    let report = validate_description(&desc, &StepRegistry::with_defaults());

    assert!(!report.is_ok());
    assert_eq!(report.errors.len(), 2, "errors: {:?}", report.errors);
    assert!(report.errors[0].contains("LoadConfig"));
    assert!(report.errors[1].contains("NotARealStep"));
}

#[test]
fn requirement_without_producer_is_an_error() {
    let desc = description(vec![
        step_spec("InitRun", &[]),
        step_spec("ExportTable", &[("input_key", json!("df_enriched_x"))]),
    ]);
    let report = validate_description(&desc, &StepRegistry::with_defaults());
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("df_enriched_x"));
}

#[test]
fn runtime_resolution_downgrades_missing_producer_to_warning() {
    let desc = description(vec![
        step_spec("ConsolidateTables", &[]),
        step_spec("ExportTable", &[("input_key", json!("df_consolidado_x"))]),
    ]);
    let report = validate_description(&desc, &StepRegistry::with_defaults());
    assert!(report.is_ok(), "errors: {:?}", report.errors);
    assert!(report.warnings.iter().any(|w| w.contains("df_consolidado_x")));
}

#[test]
fn ordered_producers_validate_cleanly() {
    let desc = description(vec![
        step_spec("ConsolidateTables", &[("input_key", json!("estudiantes"))]),
        step_spec(
            "EnrichWithContext",
            &[("input_key", json!("df_consolidado_estudiantes"))],
        ),
        step_spec(
            "ExportTable",
            &[("input_key", json!("df_enriched_estudiantes"))],
        ),
    ]);
    let report = validate_description(&desc, &StepRegistry::with_defaults());
    assert!(report.is_ok(), "errors: {:?}", report.errors);
    assert!(report.warnings.is_empty(), "warnings: {:?}", report.warnings);
}

#[test]
fn empty_pipeline_and_duplicate_producers_warn() {
    let registry = StepRegistry::with_defaults();
    let empty = validate_description(&description(Vec::new()), &registry);
    assert!(empty.is_ok());
    assert_eq!(empty.warnings.len(), 1);

    let twice = description(vec![
        step_spec("ConsolidateTables", &[("input_key", json!("estudiantes"))]),
        step_spec("ConsolidateTables", &[("input_key", json!("estudiantes"))]),
    ]);
    let report = validate_description(&twice, &registry);
    assert!(report.is_ok());
    assert!(report.warnings[0].contains("df_consolidado_estudiantes"));
}

#[test]
fn lockfile_records_fingerprint_and_step_hashes() {
    let temp = tempdir().unwrap();
    let desc = description(vec![
        step_spec("InitRun", &[("run_id", json!("run-1"))]),
        step_spec("ConsolidateTables", &[("input_key", json!("estudiantes"))]),
    ]);

    let lock_path = temp.path().join("pipeline.lock");
    let lock = generate_lock(&desc, &lock_path).unwrap();
    assert_eq!(lock.fingerprint, description_fingerprint(&desc));
    assert_eq!(lock.steps.len(), 2);
    assert_ne!(lock.steps[0].params_hash, lock.steps[1].params_hash);

    let content = fs::read_to_string(&lock_path).unwrap();
    assert!(content.contains("fingerprint:"));
    assert!(content.contains("name: InitRun"));
    assert!(content.contains("name: ConsolidateTables"));
}

#[test]
fn fingerprint_ignores_source_format() {
    let temp = tempdir().unwrap();
    let json_path = temp.path().join("pipeline.json");
    let yaml_path = temp.path().join("pipeline.yaml");
    fs::write(
        &json_path,
        r#"{"context": {"base_dir": "data"}, "pipeline": [{"step": "ExportTable", "params": {"output_filename": "a.json"}}]}"#,
    )
    .unwrap();
    fs::write(
        &yaml_path,
        "context:\n  base_dir: data\npipeline:\n  - step: ExportTable\n    params:\n      output_filename: a.json\n",
    )
    .unwrap();

    let from_json = PipelineDescription::load(&json_path).unwrap();
    let from_yaml = PipelineDescription::load(&yaml_path).unwrap();
    assert_eq!(
        description_fingerprint(&from_json),
        description_fingerprint(&from_yaml)
    );

    let mut changed = from_json.clone();
    changed.context.base_dir = "other".into();
    assert_ne!(
        description_fingerprint(&from_json),
        description_fingerprint(&changed)
    );
}
