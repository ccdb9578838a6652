use report_pipeline::description::PipelineDescription;
use report_pipeline::pipeline::StepRegistry;
use report_pipeline::presets::{PRESETS, generate_preset};
use report_pipeline::validation::validate_description;
use std::fs;
use tempfile::tempdir;

#[test]
fn generate_consolidate_preset_writes_yaml() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("nested/consolidate.yaml");
    let generated = generate_preset("consolidate", &path).expect("preset generation");
    assert!(generated.exists());
    let contents = fs::read_to_string(&generated).expect("read preset");
    assert!(contents.contains("step: ConsolidateTables"));
    assert!(contents.contains("input_key: estudiantes"));
}

#[test]
fn every_preset_loads_and_validates() {
    let temp = tempdir().unwrap();
    let registry = StepRegistry::with_defaults();
    for name in PRESETS {
        let path = temp.path().join(format!("{name}.json"));
        generate_preset(name, &path).expect("preset generation");
        let description = PipelineDescription::load(&path).expect("preset should load");
        let report = validate_description(&description, &registry);
        assert!(report.is_ok(), "{name}: {:?}", report.errors);
    }
}

#[test]
fn unknown_preset_is_rejected() {
    let temp = tempdir().unwrap();
    assert!(generate_preset("web", &temp.path().join("web.json")).is_err());
}
