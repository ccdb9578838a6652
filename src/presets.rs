use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Value, json};

use crate::description::{ContextSpec, PipelineDescription};
use crate::error::{PipelineError, Result};
use crate::pipeline::StepSpec;
use crate::steps::{ConsolidateTables, DiscoverInputs, EnrichWithContext, ExportTable, InitRun};

pub const PRESETS: &[&str] = &["consolidate", "discover"];

pub fn preset(name: &str) -> Result<PipelineDescription> {
    match name {
        "consolidate" => Ok(consolidate_preset()),
        "discover" => Ok(discover_preset()),
        other => Err(PipelineError::step(
            "presets",
            format!("Unknown preset '{other}'. Available presets: {}", PRESETS.join(", ")),
        )),
    }
}

pub fn generate_preset(name: &str, destination: &Path) -> Result<PathBuf> {
    let description = preset(name)?;
    let is_yaml = matches!(
        destination.extension().and_then(|ext| ext.to_str()),
        Some("yaml" | "yml")
    );
    let rendered = if is_yaml {
        serde_yaml::to_string(&description).map_err(|err| err.to_string())
    } else {
        serde_json::to_string_pretty(&description).map_err(|err| err.to_string())
    }
    .map_err(|message| PipelineError::Parse {
        path: destination.to_path_buf(),
        message,
    })?;

    if let Some(parent) = destination.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|err| {
            PipelineError::io(format!("Failed to create directory: {}", parent.display()), err)
        })?;
    }
    fs::write(destination, rendered).map_err(|err| {
        PipelineError::io(
            format!("Failed to write preset description: {}", destination.display()),
            err,
        )
    })?;

    Ok(destination.to_path_buf())
}

fn consolidate_preset() -> PipelineDescription {
    PipelineDescription {
        context: ContextSpec {
            evaluation: Some("simce".into()),
            ..ContextSpec::default()
        },
        pipeline: vec![
            step(
                InitRun::NAME,
                json!({
                    "outputs_dir": "outputs",
                    "params": {"year": 2025, "grade": "4B"}
                }),
            ),
            step(DiscoverInputs::NAME, student_rules()),
            step(
                ConsolidateTables::NAME,
                json!({"input_key": "estudiantes"}),
            ),
            step(
                EnrichWithContext::NAME,
                json!({"from_params": {"Año": "year", "Curso": "grade"}}),
            ),
            step(
                ExportTable::NAME,
                json!({"output_filename": "consolidado_estudiantes.json"}),
            ),
        ],
    }
}

fn discover_preset() -> PipelineDescription {
    PipelineDescription {
        context: ContextSpec::default(),
        pipeline: vec![
            step(InitRun::NAME, json!({})),
            step(DiscoverInputs::NAME, student_rules()),
        ],
    }
}

fn student_rules() -> Value {
    json!({
        "rules": {
            "estudiantes": {"extension": ".json", "contains": "Resultados", "exclude_prefix": "~$"},
            "preguntas": {"extension": ".json", "contains": "Pregunta", "exclude_prefix": "~$"}
        }
    })
}

fn step(name: &str, params: Value) -> StepSpec {
    match params {
        Value::Object(map) if !map.is_empty() => StepSpec::with_params(name, map),
        _ => StepSpec::new(name),
    }
}
