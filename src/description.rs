use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::{RunContext, RunParams, new_run_id};
use crate::error::{PipelineError, Result};
use crate::pipeline::{Step, StepRegistry, StepSpec, build_pipeline};

pub const UNKNOWN_EVALUATION: &str = "unknown_evaluation";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ContextSpec {
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aux_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "RunParams::is_empty")]
    pub params: RunParams,
}

impl Default for ContextSpec {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            evaluation: None,
            run_id: None,
            inputs_dir: None,
            outputs_dir: None,
            aux_dir: None,
            work_dir: None,
            params: RunParams::new(),
        }
    }
}

fn default_base_dir() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineDescription {
    #[serde(default)]
    pub context: ContextSpec,
    #[serde(default)]
    pub pipeline: Vec<StepSpec>,
}

impl PipelineDescription {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(PipelineError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = fs::read_to_string(path).map_err(|err| {
            PipelineError::io(
                format!("Failed to read pipeline description: {}", path.display()),
                err,
            )
        })?;
        Self::parse(path, &content)
    }

    pub fn parse(path: &Path, content: &str) -> Result<Self> {
        let parse_error = |message: String| PipelineError::Parse {
            path: path.to_path_buf(),
            message,
        };
        if is_yaml(path) {
            serde_yaml::from_str(content).map_err(|err| parse_error(err.to_string()))
        } else {
            serde_json::from_str(content).map_err(|err| parse_error(err.to_string()))
        }
    }

    pub fn build_context(&self, root: &Path, workflow_id: Option<String>) -> RunContext {
        let spec = &self.context;
        let base_dir = if spec.base_dir.is_absolute() {
            spec.base_dir.clone()
        } else {
            root.join(&spec.base_dir)
        };
        let evaluation = spec
            .evaluation
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(UNKNOWN_EVALUATION);
        let run_id = spec.run_id.clone().unwrap_or_else(new_run_id);

        let mut ctx = RunContext::new(evaluation, run_id, base_dir);
        ctx.workflow_id = workflow_id;
        ctx.inputs_dir = spec.inputs_dir.as_deref().map(|dir| ctx.resolve_path(dir));
        ctx.outputs_dir = spec.outputs_dir.as_deref().map(|dir| ctx.resolve_path(dir));
        ctx.aux_dir = spec.aux_dir.as_deref().map(|dir| ctx.resolve_path(dir));
        ctx.work_dir = spec.work_dir.as_deref().map(|dir| ctx.resolve_path(dir));
        ctx.params = spec.params.clone();
        ctx
    }

    pub fn instantiate(&self, registry: &StepRegistry) -> Result<Vec<Box<dyn Step>>> {
        build_pipeline(registry, &self.pipeline)
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml" | "yml")
    )
}

/// Numeric suffix of a description's file stem: `pipeline002.json` gives
/// `"2"`. Stems without trailing digits give `None`.
pub fn workflow_id_from_path(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let digits_at = stem
        .char_indices()
        .rev()
        .take_while(|(_, ch)| ch.is_ascii_digit())
        .last()
        .map(|(idx, _)| idx)?;
    let number: u64 = stem[digits_at..].parse().ok()?;
    Some(number.to_string())
}

pub fn description_path(dir: &Path, workflow_id: u32) -> PathBuf {
    dir.join(format!("pipeline{workflow_id:03}.json"))
}

pub struct LoadedPipeline {
    pub description: PipelineDescription,
    pub ctx: RunContext,
    pub steps: Vec<Box<dyn Step>>,
}

pub fn load_pipeline(path: &Path, root: &Path, registry: &StepRegistry) -> Result<LoadedPipeline> {
    let description = PipelineDescription::load(path)?;
    let steps = description.instantiate(registry)?;
    let ctx = description.build_context(root, workflow_id_from_path(path));
    info!(
        description = %path.display(),
        steps = steps.len(),
        evaluation = ctx.evaluation.as_str(),
        run_id = ctx.run_id.as_str(),
        "Pipeline loaded"
    );
    Ok(LoadedPipeline {
        description,
        ctx,
        steps,
    })
}
