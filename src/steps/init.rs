use std::path::PathBuf;

use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::context::{RunParams, RunStatus, new_run_id};
use crate::error::Result;
use crate::pipeline::{Step, StepContract, StepParameters, StepScope, parse_params};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InitRunConfig {
    #[serde(default)]
    pub evaluation: Option<String>,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
    #[serde(default)]
    pub inputs_dir: Option<PathBuf>,
    #[serde(default)]
    pub outputs_dir: Option<PathBuf>,
    #[serde(default)]
    pub aux_dir: Option<PathBuf>,
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    #[serde(default)]
    pub params: RunParams,
}

pub struct InitRun {
    config: InitRunConfig,
    run_id: String,
    contract: StepContract,
}

impl InitRun {
    pub const NAME: &'static str = "InitRun";

    pub fn new(config: InitRunConfig) -> Self {
        // Captured once so that retries of this step keep the same identity.
        let run_id = config.run_id.clone().unwrap_or_else(new_run_id);
        Self {
            config,
            run_id,
            contract: StepContract::none(),
        }
    }

    pub fn construct(params: StepParameters) -> Result<Box<dyn Step>> {
        let config = parse_params(Self::NAME, params)?;
        Ok(Box::new(Self::new(config)))
    }
}

impl Step for InitRun {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn contract(&self) -> &StepContract {
        &self.contract
    }

    fn run(&self, ctx: &mut StepScope<'_>) -> Result<()> {
        if let Some(evaluation) = &self.config.evaluation {
            ctx.evaluation = evaluation.clone();
        }
        if ctx.evaluation.trim().is_empty() {
            ctx.evaluation = "unknown_evaluation".to_string();
        }
        ctx.run_id = self.run_id.clone();

        for (key, value) in &self.config.params {
            ctx.params.insert(key.clone(), value.clone());
        }
        let evaluation = Value::String(ctx.evaluation.clone());
        ctx.params.insert("evaluation".to_string(), evaluation);

        if let Some(base_dir) = &self.config.base_dir {
            ctx.base_dir = ctx.resolve_path(base_dir);
        }
        let inputs_dir = match &self.config.inputs_dir {
            Some(dir) => ctx.resolve_path(dir),
            None => ctx.inputs_dir_or_default(),
        };
        ctx.inputs_dir = Some(inputs_dir);
        if let Some(dir) = &self.config.outputs_dir {
            ctx.outputs_dir = Some(ctx.resolve_path(dir));
        }
        if let Some(dir) = &self.config.aux_dir {
            ctx.aux_dir = Some(ctx.resolve_path(dir));
        }
        if let Some(dir) = &self.config.work_dir {
            ctx.work_dir = Some(ctx.resolve_path(dir));
        }

        ctx.status = RunStatus::Running;
        info!(
            evaluation = ctx.evaluation.as_str(),
            run_id = ctx.run_id.as_str(),
            base_dir = %ctx.base_dir.display(),
            "Run initialised"
        );
        Ok(())
    }
}
