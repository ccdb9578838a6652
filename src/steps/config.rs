use std::fs;
use std::path::PathBuf;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::pipeline::{Step, StepContract, StepParameters, StepScope, parse_params};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadConfigConfig {
    pub config_path: PathBuf,
}

pub struct LoadConfig {
    config: LoadConfigConfig,
    contract: StepContract,
}

impl LoadConfig {
    pub const NAME: &'static str = "LoadConfig";

    pub fn new(config: LoadConfigConfig) -> Self {
        Self {
            config,
            contract: StepContract::none(),
        }
    }

    pub fn construct(params: StepParameters) -> Result<Box<dyn Step>> {
        let config = parse_params(Self::NAME, params)?;
        Ok(Box::new(Self::new(config)))
    }
}

impl Step for LoadConfig {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn contract(&self) -> &StepContract {
        &self.contract
    }

    fn run(&self, ctx: &mut StepScope<'_>) -> Result<()> {
        let path = ctx.resolve_path(&self.config.config_path);
        if !path.is_file() {
            return Err(PipelineError::ConfigNotFound { path });
        }
        let content = fs::read_to_string(&path).map_err(|err| {
            PipelineError::io(format!("Failed to read config: {}", path.display()), err)
        })?;
        let parsed: Value = serde_json::from_str(&content).map_err(|err| PipelineError::Parse {
            path: path.clone(),
            message: err.to_string(),
        })?;
        let Value::Object(config) = parsed else {
            return Err(PipelineError::Parse {
                path,
                message: "expected a JSON object at the top level".into(),
            });
        };

        ctx.params.insert(
            "config_path".to_string(),
            Value::String(path.to_string_lossy().to_string()),
        );
        let output_filename = config
            .get("output_filename")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        if let Some(name) = &output_filename {
            ctx.params
                .insert("output_filename".to_string(), Value::String(name.clone()));
        }

        let mut copied = 0usize;
        for (key, value) in config {
            if !ctx.params.contains_key(&key) {
                ctx.params.insert(key, value);
                copied += 1;
            }
        }
        debug!(copied, "Config entries merged into params");

        if let (Some(dir), Some(name)) = (ctx.outputs_dir.clone(), output_filename) {
            ctx.outputs.insert("consolidated".to_string(), dir.join(name));
        }

        info!(config = %path.display(), "Configuration loaded");
        Ok(())
    }
}
