use serde::Deserialize;
use tracing::{info, warn};

use crate::context::RunContext;
use crate::error::{PipelineError, Result};
use crate::pipeline::{Step, StepContract, StepParameters, StepScope, parse_params};
use crate::resolve::resolve_artifact_key;
use crate::table::write_table;

pub const DEFAULT_OUTPUT_FILENAME: &str = "consolidated.json";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExportTableConfig {
    #[serde(default)]
    pub input_key: Option<String>,
    #[serde(default)]
    pub output_filename: Option<String>,
}

pub struct ExportTable {
    config: ExportTableConfig,
    contract: StepContract,
}

impl ExportTable {
    pub const NAME: &'static str = "ExportTable";

    pub fn new(config: ExportTableConfig) -> Self {
        let requires = config.input_key.clone().into_iter().collect();
        Self {
            config,
            contract: StepContract::new(requires, Vec::new()),
        }
    }

    pub fn construct(params: StepParameters) -> Result<Box<dyn Step>> {
        let config = parse_params(Self::NAME, params)?;
        Ok(Box::new(Self::new(config)))
    }

    fn output_filename(&self, ctx: &RunContext) -> String {
        self.config
            .output_filename
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .or_else(|| ctx.param_str("output_filename"))
            .unwrap_or(DEFAULT_OUTPUT_FILENAME)
            .to_string()
    }
}

impl Step for ExportTable {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn contract(&self) -> &StepContract {
        &self.contract
    }

    fn resolves_at_runtime(&self) -> bool {
        self.config.input_key.is_none()
    }

    fn resolve(&mut self, ctx: &RunContext) -> Result<()> {
        let input = resolve_artifact_key(Self::NAME, ctx, self.config.input_key.as_deref())?;
        self.contract = StepContract::new(vec![input], Vec::new());
        Ok(())
    }

    fn run(&self, ctx: &mut StepScope<'_>) -> Result<()> {
        let Some(input) = self.contract.requires.first() else {
            return Err(PipelineError::UnresolvedKey {
                step: Self::NAME.to_string(),
                what: "input artifact key",
            });
        };
        let Some(artifact) = ctx.artifacts.get_shared(input) else {
            return Err(PipelineError::MissingDependency {
                step: Self::NAME.to_string(),
                missing: vec![input.clone()],
            });
        };
        let Some(table) = artifact.as_table() else {
            return Err(PipelineError::step(
                Self::NAME,
                format!("artifact '{input}' is a {}, expected a table", artifact.kind()),
            ));
        };
        if table.is_empty() {
            warn!(input = input.as_str(), "Nothing to export; table is empty");
            return Ok(());
        }

        let path = ctx
            .outputs_dir_or_default()
            .join(self.output_filename(ctx));
        write_table(&path, table)?;
        ctx.outputs.insert("consolidated".to_string(), path.clone());
        info!(
            input = input.as_str(),
            rows = table.len(),
            output = %path.display(),
            "Table exported"
        );
        Ok(())
    }
}
