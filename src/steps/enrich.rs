use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::artifact::Artifact;
use crate::context::RunContext;
use crate::error::{PipelineError, Result};
use crate::pipeline::{Step, StepContract, StepParameters, StepScope, parse_params};
use crate::resolve::resolve_artifact_key;
use crate::table::Table;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnrichWithContextConfig {
    #[serde(default)]
    pub input_key: Option<String>,
    #[serde(default)]
    pub output_key: Option<String>,
    #[serde(default)]
    pub context_mapping: Map<String, Value>,
    #[serde(default)]
    pub from_params: BTreeMap<String, String>,
    #[serde(default)]
    pub rename_columns: BTreeMap<String, String>,
    #[serde(default)]
    pub drop_columns: Vec<String>,
}

pub struct EnrichWithContext {
    config: EnrichWithContextConfig,
    name: String,
    contract: StepContract,
}

impl EnrichWithContext {
    pub const NAME: &'static str = "EnrichWithContext";

    pub fn new(config: EnrichWithContextConfig) -> Self {
        let output = config
            .output_key
            .clone()
            .or_else(|| config.input_key.as_deref().map(derive_output_key));
        let name = match &output {
            Some(key) => format!("Enrich_{key}"),
            None => Self::NAME.to_string(),
        };
        let contract = StepContract::new(
            config.input_key.clone().into_iter().collect(),
            output.into_iter().collect(),
        );
        Self {
            config,
            name,
            contract,
        }
    }

    pub fn construct(params: StepParameters) -> Result<Box<dyn Step>> {
        let config = parse_params(Self::NAME, params)?;
        Ok(Box::new(Self::new(config)))
    }

    fn enrich(&self, ctx: &RunContext, source: &Table) -> Result<Table> {
        let mut table = source.clone();

        let mapping = if self.config.context_mapping.is_empty() {
            ctx.params
                .get("enrich_data")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default()
        } else {
            self.config.context_mapping.clone()
        };
        for (column, value) in mapping {
            table.set_column(&column, value);
        }

        for (column, param) in &self.config.from_params {
            match ctx.params.get(param) {
                Some(value) => table.set_column(column, value.clone()),
                None => warn!(
                    step = self.name.as_str(),
                    column = column.as_str(),
                    param = param.as_str(),
                    "Run parameter missing; column not added"
                ),
            }
        }

        table
            .rename(&self.config.rename_columns)
            .map_err(|err| PipelineError::step(&self.name, err.to_string()))?;
        table.drop_columns(&self.config.drop_columns);
        Ok(table)
    }
}

/// `df_consolidado_x` and `df_x` both become `df_enriched_x`.
pub fn derive_output_key(input_key: &str) -> String {
    let base = input_key
        .strip_prefix("df_consolidado_")
        .or_else(|| input_key.strip_prefix("df_"))
        .unwrap_or(input_key);
    format!("df_enriched_{base}")
}

impl Step for EnrichWithContext {
    fn name(&self) -> &str {
        &self.name
    }

    fn contract(&self) -> &StepContract {
        &self.contract
    }

    fn resolves_at_runtime(&self) -> bool {
        self.config.input_key.is_none()
    }

    fn resolve(&mut self, ctx: &RunContext) -> Result<()> {
        let input = resolve_artifact_key(&self.name, ctx, self.config.input_key.as_deref())?;
        let output = self
            .config
            .output_key
            .clone()
            .unwrap_or_else(|| derive_output_key(&input));
        self.contract = StepContract::new(vec![input], vec![output]);
        Ok(())
    }

    fn run(&self, ctx: &mut StepScope<'_>) -> Result<()> {
        let (Some(input), Some(output)) =
            (self.contract.requires.first(), self.contract.produces.first())
        else {
            return Err(PipelineError::UnresolvedKey {
                step: self.name.clone(),
                what: "input artifact key",
            });
        };

        let source = ctx.artifacts.get_shared(input);
        let enriched = match source.as_deref() {
            Some(Artifact::Table(table)) if !table.is_empty() => self.enrich(ctx, table)?,
            Some(Artifact::Table(_)) | None => {
                warn!(
                    step = self.name.as_str(),
                    input = input.as_str(),
                    "Input table empty or missing; producing an empty table"
                );
                Table::default()
            }
            Some(other) => {
                return Err(PipelineError::step(
                    &self.name,
                    format!("artifact '{input}' is a {}, expected a table", other.kind()),
                ));
            }
        };

        info!(
            step = self.name.as_str(),
            rows = enriched.len(),
            columns = enriched.columns().len(),
            "Table enriched"
        );
        ctx.put_artifact(output, Artifact::Table(enriched))
    }
}

#[cfg(test)]
mod tests {
    use super::derive_output_key;

    #[test]
    fn output_key_strips_known_prefixes() {
        assert_eq!(
            derive_output_key("df_consolidado_estudiantes"),
            "df_enriched_estudiantes"
        );
        assert_eq!(derive_output_key("df_preguntas"), "df_enriched_preguntas");
        assert_eq!(derive_output_key("raw"), "df_enriched_raw");
    }
}
