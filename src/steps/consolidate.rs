use serde::Deserialize;
use tracing::{info, warn};

use super::{param_string_list, param_string_map, skip_rows_for};
use crate::artifact::Artifact;
use crate::context::RunContext;
use crate::error::{PipelineError, Result};
use crate::pipeline::{Step, StepContract, StepParameters, StepScope, parse_params};
use crate::resolve::resolve_input_group;
use crate::table::{Table, read_table};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsolidateTablesConfig {
    #[serde(default)]
    pub input_key: Option<String>,
    #[serde(default)]
    pub output_key: Option<String>,
}

pub struct ConsolidateTables {
    config: ConsolidateTablesConfig,
    name: String,
    input_group: Option<String>,
    contract: StepContract,
}

impl ConsolidateTables {
    pub const NAME: &'static str = "ConsolidateTables";

    pub fn new(config: ConsolidateTablesConfig) -> Self {
        let name = match &config.input_key {
            Some(group) => format!("{}_{group}", Self::NAME),
            None => Self::NAME.to_string(),
        };
        let produces = config
            .output_key
            .clone()
            .or_else(|| config.input_key.as_deref().map(default_output_key))
            .into_iter()
            .collect();
        Self {
            config,
            name,
            input_group: None,
            contract: StepContract::new(Vec::new(), produces),
        }
    }

    pub fn construct(params: StepParameters) -> Result<Box<dyn Step>> {
        let config = parse_params(Self::NAME, params)?;
        Ok(Box::new(Self::new(config)))
    }

    fn read_group(&self, ctx: &RunContext, group: &str) -> Result<Option<Table>> {
        let files = ctx.inputs.get(group).cloned().unwrap_or_default();
        if files.is_empty() {
            warn!(step = self.name.as_str(), group, "No files to consolidate");
            return Ok(None);
        }

        let select = param_string_list(ctx, "select_columns");
        let renames = param_string_map(ctx, "rename_columns");

        let mut tables = Vec::with_capacity(files.len());
        for path in &files {
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            let skip = skip_rows_for(ctx, &file_name);
            let prepared = read_table(path).and_then(|mut table| {
                table.skip_rows(skip);
                if !select.is_empty() {
                    table = table.select(&select);
                }
                table.rename(&renames)?;
                Ok(table)
            });
            match prepared {
                Ok(table) => tables.push(table),
                Err(err) => {
                    warn!(
                        step = self.name.as_str(),
                        file = %path.display(),
                        skip_rows = skip,
                        error = %err,
                        "Skipping unreadable input file"
                    );
                }
            }
        }

        if tables.is_empty() {
            return Err(PipelineError::step(
                &self.name,
                format!(
                    "none of the {} file(s) in input group '{group}' could be read",
                    files.len()
                ),
            ));
        }
        info!(
            step = self.name.as_str(),
            group,
            read = tables.len(),
            skipped = files.len() - tables.len(),
            "Input files consolidated"
        );
        Ok(Some(Table::concat(tables)))
    }
}

pub fn default_output_key(group: &str) -> String {
    format!("df_consolidado_{group}")
}

impl Step for ConsolidateTables {
    fn name(&self) -> &str {
        &self.name
    }

    fn contract(&self) -> &StepContract {
        &self.contract
    }

    fn resolves_at_runtime(&self) -> bool {
        self.config.output_key.is_none() && self.config.input_key.is_none()
    }

    fn resolve(&mut self, ctx: &RunContext) -> Result<()> {
        let group = resolve_input_group(&self.name, ctx, self.config.input_key.as_deref())?;
        let output = self
            .config
            .output_key
            .clone()
            .unwrap_or_else(|| default_output_key(&group));
        self.contract = StepContract::new(Vec::new(), vec![output]);
        self.input_group = Some(group);
        Ok(())
    }

    fn run(&self, ctx: &mut StepScope<'_>) -> Result<()> {
        let (Some(group), Some(output)) = (&self.input_group, self.contract.produces.first()) else {
            return Err(PipelineError::UnresolvedKey {
                step: self.name.clone(),
                what: "input file group",
            });
        };
        let table = self.read_group(ctx, group)?.unwrap_or_default();
        ctx.put_artifact(output, Artifact::Table(table))
    }
}
