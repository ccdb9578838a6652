use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use glob::Pattern;
use serde::Deserialize;
use tracing::{info, warn};

use crate::artifact::Artifact;
use crate::error::{PipelineError, Result};
use crate::pipeline::{Step, StepContract, StepParameters, StepScope, parse_params};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputRule {
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default)]
    pub contains: Option<String>,
    #[serde(default)]
    pub exclude_prefix: Option<String>,
    #[serde(default)]
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiscoverInputsConfig {
    pub rules: BTreeMap<String, InputRule>,
    #[serde(default)]
    pub output_key: Option<String>,
}

struct CompiledRule {
    rule: InputRule,
    pattern: Option<Pattern>,
}

impl CompiledRule {
    fn matches(&self, file_name: &str) -> bool {
        let rule = &self.rule;
        if let Some(ext) = rule.extension.as_deref()
            && !ext.is_empty()
            && !file_name.ends_with(ext)
        {
            return false;
        }
        if let Some(needle) = rule.contains.as_deref()
            && !needle.is_empty()
            && !file_name.contains(needle)
        {
            return false;
        }
        if let Some(prefix) = rule.exclude_prefix.as_deref()
            && !prefix.is_empty()
            && file_name.starts_with(prefix)
        {
            return false;
        }
        if let Some(pattern) = &self.pattern
            && !pattern.matches(file_name)
        {
            return false;
        }
        true
    }
}

pub struct DiscoverInputs {
    rules: Vec<(String, CompiledRule)>,
    contract: StepContract,
}

impl DiscoverInputs {
    pub const NAME: &'static str = "DiscoverInputs";
    pub const DEFAULT_OUTPUT_KEY: &'static str = "discovered_inputs";

    pub fn new(config: DiscoverInputsConfig) -> Result<Self> {
        let mut rules = Vec::with_capacity(config.rules.len());
        for (group, rule) in config.rules {
            let pattern = match rule.pattern.as_deref() {
                Some(raw) => Some(Pattern::new(raw).map_err(|err| {
                    PipelineError::Instantiation {
                        step: Self::NAME.to_string(),
                        params: format!("rules.{group}.pattern = {raw:?}"),
                        reason: err.to_string(),
                    }
                })?),
                None => None,
            };
            rules.push((group, CompiledRule { rule, pattern }));
        }
        let output_key = config
            .output_key
            .unwrap_or_else(|| Self::DEFAULT_OUTPUT_KEY.to_string());
        Ok(Self {
            rules,
            contract: StepContract::new(Vec::new(), vec![output_key]),
        })
    }

    pub fn construct(params: StepParameters) -> Result<Box<dyn Step>> {
        let config = parse_params(Self::NAME, params)?;
        Ok(Box::new(Self::new(config)?))
    }

    fn output_key(&self) -> &str {
        &self.contract.produces[0]
    }
}

impl Step for DiscoverInputs {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn contract(&self) -> &StepContract {
        &self.contract
    }

    fn run(&self, ctx: &mut StepScope<'_>) -> Result<()> {
        let mut groups: BTreeMap<String, Vec<PathBuf>> = self
            .rules
            .iter()
            .map(|(group, _)| (group.clone(), Vec::new()))
            .collect();

        let input_dir = ctx.inputs_dir_or_default();
        if !input_dir.is_dir() {
            warn!(dir = %input_dir.display(), "Input directory does not exist");
        } else {
            let entries = fs::read_dir(&input_dir).map_err(|err| {
                PipelineError::io(
                    format!("Failed to list input directory: {}", input_dir.display()),
                    err,
                )
            })?;
            let mut names = Vec::new();
            for entry in entries {
                match entry {
                    Ok(entry) if entry.path().is_file() => {
                        names.push(entry.file_name().to_string_lossy().to_string());
                    }
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "Skipping unreadable directory entry"),
                }
            }
            names.sort();

            let mut files_found = 0usize;
            for name in &names {
                for (group, rule) in &self.rules {
                    if rule.matches(name)
                        && let Some(files) = groups.get_mut(group)
                    {
                        files.push(input_dir.join(name));
                        files_found += 1;
                    }
                }
            }
            info!(
                dir = %input_dir.display(),
                scanned = names.len(),
                classified = files_found,
                "Inputs discovered"
            );
        }

        for (group, files) in &groups {
            ctx.inputs.insert(group.clone(), files.clone());
        }
        let key = self.output_key().to_string();
        ctx.put_artifact(&key, Artifact::FileGroups(groups))
    }
}
