use std::fs;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::pipeline::{Step, StepContract, StepParameters, StepScope, parse_params};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteTempFilesConfig {}

pub struct DeleteTempFiles {
    contract: StepContract,
}

impl DeleteTempFiles {
    pub const NAME: &'static str = "DeleteTempFiles";

    pub fn new(_config: DeleteTempFilesConfig) -> Self {
        Self {
            contract: StepContract::none(),
        }
    }

    pub fn construct(params: StepParameters) -> Result<Box<dyn Step>> {
        let config = parse_params(Self::NAME, params)?;
        Ok(Box::new(Self::new(config)))
    }
}

impl Step for DeleteTempFiles {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn contract(&self) -> &StepContract {
        &self.contract
    }

    fn run(&self, ctx: &mut StepScope<'_>) -> Result<()> {
        let targets = [
            ("aux_dir", ctx.aux_dir.clone()),
            ("outputs_dir", ctx.outputs_dir.clone()),
            ("work_dir", ctx.work_dir.clone()),
        ];
        for (label, dir) in targets {
            let Some(dir) = dir else { continue };
            if !dir.is_dir() {
                continue;
            }
            match fs::remove_dir_all(&dir) {
                Ok(()) => info!(target_dir = label, path = %dir.display(), "Removed directory"),
                Err(err) => warn!(
                    target_dir = label,
                    path = %dir.display(),
                    error = %err,
                    "Failed to remove directory"
                ),
            }
        }
        Ok(())
    }
}
