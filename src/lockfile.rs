use std::fs::File;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::description::PipelineDescription;
use crate::error::{PipelineError, Result};
use crate::pipeline::StepSpec;

#[derive(Debug, Serialize)]
pub struct PipelineLock {
    pub generated_at: DateTime<Utc>,
    pub fingerprint: String,
    pub base_dir: String,
    pub steps: Vec<StepLock>,
}

#[derive(Debug, Serialize)]
pub struct StepLock {
    pub name: String,
    pub params_hash: String,
}

pub fn description_fingerprint(description: &PipelineDescription) -> String {
    let canonical = serde_json::to_vec(description).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical);
    format!("{:x}", hasher.finalize())
}

pub fn build_lock(description: &PipelineDescription) -> PipelineLock {
    PipelineLock {
        generated_at: Utc::now(),
        fingerprint: description_fingerprint(description),
        base_dir: description.context.base_dir.to_string_lossy().to_string(),
        steps: description
            .pipeline
            .iter()
            .map(|spec| StepLock {
                name: spec.step.clone(),
                params_hash: hash_params(spec),
            })
            .collect(),
    }
}

pub fn generate_lock(description: &PipelineDescription, path: &Path) -> Result<PipelineLock> {
    let lock = build_lock(description);
    let file = File::create(path).map_err(|err| {
        PipelineError::io(format!("Failed to create lockfile: {}", path.display()), err)
    })?;
    serde_yaml::to_writer(file, &lock).map_err(|err| PipelineError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    Ok(lock)
}

fn hash_params(spec: &StepSpec) -> String {
    let mut hasher = Sha256::new();
    let serialized = serde_json::to_vec(&spec.params.clone().unwrap_or_default()).unwrap_or_default();
    hasher.update(spec.step.as_bytes());
    hasher.update(serialized);
    format!("{:x}", hasher.finalize())
}
