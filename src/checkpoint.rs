use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::context::RunContext;
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerCheckpoint {
    #[serde(default)]
    pub workflow_id: Option<String>,
    pub fingerprint: String,
    pub total_steps: usize,
    pub current_step_index: usize,
    pub ctx: RunContext,
}

impl RunnerCheckpoint {
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| {
                PipelineError::io(format!("Failed to create directory: {}", parent.display()), err)
            })?;
        }
        let rendered = serde_json::to_string_pretty(self).map_err(|err| PipelineError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        fs::write(path, rendered).map_err(|err| {
            PipelineError::io(format!("Failed to write checkpoint: {}", path.display()), err)
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|err| {
            PipelineError::io(format!("Failed to read checkpoint: {}", path.display()), err)
        })?;
        serde_json::from_str(&content).map_err(|err| PipelineError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }

    pub fn ensure_matches(&self, fingerprint: &str, total_steps: usize) -> Result<()> {
        if self.fingerprint != fingerprint {
            return Err(PipelineError::CheckpointMismatch(format!(
                "fingerprint {} differs from current description {}",
                short(&self.fingerprint),
                short(fingerprint)
            )));
        }
        if self.total_steps != total_steps {
            return Err(PipelineError::CheckpointMismatch(format!(
                "checkpoint has {} steps, description has {total_steps}",
                self.total_steps
            )));
        }
        if self.current_step_index > total_steps {
            return Err(PipelineError::CheckpointMismatch(format!(
                "cursor {} is past the last step",
                self.current_step_index
            )));
        }
        Ok(())
    }
}

fn short(fingerprint: &str) -> &str {
    fingerprint.get(..12).unwrap_or(fingerprint)
}

/// Exclusive owner marker for a checkpoint, held while one process advances
/// it. The `<checkpoint>.lock` file is removed on drop.
#[derive(Debug)]
pub struct CheckpointLock {
    path: PathBuf,
}

impl CheckpointLock {
    pub fn acquire(checkpoint: &Path) -> Result<Self> {
        let path = lock_path(checkpoint);
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| {
                PipelineError::io(format!("Failed to create directory: {}", parent.display()), err)
            })?;
        }
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(PipelineError::SessionBusy(checkpoint.display().to_string()));
            }
            Err(err) => {
                return Err(PipelineError::io(
                    format!("Failed to create lock: {}", path.display()),
                    err,
                ));
            }
        };
        let _ = writeln!(file, "{}", std::process::id());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CheckpointLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %err, "Failed to release checkpoint lock");
        }
    }
}

pub fn lock_path(checkpoint: &Path) -> PathBuf {
    let mut name = OsString::from(checkpoint.as_os_str());
    name.push(".lock");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::{CheckpointLock, lock_path};
    use crate::error::PipelineError;
    use tempfile::tempdir;

    #[test]
    fn lock_is_exclusive_until_dropped() {
        let temp = tempdir().unwrap();
        let checkpoint = temp.path().join("state/run.json");

        let held = CheckpointLock::acquire(&checkpoint).unwrap();
        assert_eq!(held.path(), lock_path(&checkpoint));
        assert!(held.path().ends_with("run.json.lock"));
        assert!(matches!(
            CheckpointLock::acquire(&checkpoint),
            Err(PipelineError::SessionBusy(_))
        ));

        drop(held);
        assert!(!lock_path(&checkpoint).exists());
        assert!(CheckpointLock::acquire(&checkpoint).is_ok());
    }
}
