use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Step '{step}' requires missing artifacts: {missing:?}")]
    MissingDependency { step: String, missing: Vec<String> },

    #[error("Step '{step}' did not produce declared artifacts: {missing:?}")]
    MissingProduct { step: String, missing: Vec<String> },

    #[error("Step '{step}' attempted to write undeclared artifact '{key}'")]
    UndeclaredWrite { step: String, key: String },

    #[error("Unknown step '{name}'. Available steps: {}", available.join(", "))]
    UnknownStep { name: String, available: Vec<String> },

    #[error("Failed to instantiate step '{step}' with parameters {params}: {reason}")]
    Instantiation {
        step: String,
        params: String,
        reason: String,
    },

    #[error("Configuration file not found: {}", path.display())]
    ConfigNotFound { path: PathBuf },

    #[error("[{step}] Could not resolve {what} from the run context")]
    UnresolvedKey { step: String, what: &'static str },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("Invalid table in {}: {message}", path.display())]
    InvalidTable { path: PathBuf, message: String },

    #[error("Renaming would repeat column '{column}'")]
    DuplicateColumn { column: String },

    #[error("[{step}] {message}")]
    Step { step: String, message: String },

    #[error("Step '{step}' ({position}/{total}) failed: {source}")]
    StepFailed {
        step: String,
        position: usize,
        total: usize,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("Session '{0}' is already held by another caller")]
    SessionBusy(String),

    #[error("Checkpoint does not match the pipeline description: {0}")]
    CheckpointMismatch(String),
}

impl PipelineError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn step(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Step {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Innermost error, looking through the runner's `StepFailed` wrapper.
    pub fn root_cause(&self) -> &PipelineError {
        match self {
            Self::StepFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PipelineError;

    #[test]
    fn root_cause_unwraps_step_failure() {
        let err = PipelineError::StepFailed {
            step: "b".into(),
            position: 2,
            total: 2,
            source: Box::new(PipelineError::MissingDependency {
                step: "b".into(),
                missing: vec!["t1".into()],
            }),
        };
        assert!(matches!(
            err.root_cause(),
            PipelineError::MissingDependency { .. }
        ));
        assert!(err.to_string().contains("(2/2)"));
    }
}
