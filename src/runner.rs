use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{Level, debug, error, info, instrument};

use crate::artifact::{ArtifactDelta, log_delta};
use crate::checkpoint::RunnerCheckpoint;
use crate::context::{RunContext, RunStatus};
use crate::description::{LoadedPipeline, PipelineDescription, load_pipeline};
use crate::error::{PipelineError, Result};
use crate::lockfile::description_fingerprint;
use crate::observability::MetricsCollector;
use crate::pipeline::{Step, StepRegistry, StepScope};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunnerStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    /// `None` when the cursor was already at the end and nothing ran.
    pub step: Option<String>,
    pub message: String,
    pub artifacts: Vec<String>,
    pub finished: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RunResponse {
    Success {
        message: String,
        artifacts: Vec<String>,
    },
    Error {
        message: String,
    },
}

impl RunResponse {
    pub fn error(err: impl fmt::Display) -> Self {
        RunResponse::Error {
            message: err.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunResponse::Success { .. })
    }
}

pub struct PipelineRunner {
    ctx: RunContext,
    pipeline: Vec<Box<dyn Step>>,
    current_step_index: usize,
    status: RunnerStatus,
    metrics: MetricsCollector,
    fingerprint: Option<String>,
}

impl PipelineRunner {
    pub fn new(ctx: RunContext, pipeline: Vec<Box<dyn Step>>) -> Self {
        Self {
            ctx,
            pipeline,
            current_step_index: 0,
            status: RunnerStatus::Idle,
            metrics: MetricsCollector::new(),
            fingerprint: None,
        }
    }

    pub fn from_loaded(loaded: LoadedPipeline) -> Self {
        let fingerprint = description_fingerprint(&loaded.description);
        let mut runner = Self::new(loaded.ctx, loaded.steps);
        runner.fingerprint = Some(fingerprint);
        runner
    }

    pub fn load(path: &Path, root: &Path, registry: &StepRegistry) -> Result<Self> {
        load_pipeline(path, root, registry).map(Self::from_loaded)
    }

    pub fn resume(
        description: &PipelineDescription,
        pipeline: Vec<Box<dyn Step>>,
        checkpoint: RunnerCheckpoint,
    ) -> Result<Self> {
        let fingerprint = description_fingerprint(description);
        checkpoint.ensure_matches(&fingerprint, pipeline.len())?;
        let status = if checkpoint.current_step_index == pipeline.len() {
            RunnerStatus::Completed
        } else if checkpoint.current_step_index == 0 {
            RunnerStatus::Idle
        } else {
            RunnerStatus::Running
        };
        info!(
            workflow_id = ?checkpoint.workflow_id,
            cursor = checkpoint.current_step_index,
            total = pipeline.len(),
            "Runner resumed from checkpoint"
        );
        Ok(Self {
            ctx: checkpoint.ctx,
            pipeline,
            current_step_index: checkpoint.current_step_index,
            status,
            metrics: MetricsCollector::new(),
            fingerprint: Some(fingerprint),
        })
    }

    pub fn checkpoint(&self) -> RunnerCheckpoint {
        RunnerCheckpoint {
            workflow_id: self.ctx.workflow_id.clone(),
            fingerprint: self.fingerprint.clone().unwrap_or_default(),
            total_steps: self.pipeline.len(),
            current_step_index: self.current_step_index,
            ctx: self.ctx.clone(),
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn current_step_index(&self) -> usize {
        self.current_step_index
    }

    pub fn total_steps(&self) -> usize {
        self.pipeline.len()
    }

    pub fn status(&self) -> RunnerStatus {
        self.status
    }

    pub fn is_finished(&self) -> bool {
        self.current_step_index >= self.pipeline.len()
    }

    pub fn metrics(&self) -> MetricsCollector {
        self.metrics.clone()
    }

    pub fn run_next_step(&mut self) -> Result<StepOutcome> {
        let total = self.pipeline.len();
        let index = self.current_step_index;
        if index >= total {
            self.status = RunnerStatus::Completed;
            return Ok(StepOutcome {
                step: None,
                message: "Pipeline already completed".to_string(),
                artifacts: self.ctx.artifact_keys(),
                finished: true,
            });
        }

        self.status = RunnerStatus::Running;
        if self.ctx.status != RunStatus::NeedsReview {
            self.ctx.status = RunStatus::Running;
        }

        let position = index + 1;
        let step = self.pipeline[index].as_mut();
        let name = step.name().to_string();
        if let Err(source) = execute_step(step, &mut self.ctx, &self.metrics, position, total) {
            self.status = RunnerStatus::Failed;
            self.ctx.status = RunStatus::Failed;
            self.metrics.record_failure(&name);
            error!(step = name.as_str(), position, total, error = %source, "Step failed");
            return Err(PipelineError::StepFailed {
                step: name,
                position,
                total,
                source: Box::new(source),
            });
        }

        self.metrics.record_completion();
        self.current_step_index = position;
        let finished = self.current_step_index == total;
        if finished {
            self.status = RunnerStatus::Completed;
            if self.ctx.status != RunStatus::NeedsReview {
                self.ctx.status = RunStatus::Done;
            }
            info!(total, status = ?self.ctx.status, "Pipeline completed");
        }

        Ok(StepOutcome {
            message: format!("Step '{name}' executed ({position}/{total})"),
            step: Some(name),
            artifacts: self.ctx.artifact_keys(),
            finished,
        })
    }

    #[instrument(skip(self), fields(evaluation = %self.ctx.evaluation, run_id = %self.ctx.run_id))]
    pub fn run_all(&mut self) -> Result<Vec<StepOutcome>> {
        let mut outcomes = Vec::with_capacity(self.pipeline.len());
        loop {
            let outcome = self.run_next_step()?;
            let finished = outcome.finished;
            if outcome.step.is_some() {
                outcomes.push(outcome);
            }
            if finished {
                return Ok(outcomes);
            }
        }
    }

    pub fn run_to_response(&mut self) -> RunResponse {
        match self.run_all() {
            Ok(outcomes) => RunResponse::Success {
                message: format!(
                    "Pipeline executed successfully ({} step(s))",
                    outcomes.len()
                ),
                artifacts: self.ctx.artifact_keys(),
            },
            Err(err) => RunResponse::error(err),
        }
    }
}

fn execute_step(
    step: &mut dyn Step,
    ctx: &mut RunContext,
    metrics: &MetricsCollector,
    position: usize,
    total: usize,
) -> Result<()> {
    let span = tracing::span!(Level::INFO, "step", step = step.name(), position, total);
    let _span_guard = span.enter();

    step.resolve(ctx)?;
    step.validate(ctx)?;

    let step: &dyn Step = step;
    let before = ctx.artifacts.snapshot();
    let outcome = {
        let _timer = metrics.start_step(step.name());
        let mut scope = StepScope::new(ctx, step.name(), step.produces());
        step.run(&mut scope)
    };

    let delta = ArtifactDelta::between(&before, &ctx.artifacts);
    if let Some(key) = delta.first_undeclared(step.produces()) {
        let key = key.to_string();
        ctx.artifacts.restore(before);
        return Err(PipelineError::UndeclaredWrite {
            step: step.name().to_string(),
            key,
        });
    }
    outcome?;

    let missing: Vec<String> = step
        .produces()
        .iter()
        .filter(|key| !ctx.artifacts.contains(key))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::MissingProduct {
            step: step.name().to_string(),
            missing,
        });
    }

    ctx.last_step = Some(step.name().to_string());
    log_delta(step.name(), &delta);
    debug!(context = %ctx.describe(), "Context after step");
    Ok(())
}

pub fn run_pipeline(path: &Path, root: &Path, registry: &StepRegistry) -> RunResponse {
    match PipelineRunner::load(path, root, registry) {
        Ok(mut runner) => runner.run_to_response(),
        Err(err) => {
            error!(description = %path.display(), error = %err, "Pipeline failed to load");
            RunResponse::error(err)
        }
    }
}
