use std::sync::atomic::{AtomicUsize, Ordering};

use report_pipeline::artifact::Artifact;
use report_pipeline::context::{RunContext, RunStatus};
use report_pipeline::error::{PipelineError, Result};
use report_pipeline::pipeline::{Step, StepContract, StepScope};
use report_pipeline::runner::{PipelineRunner, RunResponse, RunnerStatus};
use serde_json::json;

/// Writes `value` under each of its declared outputs.
struct Emit {
    name: &'static str,
    contract: StepContract,
}

impl Emit {
    fn boxed(name: &'static str, requires: &[&str], produces: &[&str]) -> Box<dyn Step> {
        Box::new(Emit {
            name,
            contract: contract(requires, produces),
        })
    }
}

impl Step for Emit {
    fn name(&self) -> &str {
        self.name
    }

    fn contract(&self) -> &StepContract {
        &self.contract
    }

    fn run(&self, scope: &mut StepScope<'_>) -> Result<()> {
        for key in &self.contract.produces {
            scope.put_artifact(key, Artifact::Value(json!(self.name)))?;
        }
        Ok(())
    }
}

/// Fails the first `failures` calls, then writes `t_flaky`.
struct Flaky {
    failures: usize,
    calls: AtomicUsize,
    contract: StepContract,
}

impl Step for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    fn contract(&self) -> &StepContract {
        &self.contract
    }

    fn run(&self, scope: &mut StepScope<'_>) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(PipelineError::step("flaky", format!("attempt {} failed", call + 1)));
        }
        scope.put_artifact("t_flaky", Artifact::Value(json!(call)))
    }
}

/// Declares an output it never writes.
struct Forgetful {
    contract: StepContract,
}

impl Step for Forgetful {
    fn name(&self) -> &str {
        "forgetful"
    }

    fn contract(&self) -> &StepContract {
        &self.contract
    }

    fn run(&self, _scope: &mut StepScope<'_>) -> Result<()> {
        Ok(())
    }
}

/// Tries to write a key it did not declare.
struct Trespasser {
    contract: StepContract,
}

impl Step for Trespasser {
    fn name(&self) -> &str {
        "trespasser"
    }

    fn contract(&self) -> &StepContract {
        &self.contract
    }

    fn run(&self, scope: &mut StepScope<'_>) -> Result<()> {
        scope.put_artifact("t1", Artifact::Value(json!("overwritten")))
    }
}

/// Swaps in a fresh context, dropping every stored artifact.
struct Usurper;

impl Step for Usurper {
    fn name(&self) -> &str {
        "usurper"
    }

    fn contract(&self) -> &StepContract {
        static NONE: StepContract = StepContract {
            requires: Vec::new(),
            produces: Vec::new(),
        };
        &NONE
    }

    fn run(&self, scope: &mut StepScope<'_>) -> Result<()> {
        **scope = RunContext::new("simce", "replaced", ".");
        Ok(())
    }
}

/// Flags the run for review.
struct Reviewer;

impl Step for Reviewer {
    fn name(&self) -> &str {
        "reviewer"
    }

    fn contract(&self) -> &StepContract {
        static NONE: StepContract = StepContract {
            requires: Vec::new(),
            produces: Vec::new(),
        };
        &NONE
    }

    fn run(&self, scope: &mut StepScope<'_>) -> Result<()> {
        scope.status = RunStatus::NeedsReview;
        Ok(())
    }
}

fn contract(requires: &[&str], produces: &[&str]) -> StepContract {
    StepContract::new(
        requires.iter().map(|key| key.to_string()).collect(),
        produces.iter().map(|key| key.to_string()).collect(),
    )
}

fn context() -> RunContext {
    RunContext::new("simce", "20250101_000000", ".")
}

fn two_steps() -> Vec<Box<dyn Step>> {
    vec![
        Emit::boxed("a", &[], &["t1"]),
        Emit::boxed("b", &["t1"], &["t2"]),
    ]
}

#[test]
fn empty_pipeline_completes_immediately() {
    let mut runner = PipelineRunner::new(context(), Vec::new());
    assert_eq!(runner.status(), RunnerStatus::Idle);

    let response = runner.run_to_response();
    match response {
        RunResponse::Success { artifacts, .. } => assert!(artifacts.is_empty()),
        other => panic!("expected success, got {other:?}"),
    }
    assert_eq!(runner.status(), RunnerStatus::Completed);
    assert_eq!(runner.current_step_index(), 0);
}

#[test]
fn single_step_advance_reports_progress() {
    let mut runner = PipelineRunner::new(context(), two_steps());

    let first = runner.run_next_step().unwrap();
    assert_eq!(first.step.as_deref(), Some("a"));
    assert!(!first.finished);
    assert_eq!(first.artifacts, vec!["t1".to_string()]);
    assert_eq!(runner.status(), RunnerStatus::Running);
    assert_eq!(runner.context().status, RunStatus::Running);

    let second = runner.run_next_step().unwrap();
    assert_eq!(second.step.as_deref(), Some("b"));
    assert!(second.finished);
    assert!(second.artifacts.contains(&"t1".to_string()));
    assert!(second.artifacts.contains(&"t2".to_string()));
    assert_eq!(runner.status(), RunnerStatus::Completed);
    assert_eq!(runner.context().status, RunStatus::Done);
    assert_eq!(runner.context().last_step.as_deref(), Some("b"));

    let again = runner.run_next_step().unwrap();
    assert!(again.finished);
    assert!(again.step.is_none());
    assert_eq!(runner.current_step_index(), 2);
}

#[test]
fn stepwise_and_full_runs_produce_the_same_artifacts() {
    let mut full = PipelineRunner::new(context(), two_steps());
    let outcomes = full.run_all().unwrap();
    assert_eq!(outcomes.len(), 2);

    let mut stepwise = PipelineRunner::new(context(), two_steps());
    while !stepwise.run_next_step().unwrap().finished {}

    assert_eq!(
        full.context().artifact_keys(),
        stepwise.context().artifact_keys()
    );
}

#[test]
fn missing_requirement_fails_before_running() {
    let steps = vec![Emit::boxed("b", &["t1"], &["t2"])];
    let mut runner = PipelineRunner::new(context(), steps);

    let err = runner.run_next_step().unwrap_err();
    assert!(matches!(
        err.root_cause(),
        PipelineError::MissingDependency { missing, .. } if missing == &vec!["t1".to_string()]
    ));
    assert!(!runner.context().artifacts().contains("t2"));
    assert_eq!(runner.status(), RunnerStatus::Failed);
    assert_eq!(runner.context().status, RunStatus::Failed);
}

#[test]
fn failed_step_keeps_cursor_and_can_be_retried() {
    let steps: Vec<Box<dyn Step>> = vec![
        Emit::boxed("a", &[], &["t1"]),
        Box::new(Flaky {
            failures: 1,
            calls: AtomicUsize::new(0),
            contract: contract(&["t1"], &["t_flaky"]),
        }),
    ];
    let mut runner = PipelineRunner::new(context(), steps);
    runner.run_next_step().unwrap();
    assert_eq!(runner.current_step_index(), 1);

    let err = runner.run_next_step().unwrap_err();
    match &err {
        PipelineError::StepFailed {
            step,
            position,
            total,
            ..
        } => {
            assert_eq!(step, "flaky");
            assert_eq!((*position, *total), (2, 2));
        }
        other => panic!("expected StepFailed, got {other:?}"),
    }
    assert_eq!(runner.current_step_index(), 1);
    assert_eq!(runner.status(), RunnerStatus::Failed);
    assert!(runner.context().artifacts().contains("t1"));

    let retry = runner.run_next_step().unwrap();
    assert!(retry.finished);
    assert_eq!(runner.current_step_index(), 2);
    assert_eq!(runner.status(), RunnerStatus::Completed);

    let metrics = runner.metrics().snapshot();
    assert_eq!(metrics.failed_steps, 1);
    assert_eq!(metrics.completed_steps, 2);
    assert_eq!(metrics.steps["flaky"].calls, 2);
    assert_eq!(metrics.steps["flaky"].failures, 1);
}

#[test]
fn declared_products_must_be_written() {
    let steps: Vec<Box<dyn Step>> = vec![Box::new(Forgetful {
        contract: contract(&[], &["t1"]),
    })];
    let mut runner = PipelineRunner::new(context(), steps);

    let err = runner.run_next_step().unwrap_err();
    assert!(matches!(
        err.root_cause(),
        PipelineError::MissingProduct { .. }
    ));
    assert_eq!(runner.current_step_index(), 0);
}

#[test]
fn undeclared_write_is_rejected_and_leaves_artifact_intact() {
    let steps: Vec<Box<dyn Step>> = vec![
        Emit::boxed("a", &[], &["t1"]),
        Box::new(Trespasser {
            contract: contract(&["t1"], &[]),
        }),
    ];
    let mut runner = PipelineRunner::new(context(), steps);

    let err = runner.run_all().unwrap_err();
    assert!(matches!(
        err.root_cause(),
        PipelineError::UndeclaredWrite { key, .. } if key == "t1"
    ));
    assert_eq!(
        runner.context().artifacts().get("t1"),
        Some(&Artifact::Value(json!("a")))
    );
}

#[test]
fn dropping_earlier_artifacts_is_rejected_and_restored() {
    let steps: Vec<Box<dyn Step>> = vec![Emit::boxed("a", &[], &["t1"]), Box::new(Usurper)];
    let mut runner = PipelineRunner::new(context(), steps);

    let err = runner.run_all().unwrap_err();
    assert!(matches!(
        err.root_cause(),
        PipelineError::UndeclaredWrite { step, key } if step == "usurper" && key == "t1"
    ));
    assert_eq!(runner.current_step_index(), 1);
    assert_eq!(
        runner.context().artifacts().get("t1"),
        Some(&Artifact::Value(json!("a")))
    );
}

#[test]
fn needs_review_survives_completion() {
    let steps: Vec<Box<dyn Step>> = vec![Box::new(Reviewer), Emit::boxed("a", &[], &["t1"])];
    let mut runner = PipelineRunner::new(context(), steps);
    runner.run_all().unwrap();

    assert_eq!(runner.status(), RunnerStatus::Completed);
    assert_eq!(runner.context().status, RunStatus::NeedsReview);
}

#[test]
fn error_response_carries_only_the_message() {
    let steps = vec![Emit::boxed("b", &["t1"], &["t2"])];
    let mut runner = PipelineRunner::new(context(), steps);
    let response = runner.run_to_response();

    let rendered = serde_json::to_value(&response).unwrap();
    assert_eq!(rendered["status"], "error");
    assert!(rendered["message"].as_str().unwrap().contains("t1"));
    assert!(rendered.get("artifacts").is_none());
}
