use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Default, Serialize, Clone)]
pub struct MetricsSnapshot {
    pub steps: BTreeMap<String, StepMetrics>,
    pub total_duration_ms: f64,
    pub completed_steps: u64,
    pub failed_steps: u64,
}

#[derive(Debug, Default, Serialize, Clone)]
pub struct StepMetrics {
    pub calls: u64,
    pub failures: u64,
    pub total_duration_ms: f64,
    pub max_duration_ms: f64,
}

#[derive(Debug, Default, Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsSnapshot>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_step(&self, step_name: &str) -> StepTimer {
        StepTimer {
            step: step_name.to_string(),
            started_at: Instant::now(),
            collector: self.inner.clone(),
            recorded: false,
        }
    }

    pub fn record_completion(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.completed_steps += 1;
        }
    }

    pub fn record_failure(&self, step_name: &str) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.failed_steps += 1;
            guard
                .steps
                .entry(step_name.to_string())
                .or_default()
                .failures += 1;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

pub struct StepTimer {
    step: String,
    started_at: Instant,
    collector: Arc<Mutex<MetricsSnapshot>>,
    recorded: bool,
}

impl StepTimer {
    fn record(&mut self) {
        if self.recorded {
            return;
        }
        let duration = self.started_at.elapsed();
        let duration_ms = as_millis(duration);
        if let Ok(mut guard) = self.collector.lock() {
            guard.total_duration_ms += duration_ms;
            let metrics = guard.steps.entry(self.step.clone()).or_default();
            metrics.calls += 1;
            metrics.total_duration_ms += duration_ms;
            if duration_ms > metrics.max_duration_ms {
                metrics.max_duration_ms = duration_ms;
            }
        }
        debug!(
            step = self.step.as_str(),
            duration_ms, "Step duration recorded"
        );
        self.recorded = true;
    }
}

impl Drop for StepTimer {
    fn drop(&mut self) {
        self.record();
    }
}

fn as_millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1_000.0
}

pub fn log_snapshot(snapshot: &MetricsSnapshot) {
    info!(
        total_duration_ms = snapshot.total_duration_ms,
        completed_steps = snapshot.completed_steps,
        failed_steps = snapshot.failed_steps,
        "Pipeline metrics summary"
    );
    for (step, metrics) in &snapshot.steps {
        info!(
            step = step.as_str(),
            calls = metrics.calls,
            failures = metrics.failures,
            total_ms = metrics.total_duration_ms,
            max_ms = metrics.max_duration_ms,
            "Step metrics"
        );
    }
}

impl MetricsSnapshot {
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();
        output.push_str("# HELP report_pipeline_steps_completed_total Steps that finished successfully\n");
        output.push_str("# TYPE report_pipeline_steps_completed_total counter\n");
        output.push_str(&format!(
            "report_pipeline_steps_completed_total {}\n",
            self.completed_steps
        ));
        output.push_str("# HELP report_pipeline_steps_failed_total Steps that returned an error\n");
        output.push_str("# TYPE report_pipeline_steps_failed_total counter\n");
        output.push_str(&format!(
            "report_pipeline_steps_failed_total {}\n",
            self.failed_steps
        ));
        output.push_str("# HELP report_pipeline_step_calls_total Step invocation count\n");
        output.push_str("# TYPE report_pipeline_step_calls_total counter\n");
        output.push_str(
            "# HELP report_pipeline_step_duration_seconds_total Accumulated step duration in seconds\n",
        );
        output.push_str("# TYPE report_pipeline_step_duration_seconds_total counter\n");
        output.push_str(
            "# HELP report_pipeline_step_duration_seconds_max Maximum step duration in seconds\n",
        );
        output.push_str("# TYPE report_pipeline_step_duration_seconds_max gauge\n");
        for (step, metrics) in &self.steps {
            output.push_str(&format!(
                "report_pipeline_step_calls_total{{step=\"{}\"}} {}\n",
                step, metrics.calls
            ));
            output.push_str(&format!(
                "report_pipeline_step_duration_seconds_total{{step=\"{}\"}} {:.6}\n",
                step,
                metrics.total_duration_ms / 1_000.0
            ));
            output.push_str(&format!(
                "report_pipeline_step_duration_seconds_max{{step=\"{}\"}} {:.6}\n",
                step,
                metrics.max_duration_ms / 1_000.0
            ));
        }
        output.push_str("# HELP report_pipeline_duration_seconds Total time spent inside steps\n");
        output.push_str("# TYPE report_pipeline_duration_seconds gauge\n");
        output.push_str(&format!(
            "report_pipeline_duration_seconds {:.6}\n",
            self.total_duration_ms / 1_000.0
        ));
        output
    }
}
