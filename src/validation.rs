use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::description::PipelineDescription;
use crate::pipeline::StepRegistry;

#[derive(Debug, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

pub fn validate_description(
    description: &PipelineDescription,
    registry: &StepRegistry,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    if description.pipeline.is_empty() {
        report
            .warnings
            .push("Pipeline contains no steps; a run will do nothing".into());
    }

    let mut produced: BTreeSet<String> = BTreeSet::new();
    let mut producers: BTreeMap<String, String> = BTreeMap::new();
    let mut dynamic_upstream = false;

    for (idx, spec) in description.pipeline.iter().enumerate() {
        let position = idx + 1;
        let params = spec.params.clone().unwrap_or_default();
        let step = match registry.create(&spec.step, params) {
            Ok(step) => step,
            Err(err) => {
                report
                    .errors
                    .push(format!("Step {position} ('{}'): {err}", spec.step));
                // Its outputs are unknown from here on.
                dynamic_upstream = true;
                continue;
            }
        };

        report.merge(check_requirements(
            position,
            step.name(),
            step.requires(),
            &produced,
            dynamic_upstream,
        ));

        for key in step.produces() {
            if let Some(previous) = producers.insert(key.clone(), step.name().to_string()) {
                report.warnings.push(format!(
                    "Step {position} ('{}') overwrites artifact '{key}' already produced by '{previous}'",
                    step.name()
                ));
            }
            produced.insert(key.clone());
        }
        if step.resolves_at_runtime() {
            dynamic_upstream = true;
        }
    }

    report
}

fn check_requirements(
    position: usize,
    name: &str,
    requires: &[String],
    produced: &BTreeSet<String>,
    dynamic_upstream: bool,
) -> ValidationReport {
    let mut report = ValidationReport::default();
    for key in requires.iter().filter(|key| !produced.contains(*key)) {
        let message =
            format!("Step {position} ('{name}') requires '{key}' which no earlier step produces");
        if dynamic_upstream {
            report
                .warnings
                .push(format!("{message} (an earlier step resolves its keys at run time)"));
        } else {
            report.errors.push(message);
        }
    }
    report
}
