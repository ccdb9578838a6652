use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::artifact::Artifact;
use crate::context::RunContext;
use crate::error::{PipelineError, Result};

pub type StepParameters = Map<String, Value>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepContract {
    pub requires: Vec<String>,
    pub produces: Vec<String>,
}

impl StepContract {
    pub fn new(requires: Vec<String>, produces: Vec<String>) -> Self {
        Self { requires, produces }
    }

    pub fn none() -> Self {
        Self::default()
    }
}

pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    fn contract(&self) -> &StepContract;

    fn requires(&self) -> &[String] {
        &self.contract().requires
    }

    fn produces(&self) -> &[String] {
        &self.contract().produces
    }

    fn resolves_at_runtime(&self) -> bool {
        false
    }

    /// Recomputes resolved keys from the configured ones and `ctx`. Must
    /// yield the same result when called repeatedly on the same context.
    fn resolve(&mut self, _ctx: &RunContext) -> Result<()> {
        Ok(())
    }

    fn validate(&self, ctx: &RunContext) -> Result<()> {
        let missing: Vec<String> = self
            .requires()
            .iter()
            .filter(|key| !ctx.artifacts.contains(key))
            .cloned()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::MissingDependency {
                step: self.name().to_string(),
                missing,
            })
        }
    }

    fn run(&self, scope: &mut StepScope<'_>) -> Result<()>;
}

pub struct StepScope<'a> {
    ctx: &'a mut RunContext,
    step: &'a str,
    writable: &'a [String],
}

impl<'a> StepScope<'a> {
    pub fn new(ctx: &'a mut RunContext, step: &'a str, writable: &'a [String]) -> Self {
        Self {
            ctx,
            step,
            writable,
        }
    }

    pub fn put_artifact(&mut self, key: &str, artifact: Artifact) -> Result<()> {
        if !self.writable.iter().any(|allowed| allowed == key) {
            return Err(PipelineError::UndeclaredWrite {
                step: self.step.to_string(),
                key: key.to_string(),
            });
        }
        self.ctx.artifacts.insert(key, artifact);
        self.ctx.last_artifact_key = Some(key.to_string());
        Ok(())
    }
}

impl Deref for StepScope<'_> {
    type Target = RunContext;

    fn deref(&self) -> &RunContext {
        self.ctx
    }
}

impl DerefMut for StepScope<'_> {
    fn deref_mut(&mut self) -> &mut RunContext {
        self.ctx
    }
}

pub type StepConstructorFn = fn(StepParameters) -> Result<Box<dyn Step>>;

type StepConstructor = Arc<dyn Fn(StepParameters) -> Result<Box<dyn Step>> + Send + Sync>;

pub struct StepRegistry {
    factories: HashMap<String, StepConstructor>,
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StepRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        crate::steps::register_defaults(&mut registry);
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(StepParameters) -> Result<Box<dyn Step>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(constructor));
    }

    pub fn create(&self, name: &str, params: StepParameters) -> Result<Box<dyn Step>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| PipelineError::UnknownStep {
                name: name.to_string(),
                available: self.known_steps(),
            })?;
        factory(params)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn known_steps(&self) -> Vec<String> {
        let mut names: Vec<_> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

pub fn parse_params<T: DeserializeOwned>(step: &str, params: StepParameters) -> Result<T> {
    let attempted = Value::Object(params);
    let rendered = attempted.to_string();
    serde_json::from_value(attempted).map_err(|err| PipelineError::Instantiation {
        step: step.to_string(),
        params: rendered,
        reason: err.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StepSpec {
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<StepParameters>,
}

impl StepSpec {
    pub fn new(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            params: None,
        }
    }

    pub fn with_params(step: impl Into<String>, params: StepParameters) -> Self {
        Self {
            step: step.into(),
            params: Some(params),
        }
    }
}

pub fn build_pipeline(registry: &StepRegistry, specs: &[StepSpec]) -> Result<Vec<Box<dyn Step>>> {
    let mut steps = Vec::with_capacity(specs.len());
    for spec in specs {
        let params = spec.params.clone().unwrap_or_default();
        steps.push(registry.create(&spec.step, params)?);
    }
    Ok(steps)
}
