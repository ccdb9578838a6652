use crate::context::RunContext;
use crate::error::{PipelineError, Result};

/// Artifact key a step should read: the explicit key, otherwise the artifact
/// the previous step wrote, otherwise `params.default_artifact_key`.
pub fn resolve_artifact_key(step: &str, ctx: &RunContext, explicit: Option<&str>) -> Result<String> {
    non_empty(explicit)
        .or_else(|| non_empty(ctx.last_artifact_key.as_deref()))
        .or_else(|| ctx.param_str("default_artifact_key"))
        .map(str::to_string)
        .ok_or_else(|| PipelineError::UnresolvedKey {
            step: step.to_string(),
            what: "input artifact key",
        })
}

pub fn resolve_input_group(step: &str, ctx: &RunContext, explicit: Option<&str>) -> Result<String> {
    if let Some(key) = non_empty(explicit)
        .or_else(|| ctx.param_str("input_key"))
        .or_else(|| ctx.param_str("default_input_key"))
    {
        return Ok(key.to_string());
    }
    if ctx.inputs.len() == 1
        && let Some(only) = ctx.inputs.keys().next()
    {
        return Ok(only.clone());
    }
    Err(PipelineError::UnresolvedKey {
        step: step.to_string(),
        what: "input file group",
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
