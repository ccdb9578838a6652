use std::collections::BTreeMap;

use serde_json::Value;

use crate::context::RunContext;
use crate::pipeline::{StepConstructorFn, StepRegistry};

pub mod cleanup;
pub mod config;
pub mod consolidate;
pub mod discover;
pub mod enrich;
pub mod export;
pub mod init;

pub use cleanup::DeleteTempFiles;
pub use config::LoadConfig;
pub use consolidate::ConsolidateTables;
pub use discover::{DiscoverInputs, InputRule};
pub use enrich::EnrichWithContext;
pub use export::ExportTable;
pub use init::InitRun;

pub const BUILTIN_STEPS: &[(&str, StepConstructorFn)] = &[
    (InitRun::NAME, InitRun::construct),
    (LoadConfig::NAME, LoadConfig::construct),
    (DiscoverInputs::NAME, DiscoverInputs::construct),
    (ConsolidateTables::NAME, ConsolidateTables::construct),
    (EnrichWithContext::NAME, EnrichWithContext::construct),
    (ExportTable::NAME, ExportTable::construct),
    (DeleteTempFiles::NAME, DeleteTempFiles::construct),
];

pub fn register_defaults(registry: &mut StepRegistry) {
    for (name, constructor) in BUILTIN_STEPS {
        registry.register(*name, *constructor);
    }
}

fn param_string_list(ctx: &RunContext, key: &str) -> Vec<String> {
    match ctx.params.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(joined)) => joined
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn param_string_map(ctx: &RunContext, key: &str) -> BTreeMap<String, String> {
    ctx.params
        .get(key)
        .and_then(Value::as_object)
        .map(|object| {
            object
                .iter()
                .filter_map(|(from, to)| to.as_str().map(|to| (from.clone(), to.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Leading records to drop from `file_name`, from `params.skip_rows` given
/// either as one number or as `{file_name: n, default: n}`.
fn skip_rows_for(ctx: &RunContext, file_name: &str) -> usize {
    let count = match ctx.params.get("skip_rows") {
        Some(Value::Object(per_file)) => per_file
            .get(file_name)
            .or_else(|| per_file.get("default"))
            .and_then(value_as_u64),
        Some(other) => value_as_u64(other),
        None => None,
    };
    count.and_then(|n| usize::try_from(n).ok()).unwrap_or(0)
}

fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(num) => num.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
