use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::artifact::ArtifactStore;

pub type RunParams = Map<String, Value>;

/// Time-derived run identifier, e.g. `20250314_093015`.
pub fn new_run_id() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    #[default]
    New,
    Running,
    NeedsReview,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    pub evaluation: String,
    pub run_id: String,
    #[serde(default)]
    pub workflow_id: Option<String>,
    pub base_dir: PathBuf,
    #[serde(default)]
    pub inputs_dir: Option<PathBuf>,
    #[serde(default)]
    pub outputs_dir: Option<PathBuf>,
    #[serde(default)]
    pub aux_dir: Option<PathBuf>,
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    #[serde(default)]
    pub params: RunParams,
    #[serde(default)]
    pub inputs: BTreeMap<String, Vec<PathBuf>>,
    #[serde(default)]
    pub(crate) artifacts: ArtifactStore,
    #[serde(default)]
    pub outputs: BTreeMap<String, PathBuf>,
    #[serde(default)]
    pub last_step: Option<String>,
    #[serde(default)]
    pub last_artifact_key: Option<String>,
    #[serde(default)]
    pub status: RunStatus,
}

impl RunContext {
    pub fn new(
        evaluation: impl Into<String>,
        run_id: impl Into<String>,
        base_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            evaluation: evaluation.into(),
            run_id: run_id.into(),
            workflow_id: None,
            base_dir: base_dir.into(),
            inputs_dir: None,
            outputs_dir: None,
            aux_dir: None,
            work_dir: None,
            params: RunParams::new(),
            inputs: BTreeMap::new(),
            artifacts: ArtifactStore::default(),
            outputs: BTreeMap::new(),
            last_step: None,
            last_artifact_key: None,
            status: RunStatus::New,
        }
    }

    pub fn inputs_dir_or_default(&self) -> PathBuf {
        self.inputs_dir
            .clone()
            .unwrap_or_else(|| self.base_dir.join("inputs"))
    }

    pub fn aux_dir_or_default(&self) -> PathBuf {
        self.aux_dir
            .clone()
            .unwrap_or_else(|| self.base_dir.join("aux_files"))
    }

    pub fn outputs_dir_or_default(&self) -> PathBuf {
        self.outputs_dir
            .clone()
            .unwrap_or_else(|| self.base_dir.clone())
    }

    pub fn work_dir_or_default(&self) -> PathBuf {
        self.work_dir
            .clone()
            .unwrap_or_else(|| self.base_dir.join(&self.evaluation).join(&self.run_id))
    }

    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn artifact_keys(&self) -> Vec<String> {
        self.artifacts.keys()
    }

    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "RunContext");
        let _ = writeln!(out, "  evaluation: {}", self.evaluation);
        let _ = writeln!(out, "  run_id: {}", self.run_id);
        let _ = writeln!(out, "  workflow_id: {:?}", self.workflow_id);
        let _ = writeln!(out, "  base_dir: {}", self.base_dir.display());
        for (label, dir) in [
            ("inputs_dir", &self.inputs_dir),
            ("outputs_dir", &self.outputs_dir),
            ("aux_dir", &self.aux_dir),
            ("work_dir", &self.work_dir),
        ] {
            match dir {
                Some(path) => {
                    let _ = writeln!(out, "  {label}: {}", path.display());
                }
                None => {
                    let _ = writeln!(out, "  {label}: <unset>");
                }
            }
        }
        let _ = writeln!(out, "  params:");
        for (key, value) in &self.params {
            let _ = writeln!(out, "    {key}: {value}");
        }
        let _ = writeln!(out, "  inputs:");
        for (group, files) in &self.inputs {
            let _ = writeln!(out, "    {group}: {} file(s)", files.len());
        }
        let _ = writeln!(out, "  artifacts:");
        for (key, artifact) in self.artifacts.iter() {
            let _ = writeln!(out, "    {key}: {}", artifact.kind());
        }
        let _ = writeln!(out, "  outputs:");
        for (name, path) in &self.outputs {
            let _ = writeln!(out, "    {name}: {}", path.display());
        }
        let _ = writeln!(out, "  last_step: {:?}", self.last_step);
        let _ = writeln!(out, "  last_artifact_key: {:?}", self.last_artifact_key);
        let _ = write!(out, "  status: {:?}", self.status);
        out
    }
}
