use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::table::Table;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Artifact {
    Table(Table),
    FileGroups(BTreeMap<String, Vec<PathBuf>>),
    Value(Value),
}

impl Artifact {
    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Artifact::Table(table) => Some(table),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Artifact::Table(table) => table.is_empty(),
            Artifact::FileGroups(groups) => groups.values().all(Vec::is_empty),
            Artifact::Value(value) => value.is_null(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Artifact::Table(_) => "table",
            Artifact::FileGroups(_) => "file_groups",
            Artifact::Value(_) => "value",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactStore {
    entries: BTreeMap<String, Arc<Artifact>>,
}

impl ArtifactStore {
    pub fn get(&self, key: &str) -> Option<&Artifact> {
        self.entries.get(key).map(Arc::as_ref)
    }

    pub fn get_shared(&self, key: &str) -> Option<Arc<Artifact>> {
        self.entries.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Artifact)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    pub(crate) fn insert(&mut self, key: impl Into<String>, artifact: Artifact) {
        self.entries.insert(key.into(), Arc::new(artifact));
    }

    pub fn snapshot(&self) -> ArtifactSnapshot {
        ArtifactSnapshot {
            entries: self.entries.clone(),
        }
    }

    pub(crate) fn restore(&mut self, snapshot: ArtifactSnapshot) {
        self.entries = snapshot.entries;
    }
}

#[derive(Debug, Clone, Default)]
pub struct ArtifactSnapshot {
    entries: BTreeMap<String, Arc<Artifact>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactDelta {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub updated: Vec<String>,
}

impl ArtifactDelta {
    pub fn between(before: &ArtifactSnapshot, after: &ArtifactStore) -> Self {
        let mut delta = ArtifactDelta::default();
        for (key, value) in &after.entries {
            match before.entries.get(key) {
                None => delta.added.push(key.clone()),
                Some(previous) if !Arc::ptr_eq(previous, value) => {
                    delta.updated.push(key.clone())
                }
                Some(_) => {}
            }
        }
        delta.removed = before
            .entries
            .keys()
            .filter(|key| !after.entries.contains_key(*key))
            .cloned()
            .collect();
        delta
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }

    /// First key the delta touches outside `writable`. Any removal counts.
    pub fn first_undeclared<'a>(&'a self, writable: &[String]) -> Option<&'a str> {
        self.removed
            .first()
            .or_else(|| {
                self.added
                    .iter()
                    .chain(&self.updated)
                    .find(|key| !writable.contains(*key))
            })
            .map(String::as_str)
    }
}

impl fmt::Display for ArtifactDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "unchanged");
        }
        let mut parts = Vec::new();
        if !self.added.is_empty() {
            parts.push(format!("added={:?}", self.added));
        }
        if !self.removed.is_empty() {
            parts.push(format!("removed={:?}", self.removed));
        }
        if !self.updated.is_empty() {
            parts.push(format!("updated={:?}", self.updated));
        }
        write!(f, "{}", parts.join("; "))
    }
}

pub fn log_delta(step: &str, delta: &ArtifactDelta) {
    if delta.is_empty() {
        info!(step, "Artifacts unchanged");
    } else {
        info!(step, delta = %delta, "Artifacts changed");
    }
}

#[cfg(test)]
mod tests {
    use super::{Artifact, ArtifactDelta, ArtifactStore};
    use serde_json::json;

    #[test]
    fn delta_tracks_identity_not_equality() {
        let mut store = ArtifactStore::default();
        store.insert("kept", Artifact::Value(json!(1)));
        store.insert("replaced", Artifact::Value(json!(2)));
        let before = store.snapshot();

        store.insert("replaced", Artifact::Value(json!(2)));
        store.insert("fresh", Artifact::Value(json!(3)));

        let delta = ArtifactDelta::between(&before, &store);
        assert_eq!(delta.added, vec!["fresh".to_string()]);
        assert_eq!(delta.updated, vec!["replaced".to_string()]);
        assert!(delta.removed.is_empty());
        assert_eq!(
            delta.to_string(),
            "added=[\"fresh\"]; updated=[\"replaced\"]"
        );
    }

    #[test]
    fn undeclared_keys_include_every_removal() {
        let mut store = ArtifactStore::default();
        store.insert("t1", Artifact::Value(json!(1)));
        let before = store.snapshot();

        store.insert("t2", Artifact::Value(json!(2)));
        let writable = vec!["t2".to_string()];
        assert_eq!(ArtifactDelta::between(&before, &store).first_undeclared(&writable), None);

        store.insert("t3", Artifact::Value(json!(3)));
        let delta = ArtifactDelta::between(&before, &store);
        assert_eq!(delta.first_undeclared(&writable), Some("t3"));

        let mut wiped = ArtifactStore::default();
        wiped.insert("t2", Artifact::Value(json!(2)));
        let delta = ArtifactDelta::between(&before, &wiped);
        assert_eq!(delta.first_undeclared(&writable), Some("t1"));

        wiped.restore(before);
        assert_eq!(wiped.keys(), vec!["t1".to_string()]);
    }

    #[test]
    fn empty_delta_reads_unchanged() {
        let store = ArtifactStore::default();
        let delta = ArtifactDelta::between(&store.snapshot(), &store);
        assert!(delta.is_empty());
        assert_eq!(delta.to_string(), "unchanged");
    }
}
