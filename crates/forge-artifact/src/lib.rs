//! Loads the runtime artifact, validates it, builds the lookup indices the
//! rest of the runtime needs, and hot-reloads it from disk (C8).
//!
//! The reload strategy mirrors `entity-gateway`'s `IndexRegistry`: the
//! current artifact sits behind a single [`tokio::sync::RwLock`], readers
//! take a short read guard to clone the `Arc`, and a reload swaps the whole
//! pointer in one write so in-flight reads never observe a half-updated
//! artifact.

use forge_emit::Artifact;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to read artifact file {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("failed to parse artifact JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("artifact migration checksum mismatch: artifact claims {claimed}, computed {computed}")]
    ChecksumMismatch { claimed: String, computed: String },
    #[error("action {0:?} references unknown entity {1:?}")]
    UnknownActionEntity(String, String),
    #[error("hook for {0:?}.{1:?} references unknown job {2:?}")]
    UnknownHookJob(String, String, String),
    #[error("webhook {0:?} triggers unknown action {1:?}")]
    UnknownWebhookAction(String, String),
}

/// Lookup indices built once per load, so hot paths (action dispatch, hook
/// fan-out, view resolution) never linearly scan the artifact's vectors.
pub struct Indices {
    pub entity_by_name: HashMap<String, usize>,
    pub action_by_name: HashMap<String, usize>,
    pub hooks_by_entity_operation: HashMap<(String, forge_syntax::Operation), Vec<usize>>,
    pub rules_by_entity_operation: HashMap<(String, forge_syntax::Operation), Vec<usize>>,
    pub message_by_code: HashMap<String, usize>,
    pub view_by_name: HashMap<String, String>,
}

fn build_indices(artifact: &Artifact) -> Indices {
    let entity_by_name = artifact.entities.keys().enumerate().map(|(i, name)| (name.clone(), i)).collect();
    let action_by_name = artifact.actions.keys().enumerate().map(|(i, name)| (name.clone(), i)).collect();

    let mut hooks_by_entity_operation: HashMap<(String, forge_syntax::Operation), Vec<usize>> = HashMap::new();
    for (i, hook) in artifact.hooks.iter().enumerate() {
        hooks_by_entity_operation.entry((hook.entity.clone(), hook.operation)).or_default().push(i);
    }

    let mut rules_by_entity_operation: HashMap<(String, forge_syntax::Operation), Vec<usize>> = HashMap::new();
    for (i, rule) in artifact.rules.iter().enumerate() {
        rules_by_entity_operation.entry((rule.entity.clone(), rule.operation)).or_default().push(i);
    }

    let message_by_code = artifact.messages.keys().enumerate().map(|(i, code)| (code.clone(), i)).collect();
    let view_by_name = artifact.views.keys().map(|name| (name.clone(), name.clone())).collect();

    Indices { entity_by_name, action_by_name, hooks_by_entity_operation, rules_by_entity_operation, message_by_code, view_by_name }
}

fn validate(artifact: &Artifact) -> Result<(), ArtifactError> {
    for (name, action) in &artifact.actions {
        if !artifact.entities.contains_key(&action.input_entity) {
            return Err(ArtifactError::UnknownActionEntity(name.clone(), action.input_entity.clone()));
        }
    }
    for hook in &artifact.hooks {
        for job in &hook.job_names {
            if !artifact.jobs.contains_key(job) {
                return Err(ArtifactError::UnknownHookJob(hook.entity.clone(), hook.operation.as_str().to_string(), job.clone()));
            }
        }
    }
    for (provider, webhook) in &artifact.webhooks {
        for action in &webhook.triggers {
            if !artifact.actions.contains_key(action) {
                return Err(ArtifactError::UnknownWebhookAction(provider.clone(), action.clone()));
            }
        }
    }
    let computed: String = {
        let mut hasher = Sha256::new();
        for stmt in &artifact.migration.up_statements {
            hasher.update(stmt.as_bytes());
        }
        hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
    };
    if computed != artifact.migration.checksum {
        return Err(ArtifactError::ChecksumMismatch { claimed: artifact.migration.checksum.clone(), computed });
    }
    Ok(())
}

pub fn load_from_str(json: &str) -> Result<(Artifact, Indices), ArtifactError> {
    let artifact: Artifact = serde_json::from_str(json)?;
    validate(&artifact)?;
    let indices = build_indices(&artifact);
    Ok((artifact, indices))
}

pub fn load_from_path(path: &Path) -> Result<(Artifact, Indices), ArtifactError> {
    let json = std::fs::read_to_string(path).map_err(|source| ArtifactError::Read { path: path.to_path_buf(), source })?;
    load_from_str(&json)
}

/// A single reload attempt, kept for the audit ring buffer so an operator
/// can see what happened across the last N reloads without reading logs.
#[derive(Clone, Debug, serde::Serialize)]
pub struct ReloadRecord {
    pub version: Option<String>,
    pub ok: bool,
    pub message: String,
}

struct Loaded {
    artifact: Arc<Artifact>,
    indices: Arc<Indices>,
}

/// Holds the live artifact behind a lock, supporting hot reload without
/// ever exposing readers to a half-swapped state.
pub struct ArtifactStore {
    path: PathBuf,
    current: RwLock<Loaded>,
    history: RwLock<Vec<ReloadRecord>>,
    history_capacity: usize,
}

impl ArtifactStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, ArtifactError> {
        let path = path.into();
        let (artifact, indices) = load_from_path(&path)?;
        let version = artifact.migration.version.clone();
        let store = Self {
            path,
            current: RwLock::new(Loaded { artifact: Arc::new(artifact), indices: Arc::new(indices) }),
            history: RwLock::new(vec![ReloadRecord { version: Some(version), ok: true, message: "initial load".to_string() }]),
            history_capacity: 20,
        };
        Ok(store)
    }

    pub async fn artifact(&self) -> Arc<Artifact> {
        self.current.read().await.artifact.clone()
    }

    pub async fn indices(&self) -> Arc<Indices> {
        self.current.read().await.indices.clone()
    }

    /// Re-reads the artifact file and swaps it in atomically. On failure
    /// the previously loaded artifact stays live — a bad reload must never
    /// take the runtime down.
    pub async fn reload(&self) -> Result<(), ArtifactError> {
        let result = load_from_path(&self.path);
        let mut history = self.history.write().await;
        match result {
            Ok((artifact, indices)) => {
                let version = artifact.migration.version.clone();
                let mut current = self.current.write().await;
                *current = Loaded { artifact: Arc::new(artifact), indices: Arc::new(indices) };
                tracing::info!(version = %version, "forge artifact reloaded");
                history.push(ReloadRecord { version: Some(version), ok: true, message: "reload succeeded".to_string() });
                Self::trim(&mut history, self.history_capacity);
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, "forge artifact reload failed, keeping previous artifact live");
                history.push(ReloadRecord { version: None, ok: false, message: err.to_string() });
                Self::trim(&mut history, self.history_capacity);
                Err(err)
            }
        }
    }

    pub async fn reload_history(&self) -> Vec<ReloadRecord> {
        self.history.read().await.clone()
    }

    fn trim(history: &mut Vec<ReloadRecord>, capacity: usize) {
        if history.len() > capacity {
            let excess = history.len() - capacity;
            history.drain(0..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn compile_fixture(src: &str) -> Artifact {
        let (artifact, diags) = forge_emit::compile_source("t.forge", src);
        assert!(!diags.has_errors(), "{:?}", diags.all());
        artifact.unwrap()
    }

    #[test]
    fn loads_a_valid_artifact_from_json() {
        let artifact = compile_fixture("entity Ticket { title: string }");
        let json = forge_emit::artifact_json(&artifact).unwrap();
        let (loaded, indices) = load_from_str(&json).unwrap();
        assert!(indices.entity_by_name.contains_key("Ticket"));
        assert_eq!(loaded.migration.version, artifact.migration.version);
    }

    #[test]
    fn rejects_a_tampered_checksum() {
        let artifact = compile_fixture("entity Ticket { title: string }");
        let json = forge_emit::artifact_json(&artifact).unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
        value["migration"]["checksum"] = serde_json::Value::String("deadbeef".to_string());
        let tampered = serde_json::to_string(&value).unwrap();
        let err = load_from_str(&tampered).unwrap_err();
        assert!(matches!(err, ArtifactError::ChecksumMismatch { .. }));
    }

    #[tokio::test]
    async fn reload_picks_up_a_changed_file_and_keeps_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact.json");
        let artifact = compile_fixture("entity Ticket { title: string }");
        std::fs::write(&path, forge_emit::artifact_json(&artifact).unwrap()).unwrap();

        let store = ArtifactStore::open(&path).await.unwrap();
        assert!(store.artifact().await.entities.contains_key("Ticket"));

        let artifact2 = compile_fixture("entity Project { name: string }");
        let mut file = std::fs::OpenOptions::new().write(true).truncate(true).open(&path).unwrap();
        file.write_all(forge_emit::artifact_json(&artifact2).unwrap().as_bytes()).unwrap();
        drop(file);

        store.reload().await.unwrap();
        assert!(store.artifact().await.entities.contains_key("Project"));
        assert_eq!(store.reload_history().await.len(), 2);
    }

    #[tokio::test]
    async fn a_failed_reload_keeps_the_previous_artifact_live() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact.json");
        let artifact = compile_fixture("entity Ticket { title: string }");
        std::fs::write(&path, forge_emit::artifact_json(&artifact).unwrap()).unwrap();

        let store = ArtifactStore::open(&path).await.unwrap();
        std::fs::write(&path, b"not json").unwrap();
        assert!(store.reload().await.is_err());
        assert!(store.artifact().await.entities.contains_key("Ticket"));
    }
}
