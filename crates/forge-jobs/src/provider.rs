//! The provider/capability registry (`spec.md` §9 "Polymorphism"): the one
//! piece of open polymorphism in an otherwise closed-sum-type system.
//!
//! A provider satisfies a small interface — `capabilities()`, `execute()` —
//! and is registered under the capability names it serves (`email.send`,
//! `http.post`, ...). Concrete provider implementations (SMTP, HTTP,
//! webhook signature schemes) are external collaborators per `spec.md` §1;
//! this module only specifies the trait and the lookup table.

use async_trait::async_trait;
use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum ProviderError {
    /// Worth retrying — the job goes back through backoff.
    #[error("transient provider failure: {0}")]
    Transient(String),
    /// Never worth retrying — the job is dead-lettered immediately.
    #[error("permanent provider failure: {0}")]
    Permanent(String),
}

/// One capability a provider can perform on behalf of a job
/// (`spec.md` GLOSSARY "Capability").
#[async_trait]
pub trait Capability: Send + Sync {
    /// Capability names this provider serves, e.g. `["email.send"]`.
    fn capabilities(&self) -> Vec<String>;
    async fn execute(&self, capability: &str, data: &Json) -> Result<Json, ProviderError>;
}

/// Maps a capability name to the provider that serves it. Looking up an
/// unregistered capability is how the worker pool enforces the sandbox:
/// a job may only invoke capabilities its declaration lists, and only
/// capabilities some provider actually implements.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Capability>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn Capability>) {
        for capability in provider.capabilities() {
            self.providers.insert(capability, provider.clone());
        }
    }

    pub fn get(&self, capability: &str) -> Option<Arc<dyn Capability>> {
        self.providers.get(capability).cloned()
    }
}

/// A provider that records every invocation instead of performing it, used
/// by tests and by the `recording email provider` in `spec.md` §8 scenario 3.
pub struct RecordingProvider {
    pub name: String,
    pub capability: String,
    pub calls: std::sync::Mutex<Vec<Json>>,
}

impl RecordingProvider {
    pub fn new(name: impl Into<String>, capability: impl Into<String>) -> Self {
        Self { name: name.into(), capability: capability.into(), calls: std::sync::Mutex::new(Vec::new()) }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("recording provider poisoned").len()
    }
}

#[async_trait]
impl Capability for RecordingProvider {
    fn capabilities(&self) -> Vec<String> {
        vec![self.capability.clone()]
    }

    async fn execute(&self, capability: &str, data: &Json) -> Result<Json, ProviderError> {
        if capability != self.capability {
            return Err(ProviderError::Permanent(format!("{} does not serve {capability}", self.name)));
        }
        self.calls.lock().expect("recording provider poisoned").push(data.clone());
        Ok(Json::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_routes_to_the_registered_provider() {
        let mut registry = ProviderRegistry::new();
        let provider = Arc::new(RecordingProvider::new("email", "email.send"));
        registry.register(provider.clone());
        let found = registry.get("email.send").expect("registered");
        found.execute("email.send", &Json::Null).await.unwrap();
        assert_eq!(provider.call_count(), 1);
    }

    #[test]
    fn unregistered_capability_is_not_found() {
        let registry = ProviderRegistry::new();
        assert!(registry.get("http.post").is_none());
    }
}
