//! Builds a rule-evaluation [`Env`] from a decoded row, the same scalar
//! field-by-field conversion `forge-ws`'s broadcast path and `forge-jobs`'s
//! needs resolver each carry their own copy of.

use forge_emit::Artifact;
use forge_rules::{Env, Value as RuleValue};
use serde_json::Value as Json;
use uuid::Uuid;

pub fn row_env(artifact: &Artifact, entity_name: &str, row: &Json, subject: Option<Uuid>) -> Env {
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

pub fn json_to_rule_value(ty: &str, json: &Json) -> RuleValue {
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

/// Project a row onto a view's declared `{path, alias}` scalar fields.
pub fn project(row: &Json, fields: &[forge_emit::ArtifactViewField]) -> Json {
    let mut out = serde_json::Map::new();
    if let Json::Object(map) = row {
        for field in fields {
            let value = map.get(&field.path).cloned().unwrap_or(Json::Null);
            out.insert(field.alias.clone(), value);
        }
    }
    Json::Object(out)
}
