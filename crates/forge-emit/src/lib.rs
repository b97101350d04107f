//! Serializes the planned program into the runtime artifact, the
//! human-readable migration script, and the typed client binding contract
//! (C7).
//!
//! The client library's *source text* is an external collaborator per
//! `spec.md` §1 Non-goals — only its contract is emitted here
//! ([`ClientContract`]), one type per entity, one method per action, one
//! subscribable stream per view.

use forge_analyze::Analyzed;
use forge_normalize::Normalized;
use forge_plan::Plan;
use forge_syntax::{AuthMode, Expr, Operation, RuleKind, ViewField};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactApp {
    pub auth_mode: AuthMode,
    pub database: String,
    pub version: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactFieldConstraint {
    pub unique: bool,
    pub max_length: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactField {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub unique: bool,
    pub constraints: ArtifactFieldConstraint,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactEntity {
    pub table: String,
    pub fields: Vec<ArtifactField>,
    pub primary_key: String,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FkSide {
    Owner,
    Target,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactRelation {
    pub owner_entity: String,
    pub name: String,
    pub target_entity: String,
    pub cardinality: forge_syntax::Cardinality,
    pub fk_column: String,
    pub fk_side: FkSide,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactRule {
    pub id: String,
    pub entity: String,
    pub operation: Operation,
    pub kind: RuleKind,
    pub condition_expr: Expr,
    pub sql_predicate: String,
    pub emit_code: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactAccess {
    pub read_expr: Expr,
    pub read_sql: String,
    pub write_expr: Expr,
    pub write_sql: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactAction {
    pub input_entity: String,
    pub operation: Operation,
    pub target_entity: Option<String>,
    pub auto_populate_fields: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactHook {
    pub entity: String,
    pub operation: Operation,
    pub timing: String,
    pub job_names: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactJob {
    pub input_entity: String,
    pub needs_path: Option<Vec<String>>,
    pub needs_filter_expr: Option<Expr>,
    pub capabilities: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactMessage {
    pub level: String,
    pub default_text: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactViewField {
    pub path: String,
    pub alias: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactView {
    pub source_entity: String,
    pub fields: Vec<ArtifactViewField>,
    pub filter_expr: Option<Expr>,
    pub parameters: Vec<String>,
}

/// A webhook provider binding: which actions `POST /webhooks/{provider}`
/// may trigger once its signature has been verified (`spec.md` §6, §4.11
/// "webhook-triggered actions").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactWebhook {
    pub triggers: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactMigration {
    pub version: String,
    pub up_statements: Vec<String>,
    pub checksum: String,
}

/// The immutable, shared-contract document: `spec.md` §3's "Runtime
/// artifact".
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Artifact {
    pub app: ArtifactApp,
    pub entities: BTreeMap<String, ArtifactEntity>,
    pub relations: Vec<ArtifactRelation>,
    pub rules: Vec<ArtifactRule>,
    pub access: BTreeMap<String, ArtifactAccess>,
    pub actions: BTreeMap<String, ArtifactAction>,
    pub hooks: Vec<ArtifactHook>,
    pub jobs: BTreeMap<String, ArtifactJob>,
    pub messages: BTreeMap<String, ArtifactMessage>,
    pub views: BTreeMap<String, ArtifactView>,
    pub webhooks: BTreeMap<String, ArtifactWebhook>,
    pub migration: ArtifactMigration,
}

fn ty_name(ty: &forge_syntax::Ty) -> String {
    use forge_syntax::Ty;
    match ty {
        Ty::Bool => "bool".to_string(),
        Ty::Int => "int".to_string(),
        Ty::Float => "float".to_string(),
        Ty::String => "string".to_string(),
        Ty::Time => "time".to_string(),
        Ty::Uuid => "uuid".to_string(),
        Ty::Enum(name) => format!("enum<{name}>"),
        Ty::Entity(name) => format!("entity<{name}>"),
        Ty::SetEntity(name) => format!("set<entity<{name}>>"),
        Ty::List(inner) => format!("list<{}>", ty_name(inner)),
        Ty::Unknown => "unknown".to_string(),
    }
}

/// Build the runtime artifact from a normalized + planned program. The
/// emitter does no further validation — analysis (C4) and planning (C6)
/// are expected to have already rejected anything malformed.
pub fn build_artifact(normalized: &Normalized, plan: &Plan) -> Artifact {
    let app = normalized
        .app
        .as_ref()
        .map(|a| ArtifactApp { auth_mode: a.auth_mode, database: a.database.clone(), version: a.version.clone() })
        .unwrap_or(ArtifactApp { auth_mode: AuthMode::None, database: String::new(), version: "0.0.0".to_string() });

    let entities = normalized
        .entities
        .iter()
        .map(|e| {
            let fields = e
                .fields
                .iter()
                .map(|f| ArtifactField {
                    name: f.name.clone(),
                    ty: ty_name(&f.ty),
                    nullable: f.nullable,
                    default: f.default_sql.clone(),
                    unique: f.unique,
                    constraints: ArtifactFieldConstraint { unique: f.unique, max_length: f.max_length },
                })
                .collect();
            (e.name.clone(), ArtifactEntity { table: e.table.clone(), fields, primary_key: e.primary_key.clone() })
        })
        .collect();

    let relations = normalized
        .relations
        .iter()
        .map(|r| ArtifactRelation {
            owner_entity: r.owner_entity.clone(),
            name: r.name.clone(),
            target_entity: r.target_entity.clone(),
            cardinality: r.cardinality,
            fk_column: r.fk_column.clone(),
            fk_side: if r.fk_on_owner { FkSide::Owner } else { FkSide::Target },
        })
        .collect();

    let rules = normalized
        .rules
        .iter()
        .map(|r| ArtifactRule {
            id: r.id.clone(),
            entity: r.entity.clone(),
            operation: r.operation,
            kind: r.clause.kind,
            condition_expr: r.clause.condition_expr.clone(),
            sql_predicate: r.clause.sql_predicate.clone(),
            emit_code: r.clause.emit_code.clone(),
        })
        .collect();

    let access = normalized
        .access
        .iter()
        .map(|a| {
            (
                a.entity.clone(),
                ArtifactAccess {
                    read_expr: a.read_expr.clone(),
                    read_sql: a.read_sql.clone(),
                    write_expr: a.write_expr.clone(),
                    write_sql: a.write_sql.clone(),
                },
            )
        })
        .collect();

    let actions = plan
        .actions
        .iter()
        .map(|a| {
            let decl = normalized.actions.iter().find(|n| n.name == a.name);
            (
                a.name.clone(),
                ArtifactAction {
                    input_entity: decl.map(|d| d.input_entity.clone()).unwrap_or_default(),
                    operation: a.operation,
                    target_entity: decl.map(|d| d.target_entity.clone()),
                    auto_populate_fields: a.auto_populate_fields.clone(),
                },
            )
        })
        .collect();

    let hooks = plan
        .hooks
        .iter()
        .map(|h| ArtifactHook { entity: h.entity.clone(), operation: h.operation, timing: h.timing.to_string(), job_names: h.job_names.clone() })
        .collect();

    let jobs = normalized
        .jobs
        .iter()
        .map(|(name, j)| {
            (
                name.clone(),
                ArtifactJob {
                    input_entity: j.input_entity.clone(),
                    needs_path: j.needs_path.clone(),
                    needs_filter_expr: j.needs_filter_expr.clone(),
                    capabilities: j.capabilities.clone(),
                },
            )
        })
        .collect();

    let messages = normalized
        .messages
        .iter()
        .map(|(code, m)| (code.clone(), ArtifactMessage { level: m.level.clone(), default_text: m.default_text.clone() }))
        .collect();

    let views = normalized
        .views
        .iter()
        .map(|(name, v)| {
            (
                name.clone(),
                ArtifactView {
                    source_entity: v.source_entity.clone(),
                    fields: v.fields.iter().map(|f: &ViewField| ArtifactViewField { path: f.path.clone(), alias: f.alias.clone() }).collect(),
                    filter_expr: v.filter_expr.clone(),
                    parameters: v.parameters.clone(),
                },
            )
        })
        .collect();

    let webhooks = normalized.webhooks.iter().map(|(provider, w)| (provider.clone(), ArtifactWebhook { triggers: w.triggers.clone() })).collect();

    let migration = ArtifactMigration {
        version: plan.migration.version.clone(),
        up_statements: plan.migration.up_statements.clone(),
        checksum: plan.migration.checksum.clone(),
    };

    Artifact { app, entities, relations, rules, access, actions, hooks, jobs, messages, views, webhooks, migration }
}

/// Serialize the artifact with stable, alphabetical-within-object key
/// ordering (`spec.md` §4.7). Round-tripping through [`serde_json::Value`]
/// is what gives the ordering guarantee: this crate's `serde_json`
/// dependency doesn't enable the `preserve_order` feature, so
/// `serde_json::Map` is backed by a `BTreeMap` and every object's keys sort
/// lexicographically on serialization.
pub fn artifact_json(artifact: &Artifact) -> serde_json::Result<String> {
    let value = serde_json::to_value(artifact)?;
    serde_json::to_string_pretty(&value)
}

/// The single-transaction, human-readable migration script (`schema.sql`),
/// headed by a SQL comment recording the content hash so a reviewer can see
/// at a glance whether a checked-in copy is stale.
pub fn schema_sql(artifact: &Artifact) -> String {
    let mut out = String::new();
    out.push_str(&format!("-- FORGE migration {}\n", artifact.migration.version));
    out.push_str(&format!("-- checksum {}\n", artifact.migration.checksum));
    out.push_str("BEGIN;\n\n");
    for stmt in &artifact.migration.up_statements {
        out.push_str(stmt);
        out.push_str("\n\n");
    }
    out.push_str("COMMIT;\n");
    out
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientMethod {
    pub name: String,
    pub operation: Operation,
    pub input_entity: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientStream {
    pub view: String,
    pub fields: Vec<String>,
}

/// The generated client library's contract: one type per entity, one
/// method per action, one subscribable stream per view. The library's
/// source text itself is out of scope (`spec.md` §1).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientContract {
    pub entity_types: Vec<String>,
    pub methods: Vec<ClientMethod>,
    pub streams: Vec<ClientStream>,
}

pub fn client_contract(normalized: &Normalized) -> ClientContract {
    ClientContract {
        entity_types: normalized.entities.iter().map(|e| e.name.clone()).collect(),
        methods: normalized
            .actions
            .iter()
            .map(|a| ClientMethod { name: a.name.clone(), operation: a.operation, input_entity: a.input_entity.clone() })
            .collect(),
        streams: normalized
            .views
            .values()
            .map(|v| ClientStream { view: v.name.clone(), fields: v.fields.iter().map(|f| f.alias.clone()).collect() })
            .collect(),
    }
}

/// Run the full compile-and-emit pipeline over one source file, for callers
/// (the CLI, tests) that don't need to inspect intermediate passes.
pub fn compile_source(file: &str, src: &str) -> (Option<Artifact>, forge_diagnostics::Collector) {
    let (program, mut diags) = forge_syntax::parse(file, src);
    if diags.has_errors() {
        return (None, diags);
    }
    let analyzed: Analyzed = forge_analyze::analyze(program, &mut diags);
    if diags.has_errors() {
        return (None, diags);
    }
    let normalized = forge_normalize::normalize(&analyzed);
    let plan = forge_plan::plan(&normalized);
    let artifact = build_artifact(&normalized, &plan);
    (Some(artifact), diags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_source_produces_an_empty_artifact() {
        let (artifact, diags) = compile_source("empty.forge", "");
        assert!(!diags.has_errors());
        let artifact = artifact.unwrap();
        assert!(artifact.entities.is_empty());
        assert!(artifact.migration.up_statements.is_empty());
    }

    #[test]
    fn artifact_json_is_byte_identical_across_runs() {
        let src = r#"
            entity Ticket { title: string, author_id: uuid }
            access Ticket { read: true, write: author_id == user }
            action create_ticket { input: Ticket, operation: create }
        "#;
        let (a1, d1) = compile_source("t.forge", src);
        let (a2, d2) = compile_source("t.forge", src);
        assert!(!d1.has_errors() && !d2.has_errors());
        let j1 = artifact_json(&a1.unwrap()).unwrap();
        let j2 = artifact_json(&a2.unwrap()).unwrap();
        assert_eq!(j1, j2);
    }

    #[test]
    fn json_keys_are_alphabetically_ordered_within_each_object() {
        let src = "entity Ticket { title: string }";
        let (artifact, _) = compile_source("t.forge", src);
        let json = artifact_json(&artifact.unwrap()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let obj = value.as_object().unwrap();
        let keys: Vec<&String> = obj.keys().collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn cyclic_relations_produce_no_artifact() {
        let src = r#"
            entity A { }
            entity B { }
            relation A.b -> B { cardinality: one }
            relation B.a -> A { cardinality: one }
        "#;
        let (artifact, diags) = compile_source("t.forge", src);
        assert!(diags.has_errors());
        assert!(artifact.is_none());
    }

    #[test]
    fn schema_sql_wraps_statements_in_one_transaction() {
        let src = "entity Ticket { title: string }";
        let (artifact, _) = compile_source("t.forge", src);
        let sql = schema_sql(&artifact.unwrap());
        assert!(sql.trim_start().starts_with("-- FORGE migration"));
        assert!(sql.contains("BEGIN;"));
        assert!(sql.contains("COMMIT;"));
    }

    #[test]
    fn client_contract_has_one_method_per_action() {
        let src = r#"
            entity Ticket { title: string }
            action create_ticket { input: Ticket, operation: create }
            action close_ticket { input: Ticket, operation: update }
        "#;
        let (program, mut diags) = forge_syntax::parse("t.forge", src);
        let analyzed = forge_analyze::analyze(program, &mut diags);
        let normalized = forge_normalize::normalize(&analyzed);
        let contract = client_contract(&normalized);
        assert_eq!(contract.methods.len(), 2);
    }
}
