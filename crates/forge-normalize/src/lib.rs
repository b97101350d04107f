//! Default materialization, auto-populate resolution, and SQL/rule-expression
//! lowering (C5).
//!
//! Input is a fully analyzed program ([`forge_analyze::Analyzed`]); output is
//! a [`Normalized`] value the planner (C6) and emitter (C7) consume. Nothing
//! here produces diagnostics — by the time normalization runs, analysis has
//! already guaranteed every name resolves and every expression type-checks.

pub mod naming;
pub mod sql;

use forge_analyze::{Analyzed, SymbolTable};
use forge_syntax::*;
use sql::SqlCtx;
use std::collections::BTreeMap;

/// A single outgoing relation from an entity, as needed by SQL lowering:
/// which entity it targets and whether it's single- or multi-valued.
#[derive(Clone, Debug)]
pub struct RelationMeta {
    pub target_entity: String,
    pub many: bool,
}

/// Table/column naming plus relation shape for one entity, threaded through
/// [`sql::expr_to_sql`].
#[derive(Clone, Debug, Default)]
pub struct EntityMeta {
    pub table: String,
    pub relations: BTreeMap<String, RelationMeta>,
}

fn build_entity_metas(symbols: &SymbolTable) -> BTreeMap<String, EntityMeta> {
    symbols
        .entities
        .iter()
        .map(|(name, info)| {
            let relations = info
                .relations
                .iter()
                .map(|r| (r.name.clone(), RelationMeta { target_entity: r.target_entity.clone(), many: r.cardinality == Cardinality::Many }))
                .collect();
            (name.clone(), EntityMeta { table: naming::table_name(name), relations })
        })
        .collect()
}

/// SQL type for a field's declared scalar type. Enum fields use a
/// dedicated `CREATE TYPE ... AS ENUM` named after the entity+field.
pub fn sql_type(entity: &str, field: &FieldDecl) -> String {
    if !field.enum_variants.is_empty() {
        return naming::enum_type_name(entity, &field.name);
    }
    match field.ty_name.as_str() {
        "string" | "text" => "text".to_string(),
        "int" | "integer" => "bigint".to_string(),
        "float" | "decimal" | "number" => "double precision".to_string(),
        "bool" | "boolean" => "boolean".to_string(),
        "uuid" => "uuid".to_string(),
        "time" | "timestamp" | "datetime" => "timestamptz".to_string(),
        other => other.to_string(),
    }
}

/// Dialect default for fields left without an explicit `= ...` default,
/// per `spec.md` §4.5: `now()` for time, `gen_random_uuid()` for the
/// primary key. Every other type is left `NULL` unless the author supplied
/// a default.
fn implicit_default_sql(entity: &str, field: &FieldDecl) -> Option<String> {
    if field.name == "id" {
        return Some("gen_random_uuid()".to_string());
    }
    match field.ty_name.as_str() {
        "time" | "timestamp" | "datetime" => Some("now()".to_string()),
        _ => {
            let _ = entity;
            None
        }
    }
}

#[derive(Clone, Debug)]
pub struct NormalizedField {
    pub name: String,
    pub ty: Ty,
    pub sql_type: String,
    pub nullable: bool,
    pub unique: bool,
    pub default_sql: Option<String>,
    pub max_length: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct NormalizedEntity {
    pub name: String,
    pub table: String,
    pub primary_key: String,
    pub fields: Vec<NormalizedField>,
    pub enum_fields: Vec<(String, String, Vec<String>)>, // (sql type name, field name, variants)
}

#[derive(Clone, Debug)]
pub struct NormalizedRelation {
    pub owner_entity: String,
    pub name: String,
    pub target_entity: String,
    pub cardinality: Cardinality,
    pub fk_column: String,
    /// `true` when the FK column lives on the owner's table (cardinality
    /// one); `false` when it lives on the target's table, pointing back
    /// (cardinality many).
    pub fk_on_owner: bool,
}

#[derive(Clone, Debug)]
pub struct NormalizedRuleClause {
    pub kind: RuleKind,
    pub condition_expr: Expr,
    pub sql_predicate: String,
    pub emit_code: String,
}

#[derive(Clone, Debug)]
pub struct NormalizedRule {
    pub id: String,
    pub entity: String,
    pub operation: Operation,
    pub clause: NormalizedRuleClause,
}

#[derive(Clone, Debug)]
pub struct NormalizedAccess {
    pub entity: String,
    pub read_expr: Expr,
    pub read_sql: String,
    pub write_expr: Expr,
    pub write_sql: String,
}

#[derive(Clone, Debug)]
pub struct NormalizedAction {
    pub name: String,
    pub input_entity: String,
    pub operation: Operation,
    pub target_entity: String,
    pub auto_populate_fields: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct NormalizedJob {
    pub name: String,
    pub input_entity: String,
    pub needs_path: Option<Vec<String>>,
    pub needs_filter_expr: Option<Expr>,
    pub capabilities: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct NormalizedView {
    pub name: String,
    pub source_entity: String,
    pub fields: Vec<ViewField>,
    pub filter_expr: Option<Expr>,
    pub parameters: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct Normalized {
    pub app: Option<AppDecl>,
    pub entities: Vec<NormalizedEntity>,
    pub relations: Vec<NormalizedRelation>,
    pub rules: Vec<NormalizedRule>,
    pub access: Vec<NormalizedAccess>,
    pub actions: Vec<NormalizedAction>,
    pub messages: BTreeMap<String, MessageDecl>,
    pub hooks: Vec<(String, Operation, Vec<String>)>,
    pub jobs: BTreeMap<String, NormalizedJob>,
    pub views: BTreeMap<String, NormalizedView>,
    pub webhooks: BTreeMap<String, WebhookDecl>,
}

/// Canonical auto-populate field names recognized on create actions even
/// when the author didn't list them explicitly (`spec.md` §4.5).
const CANONICAL_OWNER_FIELDS: &[&str] = &["owner_id", "author_id", "user_id", "created_by"];

pub fn normalize(analyzed: &Analyzed) -> Normalized {
    let symbols = &analyzed.symbols;
    let metas = build_entity_metas(symbols);

    let mut entities = Vec::new();
    let mut relations = Vec::new();
    for (name, info) in &symbols.entities {
        let mut fields = Vec::new();
        let mut enum_fields = Vec::new();
        for field in info.fields.values() {
            let ty = forge_analyze::symbols::field_ty(field);
            if let Ty::Enum(_) = ty {
                enum_fields.push((naming::enum_type_name(name, &field.name), field.name.clone(), field.enum_variants.clone()));
            }
            let default_sql = match &field.default {
                Some(expr) => {
                    let ctx = SqlCtx { entities: &metas, root_entity: name };
                    Some(sql::expr_to_sql(expr, &ctx))
                }
                None => implicit_default_sql(name, field),
            };
            fields.push(NormalizedField {
                name: field.name.clone(),
                ty,
                sql_type: sql_type(name, field),
                nullable: field.nullable,
                unique: field.unique,
                default_sql,
                max_length: field.max_length,
            });
        }
        entities.push(NormalizedEntity { name: name.clone(), table: naming::table_name(name), primary_key: "id".to_string(), fields, enum_fields });

        for relation in &info.relations {
            let fk_on_owner = relation.cardinality == Cardinality::One;
            let fk_column = if fk_on_owner {
                naming::fk_column_for(&relation.name)
            } else {
                naming::fk_column_for(&relation.owner_entity)
            };
            relations.push(NormalizedRelation {
                owner_entity: relation.owner_entity.clone(),
                name: relation.name.clone(),
                target_entity: relation.target_entity.clone(),
                cardinality: relation.cardinality,
                fk_column,
                fk_on_owner,
            });
        }
    }

    let mut rules = Vec::new();
    for ((entity, operation), clauses) in &symbols.rules {
        for (i, clause) in clauses.iter().enumerate() {
            let ctx = SqlCtx { entities: &metas, root_entity: entity };
            let sql_predicate = sql::expr_to_sql(&clause.condition, &ctx);
            rules.push(NormalizedRule {
                id: format!("{entity}.{operation}#{i}", operation = operation.as_str()),
                entity: entity.clone(),
                operation: *operation,
                clause: NormalizedRuleClause {
                    kind: clause.kind,
                    condition_expr: clause.condition.clone(),
                    sql_predicate,
                    emit_code: clause.emit_code.clone(),
                },
            });
        }
    }

    let mut access = Vec::new();
    for (entity, decl) in &symbols.access {
        let ctx = SqlCtx { entities: &metas, root_entity: entity };
        access.push(NormalizedAccess {
            entity: entity.clone(),
            read_expr: decl.read.clone(),
            read_sql: sql::expr_to_sql(&decl.read, &ctx),
            write_expr: decl.write.clone(),
            write_sql: sql::expr_to_sql(&decl.write, &ctx),
        });
    }

    let mut actions = Vec::new();
    for (name, decl) in &symbols.actions {
        let target_entity = decl.target_entity.clone().unwrap_or_else(|| decl.input_entity.clone());
        let mut auto_populate_fields = decl.auto_populate.clone();
        if decl.operation == Operation::Create {
            if let Some(target) = symbols.entities.get(&target_entity) {
                for canonical in CANONICAL_OWNER_FIELDS {
                    if target.fields.contains_key(*canonical) && !auto_populate_fields.iter().any(|f| f == canonical) {
                        auto_populate_fields.push(canonical.to_string());
                    }
                }
            }
        }
        actions.push(NormalizedAction { name: name.clone(), input_entity: decl.input_entity.clone(), operation: decl.operation, target_entity, auto_populate_fields });
    }

    let mut hooks = Vec::new();
    for ((entity, operation), job_names) in &symbols.hooks {
        hooks.push((entity.clone(), *operation, job_names.clone()));
    }

    let mut jobs = BTreeMap::new();
    for (name, decl) in &symbols.jobs {
        let needs_path = match &decl.needs_path {
            Some(Expr { kind: ExprKind::PathTraverse { segments }, .. }) => Some(segments.clone()),
            Some(Expr { kind: ExprKind::Identifier(name), .. }) => Some(vec![name.clone()]),
            _ => None,
        };
        jobs.insert(
            name.clone(),
            NormalizedJob {
                name: name.clone(),
                input_entity: decl.input_entity.clone(),
                needs_path,
                needs_filter_expr: decl.needs_filter.clone(),
                capabilities: decl.capabilities.clone(),
            },
        );
    }

    let mut views = BTreeMap::new();
    for (name, decl) in &symbols.views {
        views.insert(
            name.clone(),
            NormalizedView {
                name: name.clone(),
                source_entity: decl.source_entity.clone(),
                fields: decl.fields.clone(),
                filter_expr: decl.filter.clone(),
                parameters: decl.parameters.clone(),
            },
        );
    }

    Normalized {
        app: symbols.app.clone(),
        entities,
        relations,
        rules,
        access,
        actions,
        messages: symbols.messages.clone(),
        hooks,
        jobs,
        views,
        webhooks: symbols.webhooks.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalize_src(src: &str) -> Normalized {
        let (program, mut diags) = forge_syntax::parse("t.forge", src);
        assert!(!diags.has_errors(), "{:?}", diags.all());
        let analyzed = forge_analyze::analyze(program, &mut diags);
        assert!(!diags.has_errors(), "{:?}", diags.all());
        normalize(&analyzed)
    }

    #[test]
    fn implicit_fields_get_dialect_defaults() {
        let n = normalize_src("entity Ticket { title: string }");
        let ticket = n.entities.iter().find(|e| e.name == "Ticket").unwrap();
        let id = ticket.fields.iter().find(|f| f.name == "id").unwrap();
        assert_eq!(id.default_sql.as_deref(), Some("gen_random_uuid()"));
        let created_at = ticket.fields.iter().find(|f| f.name == "created_at").unwrap();
        assert_eq!(created_at.default_sql.as_deref(), Some("now()"));
    }

    #[test]
    fn table_name_is_snake_case_plural() {
        let n = normalize_src("entity Ticket { title: string }");
        assert_eq!(n.entities[0].table, "tickets");
    }

    #[test]
    fn create_action_auto_populates_canonical_owner_field() {
        let src = r#"
            entity Ticket { author_id: uuid, title: string }
            action create_ticket { input: Ticket, operation: create }
        "#;
        let n = normalize_src(src);
        let action = n.actions.iter().find(|a| a.name == "create_ticket").unwrap();
        assert!(action.auto_populate_fields.contains(&"author_id".to_string()));
    }

    #[test]
    fn access_write_lowers_user_to_session_guc() {
        let src = r#"
            entity Ticket { author_id: uuid }
            access Ticket { read: true, write: author_id == user }
        "#;
        let n = normalize_src(src);
        let access = &n.access[0];
        assert!(access.write_sql.contains("current_setting('app.user_id', true)::uuid"));
        assert!(access.write_sql.contains("author_id"));
    }

    #[test]
    fn many_relation_membership_lowers_to_subquery() {
        let src = r#"
            entity Org { }
            entity Ticket { }
            relation Org.members -> Ticket { cardinality: many }
            access Org { read: user in members, write: true }
        "#;
        let n = normalize_src(src);
        let access = n.access.iter().find(|a| a.entity == "Org").unwrap();
        assert!(access.read_sql.contains("SELECT org_id FROM tickets"));
    }

    #[test]
    fn rule_sql_predicate_is_generated_per_clause() {
        let src = r#"
            entity Ticket { status: enum(open, closed) = open }
            message TICKET_CLOSED { level: error, default: "closed" }
            rule Ticket.update { forbid if status == closed emit TICKET_CLOSED }
        "#;
        let n = normalize_src(src);
        assert_eq!(n.rules.len(), 1);
        assert!(n.rules[0].clause.sql_predicate.contains("status"));
    }
}
