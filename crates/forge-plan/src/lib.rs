//! Topological entity ordering, migration/DDL planning, action execution
//! plans, and hook bindings (C6).
//!
//! Consumes a [`forge_normalize::Normalized`] program and produces a
//! [`Plan`] the emitter (C7) serializes. Foreign keys are always added via a
//! separate `ALTER TABLE ... ADD CONSTRAINT` pass after every table exists
//! (`spec.md` §4.6 point 2 and §9 "mutual references"), so the topological
//! entity order only needs to be stable and deterministic, not a hard
//! prerequisite for `CREATE TABLE` to succeed.

use forge_normalize::{NormalizedAction, NormalizedEntity, NormalizedRelation, NormalizedRule, Normalized};
use forge_syntax::{Cardinality, Operation, RuleKind};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

pub const ADVISORY_LOCK_KEY: i64 = 0x464f_5247_4521_0001; // "FORGE!" tag, fixed per spec.md §4.14

#[derive(Clone, Debug)]
pub struct ActionPlan {
    pub name: String,
    pub operation: Operation,
    pub target_table: String,
    /// Parameterized `INSERT ... RETURNING *` / `UPDATE ... RETURNING *` /
    /// `DELETE ... RETURNING *` statement. Placeholders are filled in by the
    /// executor from the input map in column order.
    pub sql: String,
    pub rule_ids: Vec<String>,
    pub auto_populate_fields: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct HookBinding {
    pub entity: String,
    pub operation: Operation,
    pub timing: &'static str, // always "after" per spec.md §3
    pub job_names: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct Migration {
    pub version: String,
    pub up_statements: Vec<String>,
    pub checksum: String,
}

#[derive(Clone, Debug)]
pub struct Plan {
    pub entity_order: Vec<String>,
    pub migration: Migration,
    pub actions: Vec<ActionPlan>,
    pub hooks: Vec<HookBinding>,
}

/// Kahn's-algorithm-style topological sort over the "owner references
/// target" edges of `cardinality: one` relations, leaves (no outgoing
/// edges) first. Relations forming a cycle are left in their original
/// (alphabetical) relative order — they're resolved at the DDL level by
/// deferred `ALTER TABLE`, not by ordering.
pub fn topological_entity_order(entities: &[NormalizedEntity], relations: &[NormalizedRelation]) -> Vec<String> {
    let names: BTreeSet<String> = entities.iter().map(|e| e.name.clone()).collect();
    let mut out_edges: BTreeMap<String, BTreeSet<String>> = names.iter().map(|n| (n.clone(), BTreeSet::new())).collect();
    for rel in relations {
        if rel.cardinality == Cardinality::One {
            out_edges.entry(rel.owner_entity.clone()).or_default().insert(rel.target_entity.clone());
        }
    }

    let mut order = Vec::new();
    let mut visiting: BTreeSet<String> = BTreeSet::new();
    let mut visited: BTreeSet<String> = BTreeSet::new();

    fn visit(
        name: &str,
        out_edges: &BTreeMap<String, BTreeSet<String>>,
        visiting: &mut BTreeSet<String>,
        visited: &mut BTreeSet<String>,
        order: &mut Vec<String>,
    ) {
        if visited.contains(name) || visiting.contains(name) {
            return; // cycle or already placed; leave for the deferred-FK pass
        }
        visiting.insert(name.to_string());
        if let Some(targets) = out_edges.get(name) {
            for target in targets {
                visit(target, out_edges, visiting, visited, order);
            }
        }
        visiting.remove(name);
        visited.insert(name.to_string());
        order.push(name.to_string());
    }

    for name in &names {
        visit(name, &out_edges, &mut visiting, &mut visited, &mut order);
    }
    order
}

fn enum_ddl(entity: &NormalizedEntity) -> Vec<String> {
    entity
        .enum_fields
        .iter()
        .map(|(type_name, _field, variants)| {
            let values = variants.iter().map(|v| format!("'{v}'")).collect::<Vec<_>>().join(", ");
            format!("DO $$ BEGIN CREATE TYPE {type_name} AS ENUM ({values}); EXCEPTION WHEN duplicate_object THEN NULL; END $$;")
        })
        .collect()
}

fn table_ddl(entity: &NormalizedEntity) -> String {
    let mut columns = Vec::new();
    for field in &entity.fields {
        let mut col = format!("{} {}", field.name, field.sql_type);
        if field.name == "id" {
            col.push_str(" PRIMARY KEY");
        }
        if !field.nullable && field.name != "id" {
            col.push_str(" NOT NULL");
        }
        if let Some(default) = &field.default_sql {
            col.push_str(&format!(" DEFAULT {default}"));
        }
        if field.unique && field.name != "id" {
            col.push_str(" UNIQUE");
        }
        columns.push(col);
    }
    format!("CREATE TABLE IF NOT EXISTS {} (\n    {}\n);", entity.table, columns.join(",\n    "))
}

fn fk_alter_statements(entities: &[NormalizedEntity], relations: &[NormalizedRelation]) -> Vec<String> {
    let table_of: BTreeMap<&str, &str> = entities.iter().map(|e| (e.name.as_str(), e.table.as_str())).collect();
    relations
        .iter()
        .filter_map(|rel| {
            let (owning_table, referenced_table) = if rel.fk_on_owner {
                (table_of.get(rel.owner_entity.as_str())?, table_of.get(rel.target_entity.as_str())?)
            } else {
                (table_of.get(rel.target_entity.as_str())?, table_of.get(rel.owner_entity.as_str())?)
            };
            let constraint_name = format!("fk_{owning_table}_{}", rel.fk_column);
            Some(format!(
                "DO $$ BEGIN ALTER TABLE {owning_table} ADD CONSTRAINT {constraint_name} FOREIGN KEY ({}) REFERENCES {referenced_table}(id); \
                 EXCEPTION WHEN duplicate_object THEN NULL; END $$;",
                rel.fk_column,
            ))
        })
        .collect()
}

fn index_statements(entities: &[NormalizedEntity], relations: &[NormalizedRelation]) -> Vec<String> {
    let mut stmts = Vec::new();
    for entity in entities {
        for field in &entity.fields {
            if field.unique && field.name != "id" {
                stmts.push(format!(
                    "CREATE UNIQUE INDEX IF NOT EXISTS idx_{}_{}_unique ON {} ({});",
                    entity.table, field.name, entity.table, field.name
                ));
            }
        }
    }
    for rel in relations {
        let table = if rel.fk_on_owner { &rel.owner_entity } else { &rel.target_entity };
        let table = entities.iter().find(|e| &e.name == table).map(|e| e.table.clone()).unwrap_or_default();
        stmts.push(format!("CREATE INDEX IF NOT EXISTS idx_{table}_{} ON {table} ({});", rel.fk_column, rel.fk_column));
    }
    stmts
}

fn rls_statements(entity: &NormalizedEntity, access: Option<&forge_normalize::NormalizedAccess>) -> Vec<String> {
    let mut stmts = vec![format!("ALTER TABLE {} ENABLE ROW LEVEL SECURITY;", entity.table)];
    let Some(access) = access else { return stmts };
    let read_policy = format!("{}_read_policy", entity.table);
    let write_policy = format!("{}_write_policy", entity.table);
    stmts.push(format!("DROP POLICY IF EXISTS {read_policy} ON {};", entity.table));
    stmts.push(format!("CREATE POLICY {read_policy} ON {} FOR SELECT USING {};", entity.table, access.read_sql));
    stmts.push(format!("DROP POLICY IF EXISTS {write_policy} ON {};", entity.table));
    stmts.push(format!(
        "CREATE POLICY {write_policy} ON {} FOR ALL USING {} WITH CHECK {};",
        entity.table, access.write_sql, access.write_sql
    ));
    stmts
}

fn updated_at_trigger_statements(entity: &NormalizedEntity) -> Vec<String> {
    if !entity.fields.iter().any(|f| f.name == "updated_at") {
        return Vec::new();
    }
    let trigger_name = format!("{}_set_updated_at", entity.table);
    vec![
        "CREATE OR REPLACE FUNCTION forge_set_updated_at() RETURNS trigger AS $$ \
         BEGIN NEW.updated_at = now(); RETURN NEW; END; $$ LANGUAGE plpgsql;"
            .to_string(),
        format!("DROP TRIGGER IF EXISTS {trigger_name} ON {};", entity.table),
        format!(
            "CREATE TRIGGER {trigger_name} BEFORE UPDATE ON {} FOR EACH ROW EXECUTE FUNCTION forge_set_updated_at();",
            entity.table
        ),
    ]
}

fn build_migration(normalized: &Normalized, order: &[String]) -> Migration {
    let by_name: BTreeMap<&str, &NormalizedEntity> = normalized.entities.iter().map(|e| (e.name.as_str(), e)).collect();
    let ordered_entities: Vec<&NormalizedEntity> = order.iter().filter_map(|n| by_name.get(n.as_str()).copied()).collect();
    let access_by_entity: BTreeMap<&str, &forge_normalize::NormalizedAccess> =
        normalized.access.iter().map(|a| (a.entity.as_str(), a)).collect();

    let mut up_statements = Vec::new();
    for entity in &ordered_entities {
        up_statements.extend(enum_ddl(entity));
    }
    for entity in &ordered_entities {
        up_statements.push(table_ddl(entity));
    }
    up_statements.extend(fk_alter_statements(&normalized.entities, &normalized.relations));
    up_statements.extend(index_statements(&normalized.entities, &normalized.relations));
    for entity in &ordered_entities {
        up_statements.extend(rls_statements(entity, access_by_entity.get(entity.name.as_str()).copied()));
    }
    for entity in &ordered_entities {
        up_statements.extend(updated_at_trigger_statements(entity));
    }

    let canonical = canonical_encoding(&normalized.entities, &normalized.relations, &access_by_entity);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();
    let version: String = digest.iter().take(6).map(|b| format!("{b:02x}")).collect();

    let mut checksum_hasher = Sha256::new();
    for stmt in &up_statements {
        checksum_hasher.update(stmt.as_bytes());
    }
    let checksum = checksum_hasher.finalize().iter().map(|b| format!("{b:02x}")).collect();

    Migration { version, up_statements, checksum }
}

/// A stable textual encoding of tables, columns, enum values, and policies
/// used only to derive the content-addressed migration version (`spec.md`
/// §4.6 point 5). Equal schemas must produce an identical string regardless
/// of declaration order, so every collection here is sorted first.
fn canonical_encoding(
    entities: &[NormalizedEntity],
    relations: &[NormalizedRelation],
    access_by_entity: &BTreeMap<&str, &forge_normalize::NormalizedAccess>,
) -> String {
    let mut sorted_entities = entities.to_vec();
    sorted_entities.sort_by(|a, b| a.name.cmp(&b.name));
    let mut out = String::new();
    for entity in &sorted_entities {
        out.push_str(&format!("TABLE {}\n", entity.table));
        let mut fields = entity.fields.clone();
        fields.sort_by(|a, b| a.name.cmp(&b.name));
        for field in &fields {
            out.push_str(&format!("  {} {} nullable={} unique={}\n", field.name, field.sql_type, field.nullable, field.unique));
        }
        let mut enums = entity.enum_fields.clone();
        enums.sort_by(|a, b| a.0.cmp(&b.0));
        for (type_name, field, variants) in &enums {
            out.push_str(&format!("  ENUM {type_name}.{field} = {variants:?}\n"));
        }
        if let Some(access) = access_by_entity.get(entity.name.as_str()) {
            out.push_str(&format!("  POLICY read {}\n", access.read_sql));
            out.push_str(&format!("  POLICY write {}\n", access.write_sql));
        }
    }
    let mut sorted_relations = relations.to_vec();
    sorted_relations.sort_by(|a, b| (a.owner_entity.as_str(), a.name.as_str()).cmp(&(b.owner_entity.as_str(), b.name.as_str())));
    for rel in &sorted_relations {
        out.push_str(&format!("FK {}.{} -> {} ({})\n", rel.owner_entity, rel.name, rel.target_entity, rel.fk_column));
    }
    out
}

fn action_sql(action: &NormalizedAction, entity: &NormalizedEntity) -> String {
    match action.operation {
        Operation::Create => {
            let columns: Vec<&str> = entity.fields.iter().map(|f| f.name.as_str()).collect();
            let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({}) RETURNING *;",
                entity.table,
                columns.join(", "),
                placeholders.join(", ")
            )
        }
        Operation::Update => {
            let settable: Vec<&str> =
                entity.fields.iter().map(|f| f.name.as_str()).filter(|n| *n != "id" && *n != "created_at").collect();
            let assignments: Vec<String> =
                settable.iter().enumerate().map(|(i, name)| format!("{name} = ${}", i + 2)).collect();
            format!("UPDATE {} SET {} WHERE id = $1 RETURNING *;", entity.table, assignments.join(", "))
        }
        Operation::Delete => {
            format!("DELETE FROM {} WHERE id = $1 RETURNING *;", entity.table)
        }
    }
}

fn action_plans(normalized: &Normalized) -> Vec<ActionPlan> {
    let by_name: BTreeMap<&str, &NormalizedEntity> = normalized.entities.iter().map(|e| (e.name.as_str(), e)).collect();
    normalized
        .actions
        .iter()
        .filter_map(|action| {
            let entity = by_name.get(action.target_entity.as_str())?;
            let rule_ids: Vec<String> = normalized
                .rules
                .iter()
                .filter(|r| r.entity == action.target_entity && r.operation == action.operation)
                .map(|r| r.id.clone())
                .collect();
            Some(ActionPlan {
                name: action.name.clone(),
                operation: action.operation,
                target_table: entity.table.clone(),
                sql: action_sql(action, entity),
                rule_ids,
                auto_populate_fields: action.auto_populate_fields.clone(),
            })
        })
        .collect()
}

fn hook_bindings(normalized: &Normalized) -> Vec<HookBinding> {
    normalized
        .hooks
        .iter()
        .map(|(entity, operation, job_names)| HookBinding {
            entity: entity.clone(),
            operation: *operation,
            timing: "after",
            job_names: job_names.clone(),
        })
        .collect()
}

pub fn plan(normalized: &Normalized) -> Plan {
    let entity_order = topological_entity_order(&normalized.entities, &normalized.relations);
    let migration = build_migration(normalized, &entity_order);
    let actions = action_plans(normalized);
    let hooks = hook_bindings(normalized);
    Plan { entity_order, migration, actions, hooks }
}

/// Whether a `forbid`/`require` clause rejects given its evaluated boolean
/// result, used by both the planner's documentation-only rule listing and
/// the action executor (C11) so the "which way does this rule reject" logic
/// lives in exactly one place.
pub fn rejects(kind: RuleKind, condition_result: bool) -> bool {
    match kind {
        RuleKind::Forbid => condition_result,
        RuleKind::Require => !condition_result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_src(src: &str) -> Plan {
        let (program, mut diags) = forge_syntax::parse("t.forge", src);
        assert!(!diags.has_errors(), "{:?}", diags.all());
        let analyzed = forge_analyze::analyze(program, &mut diags);
        assert!(!diags.has_errors(), "{:?}", diags.all());
        let normalized = forge_normalize::normalize(&analyzed);
        plan(&normalized)
    }

    #[test]
    fn leaves_come_before_owners_in_topological_order() {
        let src = r#"
            entity Org { }
            entity Ticket { }
            relation Ticket.org -> Org { cardinality: one }
        "#;
        let p = plan_src(src);
        let org_pos = p.entity_order.iter().position(|e| e == "Org").unwrap();
        let ticket_pos = p.entity_order.iter().position(|e| e == "Ticket").unwrap();
        assert!(org_pos < ticket_pos);
    }

    #[test]
    fn cyclic_relations_still_produce_a_full_order() {
        let src = r#"
            entity A { }
            entity B { }
            relation A.b -> B { cardinality: one }
            relation B.a -> A { cardinality: one }
        "#;
        let p = plan_src(src);
        assert_eq!(p.entity_order.len(), 2);
    }

    #[test]
    fn migration_version_is_deterministic() {
        let src = "entity Ticket { title: string }";
        let p1 = plan_src(src);
        let p2 = plan_src(src);
        assert_eq!(p1.migration.version, p2.migration.version);
        assert_eq!(p1.migration.version.len(), 12);
    }

    #[test]
    fn action_plan_generates_insert_with_returning() {
        let src = r#"
            entity Ticket { title: string }
            action create_ticket { input: Ticket, operation: create }
        "#;
        let p = plan_src(src);
        let action = &p.actions[0];
        assert!(action.sql.starts_with("INSERT INTO tickets"));
        assert!(action.sql.contains("RETURNING *"));
    }

    #[test]
    fn rule_is_bound_to_its_actions_operation() {
        let src = r#"
            entity Ticket { status: enum(open, closed) = open }
            message TICKET_CLOSED { level: error, default: "closed" }
            rule Ticket.update { forbid if status == closed emit TICKET_CLOSED }
            action update_ticket { input: Ticket, operation: update }
        "#;
        let p = plan_src(src);
        let action = p.actions.iter().find(|a| a.name == "update_ticket").unwrap();
        assert_eq!(action.rule_ids.len(), 1);
    }

    #[test]
    fn rls_statements_reference_access_predicates() {
        let src = r#"
            entity Ticket { author_id: uuid }
            access Ticket { read: true, write: author_id == user }
        "#;
        let p = plan_src(src);
        assert!(p.migration.up_statements.iter().any(|s| s.contains("ENABLE ROW LEVEL SECURITY")));
        assert!(p.migration.up_statements.iter().any(|s| s.contains("CREATE POLICY") && s.contains("author_id")));
    }

    #[test]
    fn forbid_rejects_when_true_require_rejects_when_false() {
        assert!(rejects(RuleKind::Forbid, true));
        assert!(!rejects(RuleKind::Forbid, false));
        assert!(rejects(RuleKind::Require, false));
        assert!(!rejects(RuleKind::Require, true));
    }
}
