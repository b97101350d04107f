//! Expression → SQL predicate lowering.
//!
//! Produces the parenthesized SQL fragment `spec.md` §4.5 describes: scalar
//! fields become column references, `user` becomes the session GUC lookup,
//! and relation traversals become correlated subqueries against the related
//! table. This is the *secondary* enforcement path (row-level security); the
//! rule evaluator (forge-rules) is the primary one and must never be skipped
//! in favor of this.

use crate::naming::{fk_column_for, table_name};
use crate::EntityMeta;
use forge_syntax::{BinOp, Expr, ExprKind, Literal, Ty, UnOp};
use std::collections::BTreeMap;

/// The SQL expression for the authenticated subject. `true` as the second
/// argument to `current_setting` makes the GUC optional: unauthenticated
/// sessions see `NULL` rather than erroring, so anonymous-read policies can
/// still evaluate.
pub const SUBJECT_SQL: &str = "current_setting('app.user_id', true)::uuid";

pub struct SqlCtx<'a> {
    pub entities: &'a BTreeMap<String, EntityMeta>,
    /// The entity the expression is rooted at (its table is the `FROM`
    /// implicit in every bare column reference).
    pub root_entity: &'a str,
}

/// Lower a resolved [`Expr`] to a SQL predicate fragment, always wrapped in
/// parens so it composes safely inside a larger `USING (...)` clause.
pub fn expr_to_sql(expr: &Expr, ctx: &SqlCtx) -> String {
    format!("({})", lower(expr, ctx))
}

fn lower(expr: &Expr, ctx: &SqlCtx) -> String {
    match &expr.kind {
        ExprKind::Literal(lit) => literal_sql(lit),
        ExprKind::Identifier(name) if name == "user" => SUBJECT_SQL.to_string(),
        ExprKind::Identifier(name) => name.clone(),
        ExprKind::Member { base, member } => member_sql(base, member, ctx),
        ExprKind::Binary { op, lhs, rhs } => format!("({} {} {})", lower(lhs, ctx), binop_sql(*op), lower(rhs, ctx)),
        ExprKind::Unary { op: UnOp::Not, expr: inner } => format!("(NOT {})", lower(inner, ctx)),
        ExprKind::Unary { op: UnOp::Neg, expr: inner } => format!("(-{})", lower(inner, ctx)),
        ExprKind::Call { callee, args } => call_sql(callee, args, ctx),
        ExprKind::InTest { lhs, rhs } => in_test_sql(lhs, rhs, ctx),
        ExprKind::PathTraverse { segments } => path_sql(segments, ctx),
        ExprKind::ListLiteral(items) => {
            let rendered: Vec<String> = items.iter().map(|i| lower(i, ctx)).collect();
            format!("({})", rendered.join(", "))
        }
    }
}

fn literal_sql(lit: &Literal) -> String {
    match lit {
        Literal::Bool(b) => b.to_string(),
        Literal::Int(i) => i.to_string(),
        Literal::Float(f) => f.to_string(),
        Literal::String(s) => format!("'{}'", s.replace('\'', "''")),
    }
}

fn binop_sql(op: BinOp) -> &'static str {
    match op {
        BinOp::Or => "OR",
        BinOp::And => "AND",
        BinOp::Eq => "=",
        BinOp::NotEq => "!=",
        BinOp::Lt => "<",
        BinOp::LtEq => "<=",
        BinOp::Gt => ">",
        BinOp::GtEq => ">=",
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Mod => "%",
    }
}

fn call_sql(callee: &str, args: &[Expr], ctx: &SqlCtx) -> String {
    match callee {
        "now" => "now()".to_string(),
        "len" | "count" => format!("length({})", args.first().map(|a| lower(a, ctx)).unwrap_or_default()),
        other => format!("{other}({})", args.iter().map(|a| lower(a, ctx)).collect::<Vec<_>>().join(", ")),
    }
}

/// `base.member` where `base` resolved (per C4 typing) to a single-valued
/// relation: lower as a correlated subquery reading `member` off the
/// related row, e.g. `(SELECT status FROM organizations WHERE id = org_id)`.
fn member_sql(base: &Expr, member: &str, ctx: &SqlCtx) -> String {
    let Some(target_entity) = relation_target(base, ctx) else {
        // Base didn't resolve to a known one-relation; fall back to a
        // dotted identifier, which is syntactically valid SQL for a
        // composite/record column should one ever exist.
        return format!("{}.{}", lower(base, ctx), member);
    };
    let fk_column = base_fk_column(base);
    let target_table = table_name(&target_entity);
    format!("(SELECT {member} FROM {target_table} WHERE id = {fk_column})")
}

/// `lhs in rhs`. When `rhs` is a many-relation path the membership test
/// becomes a correlated subquery over the reverse foreign key; otherwise
/// it's a plain SQL `IN`.
fn in_test_sql(lhs: &Expr, rhs: &Expr, ctx: &SqlCtx) -> String {
    if let ExprKind::PathTraverse { segments } = &rhs.kind {
        if let Some((owner_fk, target_table)) = many_relation_lookup(segments, ctx) {
            return format!("{} IN (SELECT {owner_fk} FROM {target_table})", lower(lhs, ctx));
        }
    }
    if let ExprKind::Identifier(name) = &rhs.kind {
        if let Some((owner_fk, target_table)) = many_relation_lookup(std::slice::from_ref(name), ctx) {
            return format!("{} IN (SELECT {owner_fk} FROM {target_table})", lower(lhs, ctx));
        }
    }
    format!("{} IN {}", lower(lhs, ctx), lower(rhs, ctx))
}

fn path_sql(segments: &[String], ctx: &SqlCtx) -> String {
    // A bare dotted path used outside `in`/member position (e.g. a job
    // `needs` path) has no direct SQL rendering; render the segments as a
    // best-effort dotted reference.
    let _ = ctx;
    segments.join(".")
}

/// If `base` is an expression that resolved to `Ty::Entity(target)` (a
/// single-valued relation reachable directly from the root entity), return
/// that target entity name.
fn relation_target(base: &Expr, ctx: &SqlCtx) -> Option<String> {
    match &base.ty {
        Ty::Entity(target) => Some(target.clone()),
        _ => {
            if let ExprKind::Identifier(name) = &base.kind {
                ctx.entities.get(ctx.root_entity).and_then(|root| {
                    root.relations.get(name).filter(|r| !r.many).map(|r| r.target_entity.clone())
                })
            } else {
                None
            }
        }
    }
}

fn base_fk_column(base: &Expr) -> String {
    match &base.kind {
        ExprKind::Identifier(name) => fk_column_for(name),
        _ => "id".to_string(),
    }
}

/// Resolve a one-segment relation path rooted at `ctx.root_entity` that is
/// declared `cardinality: many`, returning `(reverse_fk_column, target_table)`.
fn many_relation_lookup(segments: &[String], ctx: &SqlCtx) -> Option<(String, String)> {
    let [name] = segments else { return None };
    let root = ctx.entities.get(ctx.root_entity)?;
    let relation = root.relations.get(name)?;
    if !relation.many {
        return None;
    }
    let owner_fk = fk_column_for(ctx.root_entity);
    Some((owner_fk, table_name(&relation.target_entity)))
}
