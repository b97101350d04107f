//! Name and type resolution (C4, pass 2).
//!
//! Runs once every declaration is known ([`crate::symbols::collect`] has
//! produced a [`SymbolTable`]). Walks every expression reachable from a
//! rule, access policy, job, or view, resolving identifiers against the
//! owning entity's fields and relations and recording the inferred [`Ty`]
//! back onto each [`Expr`] node.

use crate::symbols::{field_ty, EntityInfo, SymbolTable};
use forge_diagnostics::{Code, Collector, Diagnostic, SourceRange};
use forge_syntax::*;
use std::collections::BTreeMap;

/// `user` is always available in rule/access/job expressions: the
/// subject id stamped on the request by C11's `authenticate` step.
const USER_VAR: &str = "user";

/// The set of names resolvable inside an expression evaluated against one
/// entity: its scalar fields plus its outgoing relations.
fn entity_env(info: &EntityInfo) -> BTreeMap<String, Ty> {
    let mut env = BTreeMap::new();
    for field in info.fields.values() {
        env.insert(field.name.clone(), field_ty(field));
    }
    for relation in &info.relations {
        let target_ty = match relation.cardinality {
            Cardinality::One => Ty::Entity(relation.target_entity.clone()),
            Cardinality::Many => Ty::SetEntity(relation.target_entity.clone()),
        };
        env.insert(relation.name.clone(), target_ty);
    }
    env
}

/// Look up `member` on `entity_name`: a scalar field, or a relation
/// (yielding `Entity`/`SetEntity` of the relation's target).
fn lookup_member(entities: &BTreeMap<String, EntityInfo>, entity_name: &str, member: &str) -> Option<Ty> {
    let info = entities.get(entity_name)?;
    if let Some(field) = info.fields.get(member) {
        return Some(field_ty(field));
    }
    info.relations.iter().find(|r| r.name == member).map(|r| match r.cardinality {
        Cardinality::One => Ty::Entity(r.target_entity.clone()),
        Cardinality::Many => Ty::SetEntity(r.target_entity.clone()),
    })
}

pub fn resolve(program: &mut Program, table: &SymbolTable, diags: &mut Collector) {
    check_relations(table, diags);

    for decl in &mut program.declarations {
        match decl {
            Decl::Rule(rule) => {
                let Some(env) = env_for(table, &rule.entity, diags, &rule.range) else { continue };
                for clause in &mut rule.clauses {
                    let ty = resolve_expr(&mut clause.condition, &env, &table.entities, &table.enums, diags);
                    require_bool(ty, &clause.condition.range, diags);
                    if !table.messages.contains_key(&clause.emit_code) {
                        diags.append(
                            Diagnostic::error(
                                Code::E0305UndefinedMessage,
                                format!("undefined message '{}'", clause.emit_code),
                            )
                            .with_range(clause.range.clone()),
                        );
                    }
                }
            }
            Decl::Access(access) => {
                let Some(env) = env_for(table, &access.entity, diags, &access.range) else { continue };
                let read_ty = resolve_expr(&mut access.read, &env, &table.entities, &table.enums, diags);
                require_bool(read_ty, &access.read.range, diags);
                let write_ty = resolve_expr(&mut access.write, &env, &table.entities, &table.enums, diags);
                require_bool(write_ty, &access.write.range, diags);
            }
            Decl::Action(action) => check_action(table, action, diags),
            Decl::Hook(hook) => check_hook(table, hook, diags),
            Decl::Job(job) => check_job(table, job, diags),
            Decl::View(view) => check_view(table, view, diags),
            _ => {}
        }
    }
}

fn env_for(
    table: &SymbolTable,
    entity_name: &str,
    diags: &mut Collector,
    range: &SourceRange,
) -> Option<BTreeMap<String, Ty>> {
    match table.entities.get(entity_name) {
        Some(info) => {
            let mut env = entity_env(info);
            env.insert(USER_VAR.to_string(), Ty::Uuid);
            Some(env)
        }
        None => {
            diags.append(
                Diagnostic::error(Code::E0301UndefinedEntity, format!("undefined entity '{entity_name}'"))
                    .with_range(range.clone()),
            );
            None
        }
    }
}

fn require_bool(ty: Ty, range: &SourceRange, diags: &mut Collector) {
    if ty != Ty::Bool && ty != Ty::Unknown {
        diags.append(
            Diagnostic::error(Code::E0312TypeMismatch, format!("expected a boolean expression, found {ty:?}"))
                .with_range(range.clone()),
        );
    }
}

fn check_relations(table: &SymbolTable, diags: &mut Collector) {
    for info in table.entities.values() {
        for relation in &info.relations {
            if !table.entities.contains_key(&relation.target_entity) {
                diags.append(
                    Diagnostic::error(
                        Code::E0301UndefinedEntity,
                        format!("relation '{}' targets undefined entity '{}'", relation.name, relation.target_entity),
                    )
                    .with_range(relation.range.clone()),
                );
            }
        }
    }

    // Cycle detection over the owner -> target relation graph. A cycle is
    // only a real problem for the planner's FK topological order, but it's
    // flagged here so `forge check` catches it before `forge build`.
    let mut state: BTreeMap<&str, u8> = BTreeMap::new(); // 0 unvisited, 1 in-progress, 2 done
    for name in table.entities.keys() {
        state.entry(name.as_str()).or_insert(0);
    }
    let names: Vec<String> = table.entities.keys().cloned().collect();
    for start in &names {
        if state.get(start.as_str()).copied().unwrap_or(0) == 0 {
            visit_for_cycle(start, table, &mut state, &mut Vec::new(), diags);
        }
    }
}

fn visit_for_cycle<'a>(
    name: &'a str,
    table: &'a SymbolTable,
    state: &mut BTreeMap<&'a str, u8>,
    path: &mut Vec<&'a str>,
    diags: &mut Collector,
) {
    state.insert(name, 1);
    path.push(name);
    if let Some(info) = table.entities.get(name) {
        for relation in &info.relations {
            let target = relation.target_entity.as_str();
            if !table.entities.contains_key(target) {
                continue; // already reported by check_relations
            }
            match state.get(target).copied().unwrap_or(0) {
                0 => visit_for_cycle(target, table, state, path, diags),
                1 => {
                    diags.append(
                        Diagnostic::error(
                            Code::E0314CircularDependency,
                            format!("circular relation dependency: {} -> {}", path.join(" -> "), target),
                        )
                        .with_range(relation.range.clone()),
                    );
                }
                _ => {}
            }
        }
    }
    path.pop();
    state.insert(name, 2);
}

fn check_action(table: &SymbolTable, action: &ActionDecl, diags: &mut Collector) {
    if !table.entities.contains_key(&action.input_entity) {
        diags.append(
            Diagnostic::error(
                Code::E0301UndefinedEntity,
                format!("action '{}' has undefined input entity '{}'", action.name, action.input_entity),
            )
            .with_range(action.range.clone()),
        );
        return;
    }
    let target_name = action.target_entity.as_ref().unwrap_or(&action.input_entity);
    let Some(target) = table.entities.get(target_name) else {
        diags.append(
            Diagnostic::error(
                Code::E0301UndefinedEntity,
                format!("action '{}' has undefined target entity '{target_name}'", action.name),
            )
            .with_range(action.range.clone()),
        );
        return;
    };
    for field in &action.auto_populate {
        if !target.fields.contains_key(field) {
            diags.append(
                Diagnostic::error(
                    Code::E0302UndefinedField,
                    format!("action '{}' auto-populates undefined field '{field}' on '{target_name}'", action.name),
                )
                .with_range(action.range.clone()),
            );
        }
    }
}

fn check_hook(table: &SymbolTable, hook: &HookDecl, diags: &mut Collector) {
    if !table.entities.contains_key(&hook.entity) {
        diags.append(
            Diagnostic::error(Code::E0301UndefinedEntity, format!("hook targets undefined entity '{}'", hook.entity))
                .with_range(hook.range.clone()),
        );
    }
    for job_name in &hook.job_names {
        if !table.jobs.contains_key(job_name) {
            diags.append(
                Diagnostic::error(Code::E0306UndefinedJob, format!("hook enqueues undefined job '{job_name}'"))
                    .with_range(hook.range.clone()),
            );
        }
    }
}

fn check_job(table: &SymbolTable, job: &mut JobDecl, diags: &mut Collector) {
    let Some(_input) = table.entities.get(&job.input_entity) else {
        diags.append(
            Diagnostic::error(
                Code::E0301UndefinedEntity,
                format!("job '{}' has undefined input entity '{}'", job.name, job.input_entity),
            )
            .with_range(job.range.clone()),
        );
        return;
    };

    let mut reached = job.input_entity.clone();
    if let Some(Expr { kind: ExprKind::PathTraverse { segments }, range, .. }) = &job.needs_path {
        for (i, segment) in segments.iter().enumerate() {
            let is_last = i == segments.len() - 1;
            match lookup_member(&table.entities, &reached, segment) {
                Some(Ty::Entity(target)) | Some(Ty::SetEntity(target)) => reached = target,
                Some(_) if is_last => {} // scalar leaf field, fine to end here
                Some(_) => {
                    diags.append(
                        Diagnostic::error(
                            Code::E0312TypeMismatch,
                            format!("cannot traverse through non-relation field '{segment}' on '{reached}'"),
                        )
                        .with_range(range.clone()),
                    );
                    return;
                }
                None => {
                    diags.append(
                        Diagnostic::error(
                            Code::E0302UndefinedField,
                            format!("'{reached}' has no field or relation named '{segment}'"),
                        )
                        .with_range(range.clone()),
                    );
                    return;
                }
            }
        }
    }

    if let Some(filter) = &mut job.needs_filter {
        let Some(info) = table.entities.get(&reached) else { return };
        let mut env = entity_env(info);
        env.insert(USER_VAR.to_string(), Ty::Uuid);
        let ty = resolve_expr(filter, &env, &table.entities, &table.enums, diags);
        require_bool(ty, &filter.range, diags);
    }
}

fn check_view(table: &SymbolTable, view: &mut ViewDecl, diags: &mut Collector) {
    let Some(source) = table.entities.get(&view.source_entity) else {
        diags.append(
            Diagnostic::error(
                Code::E0301UndefinedEntity,
                format!("view '{}' has undefined source entity '{}'", view.name, view.source_entity),
            )
            .with_range(view.range.clone()),
        );
        return;
    };

    for field in &view.fields {
        let mut reached_entity = view.source_entity.clone();
        let segments: Vec<&str> = field.path.split('.').collect();
        for (i, segment) in segments.iter().enumerate() {
            let is_last = i == segments.len() - 1;
            match lookup_member(&table.entities, &reached_entity, segment) {
                Some(Ty::Entity(target)) | Some(Ty::SetEntity(target)) if !is_last => reached_entity = target,
                Some(Ty::Entity(_)) | Some(Ty::SetEntity(_)) => {
                    diags.append(
                        Diagnostic::error(
                            Code::E0312TypeMismatch,
                            format!("view field '{}' must select a scalar field, not a whole relation", field.path),
                        )
                        .with_range(view.range.clone()),
                    );
                }
                Some(_) => {}
                None => {
                    diags.append(
                        Diagnostic::error(
                            Code::E0302UndefinedField,
                            format!("'{reached_entity}' has no field or relation named '{segment}'"),
                        )
                        .with_range(view.range.clone()),
                    );
                    break;
                }
            }
        }
    }

    if let Some(filter) = &mut view.filter {
        let mut env = entity_env(source);
        env.insert(USER_VAR.to_string(), Ty::Uuid);
        let ty = resolve_expr(filter, &env, &table.entities, &table.enums, diags);
        require_bool(ty, &filter.range, diags);
    }
}

/// True when `expr` is a bare identifier that doesn't name anything in
/// `env` — the shape a declared-but-unqualified enum variant always takes
/// (`closed`, not `status` or `Ticket.status`).
fn is_unresolved_bare_identifier(expr: &Expr, env: &BTreeMap<String, Ty>) -> bool {
    matches!(&expr.kind, ExprKind::Identifier(name) if !env.contains_key(name))
}

/// If `expr` is a bare identifier naming one of `field`'s declared enum
/// variants, rewrite it in place to a string literal typed `Enum(field)`
/// and return that type — this is how a bare variant (`closed`) in
/// `status == closed` stops being mistaken for a reference to a field
/// named `closed` (`spec.md` §3's `enum<E>` type; variants are registered
/// per field in [`SymbolTable::enums`] during collection).
fn resolve_enum_variant(expr: &mut Expr, field: &str, enums: &BTreeMap<String, Vec<String>>) -> Option<Ty> {
    let ExprKind::Identifier(name) = &expr.kind else { return None };
    let is_variant = enums.get(field).map(|variants| variants.iter().any(|v| v == name)).unwrap_or(false);
    if !is_variant {
        return None;
    }
    let ty = Ty::Enum(field.to_string());
    expr.kind = ExprKind::Literal(Literal::String(name.clone()));
    expr.ty = ty.clone();
    Some(ty)
}

/// Resolves an `==`/`!=` comparison where exactly one side is a bare,
/// otherwise-undefined identifier and the other resolves to `Ty::Enum`:
/// the bare side is checked against that enum's variant list instead of
/// being resolved as an ordinary (and, for a variant, always-undefined)
/// field reference. Returns `None` when this special case doesn't apply,
/// so the caller falls back to resolving both sides normally.
fn resolve_enum_equality(
    op: BinOp,
    lhs: &mut Expr,
    rhs: &mut Expr,
    env: &BTreeMap<String, Ty>,
    entities: &BTreeMap<String, EntityInfo>,
    enums: &BTreeMap<String, Vec<String>>,
    range: &SourceRange,
    diags: &mut Collector,
) -> Option<Ty> {
    if !matches!(op, BinOp::Eq | BinOp::NotEq) {
        return None;
    }
    let lhs_bare = is_unresolved_bare_identifier(lhs, env);
    let rhs_bare = is_unresolved_bare_identifier(rhs, env);
    if lhs_bare == rhs_bare {
        return None; // both resolvable or both bare: let normal resolution report the real error
    }
    let (bare, typed) = if rhs_bare { (rhs, lhs) } else { (lhs, rhs) };
    let typed_ty = resolve_expr(typed, env, entities, enums, diags);
    if let Ty::Enum(field) = &typed_ty {
        if let Some(bare_ty) = resolve_enum_variant(bare, field, enums) {
            return Some(resolve_binary(op, typed_ty, bare_ty, range, diags));
        }
    }
    let bare_ty = resolve_expr(bare, env, entities, enums, diags);
    Some(resolve_binary(op, typed_ty, bare_ty, range, diags))
}

/// Resolves the right-hand side of `lhs in rhs`. When `lhs` is enum-typed
/// and `rhs` is a literal list, each bare item is checked against the
/// enum's variant list (`status in [open, pending]`) instead of being
/// resolved as an ordinary field reference; any non-bare or non-matching
/// item still goes through normal resolution so its real error surfaces.
fn resolve_in_test_rhs(
    rhs: &mut Expr,
    lhs_ty: &Ty,
    env: &BTreeMap<String, Ty>,
    entities: &BTreeMap<String, EntityInfo>,
    enums: &BTreeMap<String, Vec<String>>,
    diags: &mut Collector,
) -> Ty {
    let Ty::Enum(field) = lhs_ty else {
        return resolve_expr(rhs, env, entities, enums, diags);
    };
    let ExprKind::ListLiteral(items) = &mut rhs.kind else {
        return resolve_expr(rhs, env, entities, enums, diags);
    };
    let mut item_ty = Ty::Unknown;
    for item in items.iter_mut() {
        let ty = resolve_enum_variant(item, field, enums).unwrap_or_else(|| resolve_expr(item, env, entities, enums, diags));
        if item_ty == Ty::Unknown {
            item_ty = ty;
        } else if ty != Ty::Unknown && ty != item_ty {
            diags.append(
                Diagnostic::error(Code::E0312TypeMismatch, format!("list elements have mixed types: {item_ty:?} and {ty:?}"))
                    .with_range(item.range.clone()),
            );
        }
    }
    let ty = Ty::List(Box::new(item_ty));
    rhs.ty = ty.clone();
    ty
}

fn resolve_expr(
    expr: &mut Expr,
    env: &BTreeMap<String, Ty>,
    entities: &BTreeMap<String, EntityInfo>,
    enums: &BTreeMap<String, Vec<String>>,
    diags: &mut Collector,
) -> Ty {
    let ty = match &mut expr.kind {
        ExprKind::Literal(Literal::Bool(_)) => Ty::Bool,
        ExprKind::Literal(Literal::Int(_)) => Ty::Int,
        ExprKind::Literal(Literal::Float(_)) => Ty::Float,
        ExprKind::Literal(Literal::String(_)) => Ty::String,
        ExprKind::Identifier(name) => match env.get(name) {
            Some(ty) => ty.clone(),
            None => {
                diags.append(
                    Diagnostic::error(Code::E0302UndefinedField, format!("undefined field '{name}'"))
                        .with_range(expr.range.clone()),
                );
                Ty::Unknown
            }
        },
        ExprKind::Member { base, member } => {
            let base_ty = resolve_expr(base, env, entities, enums, diags);
            match base_ty {
                Ty::Entity(ref target) => match lookup_member(entities, target, member) {
                    Some(ty) => ty,
                    None => {
                        diags.append(
                            Diagnostic::error(
                                Code::E0302UndefinedField,
                                format!("'{target}' has no field or relation named '{member}'"),
                            )
                            .with_range(expr.range.clone()),
                        );
                        Ty::Unknown
                    }
                },
                Ty::SetEntity(_) => {
                    diags.append(
                        Diagnostic::error(
                            Code::E0312TypeMismatch,
                            format!("cannot access '.{member}' through a many-relation; use 'in' instead"),
                        )
                        .with_range(expr.range.clone()),
                    );
                    Ty::Unknown
                }
                Ty::Unknown => Ty::Unknown,
                other => {
                    diags.append(
                        Diagnostic::error(
                            Code::E0312TypeMismatch,
                            format!("cannot access '.{member}' on a value of type {other:?}"),
                        )
                        .with_range(expr.range.clone()),
                    );
                    Ty::Unknown
                }
            }
        }
        ExprKind::Binary { op, lhs, rhs } => {
            if let Some(ty) = resolve_enum_equality(*op, lhs, rhs, env, entities, enums, &expr.range, diags) {
                ty
            } else {
                let lhs_ty = resolve_expr(lhs, env, entities, enums, diags);
                let rhs_ty = resolve_expr(rhs, env, entities, enums, diags);
                resolve_binary(*op, lhs_ty, rhs_ty, &expr.range, diags)
            }
        }
        ExprKind::Unary { op, expr: inner } => {
            let inner_ty = resolve_expr(inner, env, entities, enums, diags);
            match (op, &inner_ty) {
                (UnOp::Not, Ty::Bool) | (UnOp::Not, Ty::Unknown) => Ty::Bool,
                (UnOp::Not, other) => {
                    diags.append(
                        Diagnostic::error(Code::E0312TypeMismatch, format!("'not' requires a boolean, found {other:?}"))
                            .with_range(expr.range.clone()),
                    );
                    Ty::Bool
                }
                (UnOp::Neg, Ty::Int) | (UnOp::Neg, Ty::Float) | (UnOp::Neg, Ty::Unknown) => inner_ty,
                (UnOp::Neg, other) => {
                    diags.append(
                        Diagnostic::error(Code::E0312TypeMismatch, format!("unary '-' requires a number, found {other:?}"))
                            .with_range(expr.range.clone()),
                    );
                    inner_ty
                }
            }
        }
        ExprKind::Call { callee, args } => {
            let arg_tys: Vec<Ty> = args.iter_mut().map(|a| resolve_expr(a, env, entities, enums, diags)).collect();
            resolve_call(callee, &arg_tys, &expr.range, diags)
        }
        ExprKind::InTest { lhs, rhs } => {
            let lhs_ty = resolve_expr(lhs, env, entities, enums, diags);
            let rhs_ty = resolve_in_test_rhs(rhs, &lhs_ty, env, entities, enums, diags);
            match &rhs_ty {
                Ty::List(item_ty) if **item_ty == lhs_ty || **item_ty == Ty::Unknown || lhs_ty == Ty::Unknown => {}
                Ty::SetEntity(target) if lhs_ty == Ty::Uuid || lhs_ty == Ty::Entity(target.clone()) || lhs_ty == Ty::Unknown => {}
                Ty::Unknown => {}
                _ => {
                    diags.append(
                        Diagnostic::error(
                            Code::E0312TypeMismatch,
                            format!("'{lhs_ty:?} in {rhs_ty:?}' is not a valid membership test"),
                        )
                        .with_range(expr.range.clone()),
                    );
                }
            }
            Ty::Bool
        }
        ExprKind::PathTraverse { segments } => {
            let mut ty = match env.get(&segments[0]) {
                Some(ty) => ty.clone(),
                None => {
                    diags.append(
                        Diagnostic::error(Code::E0302UndefinedField, format!("undefined field '{}'", segments[0]))
                            .with_range(expr.range.clone()),
                    );
                    Ty::Unknown
                }
            };
            for segment in &segments[1..] {
                ty = match &ty {
                    Ty::Entity(target) | Ty::SetEntity(target) => match lookup_member(entities, target, segment) {
                        Some(next) => next,
                        None => {
                            diags.append(
                                Diagnostic::error(
                                    Code::E0302UndefinedField,
                                    format!("'{target}' has no field or relation named '{segment}'"),
                                )
                                .with_range(expr.range.clone()),
                            );
                            Ty::Unknown
                        }
                    },
                    Ty::Unknown => Ty::Unknown,
                    other => {
                        diags.append(
                            Diagnostic::error(
                                Code::E0312TypeMismatch,
                                format!("cannot traverse through non-relation value of type {other:?}"),
                            )
                            .with_range(expr.range.clone()),
                        );
                        Ty::Unknown
                    }
                };
            }
            ty
        }
        ExprKind::ListLiteral(items) => {
            let mut item_ty = Ty::Unknown;
            for item in items.iter_mut() {
                let ty = resolve_expr(item, env, entities, enums, diags);
                if item_ty == Ty::Unknown {
                    item_ty = ty;
                } else if ty != Ty::Unknown && ty != item_ty {
                    diags.append(
                        Diagnostic::error(
                            Code::E0312TypeMismatch,
                            format!("list elements have mixed types: {item_ty:?} and {ty:?}"),
                        )
                        .with_range(item.range.clone()),
                    );
                }
            }
            Ty::List(Box::new(item_ty))
        }
    };
    expr.ty = ty.clone();
    ty
}

fn resolve_binary(op: BinOp, lhs: Ty, rhs: Ty, range: &SourceRange, diags: &mut Collector) -> Ty {
    use BinOp::*;
    match op {
        And | Or => {
            if (lhs != Ty::Bool && lhs != Ty::Unknown) || (rhs != Ty::Bool && rhs != Ty::Unknown) {
                diags.append(
                    Diagnostic::error(Code::E0312TypeMismatch, format!("'{op:?}' requires booleans, found {lhs:?} and {rhs:?}"))
                        .with_range(range.clone()),
                );
            }
            Ty::Bool
        }
        Eq | NotEq => {
            if lhs != Ty::Unknown && rhs != Ty::Unknown && lhs != rhs {
                diags.append(
                    Diagnostic::error(
                        Code::E0312TypeMismatch,
                        format!("cannot compare {lhs:?} and {rhs:?} for equality"),
                    )
                    .with_range(range.clone()),
                );
            }
            Ty::Bool
        }
        Lt | LtEq | Gt | GtEq => {
            let ordered = |t: &Ty| matches!(t, Ty::Int | Ty::Float | Ty::Time | Ty::Unknown);
            if !ordered(&lhs) || !ordered(&rhs) || (lhs != Ty::Unknown && rhs != Ty::Unknown && lhs != rhs) {
                diags.append(
                    Diagnostic::error(
                        Code::E0312TypeMismatch,
                        format!("'{op:?}' requires two comparable ordered values, found {lhs:?} and {rhs:?}"),
                    )
                    .with_range(range.clone()),
                );
            }
            Ty::Bool
        }
        Add | Sub | Mul | Div | Mod => {
            let numeric = |t: &Ty| matches!(t, Ty::Int | Ty::Float | Ty::Unknown);
            if !numeric(&lhs) || !numeric(&rhs) {
                diags.append(
                    Diagnostic::error(
                        Code::E0312TypeMismatch,
                        format!("'{op:?}' requires numbers, found {lhs:?} and {rhs:?}"),
                    )
                    .with_range(range.clone()),
                );
            }
            if lhs != Ty::Unknown {
                lhs
            } else {
                rhs
            }
        }
    }
}

fn resolve_call(callee: &str, args: &[Ty], range: &SourceRange, diags: &mut Collector) -> Ty {
    match (callee, args.len()) {
        ("now", 0) => Ty::Time,
        ("len", 1) | ("count", 1) => Ty::Int,
        _ => {
            diags.append(
                Diagnostic::error(Code::E0310UndefinedFunction, format!("undefined function '{callee}'"))
                    .with_range(range.clone()),
            );
            Ty::Unknown
        }
    }
}
