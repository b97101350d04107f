//! Pure evaluation of the `Expr` trees carried in the runtime artifact:
//! access predicates (`spec.md` §4.2) and `forbid`/`require` rule
//! conditions (§4.3) (C9).
//!
//! Evaluation never touches the database. The executor (C11) is
//! responsible for resolving whatever relation data a rule's expression
//! needs — single-valued relations as a nested [`Value::Record`], set
//! relations as a [`Value::List`] — before calling [`RuleEngine::eval`].
//! This keeps the one evaluator pure, so it can run identically in the
//! executor's row-level check and in any offline dry-run tooling.

use chrono::{DateTime, Utc};
use forge_syntax::{BinOp, Expr, ExprKind, Literal, UnOp};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Time(DateTime<Utc>),
    Uuid(Uuid),
    List(Vec<Value>),
    Record(HashMap<String, Value>),
    Null,
}

impl Value {
    pub fn as_bool(&self) -> Result<bool, RuleError> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(RuleError::TypeMismatch(format!("expected bool, found {other:?}"))),
        }
    }
}

pub type Env = HashMap<String, Value>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuleError {
    #[error("undefined variable '{0}'")]
    UndefinedVariable(String),
    #[error("undefined function '{0}'")]
    UndefinedFunction(String),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("cannot traverse '.{0}' on a non-record value")]
    NotTraversable(String),
}

fn eval_literal(lit: &Literal) -> Value {
    match lit {
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Int(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::String(s) => Value::String(s.clone()),
    }
}

fn numeric_binop(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value, RuleError> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => match op {
            BinOp::Add => Ok(Value::Int(a + b)),
            BinOp::Sub => Ok(Value::Int(a - b)),
            BinOp::Mul => Ok(Value::Int(a * b)),
            BinOp::Div => {
                if *b == 0 {
                    Err(RuleError::DivisionByZero)
                } else {
                    Ok(Value::Int(a / b))
                }
            }
            BinOp::Mod => {
                if *b == 0 {
                    Err(RuleError::DivisionByZero)
                } else {
                    Ok(Value::Int(a % b))
                }
            }
            BinOp::Lt => Ok(Value::Bool(a < b)),
            BinOp::LtEq => Ok(Value::Bool(a <= b)),
            BinOp::Gt => Ok(Value::Bool(a > b)),
            BinOp::GtEq => Ok(Value::Bool(a >= b)),
            BinOp::Eq => Ok(Value::Bool(a == b)),
            BinOp::NotEq => Ok(Value::Bool(a != b)),
            BinOp::And | BinOp::Or => Err(RuleError::TypeMismatch("'and'/'or' require booleans".to_string())),
        },
        (Value::Float(_), _) | (_, Value::Float(_)) => {
            let a = as_f64(lhs)?;
            let b = as_f64(rhs)?;
            match op {
                BinOp::Add => Ok(Value::Float(a + b)),
                BinOp::Sub => Ok(Value::Float(a - b)),
                BinOp::Mul => Ok(Value::Float(a * b)),
                BinOp::Div => Ok(Value::Float(a / b)),
                BinOp::Mod => Ok(Value::Float(a % b)),
                BinOp::Lt => Ok(Value::Bool(a < b)),
                BinOp::LtEq => Ok(Value::Bool(a <= b)),
                BinOp::Gt => Ok(Value::Bool(a > b)),
                BinOp::GtEq => Ok(Value::Bool(a >= b)),
                BinOp::Eq => Ok(Value::Bool(a == b)),
                BinOp::NotEq => Ok(Value::Bool(a != b)),
                BinOp::And | BinOp::Or => Err(RuleError::TypeMismatch("'and'/'or' require booleans".to_string())),
            }
        }
        (Value::Time(a), Value::Time(b)) => match op {
            BinOp::Lt => Ok(Value::Bool(a < b)),
            BinOp::LtEq => Ok(Value::Bool(a <= b)),
            BinOp::Gt => Ok(Value::Bool(a > b)),
            BinOp::GtEq => Ok(Value::Bool(a >= b)),
            BinOp::Eq => Ok(Value::Bool(a == b)),
            BinOp::NotEq => Ok(Value::Bool(a != b)),
            _ => Err(RuleError::TypeMismatch(format!("'{op:?}' is not valid between timestamps"))),
        },
        _ => match op {
            BinOp::Eq => Ok(Value::Bool(lhs == rhs)),
            BinOp::NotEq => Ok(Value::Bool(lhs != rhs)),
            _ => Err(RuleError::TypeMismatch(format!("'{op:?}' is not valid between {lhs:?} and {rhs:?}"))),
        },
    }
}

fn as_f64(value: &Value) -> Result<f64, RuleError> {
    match value {
        Value::Int(i) => Ok(*i as f64),
        Value::Float(f) => Ok(*f),
        other => Err(RuleError::TypeMismatch(format!("expected a number, found {other:?}"))),
    }
}

fn member(base: &Value, name: &str) -> Result<Value, RuleError> {
    match base {
        Value::Record(fields) => fields.get(name).cloned().ok_or_else(|| RuleError::UndefinedVariable(name.to_string())),
        _ => Err(RuleError::NotTraversable(name.to_string())),
    }
}

fn contains(haystack: &Value, needle: &Value) -> Result<bool, RuleError> {
    match haystack {
        Value::List(items) => Ok(items.contains(needle)),
        other => Err(RuleError::TypeMismatch(format!("'in' requires a list or set, found {other:?}"))),
    }
}

/// Walk one `Expr` node against an already-resolved variable environment.
pub fn eval_expr(expr: &Expr, env: &Env) -> Result<Value, RuleError> {
    match &expr.kind {
        ExprKind::Literal(lit) => Ok(eval_literal(lit)),
        ExprKind::Identifier(name) => env.get(name).cloned().ok_or_else(|| RuleError::UndefinedVariable(name.clone())),
        ExprKind::Member { base, member: name } => {
            let base_val = eval_expr(base, env)?;
            member(&base_val, name)
        }
        ExprKind::Binary { op: BinOp::And, lhs, rhs } => {
            if !eval_expr(lhs, env)?.as_bool()? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(eval_expr(rhs, env)?.as_bool()?))
        }
        ExprKind::Binary { op: BinOp::Or, lhs, rhs } => {
            if eval_expr(lhs, env)?.as_bool()? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(eval_expr(rhs, env)?.as_bool()?))
        }
        ExprKind::Binary { op, lhs, rhs } => {
            let lhs_val = eval_expr(lhs, env)?;
            let rhs_val = eval_expr(rhs, env)?;
            numeric_binop(*op, &lhs_val, &rhs_val)
        }
        ExprKind::Unary { op: UnOp::Not, expr: inner } => Ok(Value::Bool(!eval_expr(inner, env)?.as_bool()?)),
        ExprKind::Unary { op: UnOp::Neg, expr: inner } => match eval_expr(inner, env)? {
            Value::Int(i) => Ok(Value::Int(-i)),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(RuleError::TypeMismatch(format!("unary '-' requires a number, found {other:?}"))),
        },
        ExprKind::Call { callee, args } => eval_call(callee, args, env),
        ExprKind::InTest { lhs, rhs } => {
            let lhs_val = eval_expr(lhs, env)?;
            let rhs_val = eval_expr(rhs, env)?;
            Ok(Value::Bool(contains(&rhs_val, &lhs_val)?))
        }
        ExprKind::PathTraverse { segments } => {
            let mut value = env.get(&segments[0]).cloned().ok_or_else(|| RuleError::UndefinedVariable(segments[0].clone()))?;
            for segment in &segments[1..] {
                value = member(&value, segment)?;
            }
            Ok(value)
        }
        ExprKind::ListLiteral(items) => {
            let values = items.iter().map(|item| eval_expr(item, env)).collect::<Result<Vec<_>, _>>()?;
            Ok(Value::List(values))
        }
    }
}

fn eval_call(callee: &str, args: &[Expr], env: &Env) -> Result<Value, RuleError> {
    match (callee, args.len()) {
        ("now", 0) => Ok(Value::Time(Utc::now())),
        ("len", 1) | ("count", 1) => match eval_expr(&args[0], env)? {
            Value::List(items) => Ok(Value::Int(items.len() as i64)),
            other => Err(RuleError::TypeMismatch(format!("'{callee}' requires a list, found {other:?}"))),
        },
        _ => Err(RuleError::UndefinedFunction(callee.to_string())),
    }
}

/// A cache of already-evaluated rule ASTs, keyed by `(entity, expression
/// identity)`. Because [`Expr`] carries no original source text (only a
/// [`forge_diagnostics::SourceRange`]), its `Debug` rendering stands in for
/// "expression text" as a stable, content-addressed cache key: identical
/// expressions always render identically, and the cache only ever saves a
/// clone, never changes evaluation semantics.
pub struct RuleEngine {
    cache: RwLock<HashMap<(String, String), Arc<Expr>>>,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleEngine {
    pub fn new() -> Self {
        Self { cache: RwLock::new(HashMap::new()) }
    }

    fn cached(&self, entity: &str, expr: &Expr) -> Arc<Expr> {
        let key = (entity.to_string(), format!("{expr:?}"));
        if let Some(hit) = self.cache.read().expect("rule cache poisoned").get(&key) {
            return hit.clone();
        }
        let arc = Arc::new(expr.clone());
        self.cache.write().expect("rule cache poisoned").insert(key, arc.clone());
        arc
    }

    pub fn eval(&self, entity: &str, expr: &Expr, env: &Env) -> Result<Value, RuleError> {
        let cached = self.cached(entity, expr);
        eval_expr(&cached, env)
    }

    pub fn eval_bool(&self, entity: &str, expr: &Expr, env: &Env) -> Result<bool, RuleError> {
        self.eval(entity, expr, env)?.as_bool()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.read().expect("rule cache poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_diagnostics::SourceRange;

    fn parse_expr_body(field_decls: &str, expr_src: &str) -> Expr {
        let src = format!(
            "entity Row {{ {field_decls} }}\naccess Row {{ read: {expr_src}, write: true }}",
        );
        let (program, mut diags) = forge_syntax::parse("t.forge", &src);
        let analyzed = forge_analyze::analyze(program, &mut diags);
        assert!(!diags.has_errors(), "{:?}", diags.all());
        analyzed.symbols.access.get("Row").unwrap().read.clone()
    }

    fn range() -> SourceRange {
        SourceRange::new("t.forge", 0, 0, 1, 1)
    }

    #[test]
    fn evaluates_simple_equality() {
        let expr = parse_expr_body("status: string", "status == \"open\"");
        let mut env = Env::new();
        env.insert("status".to_string(), Value::String("open".to_string()));
        let engine = RuleEngine::new();
        assert_eq!(engine.eval_bool("Row", &expr, &env).unwrap(), true);
    }

    #[test]
    fn and_short_circuits_without_evaluating_the_right_side() {
        let expr = parse_expr_body("a: bool, b: bool", "a and b");
        let mut env = Env::new();
        env.insert("a".to_string(), Value::Bool(false));
        let engine = RuleEngine::new();
        assert_eq!(engine.eval_bool("Row", &expr, &env).unwrap(), false);
    }

    #[test]
    fn membership_test_checks_a_resolved_list() {
        let expr = parse_expr_body("author_id: uuid", "user in [author_id]");
        let id = Uuid::new_v4();
        let mut env = Env::new();
        env.insert("user".to_string(), Value::Uuid(id));
        env.insert("author_id".to_string(), Value::Uuid(id));
        let engine = RuleEngine::new();
        assert_eq!(engine.eval_bool("Row", &expr, &env).unwrap(), true);
    }

    #[test]
    fn undefined_variable_is_a_rule_error_not_a_panic() {
        let expr = Expr::new(ExprKind::Identifier("missing".to_string()), range());
        let engine = RuleEngine::new();
        let err = engine.eval("Row", &expr, &Env::new()).unwrap_err();
        assert_eq!(err, RuleError::UndefinedVariable("missing".to_string()));
    }

    #[test]
    fn repeated_eval_of_the_same_expression_reuses_the_cache_entry() {
        let expr = parse_expr_body("status: string", "status == \"open\"");
        let mut env = Env::new();
        env.insert("status".to_string(), Value::String("open".to_string()));
        let engine = RuleEngine::new();
        engine.eval_bool("Row", &expr, &env).unwrap();
        engine.eval_bool("Row", &expr, &env).unwrap();
        assert_eq!(engine.cache_len(), 1);
    }

    #[test]
    fn division_by_zero_is_a_rule_error() {
        let expr = Expr::new(
            ExprKind::Binary {
                op: BinOp::Div,
                lhs: Box::new(Expr::new(ExprKind::Literal(Literal::Int(1)), range())),
                rhs: Box::new(Expr::new(ExprKind::Literal(Literal::Int(0)), range())),
            },
            range(),
        );
        let engine = RuleEngine::new();
        assert_eq!(engine.eval("Row", &expr, &Env::new()).unwrap_err(), RuleError::DivisionByZero);
    }
}
