//! AST node types (C3 output, C4 input).
//!
//! Every node carries its source range; after analysis (C4) every
//! [`Expr`] additionally carries a resolved [`Ty`].

use forge_diagnostics::SourceRange;
use serde::{Deserialize, Serialize};

/// Resolved expression type lattice from `spec.md` §3.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Ty {
    Bool,
    Int,
    Float,
    String,
    Time,
    Uuid,
    Enum(String),
    Entity(String),
    SetEntity(String),
    List(Box<Ty>),
    /// Not yet resolved (pre-analysis, or analysis failed for this node).
    Unknown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

/// A typed expression node. Mirrors `spec.md` §3's
/// `{literal, identifier, member-access, binary-op, unary-op, call, in-test, path-traverse}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Ty,
    pub range: SourceRange,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Literal(Literal),
    Identifier(String),
    Member { base: Box<Expr>, member: String },
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Unary { op: UnOp, expr: Box<Expr> },
    Call { callee: String, args: Vec<Expr> },
    /// `lhs in rhs` membership test.
    InTest { lhs: Box<Expr>, rhs: Box<Expr> },
    /// A dotted relation-traversal path, e.g. `org.members`, used by job
    /// `needs` declarations rather than general boolean expressions.
    PathTraverse { segments: Vec<String> },
    /// `[a, b, c]`, the right-hand side of a membership test.
    ListLiteral(Vec<Expr>),
}

impl Expr {
    pub fn new(kind: ExprKind, range: SourceRange) -> Self {
        Self { kind, ty: Ty::Unknown, range }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    One,
    Many,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    pub fn lookup(s: &str) -> Option<Operation> {
        match s {
            "create" | "creates" => Some(Operation::Create),
            "update" | "updates" => Some(Operation::Update),
            "delete" | "deletes" => Some(Operation::Delete),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleKind {
    Forbid,
    Require,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub ty_name: String,
    pub enum_variants: Vec<String>,
    pub nullable: bool,
    pub unique: bool,
    pub default: Option<Expr>,
    pub max_length: Option<u32>,
    pub range: SourceRange,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityDecl {
    pub name: String,
    pub fields: Vec<FieldDecl>,
    pub range: SourceRange,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelationDecl {
    pub owner_entity: String,
    pub name: String,
    pub target_entity: String,
    pub cardinality: Cardinality,
    pub range: SourceRange,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleClause {
    pub kind: RuleKind,
    pub condition: Expr,
    pub emit_code: String,
    pub range: SourceRange,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleDecl {
    pub entity: String,
    pub operation: Operation,
    pub clauses: Vec<RuleClause>,
    pub range: SourceRange,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccessDecl {
    pub entity: String,
    pub read: Expr,
    pub write: Expr,
    pub range: SourceRange,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionDecl {
    pub name: String,
    pub input_entity: String,
    pub operation: Operation,
    pub target_entity: Option<String>,
    pub auto_populate: Vec<String>,
    pub range: SourceRange,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageDecl {
    pub code: String,
    pub level: String,
    pub default_text: String,
    pub range: SourceRange,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HookDecl {
    pub entity: String,
    pub operation: Operation,
    pub job_names: Vec<String>,
    pub range: SourceRange,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobDecl {
    pub name: String,
    pub input_entity: String,
    pub needs_path: Option<Expr>,
    pub needs_filter: Option<Expr>,
    pub capabilities: Vec<String>,
    pub range: SourceRange,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewField {
    pub path: String,
    pub alias: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewDecl {
    pub name: String,
    pub source_entity: String,
    pub fields: Vec<ViewField>,
    pub filter: Option<Expr>,
    pub parameters: Vec<String>,
    pub range: SourceRange,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMode {
    Password,
    Oauth,
    Jwt,
    None,
}

impl AuthMode {
    pub fn lookup(s: &str) -> Option<AuthMode> {
        match s {
            "password" => Some(AuthMode::Password),
            "oauth" => Some(AuthMode::Oauth),
            "jwt" => Some(AuthMode::Jwt),
            "none" => Some(AuthMode::None),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppDecl {
    pub auth_mode: AuthMode,
    pub database: String,
    pub version: String,
    pub range: SourceRange,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WebhookDecl {
    pub provider: String,
    pub triggers: Vec<String>,
    pub range: SourceRange,
}

/// A declarative test fixture. Parsed and name-checked (symbol table
/// registration, duplicate detection) but not executed by the compiler or
/// runtime — there is no test-runner component in `spec.md` §2's C1-C14, so
/// `test` declarations are treated the same way `imperative` declarations
/// are: recognized syntax with no core-engine operational semantics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestDecl {
    pub name: String,
    pub range: SourceRange,
}

/// An imperative escape hatch: recognized and registered, dispatched by an
/// external function-registry mechanism parallel to providers (`spec.md` §9
/// Open Questions).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImperativeDecl {
    pub name: String,
    pub range: SourceRange,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Decl {
    App(AppDecl),
    Entity(EntityDecl),
    Relation(RelationDecl),
    Rule(RuleDecl),
    Access(AccessDecl),
    Action(ActionDecl),
    Message(MessageDecl),
    Hook(HookDecl),
    Job(JobDecl),
    View(ViewDecl),
    Test(TestDecl),
    Webhook(WebhookDecl),
    Imperative(ImperativeDecl),
}

impl Decl {
    pub fn range(&self) -> &SourceRange {
        match self {
            Decl::App(d) => &d.range,
            Decl::Entity(d) => &d.range,
            Decl::Relation(d) => &d.range,
            Decl::Rule(d) => &d.range,
            Decl::Access(d) => &d.range,
            Decl::Action(d) => &d.range,
            Decl::Message(d) => &d.range,
            Decl::Hook(d) => &d.range,
            Decl::Job(d) => &d.range,
            Decl::View(d) => &d.range,
            Decl::Test(d) => &d.range,
            Decl::Webhook(d) => &d.range,
            Decl::Imperative(d) => &d.range,
        }
    }
}

/// A complete parsed source file: a sequence of declarations.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub declarations: Vec<Decl>,
}
