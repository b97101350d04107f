//! Token types produced by the lexer (C2).

use forge_diagnostics::SourceRange;
use std::fmt;

/// Reserved words. Deliberately a short list: record-style field keys like
/// `source`, `filter`, `operation`, `read`/`write` are ordinary identifiers
/// disambiguated by parser context, not reserved — only tokens that open a
/// declaration, connect an expression, or appear as a body verb are here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Keyword {
    App,
    Entity,
    Relation,
    Rule,
    Access,
    Action,
    Message,
    Job,
    Hook,
    View,
    Test,
    Webhook,
    Imperative,
    Forbid,
    Require,
    Emit,
    If,
    In,
    And,
    Or,
    Not,
    Enum,
    Length,
    Unique,
    Enqueue,
}

impl Keyword {
    /// Map a lowercase identifier to a keyword, if it is one.
    pub fn lookup(ident: &str) -> Option<Keyword> {
        use Keyword::*;
        Some(match ident {
            "app" => App,
            "entity" => Entity,
            "relation" => Relation,
            "rule" => Rule,
            "access" => Access,
            "action" => Action,
            "message" => Message,
            "job" => Job,
            "hook" => Hook,
            "view" => View,
            "test" => Test,
            "webhook" => Webhook,
            "imperative" => Imperative,
            "forbid" => Forbid,
            "require" => Require,
            "emit" => Emit,
            "if" => If,
            "in" => In,
            "and" => And,
            "or" => Or,
            "not" => Not,
            "enum" => Enum,
            "length" => Length,
            "unique" => Unique,
            "enqueue" => Enqueue,
            _ => return None,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Punct {
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Colon,
    Arrow,
    Eq,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    Keyword(Keyword),
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Punct(Punct),
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Keyword(k) => write!(f, "{k:?}"),
            TokenKind::Ident(s) => write!(f, "identifier '{s}'"),
            TokenKind::Int(n) => write!(f, "integer {n}"),
            TokenKind::Float(n) => write!(f, "float {n}"),
            TokenKind::Str(s) => write!(f, "string {s:?}"),
            TokenKind::Bool(b) => write!(f, "boolean {b}"),
            TokenKind::Punct(p) => write!(f, "{p:?}"),
            TokenKind::Eof => write!(f, "end of file"),
        }
    }
}

/// A lexed token: `{kind, lexeme, range}` per `spec.md` §3.
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub range: SourceRange,
}
