//! Diagnostic collection shared by every compiler pass (C1).
//!
//! A single [`Collector`] is threaded by mutable reference through lex,
//! parse, analyze, and plan. Passes never stop early on error: they keep
//! collecting so a single `forge build` reports as much as it can, but a
//! pass that has already seen an error never hands a partial result forward
//! into artifact emission.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Severity of a diagnostic. Ordering is total: error > warning > info.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    fn rank(self) -> u8 {
        match self {
            Severity::Error => 2,
            Severity::Warning => 1,
            Severity::Info => 0,
        }
    }
}

impl PartialOrd for Severity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Severity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        write!(f, "{s}")
    }
}

/// A byte-offset + line/col range within one source file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRange {
    pub file: String,
    pub start_offset: u32,
    pub end_offset: u32,
    pub start_line: u32,
    pub start_col: u32,
}

impl SourceRange {
    pub fn new(file: impl Into<String>, start_offset: u32, end_offset: u32, start_line: u32, start_col: u32) -> Self {
        Self {
            file: file.into(),
            start_offset,
            end_offset,
            start_line,
            start_col,
        }
    }
}

/// An optional code-action style suggestion attached to a diagnostic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixHint {
    pub description: String,
    pub replacement: String,
}

/// Stable diagnostic code. Ranges mirror `spec.md` §4: E01xx lex, E02xx
/// parse, E03xx semantic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Code {
    // Lex — E01xx
    E0101UnexpectedChar,
    E0102UnterminatedString,
    E0103InvalidNumber,
    E0104InvalidEscape,
    // Parse — E02xx
    E0201UnexpectedToken,
    E0207UnknownDeclaration,
    // Semantic — E03xx
    E0301UndefinedEntity,
    E0302UndefinedField,
    E0305UndefinedMessage,
    E0306UndefinedJob,
    E0308DuplicateName,
    E0310UndefinedFunction,
    E0312TypeMismatch,
    E0314CircularDependency,
}

impl Code {
    /// Stable textual code, e.g. `E0308`, for human-facing diagnostics.
    pub fn as_str(self) -> &'static str {
        match self {
            Code::E0101UnexpectedChar => "E0101",
            Code::E0102UnterminatedString => "E0102",
            Code::E0103InvalidNumber => "E0103",
            Code::E0104InvalidEscape => "E0104",
            Code::E0201UnexpectedToken => "E0201",
            Code::E0207UnknownDeclaration => "E0207",
            Code::E0301UndefinedEntity => "E0301",
            Code::E0302UndefinedField => "E0302",
            Code::E0305UndefinedMessage => "E0305",
            Code::E0306UndefinedJob => "E0306",
            Code::E0308DuplicateName => "E0308",
            Code::E0310UndefinedFunction => "E0310",
            Code::E0312TypeMismatch => "E0312",
            Code::E0314CircularDependency => "E0314",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single diagnostic: `{range, severity, code, message, fix}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: Code,
    pub message: String,
    pub range: Option<SourceRange>,
    pub fix: Option<FixHint>,
}

impl Diagnostic {
    pub fn error(code: Code, message: impl Into<String>) -> Self {
        Self { severity: Severity::Error, code, message: message.into(), range: None, fix: None }
    }

    pub fn warning(code: Code, message: impl Into<String>) -> Self {
        Self { severity: Severity::Warning, code, message: message.into(), range: None, fix: None }
    }

    pub fn info(code: Code, message: impl Into<String>) -> Self {
        Self { severity: Severity::Info, code, message: message.into(), range: None, fix: None }
    }

    pub fn with_range(mut self, range: SourceRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_fix(mut self, fix: FixHint) -> Self {
        self.fix = Some(fix);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Human-readable `<file>:<line>:<col>: <severity> <code>: <message>` per
    /// `spec.md` §6's CLI diagnostic format.
    pub fn format_human(&self) -> String {
        match &self.range {
            Some(r) => format!(
                "{}:{}:{}: {} {}: {}",
                r.file, r.start_line, r.start_col, self.severity, self.code, self.message
            ),
            None => format!("<unknown>: {} {}: {}", self.severity, self.code, self.message),
        }
    }
}

/// Append-only diagnostic sink for a single compile pass.
#[derive(Debug, Default)]
pub struct Collector {
    diagnostics: Vec<Diagnostic>,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }

    pub fn all(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn into_all(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    /// Merge another collector's diagnostics in, preserving append order.
    pub fn extend(&mut self, other: Collector) {
        self.diagnostics.extend(other.diagnostics);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering_is_total() {
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }

    #[test]
    fn collector_reports_errors() {
        let mut c = Collector::new();
        assert!(!c.has_errors());
        c.append(Diagnostic::warning(Code::E0314CircularDependency, "cycle hint"));
        assert!(!c.has_errors());
        c.append(Diagnostic::error(Code::E0308DuplicateName, "duplicate entity 'Ticket'"));
        assert!(c.has_errors());
        assert_eq!(c.errors().count(), 1);
        assert_eq!(c.all().len(), 2);
    }

    #[test]
    fn human_format_includes_code_and_location() {
        let range = SourceRange::new("ticket.forge", 10, 20, 3, 5);
        let diag = Diagnostic::error(Code::E0301UndefinedEntity, "undefined entity 'Tikcet'").with_range(range);
        let text = diag.format_human();
        assert_eq!(text, "ticket.forge:3:5: error E0301: undefined entity 'Tikcet'");
    }
}
