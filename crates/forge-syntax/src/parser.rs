//! Recursive-descent declaration parser + Pratt/precedence-climbing
//! expression parser (C3).
//!
//! Declaration parsing is table-driven: the leading keyword selects a
//! dedicated sub-parser (`spec.md` §4.3). Unknown leading tokens emit
//! `E0207` and the parser resynchronizes to the next top-level keyword.
//! Every sub-parser always returns either a complete declaration or `None`;
//! on `None` the caller resynchronizes rather than propagating a partial
//! node forward.

use crate::ast::*;
use crate::token::{Keyword, Punct, Token, TokenKind};
use forge_diagnostics::{Code, Collector, Diagnostic, SourceRange};

const TOP_LEVEL_KEYWORDS: &[Keyword] = &[
    Keyword::App,
    Keyword::Entity,
    Keyword::Relation,
    Keyword::Rule,
    Keyword::Access,
    Keyword::Action,
    Keyword::Message,
    Keyword::Hook,
    Keyword::Job,
    Keyword::View,
    Keyword::Test,
    Keyword::Webhook,
    Keyword::Imperative,
];

pub struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    diags: &'a mut Collector,
}

/// Parse a full program from a token stream. Always returns a (possibly
/// partial) AST plus diagnostics in `diags`.
pub fn parse_program(tokens: Vec<Token>, diags: &mut Collector) -> Program {
    let mut parser = Parser { tokens, pos: 0, diags };
    let mut declarations = Vec::new();
    while !parser.at_eof() {
        match parser.parse_decl() {
            Some(decl) => declarations.push(decl),
            None => parser.resync_to_top_level(),
        }
    }
    Program { declarations }
}

impl<'a> Parser<'a> {
    fn at_eof(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_n(&self, n: usize) -> &Token {
        let idx = (self.pos + n).min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if !self.at_eof() {
            self.pos += 1;
        }
        tok
    }

    fn is_kw(&self, kw: Keyword) -> bool {
        matches!(&self.peek().kind, TokenKind::Keyword(k) if *k == kw)
    }

    fn is_punct(&self, p: Punct) -> bool {
        matches!(&self.peek().kind, TokenKind::Punct(pp) if *pp == p)
    }

    fn eat_punct(&mut self, p: Punct) -> bool {
        if self.is_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: Keyword) -> bool {
        if self.is_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: Punct, ctx: &str) -> Option<Token> {
        if self.is_punct(p) {
            Some(self.advance())
        } else {
            self.error_here(format!("expected '{p:?}' {ctx}, found {}", self.peek().kind));
            None
        }
    }

    fn expect_kw(&mut self, kw: Keyword, ctx: &str) -> Option<Token> {
        if self.is_kw(kw) {
            Some(self.advance())
        } else {
            self.error_here(format!("expected '{kw:?}' {ctx}, found {}", self.peek().kind));
            None
        }
    }

    fn expect_ident(&mut self, ctx: &str) -> Option<(String, SourceRange)> {
        match &self.peek().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                let tok = self.advance();
                Some((name, tok.range))
            }
            _ => {
                self.error_here(format!("expected identifier {ctx}, found {}", self.peek().kind));
                None
            }
        }
    }

    fn expect_string(&mut self, ctx: &str) -> Option<String> {
        match &self.peek().kind {
            TokenKind::Str(s) => {
                let s = s.clone();
                self.advance();
                Some(s)
            }
            _ => {
                self.error_here(format!("expected string literal {ctx}, found {}", self.peek().kind));
                None
            }
        }
    }

    fn error_here(&mut self, message: String) {
        let range = self.peek().range.clone();
        self.diags.append(Diagnostic::error(Code::E0201UnexpectedToken, message).with_range(range));
    }

    fn resync_to_top_level(&mut self) {
        loop {
            if self.at_eof() {
                return;
            }
            if let TokenKind::Keyword(k) = &self.peek().kind {
                if TOP_LEVEL_KEYWORDS.contains(k) {
                    return;
                }
            }
            self.advance();
        }
    }

    /// Skip a `{ ... }` body without interpreting it, used for declarations
    /// whose internals are out of the core engine's scope (`test`,
    /// `imperative`). Assumes the current token is `{`.
    fn skip_balanced_braces(&mut self) {
        if !self.eat_punct(Punct::LBrace) {
            return;
        }
        let mut depth = 1usize;
        while depth > 0 && !self.at_eof() {
            if self.is_punct(Punct::LBrace) {
                depth += 1;
            } else if self.is_punct(Punct::RBrace) {
                depth -= 1;
            }
            self.advance();
        }
    }

    fn parse_decl(&mut self) -> Option<Decl> {
        match &self.peek().kind {
            TokenKind::Keyword(Keyword::App) => self.parse_app().map(Decl::App),
            TokenKind::Keyword(Keyword::Entity) => self.parse_entity().map(Decl::Entity),
            TokenKind::Keyword(Keyword::Relation) => self.parse_relation().map(Decl::Relation),
            TokenKind::Keyword(Keyword::Rule) => self.parse_rule().map(Decl::Rule),
            TokenKind::Keyword(Keyword::Access) => self.parse_access().map(Decl::Access),
            TokenKind::Keyword(Keyword::Action) => self.parse_action().map(Decl::Action),
            TokenKind::Keyword(Keyword::Message) => self.parse_message().map(Decl::Message),
            TokenKind::Keyword(Keyword::Hook) => self.parse_hook().map(Decl::Hook),
            TokenKind::Keyword(Keyword::Job) => self.parse_job().map(Decl::Job),
            TokenKind::Keyword(Keyword::View) => self.parse_view().map(Decl::View),
            TokenKind::Keyword(Keyword::Webhook) => self.parse_webhook().map(Decl::Webhook),
            TokenKind::Keyword(Keyword::Test) => self.parse_test().map(Decl::Test),
            TokenKind::Keyword(Keyword::Imperative) => self.parse_imperative().map(Decl::Imperative),
            _ => {
                let tok = self.advance();
                self.diags.append(
                    Diagnostic::error(Code::E0207UnknownDeclaration, format!("expected a declaration, found {}", tok.kind))
                        .with_range(tok.range),
                );
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // app { auth_mode: password; database: "..."; version: "..." }
    // ------------------------------------------------------------------
    fn parse_app(&mut self) -> Option<AppDecl> {
        let start = self.advance().range; // `app`
        self.expect_punct(Punct::LBrace, "after 'app'")?;
        let mut auth_mode = AuthMode::None;
        let mut database = String::new();
        let mut version = String::new();
        while !self.is_punct(Punct::RBrace) && !self.at_eof() {
            let (key, _) = self.expect_ident("in app body")?;
            self.expect_punct(Punct::Colon, "after app field name")?;
            match key.as_str() {
                "auth_mode" => {
                    let (val, range) = self.expect_ident("as auth_mode value")?;
                    auth_mode = AuthMode::lookup(&val).unwrap_or_else(|| {
                        self.diags.append(
                            Diagnostic::error(Code::E0312TypeMismatch, format!("unknown auth_mode '{val}'"))
                                .with_range(range),
                        );
                        AuthMode::None
                    });
                }
                "database" => database = self.expect_string("for database")?,
                "version" => version = self.expect_string("for version")?,
                other => {
                    self.diags.append(Diagnostic::warning(
                        Code::E0201UnexpectedToken,
                        format!("unknown app field '{other}'"),
                    ));
                    self.skip_value();
                }
            }
            self.eat_punct(Punct::Comma);
        }
        self.expect_punct(Punct::RBrace, "to close 'app'")?;
        Some(AppDecl { auth_mode, database, version, range: start })
    }

    fn skip_value(&mut self) {
        // best-effort: consume until a comma or closing brace at this depth
        let mut depth = 0i32;
        loop {
            match &self.peek().kind {
                TokenKind::Eof => return,
                TokenKind::Punct(Punct::LBrace) | TokenKind::Punct(Punct::LBracket) => depth += 1,
                TokenKind::Punct(Punct::RBrace) | TokenKind::Punct(Punct::RBracket) if depth == 0 => return,
                TokenKind::Punct(Punct::RBrace) | TokenKind::Punct(Punct::RBracket) => depth -= 1,
                TokenKind::Punct(Punct::Comma) if depth == 0 => return,
                _ => {}
            }
            self.advance();
        }
    }

    // ------------------------------------------------------------------
    // entity Name { field: Type [= default] [unique], ... }
    // ------------------------------------------------------------------
    fn parse_entity(&mut self) -> Option<EntityDecl> {
        let start = self.advance().range; // `entity`
        let (name, _) = self.expect_ident("after 'entity'")?;
        self.expect_punct(Punct::LBrace, "after entity name")?;
        let mut fields = Vec::new();
        while !self.is_punct(Punct::RBrace) && !self.at_eof() {
            if let Some(field) = self.parse_field() {
                fields.push(field);
            } else {
                self.skip_value();
            }
            self.eat_punct(Punct::Comma);
        }
        self.expect_punct(Punct::RBrace, "to close entity body")?;
        Some(EntityDecl { name, fields, range: start })
    }

    fn parse_field(&mut self) -> Option<FieldDecl> {
        let (name, range) = self.expect_ident("for field name")?;
        self.expect_punct(Punct::Colon, "after field name")?;

        let mut ty_name = String::new();
        let mut enum_variants = Vec::new();
        let mut max_length = None;

        if self.eat_kw(Keyword::Enum) {
            self.expect_punct(Punct::LParen, "after 'enum'")?;
            loop {
                let (variant, _) = self.expect_ident("as enum variant")?;
                enum_variants.push(variant);
                if !self.eat_punct(Punct::Comma) {
                    break;
                }
            }
            self.expect_punct(Punct::RParen, "to close enum variant list")?;
            ty_name = "enum".to_string();
        } else {
            let (base, _) = self.expect_ident("for field type")?;
            ty_name = base;
            if self.eat_kw(Keyword::Length) {
                self.expect_punct(Punct::LParen, "after 'length'")?;
                if let TokenKind::Int(n) = self.peek().kind {
                    max_length = Some(n as u32);
                    self.advance();
                }
                self.expect_punct(Punct::RParen, "to close length(...)")?;
            }
        }

        let mut nullable = false;
        let mut unique = false;
        let mut default = None;
        if self.eat_punct(Punct::Eq) {
            default = self.parse_expr();
        }
        loop {
            if self.eat_kw(Keyword::Unique) {
                unique = true;
            } else if self.peek().lexeme == "nullable" {
                self.advance();
                nullable = true;
            } else {
                break;
            }
        }

        Some(FieldDecl { name, ty_name, enum_variants, nullable, unique, default, max_length, range })
    }

    // ------------------------------------------------------------------
    // relation Owner.name -> Target { cardinality: one|many }
    // ------------------------------------------------------------------
    fn parse_relation(&mut self) -> Option<RelationDecl> {
        let start = self.advance().range; // `relation`
        let (owner_entity, _) = self.expect_ident("for relation owner entity")?;
        self.expect_punct(Punct::Dot, "after relation owner entity")?;
        let (name, _) = self.expect_ident("for relation name")?;
        self.expect_punct(Punct::Arrow, "before relation target")?;
        let (target_entity, _) = self.expect_ident("for relation target entity")?;

        let mut cardinality = Cardinality::One;
        if self.eat_punct(Punct::LBrace) {
            while !self.is_punct(Punct::RBrace) && !self.at_eof() {
                let (key, _) = self.expect_ident("in relation body")?;
                self.expect_punct(Punct::Colon, "after relation field name")?;
                if key == "cardinality" {
                    let (val, range) = self.expect_ident("as cardinality value")?;
                    cardinality = match val.as_str() {
                        "one" => Cardinality::One,
                        "many" => Cardinality::Many,
                        _ => {
                            self.diags.append(
                                Diagnostic::error(Code::E0312TypeMismatch, format!("unknown cardinality '{val}'"))
                                    .with_range(range),
                            );
                            Cardinality::One
                        }
                    };
                } else {
                    self.skip_value();
                }
                self.eat_punct(Punct::Comma);
            }
            self.expect_punct(Punct::RBrace, "to close relation body")?;
        }
        Some(RelationDecl { owner_entity, name, target_entity, cardinality, range: start })
    }

    // ------------------------------------------------------------------
    // rule Entity.operation { forbid if <expr> emit CODE  require if ... }
    // ------------------------------------------------------------------
    fn parse_rule(&mut self) -> Option<RuleDecl> {
        let start = self.advance().range; // `rule`
        let (entity, _) = self.expect_ident("for rule entity")?;
        self.expect_punct(Punct::Dot, "after rule entity")?;
        let (op_name, op_range) = self.expect_ident("for rule operation")?;
        let operation = Operation::lookup(&op_name).unwrap_or_else(|| {
            self.diags.append(
                Diagnostic::error(Code::E0312TypeMismatch, format!("unknown operation '{op_name}'")).with_range(op_range),
            );
            Operation::Update
        });
        self.expect_punct(Punct::LBrace, "after rule operation")?;
        let mut clauses = Vec::new();
        while !self.is_punct(Punct::RBrace) && !self.at_eof() {
            let clause_start = self.peek().range.clone();
            let kind = if self.eat_kw(Keyword::Forbid) {
                RuleKind::Forbid
            } else if self.eat_kw(Keyword::Require) {
                RuleKind::Require
            } else {
                self.error_here("expected 'forbid' or 'require'".to_string());
                return None;
            };
            self.expect_kw(Keyword::If, "after forbid/require")?;
            let condition = self.parse_expr()?;
            self.expect_kw(Keyword::Emit, "after rule condition")?;
            let (emit_code, _) = self.expect_ident("for emit code")?;
            clauses.push(RuleClause { kind, condition, emit_code, range: clause_start });
        }
        self.expect_punct(Punct::RBrace, "to close rule body")?;
        Some(RuleDecl { entity, operation, clauses, range: start })
    }

    // ------------------------------------------------------------------
    // access Entity { read: <expr>; write: <expr>; }
    // ------------------------------------------------------------------
    fn parse_access(&mut self) -> Option<AccessDecl> {
        let start = self.advance().range; // `access`
        let (entity, _) = self.expect_ident("for access entity")?;
        self.expect_punct(Punct::LBrace, "after access entity")?;
        let mut read = None;
        let mut write = None;
        while !self.is_punct(Punct::RBrace) && !self.at_eof() {
            let (key, key_range) = self.expect_ident("in access body")?;
            self.expect_punct(Punct::Colon, "after access field name")?;
            match key.as_str() {
                "read" => read = self.parse_expr(),
                "write" => write = self.parse_expr(),
                other => {
                    self.diags.append(
                        Diagnostic::error(Code::E0201UnexpectedToken, format!("expected 'read' or 'write', found '{other}'"))
                            .with_range(key_range),
                    );
                    return None;
                }
            }
            self.eat_punct(Punct::Comma);
        }
        self.expect_punct(Punct::RBrace, "to close access body")?;
        let range = start;
        Some(AccessDecl {
            entity,
            read: read.unwrap_or_else(|| literal_true(range.clone())),
            write: write.unwrap_or_else(|| literal_true(range.clone())),
            range,
        })
    }

    // ------------------------------------------------------------------
    // action name { input: Entity; operation: create|update|delete;
    //               target: Entity; auto_populate: [field, ...] }
    // ------------------------------------------------------------------
    fn parse_action(&mut self) -> Option<ActionDecl> {
        let start = self.advance().range; // `action`
        let (name, _) = self.expect_ident("after 'action'")?;
        self.expect_punct(Punct::LBrace, "after action name")?;
        let mut input_entity = String::new();
        let mut operation = Operation::Create;
        let mut target_entity = None;
        let mut auto_populate = Vec::new();
        while !self.is_punct(Punct::RBrace) && !self.at_eof() {
            let (key, _) = self.expect_ident("in action body")?;
            self.expect_punct(Punct::Colon, "after action field name")?;
            match key.as_str() {
                "input" => input_entity = self.expect_ident("for action input entity")?.0,
                "operation" => {
                    let (val, range) = self.expect_ident("for action operation")?;
                    operation = Operation::lookup(&val).unwrap_or_else(|| {
                        self.diags.append(
                            Diagnostic::error(Code::E0312TypeMismatch, format!("unknown operation '{val}'"))
                                .with_range(range),
                        );
                        Operation::Create
                    });
                }
                "target" => target_entity = Some(self.expect_ident("for action target entity")?.0),
                "auto_populate" => auto_populate = self.parse_ident_list()?,
                other => {
                    self.diags.append(Diagnostic::warning(
                        Code::E0201UnexpectedToken,
                        format!("unknown action field '{other}'"),
                    ));
                    self.skip_value();
                }
            }
            self.eat_punct(Punct::Comma);
        }
        self.expect_punct(Punct::RBrace, "to close action body")?;
        Some(ActionDecl { name, input_entity, operation, target_entity, auto_populate, range: start })
    }

    fn parse_ident_list(&mut self) -> Option<Vec<String>> {
        self.expect_punct(Punct::LBracket, "to start list")?;
        let mut items = Vec::new();
        while !self.is_punct(Punct::RBracket) && !self.at_eof() {
            let (name, _) = self.expect_ident("in list")?;
            items.push(name);
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        self.expect_punct(Punct::RBracket, "to close list")?;
        Some(items)
    }

    // ------------------------------------------------------------------
    // message CODE { level: error; default: "text"; }
    // ------------------------------------------------------------------
    fn parse_message(&mut self) -> Option<MessageDecl> {
        let start = self.advance().range; // `message`
        let (code, _) = self.expect_ident("after 'message'")?;
        self.expect_punct(Punct::LBrace, "after message code")?;
        let mut level = "error".to_string();
        let mut default_text = String::new();
        while !self.is_punct(Punct::RBrace) && !self.at_eof() {
            let (key, _) = self.expect_ident("in message body")?;
            self.expect_punct(Punct::Colon, "after message field name")?;
            match key.as_str() {
                "level" => level = self.expect_ident("for message level")?.0,
                "default" => default_text = self.expect_string("for default text")?,
                other => {
                    self.diags.append(Diagnostic::warning(
                        Code::E0201UnexpectedToken,
                        format!("unknown message field '{other}'"),
                    ));
                    self.skip_value();
                }
            }
            self.eat_punct(Punct::Comma);
        }
        self.expect_punct(Punct::RBrace, "to close message body")?;
        Some(MessageDecl { code, level, default_text, range: start })
    }

    // ------------------------------------------------------------------
    // hook Entity.after_operation { enqueue job1; enqueue job2; }
    // ------------------------------------------------------------------
    fn parse_hook(&mut self) -> Option<HookDecl> {
        let start = self.advance().range; // `hook`
        let (entity, _) = self.expect_ident("for hook entity")?;
        self.expect_punct(Punct::Dot, "after hook entity")?;
        let (trigger, trigger_range) = self.expect_ident("for hook trigger")?;
        let operation = trigger
            .strip_prefix("after_")
            .and_then(Operation::lookup)
            .unwrap_or_else(|| {
                self.diags.append(
                    Diagnostic::error(
                        Code::E0201UnexpectedToken,
                        format!("expected 'after_create', 'after_update', or 'after_delete', found '{trigger}'"),
                    )
                    .with_range(trigger_range),
                );
                Operation::Create
            });
        self.expect_punct(Punct::LBrace, "after hook trigger")?;
        let mut job_names = Vec::new();
        while !self.is_punct(Punct::RBrace) && !self.at_eof() {
            self.expect_kw(Keyword::Enqueue, "in hook body")?;
            let (job, _) = self.expect_ident("for enqueued job name")?;
            job_names.push(job);
            self.eat_punct(Punct::Comma);
        }
        self.expect_punct(Punct::RBrace, "to close hook body")?;
        Some(HookDecl { entity, operation, job_names, range: start })
    }

    // ------------------------------------------------------------------
    // job name { input: Entity; needs: path; filter: <expr>; effect: cap; }
    // ------------------------------------------------------------------
    fn parse_job(&mut self) -> Option<JobDecl> {
        let start = self.advance().range; // `job`
        let (name, _) = self.expect_ident("after 'job'")?;
        self.expect_punct(Punct::LBrace, "after job name")?;
        let mut input_entity = String::new();
        let mut needs_path = None;
        let mut needs_filter = None;
        let mut capabilities = Vec::new();
        while !self.is_punct(Punct::RBrace) && !self.at_eof() {
            let (key, _) = self.expect_ident("in job body")?;
            self.expect_punct(Punct::Colon, "after job field name")?;
            match key.as_str() {
                "input" => input_entity = self.expect_ident("for job input entity")?.0,
                "needs" => needs_path = self.parse_path_expr(),
                "filter" => needs_filter = self.parse_expr(),
                "effect" => {
                    let (cap, _) = self.parse_capability_name()?;
                    capabilities.push(cap);
                }
                other => {
                    self.diags.append(Diagnostic::warning(
                        Code::E0201UnexpectedToken,
                        format!("unknown job field '{other}'"),
                    ));
                    self.skip_value();
                }
            }
            self.eat_punct(Punct::Comma);
        }
        self.expect_punct(Punct::RBrace, "to close job body")?;
        Some(JobDecl { name, input_entity, needs_path, needs_filter, capabilities, range: start })
    }

    /// `email.send` style capability name: dotted identifier pair.
    fn parse_capability_name(&mut self) -> Option<(String, SourceRange)> {
        let (first, range) = self.expect_ident("for capability name")?;
        let mut full = first;
        let mut end_range = range.clone();
        while self.eat_punct(Punct::Dot) {
            let (seg, r) = self.expect_ident("in capability name")?;
            full.push('.');
            full.push_str(&seg);
            end_range = r;
        }
        Some((full, end_range))
    }

    /// A dotted relation path, e.g. `org.members`.
    fn parse_path_expr(&mut self) -> Option<Expr> {
        let (first, range) = self.expect_ident("in path")?;
        let mut segments = vec![first];
        let mut end = range.clone();
        while self.eat_punct(Punct::Dot) {
            let (seg, r) = self.expect_ident("in path")?;
            segments.push(seg);
            end = r;
        }
        Some(Expr::new(ExprKind::PathTraverse { segments }, span_join(&range, &end)))
    }

    // ------------------------------------------------------------------
    // view Name { source: Entity; fields: [p as a, ...]; filter: <expr>; params: [..] }
    // ------------------------------------------------------------------
    fn parse_view(&mut self) -> Option<ViewDecl> {
        let start = self.advance().range; // `view`
        let (name, _) = self.expect_ident("after 'view'")?;
        self.expect_punct(Punct::LBrace, "after view name")?;
        let mut source_entity = String::new();
        let mut fields = Vec::new();
        let mut filter = None;
        let mut parameters = Vec::new();
        while !self.is_punct(Punct::RBrace) && !self.at_eof() {
            let (key, _) = self.expect_ident("in view body")?;
            self.expect_punct(Punct::Colon, "after view field name")?;
            match key.as_str() {
                "source" => source_entity = self.expect_ident("for view source entity")?.0,
                "filter" => filter = self.parse_expr(),
                "params" => parameters = self.parse_ident_list()?,
                "fields" => {
                    self.expect_punct(Punct::LBracket, "to start view fields")?;
                    while !self.is_punct(Punct::RBracket) && !self.at_eof() {
                        let (path, _) = self.expect_ident("for view field path")?;
                        let mut full_path = path.clone();
                        while self.eat_punct(Punct::Dot) {
                            let (seg, _) = self.expect_ident("in view field path")?;
                            full_path.push('.');
                            full_path.push_str(&seg);
                        }
                        let alias = if self.peek().lexeme == "as" {
                            self.advance();
                            self.expect_ident("for view field alias")?.0
                        } else {
                            full_path.clone()
                        };
                        fields.push(ViewField { path: full_path, alias });
                        if !self.eat_punct(Punct::Comma) {
                            break;
                        }
                    }
                    self.expect_punct(Punct::RBracket, "to close view fields")?;
                }
                other => {
                    self.diags.append(Diagnostic::warning(
                        Code::E0201UnexpectedToken,
                        format!("unknown view field '{other}'"),
                    ));
                    self.skip_value();
                }
            }
            self.eat_punct(Punct::Comma);
        }
        self.expect_punct(Punct::RBrace, "to close view body")?;
        Some(ViewDecl { name, source_entity, fields, filter, parameters, range: start })
    }

    // ------------------------------------------------------------------
    // webhook provider { triggers: [EventA, EventB] }
    // ------------------------------------------------------------------
    fn parse_webhook(&mut self) -> Option<WebhookDecl> {
        let start = self.advance().range; // `webhook`
        let (provider, _) = self.expect_ident("after 'webhook'")?;
        self.expect_punct(Punct::LBrace, "after webhook provider")?;
        let mut triggers = Vec::new();
        while !self.is_punct(Punct::RBrace) && !self.at_eof() {
            let (key, _) = self.expect_ident("in webhook body")?;
            self.expect_punct(Punct::Colon, "after webhook field name")?;
            if key == "triggers" {
                triggers = self.parse_ident_list()?;
            } else {
                self.skip_value();
            }
            self.eat_punct(Punct::Comma);
        }
        self.expect_punct(Punct::RBrace, "to close webhook body")?;
        Some(WebhookDecl { provider, triggers, range: start })
    }

    fn parse_test(&mut self) -> Option<TestDecl> {
        let start = self.advance().range; // `test`
        let (name, _) = self.expect_ident("after 'test'")?;
        self.skip_balanced_braces();
        Some(TestDecl { name, range: start })
    }

    fn parse_imperative(&mut self) -> Option<ImperativeDecl> {
        let start = self.advance().range; // `imperative`
        let (name, _) = self.expect_ident("after 'imperative'")?;
        self.skip_balanced_braces();
        Some(ImperativeDecl { name, range: start })
    }

    // ------------------------------------------------------------------
    // Expressions: or < and < equality < comparison < in < additive
    //            < multiplicative < unary < call < member access
    // ------------------------------------------------------------------
    fn parse_expr(&mut self) -> Option<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Option<Expr> {
        let mut lhs = self.parse_and()?;
        while self.eat_kw(Keyword::Or) {
            let rhs = self.parse_and()?;
            let range = span_join(&lhs.range, &rhs.range);
            lhs = Expr::new(ExprKind::Binary { op: BinOp::Or, lhs: Box::new(lhs), rhs: Box::new(rhs) }, range);
        }
        Some(lhs)
    }

    fn parse_and(&mut self) -> Option<Expr> {
        let mut lhs = self.parse_equality()?;
        while self.eat_kw(Keyword::And) {
            let rhs = self.parse_equality()?;
            let range = span_join(&lhs.range, &rhs.range);
            lhs = Expr::new(ExprKind::Binary { op: BinOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs) }, range);
        }
        Some(lhs)
    }

    fn parse_equality(&mut self) -> Option<Expr> {
        let mut lhs = self.parse_comparison()?;
        loop {
            let op = if self.eat_punct(Punct::EqEq) {
                BinOp::Eq
            } else if self.eat_punct(Punct::NotEq) {
                BinOp::NotEq
            } else {
                break;
            };
            let rhs = self.parse_comparison()?;
            let range = span_join(&lhs.range, &rhs.range);
            lhs = Expr::new(ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, range);
        }
        Some(lhs)
    }

    fn parse_comparison(&mut self) -> Option<Expr> {
        let mut lhs = self.parse_in()?;
        loop {
            let op = if self.eat_punct(Punct::Lt) {
                BinOp::Lt
            } else if self.eat_punct(Punct::LtEq) {
                BinOp::LtEq
            } else if self.eat_punct(Punct::Gt) {
                BinOp::Gt
            } else if self.eat_punct(Punct::GtEq) {
                BinOp::GtEq
            } else {
                break;
            };
            let rhs = self.parse_in()?;
            let range = span_join(&lhs.range, &rhs.range);
            lhs = Expr::new(ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, range);
        }
        Some(lhs)
    }

    fn parse_in(&mut self) -> Option<Expr> {
        let lhs = self.parse_additive()?;
        if self.eat_kw(Keyword::In) {
            let rhs = self.parse_additive()?;
            let range = span_join(&lhs.range, &rhs.range);
            return Some(Expr::new(ExprKind::InTest { lhs: Box::new(lhs), rhs: Box::new(rhs) }, range));
        }
        Some(lhs)
    }

    fn parse_additive(&mut self) -> Option<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = if self.eat_punct(Punct::Plus) {
                BinOp::Add
            } else if self.eat_punct(Punct::Minus) {
                BinOp::Sub
            } else {
                break;
            };
            let rhs = self.parse_multiplicative()?;
            let range = span_join(&lhs.range, &rhs.range);
            lhs = Expr::new(ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, range);
        }
        Some(lhs)
    }

    fn parse_multiplicative(&mut self) -> Option<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = if self.eat_punct(Punct::Star) {
                BinOp::Mul
            } else if self.eat_punct(Punct::Slash) {
                BinOp::Div
            } else if self.eat_punct(Punct::Percent) {
                BinOp::Mod
            } else {
                break;
            };
            let rhs = self.parse_unary()?;
            let range = span_join(&lhs.range, &rhs.range);
            lhs = Expr::new(ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, range);
        }
        Some(lhs)
    }

    fn parse_unary(&mut self) -> Option<Expr> {
        if self.is_punct(Punct::Minus) {
            let start = self.advance().range;
            let expr = self.parse_unary()?;
            let range = span_join(&start, &expr.range);
            return Some(Expr::new(ExprKind::Unary { op: UnOp::Neg, expr: Box::new(expr) }, range));
        }
        if self.is_kw(Keyword::Not) {
            let start = self.advance().range;
            let expr = self.parse_unary()?;
            let range = span_join(&start, &expr.range);
            return Some(Expr::new(ExprKind::Unary { op: UnOp::Not, expr: Box::new(expr) }, range));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Option<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat_punct(Punct::Dot) {
                let (member, range) = self.expect_ident("after '.'")?;
                let joined = span_join(&expr.range, &range);
                expr = Expr::new(ExprKind::Member { base: Box::new(expr), member }, joined);
            } else {
                break;
            }
        }
        Some(expr)
    }

    fn parse_primary(&mut self) -> Option<Expr> {
        let tok = self.peek().clone();
        match &tok.kind {
            TokenKind::Int(n) => {
                self.advance();
                Some(Expr::new(ExprKind::Literal(Literal::Int(*n)), tok.range))
            }
            TokenKind::Float(n) => {
                self.advance();
                Some(Expr::new(ExprKind::Literal(Literal::Float(*n)), tok.range))
            }
            TokenKind::Str(s) => {
                self.advance();
                Some(Expr::new(ExprKind::Literal(Literal::String(s.clone())), tok.range))
            }
            TokenKind::Bool(b) => {
                self.advance();
                Some(Expr::new(ExprKind::Literal(Literal::Bool(*b)), tok.range))
            }
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                if self.is_punct(Punct::LParen) {
                    self.advance();
                    let mut args = Vec::new();
                    while !self.is_punct(Punct::RParen) && !self.at_eof() {
                        args.push(self.parse_expr()?);
                        if !self.eat_punct(Punct::Comma) {
                            break;
                        }
                    }
                    let end = self.expect_punct(Punct::RParen, "to close call arguments")?;
                    let range = span_join(&tok.range, &end.range);
                    Some(Expr::new(ExprKind::Call { callee: name, args }, range))
                } else {
                    Some(Expr::new(ExprKind::Identifier(name), tok.range))
                }
            }
            TokenKind::Punct(Punct::LParen) => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect_punct(Punct::RParen, "to close parenthesized expression")?;
                Some(inner)
            }
            TokenKind::Punct(Punct::LBracket) => {
                self.advance();
                let mut items = Vec::new();
                while !self.is_punct(Punct::RBracket) && !self.at_eof() {
                    items.push(self.parse_expr()?);
                    if !self.eat_punct(Punct::Comma) {
                        break;
                    }
                }
                let end = self.expect_punct(Punct::RBracket, "to close list literal")?;
                let range = span_join(&tok.range, &end.range);
                Some(Expr::new(ExprKind::ListLiteral(items), range))
            }
            _ => {
                self.error_here(format!("expected an expression, found {}", tok.kind));
                None
            }
        }
    }
}

fn span_join(a: &SourceRange, b: &SourceRange) -> SourceRange {
    SourceRange::new(a.file.clone(), a.start_offset, b.end_offset, a.start_line, a.start_col)
}

fn literal_true(range: SourceRange) -> Expr {
    Expr::new(ExprKind::Literal(Literal::Bool(true)), range)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;

    fn parse(src: &str) -> (Program, Collector) {
        let mut diags = Collector::new();
        let tokens = lex("t.forge", src, &mut diags);
        let program = parse_program(tokens, &mut diags);
        (program, diags)
    }

    #[test]
    fn parses_entity_with_enum_and_default() {
        let (prog, diags) = parse("entity Ticket { status: enum(open, closed) = open }");
        assert!(!diags.has_errors());
        assert_eq!(prog.declarations.len(), 1);
        match &prog.declarations[0] {
            Decl::Entity(e) => {
                assert_eq!(e.name, "Ticket");
                assert_eq!(e.fields[0].enum_variants, vec!["open", "closed"]);
                assert!(e.fields[0].default.is_some());
            }
            _ => panic!("expected entity"),
        }
    }

    #[test]
    fn parses_rule_with_forbid_clause() {
        let (prog, diags) = parse(
            "rule Ticket.update { forbid if status == closed emit TICKET_CLOSED }",
        );
        assert!(!diags.has_errors());
        match &prog.declarations[0] {
            Decl::Rule(r) => {
                assert_eq!(r.entity, "Ticket");
                assert_eq!(r.operation, Operation::Update);
                assert_eq!(r.clauses.len(), 1);
                assert_eq!(r.clauses[0].kind, RuleKind::Forbid);
                assert_eq!(r.clauses[0].emit_code, "TICKET_CLOSED");
            }
            _ => panic!("expected rule"),
        }
    }

    #[test]
    fn parses_access_with_member_expr() {
        let (prog, diags) = parse("access Ticket { read: user == author_id, write: user == author_id }");
        assert!(!diags.has_errors());
        match &prog.declarations[0] {
            Decl::Access(a) => {
                assert_eq!(a.entity, "Ticket");
                matches!(a.read.kind, ExprKind::Binary { op: BinOp::Eq, .. });
            }
            _ => panic!("expected access"),
        }
    }

    #[test]
    fn parses_hook_and_job() {
        let (prog, diags) = parse(
            r#"
            hook Ticket.after_create { enqueue notify_author }
            job notify_author { input: Ticket, effect: email.send }
            "#,
        );
        assert!(!diags.has_errors());
        assert_eq!(prog.declarations.len(), 2);
    }

    #[test]
    fn unknown_top_level_token_resyncs() {
        let (prog, diags) = parse("bogus stuff here\nentity Y {}");
        assert!(diags.has_errors());
        assert_eq!(prog.declarations.len(), 1);
        assert!(matches!(prog.declarations[0], Decl::Entity(_)));
    }

    #[test]
    fn parses_membership_test_against_list_literal() {
        let (prog, diags) = parse("access T { read: status in [open, pending], write: true }");
        assert!(!diags.has_errors());
        if let Decl::Access(a) = &prog.declarations[0] {
            match &a.read.kind {
                ExprKind::InTest { rhs, .. } => {
                    assert!(matches!(rhs.kind, ExprKind::ListLiteral(_)));
                }
                _ => panic!("expected an 'in' test"),
            }
        }
    }

    #[test]
    fn precedence_climbs_correctly() {
        let (prog, diags) = parse("access T { read: 1 + 2 * 3 == 7 and not false, write: true }");
        assert!(!diags.has_errors());
        if let Decl::Access(a) = &prog.declarations[0] {
            if let ExprKind::Binary { op: BinOp::And, .. } = &a.read.kind {
                // top-level operator is `and`, confirming `or`/`and` bind loosest
            } else {
                panic!("expected top-level 'and'");
            }
        }
    }
}
