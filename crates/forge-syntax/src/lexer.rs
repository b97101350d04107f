//! Hand-rolled lexer (C2).
//!
//! Produces a restartable token stream with byte-offset + line/col position
//! info. Never halts: on an invalid character, unterminated string, invalid
//! number, or invalid escape it emits a diagnostic and resynchronizes to the
//! next whitespace-delimited boundary, matching `spec.md` §4.2.

use crate::token::{Keyword, Punct, Token, TokenKind};
use forge_diagnostics::{Code, Collector, Diagnostic, SourceRange};

pub struct Lexer<'a> {
    file: String,
    src: &'a [u8],
    pos: usize,
    line_starts: Vec<u32>,
}

impl<'a> Lexer<'a> {
    pub fn new(file: impl Into<String>, src: &'a str) -> Self {
        let mut line_starts = vec![0u32];
        for (i, b) in src.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push((i + 1) as u32);
            }
        }
        Self {
            file: file.into(),
            src: src.as_bytes(),
            pos: 0,
            line_starts,
        }
    }

    /// Tokenize the full source, collecting diagnostics for any lex errors.
    /// The returned stream is always terminated by an `Eof` token.
    pub fn tokenize(mut self, diags: &mut Collector) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia();
            if self.pos >= self.src.len() {
                let range = self.point_range(self.pos);
                tokens.push(Token { kind: TokenKind::Eof, lexeme: String::new(), range });
                break;
            }
            match self.next_token(diags) {
                Some(tok) => tokens.push(tok),
                None => continue, // error already recorded; resynchronized
            }
        }
        tokens
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(b) if b.is_ascii_whitespace() => {
                    self.pos += 1;
                }
                Some(b'#') => {
                    while let Some(b) = self.peek() {
                        if b == b'\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn line_col(&self, offset: usize) -> (u32, u32) {
        let offset = offset as u32;
        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let line_start = self.line_starts[line_idx];
        (line_idx as u32 + 1, offset - line_start + 1)
    }

    fn point_range(&self, offset: usize) -> SourceRange {
        let (line, col) = self.line_col(offset);
        SourceRange::new(&self.file, offset as u32, offset as u32, line, col)
    }

    fn range(&self, start: usize, end: usize) -> SourceRange {
        let (line, col) = self.line_col(start);
        SourceRange::new(&self.file, start as u32, end as u32, line, col)
    }

    /// Advance past the current malformed token to the next whitespace
    /// boundary so the lexer can keep making progress after an error.
    fn resync(&mut self) {
        while let Some(b) = self.peek() {
            if b.is_ascii_whitespace() {
                break;
            }
            self.pos += 1;
        }
    }

    fn next_token(&mut self, diags: &mut Collector) -> Option<Token> {
        let start = self.pos;
        let b = self.peek().unwrap();

        if b.is_ascii_alphabetic() || b == b'_' {
            return Some(self.lex_ident_or_keyword(start));
        }
        if b.is_ascii_digit() {
            return self.lex_number(diags, start);
        }
        if b == b'"' {
            return self.lex_string(diags, start);
        }
        if let Some(tok) = self.lex_punct(start) {
            return Some(tok);
        }

        let ch = self.src[self.pos..].iter().map(|&c| c as char).next().unwrap_or('?');
        diags.append(
            Diagnostic::error(Code::E0101UnexpectedChar, format!("unexpected character '{ch}'"))
                .with_range(self.point_range(start)),
        );
        self.pos += 1;
        self.resync();
        None
    }

    fn lex_ident_or_keyword(&mut self, start: usize) -> Token {
        while let Some(b) = self.peek() {
            if b.is_ascii_alphanumeric() || b == b'_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap().to_string();
        let range = self.range(start, self.pos);
        let kind = match text.as_str() {
            "true" => TokenKind::Bool(true),
            "false" => TokenKind::Bool(false),
            _ => match Keyword::lookup(&text) {
                Some(kw) => TokenKind::Keyword(kw),
                None => TokenKind::Ident(text.clone()),
            },
        };
        Token { kind, lexeme: text, range }
    }

    fn lex_number(&mut self, diags: &mut Collector, start: usize) -> Option<Token> {
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            self.pos += 1;
        }
        let mut is_float = false;
        if self.peek() == Some(b'.') && matches!(self.peek_at(1), Some(b) if b.is_ascii_digit()) {
            is_float = true;
            self.pos += 1;
            while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap().to_string();
        let range = self.range(start, self.pos);

        if is_float {
            match text.parse::<f64>() {
                Ok(v) => Some(Token { kind: TokenKind::Float(v), lexeme: text, range }),
                Err(_) => {
                    diags.append(
                        Diagnostic::error(Code::E0103InvalidNumber, format!("invalid number literal '{text}'"))
                            .with_range(range),
                    );
                    None
                }
            }
        } else {
            match text.parse::<i64>() {
                Ok(v) => Some(Token { kind: TokenKind::Int(v), lexeme: text, range }),
                Err(_) => {
                    diags.append(
                        Diagnostic::error(Code::E0103InvalidNumber, format!("invalid number literal '{text}'"))
                            .with_range(range),
                    );
                    None
                }
            }
        }
    }

    fn lex_string(&mut self, diags: &mut Collector, start: usize) -> Option<Token> {
        self.pos += 1; // opening quote
        let mut value = String::new();
        loop {
            match self.peek() {
                None => {
                    diags.append(
                        Diagnostic::error(Code::E0102UnterminatedString, "unterminated string literal")
                            .with_range(self.range(start, self.pos)),
                    );
                    return None;
                }
                Some(b'"') => {
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(b'n') => {
                            value.push('\n');
                            self.pos += 1;
                        }
                        Some(b't') => {
                            value.push('\t');
                            self.pos += 1;
                        }
                        Some(b'"') => {
                            value.push('"');
                            self.pos += 1;
                        }
                        Some(b'\\') => {
                            value.push('\\');
                            self.pos += 1;
                        }
                        _ => {
                            let esc_start = self.pos - 1;
                            diags.append(
                                Diagnostic::error(Code::E0104InvalidEscape, "invalid escape sequence")
                                    .with_range(self.range(esc_start, self.pos + 1)),
                            );
                            self.pos += 1;
                        }
                    }
                }
                Some(_) => {
                    let ch_start = self.pos;
                    // advance one UTF-8 scalar
                    let rest = std::str::from_utf8(&self.src[ch_start..]).unwrap_or("");
                    if let Some(c) = rest.chars().next() {
                        value.push(c);
                        self.pos += c.len_utf8();
                    } else {
                        self.pos += 1;
                    }
                }
            }
        }
        let range = self.range(start, self.pos);
        let lexeme = std::str::from_utf8(&self.src[start..self.pos]).unwrap().to_string();
        Some(Token { kind: TokenKind::Str(value), lexeme, range })
    }

    fn lex_punct(&mut self, start: usize) -> Option<Token> {
        let two = (self.peek()?, self.peek_at(1));
        let (len, punct) = match two {
            (b'-', Some(b'>')) => (2, Punct::Arrow),
            (b'=', Some(b'=')) => (2, Punct::EqEq),
            (b'!', Some(b'=')) => (2, Punct::NotEq),
            (b'<', Some(b'=')) => (2, Punct::LtEq),
            (b'>', Some(b'=')) => (2, Punct::GtEq),
            (b'{', _) => (1, Punct::LBrace),
            (b'}', _) => (1, Punct::RBrace),
            (b'(', _) => (1, Punct::LParen),
            (b')', _) => (1, Punct::RParen),
            (b'[', _) => (1, Punct::LBracket),
            (b']', _) => (1, Punct::RBracket),
            (b',', _) => (1, Punct::Comma),
            (b'.', _) => (1, Punct::Dot),
            (b':', _) => (1, Punct::Colon),
            (b'=', _) => (1, Punct::Eq),
            (b'<', _) => (1, Punct::Lt),
            (b'>', _) => (1, Punct::Gt),
            (b'+', _) => (1, Punct::Plus),
            (b'-', _) => (1, Punct::Minus),
            (b'*', _) => (1, Punct::Star),
            (b'/', _) => (1, Punct::Slash),
            (b'%', _) => (1, Punct::Percent),
            _ => return None,
        };
        self.pos += len;
        let lexeme = std::str::from_utf8(&self.src[start..self.pos]).unwrap().to_string();
        Some(Token { kind: TokenKind::Punct(punct), lexeme, range: self.range(start, self.pos) })
    }
}

/// Tokenize `src` (convenience wrapper used by the parser and tests).
pub fn lex(file: &str, src: &str, diags: &mut Collector) -> Vec<Token> {
    Lexer::new(file, src).tokenize(diags)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut diags = Collector::new();
        lex("t.forge", src, &mut diags).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_keywords_and_punct() {
        let ks = kinds("entity Ticket { status: enum(open,closed) = open }");
        assert_eq!(ks[0], TokenKind::Keyword(Keyword::Entity));
        assert_eq!(ks[1], TokenKind::Ident("Ticket".into()));
        assert_eq!(ks[2], TokenKind::Punct(Punct::LBrace));
    }

    #[test]
    fn lexes_comments_as_trivia() {
        let ks = kinds("# a comment\nentity X {}");
        assert_eq!(ks[0], TokenKind::Keyword(Keyword::Entity));
    }

    #[test]
    fn lexes_numbers() {
        let ks = kinds("1 2.5");
        assert_eq!(ks[0], TokenKind::Int(1));
        assert_eq!(ks[1], TokenKind::Float(2.5));
    }

    #[test]
    fn lexes_string_escapes() {
        let mut diags = Collector::new();
        let toks = lex("t.forge", r#""a\nb""#, &mut diags);
        assert_eq!(toks[0].kind, TokenKind::Str("a\nb".to_string()));
        assert!(!diags.has_errors());
    }

    #[test]
    fn unterminated_string_emits_e0102_and_resumes() {
        let mut diags = Collector::new();
        let toks = lex("t.forge", "\"unterminated\nentity X {}", &mut diags);
        assert!(diags.has_errors());
        assert_eq!(diags.errors().next().unwrap().code.as_str(), "E0102");
        // lexing continues past the bad string
        assert!(toks.iter().any(|t| t.kind == TokenKind::Keyword(Keyword::Entity)));
    }

    #[test]
    fn unexpected_character_resyncs() {
        let mut diags = Collector::new();
        let toks = lex("t.forge", "entity § Ticket {}", &mut diags);
        assert!(diags.has_errors());
        assert!(toks.iter().any(|t| t.kind == TokenKind::Ident("Ticket".into())));
    }
}
