//! Lexer, AST, and parser for the FORGE declaration language (C2, C3).
//!
//! [`parse`] is the single entry point the rest of the pipeline uses: it
//! always returns a [`ast::Program`] (possibly partial) alongside whatever
//! diagnostics lex/parse produced. Analysis (C4) decides whether the
//! diagnostics are bad enough to stop the pipeline.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod token;

pub use ast::*;
pub use token::{Keyword, Punct, Token, TokenKind};

use forge_diagnostics::Collector;

/// Lex and parse one FORGE source file.
pub fn parse(file: &str, src: &str) -> (Program, Collector) {
    let mut diags = Collector::new();
    let tokens = lexer::lex(file, src, &mut diags);
    let program = parser::parse_program(tokens, &mut diags);
    (program, diags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_small_multi_declaration_program() {
        let src = r#"
            app {
                auth_mode: password,
                database: "ticketing",
                version: "0.1.0"
            }

            entity Ticket {
                title: string
                status: enum(open, closed) = open
                author_id: uuid
            }

            relation Ticket.comments -> Comment { cardinality: many }

            access Ticket {
                read: true,
                write: author_id == user
            }

            rule Ticket.update {
                forbid if status == closed emit TICKET_CLOSED
            }

            message TICKET_CLOSED {
                level: error,
                default: "This ticket is already closed."
            }

            action create_ticket {
                input: Ticket,
                operation: create,
                auto_populate: [author_id]
            }

            hook Ticket.after_create { enqueue notify_author }

            job notify_author {
                input: Ticket,
                needs: author_id,
                effect: email.send
            }

            view TicketList {
                source: Ticket,
                fields: [title, status],
                params: [limit]
            }
        "#;
        let (program, diags) = parse("t.forge", src);
        assert!(!diags.has_errors(), "unexpected diagnostics: {:?}", diags.all());
        assert_eq!(program.declarations.len(), 9);
    }
}
