//! Two-pass semantic analyzer (C4): symbol collection, then name and type
//! resolution. Grounded on the diagnostics-accumulation style of
//! `dsl-core`'s validator — never stop at the first error, collect as much
//! as possible in one pass.

pub mod resolve;
pub mod symbols;

pub use symbols::{EntityInfo, SymbolTable};

use forge_diagnostics::Collector;
use forge_syntax::Program;

/// A fully analyzed program: the AST with every expression's [`forge_syntax::Ty`]
/// resolved in place, plus the symbol table built while collecting it.
pub struct Analyzed {
    pub program: Program,
    pub symbols: SymbolTable,
}

/// Run both analysis passes over a parsed program. Always returns an
/// [`Analyzed`] value — callers decide whether `diags.has_errors()` means
/// the result is usable for `forge build`.
pub fn analyze(mut program: Program, diags: &mut Collector) -> Analyzed {
    let symbols = symbols::collect(&program, diags);
    resolve::resolve(&mut program, &symbols, diags);
    Analyzed { program, symbols }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze_src(src: &str) -> (Analyzed, Collector) {
        let (program, mut diags) = forge_syntax::parse("t.forge", src);
        assert!(!diags.has_errors(), "parse errors: {:?}", diags.all());
        let analyzed = analyze(program, &mut diags);
        (analyzed, diags)
    }

    #[test]
    fn implicit_fields_are_added() {
        let (analyzed, diags) = analyze_src("entity Ticket { title: string }");
        assert!(!diags.has_errors());
        let ticket = &analyzed.symbols.entities["Ticket"];
        assert!(ticket.fields.contains_key("id"));
        assert!(ticket.fields.contains_key("created_at"));
        assert!(ticket.fields.contains_key("updated_at"));
        assert!(ticket.fields.contains_key("title"));
    }

    #[test]
    fn redeclaring_an_implicit_field_is_an_error() {
        let (_, diags) = analyze_src("entity Ticket { id: string }");
        assert!(diags.has_errors());
        assert_eq!(diags.errors().next().unwrap().code.as_str(), "E0308");
    }

    #[test]
    fn undefined_entity_in_access_is_reported() {
        let (_, diags) = analyze_src("access Ghost { read: true, write: true }");
        assert!(diags.has_errors());
        assert_eq!(diags.errors().next().unwrap().code.as_str(), "E0301");
    }

    #[test]
    fn access_expression_resolves_field_types() {
        let src = r#"
            entity Ticket { author_id: uuid }
            access Ticket { read: true, write: author_id == user }
        "#;
        let (_, diags) = analyze_src(src);
        assert!(!diags.has_errors(), "{:?}", diags.all());
    }

    #[test]
    fn type_mismatch_in_rule_condition_is_reported() {
        let src = r#"
            entity Ticket { title: string }
            message TICKET_BAD { level: error, default: "bad" }
            rule Ticket.update { forbid if title emit TICKET_BAD }
        "#;
        let (_, diags) = analyze_src(src);
        assert!(diags.has_errors());
        assert!(diags.errors().any(|d| d.code.as_str() == "E0312"));
    }

    #[test]
    fn undefined_message_in_rule_emit_is_reported() {
        let src = r#"
            entity Ticket { status: string }
            rule Ticket.update { forbid if status == status emit NOT_DECLARED }
        "#;
        let (_, diags) = analyze_src(src);
        assert!(diags.errors().any(|d| d.code.as_str() == "E0305"));
    }

    #[test]
    fn circular_relation_dependency_is_detected() {
        let src = r#"
            entity A {}
            entity B {}
            relation A.b -> B { cardinality: one }
            relation B.a -> A { cardinality: one }
        "#;
        let (_, diags) = analyze_src(src);
        assert!(diags.errors().any(|d| d.code.as_str() == "E0314"));
    }

    #[test]
    fn hook_enqueuing_undefined_job_is_reported() {
        let src = r#"
            entity Ticket {}
            hook Ticket.after_create { enqueue missing_job }
        "#;
        let (_, diags) = analyze_src(src);
        assert!(diags.errors().any(|d| d.code.as_str() == "E0306"));
    }

    #[test]
    fn job_needs_path_resolves_through_relation() {
        let src = r#"
            entity Ticket {}
            entity Org {}
            relation Ticket.org -> Org { cardinality: one }
            job notify { input: Ticket, needs: org, effect: email.send }
        "#;
        let (_, diags) = analyze_src(src);
        assert!(!diags.has_errors(), "{:?}", diags.all());
    }

    #[test]
    fn view_field_cannot_select_whole_relation() {
        let src = r#"
            entity Ticket {}
            entity Org {}
            relation Ticket.org -> Org { cardinality: one }
            view Bad { source: Ticket, fields: [org] }
        "#;
        let (_, diags) = analyze_src(src);
        assert!(diags.errors().any(|d| d.code.as_str() == "E0312"));
    }

    #[test]
    fn membership_test_against_enum_list_is_well_typed() {
        let src = r#"
            entity Ticket { status: enum(open, pending, closed) }
            access Ticket { read: status in [open, pending], write: true }
        "#;
        let (_, diags) = analyze_src(src);
        assert!(!diags.has_errors(), "{:?}", diags.all());
    }
}
