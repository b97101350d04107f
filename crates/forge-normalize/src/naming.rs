//! Entity/relation → SQL identifier naming conventions.
//!
//! Shared by the SQL predicate lowering in [`crate::sql`] and reused by the
//! planner (C6) so a rule's `sql_predicate` and the DDL the planner emits
//! agree on table and column names without re-deriving them twice.

/// `Ticket` -> `ticket`, `TicketComment` -> `ticket_comment`.
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_uppercase() {
            if i != 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Naive English pluralization, sufficient for entity-name-derived table
/// names: `ticket` -> `tickets`, `organization` -> `organizations`,
/// `category` -> `categories`.
pub fn pluralize(word: &str) -> String {
    if word.ends_with('s') {
        word.to_string()
    } else if word.ends_with('y') && !word.ends_with("ay") && !word.ends_with("ey") && !word.ends_with("oy") {
        format!("{}ies", &word[..word.len() - 1])
    } else {
        format!("{word}s")
    }
}

/// `Ticket` -> `tickets`.
pub fn table_name(entity_name: &str) -> String {
    pluralize(&snake_case(entity_name))
}

/// `PascalCase` or `mixedCase` relation name -> FK column name, e.g. the
/// relation `org` becomes `org_id`.
pub fn fk_column_for(relation_name: &str) -> String {
    format!("{}_id", snake_case(relation_name))
}

/// Enum field type name, e.g. `Ticket.status` -> `ticket_status`, used for
/// `CREATE TYPE ... AS ENUM`.
pub fn enum_type_name(entity_name: &str, field_name: &str) -> String {
    format!("{}_{}", snake_case(entity_name), snake_case(field_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snake_case_splits_pascal_case() {
        assert_eq!(snake_case("Ticket"), "ticket");
        assert_eq!(snake_case("TicketComment"), "ticket_comment");
        assert_eq!(snake_case("ID"), "i_d");
    }

    #[test]
    fn pluralize_handles_common_endings() {
        assert_eq!(pluralize("ticket"), "tickets");
        assert_eq!(pluralize("category"), "categories");
        assert_eq!(pluralize("status"), "statuss");
        assert_eq!(pluralize("day"), "days");
    }

    #[test]
    fn table_name_combines_snake_case_and_pluralize() {
        assert_eq!(table_name("Organization"), "organizations");
    }
}
