//! Symbol table and the collection pass (C4, pass 1).
//!
//! Collection never resolves a name against another declaration — it only
//! registers what each declaration introduces and flags duplicates. Cross
//! references (does entity `Org` actually exist, does field `author_id`
//! actually exist on `Ticket`) are checked in the resolution pass
//! ([`crate::resolve`]) once every name is known.

use forge_diagnostics::{Code, Collector, Diagnostic};
use forge_syntax::*;
use std::collections::BTreeMap;

/// The three fields every entity carries whether or not the author wrote
/// them. Declaring a field with one of these names is a duplicate-name
/// error, not a redefinition.
pub const IMPLICIT_FIELDS: &[(&str, &str)] = &[("id", "uuid"), ("created_at", "time"), ("updated_at", "time")];

#[derive(Clone, Debug)]
pub struct EntityInfo {
    pub decl: EntityDecl,
    /// Declared fields plus the three implicit ones, keyed by name.
    pub fields: BTreeMap<String, FieldDecl>,
    pub relations: Vec<RelationDecl>,
}

impl EntityInfo {
    pub fn field_ty(&self, name: &str) -> Option<Ty> {
        self.fields.get(name).map(|f| field_ty(f))
    }
}

/// Map a [`FieldDecl`]'s declared type name to a resolved [`Ty`]. Entity and
/// enum types are resolved relative to nothing here — enums are always
/// local to the field that declares them, and relation/entity-typed fields
/// don't occur (relations are a separate declaration), so this never needs
/// the rest of the symbol table.
pub fn field_ty(field: &FieldDecl) -> Ty {
    if !field.enum_variants.is_empty() {
        return Ty::Enum(field.name.clone());
    }
    match field.ty_name.as_str() {
        "string" | "text" => Ty::String,
        "int" | "integer" => Ty::Int,
        "float" | "decimal" | "number" => Ty::Float,
        "bool" | "boolean" => Ty::Bool,
        "uuid" => Ty::Uuid,
        "time" | "timestamp" | "datetime" => Ty::Time,
        _ => Ty::Unknown,
    }
}

#[derive(Default)]
pub struct SymbolTable {
    pub app: Option<AppDecl>,
    pub entities: BTreeMap<String, EntityInfo>,
    /// Enum variant lists keyed by field name (`enum<E>` is local to the
    /// field that declares it, mirroring [`Ty::Enum`]'s own identity
    /// scheme), so a bare identifier in an expression can be recognized as
    /// a variant of the field it's compared against rather than mistaken
    /// for an undefined field reference (`spec.md` §3's `enum<E>` type).
    pub enums: BTreeMap<String, Vec<String>>,
    pub rules: BTreeMap<(String, Operation), Vec<RuleClause>>,
    pub access: BTreeMap<String, AccessDecl>,
    pub actions: BTreeMap<String, ActionDecl>,
    pub messages: BTreeMap<String, MessageDecl>,
    pub hooks: BTreeMap<(String, Operation), Vec<String>>,
    pub jobs: BTreeMap<String, JobDecl>,
    pub views: BTreeMap<String, ViewDecl>,
    pub webhooks: BTreeMap<String, WebhookDecl>,
    pub tests: Vec<String>,
    pub imperatives: Vec<String>,
}

/// Run the collection pass: register every declaration, flagging
/// duplicates, and attach the three implicit fields to every entity.
pub fn collect(program: &Program, diags: &mut Collector) -> SymbolTable {
    let mut table = SymbolTable::default();

    for decl in &program.declarations {
        match decl {
            Decl::App(app) => {
                if table.app.is_some() {
                    diags.append(
                        Diagnostic::error(Code::E0308DuplicateName, "an 'app' block is already declared")
                            .with_range(app.range.clone()),
                    );
                } else {
                    table.app = Some(app.clone());
                }
            }
            Decl::Entity(entity) => {
                let mut fields = BTreeMap::new();
                for (name, ty_name) in IMPLICIT_FIELDS {
                    fields.insert(
                        name.to_string(),
                        FieldDecl {
                            name: name.to_string(),
                            ty_name: ty_name.to_string(),
                            enum_variants: Vec::new(),
                            nullable: false,
                            unique: *name == "id",
                            default: None,
                            max_length: None,
                            range: entity.range.clone(),
                        },
                    );
                }
                for field in &entity.fields {
                    if IMPLICIT_FIELDS.iter().any(|(n, _)| *n == field.name) {
                        diags.append(
                            Diagnostic::error(
                                Code::E0308DuplicateName,
                                format!("'{}' is an implicit field and cannot be redeclared", field.name),
                            )
                            .with_range(field.range.clone()),
                        );
                        continue;
                    }
                    if !field.enum_variants.is_empty() {
                        table.enums.insert(field.name.clone(), field.enum_variants.clone());
                    }
                    if fields.insert(field.name.clone(), field.clone()).is_some() {
                        diags.append(
                            Diagnostic::error(Code::E0308DuplicateName, format!("duplicate field '{}'", field.name))
                                .with_range(field.range.clone()),
                        );
                    }
                }
                if table
                    .entities
                    .insert(entity.name.clone(), EntityInfo { decl: entity.clone(), fields, relations: Vec::new() })
                    .is_some()
                {
                    diags.append(
                        Diagnostic::error(Code::E0308DuplicateName, format!("duplicate entity '{}'", entity.name))
                            .with_range(entity.range.clone()),
                    );
                }
            }
            Decl::Relation(_) | Decl::Rule(_) | Decl::Hook(_) => {
                // Attached to their owning entity / merged in a second
                // lightweight sweep below, once every entity exists.
            }
            Decl::Access(access) => {
                if table.access.insert(access.entity.clone(), access.clone()).is_some() {
                    diags.append(
                        Diagnostic::error(
                            Code::E0308DuplicateName,
                            format!("access is already declared for '{}'", access.entity),
                        )
                        .with_range(access.range.clone()),
                    );
                }
            }
            Decl::Action(action) => {
                if table.actions.insert(action.name.clone(), action.clone()).is_some() {
                    diags.append(
                        Diagnostic::error(Code::E0308DuplicateName, format!("duplicate action '{}'", action.name))
                            .with_range(action.range.clone()),
                    );
                }
            }
            Decl::Message(message) => {
                if table.messages.insert(message.code.clone(), message.clone()).is_some() {
                    diags.append(
                        Diagnostic::error(Code::E0308DuplicateName, format!("duplicate message '{}'", message.code))
                            .with_range(message.range.clone()),
                    );
                }
            }
            Decl::Job(job) => {
                if table.jobs.insert(job.name.clone(), job.clone()).is_some() {
                    diags.append(
                        Diagnostic::error(Code::E0308DuplicateName, format!("duplicate job '{}'", job.name))
                            .with_range(job.range.clone()),
                    );
                }
            }
            Decl::View(view) => {
                if table.views.insert(view.name.clone(), view.clone()).is_some() {
                    diags.append(
                        Diagnostic::error(Code::E0308DuplicateName, format!("duplicate view '{}'", view.name))
                            .with_range(view.range.clone()),
                    );
                }
            }
            Decl::Webhook(webhook) => {
                if table.webhooks.insert(webhook.provider.clone(), webhook.clone()).is_some() {
                    diags.append(
                        Diagnostic::error(
                            Code::E0308DuplicateName,
                            format!("duplicate webhook provider '{}'", webhook.provider),
                        )
                        .with_range(webhook.range.clone()),
                    );
                }
            }
            Decl::Test(test) => {
                if table.tests.contains(&test.name) {
                    diags.append(
                        Diagnostic::error(Code::E0308DuplicateName, format!("duplicate test '{}'", test.name))
                            .with_range(test.range.clone()),
                    );
                } else {
                    table.tests.push(test.name.clone());
                }
            }
            Decl::Imperative(imp) => {
                if table.imperatives.contains(&imp.name) {
                    diags.append(
                        Diagnostic::error(Code::E0308DuplicateName, format!("duplicate imperative '{}'", imp.name))
                            .with_range(imp.range.clone()),
                    );
                } else {
                    table.imperatives.push(imp.name.clone());
                }
            }
        }
    }

    for decl in &program.declarations {
        match decl {
            Decl::Relation(relation) => {
                if let Some(entity) = table.entities.get_mut(&relation.owner_entity) {
                    entity.relations.push(relation.clone());
                }
            }
            Decl::Rule(rule) => {
                table.rules.entry((rule.entity.clone(), rule.operation)).or_default().extend(rule.clauses.clone());
            }
            Decl::Hook(hook) => {
                table
                    .hooks
                    .entry((hook.entity.clone(), hook.operation))
                    .or_default()
                    .extend(hook.job_names.clone());
            }
            _ => {}
        }
    }

    table
}
