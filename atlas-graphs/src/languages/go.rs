use std::path::Path;

use tree_sitter::Node;

use crate::{EntityKind, ExtractedEntity};

use super::LanguageExtractor;
use super::helpers::{
    EntityDraft, SyntaxProfile, build_entity, child_by_field, dotted_name,
    first_descendant_of_kind, node_text,
};

#[derive(Debug)]
pub struct GoExtractor;

static PROFILE: SyntaxProfile = SyntaxProfile {
    call_kinds: &["call_expression"],
    callee_fields: &["function"],
    type_ref_kinds: &["type_identifier"],
    type_scope_kinds: &[],
    nested_kinds: &["function_declaration", "method_declaration", "type_declaration"],
    decision_kinds: &[
        "if_statement",
        "for_statement",
        "expression_case",
        "type_case",
        "communication_case",
    ],
    boolean_kinds: &["binary_expression"],
};

impl LanguageExtractor for GoExtractor {
    fn id(&self) -> &'static str {
        "go"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["go"]
    }

    fn tree_sitter_language(&self, _path: &Path) -> tree_sitter::Language {
        tree_sitter_go::LANGUAGE.into()
    }

    fn extract_entities(
        &self,
        tree: &tree_sitter::Tree,
        source: &str,
        _path: &Path,
    ) -> Vec<ExtractedEntity> {
        let mut out = Vec::new();
        let root = tree.root_node();
        let mut cursor = root.walk();
        for node in root.children(&mut cursor) {
            match node.kind() {
                "function_declaration" => push_function(node, source, None, &mut out),
                "method_declaration" => {
                    let receiver = child_by_field(node, "receiver")
                        .and_then(|r| first_descendant_of_kind(r, "type_identifier"))
                        .map(|t| node_text(t, source).to_string());
                    push_function(node, source, receiver, &mut out);
                }
                "type_declaration" => push_types(node, source, &mut out),
                _ => {}
            }
        }
        out
    }
}

/// Go exports identifiers that start with an upper-case letter.
fn is_exported(name: &str) -> bool {
    name.chars().next().is_some_and(char::is_uppercase)
}

fn push_function(
    node: Node<'_>,
    source: &str,
    receiver: Option<String>,
    out: &mut Vec<ExtractedEntity>,
) {
    let Some(name_node) = child_by_field(node, "name") else {
        return;
    };
    let name = node_text(name_node, source).to_string();
    let takes_testing = child_by_field(node, "parameters")
        .is_some_and(|p| node_text(p, source).contains("*testing."));
    let test_marker = takes_testing
        && ["Test", "Benchmark", "Fuzz"]
            .iter()
            .any(|prefix| name.starts_with(prefix));
    let context: Vec<String> = receiver.into_iter().collect();

    out.push(build_entity(
        EntityDraft {
            node,
            body: child_by_field(node, "body"),
            qualified_name: dotted_name(&context, &name),
            is_public: is_exported(&name),
            name,
            kind: EntityKind::Function,
            test_marker,
        },
        source,
        &PROFILE,
    ));
}

fn push_types(decl: Node<'_>, source: &str, out: &mut Vec<ExtractedEntity>) {
    let mut cursor = decl.walk();
    let specs: Vec<Node<'_>> = decl
        .children(&mut cursor)
        .filter(|c| matches!(c.kind(), "type_spec" | "type_alias"))
        .collect();
    let single = specs.len() == 1;

    for spec in specs {
        let Some(name_node) = child_by_field(spec, "name") else {
            continue;
        };
        let name = node_text(name_node, source).to_string();
        out.push(build_entity(
            EntityDraft {
                node: if single { decl } else { spec },
                body: None,
                qualified_name: name.clone(),
                is_public: is_exported(&name),
                name,
                kind: EntityKind::Type,
                test_marker: false,
            },
            source,
            &PROFILE,
        ));
    }
}
