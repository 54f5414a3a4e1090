use std::path::Path;

use tree_sitter::Node;

use crate::{EntityKind, ExtractedEntity};

use super::LanguageExtractor;
use super::helpers::{
    EntityDraft, SyntaxProfile, build_entity, child_by_field, dotted_name, find_child_by_kind,
    node_text,
};

#[derive(Debug)]
pub struct JavaExtractor;

static PROFILE: SyntaxProfile = SyntaxProfile {
    call_kinds: &["method_invocation", "object_creation_expression"],
    callee_fields: &["name", "type"],
    type_ref_kinds: &["type_identifier"],
    type_scope_kinds: &[],
    nested_kinds: &[
        "class_declaration",
        "interface_declaration",
        "enum_declaration",
        "record_declaration",
        "annotation_type_declaration",
        "method_declaration",
        "constructor_declaration",
    ],
    decision_kinds: &[
        "if_statement",
        "for_statement",
        "enhanced_for_statement",
        "while_statement",
        "do_statement",
        "catch_clause",
        "ternary_expression",
        "switch_label",
    ],
    boolean_kinds: &["binary_expression"],
};

impl LanguageExtractor for JavaExtractor {
    fn id(&self) -> &'static str {
        "java"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["java"]
    }

    fn tree_sitter_language(&self, _path: &Path) -> tree_sitter::Language {
        tree_sitter_java::LANGUAGE.into()
    }

    fn extract_entities(
        &self,
        tree: &tree_sitter::Tree,
        source: &str,
        _path: &Path,
    ) -> Vec<ExtractedEntity> {
        let mut out = Vec::new();
        let mut context = Vec::new();
        walk_java_children(tree.root_node(), source, &mut context, false, &mut out);
        out
    }
}

fn walk_java_node(
    node: Node<'_>,
    source: &str,
    context: &mut Vec<String>,
    in_interface: bool,
    out: &mut Vec<ExtractedEntity>,
) {
    match node.kind() {
        "class_declaration"
        | "interface_declaration"
        | "enum_declaration"
        | "record_declaration"
        | "annotation_type_declaration" => {
            let Some(name_node) = child_by_field(node, "name") else {
                return;
            };
            let name = node_text(name_node, source).to_string();
            let body = child_by_field(node, "body");
            out.push(build_entity(
                EntityDraft {
                    node,
                    body,
                    qualified_name: dotted_name(context, &name),
                    name: name.clone(),
                    kind: EntityKind::Type,
                    is_public: has_modifier(node, source, "public") || in_interface,
                    test_marker: false,
                },
                source,
                &PROFILE,
            ));
            if let Some(body) = body {
                let interface = node.kind() == "interface_declaration";
                context.push(name);
                walk_java_children(body, source, context, interface, out);
                context.pop();
            }
        }
        "method_declaration" | "constructor_declaration" => {
            let Some(name_node) = child_by_field(node, "name") else {
                return;
            };
            let name = node_text(name_node, source).to_string();
            let is_public = has_modifier(node, source, "public")
                || (in_interface && !has_modifier(node, source, "private"));
            out.push(build_entity(
                EntityDraft {
                    node,
                    body: child_by_field(node, "body"),
                    qualified_name: dotted_name(context, &name),
                    name,
                    kind: EntityKind::Function,
                    is_public,
                    test_marker: has_modifier(node, source, "@Test"),
                },
                source,
                &PROFILE,
            ));
        }
        _ => walk_java_children(node, source, context, in_interface, out),
    }
}

fn walk_java_children(
    node: Node<'_>,
    source: &str,
    context: &mut Vec<String>,
    in_interface: bool,
    out: &mut Vec<ExtractedEntity>,
) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk_java_node(child, source, context, in_interface, out);
    }
}

/// Keyword or annotation present in the declaration's `modifiers` node.
fn has_modifier(node: Node<'_>, source: &str, modifier: &str) -> bool {
    let Some(mods) = find_child_by_kind(node, "modifiers") else {
        return false;
    };
    let mut cursor = mods.walk();
    mods.children(&mut cursor).any(|c| {
        let text = node_text(c, source);
        text == modifier || text.split('(').next() == Some(modifier)
    })
}
