use std::path::Path;

use tree_sitter::Node;

use crate::{EntityKind, ExtractedEntity};

use super::LanguageExtractor;
use super::helpers::{
    EntityDraft, SyntaxProfile, build_entity, child_by_field, find_child_by_kind, node_text,
    qualified_name,
};

#[derive(Debug)]
pub struct RustExtractor;

static PROFILE: SyntaxProfile = SyntaxProfile {
    call_kinds: &["call_expression"],
    callee_fields: &["function"],
    type_ref_kinds: &["type_identifier"],
    type_scope_kinds: &[],
    nested_kinds: &[
        "function_item",
        "function_signature_item",
        "struct_item",
        "enum_item",
        "union_item",
        "trait_item",
        "type_item",
        "impl_item",
        "mod_item",
    ],
    decision_kinds: &[
        "if_expression",
        "while_expression",
        "for_expression",
        "match_arm",
    ],
    boolean_kinds: &["binary_expression"],
};

impl LanguageExtractor for RustExtractor {
    fn id(&self) -> &'static str {
        "rust"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["rs"]
    }

    fn tree_sitter_language(&self, _path: &Path) -> tree_sitter::Language {
        tree_sitter_rust::LANGUAGE.into()
    }

    fn extract_entities(
        &self,
        tree: &tree_sitter::Tree,
        source: &str,
        _path: &Path,
    ) -> Vec<ExtractedEntity> {
        let mut out = Vec::new();
        let mut scope = Scope::default();
        walk_children(tree.root_node(), source, &mut scope, &mut out);
        out
    }
}

#[derive(Debug, Default)]
struct Scope {
    context: Vec<String>,
    /// Inside `#[cfg(test)] mod`.
    in_test: bool,
    /// Members of trait impls and trait bodies are reachable without `pub`.
    members_public: bool,
}

fn walk_rust_node(
    node: Node<'_>,
    source: &str,
    scope: &mut Scope,
    out: &mut Vec<ExtractedEntity>,
) {
    match node.kind() {
        "function_item" | "function_signature_item" => {
            let Some(name_node) = child_by_field(node, "name") else {
                return;
            };
            let name = node_text(name_node, source).to_string();
            let attrs = attributes(node, source);
            out.push(build_entity(
                EntityDraft {
                    node,
                    body: child_by_field(node, "body"),
                    qualified_name: qualified_name(&scope.context, &name),
                    name,
                    kind: EntityKind::Function,
                    is_public: is_pub(node) || scope.members_public,
                    test_marker: scope.in_test || attrs.iter().any(|a| is_test_attr(a)),
                },
                source,
                &PROFILE,
            ));
        }
        "struct_item" | "enum_item" | "union_item" | "type_item" => {
            if let Some(name_node) = child_by_field(node, "name") {
                let name = node_text(name_node, source).to_string();
                out.push(build_entity(
                    EntityDraft {
                        node,
                        body: None,
                        qualified_name: qualified_name(&scope.context, &name),
                        name,
                        kind: EntityKind::Type,
                        is_public: is_pub(node),
                        test_marker: scope.in_test,
                    },
                    source,
                    &PROFILE,
                ));
            }
        }
        "trait_item" => {
            let Some(name_node) = child_by_field(node, "name") else {
                return;
            };
            let name = node_text(name_node, source).to_string();
            let body = child_by_field(node, "body");
            out.push(build_entity(
                EntityDraft {
                    node,
                    body,
                    qualified_name: qualified_name(&scope.context, &name),
                    name: name.clone(),
                    kind: EntityKind::Type,
                    is_public: is_pub(node),
                    test_marker: scope.in_test,
                },
                source,
                &PROFILE,
            ));
            if let Some(body) = body {
                with_member_scope(body, source, scope, name, true, out);
            }
        }
        "impl_item" => {
            if let (Some(type_name), Some(body)) =
                (impl_type_name(node, source), child_by_field(node, "body"))
            {
                let is_trait_impl = child_by_field(node, "trait").is_some();
                with_member_scope(body, source, scope, type_name, is_trait_impl, out);
            }
        }
        "mod_item" => {
            let Some(name_node) = child_by_field(node, "name") else {
                return;
            };
            let name = node_text(name_node, source).to_string();
            let body = child_by_field(node, "body");
            let cfg_test = attributes(node, source).iter().any(|a| is_test_attr(a));
            out.push(build_entity(
                EntityDraft {
                    node,
                    body,
                    qualified_name: qualified_name(&scope.context, &name),
                    name: name.clone(),
                    kind: EntityKind::Module,
                    is_public: is_pub(node),
                    test_marker: scope.in_test || cfg_test,
                },
                source,
                &PROFILE,
            ));

            if let Some(body) = body {
                let was_test = scope.in_test;
                let was_public = scope.members_public;
                scope.in_test |= cfg_test;
                scope.members_public = false;
                scope.context.push(name);
                walk_children(body, source, scope, out);
                scope.context.pop();
                scope.in_test = was_test;
                scope.members_public = was_public;
            }
        }
        _ => walk_children(node, source, scope, out),
    }
}

fn walk_children(
    node: Node<'_>,
    source: &str,
    scope: &mut Scope,
    out: &mut Vec<ExtractedEntity>,
) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk_rust_node(child, source, scope, out);
    }
}

fn with_member_scope(
    body: Node<'_>,
    source: &str,
    scope: &mut Scope,
    owner: String,
    members_public: bool,
    out: &mut Vec<ExtractedEntity>,
) {
    let was_public = scope.members_public;
    scope.members_public = members_public;
    scope.context.push(owner);
    walk_children(body, source, scope, out);
    scope.context.pop();
    scope.members_public = was_public;
}

fn is_pub(node: Node<'_>) -> bool {
    find_child_by_kind(node, "visibility_modifier").is_some()
}

/// Name of the implemented type with generics and paths removed.
fn impl_type_name(node: Node<'_>, source: &str) -> Option<String> {
    let mut ty = child_by_field(node, "type")?;
    loop {
        match ty.kind() {
            "generic_type" => ty = child_by_field(ty, "type")?,
            "scoped_type_identifier" => ty = child_by_field(ty, "name")?,
            _ => break,
        }
    }
    Some(node_text(ty, source).to_string())
}

/// Outer attributes attached to an item, nearest last.
fn attributes<'s>(node: Node<'_>, source: &'s str) -> Vec<&'s str> {
    let mut attrs = Vec::new();
    let mut current = node;
    while let Some(prev) = current.prev_sibling() {
        match prev.kind() {
            "attribute_item" => attrs.push(node_text(prev, source)),
            "line_comment" | "block_comment" => {}
            _ => break,
        }
        current = prev;
    }
    attrs.reverse();
    attrs
}

fn is_test_attr(attr: &str) -> bool {
    let inner = attr
        .trim()
        .trim_start_matches("#[")
        .trim_end_matches(']')
        .trim();
    let head = inner.split('(').next().unwrap_or(inner);
    inner == "cfg(test)" || head == "test" || head.ends_with("::test")
}
