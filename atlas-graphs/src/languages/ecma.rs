//! TypeScript and JavaScript share one walker; the TypeScript grammar adds
//! interfaces, type aliases, enums and namespaces on top of the JavaScript node set.

use std::path::Path;

use tree_sitter::Node;

use crate::{EntityKind, ExtractedEntity};

use super::LanguageExtractor;
use super::helpers::{
    EntityDraft, SyntaxProfile, build_entity, child_by_field, dotted_name, find_child_by_kind,
    node_text,
};

#[derive(Debug)]
pub struct TypeScriptExtractor;

#[derive(Debug)]
pub struct JavaScriptExtractor;

static PROFILE: SyntaxProfile = SyntaxProfile {
    call_kinds: &["call_expression", "new_expression"],
    callee_fields: &["function", "constructor"],
    type_ref_kinds: &["type_identifier"],
    type_scope_kinds: &[],
    nested_kinds: &[
        "function_declaration",
        "generator_function_declaration",
        "class_declaration",
        "abstract_class_declaration",
        "method_definition",
        "interface_declaration",
        "type_alias_declaration",
        "enum_declaration",
        "internal_module",
    ],
    decision_kinds: &[
        "if_statement",
        "for_statement",
        "for_in_statement",
        "while_statement",
        "do_statement",
        "switch_case",
        "catch_clause",
        "ternary_expression",
    ],
    boolean_kinds: &["binary_expression"],
};

impl LanguageExtractor for TypeScriptExtractor {
    fn id(&self) -> &'static str {
        "typescript"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["ts", "tsx", "mts", "cts"]
    }

    fn interpreters(&self) -> &'static [&'static str] {
        &["ts-node", "tsx", "deno"]
    }

    fn tree_sitter_language(&self, path: &Path) -> tree_sitter::Language {
        if path.extension().is_some_and(|e| e == "tsx") {
            tree_sitter_typescript::LANGUAGE_TSX.into()
        } else {
            tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
        }
    }

    fn extract_entities(
        &self,
        tree: &tree_sitter::Tree,
        source: &str,
        _path: &Path,
    ) -> Vec<ExtractedEntity> {
        extract_ecma(tree, source)
    }
}

impl LanguageExtractor for JavaScriptExtractor {
    fn id(&self) -> &'static str {
        "javascript"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["js", "jsx", "mjs", "cjs"]
    }

    fn interpreters(&self) -> &'static [&'static str] {
        &["node", "nodejs", "bun"]
    }

    fn tree_sitter_language(&self, _path: &Path) -> tree_sitter::Language {
        tree_sitter_javascript::LANGUAGE.into()
    }

    fn extract_entities(
        &self,
        tree: &tree_sitter::Tree,
        source: &str,
        _path: &Path,
    ) -> Vec<ExtractedEntity> {
        extract_ecma(tree, source)
    }
}

fn extract_ecma(tree: &tree_sitter::Tree, source: &str) -> Vec<ExtractedEntity> {
    let mut out = Vec::new();
    let mut context = Vec::new();
    walk_children(tree.root_node(), source, &mut context, false, &mut out);
    out
}

fn walk_ecma_node(
    node: Node<'_>,
    source: &str,
    context: &mut Vec<String>,
    exported: bool,
    out: &mut Vec<ExtractedEntity>,
) {
    match node.kind() {
        "export_statement" => walk_children(node, source, context, true, out),
        "function_declaration" | "generator_function_declaration" => {
            let body = child_by_field(node, "body");
            push_named(node, body, EntityKind::Function, source, context, exported, out);
        }
        "method_definition" => {
            let private = find_child_by_kind(node, "accessibility_modifier")
                .is_some_and(|m| node_text(m, source) != "public")
                || child_by_field(node, "name")
                    .is_some_and(|n| n.kind() == "private_property_identifier");
            let body = child_by_field(node, "body");
            let is_public = exported && !private;
            push_named(node, body, EntityKind::Function, source, context, is_public, out);
        }
        "interface_declaration" | "type_alias_declaration" | "enum_declaration" => {
            push_named(node, None, EntityKind::Type, source, context, exported, out);
        }
        "class_declaration" | "abstract_class_declaration" => {
            let body = child_by_field(node, "body");
            let name = push_named(node, body, EntityKind::Type, source, context, exported, out);
            if let (Some(name), Some(body)) = (name, body) {
                context.push(name);
                walk_children(body, source, context, exported, out);
                context.pop();
            }
        }
        "internal_module" => {
            let body = child_by_field(node, "body");
            let name = push_named(node, body, EntityKind::Module, source, context, exported, out);
            if let (Some(name), Some(body)) = (name, body) {
                context.push(name);
                walk_children(body, source, context, false, out);
                context.pop();
            }
        }
        "lexical_declaration" | "variable_declaration" => {
            let mut cursor = node.walk();
            for declarator in node.children(&mut cursor) {
                if declarator.kind() != "variable_declarator" {
                    continue;
                }
                let Some(value) = child_by_field(declarator, "value") else {
                    continue;
                };
                if matches!(value.kind(), "arrow_function" | "function_expression" | "function") {
                    let Some(name_node) = child_by_field(declarator, "name") else {
                        continue;
                    };
                    let name = node_text(name_node, source).to_string();
                    out.push(build_entity(
                        EntityDraft {
                            node,
                            body: child_by_field(value, "body"),
                            qualified_name: dotted_name(context, &name),
                            name,
                            kind: EntityKind::Function,
                            is_public: exported,
                            test_marker: false,
                        },
                        source,
                        &PROFILE,
                    ));
                }
            }
        }
        _ => walk_children(node, source, context, false, out),
    }
}

/// Push an entity named by the node's `name` field; returns the bare name.
fn push_named(
    node: Node<'_>,
    body: Option<Node<'_>>,
    kind: EntityKind,
    source: &str,
    context: &[String],
    is_public: bool,
    out: &mut Vec<ExtractedEntity>,
) -> Option<String> {
    let name = node_text(child_by_field(node, "name")?, source).to_string();
    out.push(build_entity(
        EntityDraft {
            node,
            body,
            qualified_name: dotted_name(context, &name),
            name: name.clone(),
            kind,
            is_public,
            test_marker: false,
        },
        source,
        &PROFILE,
    ));
    Some(name)
}

fn walk_children(
    node: Node<'_>,
    source: &str,
    context: &mut Vec<String>,
    exported: bool,
    out: &mut Vec<ExtractedEntity>,
) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk_ecma_node(child, source, context, exported, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RefKind;

    fn extract_ts(source: &str) -> Vec<ExtractedEntity> {
        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into())
            .unwrap();
        let tree = parser.parse(source, None).unwrap();
        TypeScriptExtractor.extract_entities(&tree, source, Path::new("src/auth.ts"))
    }

    fn extract_js(source: &str) -> Vec<ExtractedEntity> {
        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&tree_sitter_javascript::LANGUAGE.into())
            .unwrap();
        let tree = parser.parse(source, None).unwrap();
        JavaScriptExtractor.extract_entities(&tree, source, Path::new("src/app.js"))
    }

    #[test]
    fn typescript_declarations() {
        let source = r"
export interface Token { value: string }
type Claims = Record<string, string>;
export class AuthService {
    validate(token: Token): Claims { return decode(token); }
    private reset(): void {}
}
export function login(user: string): Token { return new Token(); }
";
        let entities = extract_ts(source);
        let qnames: Vec<&str> = entities.iter().map(|e| e.qualified_name.as_str()).collect();
        assert_eq!(
            qnames,
            vec![
                "Token",
                "Claims",
                "AuthService",
                "AuthService.validate",
                "AuthService.reset",
                "login"
            ]
        );
        assert!(entities[0].is_public);
        assert!(!entities[1].is_public);
        assert!(entities[3].is_public);
        assert!(!entities[4].is_public);
        assert_eq!(
            entities[5].signature,
            "function login(user: string): Token"
        );
    }

    #[test]
    fn typescript_refs() {
        let source = "function check(t: Token): Claims { return decode(t); }\n";
        let entities = extract_ts(source);
        let refs: Vec<(&str, RefKind)> = entities[0]
            .raw_refs
            .iter()
            .map(|r| (r.name.as_str(), r.kind))
            .collect();
        assert_eq!(
            refs,
            vec![
                ("Token", RefKind::TypeRef),
                ("Claims", RefKind::TypeRef),
                ("decode", RefKind::Call),
            ]
        );
    }

    #[test]
    fn javascript_arrow_functions() {
        let source = "export const handler = async (req) => {\n  return respond(req.body);\n};\nfunction respond(x) { return x ? 1 : 0; }\n";
        let entities = extract_js(source);
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].name, "handler");
        assert!(entities[0].is_public);
        assert_eq!(entities[0].raw_refs[0].name, "respond");
        assert_eq!(entities[1].complexity, Some(2));
        assert!(!entities[1].is_public);
    }
}
