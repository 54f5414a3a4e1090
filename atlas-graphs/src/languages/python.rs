use std::path::Path;

use tree_sitter::Node;

use crate::{EntityKind, ExtractedEntity};

use super::LanguageExtractor;
use super::helpers::{EntityDraft, SyntaxProfile, build_entity, child_by_field, dotted_name, node_text};

#[derive(Debug)]
pub struct PythonExtractor;

static PROFILE: SyntaxProfile = SyntaxProfile {
    call_kinds: &["call"],
    callee_fields: &["function"],
    type_ref_kinds: &[],
    type_scope_kinds: &["type"],
    nested_kinds: &["function_definition", "class_definition"],
    decision_kinds: &[
        "if_statement",
        "elif_clause",
        "for_statement",
        "while_statement",
        "except_clause",
        "conditional_expression",
        "boolean_operator",
        "for_in_clause",
        "case_clause",
    ],
    boolean_kinds: &[],
};

impl LanguageExtractor for PythonExtractor {
    fn id(&self) -> &'static str {
        "python"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["py", "pyi"]
    }

    fn interpreters(&self) -> &'static [&'static str] {
        &["python"]
    }

    fn tree_sitter_language(&self, _path: &Path) -> tree_sitter::Language {
        tree_sitter_python::LANGUAGE.into()
    }

    fn extract_entities(
        &self,
        tree: &tree_sitter::Tree,
        source: &str,
        _path: &Path,
    ) -> Vec<ExtractedEntity> {
        let mut out = Vec::new();
        let mut context = Vec::new();
        walk_children(tree.root_node(), source, &mut context, true, false, &mut out);
        out
    }
}

/// Leading underscore means private, dunder methods stay public.
fn is_public_name(name: &str) -> bool {
    !name.starts_with('_') || (name.starts_with("__") && name.ends_with("__") && name.len() > 4)
}

fn walk_python_node(
    node: Node<'_>,
    source: &str,
    context: &mut Vec<String>,
    parent_public: bool,
    in_test_class: bool,
    out: &mut Vec<ExtractedEntity>,
) {
    match node.kind() {
        "function_definition" => {
            let Some(name_node) = child_by_field(node, "name") else {
                return;
            };
            let name = node_text(name_node, source).to_string();
            out.push(build_entity(
                EntityDraft {
                    node,
                    body: child_by_field(node, "body"),
                    qualified_name: dotted_name(context, &name),
                    is_public: parent_public && is_public_name(&name),
                    test_marker: in_test_class || name.starts_with("test_"),
                    name,
                    kind: EntityKind::Function,
                },
                source,
                &PROFILE,
            ));
        }
        "class_definition" => {
            let Some(name_node) = child_by_field(node, "name") else {
                return;
            };
            let name = node_text(name_node, source).to_string();
            let body = child_by_field(node, "body");
            let is_public = parent_public && is_public_name(&name);
            let test_class = in_test_class || name.starts_with("Test");
            out.push(build_entity(
                EntityDraft {
                    node,
                    body,
                    qualified_name: dotted_name(context, &name),
                    name: name.clone(),
                    kind: EntityKind::Type,
                    is_public,
                    test_marker: test_class,
                },
                source,
                &PROFILE,
            ));
            if let Some(body) = body {
                context.push(name);
                walk_children(body, source, context, is_public, test_class, out);
                context.pop();
            }
        }
        _ => walk_children(node, source, context, parent_public, in_test_class, out),
    }
}

fn walk_children(
    node: Node<'_>,
    source: &str,
    context: &mut Vec<String>,
    parent_public: bool,
    in_test_class: bool,
    out: &mut Vec<ExtractedEntity>,
) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk_python_node(child, source, context, parent_public, in_test_class, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RefKind;

    fn extract(source: &str) -> Vec<ExtractedEntity> {
        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .unwrap();
        let tree = parser.parse(source, None).unwrap();
        PythonExtractor.extract_entities(&tree, source, Path::new("pkg/mod.py"))
    }

    #[test]
    fn extracts_classes_and_methods() {
        let source = r"
class Session:
    def __init__(self, token: Token):
        self.token = token

    def _refresh(self):
        pass

def open_session(path: str) -> Session:
    return Session(load(path))
";
        let entities = extract(source);
        let qnames: Vec<&str> = entities.iter().map(|e| e.qualified_name.as_str()).collect();
        assert_eq!(
            qnames,
            vec!["Session", "Session.__init__", "Session._refresh", "open_session"]
        );
        assert!(entities[1].is_public);
        assert!(!entities[2].is_public);
        assert_eq!(entities[3].signature, "def open_session(path: str) -> Session");
    }

    #[test]
    fn annotations_become_type_refs() {
        let source = "def run(cfg: Config) -> Report:\n    return build(cfg)\n";
        let entities = extract(source);
        let refs: Vec<(&str, RefKind)> = entities[0]
            .raw_refs
            .iter()
            .map(|r| (r.name.as_str(), r.kind))
            .collect();
        assert_eq!(
            refs,
            vec![
                ("Config", RefKind::TypeRef),
                ("Report", RefKind::TypeRef),
                ("build", RefKind::Call),
            ]
        );
    }

    #[test]
    fn decorated_functions_are_found() {
        let source = "@cache\ndef compute(x):\n    if x and x > 1:\n        return x\n    return 0\n";
        let entities = extract(source);
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].name, "compute");
        assert_eq!(entities[0].complexity, Some(3));
    }

    #[test]
    fn marks_test_functions() {
        let source = "def test_login():\n    pass\n\nclass TestAuth:\n    def check(self):\n        pass\n";
        let entities = extract(source);
        assert!(entities.iter().all(|e| e.test_marker));
    }
}
