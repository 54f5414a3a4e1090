use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::languages::LanguageExtractor;
use crate::{EntityKind, FileExtraction, GraphError, ParseFailure, Result};

/// How `complexity` is computed for function entities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityModel {
    /// One plus the number of branch points.
    #[default]
    Cyclomatic,
    /// Line count of the entity.
    Lines,
    /// Leave `complexity` unset.
    None,
}

/// Parse one file and extract its entities.
///
/// A syntax error does not fail the call: the returned extraction carries a
/// [`ParseFailure`] and only the entities that are error-free and end before
/// the first error position.
pub fn extract_source(
    lang: &dyn LanguageExtractor,
    source: &str,
    path: &Path,
    model: ComplexityModel,
) -> Result<FileExtraction> {
    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&lang.tree_sitter_language(path))
        .map_err(|e| GraphError::TreeSitter {
            path: path.display().to_string(),
            message: format!("Failed to set language: {e}"),
        })?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| GraphError::TreeSitter {
            path: path.display().to_string(),
            message: "tree-sitter parse returned None".to_string(),
        })?;

    let mut entities = lang.extract_entities(&tree, source, path);

    let root = tree.root_node();
    let parse_error = crate::languages::first_syntax_error(root).map(|node| {
        let message = if node.is_missing() {
            format!("missing {}", node.kind())
        } else {
            "syntax error".to_string()
        };
        (
            node.start_byte(),
            ParseFailure {
                line: u32::try_from(node.start_position().row + 1).unwrap_or(u32::MAX),
                column: u32::try_from(node.start_position().column + 1).unwrap_or(u32::MAX),
                message,
            },
        )
    });

    if let Some((error_byte, _)) = &parse_error {
        entities.retain(|e| !e.has_syntax_error && e.span.end_byte <= *error_byte);
    }

    for entity in &mut entities {
        entity.complexity = match (model, entity.kind) {
            (_, kind) if kind != EntityKind::Function => None,
            (ComplexityModel::Cyclomatic, _) => entity.complexity,
            (ComplexityModel::Lines, _) => {
                Some(i64::from(entity.span.line_end() - entity.span.line_start() + 1))
            }
            (ComplexityModel::None, _) => None,
        };
    }

    Ok(FileExtraction {
        language: lang.id().to_string(),
        entities,
        parse_error: parse_error.map(|(_, failure)| failure),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LanguageRegistry;

    fn run(path: &str, source: &str, model: ComplexityModel) -> FileExtraction {
        let registry = LanguageRegistry::new();
        let lang = registry.detect(Path::new(path), source).unwrap();
        extract_source(lang.as_ref(), source, Path::new(path), model).unwrap()
    }

    #[test]
    fn clean_file_has_no_parse_error() {
        let out = run("src/a.rs", "fn a() {}\nfn b() { a() }\n", ComplexityModel::default());
        assert!(out.parse_error.is_none());
        assert_eq!(out.entities.len(), 2);
        assert_eq!(out.language, "rust");
    }

    #[test]
    fn keeps_entities_before_first_error() {
        let source = "fn first() -> u32 { 1 }\n\nfn second() -> u32 { 2 }\n\nfn broken( {\n\nfn after() {}\n";
        let out = run("src/bad.rs", source, ComplexityModel::default());
        let failure = out.parse_error.expect("parse error recorded");
        assert!(failure.line >= 5);
        let names: Vec<&str> = out.entities.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn complexity_models() {
        let source = "def f(x):\n    if x:\n        return 1\n    return 2\n\nclass C:\n    pass\n";
        let cyclo = run("m.py", source, ComplexityModel::Cyclomatic);
        assert_eq!(cyclo.entities[0].complexity, Some(2));
        assert_eq!(cyclo.entities[1].complexity, None);

        let lines = run("m.py", source, ComplexityModel::Lines);
        assert_eq!(lines.entities[0].complexity, Some(4));

        let none = run("m.py", source, ComplexityModel::None);
        assert!(none.entities.iter().all(|e| e.complexity.is_none()));
    }

    #[test]
    fn shebang_files_are_extracted() {
        let out = run(
            "scripts/deploy",
            "#!/usr/bin/env python3\ndef main():\n    run()\n",
            ComplexityModel::default(),
        );
        assert_eq!(out.language, "python");
        assert_eq!(out.entities[0].name, "main");
    }
}
