pub mod ecma;
pub mod go;
mod helpers;
pub mod java;
pub mod python;
pub mod rust;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::ExtractedEntity;

pub(crate) use helpers::first_error as first_syntax_error;

/// Trait implemented by each language's entity extraction.
pub trait LanguageExtractor: Send + Sync + std::fmt::Debug {
    /// Language identifier (e.g., "rust", "python").
    fn id(&self) -> &'static str;

    /// File extensions this language handles.
    fn extensions(&self) -> &'static [&'static str];

    /// Interpreter names recognised on a `#!` line.
    fn interpreters(&self) -> &'static [&'static str] {
        &[]
    }

    /// Tree-sitter grammar for the file. Dialects (TSX) are picked by path.
    fn tree_sitter_language(&self, path: &Path) -> tree_sitter::Language;

    /// Walk a parsed tree and return every entity in source order.
    fn extract_entities(
        &self,
        tree: &tree_sitter::Tree,
        source: &str,
        path: &Path,
    ) -> Vec<ExtractedEntity>;
}

/// Registry of all supported languages.
#[derive(Debug)]
pub struct LanguageRegistry {
    languages: HashMap<String, Arc<dyn LanguageExtractor>>,
    extension_map: HashMap<String, String>,
    interpreter_map: HashMap<String, String>,
}

impl LanguageRegistry {
    pub fn new() -> Self {
        let mut reg = Self {
            languages: HashMap::new(),
            extension_map: HashMap::new(),
            interpreter_map: HashMap::new(),
        };
        reg.register(Arc::new(rust::RustExtractor));
        reg.register(Arc::new(python::PythonExtractor));
        reg.register(Arc::new(ecma::TypeScriptExtractor));
        reg.register(Arc::new(ecma::JavaScriptExtractor));
        reg.register(Arc::new(go::GoExtractor));
        reg.register(Arc::new(java::JavaExtractor));
        reg
    }

    pub fn register(&mut self, lang: Arc<dyn LanguageExtractor>) {
        for ext in lang.extensions() {
            self.extension_map
                .insert((*ext).to_string(), lang.id().to_string());
        }
        for interp in lang.interpreters() {
            self.interpreter_map
                .insert((*interp).to_string(), lang.id().to_string());
        }
        self.languages.insert(lang.id().to_string(), lang);
    }

    /// Look up the language for a file by its extension.
    pub fn for_file(&self, path: &Path) -> Option<Arc<dyn LanguageExtractor>> {
        let ext = path.extension()?.to_str()?;
        let lang_id = self.extension_map.get(ext)?;
        self.languages.get(lang_id).cloned()
    }

    /// Extension first, then the `#!` line of the source.
    pub fn detect(&self, path: &Path, source: &str) -> Option<Arc<dyn LanguageExtractor>> {
        if let Some(lang) = self.for_file(path) {
            return Some(lang);
        }
        let interp = shebang_interpreter(source)?;
        let lang_id = self.interpreter_map.get(interp)?;
        self.languages.get(lang_id).cloned()
    }

    /// Get a language by its identifier.
    pub fn get(&self, id: &str) -> Option<Arc<dyn LanguageExtractor>> {
        self.languages.get(id).cloned()
    }

    /// List all registered language IDs, sorted.
    pub fn language_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.languages.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Interpreter named by a `#!` line, with any version suffix removed
/// (`python3.11` becomes `python`).
fn shebang_interpreter(source: &str) -> Option<&str> {
    let first = source.lines().next()?.strip_prefix("#!")?;
    let mut parts = first.split_whitespace();
    let mut program = parts.next()?.rsplit('/').next()?;
    if program == "env" {
        program = parts.find(|p| !p.starts_with('-'))?;
    }
    let trimmed = program.trim_end_matches(|c: char| c.is_ascii_digit() || c == '.');
    if trimmed.is_empty() { None } else { Some(trimmed) }
}
