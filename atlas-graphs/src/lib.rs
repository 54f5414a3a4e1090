pub mod extract;
pub mod languages;

use serde::{Deserialize, Serialize};

pub use extract::{ComplexityModel, extract_source};
pub use languages::{LanguageExtractor, LanguageRegistry};

/// Error type for the extraction engine.
#[derive(thiserror::Error, Debug)]
pub enum GraphError {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Tree-sitter error in {path}: {message}")]
    TreeSitter { path: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GraphError>;

// ── Span type ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextRange {
    pub start_byte: usize,
    pub end_byte: usize,
    pub start_row: usize,
    pub start_col: usize,
    pub end_row: usize,
    pub end_col: usize,
}

impl TextRange {
    /// First line of the span, 1-based.
    pub fn line_start(&self) -> u32 {
        u32::try_from(self.start_row + 1).unwrap_or(u32::MAX)
    }

    /// Last line of the span, 1-based and inclusive.
    pub fn line_end(&self) -> u32 {
        u32::try_from(self.end_row + 1).unwrap_or(u32::MAX)
    }
}

impl From<tree_sitter::Range> for TextRange {
    fn from(r: tree_sitter::Range) -> Self {
        Self {
            start_byte: r.start_byte,
            end_byte: r.end_byte,
            start_row: r.start_point.row,
            start_col: r.start_point.column,
            end_row: r.end_point.row,
            end_col: r.end_point.column,
        }
    }
}

// ── Entity kind ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Function,
    Type,
    Module,
    Other,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Type => "type",
            Self::Module => "module",
            Self::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "function" => Some(Self::Function),
            "type" => Some(Self::Type),
            "module" => Some(Self::Module),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

// ── Raw references ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    /// Call site; the name is the leaf segment of the callee expression.
    Call,
    /// Type identifier used in a signature or body.
    TypeRef,
}

/// An unresolved name referenced from an entity, in source order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawRef {
    pub name: String,
    pub kind: RefKind,
}

// ── Extraction output ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    pub qualified_name: String,
    pub kind: EntityKind,
    pub span: TextRange,
    /// Declared interface, body excluded, whitespace collapsed.
    pub signature: String,
    pub body_text: String,
    pub is_public: bool,
    /// Set by in-file markers such as `#[test]` or a `test_` prefix.
    pub test_marker: bool,
    pub raw_refs: Vec<RawRef>,
    pub complexity: Option<i64>,
    #[serde(skip)]
    pub has_syntax_error: bool,
}

/// Location of the first syntax error in a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseFailure {
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl std::fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at line {}, column {}", self.message, self.line, self.column)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileExtraction {
    pub language: String,
    pub entities: Vec<ExtractedEntity>,
    /// Present when the file did not parse cleanly. `entities` then holds only
    /// what was recovered before the failure point.
    pub parse_error: Option<ParseFailure>,
}
