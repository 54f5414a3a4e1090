use std::collections::HashSet;

use tree_sitter::Node;

use crate::{EntityKind, ExtractedEntity, RawRef, RefKind, TextRange};

/// Per-language node kinds consumed by the shared reference and complexity walkers.
#[derive(Debug)]
pub struct SyntaxProfile {
    /// Call-like nodes (`call_expression`, `method_invocation`, ...).
    pub call_kinds: &'static [&'static str],
    /// Fields tried in order to locate the callee of a call node.
    pub callee_fields: &'static [&'static str],
    /// Nodes whose text is a type name.
    pub type_ref_kinds: &'static [&'static str],
    /// Nodes under which a plain `identifier` names a type (Python annotations).
    pub type_scope_kinds: &'static [&'static str],
    /// Definitions that become their own entity; walkers do not descend into them.
    pub nested_kinds: &'static [&'static str],
    /// Branch points counted by cyclomatic complexity.
    pub decision_kinds: &'static [&'static str],
    /// Binary nodes counted when their operator short-circuits.
    pub boolean_kinds: &'static [&'static str],
}

/// Extract the source text for a tree-sitter node.
pub fn node_text<'a>(node: Node<'_>, source: &'a str) -> &'a str {
    &source[node.byte_range()]
}

/// Find the first child with a specific kind.
pub fn find_child_by_kind<'a>(node: Node<'a>, kind: &str) -> Option<Node<'a>> {
    let mut cursor = node.walk();
    node.children(&mut cursor)
        .find(|child| child.kind() == kind)
}

/// Find a child by field name.
pub fn child_by_field<'a>(node: Node<'a>, field: &str) -> Option<Node<'a>> {
    node.child_by_field_name(field)
}

/// Depth-first search for the first descendant of a kind.
pub fn first_descendant_of_kind<'a>(node: Node<'a>, kind: &str) -> Option<Node<'a>> {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == kind {
            return Some(child);
        }
        if let Some(found) = first_descendant_of_kind(child, kind) {
            return Some(found);
        }
    }
    None
}

/// Build a qualified name from a context stack using `::` separator (Rust).
pub fn qualified_name(context: &[String], name: &str) -> String {
    if context.is_empty() {
        name.to_string()
    } else {
        format!("{}::{name}", context.join("::"))
    }
}

/// Build a qualified name from a context stack using `.` separator (most languages).
pub fn dotted_name(context: &[String], name: &str) -> String {
    if context.is_empty() {
        name.to_string()
    } else {
        format!("{}.{name}", context.join("."))
    }
}

/// Convert a tree-sitter node to a `TextRange`.
pub fn node_range(node: Node<'_>) -> TextRange {
    node.range().into()
}

// ── Entity construction ─────────────────────────────────────────────

/// What a language walker knows about a definition before the shared
/// passes fill in signature, references and complexity.
#[derive(Debug)]
pub struct EntityDraft<'t> {
    pub node: Node<'t>,
    /// Body node; the signature is everything before it. `None` keeps the
    /// whole declaration as the signature.
    pub body: Option<Node<'t>>,
    pub name: String,
    pub qualified_name: String,
    pub kind: EntityKind,
    pub is_public: bool,
    pub test_marker: bool,
}

pub fn build_entity(
    draft: EntityDraft<'_>,
    source: &str,
    profile: &SyntaxProfile,
) -> ExtractedEntity {
    let node = draft.node;
    let signature = signature_text(node, draft.body, source);

    let mut raw_refs = Vec::new();
    let mut seen = HashSet::new();
    collect_refs(node, source, profile, false, true, &mut raw_refs, &mut seen);

    let complexity = (draft.kind == EntityKind::Function)
        .then(|| 1 + count_decisions(node, source, profile, true));

    ExtractedEntity {
        name: draft.name,
        qualified_name: draft.qualified_name,
        kind: draft.kind,
        span: node_range(node),
        signature,
        body_text: node_text(node, source).to_string(),
        is_public: draft.is_public,
        test_marker: draft.test_marker,
        raw_refs,
        complexity,
        has_syntax_error: node.has_error(),
    }
}

/// Declaration text up to the body, whitespace collapsed and trailing
/// openers stripped.
pub fn signature_text(node: Node<'_>, body: Option<Node<'_>>, source: &str) -> String {
    let end = body.map_or(node.end_byte(), |b| b.start_byte());
    let raw = &source[node.start_byte()..end.max(node.start_byte())];
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_end_matches(|c: char| matches!(c, '{' | ':' | ';') || c.is_whitespace())
        .to_string()
}

fn collect_refs(
    node: Node<'_>,
    source: &str,
    profile: &SyntaxProfile,
    in_type_scope: bool,
    is_root: bool,
    out: &mut Vec<RawRef>,
    seen: &mut HashSet<(String, RefKind)>,
) {
    if !is_root && profile.nested_kinds.contains(&node.kind()) {
        return;
    }

    let kind = node.kind();
    if profile.call_kinds.contains(&kind) {
        let callee = profile
            .callee_fields
            .iter()
            .find_map(|field| child_by_field(node, field));
        if let Some(name) = callee.and_then(|c| callee_leaf(node_text(c, source))) {
            push_ref(out, seen, name, RefKind::Call);
        }
    }
    if profile.type_ref_kinds.contains(&kind) || (in_type_scope && kind == "identifier") {
        push_ref(out, seen, node_text(node, source), RefKind::TypeRef);
    }

    let child_scope = in_type_scope || profile.type_scope_kinds.contains(&kind);
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_refs(child, source, profile, child_scope, false, out, seen);
    }
}

fn push_ref(
    out: &mut Vec<RawRef>,
    seen: &mut HashSet<(String, RefKind)>,
    name: &str,
    kind: RefKind,
) {
    if name.is_empty() {
        return;
    }
    if seen.insert((name.to_string(), kind)) {
        out.push(RawRef {
            name: name.to_string(),
            kind,
        });
    }
}

/// Leaf identifier of a callee expression: `self.store.get` gives `get`,
/// `Session::open::<T>` gives `open`.
pub fn callee_leaf(text: &str) -> Option<&str> {
    let head = text.split('<').next().unwrap_or(text);
    head.rsplit(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
        .find(|s| !s.is_empty())
        .filter(|s| !s.starts_with(|c: char| c.is_ascii_digit()))
}

fn count_decisions(node: Node<'_>, source: &str, profile: &SyntaxProfile, is_root: bool) -> i64 {
    if !is_root && profile.nested_kinds.contains(&node.kind()) {
        return 0;
    }
    let kind = node.kind();
    let mut count = i64::from(profile.decision_kinds.contains(&kind));
    if profile.boolean_kinds.contains(&kind) {
        let short_circuit = child_by_field(node, "operator")
            .is_some_and(|op| matches!(node_text(op, source), "&&" | "||" | "??"));
        count += i64::from(short_circuit);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        count += count_decisions(child, source, profile, false);
    }
    count
}

// ── Error location ──────────────────────────────────────────────────

/// First `ERROR` or missing node in document order.
pub fn first_error(node: Node<'_>) -> Option<Node<'_>> {
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.is_error() || child.is_missing() {
            return Some(child);
        }
        if child.has_error() {
            if let Some(found) = first_error(child) {
                return Some(found);
            }
        }
    }
    node.is_error().then_some(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callee_leaf_takes_last_segment() {
        assert_eq!(callee_leaf("helper"), Some("helper"));
        assert_eq!(callee_leaf("self.store.get"), Some("get"));
        assert_eq!(callee_leaf("Session::open"), Some("open"));
        assert_eq!(callee_leaf("iter.collect::<Vec<_>>"), Some("collect"));
        assert_eq!(callee_leaf("a.b(c).d"), Some("d"));
        assert_eq!(callee_leaf("()"), None);
    }

    #[test]
    fn qualified_names_join_context() {
        let ctx = vec!["outer".to_string(), "Inner".to_string()];
        assert_eq!(qualified_name(&ctx, "f"), "outer::Inner::f");
        assert_eq!(dotted_name(&ctx, "f"), "outer.Inner.f");
        assert_eq!(dotted_name(&[], "f"), "f");
    }
}
