use crate::types::CodeEntity;

const NAME_WEIGHT: u32 = 3;
const SIGNATURE_WEIGHT: u32 = 2;
const PATH_WEIGHT: u32 = 1;

/// Lowercase words of free text, at least two characters, deduplicated in order.
pub fn keywords(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for word in text.split(|c: char| !(c.is_alphanumeric() || c == '_')) {
        if word.chars().count() < 2 {
            continue;
        }
        let word = word.to_lowercase();
        if !out.contains(&word) {
            out.push(word);
        }
    }
    out
}

/// Keyword hits weighted by where they land: name 3, signature 2, path 1.
pub fn score(entity: &CodeEntity, keywords: &[String]) -> u32 {
    let name = entity.name.to_lowercase();
    let signature = entity.signature.to_lowercase();
    let path = entity.file_path.to_lowercase();
    keywords
        .iter()
        .map(|k| {
            let mut s = 0;
            if name.contains(k.as_str()) {
                s += NAME_WEIGHT;
            }
            if signature.contains(k.as_str()) {
                s += SIGNATURE_WEIGHT;
            }
            if path.contains(k.as_str()) {
                s += PATH_WEIGHT;
            }
            s
        })
        .sum()
}

/// Highest-scoring non-test entity; ties go to the smaller entity id.
pub fn best_match<'a>(entities: &'a [CodeEntity], keywords: &[String]) -> Option<&'a CodeEntity> {
    let mut best: Option<(&CodeEntity, u32)> = None;
    for entity in entities.iter().filter(|e| !e.is_test) {
        let s = score(entity, keywords);
        if s == 0 {
            continue;
        }
        let better = match best {
            None => true,
            Some((b, bs)) => s > bs || (s == bs && entity.entity_id < b.entity_id),
        };
        if better {
            best = Some((entity, s));
        }
    }
    best.map(|(e, _)| e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityKind;

    fn entity(name: &str, signature: &str, path: &str) -> CodeEntity {
        CodeEntity {
            entity_id: format!("rust:function:{path}:{name}:1-1"),
            entity_kind: EntityKind::Function,
            language: "rust".into(),
            name: name.into(),
            qualified_name: name.into(),
            file_path: path.into(),
            line_start: 1,
            line_end: 1,
            signature: signature.into(),
            body_text: None,
            is_public: true,
            is_test: false,
            complexity_score: None,
            token_count: 10,
        }
    }

    #[test]
    fn splits_task_text() {
        assert_eq!(
            keywords("Fix the login retry, then login again!"),
            vec!["fix", "the", "login", "retry", "then", "again"]
        );
    }

    #[test]
    fn name_outweighs_signature_and_path() {
        let kw = keywords("token");
        let by_name = entity("refresh_token", "fn refresh_token()", "src/a.rs");
        let by_sig = entity("refresh", "fn refresh() -> Token", "src/a.rs");
        let by_path = entity("refresh", "fn refresh()", "src/token.rs");
        assert_eq!(score(&by_name, &kw), 5);
        assert_eq!(score(&by_sig, &kw), 2);
        assert_eq!(score(&by_path, &kw), 1);

        let all = vec![by_path, by_sig, by_name];
        assert_eq!(best_match(&all, &kw).unwrap().name, "refresh_token");
        assert!(best_match(&all, &keywords("unrelated")).is_none());
    }
}
