//! Query predicates as a typed expression tree, compiled to parameterised SQL.
//!
//! JSON form is externally tagged:
//!
//! ```json
//! {"and": [
//!   {"cmp": {"field": "kind", "op": "eq", "value": "function"}},
//!   {"not": {"cmp": {"field": "file_path", "op": "prefix", "value": "vendor/"}}}
//! ]}
//! ```

use std::collections::BTreeSet;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::error::QueryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    EntityId,
    Name,
    QualifiedName,
    FilePath,
    Kind,
    Language,
    IsPublic,
    Signature,
    Body,
}

impl Field {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EntityId => "entity_id",
            Self::Name => "name",
            Self::QualifiedName => "qualified_name",
            Self::FilePath => "file_path",
            Self::Kind => "kind",
            Self::Language => "language",
            Self::IsPublic => "is_public",
            Self::Signature => "signature",
            Self::Body => "body",
        }
    }

    fn column(self) -> &'static str {
        match self {
            Self::EntityId => "entity_id",
            Self::Name => "name",
            Self::QualifiedName => "qualified_name",
            Self::FilePath => "file_path",
            Self::Kind => "entity_kind",
            Self::Language => "language",
            Self::IsPublic => "is_public",
            Self::Signature => "signature",
            Self::Body => "body_text",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Eq,
    Contains,
    Prefix,
    Regex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub field: Field,
    pub op: Op,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Cmp(Comparison),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn cmp(field: Field, op: Op, value: impl Into<Value>) -> Self {
        Self::Cmp(Comparison {
            field,
            op,
            value: value.into(),
        })
    }

    /// Matches every entity.
    pub fn all() -> Self {
        Self::And(Vec::new())
    }

    /// Every field the expression reads.
    pub fn fields(&self) -> BTreeSet<Field> {
        let mut out = BTreeSet::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields(&self, out: &mut BTreeSet<Field>) {
        match self {
            Self::Cmp(c) => {
                out.insert(c.field);
            }
            Self::And(items) | Self::Or(items) => {
                for p in items {
                    p.collect_fields(out);
                }
            }
            Self::Not(inner) => inner.collect_fields(out),
        }
    }

    /// Check value types and regex syntax before any SQL runs.
    pub fn validate(&self) -> Result<(), QueryError> {
        match self {
            Self::Cmp(c) => c.validate(),
            Self::And(items) | Self::Or(items) => items.iter().try_for_each(Self::validate),
            Self::Not(inner) => inner.validate(),
        }
    }

    /// Append a SQL boolean expression to `sql`, pushing bound values onto `params`.
    pub fn to_sql(&self, sql: &mut String, params: &mut Vec<Box<dyn rusqlite::types::ToSql>>) {
        match self {
            Self::Cmp(c) => c.to_sql(sql, params),
            Self::And(items) | Self::Or(items) if items.is_empty() => {
                sql.push_str(if matches!(self, Self::And(_)) { "1" } else { "0" });
            }
            Self::And(items) | Self::Or(items) => {
                let joiner = if matches!(self, Self::And(_)) { " AND " } else { " OR " };
                sql.push('(');
                for (i, p) in items.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(joiner);
                    }
                    p.to_sql(sql, params);
                }
                sql.push(')');
            }
            Self::Not(inner) => {
                sql.push_str("NOT (");
                inner.to_sql(sql, params);
                sql.push(')');
            }
        }
    }
}

impl Comparison {
    fn validate(&self) -> Result<(), QueryError> {
        match (self.field, &self.value) {
            (Field::IsPublic, Value::Bool(_)) => {
                if self.op == Op::Eq {
                    Ok(())
                } else {
                    Err(QueryError::InvalidPredicate(
                        "is_public only supports `eq`".into(),
                    ))
                }
            }
            (Field::IsPublic, _) => Err(QueryError::InvalidPredicate(
                "is_public expects a boolean".into(),
            )),
            (field, Value::Text(text)) => {
                if self.op == Op::Regex {
                    regex::Regex::new(text).map_err(|e| {
                        QueryError::InvalidPredicate(format!(
                            "bad regex for {}: {e}",
                            field.as_str()
                        ))
                    })?;
                }
                Ok(())
            }
            (field, _) => Err(QueryError::InvalidPredicate(format!(
                "{} expects a string",
                field.as_str()
            ))),
        }
    }

    fn to_sql(&self, sql: &mut String, params: &mut Vec<Box<dyn rusqlite::types::ToSql>>) {
        let col = self.field.column();
        let n = params.len() + 1;
        let _ = match self.op {
            Op::Eq => write!(sql, "{col} = ?{n}"),
            Op::Contains => write!(sql, "instr({col}, ?{n}) > 0"),
            Op::Prefix => write!(sql, "instr({col}, ?{n}) = 1"),
            Op::Regex => write!(sql, "{col} REGEXP ?{n}"),
        };
        match &self.value {
            Value::Bool(b) => params.push(Box::new(*b)),
            Value::Int(i) => params.push(Box::new(*i)),
            Value::Text(s) => params.push(Box::new(s.clone())),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(p: &Predicate) -> (String, usize) {
        let mut sql = String::new();
        let mut params = Vec::new();
        p.to_sql(&mut sql, &mut params);
        (sql, params.len())
    }

    #[test]
    fn parses_tagged_json() {
        let json = r#"{"and": [
            {"cmp": {"field": "kind", "op": "eq", "value": "function"}},
            {"not": {"cmp": {"field": "file_path", "op": "prefix", "value": "vendor/"}}},
            {"cmp": {"field": "is_public", "op": "eq", "value": true}}
        ]}"#;
        let p: Predicate = serde_json::from_str(json).unwrap();
        assert_eq!(
            p.fields().into_iter().collect::<Vec<_>>(),
            vec![Field::FilePath, Field::Kind, Field::IsPublic]
        );
        p.validate().unwrap();
        let (sql, n) = compile(&p);
        assert_eq!(
            sql,
            "(entity_kind = ?1 AND NOT (instr(file_path, ?2) = 1) AND is_public = ?3)"
        );
        assert_eq!(n, 3);
    }

    #[test]
    fn empty_groups() {
        assert_eq!(compile(&Predicate::all()).0, "1");
        assert_eq!(compile(&Predicate::Or(Vec::new())).0, "0");
    }

    #[test]
    fn regex_and_contains() {
        let p = Predicate::Or(vec![
            Predicate::cmp(Field::Signature, Op::Regex, r"->\s*Result<"),
            Predicate::cmp(Field::Body, Op::Contains, "unsafe"),
        ]);
        p.validate().unwrap();
        assert_eq!(
            compile(&p).0,
            "(signature REGEXP ?1 OR instr(body_text, ?2) > 0)"
        );
    }

    #[test]
    fn rejects_bad_values() {
        let bad_regex = Predicate::cmp(Field::Name, Op::Regex, "(");
        assert!(matches!(
            bad_regex.validate(),
            Err(QueryError::InvalidPredicate(_))
        ));
        let bad_flag = Predicate::cmp(Field::IsPublic, Op::Eq, "yes");
        assert!(bad_flag.validate().is_err());
        let bad_text = Predicate::cmp(Field::Name, Op::Eq, true);
        assert!(bad_text.validate().is_err());
    }
}
