use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::bail;
use crate::document::{Document, get_path, has_non_null};
use crate::error::{ErrorKind, MergeResult};
use crate::key::JoinKey;

/// Document predicate understood by every store.
///
/// Filters are parsed from a small subset of the familiar JSON query syntax:
/// `{"f": v}`, `{"f": {"$exists": bool}}`, `{"f": {"$ne": null}}` and `{"f": {"$in": [..]}}`.
/// Several fields in one object are AND-ed.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    /// The field is present (`true`) or absent (`false`). A null value counts as present.
    Exists { field: String, exists: bool },
    /// The field is present and not null.
    NotNull(String),
    /// The field equals the value, with numbers compared by value.
    Eq(String, Value),
    /// The field equals one of the values.
    In(String, KeySet),
    And(Vec<Filter>),
}

/// Candidate values of [`Filter::In`], hashed once so membership checks stay constant time.
#[derive(Debug, Clone)]
pub struct KeySet {
    values: Vec<Value>,
    keys: HashSet<JoinKey>,
}

impl KeySet {
    pub fn new(values: Vec<Value>) -> Self {
        let keys = values.iter().cloned().map(JoinKey::new).collect();
        Self { values, keys }
    }

    /// The candidates in the order they were given.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.keys.contains(&JoinKey::new(value.clone()))
    }
}

impl PartialEq for KeySet {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl Filter {
    pub fn exists(field: impl Into<String>) -> Self {
        Filter::Exists {
            field: field.into(),
            exists: true,
        }
    }

    pub fn not_null(field: impl Into<String>) -> Self {
        Filter::NotNull(field.into())
    }

    pub fn equals(field: impl Into<String>, value: Value) -> Self {
        Filter::Eq(field.into(), value)
    }

    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::In(field.into(), KeySet::new(values))
    }

    /// Combines two filters, flattening nested conjunctions and dropping [`Filter::All`].
    pub fn and(self, other: Filter) -> Filter {
        let mut filters = Vec::new();
        for filter in [self, other] {
            match filter {
                Filter::All => {}
                Filter::And(inner) => filters.extend(inner),
                other => filters.push(other),
            }
        }

        match filters.len() {
            0 => Filter::All,
            1 => filters.pop().unwrap_or(Filter::All),
            _ => Filter::And(filters),
        }
    }

    /// Evaluates the filter against a document.
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Exists { field, exists } => get_path(document, field).is_some() == *exists,
            Filter::NotNull(field) => has_non_null(document, field),
            Filter::Eq(field, expected) => get_path(document, field)
                .is_some_and(|value| JoinKey::new(value.clone()) == JoinKey::new(expected.clone())),
            Filter::In(field, candidates) => {
                get_path(document, field).is_some_and(|value| candidates.contains(value))
            }
            Filter::And(filters) => filters.iter().all(|filter| filter.matches(document)),
        }
    }

    /// Parses a JSON filter document.
    pub fn from_json(value: &Value) -> MergeResult<Filter> {
        let Value::Object(fields) = value else {
            bail!(
                ErrorKind::ConfigError,
                "Filter must be a JSON object",
                value.to_string()
            );
        };

        let mut filter = Filter::All;
        for (field, condition) in fields {
            filter = filter.and(parse_condition(field, condition)?);
        }

        Ok(filter)
    }
}

fn parse_condition(field: &str, condition: &Value) -> MergeResult<Filter> {
    let Value::Object(operators) = condition else {
        return Ok(Filter::equals(field, condition.clone()));
    };

    if !operators.keys().any(|key| key.starts_with('$')) {
        return Ok(Filter::equals(field, condition.clone()));
    }

    let mut filter = Filter::All;
    for (operator, operand) in operators {
        filter = filter.and(parse_operator(field, operator, operand, operators)?);
    }

    Ok(filter)
}

fn parse_operator(
    field: &str,
    operator: &str,
    operand: &Value,
    operators: &Map<String, Value>,
) -> MergeResult<Filter> {
    match (operator, operand) {
        ("$exists", Value::Bool(exists)) => Ok(Filter::Exists {
            field: field.to_string(),
            exists: *exists,
        }),
        ("$ne", Value::Null) => Ok(Filter::not_null(field)),
        ("$in", Value::Array(values)) => Ok(Filter::is_in(field, values.clone())),
        _ => bail!(
            ErrorKind::ConfigError,
            "Unsupported filter operator",
            format!("field `{field}`: {}", Value::Object(operators.clone()))
        ),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn parses_supported_operators() {
        let filter = Filter::from_json(&json!({
            "gender": {"$ne": null},
            "name": {"$exists": true},
            "kind": {"$in": [1, 2]},
            "active": true
        }))
        .unwrap();

        assert_eq!(
            filter,
            Filter::And(vec![
                Filter::not_null("gender"),
                Filter::exists("name"),
                Filter::is_in("kind", vec![json!(1), json!(2)]),
                Filter::equals("active", json!(true)),
            ])
        );
    }

    #[test]
    fn unsupported_operators_are_rejected() {
        let err = Filter::from_json(&json!({"age": {"$gt": 3}})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);

        let err = Filter::from_json(&json!([1])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }

    #[test]
    fn null_is_present_but_not_non_null() {
        let document = doc(json!({"_id": 1, "gender": null}));

        assert!(Filter::exists("gender").matches(&document));
        assert!(!Filter::not_null("gender").matches(&document));
        assert!(!Filter::exists("name").matches(&document));
    }

    #[test]
    fn equality_compares_numbers_by_value() {
        let document = doc(json!({"_id": 1, "owner": 22}));

        assert!(Filter::equals("owner", json!(22.0)).matches(&document));
        assert!(Filter::is_in("owner", vec![json!(11), json!(22)]).matches(&document));
        assert!(!Filter::is_in("owner", vec![]).matches(&document));
    }

    #[test]
    fn key_set_membership_uses_key_equality() {
        let candidates = KeySet::new((0..1_000).map(|i| json!(i)).collect());

        assert!(candidates.contains(&json!(999.0)));
        assert!(!candidates.contains(&json!("999")));
        assert_eq!(candidates.values().len(), 1_000);
    }

    #[test]
    fn and_flattens_and_drops_all() {
        let filter = Filter::All
            .and(Filter::exists("a"))
            .and(Filter::And(vec![Filter::exists("b"), Filter::exists("c")]));

        assert_eq!(
            filter,
            Filter::And(vec![
                Filter::exists("a"),
                Filter::exists("b"),
                Filter::exists("c")
            ])
        );
        assert_eq!(Filter::All.and(Filter::All), Filter::All);
    }
}
