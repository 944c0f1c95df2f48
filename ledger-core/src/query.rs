//! Rich-query selectors
//!
//! A CouchDB-style subset evaluated over the JSON documents of the state
//! store:
//!
//! ```text
//! {"selector": {"docType": "queue", "sender": "A", "priority": {"$gte": 2}}}
//! {"selector": {"$or": [{"docType": "pledgefund"}, {"docType": "redeemfund"}]}}
//! ```
//!
//! Supported operators: `$eq`, `$gt`, `$gte`, `$lt`, `$lte`, `$in`, `$or`.

use crate::{Error, Result};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Condition on one field
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Field equals value
    Eq(Value),
    /// Field strictly greater
    Gt(Value),
    /// Field greater or equal
    Gte(Value),
    /// Field strictly less
    Lt(Value),
    /// Field less or equal
    Lte(Value),
    /// Field equals one of the values
    In(Vec<Value>),
}

impl Condition {
    fn matches(&self, field: Option<&Value>) -> bool {
        let Some(field) = field else {
            return false;
        };
        match self {
            Condition::Eq(v) => compare(field, v) == Some(Ordering::Equal),
            Condition::Gt(v) => compare(field, v) == Some(Ordering::Greater),
            Condition::Gte(v) => matches!(
                compare(field, v),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Condition::Lt(v) => compare(field, v) == Some(Ordering::Less),
            Condition::Lte(v) => matches!(compare(field, v), Some(Ordering::Less | Ordering::Equal)),
            Condition::In(vs) => vs
                .iter()
                .any(|v| compare(field, v) == Some(Ordering::Equal)),
        }
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Conjunction of field conditions, optionally with a disjunction of sub-selectors
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selector {
    clauses: Vec<(String, Condition)>,
    any_of: Vec<Selector>,
}

impl Selector {
    /// Empty selector (matches every document)
    pub fn new() -> Self {
        Self::default()
    }

    /// Selector on `docType`
    pub fn doc_type(doc_type: &str) -> Self {
        Self::new().eq("docType", doc_type)
    }

    /// Add an equality clause
    pub fn eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Eq(value.into()))
    }

    /// Add a `$gte` clause
    pub fn gte(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Gte(value.into()))
    }

    /// Add an arbitrary clause
    pub fn with(mut self, field: &str, condition: Condition) -> Self {
        self.clauses.push((field.to_string(), condition));
        self
    }

    /// Require at least one of the sub-selectors to match
    pub fn or(mut self, alternatives: Vec<Selector>) -> Self {
        self.any_of.extend(alternatives);
        self
    }

    /// Conjoin another selector's clauses into this one
    pub fn and(mut self, other: Selector) -> Self {
        self.clauses.extend(other.clauses);
        self.any_of.extend(other.any_of);
        self
    }

    /// Evaluate against a JSON document
    pub fn matches(&self, doc: &Value) -> bool {
        let Some(obj) = doc.as_object() else {
            return false;
        };
        self.clauses
            .iter()
            .all(|(field, cond)| cond.matches(obj.get(field)))
            && (self.any_of.is_empty() || self.any_of.iter().any(|s| s.matches(doc)))
    }

    /// Parse `{"selector": {...}}` or a bare selector object
    pub fn from_json(input: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(input)
            .map_err(|e| Error::InvalidArgument(format!("selector is not valid JSON: {}", e)))?;
        let obj = value
            .as_object()
            .ok_or_else(|| Error::InvalidArgument("selector must be a JSON object".to_string()))?;
        match obj.get("selector") {
            Some(Value::Object(inner)) => Self::from_object(inner),
            Some(_) => Err(Error::InvalidArgument(
                "selector must be a JSON object".to_string(),
            )),
            None => Self::from_object(obj),
        }
    }

    fn from_object(obj: &Map<String, Value>) -> Result<Self> {
        let mut selector = Selector::new();
        for (field, value) in obj {
            if field == "$or" {
                let alternatives = value
                    .as_array()
                    .ok_or_else(|| Error::InvalidArgument("$or expects an array".to_string()))?
                    .iter()
                    .map(|alt| {
                        alt.as_object()
                            .ok_or_else(|| {
                                Error::InvalidArgument("$or entries must be objects".to_string())
                            })
                            .and_then(Self::from_object)
                    })
                    .collect::<Result<Vec<_>>>()?;
                selector = selector.or(alternatives);
                continue;
            }
            match value {
                Value::Object(ops) if ops.keys().all(|k| k.starts_with('$')) => {
                    for (op, operand) in ops {
                        selector = selector.with(field, Self::operator(op, operand)?);
                    }
                }
                other => selector = selector.eq(field, other.clone()),
            }
        }
        Ok(selector)
    }

    fn operator(op: &str, operand: &Value) -> Result<Condition> {
        Ok(match op {
            "$eq" => Condition::Eq(operand.clone()),
            "$gt" => Condition::Gt(operand.clone()),
            "$gte" => Condition::Gte(operand.clone()),
            "$lt" => Condition::Lt(operand.clone()),
            "$lte" => Condition::Lte(operand.clone()),
            "$in" => Condition::In(
                operand
                    .as_array()
                    .ok_or_else(|| Error::InvalidArgument("$in expects an array".to_string()))?
                    .clone(),
            ),
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unsupported selector operator {}",
                    other
                )))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_matches() {
        let s = Selector::doc_type("queue").eq("sender", "A").gte("priority", 2);
        assert!(s.matches(&json!({"docType": "queue", "sender": "A", "priority": 3})));
        assert!(!s.matches(&json!({"docType": "queue", "sender": "A", "priority": 1})));
        assert!(!s.matches(&json!({"docType": "queue", "sender": "B", "priority": 3})));
        assert!(!s.matches(&json!({"docType": "queue", "sender": "A"})));
    }

    #[test]
    fn test_parse_or_and_operators() {
        let s = Selector::from_json(
            r#"{"selector":{"$or":[{"docType":"pledgefund"},{"docType":"redeemfund"}],"amount":{"$gt":10}}}"#,
        )
        .unwrap();
        assert!(s.matches(&json!({"docType": "redeemfund", "amount": 11})));
        assert!(!s.matches(&json!({"docType": "redeemfund", "amount": 10})));
        assert!(!s.matches(&json!({"docType": "account", "amount": 11})));
    }

    #[test]
    fn test_parse_in() {
        let s = Selector::from_json(r#"{"status":{"$in":["SETTLED","CANCELLED"]}}"#).unwrap();
        assert!(s.matches(&json!({"status": "CANCELLED"})));
        assert!(!s.matches(&json!({"status": "ACTIVE"})));
    }

    #[test]
    fn test_rejects_unknown_operator() {
        assert!(Selector::from_json(r#"{"amount":{"$regex":"x"}}"#).is_err());
        assert!(Selector::from_json("[1,2]").is_err());
    }
}
