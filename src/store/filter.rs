//! Metadata filters
//!
//! The JSON form is the usual vector-store `where` syntax: `{"key": value}` for
//! equality, `{"key": {"$op": value}}` for comparisons and `{"$and": [...]}` /
//! `{"$or": [...]}` for composition. Several top-level keys are an implicit `$and`.

use crate::error::{PxError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Where {
    Equals { field: String, value: Value },
    NotEquals { field: String, value: Value },
    GreaterThan { field: String, value: f64 },
    GreaterEqual { field: String, value: f64 },
    LessThan { field: String, value: f64 },
    LessEqual { field: String, value: f64 },
    In { field: String, values: Vec<Value> },
    NotIn { field: String, values: Vec<Value> },
    And(Vec<Where>),
    Or(Vec<Where>),
}

impl Where {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::NotEquals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::In {
            field: field.into(),
            values,
        }
    }

    /// Combine with another filter; nested `And`s are flattened
    pub fn and(self, other: Where) -> Self {
        match (self, other) {
            (Self::And(mut a), Self::And(b)) => {
                a.extend(b);
                Self::And(a)
            }
            (Self::And(mut a), b) => {
                a.push(b);
                Self::And(a)
            }
            (a, b) => Self::And(vec![a, b]),
        }
    }

    /// Whether a metadata map satisfies the filter.
    ///
    /// Missing keys satisfy only the negative operators (`$ne`, `$nin`).
    pub fn matches(&self, metadata: &Map<String, Value>) -> bool {
        match self {
            Self::Equals { field, value } => metadata
                .get(field)
                .map(|v| values_equal(v, value))
                .unwrap_or(false),
            Self::NotEquals { field, value } => metadata
                .get(field)
                .map(|v| !values_equal(v, value))
                .unwrap_or(true),
            Self::GreaterThan { field, value } => compare(metadata, field, |v| v > *value),
            Self::GreaterEqual { field, value } => compare(metadata, field, |v| v >= *value),
            Self::LessThan { field, value } => compare(metadata, field, |v| v < *value),
            Self::LessEqual { field, value } => compare(metadata, field, |v| v <= *value),
            Self::In { field, values } => metadata
                .get(field)
                .map(|v| values.iter().any(|candidate| values_equal(v, candidate)))
                .unwrap_or(false),
            Self::NotIn { field, values } => metadata
                .get(field)
                .map(|v| !values.iter().any(|candidate| values_equal(v, candidate)))
                .unwrap_or(true),
            Self::And(conditions) => conditions.iter().all(|c| c.matches(metadata)),
            Self::Or(conditions) => conditions.iter().any(|c| c.matches(metadata)),
        }
    }

    /// Parse the JSON form
    pub fn from_json(value: &Value) -> Result<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| invalid(format!("filter must be an object, got {}", value)))?;
        if map.is_empty() {
            return Err(invalid("filter must not be empty"));
        }

        let mut conditions = Vec::with_capacity(map.len());
        for (key, operand) in map {
            conditions.push(match key.as_str() {
                "$and" => Self::And(Self::list(key, operand)?),
                "$or" => Self::Or(Self::list(key, operand)?),
                op if op.starts_with('$') => {
                    return Err(invalid(format!("unknown logical operator {}", op)))
                }
                field => Self::field_condition(field, operand)?,
            });
        }

        if conditions.len() == 1 {
            Ok(conditions.remove(0))
        } else {
            Ok(Self::And(conditions))
        }
    }

    fn list(op: &str, operand: &Value) -> Result<Vec<Where>> {
        let items = operand
            .as_array()
            .ok_or_else(|| invalid(format!("{} expects a list of filters", op)))?;
        items.iter().map(Self::from_json).collect()
    }

    fn field_condition(field: &str, operand: &Value) -> Result<Self> {
        let field = field.to_string();
        let Value::Object(ops) = operand else {
            return Ok(Self::Equals {
                field,
                value: operand.clone(),
            });
        };
        if ops.len() != 1 {
            return Err(invalid(format!(
                "condition on '{}' must have exactly one operator",
                field
            )));
        }

        let (op, value) = ops.iter().next().map(|(k, v)| (k.as_str(), v)).ok_or_else(|| {
            invalid(format!("condition on '{}' has no operator", field))
        })?;
        let number = || {
            value
                .as_f64()
                .ok_or_else(|| invalid(format!("{} on '{}' expects a number", op, field)))
        };
        let values = || {
            value
                .as_array()
                .cloned()
                .ok_or_else(|| invalid(format!("{} on '{}' expects a list", op, field)))
        };

        Ok(match op {
            "$eq" => Self::Equals {
                field,
                value: value.clone(),
            },
            "$ne" => Self::NotEquals {
                field,
                value: value.clone(),
            },
            "$gt" => Self::GreaterThan {
                value: number()?,
                field,
            },
            "$gte" => Self::GreaterEqual {
                value: number()?,
                field,
            },
            "$lt" => Self::LessThan {
                value: number()?,
                field,
            },
            "$lte" => Self::LessEqual {
                value: number()?,
                field,
            },
            "$in" => Self::In {
                values: values()?,
                field,
            },
            "$nin" => Self::NotIn {
                values: values()?,
                field,
            },
            other => return Err(invalid(format!("unknown operator {}", other))),
        })
    }

    /// JSON form of the filter
    pub fn to_json(&self) -> Value {
        match self {
            Self::Equals { field, value } => json!({ field.as_str(): value }),
            Self::NotEquals { field, value } => json!({ field.as_str(): {"$ne": value} }),
            Self::GreaterThan { field, value } => json!({ field.as_str(): {"$gt": value} }),
            Self::GreaterEqual { field, value } => json!({ field.as_str(): {"$gte": value} }),
            Self::LessThan { field, value } => json!({ field.as_str(): {"$lt": value} }),
            Self::LessEqual { field, value } => json!({ field.as_str(): {"$lte": value} }),
            Self::In { field, values } => json!({ field.as_str(): {"$in": values} }),
            Self::NotIn { field, values } => json!({ field.as_str(): {"$nin": values} }),
            Self::And(conditions) => {
                json!({ "$and": conditions.iter().map(Where::to_json).collect::<Vec<_>>() })
            }
            Self::Or(conditions) => {
                json!({ "$or": conditions.iter().map(Where::to_json).collect::<Vec<_>>() })
            }
        }
    }
}

/// Numbers compare by value so `1` matches `1.0`
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(metadata: &Map<String, Value>, field: &str, pred: impl Fn(f64) -> bool) -> bool {
    metadata
        .get(field)
        .and_then(Value::as_f64)
        .map(pred)
        .unwrap_or(false)
}

fn invalid(message: impl Into<String>) -> PxError {
    PxError::InvalidQuery(message.into())
}

impl Serialize for Where {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Where {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Where::from_json(&value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_equality_shorthand() {
        let filter = Where::from_json(&json!({"item": 1})).unwrap();
        assert_eq!(filter, Where::eq("item", 1));
        assert!(filter.matches(&meta(json!({"item": 1, "type": "user"}))));
        assert!(!filter.matches(&meta(json!({"item": 0}))));
        assert!(!filter.matches(&meta(json!({}))));
    }

    #[test]
    fn test_numeric_equality_ignores_representation() {
        let filter = Where::eq("item", 1.0);
        assert!(filter.matches(&meta(json!({"item": 1}))));
    }

    #[test]
    fn test_comparison_operators() {
        let m = meta(json!({"age": 30}));
        assert!(Where::from_json(&json!({"age": {"$gt": 20}})).unwrap().matches(&m));
        assert!(Where::from_json(&json!({"age": {"$gte": 30}})).unwrap().matches(&m));
        assert!(!Where::from_json(&json!({"age": {"$lt": 30}})).unwrap().matches(&m));
        assert!(Where::from_json(&json!({"age": {"$lte": 30}})).unwrap().matches(&m));
        assert!(Where::from_json(&json!({"age": {"$ne": 31}})).unwrap().matches(&m));
    }

    #[test]
    fn test_membership() {
        let m = meta(json!({"field": "tags"}));
        assert!(Where::from_json(&json!({"field": {"$in": ["tags", "links"]}}))
            .unwrap()
            .matches(&m));
        assert!(!Where::from_json(&json!({"field": {"$nin": ["tags"]}}))
            .unwrap()
            .matches(&m));
        assert!(Where::from_json(&json!({"other": {"$nin": ["tags"]}}))
            .unwrap()
            .matches(&m));
    }

    #[test]
    fn test_logical_operators() {
        let filter = Where::from_json(&json!({
            "$or": [{"type": "user"}, {"$and": [{"item": 0}, {"field": "tags"}]}]
        }))
        .unwrap();
        assert!(filter.matches(&meta(json!({"type": "user"}))));
        assert!(filter.matches(&meta(json!({"item": 0, "field": "tags"}))));
        assert!(!filter.matches(&meta(json!({"item": 0, "field": "links"}))));
    }

    #[test]
    fn test_multiple_keys_are_implicit_and() {
        let filter = Where::from_json(&json!({"item": 1, "type": "user"})).unwrap();
        assert!(matches!(filter, Where::And(ref c) if c.len() == 2));
        assert!(!filter.matches(&meta(json!({"item": 1, "type": "post"}))));
    }

    #[test]
    fn test_invalid_filters() {
        assert!(Where::from_json(&json!([1])).is_err());
        assert!(Where::from_json(&json!({})).is_err());
        assert!(Where::from_json(&json!({"age": {"$gt": "x"}})).is_err());
        assert!(Where::from_json(&json!({"age": {"$regex": "x"}})).is_err());
        assert!(Where::from_json(&json!({"$not": []})).is_err());
    }

    #[test]
    fn test_serde_uses_json_form() {
        let filter = Where::eq("item", 1).and(Where::ne("type", "template"));
        let value = serde_json::to_value(&filter).unwrap();
        assert_eq!(
            value,
            json!({"$and": [{"item": 1}, {"type": {"$ne": "template"}}]})
        );
        let back: Where = serde_json::from_value(value).unwrap();
        assert_eq!(back, filter);
    }
}
