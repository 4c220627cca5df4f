use std::cmp::Ordering;

use serde_json::{Map, Value, json};

use super::Document;

/// Query primitive understood by the document store.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Equal { attribute: String, values: Vec<Value> },
    NotEqual { attribute: String, value: Value },
    GreaterThanEqual { attribute: String, value: Value },
    LessThan { attribute: String, value: Value },
    OrderAsc(String),
    OrderDesc(String),
    Limit(usize),
    Offset(usize),
    CursorAfter(String),
}

impl Query {
    pub fn equal(attribute: &str, value: impl Into<Value>) -> Self {
        Self::Equal {
            attribute: attribute.to_string(),
            values: vec![value.into()],
        }
    }

    pub fn equal_any(attribute: &str, values: Vec<Value>) -> Self {
        Self::Equal {
            attribute: attribute.to_string(),
            values,
        }
    }

    pub fn not_equal(attribute: &str, value: impl Into<Value>) -> Self {
        Self::NotEqual {
            attribute: attribute.to_string(),
            value: value.into(),
        }
    }

    pub fn greater_than_equal(attribute: &str, value: impl Into<Value>) -> Self {
        Self::GreaterThanEqual {
            attribute: attribute.to_string(),
            value: value.into(),
        }
    }

    pub fn less_than(attribute: &str, value: impl Into<Value>) -> Self {
        Self::LessThan {
            attribute: attribute.to_string(),
            value: value.into(),
        }
    }

    pub fn order_asc(attribute: &str) -> Self {
        Self::OrderAsc(attribute.to_string())
    }

    pub fn order_desc(attribute: &str) -> Self {
        Self::OrderDesc(attribute.to_string())
    }

    pub fn limit(limit: usize) -> Self {
        Self::Limit(limit)
    }

    pub fn offset(offset: usize) -> Self {
        Self::Offset(offset)
    }

    pub fn cursor_after(document_id: impl Into<String>) -> Self {
        Self::CursorAfter(document_id.into())
    }

    /// JSON query string in the backend's `queries[]` wire format.
    pub fn to_wire(&self) -> String {
        let value = match self {
            Self::Equal { attribute, values } => {
                json!({ "method": "equal", "attribute": attribute, "values": values })
            }
            Self::NotEqual { attribute, value } => {
                json!({ "method": "notEqual", "attribute": attribute, "values": [value] })
            }
            Self::GreaterThanEqual { attribute, value } => {
                json!({ "method": "greaterThanEqual", "attribute": attribute, "values": [value] })
            }
            Self::LessThan { attribute, value } => {
                json!({ "method": "lessThan", "attribute": attribute, "values": [value] })
            }
            Self::OrderAsc(attribute) => json!({ "method": "orderAsc", "attribute": attribute }),
            Self::OrderDesc(attribute) => json!({ "method": "orderDesc", "attribute": attribute }),
            Self::Limit(limit) => json!({ "method": "limit", "values": [limit] }),
            Self::Offset(offset) => json!({ "method": "offset", "values": [offset] }),
            Self::CursorAfter(id) => json!({ "method": "cursorAfter", "values": [id] }),
        };
        value.to_string()
    }

    pub(crate) fn matches(&self, document: &Document) -> bool {
        match self {
            Self::Equal { attribute, values } => {
                let field = attribute_value(document, attribute);
                values.iter().any(|value| values_equal(&field, value))
            }
            Self::NotEqual { attribute, value } => {
                !values_equal(&attribute_value(document, attribute), value)
            }
            Self::GreaterThanEqual { attribute, value } => matches!(
                compare_values(&attribute_value(document, attribute), value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Self::LessThan { attribute, value } => matches!(
                compare_values(&attribute_value(document, attribute), value),
                Some(Ordering::Less)
            ),
            Self::OrderAsc(_)
            | Self::OrderDesc(_)
            | Self::Limit(_)
            | Self::Offset(_)
            | Self::CursorAfter(_) => true,
        }
    }
}

pub(crate) fn attribute_value(document: &Document, attribute: &str) -> Value {
    match attribute {
        "$id" => Value::String(document.id.clone()),
        "$createdAt" => Value::String(document.created_at.clone()),
        "$updatedAt" => Value::String(document.updated_at.clone()),
        other => document.data.get(other).cloned().unwrap_or(Value::Null),
    }
}

pub(crate) fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64()?.partial_cmp(&r.as_f64()?),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (Value::Bool(l), Value::Bool(r)) => Some(l.cmp(r)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Null, _) => Some(Ordering::Less),
        (_, Value::Null) => Some(Ordering::Greater),
        _ => None,
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => {
            compare_values(left, right) == Some(Ordering::Equal)
        }
        _ => left == right,
    }
}

/// Splits a data map into the attributes the backend accepts on write.
pub(crate) fn strip_system_attributes(mut data: Map<String, Value>) -> Map<String, Value> {
    data.retain(|key, _| !key.starts_with('$'));
    data
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::Query;

    #[test]
    fn equal_query_uses_backend_wire_format() {
        let wire = Query::equal("userId", "user-1").to_wire();
        let parsed: Value = serde_json::from_str(&wire).expect("wire query is json");
        assert_eq!(
            parsed,
            json!({ "method": "equal", "attribute": "userId", "values": ["user-1"] })
        );
    }

    #[test]
    fn pagination_queries_carry_values_without_attribute() {
        let limit: Value = serde_json::from_str(&Query::limit(100).to_wire()).unwrap();
        let cursor: Value = serde_json::from_str(&Query::cursor_after("doc-9").to_wire()).unwrap();
        let order: Value = serde_json::from_str(&Query::order_desc("timestamp").to_wire()).unwrap();

        assert_eq!(limit, json!({ "method": "limit", "values": [100] }));
        assert_eq!(cursor, json!({ "method": "cursorAfter", "values": ["doc-9"] }));
        assert_eq!(order, json!({ "method": "orderDesc", "attribute": "timestamp" }));
    }
}
