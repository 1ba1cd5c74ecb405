//! The document value model (spec §6 "Document shape").
//!
//! A document is an unordered mapping from field names to values, nested
//! recursively, leaves being literals or further collections. A
//! [`Value::Computed`] leaf holds an embedded policy expression: spec §9
//! "Computed-document fields (values that are themselves policy
//! expressions) are expanded during evaluation."

use crate::ast::AstNode;
use crate::literal::Literal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A value stored at a document path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// A field whose value is itself a policy expression, expanded lazily
    /// during evaluation (spec §9). By decision (see DESIGN.md, Open
    /// Question 3) computed fields must reduce to a scalar.
    Computed(Box<AstNode>),
}

impl Value {
    /// Returns true for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns true for [`Value::Computed`].
    pub fn is_computed(&self) -> bool {
        matches!(self, Value::Computed(_))
    }

    /// Returns a child of a [`Value::Map`] by field name.
    pub fn get_field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Map(fields) => fields.get(name),
            _ => None,
        }
    }

    /// Returns a child of a [`Value::List`] by index.
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        match self {
            Value::List(items) => items.get(index),
            _ => None,
        }
    }

    /// Returns the list elements, if this is a [`Value::List`].
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Converts this value into a [`Literal`] for comparison against an
    /// atomic constraint, if it is a scalar.
    pub fn as_literal(&self) -> Option<Literal> {
        match self {
            Value::Bool(b) => Some(Literal::Bool(*b)),
            Value::Int(i) => Some(Literal::Int(*i)),
            Value::Float(x) => Some(Literal::Float(*x)),
            Value::Str(s) => Some(Literal::Str(s.clone())),
            _ => None,
        }
    }

    /// Structural-equality-with-numeric-coercion comparison used by `=`/`!=`.
    pub fn equals_literal(&self, lit: &Literal) -> bool {
        match (self, lit) {
            (Value::Bool(a), Literal::Bool(b)) => a == b,
            (Value::Int(a), Literal::Int(b)) => a == b,
            (Value::Float(a), Literal::Float(b)) => a == b,
            (Value::Int(a), Literal::Float(b)) => (*a as f64) == *b,
            (Value::Float(a), Literal::Int(b)) => *a == (*b as f64),
            (Value::Str(a), Literal::Str(b)) => a == b,
            _ => false,
        }
    }

    /// Ordered comparison used by `<`/`<=`/`>`/`>=`.
    pub fn compare_literal(&self, lit: &Literal) -> Option<Ordering> {
        self.as_literal()?.partial_compare(lit)
    }
}

impl From<Literal> for Value {
    fn from(lit: Literal) -> Self {
        match lit {
            Literal::Bool(b) => Value::Bool(b),
            Literal::Int(i) => Value::Int(i),
            Literal::Float(x) => Value::Float(x),
            Literal::Str(s) => Value::Str(s),
            Literal::Set(items) => Value::List(items.into_iter().map(Value::from).collect()),
            Literal::Pattern(pat) => Value::Str(pat),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(fields) => Value::Map(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Map(fields) => {
                write!(f, "{{")?;
                for (i, (k, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Value::Computed(_) => write!(f, "<computed>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equals_coerces_int_float() {
        assert!(Value::Int(5).equals_literal(&Literal::Float(5.0)));
        assert!(!Value::Int(5).equals_literal(&Literal::Str("5".into())));
    }

    #[test]
    fn from_json_roundtrips_shape() {
        let json = serde_json::json!({"role": "admin", "tags": [1, 2]});
        let value = Value::from(json);
        assert_eq!(value.get_field("role"), Some(&Value::Str("admin".into())));
        assert_eq!(
            value.get_field("tags").and_then(Value::as_list),
            Some(&[Value::Int(1), Value::Int(2)][..])
        );
    }
}
