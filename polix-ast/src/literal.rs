//! Literal values appearing in surface syntax and atomic constraints.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A literal as it appears in source: a scalar, a set (for `in`/`not-in`), or
/// a pattern (for `matches`/`not-matches`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// An unordered set of scalar literals, the right-hand side of `in`/`not-in`.
    Set(Vec<Literal>),
    /// A regex pattern source, the right-hand side of `matches`/`not-matches`.
    Pattern(String),
}

impl Literal {
    /// Returns true if this and `other` are scalars comparable by `<`/`<=`/`>`/`>=`.
    pub fn partial_compare(&self, other: &Literal) -> Option<Ordering> {
        match (self, other) {
            (Literal::Int(a), Literal::Int(b)) => a.partial_cmp(b),
            (Literal::Float(a), Literal::Float(b)) => a.partial_cmp(b),
            (Literal::Int(a), Literal::Float(b)) => (*a as f64).partial_cmp(b),
            (Literal::Float(a), Literal::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Literal::Str(a), Literal::Str(b)) => a.partial_cmp(b),
            (Literal::Bool(a), Literal::Bool(b)) => a.partial_cmp(b),
            _ => None,
        }
    }

    /// Returns the set elements if this is [`Literal::Set`].
    pub fn as_set(&self) -> Option<&[Literal]> {
        match self {
            Literal::Set(items) => Some(items),
            _ => None,
        }
    }
}

impl Eq for Literal {}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Int(i) => write!(f, "{i}"),
            Literal::Float(x) => write!(f, "{x}"),
            Literal::Str(s) => write!(f, "{s:?}"),
            Literal::Set(items) => {
                write!(f, "#{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "}}")
            }
            Literal::Pattern(pat) => write!(f, "/{pat}/"),
        }
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn int_compare_is_reflexive(a: i64) {
            prop_assert_eq!(Literal::Int(a).partial_compare(&Literal::Int(a)), Some(Ordering::Equal));
        }

        #[test]
        fn int_compare_is_antisymmetric(a: i64, b: i64) {
            let fwd = Literal::Int(a).partial_compare(&Literal::Int(b));
            let rev = Literal::Int(b).partial_compare(&Literal::Int(a));
            prop_assert_eq!(fwd.map(Ordering::reverse), rev);
        }

        #[test]
        fn int_float_coercion_agrees_with_exact_conversion(a: i32) {
            let a = a as i64;
            prop_assert_eq!(
                Literal::Int(a).partial_compare(&Literal::Float(a as f64)),
                Some(Ordering::Equal)
            );
        }
    }
}
