//! Built-in operator semantics (spec §4.3 "Operators").
//!
//! Boolean connectives (`and`/`or`/`not`) are handled structurally by the
//! unification engine, since their operands are themselves AST nodes rather
//! than values. This module covers the value-level operators: comparison,
//! membership and pattern matching, plus the De Morgan swap table consulted
//! by [`crate::negate`].

use parking_lot::RwLock;
use polix_ast::{Literal, Value, COMPARISON_OPS, MEMBERSHIP_OPS, PATTERN_OPS};
use regex::Regex;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

/// The outcome of applying an operator (spec §4.3/§4.5(d)/§7): a decided
/// boolean, an undecidable-but-recognized operand ("open"), or an operator
/// this build does not recognize at all — the last case is surfaced as a
/// complex marker by callers, never a hard error.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    Decided(bool),
    Open,
    Unknown,
}

/// Applies a comparison/membership/pattern operator between a document value
/// and a literal.
///
/// [`Outcome::Open`] covers `value` being [`Value::Computed`] or otherwise
/// not a scalar the operator can decide against. [`Outcome::Unknown`] covers
/// an operator this build has no semantics for at all (including a pattern
/// that fails to compile as a regex) — both are "not yet decidable", never
/// an error.
pub fn apply(op: &str, value: &Value, literal: &Literal) -> Outcome {
    if value.is_computed() {
        return Outcome::Open;
    }
    match op {
        "=" => from_option(value.as_literal().map(|_| value.equals_literal(literal))),
        "!=" => from_option(value.as_literal().map(|_| !value.equals_literal(literal))),
        "<" => from_option(compare(value, literal).map(|ord| ord == Ordering::Less)),
        "<=" => from_option(compare(value, literal).map(|ord| ord != Ordering::Greater)),
        ">" => from_option(compare(value, literal).map(|ord| ord == Ordering::Greater)),
        ">=" => from_option(compare(value, literal).map(|ord| ord != Ordering::Less)),
        "in" => from_option(membership(value, literal)),
        "not-in" => from_option(membership(value, literal).map(|b| !b)),
        "matches" => matches_pattern(value, literal),
        "not-matches" => match matches_pattern(value, literal) {
            Outcome::Decided(b) => Outcome::Decided(!b),
            other => other,
        },
        _ => Outcome::Unknown,
    }
}

fn from_option(decided: Option<bool>) -> Outcome {
    match decided {
        Some(b) => Outcome::Decided(b),
        None => Outcome::Open,
    }
}

fn compare(value: &Value, literal: &Literal) -> Option<Ordering> {
    value.compare_literal(literal)
}

fn membership(value: &Value, literal: &Literal) -> Option<bool> {
    let set = literal.as_set()?;
    let lit = value.as_literal()?;
    Some(set.iter().any(|member| lit == *member))
}

fn matches_pattern(value: &Value, literal: &Literal) -> Outcome {
    let pattern = match literal {
        Literal::Pattern(p) => p,
        _ => return Outcome::Open,
    };
    let text = match value {
        Value::Str(s) => s,
        _ => return Outcome::Open,
    };
    match Regex::new(pattern) {
        Ok(re) => Outcome::Decided(re.is_match(text)),
        Err(_) => Outcome::Unknown,
    }
}

/// Returns true for any operator recognized here (the value-level subset —
/// `and`/`or`/`not` are handled by the unification engine directly).
pub fn is_value_operator(op: &str) -> bool {
    COMPARISON_OPS.contains(&op) || MEMBERSHIP_OPS.contains(&op) || PATTERN_OPS.contains(&op)
}

/// True for an operator this build has fixed semantics for, regardless of
/// any custom operator a host application has additionally registered into
/// an [`OperatorRegistry`].
pub fn is_builtin(op: &str) -> bool {
    is_value_operator(op) || matches!(op, "and" | "or" | "not")
}

/// The live set of custom (host-registered) operator names recognized beyond
/// the built-ins, plus a monotonic version bumped on every registration —
/// consulted by the T1 guarded evaluation tier and the policy cache
/// fingerprint, mirroring [`crate::module::ModuleRegistry`]'s version counter
/// (spec §4.3 "operator registry").
#[derive(Clone, Default)]
pub struct OperatorRegistry {
    inner: Arc<RwLock<OperatorState>>,
}

#[derive(Default)]
struct OperatorState {
    custom: BTreeSet<String>,
    version: u64,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.inner.read().version
    }

    /// Registers a custom operator name, bumping the version counter unless
    /// it was already known (builtin or previously registered).
    pub fn register(&self, op: impl Into<String>) {
        let op = op.into();
        if is_builtin(&op) {
            return;
        }
        let mut state = self.inner.write();
        if state.custom.insert(op) {
            state.version += 1;
        }
    }

    /// True if `op` is either built in or has been registered.
    pub fn is_known(&self, op: &str) -> bool {
        is_builtin(op) || self.inner.read().custom.contains(op)
    }
}

/// The De Morgan swap table for syntactically negatable comparison/membership
/// operators (spec §4.8 "operator swap table"). `matches`/`not-matches` are
/// deliberately excluded: negating a regex match is not itself a regex match,
/// so `not` is kept structurally instead of rewriting the operator.
pub fn negate_operator(op: &str) -> Option<&'static str> {
    match op {
        "=" => Some("!="),
        "!=" => Some("="),
        "<" => Some(">="),
        "<=" => Some(">"),
        ">" => Some("<="),
        ">=" => Some("<"),
        "in" => Some("not-in"),
        "not-in" => Some("in"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equals_with_int_float_coercion() {
        assert_eq!(apply("=", &Value::Int(5), &Literal::Float(5.0)), Outcome::Decided(true));
    }

    #[test]
    fn comparison_decides_ordering() {
        assert_eq!(apply("<", &Value::Int(3), &Literal::Int(5)), Outcome::Decided(true));
        assert_eq!(apply(">=", &Value::Int(5), &Literal::Int(5)), Outcome::Decided(true));
    }

    #[test]
    fn membership_checks_set() {
        let set = Literal::Set(vec![Literal::Str("a".into()), Literal::Str("b".into())]);
        assert_eq!(apply("in", &Value::Str("a".into()), &set), Outcome::Decided(true));
        assert_eq!(apply("not-in", &Value::Str("c".into()), &set), Outcome::Decided(true));
    }

    #[test]
    fn matches_pattern_runs_regex() {
        let pat = Literal::Pattern("^a.*z$".into());
        assert_eq!(apply("matches", &Value::Str("abz".into()), &pat), Outcome::Decided(true));
    }

    #[test]
    fn computed_value_is_open() {
        assert_eq!(apply("=", &Value::Null, &Literal::Int(1)), Outcome::Open);
    }

    #[test]
    fn unknown_operator_yields_unknown() {
        assert_eq!(apply("frobnicate", &Value::Int(1), &Literal::Int(1)), Outcome::Unknown);
    }

    #[test]
    fn registering_a_custom_operator_bumps_version_once() {
        let registry = OperatorRegistry::new();
        assert_eq!(registry.version(), 0);
        assert!(!registry.is_known("geo-within"));
        registry.register("geo-within");
        assert_eq!(registry.version(), 1);
        assert!(registry.is_known("geo-within"));
        registry.register("geo-within");
        assert_eq!(registry.version(), 1);
    }

    #[test]
    fn registering_a_builtin_name_is_a_no_op() {
        let registry = OperatorRegistry::new();
        registry.register("=");
        assert_eq!(registry.version(), 0);
    }

    #[test]
    fn swap_table_is_involutive() {
        for op in ["=", "!=", "<", "<=", ">", ">=", "in", "not-in"] {
            let swapped = negate_operator(op).unwrap();
            assert_eq!(negate_operator(swapped).unwrap(), op);
        }
        assert_eq!(negate_operator("matches"), None);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn negatable_op() -> impl Strategy<Value = &'static str> {
        prop_oneof![
            Just("="),
            Just("!="),
            Just("<"),
            Just("<="),
            Just(">"),
            Just(">="),
            Just("in"),
            Just("not-in"),
        ]
    }

    proptest! {
        #[test]
        fn swap_table_is_involutive_over_generated_ops(op in negatable_op()) {
            let swapped = negate_operator(op).unwrap();
            prop_assert_eq!(negate_operator(swapped).unwrap(), op);
        }

        #[test]
        fn int_equality_agrees_with_native_eq(a: i64, b: i64) {
            let decided = apply("=", &Value::Int(a), &Literal::Int(b));
            prop_assert_eq!(decided, Outcome::Decided(a == b));
        }

        #[test]
        fn comparison_ops_are_exhaustive_for_ints(a: i64, b: i64) {
            let lt = apply("<", &Value::Int(a), &Literal::Int(b)) == Outcome::Decided(true);
            let eq = apply("=", &Value::Int(a), &Literal::Int(b)) == Outcome::Decided(true);
            let gt = apply(">", &Value::Int(a), &Literal::Int(b)) == Outcome::Decided(true);
            prop_assert_eq!([lt, eq, gt].iter().filter(|b| **b).count(), 1);
        }
    }
}
