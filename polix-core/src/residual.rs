//! The residual algebra (spec §4.1, C1).
//!
//! A [`Residual`] is a mapping from [`Path`]s to ordered lists of
//! [`Constraint`]s, plus two reserved slots: a cross-key list and a complex
//! marker. The empty residual is *satisfied*. A residual whose constraint
//! list at some path begins with a [`Constraint::Conflict`] is *contradicted*
//! (spec's legacy "nothing/null-like" sentinel is not implemented — see
//! DESIGN.md, Open Question 1).

use polix_ast::{AstNode, Literal, Path, Value};
use std::collections::BTreeMap;
use std::fmt;

/// The right-hand side of an atomic constraint: a scalar/set/pattern literal,
/// or (for cross-key constraints) a path into the same document.
#[derive(Clone, Debug, PartialEq)]
pub enum ConstraintValue {
    Literal(Literal),
    Path(Path),
}

impl fmt::Display for ConstraintValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintValue::Literal(lit) => write!(f, "{lit}"),
            ConstraintValue::Path(path) => write!(f, "{path}"),
        }
    }
}

/// `(op, value)` (spec §3 "Atomic constraint").
#[derive(Clone, Debug, PartialEq)]
pub struct AtomicConstraint {
    pub op: String,
    pub value: ConstraintValue,
}

impl AtomicConstraint {
    pub fn new(op: impl Into<String>, value: ConstraintValue) -> Self {
        Self {
            op: op.into(),
            value,
        }
    }

    pub fn literal(op: impl Into<String>, lit: Literal) -> Self {
        Self::new(op, ConstraintValue::Literal(lit))
    }
}

impl fmt::Display for AtomicConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {}]", self.op, self.value)
    }
}

/// A constraint slot: either still open, or refuted and carrying its witness.
#[derive(Clone, Debug, PartialEq)]
pub enum Constraint {
    Atom(AtomicConstraint),
    /// `conflict(inner, witness)` (spec §3).
    Conflict {
        inner: AtomicConstraint,
        witness: Value,
    },
}

impl Constraint {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Constraint::Conflict { .. })
    }

    pub fn atom(&self) -> &AtomicConstraint {
        match self {
            Constraint::Atom(a) => a,
            Constraint::Conflict { inner, .. } => inner,
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Atom(a) => write!(f, "{a}"),
            Constraint::Conflict { inner, witness } => {
                write!(f, "[:conflict {inner} {witness}]")
            }
        }
    }
}

/// Constructs a [`Constraint::Conflict`] (spec §4.1 "Conflict construction").
pub fn conflict(inner: AtomicConstraint, witness: Value) -> Constraint {
    Constraint::Conflict { inner, witness }
}

/// A relational constraint between two paths of the same document, not
/// reducible to a single path.
#[derive(Clone, Debug, PartialEq)]
pub struct CrossKeyConstraint {
    pub left: Path,
    pub op: String,
    pub right: Path,
}

/// Why symbolic reasoning was suspended at some subexpression.
#[derive(Clone, Debug, PartialEq)]
pub enum Reason {
    /// `negate(satisfied)`.
    NotSatisfiable,
    /// `negate` of an open or mixed residual.
    NegateOpen,
    /// `combine` of two residuals that were not jointly satisfied — the
    /// disjunction of the two branches is not decidable in constraint form.
    Or(Box<Residual>, Box<Residual>),
    UnknownOperator { op: String },
    SelfMissing,
    ParamUnbound { name: String },
    EventMissing,
    NoRegistry,
    UnknownPolicy { namespace: String, name: String },
    LetBindingResidual,
    PartialCount,
    /// Negation of a node that has no syntactic negation (C8).
    NonNegatable,
    OpFailed { op: String },
    /// Computed-field cycle or other hard condition folded into a complex
    /// marker instead of propagated further (used sparingly; most hard
    /// errors are returned as `EvalError`, not a marker).
    Other(String),
    /// More than one complex marker was merged into this residual (spec
    /// models a single "complex marker" slot; merging two markers composes
    /// them here rather than discarding one).
    Multiple(Vec<ComplexMarker>),
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::NotSatisfiable => write!(f, ":not-satisfiable"),
            Reason::NegateOpen => write!(f, ":negate-open"),
            Reason::Or(..) => write!(f, ":or"),
            Reason::UnknownOperator { op } => write!(f, ":unknown-operator {op}"),
            Reason::SelfMissing => write!(f, ":self :missing"),
            Reason::ParamUnbound { name } => write!(f, ":param :unbound {name}"),
            Reason::EventMissing => write!(f, ":event :missing"),
            Reason::NoRegistry => write!(f, ":no-registry"),
            Reason::UnknownPolicy { namespace, name } => {
                write!(f, ":unknown-policy {namespace}/{name}")
            }
            Reason::LetBindingResidual => write!(f, ":let-binding-residual"),
            Reason::PartialCount => write!(f, ":partial-count"),
            Reason::NonNegatable => write!(f, ":non-negatable"),
            Reason::OpFailed { op } => write!(f, ":op-failed {op}"),
            Reason::Other(msg) => write!(f, ":{msg}"),
            Reason::Multiple(_) => write!(f, ":multiple"),
        }
    }
}

/// A complex marker: a reason plus the subtree where reasoning was
/// suspended, if any (spec §3 "AST node... captured subtree").
#[derive(Clone, Debug, PartialEq)]
pub struct ComplexMarker {
    pub reason: Reason,
    pub subtree: Option<Box<AstNode>>,
}

impl ComplexMarker {
    pub fn new(reason: Reason) -> Self {
        Self {
            reason,
            subtree: None,
        }
    }

    pub fn with_subtree(reason: Reason, subtree: AstNode) -> Self {
        Self {
            reason,
            subtree: Some(Box::new(subtree)),
        }
    }
}

/// The four-valued outcome of evaluating a policy (spec §4.1 "Result kinds").
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResultKind {
    Satisfied,
    Contradicted,
    Open,
    Complex,
}

impl fmt::Display for Residual {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_satisfied() {
            return write!(f, "{{}}");
        }
        write!(f, "{{")?;
        let mut first = true;
        for (path, list) in &self.constraints {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "[{path}]: [")?;
            for (i, constraint) in list.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{constraint}")?;
            }
            write!(f, "]")?;
        }
        for cross in &self.cross_key {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "[{} {} {}]", cross.left, cross.op, cross.right)?;
        }
        if let Some(marker) = &self.complex {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}", marker.reason)?;
        }
        write!(f, "}}")
    }
}

/// The remainder of a policy after partial evaluation (spec §3 "Residual").
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Residual {
    constraints: BTreeMap<Path, Vec<Constraint>>,
    cross_key: Vec<CrossKeyConstraint>,
    complex: Option<ComplexMarker>,
    has_conflict: bool,
}

impl Residual {
    /// The empty residual: *satisfied*.
    pub fn satisfied() -> Self {
        Self::default()
    }

    /// A residual carrying only a complex marker.
    pub fn complex(marker: ComplexMarker) -> Self {
        Self {
            complex: Some(marker),
            ..Self::default()
        }
    }

    /// `conflict-residual(path, op-constraint, witness)` (spec §4.1).
    pub fn conflict_at(path: Path, atom: AtomicConstraint, witness: Value) -> Self {
        let mut residual = Self::default();
        residual
            .constraints
            .insert(path, vec![conflict(atom, witness)]);
        residual.has_conflict = true;
        residual
    }

    /// An open residual asserting a single atomic constraint at `path`.
    pub fn open_at(path: Path, atom: AtomicConstraint) -> Self {
        let mut residual = Self::default();
        residual.constraints.insert(path, vec![Constraint::Atom(atom)]);
        residual
    }

    /// A residual carrying a single cross-key constraint.
    pub fn cross_key(left: Path, op: impl Into<String>, right: Path) -> Self {
        let mut residual = Self::default();
        residual.cross_key.push(CrossKeyConstraint {
            left,
            op: op.into(),
            right,
        });
        residual
    }

    pub fn constraints(&self) -> &BTreeMap<Path, Vec<Constraint>> {
        &self.constraints
    }

    pub fn cross_key_constraints(&self) -> &[CrossKeyConstraint] {
        &self.cross_key
    }

    pub fn complex_marker(&self) -> Option<&ComplexMarker> {
        self.complex.as_ref()
    }

    /// O(1) conflict check, accelerated by the `has_conflict` flag (spec
    /// §4.1 "additionally sets a `::conflict` flag to accelerate
    /// `has-conflicts?`").
    pub fn has_conflicts(&self) -> bool {
        self.has_conflict
    }

    pub fn is_satisfied(&self) -> bool {
        self.constraints.is_empty() && self.cross_key.is_empty() && self.complex.is_none()
    }

    pub fn is_contradicted(&self) -> bool {
        self.has_conflict && self.complex.is_none()
    }

    pub fn is_complex(&self) -> bool {
        self.complex.is_some()
    }

    pub fn is_open(&self) -> bool {
        !self.is_satisfied() && !self.is_contradicted() && !self.is_complex()
    }

    /// Maps this residual onto the four-valued result lattice.
    pub fn kind(&self) -> ResultKind {
        if self.is_complex() {
            ResultKind::Complex
        } else if self.is_contradicted() {
            ResultKind::Contradicted
        } else if self.is_satisfied() {
            ResultKind::Satisfied
        } else {
            ResultKind::Open
        }
    }

    /// Returns true if every constraint in this residual is refuted and no
    /// open or cross-key constraint remains — the residual is a *pure*
    /// contradiction, the precondition for `negate` to yield *satisfied*.
    fn is_pure_contradiction(&self) -> bool {
        self.has_conflict
            && self.complex.is_none()
            && self.cross_key.is_empty()
            && self
                .constraints
                .values()
                .all(|list| list.iter().all(Constraint::is_conflict))
    }

    /// `add-constraint(path, atom)` — a pure transformation.
    pub fn add_constraint(&self, path: Path, constraint: Constraint) -> Self {
        let mut next = self.clone();
        if constraint.is_conflict() {
            next.has_conflict = true;
        }
        next.constraints.entry(path).or_default().push(constraint);
        next
    }

    /// `remove-path(path)` — a pure transformation.
    pub fn remove_path(&self, path: &Path) -> Self {
        let mut next = self.clone();
        next.constraints.remove(path);
        next.has_conflict = next
            .constraints
            .values()
            .any(|list| list.iter().any(Constraint::is_conflict));
        next
    }

    /// `map-constraints(f)` — a pure transformation.
    pub fn map_constraints(&self, f: impl Fn(&Constraint) -> Constraint) -> Self {
        let mut next = self.clone();
        for list in next.constraints.values_mut() {
            for c in list.iter_mut() {
                *c = f(c);
            }
        }
        next.has_conflict = next
            .constraints
            .values()
            .any(|list| list.iter().any(Constraint::is_conflict));
        next
    }

    /// `merge(a, b)` (AND): contradiction dominates; else unions the
    /// per-path constraint lists by appending (not set-union) and the
    /// reserved slots.
    pub fn merge(&self, other: &Residual) -> Residual {
        if self.is_contradicted() {
            return self.clone();
        }
        if other.is_contradicted() {
            return other.clone();
        }
        let mut constraints = self.constraints.clone();
        for (path, list) in &other.constraints {
            constraints.entry(path.clone()).or_default().extend(list.iter().cloned());
        }
        let mut cross_key = self.cross_key.clone();
        cross_key.extend(other.cross_key.iter().cloned());
        let complex = merge_complex(self.complex.clone(), other.complex.clone());
        let has_conflict = constraints
            .values()
            .any(|list| list.iter().any(Constraint::is_conflict));
        Residual {
            constraints,
            cross_key,
            complex,
            has_conflict,
        }
    }

    /// `combine(a, b)` (OR): satisfied dominates; otherwise a `:or` complex
    /// marker over the two branches (two contradictions included: the
    /// engine cannot prove the disjunction refuted without case analysis —
    /// spec §9 "keep this behavior").
    pub fn combine(&self, other: &Residual) -> Residual {
        if self.is_satisfied() {
            return self.clone();
        }
        if other.is_satisfied() {
            return other.clone();
        }
        Residual::complex(ComplexMarker::new(Reason::Or(
            Box::new(self.clone()),
            Box::new(other.clone()),
        )))
    }

    /// `negate(residual)` (C1, value-level; see [`crate::negate`] for the
    /// syntactic, AST-level transformer, C8).
    pub fn negate(&self) -> Residual {
        if self.is_satisfied() {
            Residual::complex(ComplexMarker::new(Reason::NotSatisfiable))
        } else if self.is_pure_contradiction() {
            Residual::satisfied()
        } else {
            Residual::complex(ComplexMarker::new(Reason::NegateOpen))
        }
    }
}

fn merge_complex(a: Option<ComplexMarker>, b: Option<ComplexMarker>) -> Option<ComplexMarker> {
    match (a, b) {
        (None, None) => None,
        (Some(m), None) | (None, Some(m)) => Some(m),
        (Some(a), Some(b)) => {
            let mut members = Vec::new();
            match a.reason {
                Reason::Multiple(inner) => members.extend(inner),
                _ => members.push(a),
            }
            match b.reason {
                Reason::Multiple(inner) => members.extend(inner),
                _ => members.push(b),
            }
            Some(ComplexMarker::new(Reason::Multiple(members)))
        }
    }
}

/// Flattened `(path, constraint)` pairs, in path order then per-path
/// insertion order (spec §6 `residual->constraints`).
pub fn residual_to_constraints(residual: &Residual) -> Vec<(Path, Constraint)> {
    let mut out = Vec::new();
    for (path, list) in residual.constraints() {
        for c in list {
            out.push((path.clone(), c.clone()));
        }
    }
    out
}

/// Inverse of [`residual_to_constraints`]: groups `(path, constraint)` pairs
/// by path, preserving within-path order (spec §6 `constraints->residual`).
pub fn constraints_to_residual(pairs: &[(Path, Constraint)]) -> Residual {
    let mut residual = Residual::default();
    for (path, constraint) in pairs {
        residual = residual.add_constraint(path.clone(), constraint.clone());
    }
    residual
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eq_atom() -> AtomicConstraint {
        AtomicConstraint::literal("=", Literal::Str("admin".into()))
    }

    #[test]
    fn merge_identity() {
        let r = Residual::open_at(Path::field("role"), eq_atom());
        assert_eq!(Residual::satisfied().merge(&r), r);
        assert_eq!(r.merge(&Residual::satisfied()), r);
    }

    #[test]
    fn merge_contradiction_dominates() {
        let contradiction =
            Residual::conflict_at(Path::field("role"), eq_atom(), Value::Str("guest".into()));
        let open = Residual::open_at(Path::field("age"), eq_atom());
        assert_eq!(contradiction.merge(&open), contradiction);
        assert_eq!(open.merge(&contradiction), contradiction);
    }

    #[test]
    fn combine_satisfied_dominates() {
        let open = Residual::open_at(Path::field("age"), eq_atom());
        assert_eq!(Residual::satisfied().combine(&open), Residual::satisfied());
        assert_eq!(open.combine(&Residual::satisfied()), Residual::satisfied());
    }

    #[test]
    fn combine_idempotent_on_equal_values() {
        let open = Residual::open_at(Path::field("age"), eq_atom());
        let combined = open.combine(&open);
        assert!(combined.is_complex());
    }

    #[test]
    fn combine_two_contradictions_is_complex_not_contradiction() {
        let a = Residual::conflict_at(Path::field("x"), eq_atom(), Value::Int(1));
        let b = Residual::conflict_at(Path::field("y"), eq_atom(), Value::Int(2));
        let combined = a.combine(&b);
        assert!(combined.is_complex());
        assert!(!combined.is_contradicted());
    }

    #[test]
    fn negate_pure_contradiction_is_satisfied() {
        let contradiction =
            Residual::conflict_at(Path::field("role"), eq_atom(), Value::Str("guest".into()));
        assert_eq!(contradiction.negate(), Residual::satisfied());
    }

    #[test]
    fn negate_satisfied_is_complex() {
        assert!(Residual::satisfied().negate().is_complex());
    }

    #[test]
    fn negate_open_is_complex() {
        let open = Residual::open_at(Path::field("age"), eq_atom());
        assert!(open.negate().is_complex());
    }

    #[test]
    fn display_of_satisfied_is_empty_braces() {
        assert_eq!(Residual::satisfied().to_string(), "{}");
    }

    #[test]
    fn display_renders_conflict_with_witness() {
        let r = Residual::conflict_at(Path::field("role"), eq_atom(), Value::Str("guest".into()));
        assert_eq!(r.to_string(), r#"{[role]: [[:conflict [= "admin"] "guest"]]}"#);
    }

    #[test]
    fn round_trip_preserves_per_path_order() {
        let r = Residual::open_at(Path::field("age"), eq_atom())
            .add_constraint(Path::field("age"), Constraint::Atom(eq_atom()));
        let pairs = residual_to_constraints(&r);
        let back = constraints_to_residual(&pairs);
        assert_eq!(back, r);
    }
}
