//! The normalizing compiler (spec §4.6): rewrites a pure-conjunction AST into
//! a constraint set — a `Path -> Vec<AtomicConstraint>` map with per-path
//! bounds tightened and local (document-independent) contradictions caught
//! up front, ahead of unification.
//!
//! Only conjunctions of plain `doc`/`self` comparisons normalize; anything
//! built from `or`, `not`, quantifiers or policy references is left for the
//! unification engine to evaluate directly (spec §4.6 "not every policy
//! normalizes; the evaluator falls back to interpretation").

use crate::error::CompileError;
use crate::residual::{AtomicConstraint, ConstraintValue};
use polix_ast::{AstNode, Literal, Node, Path, SourcePos, Spanned};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A local, document-independent contradiction caught while tightening bounds
/// (spec §4.6 step 4 "detect contradiction ... return the contradiction
/// sentinel"): a value carried on the [`ConstraintSet`], not an error — the
/// set still compiles and evaluates, just always to a conflict.
#[derive(Clone, Debug, PartialEq)]
pub struct Contradiction {
    pub path: Path,
    pub atom: AtomicConstraint,
    pub witness: Literal,
    pub detail: String,
}

/// A normalized policy body: per-path atomic constraints, ordered by
/// insertion and tightened against each other.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConstraintSet {
    constraints: BTreeMap<Path, Vec<AtomicConstraint>>,
    contradiction: Option<Contradiction>,
}

impl ConstraintSet {
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.constraints.keys()
    }

    pub fn get(&self, path: &Path) -> &[AtomicConstraint] {
        self.constraints.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, &[AtomicConstraint])> {
        self.constraints.iter().map(|(p, c)| (p, c.as_slice()))
    }

    /// The first local contradiction detected while building this set, if
    /// any — a constraint-set with a contradiction evaluates to a conflict
    /// residual for every document, since no document can ever satisfy it.
    pub fn contradiction(&self) -> Option<&Contradiction> {
        self.contradiction.as_ref()
    }

    fn insert(&mut self, path: Path, atom: AtomicConstraint) {
        if self.contradiction.is_some() {
            return;
        }
        let slot = self.constraints.entry(path.clone()).or_default();
        if let Some(contradiction) = tighten(slot, atom, path) {
            self.contradiction = Some(contradiction);
        }
    }
}

impl fmt::Display for ConstraintSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(c) = &self.contradiction {
            return write!(f, "{{:contradiction {} at [{}]: {}}}", c.atom, c.path, c.detail);
        }
        write!(f, "{{")?;
        for (i, (path, atoms)) in self.constraints.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "[{path}]: [")?;
            for (j, atom) in atoms.iter().enumerate() {
                if j > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{atom}")?;
            }
            write!(f, "]")?;
        }
        write!(f, "}}")
    }
}

/// Inserts `atom` into `slot`, tightening numeric bounds and detecting atoms
/// that locally contradict what is already known about this path (spec §4.6
/// "bound tightening" / "detect contradiction").
fn tighten(slot: &mut Vec<AtomicConstraint>, atom: AtomicConstraint, path: Path) -> Option<Contradiction> {
    if let ConstraintValue::Literal(new_lit) = &atom.value {
        for existing in slot.iter() {
            let ConstraintValue::Literal(existing_lit) = &existing.value else {
                continue;
            };
            if let Some(detail) = locally_contradictory(&existing.op, existing_lit, &atom.op, new_lit) {
                return Some(Contradiction {
                    path,
                    atom: existing.clone(),
                    witness: new_lit.clone(),
                    detail,
                });
            }
        }
        if let Some(idx) = slot.iter().position(|existing| existing.op == atom.op) {
            if let ConstraintValue::Literal(existing_lit) = &slot[idx].value {
                if let Some(tighter) = tighter_bound(&atom.op, existing_lit, new_lit) {
                    slot[idx] = AtomicConstraint::literal(atom.op.clone(), tighter);
                    return None;
                }
            }
        }
    }
    slot.push(atom);
    None
}

/// Returns a description of the contradiction if `a` and `b` can never both
/// hold for the same value, independent of any document.
fn locally_contradictory(op_a: &str, a: &Literal, op_b: &str, b: &Literal) -> Option<String> {
    match (op_a, op_b) {
        ("=", "=") => (a != b).then(|| format!("= {a} and = {b}")),
        ("=", "!=") | ("!=", "=") => (a == b).then(|| format!("= {a} and != {a}")),
        ("=", "<") | ("<", "=") => {
            matches!(a.partial_compare(b), Some(Ordering::Greater) | Some(Ordering::Equal))
                .then(|| format!("= {a} cannot also satisfy < {b}"))
        }
        ("=", ">") | (">", "=") => {
            matches!(a.partial_compare(b), Some(Ordering::Less) | Some(Ordering::Equal))
                .then(|| format!("= {a} cannot also satisfy > {b}"))
        }
        ("<", ">") | (">", "<") => {
            let (lt, gt) = if op_a == "<" { (a, b) } else { (b, a) };
            matches!(gt.partial_compare(lt), Some(Ordering::Greater) | Some(Ordering::Equal))
                .then(|| format!("< {lt} and > {gt} admit no value"))
        }
        ("<=", ">") | (">", "<=") => {
            let (le, gt) = if op_a == "<=" { (a, b) } else { (b, a) };
            matches!(gt.partial_compare(le), Some(Ordering::Greater) | Some(Ordering::Equal))
                .then(|| format!("<= {le} and > {gt} admit no value"))
        }
        ("<", ">=") | (">=", "<") => {
            let (lt, ge) = if op_a == "<" { (a, b) } else { (b, a) };
            matches!(ge.partial_compare(lt), Some(Ordering::Greater) | Some(Ordering::Equal))
                .then(|| format!("< {lt} and >= {ge} admit no value"))
        }
        ("=", "in") | ("in", "=") => {
            let (scalar, set_lit) = if op_a == "=" { (a, b) } else { (b, a) };
            let set = set_lit.as_set()?;
            (!set.contains(scalar)).then(|| format!("= {scalar} is not a member of in {set_lit}"))
        }
        ("=", "not-in") | ("not-in", "=") => {
            let (scalar, set_lit) = if op_a == "=" { (a, b) } else { (b, a) };
            let set = set_lit.as_set()?;
            set.contains(scalar).then(|| format!("= {scalar} is a member of not-in {set_lit}"))
        }
        ("in", "in") => {
            let set_a = a.as_set()?;
            let set_b = b.as_set()?;
            set_a
                .iter()
                .all(|m| !set_b.contains(m))
                .then(|| format!("in {a} and in {b} share no member"))
        }
        _ => None,
    }
}

/// Returns the tighter of two bounds sharing the same operator, or `None` if
/// they are incomparable (left as two separate atoms).
fn tighter_bound(op: &str, existing: &Literal, new: &Literal) -> Option<Literal> {
    match op {
        "<" | "<=" => {
            let ord = existing.partial_compare(new)?;
            Some(if ord == Ordering::Greater { new.clone() } else { existing.clone() })
        }
        ">" | ">=" => {
            let ord = existing.partial_compare(new)?;
            Some(if ord == Ordering::Less { new.clone() } else { existing.clone() })
        }
        // Two `in` constraints on the same path admit only their shared
        // members; two `not-in` constraints exclude the union of both.
        "in" => {
            let a = existing.as_set()?;
            let b = new.as_set()?;
            Some(Literal::Set(a.iter().filter(|m| b.contains(m)).cloned().collect()))
        }
        "not-in" => {
            let a = existing.as_set()?;
            let b = new.as_set()?;
            let mut union = a.to_vec();
            for member in b {
                if !union.contains(member) {
                    union.push(member.clone());
                }
            }
            Some(Literal::Set(union))
        }
        _ => None,
    }
}

/// Attempts to normalize `node` into a [`ConstraintSet`]. Returns
/// `Ok(None)` (not an error) for nodes that are structurally not a pure
/// conjunction of doc/self comparisons — callers fall back to interpretation.
/// A *locally contradictory* conjunction still normalizes successfully; the
/// contradiction is carried as data on the returned set (see
/// [`ConstraintSet::contradiction`]), never as an `Err`. `CompileError` is
/// reserved for genuine structural failures elsewhere in compilation.
pub fn normalize(node: &polix_ast::AstNode) -> Result<Option<ConstraintSet>, CompileError> {
    let mut set = ConstraintSet::default();
    if collect(node, &mut set) {
        Ok(Some(set))
    } else {
        Ok(None)
    }
}

/// Returns `true` if `node` was fully absorbed into `set`.
fn collect(node: &polix_ast::AstNode, set: &mut ConstraintSet) -> bool {
    match &node.node {
        Node::FunctionCall { op, args } if op == "and" => {
            for arg in args {
                if !collect(arg, set) {
                    return false;
                }
            }
            true
        }
        Node::FunctionCall { op, args } if op == "not" => {
            // A syntactically negatable subexpression (C8) still normalizes;
            // a bare structural `not` over something non-negatable does not.
            match args.first().and_then(crate::negate::negate) {
                Some(rewritten) => collect(&rewritten, set),
                None => false,
            }
        }
        Node::FunctionCall { op, args } if is_comparison(op) => {
            let (Some(lhs), Some(rhs)) = (args.first(), args.get(1)) else {
                return false;
            };
            let path = match &lhs.node {
                Node::DocAccessor(p) | Node::SelfAccessor(p) => p.clone(),
                _ => return false,
            };
            let lit = match &rhs.node {
                Node::Literal(lit) | Node::LiteralWrapper(lit) => lit.clone(),
                _ => return false,
            };
            set.insert(path, AtomicConstraint::literal(op.clone(), lit));
            true
        }
        _ => false,
    }
}

fn is_comparison(op: &str) -> bool {
    polix_ast::COMPARISON_OPS.contains(&op)
        || polix_ast::MEMBERSHIP_OPS.contains(&op)
        || polix_ast::PATTERN_OPS.contains(&op)
}

/// Reconstructs a policy body from a [`ConstraintSet`] (spec §6
/// `result->policy`), the inverse of [`normalize`] for whatever a
/// constraint-set can express: a conjunction of `doc` comparisons. An empty
/// set round-trips to the literal `true`, matching `normalize`'s treatment
/// of an empty conjunction as trivially satisfied. A contradictory set
/// round-trips to the literal `false`, the AST analogue of spec §6's
/// `:contradiction` marker for a refuted result.
pub fn result_to_policy(set: &ConstraintSet) -> AstNode {
    if set.contradiction.is_some() {
        return spanned(Node::Literal(Literal::Bool(false)));
    }
    let mut conjuncts = Vec::new();
    for (path, atoms) in set.iter() {
        for atom in atoms {
            let lit = match &atom.value {
                ConstraintValue::Literal(lit) => lit.clone(),
                ConstraintValue::Path(_) => continue,
            };
            conjuncts.push(spanned(Node::FunctionCall {
                op: atom.op.clone(),
                args: vec![spanned(Node::DocAccessor(path.clone())), spanned(Node::Literal(lit))],
            }));
        }
    }
    match conjuncts.len() {
        0 => spanned(Node::Literal(Literal::Bool(true))),
        1 => conjuncts.into_iter().next().expect("checked len == 1"),
        _ => spanned(Node::FunctionCall { op: "and".into(), args: conjuncts }),
    }
}

fn spanned(node: Node) -> AstNode {
    Spanned::new(node, SourcePos::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use polix_ast::{Node, SourcePos, Spanned};

    fn span(node: Node) -> polix_ast::AstNode {
        Spanned::new(node, SourcePos::default())
    }

    fn cmp(op: &str, field: &str, lit: Literal) -> polix_ast::AstNode {
        span(Node::FunctionCall {
            op: op.into(),
            args: vec![span(Node::DocAccessor(Path::field(field))), span(Node::Literal(lit))],
        })
    }

    #[test]
    fn conjunction_normalizes_to_two_paths() {
        let node = span(Node::FunctionCall {
            op: "and".into(),
            args: vec![cmp("=", "role", Literal::Str("admin".into())), cmp("<", "age", Literal::Int(65))],
        });
        let set = normalize(&node).unwrap().unwrap();
        assert_eq!(set.get(&Path::field("role")).len(), 1);
        assert_eq!(set.get(&Path::field("age")).len(), 1);
    }

    #[test]
    fn tightens_duplicate_bound() {
        let node = span(Node::FunctionCall {
            op: "and".into(),
            args: vec![cmp("<", "age", Literal::Int(65)), cmp("<", "age", Literal::Int(40))],
        });
        let set = normalize(&node).unwrap().unwrap();
        let atoms = set.get(&Path::field("age"));
        assert_eq!(atoms.len(), 1);
        assert_eq!(atoms[0].value, ConstraintValue::Literal(Literal::Int(40)));
    }

    #[test]
    fn detects_local_contradiction() {
        let node = span(Node::FunctionCall {
            op: "and".into(),
            args: vec![cmp("=", "age", Literal::Int(10)), cmp("=", "age", Literal::Int(20))],
        });
        let set = normalize(&node).unwrap().unwrap();
        let contradiction = set.contradiction().expect("locally contradictory");
        assert_eq!(contradiction.path, Path::field("age"));
    }

    #[test]
    fn intersects_two_in_constraints() {
        let set_a = Literal::Set(vec![Literal::Str("a".into()), Literal::Str("b".into())]);
        let set_b = Literal::Set(vec![Literal::Str("b".into()), Literal::Str("c".into())]);
        let node = span(Node::FunctionCall {
            op: "and".into(),
            args: vec![cmp("in", "role", set_a), cmp("in", "role", set_b)],
        });
        let set = normalize(&node).unwrap().unwrap();
        let atoms = set.get(&Path::field("role"));
        assert_eq!(atoms.len(), 1);
        assert_eq!(
            atoms[0].value,
            ConstraintValue::Literal(Literal::Set(vec![Literal::Str("b".into())]))
        );
    }

    #[test]
    fn disjoint_in_constraints_are_contradictory() {
        let set_a = Literal::Set(vec![Literal::Str("a".into())]);
        let set_b = Literal::Set(vec![Literal::Str("b".into())]);
        let node = span(Node::FunctionCall {
            op: "and".into(),
            args: vec![cmp("in", "role", set_a), cmp("in", "role", set_b)],
        });
        let set = normalize(&node).unwrap().unwrap();
        assert!(set.contradiction().is_some());
    }

    #[test]
    fn equality_outside_in_set_is_contradictory() {
        let set = Literal::Set(vec![Literal::Str("admin".into())]);
        let node = span(Node::FunctionCall {
            op: "and".into(),
            args: vec![cmp("=", "role", Literal::Str("guest".into())), cmp("in", "role", set)],
        });
        let set = normalize(&node).unwrap().unwrap();
        assert!(set.contradiction().is_some());
    }

    #[test]
    fn equality_inside_not_in_set_is_contradictory() {
        let set = Literal::Set(vec![Literal::Str("guest".into())]);
        let node = span(Node::FunctionCall {
            op: "and".into(),
            args: vec![cmp("=", "role", Literal::Str("guest".into())), cmp("not-in", "role", set)],
        });
        let set = normalize(&node).unwrap().unwrap();
        assert!(set.contradiction().is_some());
    }

    #[test]
    fn or_is_not_normalizable() {
        let node = span(Node::FunctionCall {
            op: "or".into(),
            args: vec![cmp("=", "role", Literal::Str("admin".into()))],
        });
        assert_eq!(normalize(&node).unwrap(), None);
    }

    #[test]
    fn result_to_policy_round_trips_through_normalize() {
        let node = span(Node::FunctionCall {
            op: "and".into(),
            args: vec![cmp("=", "role", Literal::Str("admin".into())), cmp("<", "age", Literal::Int(65))],
        });
        let set = normalize(&node).unwrap().unwrap();
        let rebuilt = result_to_policy(&set);
        let reparsed = normalize(&rebuilt).unwrap().unwrap();
        assert_eq!(reparsed, set);
    }

    #[test]
    fn result_to_policy_of_empty_set_is_true() {
        let policy = result_to_policy(&ConstraintSet::default());
        assert!(matches!(policy.node, Node::Literal(Literal::Bool(true))));
    }

    #[test]
    fn result_to_policy_of_contradictory_set_is_false() {
        let node = span(Node::FunctionCall {
            op: "and".into(),
            args: vec![cmp("=", "age", Literal::Int(10)), cmp("=", "age", Literal::Int(20))],
        });
        let set = normalize(&node).unwrap().unwrap();
        let policy = result_to_policy(&set);
        assert!(matches!(policy.node, Node::Literal(Literal::Bool(false))));
    }

    #[test]
    fn contradiction_never_surfaces_as_a_compile_error() {
        let node = span(Node::FunctionCall {
            op: "and".into(),
            args: vec![cmp("=", "age", Literal::Int(10)), cmp("=", "age", Literal::Int(20))],
        });
        assert!(normalize(&node).is_ok());
    }

    #[test]
    fn display_renders_each_path_and_atom() {
        let node = span(Node::FunctionCall {
            op: "=".into(),
            args: vec![span(Node::DocAccessor(Path::field("role"))), span(Node::Literal(Literal::Str("admin".into())))],
        });
        let set = normalize(&node).unwrap().unwrap();
        assert_eq!(set.to_string(), r#"{[role]: [[= "admin"]]}"#);
    }
}
