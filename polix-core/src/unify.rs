//! The unification engine (spec §4.5): walks an AST against a document,
//! producing a [`Residual`] rather than a plain boolean, so that missing or
//! ambiguous document fields are reported as *open* instead of forcing a
//! premature true/false answer.

use crate::error::EvalError;
use crate::module::ModuleRegistry;
use crate::operator::{self, is_value_operator, OperatorRegistry};
use crate::residual::{
    conflict, AtomicConstraint, Constraint, ConstraintValue, Reason, Residual,
};
use polix_ast::{Literal, Node, Path, QuantifierBinding, QuantifierKind, Segment, Value};
use std::collections::BTreeMap;

/// Upper bound on computed-field expansion depth. A document whose computed
/// fields nest (or recurse) past this depth is treated as a cycle rather
/// than walked forever (spec §4.5 "computed-field cycle detection").
const MAX_COMPUTED_DEPTH: usize = 32;

/// Bound, read-only context for one evaluation: the subject document, the
/// optional `param`/`event` inputs, the enclosing quantifier/let bindings,
/// and the module registry policy references resolve through.
#[derive(Clone)]
pub struct Scope<'a> {
    pub doc: &'a Value,
    pub params: Option<BTreeMap<String, Value>>,
    pub event: Option<&'a Value>,
    pub registry: Option<&'a ModuleRegistry>,
    pub operators: Option<&'a OperatorRegistry>,
    bindings: Vec<(String, Value)>,
}

impl<'a> Scope<'a> {
    pub fn new(doc: &'a Value) -> Self {
        Self {
            doc,
            params: None,
            event: None,
            registry: None,
            operators: None,
            bindings: Vec::new(),
        }
    }

    pub fn with_params(mut self, params: BTreeMap<String, Value>) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_event(mut self, event: &'a Value) -> Self {
        self.event = Some(event);
        self
    }

    pub fn with_registry(mut self, registry: &'a ModuleRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_operators(mut self, operators: &'a OperatorRegistry) -> Self {
        self.operators = Some(operators);
        self
    }

    fn child_with_binding(&self, name: String, value: Value) -> Scope<'a> {
        let mut child = self.clone();
        child.bindings.push((name, value));
        child
    }

    fn lookup_binding(&self, namespace: &str) -> Option<&Value> {
        self.bindings
            .iter()
            .rev()
            .find(|(name, _)| name == namespace)
            .map(|(_, v)| v)
    }
}

/// Walks `path` from `root`, expanding any [`Value::Computed`] leaf it lands
/// on (and any computed value *that* expands to, bounded by
/// [`MAX_COMPUTED_DEPTH`]) into a plain scalar, per Open Question 3 (computed
/// fields must reduce to a scalar; see DESIGN.md).
fn resolve_path(scope: &Scope, root: &Value, path: &Path) -> Result<Option<Value>, EvalError> {
    let mut current = root;
    for seg in path.iter() {
        current = match seg {
            Segment::Field(name) => match current.get_field(name) {
                Some(v) => v,
                None => return Ok(None),
            },
            Segment::Index(i) => match current.get_index(*i) {
                Some(v) => v,
                None => return Ok(None),
            },
        };
    }
    expand_computed(scope, current, path, 0)
}

fn expand_computed(
    scope: &Scope,
    value: &Value,
    path: &Path,
    depth: usize,
) -> Result<Option<Value>, EvalError> {
    match value {
        Value::Computed(node) => {
            if depth >= MAX_COMPUTED_DEPTH {
                return Err(EvalError::ComputedFieldCycle(path.clone()));
            }
            match eval_scalar(node, scope, depth + 1)? {
                Some(v) => expand_computed(scope, &v, path, depth + 1),
                None => Ok(None),
            }
        }
        other => Ok(Some(other.clone())),
    }
}

/// Evaluates a node expected to reduce to a scalar document value: an
/// accessor or literal. Used for computed-field bodies and `let`/parameter
/// binding expressions.
fn eval_scalar(node: &polix_ast::AstNode, scope: &Scope, depth: usize) -> Result<Option<Value>, EvalError> {
    match &node.node {
        Node::Literal(lit) | Node::LiteralWrapper(lit) => Ok(Some(Value::from(lit.clone()))),
        Node::DocAccessor(path) | Node::SelfAccessor(path) => {
            let resolved = resolve_path(scope, scope.doc, path)?;
            match resolved {
                Some(Value::Computed(inner)) => {
                    if depth >= MAX_COMPUTED_DEPTH {
                        return Err(EvalError::ComputedFieldCycle(path.clone()));
                    }
                    eval_scalar(&inner, scope, depth + 1)
                }
                other => Ok(other),
            }
        }
        Node::EventAccessor(path) => match scope.event {
            Some(event) => resolve_path(scope, event, path),
            None => Ok(None),
        },
        Node::ParamAccessor(name) => Ok(scope.params.as_ref().and_then(|p| p.get(name)).cloned()),
        Node::BindingAccessor { namespace, path } => match scope.lookup_binding(namespace) {
            Some(root) => resolve_path(scope, root, path),
            None => Err(EvalError::UnboundName(namespace.clone())),
        },
        _ => Err(EvalError::NonScalarComputed { path: Path::new() }),
    }
}

/// Resolves an accessor node (not `FunctionCall`) to a value.
fn eval_accessor(node: &Node, scope: &Scope) -> Result<Option<Value>, EvalError> {
    match node {
        Node::DocAccessor(path) => resolve_path(scope, scope.doc, path),
        Node::SelfAccessor(path) => resolve_path(scope, scope.doc, path),
        Node::EventAccessor(path) => match scope.event {
            Some(event) => resolve_path(scope, event, path),
            None => Ok(None),
        },
        Node::ParamAccessor(name) => Ok(scope.params.as_ref().and_then(|p| p.get(name)).cloned()),
        Node::BindingAccessor { namespace, path } => {
            let root = scope
                .lookup_binding(namespace)
                .ok_or_else(|| EvalError::UnboundName(namespace.clone()))?
                .clone();
            resolve_path(scope, &root, path)
        }
        _ => Ok(None),
    }
}

fn doc_path_of(node: &Node) -> Option<&Path> {
    match node {
        Node::DocAccessor(path) => Some(path),
        _ => None,
    }
}

/// Evaluates `node` against `scope`, producing a residual.
pub fn unify(node: &polix_ast::AstNode, scope: &Scope) -> Result<Residual, EvalError> {
    match &node.node {
        Node::Literal(lit) => Ok(unify_literal_truth(lit)),
        Node::LiteralWrapper(lit) => Ok(unify_literal_truth(lit)),
        Node::FunctionCall { op, args } => unify_call(op, args, scope),
        Node::Quantifier { kind, binding, body } => unify_quantifier(*kind, binding, body, scope),
        Node::ValueFn { name, binding } => unify_value_fn(name, binding, scope),
        Node::LetBinding { bindings, body } => unify_let(bindings, body, scope),
        Node::PolicyReference { namespace, name, params } => {
            unify_policy_ref(namespace, name, params.as_ref(), scope)
        }
        Node::DocAccessor(_)
        | Node::BindingAccessor { .. }
        | Node::SelfAccessor(_)
        | Node::ParamAccessor(_)
        | Node::EventAccessor(_) => {
            // A bare accessor used as a standalone predicate: truthy test.
            let value = eval_accessor(&node.node, scope)?;
            Ok(unify_truthy(value))
        }
    }
}

fn unify_literal_truth(lit: &Literal) -> Residual {
    match lit {
        Literal::Bool(true) => Residual::satisfied(),
        Literal::Bool(false) => Residual::complex(crate::residual::ComplexMarker::new(
            Reason::Other("literal false".into()),
        )),
        _ => Residual::complex(crate::residual::ComplexMarker::new(Reason::Other(
            "non-boolean literal used as predicate".into(),
        ))),
    }
}

fn unify_truthy(value: Option<Value>) -> Residual {
    match value {
        Some(Value::Bool(true)) => Residual::satisfied(),
        Some(Value::Bool(false)) => Residual::complex(crate::residual::ComplexMarker::new(
            Reason::Other("falsy accessor".into()),
        )),
        None => Residual::complex(crate::residual::ComplexMarker::new(Reason::SelfMissing)),
        _ => Residual::complex(crate::residual::ComplexMarker::new(Reason::Other(
            "non-boolean accessor used as predicate".into(),
        ))),
    }
}

/// Unifies a comparison/membership/pattern call: `[op lhs rhs]`, where `lhs`
/// is typically an accessor and `rhs` a literal.
fn unify_value_op(
    op: &str,
    lhs: &polix_ast::AstNode,
    rhs: &polix_ast::AstNode,
    scope: &Scope,
) -> Result<Residual, EvalError> {
    let literal = match &rhs.node {
        Node::Literal(lit) | Node::LiteralWrapper(lit) => lit.clone(),
        Node::ParamAccessor(name) => {
            // A resolvable dynamic right-hand side (a bound parameter, event
            // field, or quantifier/let binding) is substituted by its value
            // and compared like any literal, rather than treated as too
            // dynamic (spec §4.4 "`:param/min` ... as the right-hand side of
            // a comparison").
            match eval_accessor(&rhs.node, scope)?.and_then(|v| v.as_literal()) {
                Some(lit) => lit,
                None => {
                    return Ok(Residual::complex(crate::residual::ComplexMarker::new(
                        Reason::ParamUnbound { name: name.clone() },
                    )))
                }
            }
        }
        Node::EventAccessor(_) | Node::BindingAccessor { .. } => {
            match eval_accessor(&rhs.node, scope)?.and_then(|v| v.as_literal()) {
                Some(lit) => lit,
                None => {
                    return Ok(Residual::complex(crate::residual::ComplexMarker::with_subtree(
                        Reason::Other("non-literal operand".into()),
                        rhs.clone(),
                    )))
                }
            }
        }
        _ => {
            // Right-hand side is itself an accessor. When both sides are
            // plain document paths, resolve both against the document first:
            // with both present, apply the operator directly (spec §4.5 rule
            // a); cross-key is reserved for when at least one side is absent
            // (rule c), not for "both are doc paths" unconditionally.
            if let (Some(lpath), Some(rpath)) = (doc_path_of(&lhs.node), doc_path_of(&rhs.node)) {
                let lvalue = resolve_path(scope, scope.doc, lpath)?;
                let rvalue = resolve_path(scope, scope.doc, rpath)?;
                return match (lvalue, rvalue) {
                    (Some(lv), Some(rv)) => match rv.as_literal() {
                        Some(rlit) => {
                            let atom = AtomicConstraint::new(op, ConstraintValue::Path(rpath.clone()));
                            decide(lpath.clone(), op, Some(lv), &rlit, atom)
                        }
                        None => Ok(Residual::complex(crate::residual::ComplexMarker::new(
                            Reason::Other("non-scalar cross-key operand".into()),
                        ))),
                    },
                    _ => Ok(Residual::cross_key(lpath.clone(), op, rpath.clone())),
                };
            }
            return Ok(Residual::complex(crate::residual::ComplexMarker::with_subtree(
                Reason::Other("non-literal operand".into()),
                rhs.clone(),
            )));
        }
    };

    let atom = AtomicConstraint::new(op, ConstraintValue::Literal(literal.clone()));

    match &lhs.node {
        Node::DocAccessor(path) | Node::SelfAccessor(path) => {
            let value = resolve_path(scope, scope.doc, path)?;
            decide(path.clone(), op, value, &literal, atom)
        }
        Node::EventAccessor(path) => match scope.event {
            None => Ok(Residual::complex(crate::residual::ComplexMarker::new(Reason::EventMissing))),
            Some(event) => {
                let value = resolve_path(scope, event, path)?;
                decide(path.clone(), op, value, &literal, atom)
            }
        },
        Node::ParamAccessor(name) => {
            let value = scope.params.as_ref().and_then(|p| p.get(name)).cloned();
            match value {
                None => Ok(Residual::complex(crate::residual::ComplexMarker::new(
                    Reason::ParamUnbound { name: name.clone() },
                ))),
                Some(v) => decide(Path::field(format!("param.{name}")), op, Some(v), &literal, atom),
            }
        }
        Node::BindingAccessor { namespace, path } => {
            let root = scope.lookup_binding(namespace).cloned();
            match root {
                None => Err(EvalError::UnboundName(namespace.clone())),
                Some(root) => {
                    let value = resolve_path(scope, &root, path)?;
                    let full_path = Path::field(namespace.clone()).join(path);
                    decide(full_path, op, value, &literal, atom)
                }
            }
        }
        _ => Ok(Residual::complex(crate::residual::ComplexMarker::with_subtree(
            Reason::Other("non-accessor left-hand side".into()),
            lhs.clone(),
        ))),
    }
}

fn decide(
    path: Path,
    op: &str,
    value: Option<Value>,
    literal: &Literal,
    atom: AtomicConstraint,
) -> Result<Residual, EvalError> {
    match value {
        None => Ok(Residual::open_at(path, atom)),
        Some(v) => match operator::apply(op, &v, literal) {
            operator::Outcome::Decided(true) => Ok(Residual::satisfied()),
            operator::Outcome::Decided(false) => Ok(Residual::conflict_at(path, atom, v)),
            operator::Outcome::Open => Ok(Residual::open_at(path, atom)),
            operator::Outcome::Unknown => Ok(Residual::complex(crate::residual::ComplexMarker::new(
                Reason::OpFailed { op: op.to_string() },
            ))),
        },
    }
}

fn unify_call(op: &str, args: &[polix_ast::AstNode], scope: &Scope) -> Result<Residual, EvalError> {
    match op {
        "and" => {
            let mut acc = Residual::satisfied();
            for arg in args {
                acc = acc.merge(&unify(arg, scope)?);
            }
            Ok(acc)
        }
        "or" => {
            let mut branches = Vec::with_capacity(args.len());
            for arg in args {
                branches.push(unify(arg, scope)?);
            }
            let mut iter = branches.into_iter();
            let first = iter.next().unwrap_or_else(Residual::satisfied);
            Ok(iter.fold(first, |acc, next| acc.combine(&next)))
        }
        "not" => {
            let inner = args.first().ok_or_else(|| EvalError::UnknownOperator("not".into()))?;
            // Prefer the syntactic rewrite (C8): it keeps the negated form as
            // atoms the evaluator can still decide precisely, rather than
            // collapsing straight to the coarser residual-level negation.
            match crate::negate::negate(inner) {
                Some(rewritten) => unify(&rewritten, scope),
                None => Ok(unify(inner, scope)?.negate()),
            }
        }
        _ if is_value_operator(op) => {
            let (lhs, rhs) = (
                args.first().ok_or_else(|| EvalError::UnknownOperator(op.to_string()))?,
                args.get(1).ok_or_else(|| EvalError::UnknownOperator(op.to_string()))?,
            );
            unify_value_op(op, lhs, rhs, scope)
        }
        other => Ok(Residual::complex(crate::residual::ComplexMarker::new(
            Reason::UnknownOperator { op: other.to_string() },
        ))),
    }
}

fn unify_quantifier(
    kind: QuantifierKind,
    binding: &QuantifierBinding,
    body: &polix_ast::AstNode,
    scope: &Scope,
) -> Result<Residual, EvalError> {
    let collection = eval_accessor(&binding.collection.node, scope)?;
    let items = match collection {
        Some(Value::List(items)) => items,
        _ => {
            return Ok(Residual::complex(crate::residual::ComplexMarker::new(
                Reason::Other("quantifier collection missing or not a list".into()),
            )))
        }
    };

    let mut element_residuals = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        let child = scope.child_with_binding(binding.name.clone(), item);
        if let Some(filter) = &binding.filter {
            let filter_residual = unify(filter, &child)?;
            if !filter_residual.is_satisfied() {
                continue;
            }
        }
        let residual = unify(body, &child)?;
        element_residuals.push((i, residual));
    }

    match kind {
        QuantifierKind::Forall => {
            let mut acc = Residual::satisfied();
            for (i, residual) in element_residuals {
                acc = acc.merge(&key_residual_by_index(residual, i));
            }
            Ok(acc)
        }
        QuantifierKind::Exists => {
            if element_residuals.is_empty() {
                // An exists over an empty (or fully filtered-out) collection
                // is refuted outright, not merely undecided (spec §4.5/§8
                // "Empty exists over an empty collection yields refuted").
                let path = doc_path_of(&binding.collection.node).cloned().unwrap_or_else(Path::new);
                let atom = AtomicConstraint::new("exists", ConstraintValue::Literal(Literal::Bool(true)));
                return Ok(Residual::conflict_at(path, atom, Value::List(Vec::new())));
            }
            let mut iter = element_residuals.into_iter();
            let (i0, first) = iter.next().unwrap();
            let first = key_residual_by_index(first, i0);
            Ok(iter.fold(first, |acc, (i, r)| acc.combine(&key_residual_by_index(r, i))))
        }
    }
}

/// Rewrites a per-element residual's constraint paths to be prefixed with
/// `[index]`, so a partial `forall` result names exactly which element is
/// still open (spec §4.5).
fn key_residual_by_index(residual: Residual, index: usize) -> Residual {
    let mut out = Residual::satisfied();
    for (path, constraints) in residual.constraints() {
        let mut keyed = Path::new();
        keyed.push(Segment::Index(index));
        let keyed = keyed.join(path);
        for c in constraints {
            out = out.add_constraint(keyed.clone(), c.clone());
        }
    }
    for cross in residual.cross_key_constraints() {
        out = out.merge(&Residual::cross_key(cross.left.clone(), cross.op.clone(), cross.right.clone()));
    }
    if let Some(marker) = residual.complex_marker() {
        out = out.merge(&Residual::complex(marker.clone()));
    }
    out
}

fn unify_value_fn(name: &str, binding: &QuantifierBinding, scope: &Scope) -> Result<Residual, EvalError> {
    match name {
        "count" => {
            let collection = eval_accessor(&binding.collection.node, scope)?;
            match collection {
                Some(Value::List(_)) => Ok(Residual::satisfied()),
                _ => Ok(Residual::complex(crate::residual::ComplexMarker::new(
                    Reason::PartialCount,
                ))),
            }
        }
        other => Err(EvalError::UnknownOperator(format!("fn/{other}"))),
    }
}

fn unify_let(
    bindings: &[polix_ast::LetBindingPair],
    body: &polix_ast::AstNode,
    scope: &Scope,
) -> Result<Residual, EvalError> {
    let mut child = scope.clone();
    let mut acc = Residual::satisfied();
    for pair in bindings {
        match eval_accessor(&pair.expr.node, &child) {
            Ok(Some(value)) => child.bindings.push((pair.name.clone(), value)),
            Ok(None) => {
                return Ok(Residual::complex(crate::residual::ComplexMarker::new(
                    Reason::LetBindingResidual,
                )))
            }
            Err(_) => {
                // Non-accessor expression bound by `let`: fall back to
                // unifying it as a predicate and folding its residual in,
                // without introducing a value binding.
                acc = acc.merge(&unify(&pair.expr, &child)?);
            }
        }
    }
    Ok(acc.merge(&unify(body, &child)?))
}

fn unify_policy_ref(
    namespace: &str,
    name: &str,
    params: Option<&BTreeMap<String, polix_ast::AstNode>>,
    scope: &Scope,
) -> Result<Residual, EvalError> {
    let registry = match scope.registry {
        Some(r) => r,
        None => {
            return Ok(Residual::complex(crate::residual::ComplexMarker::new(Reason::NoRegistry)))
        }
    };
    let policy = match registry.get_policy(namespace, name) {
        Some(p) => p,
        None => {
            return Ok(Residual::complex(crate::residual::ComplexMarker::new(
                Reason::UnknownPolicy {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                },
            )))
        }
    };

    let mut call_site: BTreeMap<String, Value> = BTreeMap::new();
    if let Some(params) = params {
        for (key, expr) in params {
            if let Some(value) = eval_accessor(&expr.node, scope)? {
                call_site.insert(key.clone(), value);
            } else if let Node::Literal(lit) | Node::LiteralWrapper(lit) = &expr.node {
                call_site.insert(key.clone(), Value::from(lit.clone()));
            }
        }
    }

    // Precedence for each declared parameter: call-site overrides context
    // (the caller's own bound params) overrides the policy's own default
    // (spec §4.4 "call-site overrides context overrides default").
    let mut resolved_params: BTreeMap<String, Value> = BTreeMap::new();
    for (key, default) in &policy.params {
        if let Some(value) = call_site.remove(key) {
            resolved_params.insert(key.clone(), value);
        } else if let Some(value) = scope.params.as_ref().and_then(|p| p.get(key)).cloned() {
            resolved_params.insert(key.clone(), value);
        } else if let Some(value) = default.clone() {
            resolved_params.insert(key.clone(), value);
        }
    }
    // Any remaining call-site arguments were not declared on the policy but
    // are passed through anyway, so a body referencing an undeclared name is
    // not silently starved.
    resolved_params.extend(call_site);

    let mut child = Scope::new(scope.doc);
    child.registry = scope.registry;
    child.operators = scope.operators;
    child.event = scope.event;
    if !resolved_params.is_empty() {
        child.params = Some(resolved_params);
    }
    unify(&policy.body, &child)
}

/// Returns a [`ConstraintValue`] equivalent for re-checking an atomic
/// constraint against a freshly-resolved value (used by [`crate::normalize`]).
pub fn atom_conflicts(atom: &AtomicConstraint, value: &Value) -> operator::Outcome {
    match &atom.value {
        ConstraintValue::Literal(lit) => operator::apply(&atom.op, value, lit),
        ConstraintValue::Path(_) => operator::Outcome::Open,
    }
}

/// Builds a [`Constraint::Conflict`] for an atom that a resolved value refutes.
pub fn conflict_for(atom: AtomicConstraint, witness: Value) -> Constraint {
    conflict(atom, witness)
}
