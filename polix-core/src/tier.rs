//! The tiered evaluator (spec §4.7, C7).
//!
//! A policy is compiled once into a [`CompiledPolicy`] and then evaluated
//! through the cheapest tier that can handle it:
//!
//! - **T0 Interpreted** — walks the raw AST via [`crate::unify::unify`].
//!   Always available; the fallback for anything that does not normalize.
//! - **T1 Guarded** — like T0, but only entered while the
//!   [`ModuleRegistry`] version recorded at compile time still matches the
//!   live registry; a stale guard demotes back to T0.
//! - **T2 Templated** — evaluates a pre-normalized [`ConstraintSet`]
//!   directly against the document, skipping the AST walk entirely. Only
//!   available for policies that are pure conjunctions of doc/self
//!   comparisons (spec §4.6).
//! - **T3 Native** — an optional, feature-gated platform codegen path.
//!   Without the `native-codegen` feature, implementations simply do not
//!   advertise T3 and templated evaluation is used instead (spec §9).

use crate::error::{CompileError, EvalError};
use crate::module::ModuleRegistry;
use crate::normalize::{self, ConstraintSet};
use crate::operator::{self, OperatorRegistry};
use crate::residual::{AtomicConstraint, ComplexMarker, ConstraintValue, Reason, Residual};
use crate::unify::{self, Scope};
use polix_ast::{AstNode, Value};

/// Which tier last served an evaluation, surfaced for diagnostics/metrics.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Tier {
    Interpreted,
    Guarded,
    Templated,
    Native,
}

/// Caller-supplied compilation preferences (spec §4.7 "Options"): force a
/// specific tier rather than letting [`CompiledPolicy::eligible_tier`]
/// pick one, with `fallback` consulted when the forced tier's
/// prerequisites don't hold. `native` gates whether T3 may be considered at
/// all, independent of the `native-codegen` build feature.
#[derive(Clone, Copy, Debug, Default)]
pub struct Options {
    pub tier: Option<Tier>,
    pub fallback: Option<Tier>,
    pub native: bool,
}

fn native_codegen_ready(requested: bool) -> bool {
    if !requested {
        return false;
    }
    #[cfg(feature = "native-codegen")]
    {
        crate::adapters::native_codegen_available()
    }
    #[cfg(not(feature = "native-codegen"))]
    {
        false
    }
}

/// A policy body plus whatever the compiler could derive from it ahead of
/// time.
#[derive(Clone, Debug)]
pub struct CompiledPolicy {
    body: AstNode,
    constraint_set: Option<ConstraintSet>,
    /// The [`ModuleRegistry`] version this was compiled against, used to
    /// guard T1/T2 evaluation (spec §4.7 "registry-version-checked").
    registry_version: u64,
    /// The [`OperatorRegistry`] version this was compiled against, guarding
    /// T1/T2 the same way `registry_version` guards module references.
    operator_version: u64,
    forced_tier: Option<Tier>,
}

impl CompiledPolicy {
    /// Compiles `body` against the registry state at `registry_version`
    /// (pass `0` when there is no registry in play), with no forced tier
    /// and no operator registry in play.
    pub fn compile(body: AstNode, registry_version: u64) -> Result<Self, CompileError> {
        Self::compile_with(body, registry_version, 0, Options::default())
    }

    /// Like [`Self::compile`], additionally guarding against a live
    /// [`OperatorRegistry`]'s version.
    pub fn compile_versioned(
        body: AstNode,
        registry_version: u64,
        operator_version: u64,
    ) -> Result<Self, CompileError> {
        Self::compile_with(body, registry_version, operator_version, Options::default())
    }

    /// The full compilation entry point (spec §4.7 "Options"): compiles
    /// `body` and, if `opts.tier` requests native codegen this build cannot
    /// provide, either falls back to `opts.fallback` or fails with
    /// [`CompileError::NativeUnavailable`].
    pub fn compile_with(
        body: AstNode,
        registry_version: u64,
        operator_version: u64,
        opts: Options,
    ) -> Result<Self, CompileError> {
        let constraint_set = normalize::normalize(&body)?;
        let forced_tier = match opts.tier {
            Some(Tier::Native) if !native_codegen_ready(opts.native) => match opts.fallback {
                Some(fallback) => Some(fallback),
                None => return Err(CompileError::NativeUnavailable),
            },
            other => other,
        };
        Ok(Self { body, constraint_set, registry_version, operator_version, forced_tier })
    }

    pub fn body(&self) -> &AstNode {
        &self.body
    }

    /// The best tier this policy is eligible for, given the live registry
    /// and operator registry (if any). Native is never returned unless the
    /// `native-codegen` feature is enabled and a hook accepted the
    /// constraint set, unless a tier was forced at compile time.
    pub fn eligible_tier(
        &self,
        registry: Option<&ModuleRegistry>,
        operators: Option<&OperatorRegistry>,
    ) -> Tier {
        if let Some(forced) = self.forced_tier {
            return forced;
        }
        let registry_fresh = registry.map_or(true, |r| r.version() == self.registry_version);
        let operators_fresh = operators.map_or(true, |o| o.version() == self.operator_version);
        if !registry_fresh || !operators_fresh {
            tracing::debug!(
                registry_fresh,
                operators_fresh,
                "T1 guard stale, demoting compiled policy to T0 interpretation"
            );
            return Tier::Interpreted;
        }
        if self.constraint_set.is_some() {
            #[cfg(feature = "native-codegen")]
            if crate::adapters::native_codegen_available() {
                return Tier::Native;
            }
            Tier::Templated
        } else {
            Tier::Guarded
        }
    }

    /// Evaluates this policy against `doc`, dispatching to the best
    /// eligible tier and demoting automatically when a tier's precondition
    /// no longer holds.
    ///
    /// A compiled policy whose constraint-set is locally contradictory (spec
    /// §4.6 "detect contradiction") always evaluates to the same conflict
    /// residual regardless of tier or document — checked once here, ahead of
    /// tier dispatch, so T0/T1/T2/T3 agree on it (spec §8 "tier equivalence")
    /// instead of only the tiers that actually consult the constraint set.
    pub fn evaluate(&self, scope: &Scope) -> Result<(Residual, Tier), EvalError> {
        let tier = self.eligible_tier(scope.registry, scope.operators);
        if let Some(c) = self.constraint_set.as_ref().and_then(ConstraintSet::contradiction) {
            let witness = Value::from(c.witness.clone());
            return Ok((Residual::conflict_at(c.path.clone(), c.atom.clone(), witness), tier));
        }
        match tier {
            Tier::Native => {
                #[cfg(feature = "native-codegen")]
                {
                    if let Some(set) = &self.constraint_set {
                        if let Some(residual) = crate::adapters::evaluate_native(set, scope)? {
                            return Ok((residual, Tier::Native));
                        }
                    }
                }
                tracing::warn!("native codegen declined the constraint set, falling back to T2");
                self.evaluate_templated_or_interpreted(scope)
            }
            Tier::Templated => self.evaluate_templated_or_interpreted(scope),
            Tier::Guarded | Tier::Interpreted => {
                let residual = unify::unify(&self.body, scope)?;
                Ok((residual, tier))
            }
        }
    }

    fn evaluate_templated_or_interpreted(&self, scope: &Scope) -> Result<(Residual, Tier), EvalError> {
        if let Some(set) = &self.constraint_set {
            Ok((evaluate_constraint_set(set, scope)?, Tier::Templated))
        } else {
            Ok((unify::unify(&self.body, scope)?, Tier::Interpreted))
        }
    }
}

/// Evaluates a normalized [`ConstraintSet`] directly against `scope`'s
/// document — the T2 fast path, equivalent in result to interpreting the
/// original conjunction but without walking the AST.
fn evaluate_constraint_set(set: &ConstraintSet, scope: &Scope) -> Result<Residual, EvalError> {
    let mut acc = Residual::satisfied();
    for (path, atoms) in set.iter() {
        let value = resolve_doc_path(scope.doc, path);
        for atom in atoms {
            let ConstraintValue::Literal(lit) = &atom.value else {
                continue;
            };
            acc = acc.merge(&decide_atom(path.clone(), atom.clone(), value, lit)?);
            if acc.is_contradicted() {
                return Ok(acc);
            }
        }
    }
    Ok(acc)
}

/// The templated tier does not expand `Computed` leaves — it treats them as
/// missing, which only ever makes the result *more* open, never wrong.
fn resolve_doc_path<'v>(root: &'v Value, path: &polix_ast::Path) -> Option<&'v Value> {
    let mut current = root;
    for seg in path.iter() {
        current = match seg {
            polix_ast::Segment::Field(name) => current.get_field(name)?,
            polix_ast::Segment::Index(i) => current.get_index(*i)?,
        };
    }
    if current.is_computed() {
        None
    } else {
        Some(current)
    }
}

fn decide_atom(
    path: polix_ast::Path,
    atom: AtomicConstraint,
    value: Option<&Value>,
    literal: &polix_ast::Literal,
) -> Result<Residual, EvalError> {
    match value {
        None => Ok(Residual::open_at(path, atom)),
        Some(v) => match operator::apply(&atom.op, v, literal) {
            operator::Outcome::Decided(true) => Ok(Residual::satisfied()),
            operator::Outcome::Decided(false) => Ok(Residual::conflict_at(path, atom, v.clone())),
            operator::Outcome::Open => Ok(Residual::open_at(path, atom)),
            operator::Outcome::Unknown => Ok(Residual::complex(ComplexMarker::new(
                Reason::UnknownOperator { op: atom.op.clone() },
            ))),
        },
    }
}

/// A policy reference whose body could not be normalized and whose
/// constraint set therefore contains no usable bound — surfaced as a
/// complex marker rather than silently downgrading.
pub fn unsupported_tier_marker(reason: impl Into<String>) -> Residual {
    Residual::complex(ComplexMarker::new(Reason::Other(reason.into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use polix_ast::{Literal, Node, Path, SourcePos, Spanned};
    use std::collections::BTreeMap;

    fn span(node: Node) -> AstNode {
        Spanned::new(node, SourcePos::default())
    }

    fn eq_role(role: &str) -> AstNode {
        span(Node::FunctionCall {
            op: "=".into(),
            args: vec![span(Node::DocAccessor(Path::field("role"))), span(Node::Literal(Literal::Str(role.into())))],
        })
    }

    #[test]
    fn normalizable_policy_uses_templated_tier() {
        let compiled = CompiledPolicy::compile(eq_role("admin"), 0).unwrap();
        assert_eq!(compiled.eligible_tier(None, None), Tier::Templated);
    }

    #[test]
    fn non_normalizable_policy_uses_guarded_or_interpreted() {
        let node = span(Node::FunctionCall { op: "or".into(), args: vec![eq_role("admin")] });
        let compiled = CompiledPolicy::compile(node, 0).unwrap();
        assert_eq!(compiled.eligible_tier(None, None), Tier::Guarded);
    }

    #[test]
    fn guarded_tier_actually_reaches_evaluate() {
        let node = span(Node::FunctionCall { op: "or".into(), args: vec![eq_role("admin")] });
        let compiled = CompiledPolicy::compile(node, 0).unwrap();
        let doc = Value::Map(BTreeMap::from([("role".into(), Value::Str("admin".into()))]));
        let scope = Scope::new(&doc);
        let (_, tier) = compiled.evaluate(&scope).unwrap();
        assert_eq!(tier, Tier::Guarded);
    }

    #[test]
    fn templated_and_interpreted_tiers_agree() {
        let doc = Value::Map(BTreeMap::from([("role".into(), Value::Str("admin".into()))]));
        let compiled = CompiledPolicy::compile(eq_role("admin"), 0).unwrap();
        let scope = Scope::new(&doc);
        let (templated, tier) = compiled.evaluate(&scope).unwrap();
        assert_eq!(tier, Tier::Templated);
        let interpreted = unify::unify(compiled.body(), &scope).unwrap();
        assert_eq!(templated, interpreted);
    }

    #[test]
    fn stale_registry_demotes_to_interpreted() {
        let registry = ModuleRegistry::new();
        let compiled = CompiledPolicy::compile(eq_role("admin"), registry.version()).unwrap();
        registry
            .load(vec![crate::module::Module::new("bumps_version")])
            .unwrap();
        assert_eq!(compiled.eligible_tier(Some(&registry), None), Tier::Interpreted);
    }

    #[test]
    fn stale_operator_registry_demotes_to_interpreted() {
        let operators = OperatorRegistry::new();
        let compiled =
            CompiledPolicy::compile_versioned(eq_role("admin"), 0, operators.version()).unwrap();
        operators.register("geo-within");
        assert_eq!(compiled.eligible_tier(None, Some(&operators)), Tier::Interpreted);
    }

    #[test]
    fn forced_native_tier_without_codegen_falls_back() {
        let opts = Options { tier: Some(Tier::Native), fallback: Some(Tier::Templated), native: true };
        let compiled = CompiledPolicy::compile_with(eq_role("admin"), 0, 0, opts).unwrap();
        assert_eq!(compiled.eligible_tier(None, None), Tier::Templated);
    }

    #[test]
    fn forced_native_tier_without_fallback_errors() {
        let opts = Options { tier: Some(Tier::Native), fallback: None, native: true };
        let err = CompiledPolicy::compile_with(eq_role("admin"), 0, 0, opts).unwrap_err();
        assert!(matches!(err, CompileError::NativeUnavailable));
    }

    #[test]
    fn locally_contradictory_policy_compiles_and_evaluates_as_a_conflict() {
        let node = span(Node::FunctionCall {
            op: "and".into(),
            args: vec![eq_role("admin"), eq_role("guest")],
        });
        // Compiling never errors: the contradiction is a value on the
        // compiled policy, not a hard failure.
        let compiled = CompiledPolicy::compile(node, 0).unwrap();

        let doc = Value::Map(BTreeMap::from([("role".into(), Value::Str("admin".into()))]));
        let scope = Scope::new(&doc);
        let (residual, _) = compiled.evaluate(&scope).unwrap();
        assert!(residual.is_contradicted());

        // Even a document that doesn't mention `role` at all is still
        // contradicted: the contradiction never depended on the document.
        let empty = Value::Map(BTreeMap::new());
        let scope = Scope::new(&empty);
        let (residual, _) = compiled.evaluate(&scope).unwrap();
        assert!(residual.is_contradicted());
    }

    #[test]
    fn contradiction_agrees_across_forced_tiers() {
        let node = span(Node::FunctionCall {
            op: "and".into(),
            args: vec![eq_role("admin"), eq_role("guest")],
        });
        let doc = Value::Map(BTreeMap::from([("role".into(), Value::Str("admin".into()))]));
        let scope = Scope::new(&doc);

        let interpreted = CompiledPolicy::compile_with(
            node.clone(),
            0,
            0,
            Options { tier: Some(Tier::Interpreted), fallback: None, native: false },
        )
        .unwrap();
        let templated = CompiledPolicy::compile_with(
            node,
            0,
            0,
            Options { tier: Some(Tier::Templated), fallback: None, native: false },
        )
        .unwrap();

        let (r_interpreted, _) = interpreted.evaluate(&scope).unwrap();
        let (r_templated, _) = templated.evaluate(&scope).unwrap();
        assert_eq!(r_interpreted, r_templated);
        assert!(r_interpreted.is_contradicted());
    }
}
