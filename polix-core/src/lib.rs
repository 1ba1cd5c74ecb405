//! # polix-core
//!
//! The residual algebra, module registry, unification engine, normalizing
//! compiler, negation transformer and tiered evaluator that together
//! implement partial policy evaluation.
//!
//! A typical caller builds a [`module::ModuleRegistry`], loads one or more
//! [`module::Module`]s into it, compiles a policy body with
//! [`cache::PolicyCache`] (or [`tier::CompiledPolicy::compile`] directly),
//! and evaluates it against a document via [`unify::Scope`] +
//! [`tier::CompiledPolicy::evaluate`]. Lower-level callers who just want the
//! four-valued result of walking an AST against a document can call
//! [`unify::unify`] directly.

pub mod adapters;
pub mod cache;
pub mod error;
pub mod module;
pub mod negate;
pub mod normalize;
pub mod operator;
pub mod residual;
pub mod tier;
pub mod unify;

pub use cache::{CacheStats, Fingerprint, PolicyCache};
pub use error::{CompileError, EvalError, LoaderError};
pub use module::{Module, ModuleRegistry, PolicyDef};
pub use normalize::{result_to_policy, ConstraintSet, Contradiction};
pub use operator::OperatorRegistry;
pub use residual::{
    conflict, constraints_to_residual, residual_to_constraints, AtomicConstraint, ComplexMarker,
    Constraint, ConstraintValue, CrossKeyConstraint, Reason, Residual, ResultKind,
};
pub use tier::{CompiledPolicy, Options, Tier};
pub use unify::{unify, Scope};
