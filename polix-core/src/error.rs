//! Error types for the loader, normalizer and evaluator (spec's ambient
//! error-handling stack, modeled on `thiserror`-based enums the way the
//! teacher's `acl`/`crdt` crates define theirs).

use polix_ast::Path;
use thiserror::Error;

/// Errors raised while registering modules/policies into a [`crate::module::ModuleRegistry`]
/// (spec §4.4).
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("namespace `{0}` is reserved for a built-in accessor")]
    ReservedNamespace(String),
    #[error("namespace `{0}` is already registered")]
    DuplicateNamespace(String),
    #[error("policy `{namespace}/{name}` is already defined in this module")]
    DuplicatePolicy { namespace: String, name: String },
    #[error("cycle detected in module dependencies: {0}")]
    Cycle(String),
    #[error("module `{0}` references unknown namespace `{1}`")]
    UnknownDependency(String, String),
}

/// Errors raised while normalizing or compiling an AST (spec §4.6, §4.7). A
/// locally contradictory constraint set is not one of these — it is a valid
/// compiled policy that always evaluates to a conflict, carried as data on
/// the `ConstraintSet` rather than surfaced here.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("operator `{0}` cannot appear in normalized form")]
    UnnormalizableOperator(String),
    #[error("native codegen tier was forced but is unavailable in this build")]
    NativeUnavailable,
}

/// Errors raised during unification/evaluation (spec §4.5, §4.7) that are not
/// representable as a complex residual because they indicate a hard
/// programming error (missing registry, truly malformed AST) rather than
/// partial information.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("unknown operator `{0}`")]
    UnknownOperator(String),
    #[error("policy registry required to resolve `{namespace}/{name}` but none was supplied")]
    NoRegistry { namespace: String, name: String },
    #[error("unknown policy `{namespace}/{name}`")]
    UnknownPolicy { namespace: String, name: String },
    #[error("parameter `{0}` was not bound in the call site")]
    UnboundParameter(String),
    #[error("binding `{0}` is not in scope")]
    UnboundName(String),
    #[error("computed field at {path} did not reduce to a scalar")]
    NonScalarComputed { path: Path },
    #[error("cycle detected while resolving computed field at {0}")]
    ComputedFieldCycle(Path),
}
