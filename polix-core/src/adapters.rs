//! Cross-platform adapters (spec §9, C9): the thread-safe containers the
//! rest of the crate is built on, plus the optional native codegen hook for
//! the T3 evaluation tier.
//!
//! [`crate::cache::PolicyCache`] and [`crate::module::ModuleRegistry`]
//! already wrap their shared state in `parking_lot` primitives directly;
//! this module exists for the one genuinely platform-specific seam, native
//! codegen, which most builds simply do not have.

#[cfg(feature = "native-codegen")]
mod native {
    use crate::error::EvalError;
    use crate::normalize::ConstraintSet;
    use crate::residual::Residual;
    use crate::unify::Scope;

    /// Returns `true` if this build has a native codegen backend wired up.
    /// No in-tree backend ships by default (spec §9: "implementations
    /// without a native path simply do not advertise T3") — enabling the
    /// `native-codegen` feature without supplying one keeps T3 dark.
    pub fn native_codegen_available() -> bool {
        false
    }

    /// Attempts to evaluate `set` through the native backend. Returns
    /// `Ok(None)` to fall back to the templated tier.
    pub fn evaluate_native(_set: &ConstraintSet, _scope: &Scope) -> Result<Option<Residual>, EvalError> {
        Ok(None)
    }
}

#[cfg(feature = "native-codegen")]
pub use native::{evaluate_native, native_codegen_available};
