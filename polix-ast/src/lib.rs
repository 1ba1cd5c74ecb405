//! # polix-ast
//!
//! The typed AST, path type and document value model shared between
//! `polix-parser` (which produces AST nodes) and `polix-core` (which walks,
//! normalizes and compiles them).
//!
//! ## Paths
//! A [`Path`] is an ordered sequence of [`path::Segment`]s. Document and
//! accessor paths use only `Field` segments; residual paths additionally use
//! `Index` segments to key quantifier elements, so a partially evaluated
//! `forall` can report exactly which element is still open or refuted.
//!
//! ## AST shape
//! Every [`ast::Node`] is wrapped in [`ast::Spanned`] together with the
//! [`ast::SourcePos`] it was parsed from. Quantifier and `let` forms
//! introduce bindings; `polix-parser` resolves which namespaced accessors in
//! a body refer to an enclosing binding before the AST reaches `polix-core`.
//!
//! ## Values
//! A [`value::Value`] is the runtime document shape: a JSON-like tree plus a
//! `Computed` leaf for fields whose value is itself a policy expression,
//! expanded lazily during unification.
mod ast;
mod literal;
mod path;
mod value;

pub use ast::{
    AstNode, LetBindingPair, Node, QuantifierBinding, QuantifierKind, SourcePos, Spanned,
    BOOLEAN_OPS, COMPARISON_OPS, MEMBERSHIP_OPS, PATTERN_OPS,
};
pub use literal::Literal;
pub use path::{Path, Segment};
pub use value::Value;
