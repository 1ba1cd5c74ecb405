//! The typed AST produced by `polix-parser` and consumed by `polix-core`.
//!
//! Every node carries a [`SourcePos`] (spec §4.2: "Every node carries a
//! source position for error reporting"). Quantifier and value-function nodes
//! carry a [`QuantifierBinding`]; `let` carries a flat ordered list of
//! [`LetBindingPair`]s.

use crate::literal::Literal;
use crate::path::Path;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A 1-indexed line/column plus byte offset into the source text.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SourcePos {
    pub line: usize,
    pub col: usize,
    pub offset: usize,
}

impl SourcePos {
    pub fn new(line: usize, col: usize, offset: usize) -> Self {
        Self { line, col, offset }
    }
}

impl std::fmt::Display for SourcePos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// A node annotated with the source position it was parsed from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Spanned<T> {
    pub node: T,
    pub pos: SourcePos,
}

impl<T> Spanned<T> {
    pub fn new(node: T, pos: SourcePos) -> Self {
        Self { node, pos }
    }
}

/// A fully parsed, scope-resolved expression node.
pub type AstNode = Spanned<Node>;

/// Connectives, comparisons, membership and pattern operators recognized by
/// the parser as built-ins rather than policy references.
pub const BOOLEAN_OPS: &[&str] = &["and", "or", "not"];
pub const COMPARISON_OPS: &[&str] = &["=", "!=", "<", "<=", ">", ">="];
pub const MEMBERSHIP_OPS: &[&str] = &["in", "not-in"];
pub const PATTERN_OPS: &[&str] = &["matches", "not-matches"];

/// Whether a quantifier universally or existentially ranges over a collection.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum QuantifierKind {
    Forall,
    Exists,
}

/// `[name, collection] [where predicate]?`, shared by `forall`/`exists` and
/// `fn/count`-style value functions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantifierBinding {
    /// The name bound within the body, e.g. `u` in `forall [u doc/users] ...`.
    pub name: String,
    /// The expression yielding the collection to iterate (typically a
    /// `doc-accessor`, but any accessor namespace is legal).
    pub collection: Box<AstNode>,
    /// An optional filter; elements for which it is refuted are skipped.
    pub filter: Option<Box<AstNode>>,
}

/// One `(name, expr)` pair of a `let` form. Later pairs may reference earlier
/// ones via `self/name`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LetBindingPair {
    pub name: String,
    pub expr: Box<AstNode>,
}

/// A tagged-variant AST node (spec §3 "AST node").
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Node {
    /// A raw literal used as an operand.
    Literal(Literal),
    /// `doc/a.b.c`
    DocAccessor(Path),
    /// A namespaced accessor bound by an enclosing quantifier/let, e.g. `u/role`.
    BindingAccessor { namespace: String, path: Path },
    /// `self/a.b.c`
    SelfAccessor(Path),
    /// `param/name`
    ParamAccessor(String),
    /// `event/a.b.c`
    EventAccessor(Path),
    /// `[:literal v]` — bypasses accessor (re)classification of `v`.
    LiteralWrapper(Literal),
    /// `[op arg1 arg2 ...]` for any recognized built-in operator.
    FunctionCall { op: String, args: Vec<AstNode> },
    /// `forall`/`exists`.
    Quantifier {
        kind: QuantifierKind,
        binding: QuantifierBinding,
        body: Box<AstNode>,
    },
    /// `fn/count` and similar value-producing functions over a quantifier binding.
    ValueFn {
        name: String,
        binding: QuantifierBinding,
    },
    /// `let [name expr ...] body`.
    LetBinding {
        bindings: Vec<LetBindingPair>,
        body: Box<AstNode>,
    },
    /// A namespaced identifier not recognized as a built-in: `ns/policy-name`,
    /// optionally invoked with a parameter map.
    PolicyReference {
        namespace: String,
        name: String,
        params: Option<BTreeMap<String, AstNode>>,
    },
}

impl Node {
    /// Returns the set of document paths mentioned anywhere in this AST
    /// (spec §4.2 `extract-doc-keys`), used for projection/schema checks.
    pub fn extract_doc_keys(&self) -> Vec<Path> {
        let mut keys = Vec::new();
        self.collect_doc_keys(&mut keys);
        keys
    }

    fn collect_doc_keys(&self, out: &mut Vec<Path>) {
        match self {
            Node::DocAccessor(path) => out.push(path.clone()),
            Node::Literal(_)
            | Node::BindingAccessor { .. }
            | Node::SelfAccessor(_)
            | Node::ParamAccessor(_)
            | Node::EventAccessor(_)
            | Node::LiteralWrapper(_) => {}
            Node::FunctionCall { args, .. } => {
                for arg in args {
                    arg.node.collect_doc_keys(out);
                }
            }
            Node::Quantifier { binding, body, .. } => {
                binding.collection.node.collect_doc_keys(out);
                if let Some(filter) = &binding.filter {
                    filter.node.collect_doc_keys(out);
                }
                body.node.collect_doc_keys(out);
            }
            Node::ValueFn { binding, .. } => {
                binding.collection.node.collect_doc_keys(out);
                if let Some(filter) = &binding.filter {
                    filter.node.collect_doc_keys(out);
                }
            }
            Node::LetBinding { bindings, body } => {
                for pair in bindings {
                    pair.expr.node.collect_doc_keys(out);
                }
                body.node.collect_doc_keys(out);
            }
            Node::PolicyReference { params, .. } => {
                if let Some(params) = params {
                    for param in params.values() {
                        param.node.collect_doc_keys(out);
                    }
                }
            }
        }
    }
}
