//! Parser error types.
//!
//! Every semantic parse error carries both a [`SourcePos`] and a
//! distinguished [`ErrorKind`] (spec.md: "Parsing returns an algebraic
//! result of `ok(node) | error(kind, position, detail)`"; "all carry a
//! source position and an error kind").

use polix_ast::SourcePos;
use thiserror::Error;

/// The distinguished class of a [`ParseError::Semantic`] failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// A grammar rule matched but an expected child pair was absent — a
    /// malformed tree the grammar itself should normally rule out.
    MissingChild,
    /// A pair's rule or literal content did not match any form the builder
    /// recognizes (e.g. an unknown quantifier keyword).
    UnknownForm,
    /// A reserved namespace (`doc`/`self`/`param`/`event`/`fn`) was used
    /// somewhere only a module namespace is allowed.
    InvalidNamespace,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::MissingChild => "missing child",
            ErrorKind::UnknownForm => "unknown form",
            ErrorKind::InvalidNamespace => "invalid namespace",
        };
        f.write_str(label)
    }
}

/// Errors raised while parsing or building an AST from surface syntax.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("syntax error: {0}")]
    Grammar(#[from] pest::error::Error<crate::Rule>),
    #[error("{pos}: invalid numeric literal `{text}`")]
    InvalidNumber { pos: SourcePos, text: String },
    #[error("{pos}: {kind} - {detail}")]
    Semantic { kind: ErrorKind, pos: SourcePos, detail: String },
}

impl ParseError {
    pub fn semantic(kind: ErrorKind, pos: SourcePos, detail: impl Into<String>) -> Self {
        ParseError::Semantic { kind, pos, detail: detail.into() }
    }
}
