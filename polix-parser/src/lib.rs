//! # polix-parser
//!
//! The Polix surface syntax: an s-expression grammar compiled with `pest`,
//! and a builder that turns the parse tree into a `polix_ast::AstNode` with
//! lexical scope already resolved (spec §4.2).
//!
//! ```text
//! (and
//!   (= doc/status "active")
//!   (forall [u doc/members where (= u/role "admin")]
//!     (in u/id doc/owners)))
//! ```

mod builder;
mod error;

use pest::Parser;
use pest_derive::Parser;
use polix_ast::AstNode;

pub use error::{ErrorKind, ParseError};

#[derive(Parser)]
#[grammar = "grammar.pest"]
pub struct PolixParser;

/// Parses a single Polix expression into an [`AstNode`].
pub fn parse(input: &str) -> Result<AstNode, ParseError> {
    parse_inner(input).map_err(|err| {
        tracing::warn!("failed to parse policy source: {err}");
        err
    })
}

fn parse_inner(input: &str) -> Result<AstNode, ParseError> {
    let mut pairs = PolixParser::parse(Rule::root, input)?;
    let root = pairs.next().expect("root rule always produces one pair");
    builder::build_root(root)
}
