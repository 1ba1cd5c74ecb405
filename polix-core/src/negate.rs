//! The syntactic negation transformer (spec §4.8, C8).
//!
//! Distinct from [`crate::residual::Residual::negate`] (which negates an
//! already-evaluated residual): this module rewrites an AST node into its
//! logical negation *before* evaluation, via De Morgan's laws, the operator
//! swap table, quantifier duality and double-negation elision, so that
//! `not` rarely needs to reach the evaluator as a structural wrapper at all.

use crate::operator::negate_operator;
use polix_ast::{AstNode, Node, QuantifierBinding, QuantifierKind, Spanned};

/// Rewrites `node` to its logical negation. Returns the rewritten node when
/// a syntactic negation exists; `None` when none of the rules below apply
/// (callers fall back to wrapping in a structural `not`, which the
/// evaluator handles via [`crate::residual::Residual::negate`]).
pub fn negate(node: &AstNode) -> Option<AstNode> {
    let pos = node.pos;
    match &node.node {
        Node::FunctionCall { op, args } if op == "not" => {
            // Double-negation elision (spec §4.8).
            args.first().cloned()
        }
        Node::FunctionCall { op, args } if op == "and" => {
            let negated: Option<Vec<AstNode>> = args.iter().map(negate).collect();
            negated.map(|args| {
                Spanned::new(Node::FunctionCall { op: "or".into(), args }, pos)
            })
        }
        Node::FunctionCall { op, args } if op == "or" => {
            let negated: Option<Vec<AstNode>> = args.iter().map(negate).collect();
            negated.map(|args| {
                Spanned::new(Node::FunctionCall { op: "and".into(), args }, pos)
            })
        }
        Node::FunctionCall { op, args } => {
            let swapped = negate_operator(op)?;
            Some(Spanned::new(
                Node::FunctionCall { op: swapped.to_string(), args: args.clone() },
                pos,
            ))
        }
        Node::Quantifier { kind, binding, body } => {
            let negated_body = negate(body)?;
            let dual = match kind {
                QuantifierKind::Forall => QuantifierKind::Exists,
                QuantifierKind::Exists => QuantifierKind::Forall,
            };
            Some(Spanned::new(
                Node::Quantifier {
                    kind: dual,
                    binding: QuantifierBinding {
                        name: binding.name.clone(),
                        collection: binding.collection.clone(),
                        filter: binding.filter.clone(),
                    },
                    body: Box::new(negated_body),
                },
                pos,
            ))
        }
        Node::LetBinding { bindings, body } => {
            let negated_body = negate(body)?;
            Some(Spanned::new(
                Node::LetBinding { bindings: bindings.clone(), body: Box::new(negated_body) },
                pos,
            ))
        }
        // Literals, accessors, value functions and policy references have no
        // syntactic negation; the caller wraps them in a structural `not`.
        Node::Literal(_)
        | Node::LiteralWrapper(_)
        | Node::DocAccessor(_)
        | Node::BindingAccessor { .. }
        | Node::SelfAccessor(_)
        | Node::ParamAccessor(_)
        | Node::EventAccessor(_)
        | Node::ValueFn { .. }
        | Node::PolicyReference { .. } => None,
    }
}

/// Negates `node`, falling back to a structural `not` wrapper when no
/// syntactic rewrite applies (spec §4.8 "non-negatable forms fall back to a
/// structural wrapper").
pub fn negate_or_wrap(node: &AstNode) -> AstNode {
    negate(node).unwrap_or_else(|| {
        Spanned::new(
            Node::FunctionCall { op: "not".into(), args: vec![node.clone()] },
            node.pos,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use polix_ast::{Literal, Path, SourcePos};

    fn span(node: Node) -> AstNode {
        Spanned::new(node, SourcePos::default())
    }

    fn eq(field: &str, v: &str) -> AstNode {
        span(Node::FunctionCall {
            op: "=".into(),
            args: vec![span(Node::DocAccessor(Path::field(field))), span(Node::Literal(Literal::Str(v.into())))],
        })
    }

    #[test]
    fn swaps_comparison_operator() {
        let negated = negate(&eq("role", "admin")).unwrap();
        match negated.node {
            Node::FunctionCall { op, .. } => assert_eq!(op, "!="),
            _ => panic!("expected FunctionCall"),
        }
    }

    #[test]
    fn de_morgan_and_to_or() {
        let node = span(Node::FunctionCall { op: "and".into(), args: vec![eq("a", "1"), eq("b", "2")] });
        let negated = negate(&node).unwrap();
        match negated.node {
            Node::FunctionCall { op, args } => {
                assert_eq!(op, "or");
                assert_eq!(args.len(), 2);
            }
            _ => panic!("expected FunctionCall"),
        }
    }

    #[test]
    fn double_negation_elides() {
        let inner = eq("role", "admin");
        let wrapped = span(Node::FunctionCall { op: "not".into(), args: vec![inner.clone()] });
        let negated = negate(&wrapped).unwrap();
        assert_eq!(negated, inner);
    }

    #[test]
    fn quantifier_duality() {
        let binding = QuantifierBinding {
            name: "u".into(),
            collection: Box::new(span(Node::DocAccessor(Path::field("users")))),
            filter: None,
        };
        let node = span(Node::Quantifier { kind: QuantifierKind::Forall, binding, body: Box::new(eq("role", "admin")) });
        let negated = negate(&node).unwrap();
        match negated.node {
            Node::Quantifier { kind, .. } => assert_eq!(kind, QuantifierKind::Exists),
            _ => panic!("expected Quantifier"),
        }
    }

    #[test]
    fn non_negatable_falls_back_to_wrapper() {
        let node = span(Node::DocAccessor(Path::field("flag")));
        assert!(negate(&node).is_none());
        let wrapped = negate_or_wrap(&node);
        match wrapped.node {
            Node::FunctionCall { op, .. } => assert_eq!(op, "not"),
            _ => panic!("expected wrapper"),
        }
    }
}
