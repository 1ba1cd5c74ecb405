//! Walks the `pest` parse tree into a [`polix_ast::AstNode`], resolving
//! which namespaced accessors refer to an enclosing `forall`/`exists`/`let`
//! binding versus a reserved built-in namespace versus a module policy
//! reference (spec §4.2: "the parser resolves which namespaced accessors in
//! a body refer to an enclosing binding before the AST reaches the core
//! engine").

use crate::error::{ErrorKind, ParseError};
use crate::Rule;
use pest::iterators::Pair;
use polix_ast::{LetBindingPair, Literal, Node, Path, QuantifierBinding, QuantifierKind, SourcePos, Spanned};
use std::collections::BTreeMap;

const RESERVED_NAMESPACES: &[&str] = &["doc", "self", "param", "event", "fn"];

fn source_pos(pair: &Pair<Rule>) -> SourcePos {
    let span = pair.as_span();
    let (line, col) = span.start_pos().line_col();
    SourcePos::new(line, col, span.start())
}

fn missing(pos: SourcePos, what: &str) -> ParseError {
    ParseError::semantic(ErrorKind::MissingChild, pos, what)
}

fn unknown_form(pos: SourcePos, detail: impl Into<String>) -> ParseError {
    ParseError::semantic(ErrorKind::UnknownForm, pos, detail)
}

fn invalid_namespace(pos: SourcePos, detail: impl Into<String>) -> ParseError {
    ParseError::semantic(ErrorKind::InvalidNamespace, pos, detail)
}

fn split_qualified(text: &str) -> (String, String) {
    let (namespace, path) = text.split_once('/').expect("qualified_ident always contains '/'");
    (namespace.to_string(), path.to_string())
}

fn unquote(text: &str) -> String {
    let inner = &text[1..text.len() - 1];
    inner.replace("\\\"", "\"").replace("\\\\", "\\")
}

fn unslash(text: &str) -> String {
    text[1..text.len() - 1].to_string()
}

pub fn build_root(pair: Pair<Rule>) -> Result<polix_ast::AstNode, ParseError> {
    let pos = source_pos(&pair);
    let expr_pair = pair
        .into_inner()
        .find(|p| p.as_rule() == Rule::expr)
        .ok_or_else(|| missing(pos, "empty input"))?;
    build_expr(expr_pair, &[])
}

pub fn build_expr(pair: Pair<Rule>, scope: &[String]) -> Result<polix_ast::AstNode, ParseError> {
    let outer_pos = source_pos(&pair);
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| missing(outer_pos, "empty expression"))?;
    let pos = source_pos(&inner);
    match inner.as_rule() {
        Rule::quantifier => build_quantifier(inner, scope),
        Rule::let_expr => build_let(inner, scope),
        Rule::value_fn => build_value_fn(inner, scope),
        Rule::policy_ref_call => build_policy_ref_call(inner, scope),
        Rule::call => build_call(inner, scope),
        Rule::bare_accessor => build_bare_accessor(inner, scope),
        Rule::literal => Ok(Spanned::new(Node::Literal(build_literal(inner)?), pos)),
        other => Err(unknown_form(pos, format!("unexpected expression form: {other:?}"))),
    }
}

fn build_binding(
    pair: Pair<Rule>,
    scope: &[String],
) -> Result<(String, polix_ast::AstNode, Option<polix_ast::AstNode>), ParseError> {
    let pos = source_pos(&pair);
    let mut inner = pair.into_inner();
    let name = inner
        .next()
        .ok_or_else(|| missing(pos, "binding missing name"))?
        .as_str()
        .to_string();
    let collection_pair = inner
        .next()
        .ok_or_else(|| missing(pos, "binding missing collection"))?;
    let collection = build_expr(collection_pair, scope)?;
    let filter = match inner.next() {
        Some(filter_pair) => {
            let mut child_scope = scope.to_vec();
            child_scope.push(name.clone());
            Some(build_expr(filter_pair, &child_scope)?)
        }
        None => None,
    };
    Ok((name, collection, filter))
}

fn build_quantifier(pair: Pair<Rule>, scope: &[String]) -> Result<polix_ast::AstNode, ParseError> {
    let pos = source_pos(&pair);
    let mut inner = pair.into_inner();
    let kind_pair = inner
        .next()
        .ok_or_else(|| missing(pos, "quantifier missing kind"))?;
    let kind = match kind_pair.as_str() {
        "forall" => QuantifierKind::Forall,
        "exists" => QuantifierKind::Exists,
        other => return Err(unknown_form(pos, format!("unknown quantifier kind {other}"))),
    };
    let binding_pair = inner
        .next()
        .ok_or_else(|| missing(pos, "quantifier missing binding"))?;
    let (name, collection, filter) = build_binding(binding_pair, scope)?;
    let mut child_scope = scope.to_vec();
    child_scope.push(name.clone());
    let body_pair = inner
        .next()
        .ok_or_else(|| missing(pos, "quantifier missing body"))?;
    let body = build_expr(body_pair, &child_scope)?;
    Ok(Spanned::new(
        Node::Quantifier {
            kind,
            binding: QuantifierBinding { name, collection: Box::new(collection), filter: filter.map(Box::new) },
            body: Box::new(body),
        },
        pos,
    ))
}

fn build_value_fn(pair: Pair<Rule>, scope: &[String]) -> Result<polix_ast::AstNode, ParseError> {
    let pos = source_pos(&pair);
    let mut inner = pair.into_inner();
    let name_pair = inner
        .next()
        .ok_or_else(|| missing(pos, "value function missing name"))?;
    let name = name_pair
        .as_str()
        .rsplit_once('/')
        .map(|(_, n)| n.to_string())
        .unwrap_or_else(|| name_pair.as_str().to_string());
    let binding_pair = inner
        .next()
        .ok_or_else(|| missing(pos, "value function missing binding"))?;
    let (bname, collection, filter) = build_binding(binding_pair, scope)?;
    Ok(Spanned::new(
        Node::ValueFn {
            name,
            binding: QuantifierBinding { name: bname, collection: Box::new(collection), filter: filter.map(Box::new) },
        },
        pos,
    ))
}

fn build_let(pair: Pair<Rule>, scope: &[String]) -> Result<polix_ast::AstNode, ParseError> {
    let pos = source_pos(&pair);
    let mut parts: Vec<Pair<Rule>> = pair.into_inner().collect();
    let body_pair = parts.pop().ok_or_else(|| missing(pos, "let missing body"))?;
    let mut bindings = Vec::new();
    let mut child_scope = scope.to_vec();
    for part in parts {
        let part_pos = source_pos(&part);
        let mut fields = part.into_inner();
        let name = fields
            .next()
            .ok_or_else(|| missing(part_pos, "let binding missing name"))?
            .as_str()
            .to_string();
        let expr_pair = fields
            .next()
            .ok_or_else(|| missing(part_pos, "let binding missing expression"))?;
        let expr = build_expr(expr_pair, &child_scope)?;
        bindings.push(LetBindingPair { name: name.clone(), expr: Box::new(expr) });
        // A later pair may reference an earlier one (spec §4.2).
        child_scope.push(name);
    }
    let body = build_expr(body_pair, &child_scope)?;
    Ok(Spanned::new(Node::LetBinding { bindings, body: Box::new(body) }, pos))
}

fn build_policy_ref_call(pair: Pair<Rule>, scope: &[String]) -> Result<polix_ast::AstNode, ParseError> {
    let pos = source_pos(&pair);
    let mut inner = pair.into_inner();
    let qid = inner
        .next()
        .ok_or_else(|| missing(pos, "policy reference missing name"))?;
    let (namespace, name) = split_qualified(qid.as_str());
    let param_map_pair = inner
        .next()
        .ok_or_else(|| missing(pos, "policy reference missing parameter map"))?;
    let mut params = BTreeMap::new();
    for param_pair in param_map_pair.into_inner() {
        let param_pos = source_pos(&param_pair);
        let mut fields = param_pair.into_inner();
        let key = fields
            .next()
            .ok_or_else(|| missing(param_pos, "parameter missing name"))?
            .as_str()
            .to_string();
        let value_pair = fields
            .next()
            .ok_or_else(|| missing(param_pos, "parameter missing value"))?;
        params.insert(key, build_expr(value_pair, scope)?);
    }
    Ok(Spanned::new(Node::PolicyReference { namespace, name, params: Some(params) }, pos))
}

fn build_call(pair: Pair<Rule>, scope: &[String]) -> Result<polix_ast::AstNode, ParseError> {
    let pos = source_pos(&pair);
    let mut inner = pair.into_inner();
    let head_pair = inner
        .next()
        .ok_or_else(|| missing(pos, "call missing operator"))?;
    let op = head_pair.as_str().to_string();
    if op == "literal" {
        return build_literal_wrapper(pos, inner, scope);
    }
    let args = inner.map(|p| build_expr(p, scope)).collect::<Result<Vec<_>, _>>()?;
    Ok(Spanned::new(Node::FunctionCall { op, args }, pos))
}

/// `(literal <value>)` bypasses accessor interpretation (spec §4.5
/// "literal-wrapper... used to compare against a raw literal that would
/// otherwise be classified"): the wrapped value must itself already parse as
/// a plain literal, not an accessor or nested call.
fn build_literal_wrapper(
    pos: SourcePos,
    mut inner: pest::iterators::Pairs<Rule>,
    scope: &[String],
) -> Result<polix_ast::AstNode, ParseError> {
    let value_pair = inner
        .next()
        .ok_or_else(|| missing(pos, "literal wrapper missing value"))?;
    let value_pos = source_pos(&value_pair);
    let built = build_expr(value_pair, scope)?;
    match built.node {
        Node::Literal(lit) => Ok(Spanned::new(Node::LiteralWrapper(lit), pos)),
        _ => Err(unknown_form(value_pos, "literal wrapper must wrap a literal value")),
    }
}

/// Resolves a bound name's accessor path against the single-segment `self`
/// convention: `name/self` denotes the whole bound value, not a field of it
/// (see DESIGN.md, Open Question: let-bound scalar reference).
fn binding_path(path_str: &str) -> Path {
    if path_str == "self" {
        Path::new()
    } else {
        Path::from_fields(path_str.split('.').map(str::to_string))
    }
}

fn build_bare_accessor(pair: Pair<Rule>, scope: &[String]) -> Result<polix_ast::AstNode, ParseError> {
    let pos = source_pos(&pair);
    let qid_pair = pair
        .into_inner()
        .next()
        .ok_or_else(|| missing(pos, "accessor missing qualified name"))?;
    let (namespace, path_str) = split_qualified(qid_pair.as_str());
    let node = if scope.iter().any(|bound| *bound == namespace) {
        Node::BindingAccessor { namespace, path: binding_path(&path_str) }
    } else {
        match namespace.as_str() {
            "doc" => Node::DocAccessor(Path::from_fields(path_str.split('.').map(str::to_string))),
            "self" => Node::SelfAccessor(Path::from_fields(path_str.split('.').map(str::to_string))),
            "event" => Node::EventAccessor(Path::from_fields(path_str.split('.').map(str::to_string))),
            "param" => Node::ParamAccessor(path_str),
            _ if RESERVED_NAMESPACES.contains(&namespace.as_str()) => {
                return Err(invalid_namespace(
                    pos,
                    format!("namespace `{namespace}` cannot be used as a bare accessor"),
                ))
            }
            _ => Node::PolicyReference { namespace, name: path_str, params: None },
        }
    };
    Ok(Spanned::new(node, pos))
}

fn build_literal(pair: Pair<Rule>) -> Result<Literal, ParseError> {
    let pos = source_pos(&pair);
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| missing(pos, "empty literal"))?;
    literal_from_pair(inner)
}

fn literal_from_pair(pair: Pair<Rule>) -> Result<Literal, ParseError> {
    let pos = source_pos(&pair);
    match pair.as_rule() {
        Rule::float_lit => pair
            .as_str()
            .parse()
            .map(Literal::Float)
            .map_err(|_| ParseError::InvalidNumber { pos, text: pair.as_str().to_string() }),
        Rule::int_lit => pair
            .as_str()
            .parse()
            .map(Literal::Int)
            .map_err(|_| ParseError::InvalidNumber { pos, text: pair.as_str().to_string() }),
        Rule::bool_lit => Ok(Literal::Bool(pair.as_str() == "true")),
        Rule::string_lit => Ok(Literal::Str(unquote(pair.as_str()))),
        Rule::pattern_lit => Ok(Literal::Pattern(unslash(pair.as_str()))),
        Rule::set_lit => {
            let items = pair
                .into_inner()
                .map(|elem| {
                    let elem_pos = source_pos(&elem);
                    let inner = elem
                        .into_inner()
                        .next()
                        .ok_or_else(|| missing(elem_pos, "empty set element"))?;
                    literal_from_pair(inner)
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Literal::Set(items))
        }
        other => Err(unknown_form(pos, format!("unexpected literal form: {other:?}"))),
    }
}
