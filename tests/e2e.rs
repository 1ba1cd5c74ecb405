//! End-to-end scenarios exercising the engine the way a caller would: parse
//! a policy, evaluate it against a document, and inspect the residual.

use polix::{Engine, EngineConfig, Value};
use polix_core::{Module, Options, PolicyDef, Scope, Tier};
use serde_json::json;
use std::collections::BTreeMap;

fn doc(json: serde_json::Value) -> Value {
    Value::from(json)
}

#[test]
fn simple_equality() {
    let engine = Engine::default();
    let ast = engine.parse(r#"(= doc/role "admin")"#).unwrap();

    let satisfied = engine.evaluate(&ast, &doc(json!({"role": "admin"}))).unwrap();
    assert!(satisfied.is_satisfied());

    let contradicted = engine.evaluate(&ast, &doc(json!({"role": "guest"}))).unwrap();
    assert!(contradicted.is_contradicted());

    let open = engine.evaluate(&ast, &doc(json!({}))).unwrap();
    assert!(open.is_open());
}

#[test]
fn bound_tightening() {
    let engine = Engine::default();
    let ast = engine
        .parse("(and (and (> doc/x 3) (> doc/x 5)) (< doc/x 10))")
        .unwrap();

    assert!(engine.evaluate(&ast, &doc(json!({"x": 7}))).unwrap().is_satisfied());
    assert!(engine.evaluate(&ast, &doc(json!({"x": 4}))).unwrap().is_contradicted());
    assert!(engine.evaluate(&ast, &doc(json!({"x": 11}))).unwrap().is_contradicted());
}

#[test]
fn nested_path() {
    let engine = Engine::default();
    let ast = engine.parse(r#"(= doc/user.role "admin")"#).unwrap();

    assert!(engine
        .evaluate(&ast, &doc(json!({"user": {"role": "admin"}})))
        .unwrap()
        .is_satisfied());
    assert!(engine.evaluate(&ast, &doc(json!({"user": {}}))).unwrap().is_open());
}

#[test]
fn forall_over_a_collection() {
    let engine = Engine::default();
    let ast = engine
        .parse(r#"(forall [u doc/users] (= u/role "admin"))"#)
        .unwrap();

    assert!(engine
        .evaluate(&ast, &doc(json!({"users": [{"role": "admin"}, {"role": "admin"}]})))
        .unwrap()
        .is_satisfied());
    assert!(engine
        .evaluate(&ast, &doc(json!({"users": [{"role": "admin"}, {"role": "guest"}]})))
        .unwrap()
        .is_contradicted());
    assert!(engine.evaluate(&ast, &doc(json!({"users": []}))).unwrap().is_satisfied());
    assert!(engine
        .evaluate(&ast, &doc(json!({"users": [{"role": "admin"}, {}]})))
        .unwrap()
        .is_open());
}

#[test]
fn exists_with_filter() {
    let engine = Engine::default();
    let ast = engine
        .parse(r#"(exists [u doc/users where (= u/active true)] (= u/role "admin"))"#)
        .unwrap();

    assert!(engine
        .evaluate(
            &ast,
            &doc(json!({"users": [
                {"active": false, "role": "admin"},
                {"active": true, "role": "admin"}
            ]}))
        )
        .unwrap()
        .is_satisfied());

    assert!(engine
        .evaluate(
            &ast,
            &doc(json!({"users": [
                {"active": true, "role": "guest"}
            ]}))
        )
        .unwrap()
        .is_contradicted());

    // No element satisfies the filter at all: refuted, not merely undecided.
    assert!(engine
        .evaluate(&ast, &doc(json!({"users": [{"active": false, "role": "admin"}]})))
        .unwrap()
        .is_contradicted());
}

#[test]
fn policy_reference_with_defaults() {
    let engine = Engine::default();
    let body = engine.parse("(> doc/level param/min)").unwrap();
    let module = Module::new("auth").with_policy(PolicyDef {
        name: "min-level".into(),
        params: BTreeMap::from([("min".to_string(), Some(Value::Int(0)))]),
        body,
    });
    engine.load_modules(vec![module]).unwrap();

    let at_default = engine.parse("(auth/min-level {})").unwrap();
    assert!(engine
        .evaluate(&at_default, &doc(json!({"level": 5})))
        .unwrap()
        .is_satisfied());

    // Call-site override beats the declared default (spec §4.4 "call-site
    // overrides context overrides default"): 5 > 10 is refuted.
    let overridden = engine.parse("(auth/min-level {min: 10})").unwrap();
    assert!(engine
        .evaluate(&overridden, &doc(json!({"level": 5})))
        .unwrap()
        .is_contradicted());
}

#[test]
fn tier_cache_reuses_compiled_instances_and_invalidates_on_operator_change() {
    let engine = Engine::default();
    let ast = engine.parse(r#"(= doc/role "admin")"#).unwrap();

    let first = engine.compile(&ast).unwrap();
    let second = engine.compile(&ast).unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &second));

    engine.register_operator("geo-within");
    let third = engine.compile(&ast).unwrap();
    assert!(!std::sync::Arc::ptr_eq(&first, &third));
}

/// Forcing each tier in turn on the same normalizable policy must produce the
/// same residual (spec §8 "tier equivalence"): the tier only changes how the
/// result is computed, never what it is.
#[test]
fn tier_equivalence_across_forced_tiers() {
    let cases: &[(&str, serde_json::Value)] = &[
        (r#"(= doc/role "admin")"#, json!({"role": "admin"})),
        (r#"(= doc/role "admin")"#, json!({"role": "guest"})),
        (r#"(= doc/role "admin")"#, json!({})),
        ("(and (> doc/x 3) (< doc/x 10))", json!({"x": 5})),
    ];

    for (source, document) in cases {
        let ast = polix_parser::parse(source).unwrap();
        let value = Value::from(document.clone());
        let scope = Scope::new(&value);

        let interpreted = polix_core::CompiledPolicy::compile_with(
            ast.clone(),
            0,
            0,
            Options { tier: Some(Tier::Interpreted), fallback: None, native: false },
        )
        .unwrap();
        let templated = polix_core::CompiledPolicy::compile_with(
            ast.clone(),
            0,
            0,
            Options { tier: Some(Tier::Templated), fallback: None, native: false },
        )
        .unwrap();
        let auto = polix_core::CompiledPolicy::compile(ast.clone(), 0).unwrap();

        let (r_interpreted, tier_forced) = interpreted.evaluate(&scope).unwrap();
        let (r_templated, _) = templated.evaluate(&scope).unwrap();
        let (r_auto, auto_tier) = auto.evaluate(&scope).unwrap();

        assert_eq!(tier_forced, Tier::Interpreted);
        assert_eq!(r_interpreted, r_templated);
        assert_eq!(r_interpreted, r_auto);
        assert_eq!(auto_tier, Tier::Templated);
    }
}

#[test]
fn engine_config_from_env_respects_overrides() {
    std::env::set_var("POLIX_CACHE_CAPACITY", "4");
    let config = EngineConfig::from_env();
    assert_eq!(config.cache_capacity.get(), 4);
    std::env::remove_var("POLIX_CACHE_CAPACITY");
}
