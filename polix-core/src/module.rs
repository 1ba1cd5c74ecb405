//! The module registry and loader (spec §4.4 "Modules and policy references").
//!
//! Policies are grouped into namespaced modules. `doc`, `self`, `param`,
//! `event` and `fn` are reserved — they always resolve to the corresponding
//! built-in accessor/value-function rather than a loaded module. A module may
//! declare aliases for the namespaces it references, and policies may invoke
//! other policies (possibly in other modules) by `namespace/name`.
//!
//! Loading is atomic: a batch of modules is validated (reserved-namespace
//! check, duplicate check, dependency cycle check) against a *candidate*
//! graph before anything is committed to the live registry, so a rejected
//! batch leaves the registry exactly as it was (spec §4.4 "all-or-nothing").

use crate::error::LoaderError;
use fnv::FnvHashMap;
use parking_lot::RwLock;
use polix_ast::{AstNode, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Namespaces that always resolve to a built-in accessor, never to a loaded
/// module (spec §4.2 "Namespaces").
pub const RESERVED_NAMESPACES: &[&str] = &["doc", "self", "param", "event", "fn"];

/// One named, parameterized policy body. Each declared parameter carries an
/// optional default, consulted when a call site omits that parameter (spec
/// §4.4 "call-site overrides context overrides default").
#[derive(Clone, Debug, PartialEq)]
pub struct PolicyDef {
    pub name: String,
    pub params: BTreeMap<String, Option<Value>>,
    pub body: AstNode,
}

/// A namespace's worth of policies plus the aliases it resolves references
/// through (spec §4.4 "a module may alias the namespaces it depends on").
#[derive(Clone, Debug, Default)]
pub struct Module {
    pub namespace: String,
    pub aliases: BTreeMap<String, String>,
    pub policies: BTreeMap<String, PolicyDef>,
}

impl Module {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            aliases: BTreeMap::new(),
            policies: BTreeMap::new(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>, target: impl Into<String>) -> Self {
        self.aliases.insert(alias.into(), target.into());
        self
    }

    pub fn with_policy(mut self, policy: PolicyDef) -> Self {
        self.policies.insert(policy.name.clone(), policy);
        self
    }

    /// Resolves a possibly-aliased namespace to its canonical form.
    fn resolve_namespace<'a>(&'a self, namespace: &'a str) -> &'a str {
        self.aliases
            .get(namespace)
            .map(String::as_str)
            .unwrap_or(namespace)
    }

    fn dependencies(&self) -> Vec<String> {
        let mut deps = Vec::new();
        for policy in self.policies.values() {
            collect_policy_refs(&policy.body, &mut deps);
        }
        deps.into_iter()
            .map(|ns| self.resolve_namespace(&ns).to_string())
            .filter(|ns| ns != &self.namespace && !RESERVED_NAMESPACES.contains(&ns.as_str()))
            .collect()
    }
}

fn collect_policy_refs(node: &AstNode, out: &mut Vec<String>) {
    use polix_ast::Node::*;
    match &node.node {
        PolicyReference { namespace, params, .. } => {
            out.push(namespace.clone());
            if let Some(params) = params {
                for expr in params.values() {
                    collect_policy_refs(expr, out);
                }
            }
        }
        FunctionCall { args, .. } => {
            for arg in args {
                collect_policy_refs(arg, out);
            }
        }
        Quantifier { binding, body, .. } => {
            collect_policy_refs(&binding.collection, out);
            if let Some(filter) = &binding.filter {
                collect_policy_refs(filter, out);
            }
            collect_policy_refs(body, out);
        }
        ValueFn { binding, .. } => {
            collect_policy_refs(&binding.collection, out);
            if let Some(filter) = &binding.filter {
                collect_policy_refs(filter, out);
            }
        }
        LetBinding { bindings, body } => {
            for pair in bindings {
                collect_policy_refs(&pair.expr, out);
            }
            collect_policy_refs(body, out);
        }
        Literal(_) | DocAccessor(_) | BindingAccessor { .. } | SelfAccessor(_)
        | ParamAccessor(_) | EventAccessor(_) | LiteralWrapper(_) => {}
    }
}

#[derive(Copy, Clone, Eq, PartialEq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Three-colour DFS cycle detection plus topological ordering over a
/// candidate set of modules (spec §4.4 "detect cycles before committing").
fn topo_order(modules: &BTreeMap<String, Module>) -> Result<Vec<String>, LoaderError> {
    let mut color: FnvHashMap<&str, Color> = modules.keys().map(|k| (k.as_str(), Color::White)).collect();
    let mut order = Vec::with_capacity(modules.len());
    let mut stack = Vec::new();

    fn visit<'a>(
        name: &'a str,
        modules: &'a BTreeMap<String, Module>,
        color: &mut FnvHashMap<&'a str, Color>,
        order: &mut Vec<String>,
        stack: &mut Vec<&'a str>,
    ) -> Result<(), LoaderError> {
        match color.get(name) {
            Some(Color::Black) => return Ok(()),
            Some(Color::Gray) => {
                stack.push(name);
                let cycle = stack
                    .iter()
                    .skip_while(|n| **n != name)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(" -> ");
                return Err(LoaderError::Cycle(cycle));
            }
            _ => {}
        }
        color.insert(name, Color::Gray);
        stack.push(name);
        if let Some(module) = modules.get(name) {
            for dep in module.dependencies() {
                let Some((dep_key, _)) = modules.get_key_value(&dep) else {
                    return Err(LoaderError::UnknownDependency(name.to_string(), dep));
                };
                visit(dep_key.as_str(), modules, color, order, stack)?;
            }
        }
        stack.pop();
        color.insert(name, Color::Black);
        order.push(name.to_string());
        Ok(())
    }

    for name in modules.keys() {
        visit(name.as_str(), modules, &mut color, &mut order, &mut stack)?;
    }
    Ok(order)
}

/// The live, process-wide (or per-engine) set of loaded modules, plus a
/// monotonic version bumped on every successful commit — consulted by the
/// T1 guarded evaluation tier and the policy cache fingerprint (spec §4.7).
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    inner: Arc<RwLock<RegistryState>>,
}

#[derive(Default)]
struct RegistryState {
    modules: BTreeMap<String, Module>,
    version: u64,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.inner.read().version
    }

    pub fn get_module(&self, namespace: &str) -> Option<Module> {
        self.inner.read().modules.get(namespace).cloned()
    }

    pub fn get_policy(&self, namespace: &str, name: &str) -> Option<PolicyDef> {
        self.inner
            .read()
            .modules
            .get(namespace)
            .and_then(|m| m.policies.get(name))
            .cloned()
    }

    /// Validates and atomically commits a batch of modules (spec §4.4).
    /// On error, the registry is left completely unchanged.
    pub fn load(&self, batch: Vec<Module>) -> Result<(), LoaderError> {
        let mut state = self.inner.write();
        let mut candidate = state.modules.clone();
        for module in batch {
            if RESERVED_NAMESPACES.contains(&module.namespace.as_str()) {
                let err = LoaderError::ReservedNamespace(module.namespace);
                tracing::warn!("{err}");
                return Err(err);
            }
            if candidate.contains_key(&module.namespace) {
                let err = LoaderError::DuplicateNamespace(module.namespace);
                tracing::warn!("{err}");
                return Err(err);
            }
            candidate.insert(module.namespace.clone(), module);
        }
        let _order = topo_order(&candidate).map_err(|err| {
            tracing::warn!("{err}");
            err
        })?;
        state.modules = candidate;
        state.version += 1;
        tracing::debug!("module registry version bumped to {}", state.version);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polix_ast::{Node, SourcePos, Spanned};

    fn policy_ref(namespace: &str, name: &str) -> AstNode {
        Spanned::new(
            Node::PolicyReference {
                namespace: namespace.to_string(),
                name: name.to_string(),
                params: None,
            },
            SourcePos::default(),
        )
    }

    #[test]
    fn loads_independent_modules() {
        let registry = ModuleRegistry::new();
        let a = Module::new("a").with_policy(PolicyDef {
            name: "p".into(),
            params: BTreeMap::new(),
            body: policy_ref("doc", "ignored"),
        });
        registry.load(vec![a]).unwrap();
        assert_eq!(registry.version(), 1);
        assert!(registry.get_policy("a", "p").is_some());
    }

    #[test]
    fn rejects_reserved_namespace() {
        let registry = ModuleRegistry::new();
        let err = registry.load(vec![Module::new("doc")]).unwrap_err();
        assert!(matches!(err, LoaderError::ReservedNamespace(_)));
        assert_eq!(registry.version(), 0);
    }

    #[test]
    fn detects_cycle_and_leaves_registry_untouched() {
        let registry = ModuleRegistry::new();
        let a = Module::new("a").with_policy(PolicyDef {
            name: "p".into(),
            params: BTreeMap::new(),
            body: policy_ref("b", "q"),
        });
        let b = Module::new("b").with_policy(PolicyDef {
            name: "q".into(),
            params: BTreeMap::new(),
            body: policy_ref("a", "p"),
        });
        let err = registry.load(vec![a, b]).unwrap_err();
        assert!(matches!(err, LoaderError::Cycle(_)));
        assert_eq!(registry.version(), 0);
        assert!(registry.get_module("a").is_none());
    }

    #[test]
    fn alias_resolves_dependency() {
        let registry = ModuleRegistry::new();
        let a = Module::new("a")
            .with_alias("u", "users")
            .with_policy(PolicyDef {
                name: "p".into(),
                params: BTreeMap::new(),
                body: policy_ref("u", "q"),
            });
        let users = Module::new("users").with_policy(PolicyDef {
            name: "q".into(),
            params: BTreeMap::new(),
            body: policy_ref("doc", "ignored"),
        });
        registry.load(vec![a, users]).unwrap();
        assert_eq!(registry.version(), 1);
    }
}
