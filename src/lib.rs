#![deny(missing_docs)]
//! # polix
//!
//! The facade crate gluing `polix-parser` (surface syntax) to `polix-core`
//! (residual algebra, module registry, tiered evaluator) behind the external
//! interfaces of a declarative policy/constraint engine.
//!
//! Most callers only need [`Engine`]: parse a policy once, register modules
//! it depends on, then evaluate it against any number of documents.

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use polix_core::{
    CacheStats, CompiledPolicy, Module, ModuleRegistry, Options, OperatorRegistry, PolicyCache,
    Residual, Scope,
};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

pub use polix_ast::{AstNode, Literal, Node, Path, Segment, Value};
pub use polix_core::{
    conflict, constraints_to_residual, negate, normalize, residual_to_constraints, result_to_policy,
    unify, AtomicConstraint, CompileError, ComplexMarker, Constraint, ConstraintSet,
    ConstraintValue, CrossKeyConstraint, LoaderError, Options as CompileOptions, PolicyDef, Reason,
    ResultKind, Tier,
};
pub use polix_parser::ParseError;

/// Runtime configuration for an [`Engine`], read from the environment by
/// [`EngineConfig::from_env`] so a process-wide default can be tuned without
/// code changes.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Maximum number of compiled policies the engine's cache holds.
    pub cache_capacity: NonZeroUsize,
    /// Whether the native-codegen tier (T3) may be advertised. Has no effect
    /// unless the crate is built with the `native-codegen` feature.
    pub native_codegen: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_capacity: NonZeroUsize::new(128).expect("128 is nonzero"),
            native_codegen: false,
        }
    }
}

impl EngineConfig {
    /// Reads `POLIX_CACHE_CAPACITY` and `POLIX_NATIVE_CODEGEN` from the
    /// environment, falling back to defaults for unset or unparsable values.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("POLIX_CACHE_CAPACITY") {
            if let Ok(parsed) = raw.parse::<usize>() {
                if let Some(capacity) = NonZeroUsize::new(parsed) {
                    config.cache_capacity = capacity;
                }
            }
        }
        if let Ok(raw) = std::env::var("POLIX_NATIVE_CODEGEN") {
            config.native_codegen = matches!(raw.as_str(), "1" | "true" | "yes");
        }
        config
    }
}

/// Installs a `tracing` subscriber reading `RUST_LOG`, writing to stderr.
/// Idempotent: a second call is a no-op. Library code below this point only
/// emits `tracing` events; only callers (the CLI, or an application's own
/// `main`) decide whether and how to install a subscriber.
pub fn install_tracing() {
    static INSTALLED: OnceCell<()> = OnceCell::new();
    INSTALLED.get_or_init(|| {
        let env = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_else(|_| "info".to_owned());
        let subscriber = tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(EnvFilter::new(env))
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber).ok();
    });
}

/// A parsed, registry-bound policy engine: parser + module registry + policy
/// cache, evaluated against documents supplied per call.
pub struct Engine {
    registry: ModuleRegistry,
    operators: OperatorRegistry,
    cache: PolicyCache,
}

impl Engine {
    /// Creates an engine with the given configuration.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            registry: ModuleRegistry::new(),
            operators: OperatorRegistry::new(),
            cache: PolicyCache::new(config.cache_capacity),
        }
    }

    /// Registers a custom operator name beyond the built-in set, bumping the
    /// engine's operator-registry version so previously cached compiled
    /// policies are no longer considered fresh for the T1/T2 tiers.
    pub fn register_operator(&self, op: impl Into<String>) {
        self.operators.register(op)
    }

    /// Returns the operator registry's current version counter.
    pub fn operator_registry_version(&self) -> u64 {
        self.operators.version()
    }

    /// Loads a batch of modules into the engine's registry, atomically: on
    /// error the registry is left exactly as it was before the call (spec §7
    /// "the registry is not partially modified").
    pub fn load_modules(&self, modules: Vec<Module>) -> Result<(), LoaderError> {
        self.registry.load(modules)
    }

    /// Parses `source` into an [`AstNode`].
    pub fn parse(&self, source: &str) -> Result<AstNode, ParseError> {
        polix_parser::parse(source)
    }

    /// Compiles `body`, reusing a cached [`CompiledPolicy`] when one exists
    /// for the same AST, registry version and operator-registry version.
    pub fn compile(&self, body: &AstNode) -> Result<Arc<CompiledPolicy>, CompileError> {
        self.cache
            .get_or_compile_versioned(body, Some(&self.registry), Some(&self.operators))
    }

    /// Compiles `body` while forcing a specific tier per `opts` (spec §6/§7
    /// "Options"), bypassing the cache so the forced choice is never masked
    /// by a previously cached entry.
    pub fn compile_with_options(
        &self,
        body: &AstNode,
        opts: Options,
    ) -> Result<CompiledPolicy, CompileError> {
        CompiledPolicy::compile_with(
            body.clone(),
            self.registry.version(),
            self.operators.version(),
            opts,
        )
    }

    /// Parses, compiles and evaluates `source` against `document` in one
    /// call, the common case for a one-shot policy check.
    pub fn evaluate_source(&self, source: &str, document: &Value) -> Result<Residual> {
        let ast = self.parse(source).with_context(|| "parsing policy")?;
        self.evaluate(&ast, document).with_context(|| "evaluating policy")
    }

    /// Evaluates an already-parsed AST against `document`.
    pub fn evaluate(&self, body: &AstNode, document: &Value) -> Result<Residual> {
        let compiled = self.compile(body).with_context(|| "compiling policy")?;
        let scope = Scope::new(document)
            .with_registry(&self.registry)
            .with_operators(&self.operators);
        let (residual, _tier) = compiled.evaluate(&scope).with_context(|| "evaluating policy")?;
        Ok(residual)
    }

    /// Returns the number of compiled policies currently cached.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Drops every cached compiled policy.
    pub fn clear_cache(&self) {
        self.cache.clear()
    }

    /// Returns this engine's cache hit/miss counters and current size.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Precompiles `bodies` into the cache ahead of first evaluation.
    pub fn warm_cache(&self, bodies: &[AstNode]) -> Result<(), CompileError> {
        self.cache.warm(bodies, Some(&self.registry))
    }

    /// Returns the registry's current version counter.
    pub fn registry_version(&self) -> u64 {
        self.registry.version()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

static DEFAULT_ENGINE: OnceCell<Engine> = OnceCell::new();

/// Returns the process-wide default engine, built from [`EngineConfig::from_env`]
/// on first access. Tests that need an isolated engine should construct their
/// own `Engine` rather than use this handle (spec §9 "a process-wide default
/// handle... must be isolatable for testing").
pub fn default_engine() -> &'static Engine {
    DEFAULT_ENGINE.get_or_init(|| Engine::new(EngineConfig::from_env()))
}
