//! The policy cache (spec §4.7 "policy cache"): an LRU of [`CompiledPolicy`]
//! keyed by a blake3 fingerprint of `(source AST, registry version)`, so a
//! policy recompiled after an unrelated module load still hits the cache if
//! its own dependencies did not change — and a compiled policy invalidated
//! by a genuine registry change falls out under normal LRU pressure rather
//! than needing an explicit invalidation pass.

use crate::error::CompileError;
use crate::module::ModuleRegistry;
use crate::operator::OperatorRegistry;
use crate::tier::CompiledPolicy;
use lru::LruCache;
use parking_lot::Mutex;
use polix_ast::AstNode;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A 32-byte blake3 fingerprint identifying a compiled policy.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(body: &AstNode, registry_version: u64, operator_version: u64) -> Self {
        let mut hasher = blake3::Hasher::new();
        hash_node(&mut hasher, body);
        hasher.update(&registry_version.to_le_bytes());
        hasher.update(&operator_version.to_le_bytes());
        Fingerprint(*hasher.finalize().as_bytes())
    }
}

/// Feeds a stable byte representation of `node` into `hasher`. Debug
/// formatting is good enough here: it is deterministic within a process and
/// the fingerprint only needs to distinguish ASTs, not survive across binary
/// versions.
fn hash_node(hasher: &mut blake3::Hasher, node: &AstNode) {
    hasher.update(format!("{node:?}").as_bytes());
}

/// Point-in-time hit/miss counters for a [`PolicyCache`] (spec §6 "Cache
/// API"). Counters accumulate for the cache's whole lifetime; `clear()` does
/// not reset them, only `size` moving back to zero.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

impl CacheStats {
    /// Fraction of lookups that hit, in `[0.0, 1.0]`. `0.0` when nothing has
    /// been looked up yet, rather than `NaN`.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// A thread-safe, bounded cache of compiled policies.
pub struct PolicyCache {
    inner: Mutex<LruCache<Fingerprint, Arc<CompiledPolicy>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PolicyCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Looks up an already-compiled policy without compiling on a miss,
    /// counting towards [`Self::stats`].
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<CompiledPolicy>> {
        let hit = self.inner.lock().get(fingerprint).cloned();
        if hit.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    /// Inserts (or replaces) a compiled policy under `fingerprint`, evicting
    /// the least-recently-used entry if the cache is already at capacity.
    pub fn put(&self, fingerprint: Fingerprint, compiled: Arc<CompiledPolicy>) {
        if let Some((evicted, _)) = self.inner.lock().push(fingerprint, compiled) {
            if evicted != fingerprint {
                tracing::trace!("policy cache evicted {evicted:?} under capacity pressure");
            }
        }
    }

    /// Returns the compiled policy for `body`, compiling and inserting it on
    /// a cache miss.
    pub fn get_or_compile(
        &self,
        body: &AstNode,
        registry: Option<&ModuleRegistry>,
    ) -> Result<Arc<CompiledPolicy>, CompileError> {
        self.get_or_compile_versioned(body, registry, None)
    }

    /// Like [`Self::get_or_compile`], additionally keying the fingerprint on
    /// a live [`OperatorRegistry`]'s version so a custom-operator
    /// registration invalidates previously cached entries the same way a
    /// module load does.
    pub fn get_or_compile_versioned(
        &self,
        body: &AstNode,
        registry: Option<&ModuleRegistry>,
        operators: Option<&OperatorRegistry>,
    ) -> Result<Arc<CompiledPolicy>, CompileError> {
        let registry_version = registry.map_or(0, ModuleRegistry::version);
        let operator_version = operators.map_or(0, OperatorRegistry::version);
        let fingerprint = Fingerprint::of(body, registry_version, operator_version);
        if let Some(hit) = self.get(&fingerprint) {
            return Ok(hit);
        }
        let compiled =
            Arc::new(CompiledPolicy::compile_versioned(body.clone(), registry_version, operator_version)?);
        self.put(fingerprint, compiled.clone());
        Ok(compiled)
    }

    /// Precompiles `bodies` into the cache ahead of first use, skipping any
    /// already present (spec §6 "warm the cache before traffic arrives").
    /// Stops at (and returns) the first compile error.
    pub fn warm(
        &self,
        bodies: &[AstNode],
        registry: Option<&ModuleRegistry>,
    ) -> Result<(), CompileError> {
        for body in bodies {
            self.get_or_compile(body, registry)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Returns a snapshot of this cache's hit/miss counters and current size.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.len(),
        }
    }
}

impl Default for PolicyCache {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(128).expect("128 is nonzero"))
    }
}
