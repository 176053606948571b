//! Content-addressable computation cache with request coalescing.
//!
//! Keys are derived solely from the logical inputs of a computation
//! (operation name + canonical JSON of the parameters), so changed inputs
//! naturally produce a new key instead of requiring manual invalidation.
//! Trip-derived computations include each trip's id and version in the
//! inputs. TTL expiry is reserved for computations whose inputs are not
//! fully capturable in the key.
//!
//! Coalescing: while a computation for key K is in flight, further callers
//! for K wait on a `watch` channel and are released together when the
//! first computation completes. A computation that exceeds the budget is
//! aborted and the key released so waiters are never deadlocked behind a
//! hung computation; one of them simply takes over.
//!
//! Storage is `put_if_absent`: a second writer with a *different* value
//! under a populated key is a correctness bug and is rejected loudly,
//! never resolved by overwrite.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, warn};

use tipledger_core::defaults::COMPUTE_BUDGET_SECS;
use tipledger_core::{CacheEntry, CachePut, CacheStore, Error, Result};

/// Hex chars of the input digest kept in the key.
const KEY_DIGEST_LEN: usize = 16;

/// Cache counters for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Callers served by someone else's in-flight computation.
    pub coalesced: u64,
    /// Determinism-invariant violations refused by the store.
    pub collisions: u64,
}

#[derive(Default)]
struct StatsInner {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    collisions: AtomicU64,
}

/// The computation cache.
#[derive(Clone)]
pub struct ComputationCache {
    store: Arc<dyn CacheStore>,
    inflight: Arc<Mutex<HashMap<String, watch::Sender<bool>>>>,
    budget: Duration,
    stats: Arc<StatsInner>,
}

impl ComputationCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self::with_budget(store, Duration::from_secs(COMPUTE_BUDGET_SECS))
    }

    /// Create a cache with a custom compute budget
    /// (`TIPLEDGER_COMPUTE_BUDGET_SECS` in the service wiring).
    pub fn with_budget(store: Arc<dyn CacheStore>, budget: Duration) -> Self {
        Self {
            store,
            inflight: Arc::new(Mutex::new(HashMap::new())),
            budget,
            stats: Arc::new(StatsInner::default()),
        }
    }

    /// Derive the deterministic key for an operation and its inputs.
    ///
    /// `inputs` must serialize deterministically (structs and sorted
    /// vectors, not hash maps). The key is `{op}:{sha256-prefix}` so
    /// whole operation scopes can be invalidated by prefix.
    pub fn cache_key<I: Serialize>(op: &str, inputs: &I) -> Result<String> {
        let canonical = serde_json::to_string(inputs)?;
        let mut hasher = Sha256::new();
        hasher.update(op.as_bytes());
        hasher.update(b":");
        hasher.update(canonical.as_bytes());
        let digest = hex::encode(hasher.finalize());
        Ok(format!("{}:{}", op, &digest[..KEY_DIGEST_LEN]))
    }

    /// Return the cached value for (op, inputs), or run `compute` exactly
    /// once across all concurrent callers and store the result.
    ///
    /// Returns `(value, cache_hit)`.
    pub async fn get_or_compute<I, T, F, Fut>(
        &self,
        op: &str,
        inputs: &I,
        ttl_seconds: Option<i64>,
        compute: F,
    ) -> Result<(T, bool)>
    where
        I: Serialize,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let key = Self::cache_key(op, inputs)?;
        // FnOnce in a retry loop: a caller computes at most once (it either
        // returns from the compute arm or keeps waiting), so take() is safe.
        let mut compute = Some(compute);
        let mut waited = false;

        loop {
            if let Some(entry) = self.store.get(&key).await? {
                if waited {
                    self.stats.coalesced.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                }
                debug!(
                    subsystem = "cache",
                    op = "get_or_compute",
                    cache_key = %key,
                    cache_hit = true,
                    "cache hit"
                );
                let value = serde_json::from_value(entry.value)?;
                return Ok((value, true));
            }

            // Miss: become the computer for this key, or wait on whoever is.
            let rx = {
                let mut inflight = self.inflight.lock().await;
                match inflight.get(&key) {
                    Some(tx) => Some(tx.subscribe()),
                    None => {
                        let (tx, _) = watch::channel(false);
                        inflight.insert(key.clone(), tx);
                        None
                    }
                }
            };

            if let Some(mut rx) = rx {
                waited = true;
                // Err means the sender was dropped; either way, recheck.
                let _ = rx.changed().await;
                continue;
            }

            let outcome = self.run_computation(&key, ttl_seconds, compute.take()).await;

            // Release the key and wake all waiters, success or not.
            let tx = self.inflight.lock().await.remove(&key);
            if let Some(tx) = tx {
                let _ = tx.send(true);
            }

            return outcome.map(|value| (value, false));
        }
    }

    async fn run_computation<T, F, Fut>(
        &self,
        key: &str,
        ttl_seconds: Option<i64>,
        compute: Option<F>,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let compute = compute
            .ok_or_else(|| Error::Internal("compute closure consumed twice".to_string()))?;

        let started = Instant::now();
        let value = match tokio::time::timeout(self.budget, compute()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    subsystem = "cache",
                    op = "get_or_compute",
                    cache_key = %key,
                    budget_secs = self.budget.as_secs(),
                    "computation exceeded budget; releasing key"
                );
                return Err(Error::ComputeBudgetExceeded(key.to_string()));
            }
        };
        let compute_ms = started.elapsed().as_millis() as i64;

        let entry = CacheEntry {
            key: key.to_string(),
            value: serde_json::to_value(&value)?,
            compute_ms,
            created_at: Utc::now(),
            ttl_seconds,
        };

        match self.store.put_if_absent(&entry).await? {
            CachePut::Stored | CachePut::AlreadyPresent => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                debug!(
                    subsystem = "cache",
                    op = "get_or_compute",
                    cache_key = %key,
                    cache_hit = false,
                    duration_ms = compute_ms,
                    "computed and stored"
                );
                Ok(value)
            }
            CachePut::Conflict => {
                self.stats.collisions.fetch_add(1, Ordering::Relaxed);
                error!(
                    subsystem = "cache",
                    op = "get_or_compute",
                    cache_key = %key,
                    "cache key collision: differing value under a populated key"
                );
                Err(Error::CacheKeyCollision(key.to_string()))
            }
        }
    }

    /// Invalidate every entry in an operation scope (e.g. all insights
    /// derived from one trip). Returns how many entries were removed.
    pub async fn invalidate_scope(&self, scope: &str) -> Result<u64> {
        let removed = self.store.invalidate_prefix(scope).await?;
        if removed > 0 {
            debug!(
                subsystem = "cache",
                op = "invalidate_scope",
                scope,
                removed,
                "invalidated cache scope"
            );
        }
        Ok(removed)
    }

    /// Snapshot of the cache counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            coalesced: self.stats.coalesced.load(Ordering::Relaxed),
            collisions: self.stats.collisions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize)]
    struct Inputs<'a> {
        range: &'a str,
        trips: Vec<(uuid::Uuid, i64)>,
    }

    #[derive(Serialize, Deserialize)]
    struct Payload {
        total: f64,
    }

    #[test]
    fn test_cache_key_is_deterministic() {
        let id = uuid::Uuid::new_v4();
        let a = ComputationCache::cache_key(
            "reanalysis",
            &Inputs {
                range: "2026-08/w1",
                trips: vec![(id, 3)],
            },
        )
        .unwrap();
        let b = ComputationCache::cache_key(
            "reanalysis",
            &Inputs {
                range: "2026-08/w1",
                trips: vec![(id, 3)],
            },
        )
        .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_cache_key_changes_with_inputs() {
        let id = uuid::Uuid::new_v4();
        let v3 = ComputationCache::cache_key(
            "reanalysis",
            &Inputs {
                range: "2026-08/w1",
                trips: vec![(id, 3)],
            },
        )
        .unwrap();
        // Bumping a trip version must produce a different key: invalidation
        // by construction.
        let v4 = ComputationCache::cache_key(
            "reanalysis",
            &Inputs {
                range: "2026-08/w1",
                trips: vec![(id, 4)],
            },
        )
        .unwrap();
        assert_ne!(v3, v4);
    }

    #[test]
    fn test_cache_key_changes_with_operation() {
        let a = ComputationCache::cache_key("op-a", &42).unwrap();
        let b = ComputationCache::cache_key("op-b", &42).unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("op-a:"));
        assert!(b.starts_with("op-b:"));
    }
}
