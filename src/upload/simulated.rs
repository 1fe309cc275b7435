//! Simulated Object Store with Fault Injection
//!
//! Wraps another store and injects put failures and latency from a seeded
//! RNG, so a given seed always produces the same fault sequence.

use super::object_store::{ObjectMeta, ObjectStore};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::future::Future;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for simulated fault injection
#[derive(Debug, Clone)]
pub struct SimulatedStoreConfig {
    /// Probability of PUT operation failure
    pub put_fail_prob: f64,
    /// Simulated put latency range in milliseconds (min, max)
    pub latency_range_ms: (u64, u64),
}

impl Default for SimulatedStoreConfig {
    fn default() -> Self {
        SimulatedStoreConfig {
            put_fail_prob: 0.01,        // 1%
            latency_range_ms: (0, 10), // 0 - 10ms
        }
    }
}

impl SimulatedStoreConfig {
    /// No faults - for baseline testing
    pub fn no_faults() -> Self {
        SimulatedStoreConfig {
            put_fail_prob: 0.0,
            latency_range_ms: (0, 0),
        }
    }

    /// Every put fails
    pub fn always_fail() -> Self {
        SimulatedStoreConfig {
            put_fail_prob: 1.0,
            latency_range_ms: (0, 0),
        }
    }

    /// Every put succeeds after a fixed delay
    pub fn slow(latency: Duration) -> Self {
        let ms = latency.as_millis() as u64;
        SimulatedStoreConfig {
            put_fail_prob: 0.0,
            latency_range_ms: (ms, ms),
        }
    }
}

/// Statistics for fault injection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedStoreStats {
    pub put_attempts: u64,
    pub put_failures: u64,
}

struct SimulatedStoreInner {
    rng: ChaCha8Rng,
    stats: SimulatedStoreStats,
}

/// Simulated object store that wraps another store and injects faults
pub struct SimulatedObjectStore<S: ObjectStore> {
    inner_store: S,
    config: SimulatedStoreConfig,
    state: Arc<Mutex<SimulatedStoreInner>>,
}

impl<S: ObjectStore> SimulatedObjectStore<S> {
    pub fn new(inner_store: S, seed: u64, config: SimulatedStoreConfig) -> Self {
        debug_assert!(
            (0.0..=1.0).contains(&config.put_fail_prob),
            "Precondition: put_fail_prob must be a probability"
        );
        debug_assert!(
            config.latency_range_ms.0 <= config.latency_range_ms.1,
            "Precondition: latency range must be ordered"
        );

        SimulatedObjectStore {
            inner_store,
            config,
            state: Arc::new(Mutex::new(SimulatedStoreInner {
                rng: ChaCha8Rng::seed_from_u64(seed),
                stats: SimulatedStoreStats::default(),
            })),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner_store
    }

    pub fn stats(&self) -> SimulatedStoreStats {
        self.state.lock().stats.clone()
    }

    /// Roll the dice for one put: (latency, should_fail)
    fn plan_put(&self) -> (Duration, bool) {
        let mut state = self.state.lock();
        state.stats.put_attempts += 1;

        let (min, max) = self.config.latency_range_ms;
        let latency = if max > min {
            state.rng.gen_range(min..=max)
        } else {
            min
        };
        let fail = state.rng.gen_bool(self.config.put_fail_prob);
        if fail {
            state.stats.put_failures += 1;
        }
        (Duration::from_millis(latency), fail)
    }
}

impl<S: ObjectStore> ObjectStore for SimulatedObjectStore<S> {
    fn put<'a>(
        &'a self,
        key: &'a str,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + 'a>> {
        let (latency, fail) = self.plan_put();
        Box::pin(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            if fail {
                return Err(IoError::new(ErrorKind::Other, "simulated put failure"));
            }
            self.inner_store.put(key, data).await
        })
    }

    fn head<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<ObjectMeta>> + Send + 'a>> {
        self.inner_store.head(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::InMemoryObjectStore;

    #[tokio::test]
    async fn test_no_faults_passes_through() {
        let store = SimulatedObjectStore::new(
            InMemoryObjectStore::new(),
            1,
            SimulatedStoreConfig::no_faults(),
        );
        store.put("k", b"v").await.unwrap();
        assert_eq!(store.inner().object("k").unwrap(), b"v");
        assert_eq!(store.head("k").await.unwrap().size_bytes, 1);
        assert_eq!(
            store.stats(),
            SimulatedStoreStats {
                put_attempts: 1,
                put_failures: 0
            }
        );
    }

    #[tokio::test]
    async fn test_always_fail() {
        let store = SimulatedObjectStore::new(
            InMemoryObjectStore::new(),
            1,
            SimulatedStoreConfig::always_fail(),
        );
        assert!(store.put("k", b"v").await.is_err());
        assert!(store.inner().is_empty());
        assert_eq!(store.stats().put_failures, 1);
    }

    #[tokio::test]
    async fn test_same_seed_same_faults() {
        async fn outcomes(seed: u64) -> Vec<bool> {
            let config = SimulatedStoreConfig {
                put_fail_prob: 0.5,
                latency_range_ms: (0, 0),
            };
            let store = SimulatedObjectStore::new(InMemoryObjectStore::new(), seed, config);
            let mut results = Vec::new();
            for i in 0..32 {
                results.push(store.put(&format!("k{}", i), b"v").await.is_ok());
            }
            results
        }

        assert_eq!(outcomes(7).await, outcomes(7).await);
    }
}
