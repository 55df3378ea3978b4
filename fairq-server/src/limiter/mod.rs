//! Per-partition concurrency limiters.
//!
//! A limiter gates how many reservations may coexist on one partition. All
//! mutating paths run through the atomic script library; stale reservations
//! older than the lock TTL are reaped lazily on every check.

mod adaptive;
mod fixed;
mod null;

pub use adaptive::{AdaptiveLimiter, AdaptiveSettings};
pub use fixed::{FixedLimiter, FixedSettings};
pub use null::NullLimiter;

use crate::config::BrokerConfig;
use crate::core::error::{BrokerError, Result};
use crate::core::{KeyLayout, KvEngine};
use std::collections::HashMap;
use std::sync::Arc;

impl std::fmt::Debug for dyn ConcurrencyLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyLimiter")
            .field("name", &self.name())
            .finish()
    }
}

pub trait ConcurrencyLimiter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Configured ceiling; `None` means unbounded.
    fn max_concurrent(&self) -> Option<usize>;

    /// Grace window after which an unsettled reservation is treated as gone.
    /// Must exceed the worker's job-retry timeout.
    fn lock_ttl_secs(&self) -> u64;

    /// Cap in force right now; adaptive limiters resolve it per call.
    fn current_cap(&self, kv: &KvEngine, keys: &KeyLayout, queue: &str) -> Result<Option<usize>> {
        let _ = (kv, keys, queue);
        Ok(self.max_concurrent())
    }

    /// Whether the partition has room for one more reservation.
    fn can_process(
        &self,
        kv: &KvEngine,
        keys: &KeyLayout,
        queue: &str,
        partition: &str,
    ) -> Result<bool>;

    /// Reap, then record a reservation iff below the cap.
    fn acquire(
        &self,
        kv: &KvEngine,
        keys: &KeyLayout,
        queue: &str,
        partition: &str,
        reservation_id: &str,
    ) -> Result<bool>;

    /// Drop one reservation. Idempotent.
    fn release(
        &self,
        kv: &KvEngine,
        keys: &KeyLayout,
        queue: &str,
        partition: &str,
        reservation_id: &str,
    ) -> Result<()>;

    /// Live reservation count after reaping.
    fn active_count(
        &self,
        kv: &KvEngine,
        keys: &KeyLayout,
        queue: &str,
        partition: &str,
    ) -> Result<usize>;

    /// Bookkeeping hook invoked after a reservation was created outside
    /// `acquire` (the pop script records the reservation itself).
    fn record_acquired(&self, kv: &KvEngine, keys: &KeyLayout, queue: &str) -> Result<()> {
        let _ = (kv, keys, queue);
        Ok(())
    }
}

type LimiterFactory = Arc<dyn Fn(&BrokerConfig) -> Arc<dyn ConcurrencyLimiter> + Send + Sync>;

/// Open set of named limiters. The builtins (`null`, `simple`, `adaptive`)
/// are pre-registered; hosts may add their own before resolution.
pub struct LimiterRegistry {
    factories: HashMap<String, LimiterFactory>,
}

impl LimiterRegistry {
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("null", |_| Arc::new(NullLimiter));
        registry.register("simple", |config: &BrokerConfig| {
            Arc::new(FixedLimiter::new(config.limiters.simple.clone()))
        });
        registry.register("adaptive", |config: &BrokerConfig| {
            Arc::new(AdaptiveLimiter::new(config.limiters.adaptive.clone()))
        });
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&BrokerConfig) -> Arc<dyn ConcurrencyLimiter> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn resolve(&self, name: &str, config: &BrokerConfig) -> Result<Arc<dyn ConcurrencyLimiter>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| BrokerError::UnknownLimiter(name.to_string()))?;
        Ok(factory(config))
    }
}

impl Default for LimiterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
