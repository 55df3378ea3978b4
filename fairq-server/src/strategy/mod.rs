//! Partition-selection strategies.
//!
//! A strategy decides which partition the next worker is served from.
//! Implementations are registered by name and resolved from configuration;
//! an unknown name fails fast at resolution time.

mod random;
mod round_robin;
mod smart_fair;

pub use random::RandomStrategy;
pub use round_robin::RoundRobinStrategy;
pub use smart_fair::{SmartFairStrategy, SmartSettings};

use crate::config::BrokerConfig;
use crate::core::error::{BrokerError, Result};
use crate::core::{KeyLayout, KvEngine};
use std::collections::HashMap;
use std::sync::Arc;

impl std::fmt::Debug for dyn PartitionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionStrategy")
            .field("name", &self.name())
            .finish()
    }
}

/// Picks the next partition to serve for a queue, or `None` when no
/// partition has queued work.
pub trait PartitionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn select(&self, kv: &KvEngine, keys: &KeyLayout, queue: &str) -> Result<Option<String>>;
}

type StrategyFactory = Arc<dyn Fn(&BrokerConfig) -> Arc<dyn PartitionStrategy> + Send + Sync>;

/// Open set of named strategies. The builtins (`random`, `round-robin`,
/// `smart`) are pre-registered; hosts may add their own before resolution.
pub struct StrategyRegistry {
    factories: HashMap<String, StrategyFactory>,
}

impl StrategyRegistry {
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("random", |_| Arc::new(RandomStrategy));
        registry.register("round-robin", |_| Arc::new(RoundRobinStrategy));
        registry.register("smart", |config: &BrokerConfig| {
            Arc::new(SmartFairStrategy::new(config.strategies.smart.clone()))
        });
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&BrokerConfig) -> Arc<dyn PartitionStrategy> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn resolve(&self, name: &str, config: &BrokerConfig) -> Result<Arc<dyn PartitionStrategy>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| BrokerError::UnknownStrategy(name.to_string()))?;
        Ok(factory(config))
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
