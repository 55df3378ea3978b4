use super::ConcurrencyLimiter;
use crate::core::error::Result;
use crate::core::kv::unix_now;
use crate::core::scripts;
use crate::core::{KeyLayout, KvEngine};
use serde::{Deserialize, Serialize};

/// Settings for [`FixedLimiter`] (`limiters.simple` in configuration).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixedSettings {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Seconds before an unsettled reservation stops counting toward the
    /// cap. Must exceed the worker's job-retry timeout.
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl: u64,
}

fn default_max_concurrent() -> usize {
    10
}

fn default_lock_ttl() -> u64 {
    300
}

impl Default for FixedSettings {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            lock_ttl: default_lock_ttl(),
        }
    }
}

/// Hard per-partition cap with TTL-based stale-reservation reaping.
pub struct FixedLimiter {
    settings: FixedSettings,
}

impl FixedLimiter {
    pub fn new(settings: FixedSettings) -> Self {
        Self { settings }
    }
}

impl ConcurrencyLimiter for FixedLimiter {
    fn name(&self) -> &'static str {
        "simple"
    }

    fn max_concurrent(&self) -> Option<usize> {
        Some(self.settings.max_concurrent)
    }

    fn lock_ttl_secs(&self) -> u64 {
        self.settings.lock_ttl
    }

    fn can_process(
        &self,
        kv: &KvEngine,
        keys: &KeyLayout,
        queue: &str,
        partition: &str,
    ) -> Result<bool> {
        Ok(self.active_count(kv, keys, queue, partition)? < self.settings.max_concurrent)
    }

    fn acquire(
        &self,
        kv: &KvEngine,
        keys: &KeyLayout,
        queue: &str,
        partition: &str,
        reservation_id: &str,
    ) -> Result<bool> {
        let active_key = keys.active(queue, partition);
        let now = unix_now();
        kv.atomic(|ks| {
            scripts::acquire_with_reap(
                ks,
                &active_key,
                reservation_id,
                self.settings.max_concurrent,
                self.settings.lock_ttl,
                now,
                now.saturating_sub(self.settings.lock_ttl),
            )
        })
    }

    fn release(
        &self,
        kv: &KvEngine,
        keys: &KeyLayout,
        queue: &str,
        partition: &str,
        reservation_id: &str,
    ) -> Result<()> {
        let active_key = keys.active(queue, partition);
        kv.atomic(|ks| ks.hdel(&active_key, reservation_id))?;
        Ok(())
    }

    fn active_count(
        &self,
        kv: &KvEngine,
        keys: &KeyLayout,
        queue: &str,
        partition: &str,
    ) -> Result<usize> {
        let active_key = keys.active(queue, partition);
        let threshold = unix_now().saturating_sub(self.settings.lock_ttl);
        kv.atomic(|ks| scripts::reap_and_count(ks, &active_key, threshold))
    }
}
