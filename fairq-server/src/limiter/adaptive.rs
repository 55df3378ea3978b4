use super::ConcurrencyLimiter;
use crate::core::error::Result;
use crate::core::keys::{FIELD_LAST_UPDATED, FIELD_TOTAL_ACQUIRED, FIELD_UTILIZATION};
use crate::core::kv::unix_now;
use crate::core::scripts;
use crate::core::{KeyLayout, KvEngine};
use serde::{Deserialize, Serialize};

/// Settings for [`AdaptiveLimiter`] (`limiters.adaptive` in configuration).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveSettings {
    #[serde(default = "default_base_limit")]
    pub base_limit: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl: u64,
    /// Utilization at or above which the cap falls back to `base_limit`.
    #[serde(default = "default_utilization_threshold")]
    pub utilization_threshold: f64,
}

fn default_base_limit() -> usize {
    5
}

fn default_max_limit() -> usize {
    20
}

fn default_lock_ttl() -> u64 {
    300
}

fn default_utilization_threshold() -> f64 {
    0.7
}

impl Default for AdaptiveSettings {
    fn default() -> Self {
        Self {
            base_limit: default_base_limit(),
            max_limit: default_max_limit(),
            lock_ttl: default_lock_ttl(),
            utilization_threshold: default_utilization_threshold(),
        }
    }
}

/// Cap that widens while the queue-wide utilization signal is low and
/// tightens to `base_limit` once it crosses the threshold. The signal is
/// written externally to the queue's global metrics hash; when nobody
/// writes it, utilization reads 0 and the cap degrades to `max_limit`.
pub struct AdaptiveLimiter {
    settings: AdaptiveSettings,
}

impl AdaptiveLimiter {
    pub fn new(settings: AdaptiveSettings) -> Self {
        Self { settings }
    }

    fn resolve_cap(&self, kv: &KvEngine, keys: &KeyLayout, queue: &str) -> Result<usize> {
        let utilization = kv
            .hget(&keys.global_metrics(queue), FIELD_UTILIZATION)?
            .and_then(|raw| raw.parse::<f64>().ok())
            .unwrap_or(0.0);

        let s = &self.settings;
        if utilization < s.utilization_threshold {
            let headroom = s.max_limit.saturating_sub(s.base_limit) as f64;
            let widen =
                (headroom * (s.utilization_threshold - utilization) / s.utilization_threshold).floor() as usize;
            Ok((s.base_limit + widen).min(s.max_limit))
        } else {
            Ok(s.base_limit)
        }
    }
}

impl ConcurrencyLimiter for AdaptiveLimiter {
    fn name(&self) -> &'static str {
        "adaptive"
    }

    fn max_concurrent(&self) -> Option<usize> {
        Some(self.settings.max_limit)
    }

    fn lock_ttl_secs(&self) -> u64 {
        self.settings.lock_ttl
    }

    fn current_cap(&self, kv: &KvEngine, keys: &KeyLayout, queue: &str) -> Result<Option<usize>> {
        self.resolve_cap(kv, keys, queue).map(Some)
    }

    fn can_process(
        &self,
        kv: &KvEngine,
        keys: &KeyLayout,
        queue: &str,
        partition: &str,
    ) -> Result<bool> {
        let cap = self.resolve_cap(kv, keys, queue)?;
        Ok(self.active_count(kv, keys, queue, partition)? < cap)
    }

    fn acquire(
        &self,
        kv: &KvEngine,
        keys: &KeyLayout,
        queue: &str,
        partition: &str,
        reservation_id: &str,
    ) -> Result<bool> {
        let cap = self.resolve_cap(kv, keys, queue)?;
        let active_key = keys.active(queue, partition);
        let global_key = keys.global_metrics(queue);
        let now = unix_now();
        kv.atomic(|ks| {
            let acquired = scripts::acquire_with_reap(
                ks,
                &active_key,
                reservation_id,
                cap,
                self.settings.lock_ttl,
                now,
                now.saturating_sub(self.settings.lock_ttl),
            )?;
            if acquired {
                ks.hincrby(&global_key, FIELD_TOTAL_ACQUIRED, 1)?;
                ks.hset(&global_key, FIELD_LAST_UPDATED, &now.to_string())?;
            }
            Ok(acquired)
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

    fn record_acquired(&self, kv: &KvEngine, keys: &KeyLayout, queue: &str) -> Result<()> {
        let global_key = keys.global_metrics(queue);
        let now = unix_now();
        kv.atomic(|ks| {
            ks.hincrby(&global_key, FIELD_TOTAL_ACQUIRED, 1)?;
            ks.hset(&global_key, FIELD_LAST_UPDATED, &now.to_string())?;
            Ok(())
        })
    }
}
