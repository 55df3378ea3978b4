use super::ConcurrencyLimiter;
use crate::core::error::Result;
use crate::core::{KeyLayout, KvEngine};

/// Active-key TTL handed to the pop script when no limiter enforces one.
/// Reservations are still recorded, so their key must not live forever.
const UNBOUNDED_LOCK_TTL_SECS: u64 = 3600;

/// No gating: fairness across partitions without per-partition caps.
pub struct NullLimiter;

impl ConcurrencyLimiter for NullLimiter {
    fn name(&self) -> &'static str {
        "null"
    }

    fn max_concurrent(&self) -> Option<usize> {
        None
    }

    fn lock_ttl_secs(&self) -> u64 {
        UNBOUNDED_LOCK_TTL_SECS
    }

    fn can_process(
        &self,
        _kv: &KvEngine,
        _keys: &KeyLayout,
        _queue: &str,
        _partition: &str,
    ) -> Result<bool> {
        Ok(true)
    }

    fn acquire(
        &self,
        _kv: &KvEngine,
        _keys: &KeyLayout,
        _queue: &str,
        _partition: &str,
        _reservation_id: &str,
    ) -> Result<bool> {
        Ok(true)
    }

    fn release(
        &self,
        _kv: &KvEngine,
        _keys: &KeyLayout,
        _queue: &str,
        _partition: &str,
        _reservation_id: &str,
    ) -> Result<()> {
        Ok(())
    }

    fn active_count(
        &self,
        _kv: &KvEngine,
        _keys: &KeyLayout,
        _queue: &str,
        _partition: &str,
    ) -> Result<usize> {
        Ok(0)
    }
}
