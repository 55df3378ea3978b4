use super::PartitionStrategy;
use crate::core::error::Result;
use crate::core::{KeyLayout, KvEngine};

/// Deterministic rotation over the sorted partition set, driven by a
/// per-queue tick counter shared across workers. Starvation-free under
/// steady membership: every partition is visited within `n` selections.
pub struct RoundRobinStrategy;

impl PartitionStrategy for RoundRobinStrategy {
    fn name(&self) -> &'static str {
        "round-robin"
    }

    fn select(&self, kv: &KvEngine, keys: &KeyLayout, queue: &str) -> Result<Option<String>> {
        let partitions_key = keys.partitions(queue);
        let rr_key = keys.rr_state(queue);
        kv.atomic(|ks| {
            let mut members = ks.smembers(&partitions_key)?;
            if members.is_empty() {
                return Ok(None);
            }
            members.sort();
            let tick = ks.incr(&rr_key)?;
            let index = (tick - 1).rem_euclid(members.len() as i64) as usize;
            Ok(Some(members.swap_remove(index)))
        })
    }
}
