use super::PartitionStrategy;
use crate::core::error::Result;
use crate::core::keys::FIELD_FIRST_JOB_TIME;
use crate::core::kv::unix_now;
use crate::core::{KeyLayout, KvEngine};
use serde::{Deserialize, Serialize};

/// Tuning knobs for [`SmartFairStrategy`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartSettings {
    /// Weight of how long the partition's head job has been waiting.
    #[serde(default = "default_weight_wait_time")]
    pub weight_wait_time: f64,
    /// Weight of how small the partition's backlog is.
    #[serde(default = "default_weight_queue_size")]
    pub weight_queue_size: f64,
    /// Multiply the score of partitions below the threshold.
    #[serde(default = "default_boost_small_queues")]
    pub boost_small_queues: bool,
    #[serde(default = "default_small_queue_threshold")]
    pub small_queue_threshold: usize,
    #[serde(default = "default_boost_multiplier")]
    pub boost_multiplier: f64,
}

fn default_weight_wait_time() -> f64 {
    0.6
}

fn default_weight_queue_size() -> f64 {
    0.4
}

fn default_boost_small_queues() -> bool {
    true
}

fn default_small_queue_threshold() -> usize {
    5
}

fn default_boost_multiplier() -> f64 {
    1.5
}

impl Default for SmartSettings {
    fn default() -> Self {
        Self {
            weight_wait_time: default_weight_wait_time(),
            weight_queue_size: default_weight_queue_size(),
            boost_small_queues: default_boost_small_queues(),
            small_queue_threshold: default_small_queue_threshold(),
            boost_multiplier: default_boost_multiplier(),
        }
    }
}

/// Scores every non-empty partition by head-job wait time and inverse
/// backlog size, with an optional boost for small backlogs, and serves the
/// highest score. Favors tenants that trickle jobs in over tenants that
/// dump large batches.
pub struct SmartFairStrategy {
    settings: SmartSettings,
}

impl SmartFairStrategy {
    pub fn new(settings: SmartSettings) -> Self {
        Self { settings }
    }

    fn score(&self, wait_secs: f64, queued: usize, max_queued: usize) -> f64 {
        let normalized_size = 1.0 - (queued as f64 / max_queued as f64);
        let mut score =
            wait_secs * self.settings.weight_wait_time + normalized_size * 100.0 * self.settings.weight_queue_size;
        if self.settings.boost_small_queues && queued < self.settings.small_queue_threshold {
            score *= self.settings.boost_multiplier;
        }
        score
    }
}

impl PartitionStrategy for SmartFairStrategy {
    fn name(&self) -> &'static str {
        "smart"
    }

    fn select(&self, kv: &KvEngine, keys: &KeyLayout, queue: &str) -> Result<Option<String>> {
        let now = unix_now();
        kv.read(|ks| {
            let members = ks.smembers(&keys.partitions(queue))?;

            let mut candidates = Vec::with_capacity(members.len());
            let mut max_queued = 0usize;
            for partition in members {
                let queued = ks.llen(&keys.queue(queue, &partition))?;
                if queued == 0 {
                    continue;
                }
                let first_job_time = ks
                    .hget(&keys.metrics(queue, &partition), FIELD_FIRST_JOB_TIME)?
                    .and_then(|stamp| stamp.parse::<u64>().ok());
                max_queued = max_queued.max(queued);
                candidates.push((partition, queued, first_job_time));
            }

            let mut best: Option<(String, f64)> = None;
            for (partition, queued, first_job_time) in candidates {
                let wait_secs = first_job_time.map(|at| now.saturating_sub(at)).unwrap_or(0) as f64;
                let score = self.score(wait_secs, queued, max_queued);
                // Strictly greater, so ties go to the earliest-registered
                // partition (the set enumerates in insertion order).
                if best.as_ref().is_none_or(|(_, top)| score > *top) {
                    best = Some((partition, score));
                }
            }
            Ok(best.map(|(partition, _)| partition))
        })
    }
}
