//! Read-only metrics view over the keyspace.
//!
//! The reader discovers queues by key scan and assembles per-partition
//! snapshots; it never mutates broker state and runs out-of-band from the
//! hot path. Scan problems degrade to an empty report.

pub mod exporter;

pub use exporter::{MetricsReport, render_json, render_line_protocol};

use crate::core::keys::{
    FIELD_FIRST_JOB_TIME, FIELD_TOTAL_POPPED, FIELD_TOTAL_PUSHED, GLOBAL_PARTITION,
};
use crate::core::{KeyLayout, KvEngine};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// One partition's live numbers.
#[derive(Debug, Clone, Serialize)]
pub struct PartitionSnapshot {
    pub partition: String,
    pub queued: usize,
    pub active: usize,
    pub delayed: usize,
    pub pushed: u64,
    pub processed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_job_time: Option<u64>,
}

/// One queue's aggregates plus the per-partition detail behind them.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub queue: String,
    pub pending: usize,
    pub active: usize,
    pub processed: u64,
    pub partition_count: usize,
    pub partitions: Vec<PartitionSnapshot>,
}

#[derive(Clone)]
pub struct MetricsReader {
    kv: Arc<KvEngine>,
    keys: Arc<KeyLayout>,
}

impl MetricsReader {
    pub fn new(kv: Arc<KvEngine>, keys: Arc<KeyLayout>) -> Self {
        Self { kv, keys }
    }

    /// Every queue with a live partition set or lingering counters, sorted.
    pub fn queue_names(&self) -> Vec<String> {
        let mut names = BTreeSet::new();
        for key in self.kv.scan_match(&self.keys.partitions_pattern()) {
            if let Some(queue) = self.keys.queue_from_partitions_key(&key) {
                names.insert(queue);
            }
        }
        for key in self.kv.scan_match(&self.keys.metrics_pattern()) {
            if let Some((queue, _)) = self.keys.parse_metrics_key(&key) {
                names.insert(queue);
            }
        }
        names.into_iter().collect()
    }

    /// Snapshot one queue. Partitions that drained but still carry counters
    /// are included.
    pub fn queue_snapshot(&self, queue: &str) -> QueueSnapshot {
        let mut partitions: BTreeSet<String> = self
            .kv
            .smembers(&self.keys.partitions(queue))
            .unwrap_or_default()
            .into_iter()
            .collect();
        for key in self.kv.scan_match(&self.keys.metrics_pattern()) {
            if let Some((metrics_queue, partition)) = self.keys.parse_metrics_key(&key) {
                if metrics_queue == queue && partition != GLOBAL_PARTITION {
                    partitions.insert(partition);
                }
            }
        }

        let mut snapshots = Vec::with_capacity(partitions.len());
        for partition in partitions {
            snapshots.push(self.partition_snapshot(queue, &partition));
        }

        QueueSnapshot {
            queue: queue.to_string(),
            pending: snapshots.iter().map(|p| p.queued).sum(),
            active: snapshots.iter().map(|p| p.active).sum(),
            processed: snapshots.iter().map(|p| p.processed).sum(),
            partition_count: snapshots.len(),
            partitions: snapshots,
        }
    }

    /// Snapshot every discovered queue.
    pub fn snapshot(&self) -> Vec<QueueSnapshot> {
        self.queue_names()
            .into_iter()
            .map(|queue| self.queue_snapshot(&queue))
            .collect()
    }

    fn partition_snapshot(&self, queue: &str, partition: &str) -> PartitionSnapshot {
        let metrics_key = self.keys.metrics(queue, partition);
        let counter = |field: &str| -> u64 {
            self.kv
                .hget(&metrics_key, field)
                .ok()
                .flatten()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(0)
        };

        let first_job_time = self
            .kv
            .hget(&metrics_key, FIELD_FIRST_JOB_TIME)
            .ok()
            .flatten()
            .and_then(|raw| raw.parse().ok());

        PartitionSnapshot {
            partition: partition.to_string(),
            queued: self.kv.llen(&self.keys.queue(queue, partition)).unwrap_or(0),
            active: self.kv.hlen(&self.keys.active(queue, partition)).unwrap_or(0),
            delayed: self.kv.zcard(&self.keys.delayed(queue, partition)).unwrap_or(0),
            pushed: counter(FIELD_TOTAL_PUSHED),
            processed: counter(FIELD_TOTAL_POPPED),
            first_job_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::keys::FIELD_UTILIZATION;

    fn seed(kv: &KvEngine, keys: &KeyLayout) {
        kv.atomic(|ks| {
            // alpha: two partitions, one with an in-flight reservation.
            ks.sadd(&keys.partitions("alpha"), "a1")?;
            ks.rpush(&keys.queue("alpha", "a1"), "j1")?;
            ks.rpush(&keys.queue("alpha", "a1"), "j2")?;
            ks.hset(&keys.metrics("alpha", "a1"), FIELD_TOTAL_PUSHED, "8")?;
            ks.hset(&keys.metrics("alpha", "a1"), FIELD_TOTAL_POPPED, "6")?;
            ks.hset(&keys.metrics("alpha", "a1"), FIELD_FIRST_JOB_TIME, "1000")?;

            ks.sadd(&keys.partitions("alpha"), "a2")?;
            ks.rpush(&keys.queue("alpha", "a2"), "j3")?;
            ks.hset(&keys.active("alpha", "a2"), "res-1", "2000")?;
            ks.hset(&keys.metrics("alpha", "a2"), FIELD_TOTAL_PUSHED, "5")?;
            ks.hset(&keys.metrics("alpha", "a2"), FIELD_TOTAL_POPPED, "4")?;

            // beta: fully drained, only counters remain.
            ks.hset(&keys.metrics("beta", "b1"), FIELD_TOTAL_PUSHED, "3")?;
            ks.hset(&keys.metrics("beta", "b1"), FIELD_TOTAL_POPPED, "3")?;
            // Global hashes must not surface as partitions.
            ks.hset(&keys.global_metrics("alpha"), FIELD_UTILIZATION, "0.4")?;
            Ok::<_, crate::core::BrokerError>(())
        })
        .unwrap();
    }

    #[test]
    fn test_queue_discovery_includes_drained_queues() {
        let kv = Arc::new(KvEngine::new());
        let keys = Arc::new(KeyLayout::new("bq"));
        seed(&kv, &keys);

        let reader = MetricsReader::new(kv, keys);
        assert_eq!(reader.queue_names(), vec!["alpha", "beta"]);
    }

    #[test]
    fn test_queue_snapshot_aggregates() {
        let kv = Arc::new(KvEngine::new());
        let keys = Arc::new(KeyLayout::new("bq"));
        seed(&kv, &keys);

        let reader = MetricsReader::new(kv, keys);
        let alpha = reader.queue_snapshot("alpha");
        assert_eq!(alpha.pending, 3);
        assert_eq!(alpha.active, 1);
        assert_eq!(alpha.processed, 10);
        assert_eq!(alpha.partition_count, 2);
        assert_eq!(alpha.partitions.len(), 2);

        let a1 = alpha.partitions.iter().find(|p| p.partition == "a1").unwrap();
        assert_eq!(a1.queued, 2);
        assert_eq!(a1.pushed, 8);
        assert_eq!(a1.first_job_time, Some(1000));

        let beta = reader.queue_snapshot("beta");
        assert_eq!(beta.pending, 0);
        assert_eq!(beta.partition_count, 1);
        assert_eq!(beta.processed, 3);
    }

    #[test]
    fn test_empty_keyspace_is_empty_report() {
        let reader = MetricsReader::new(Arc::new(KvEngine::new()), Arc::new(KeyLayout::new("bq")));
        assert!(reader.queue_names().is_empty());
        assert!(reader.snapshot().is_empty());
    }
}
