//! Canonical key layout.
//!
//! The names are wire-compatible with existing deployments, so dashboards
//! and tooling pointed at the same keyspace keep working:
//!
//! ```text
//! P:queues:Q:partitions   set      partitions with ≥1 queued job
//! P:queues:Q:K            list     FIFO job list for partition K
//! P:queues:Q:K:active     hash     reservation id → acquired-at timestamp
//! P:queues:Q:K:delayed    zset     payload scored by due-time
//! P:metrics:Q:K           hash     per-partition counters
//! P:metrics:Q:global      hash     cross-partition limiter signals
//! P:rr-state:Q            counter  round-robin tick
//! ```

/// Per-partition metric fields.
pub const FIELD_TOTAL_PUSHED: &str = "total_pushed";
pub const FIELD_TOTAL_POPPED: &str = "total_popped";
pub const FIELD_FIRST_JOB_TIME: &str = "first_job_time";

/// Global metric fields consumed by the adaptive limiter.
pub const FIELD_UTILIZATION: &str = "utilization";
pub const FIELD_TOTAL_ACQUIRED: &str = "total_acquired";
pub const FIELD_LAST_UPDATED: &str = "last_updated";

/// Reserved partition label for the queue-wide metrics hash.
pub const GLOBAL_PARTITION: &str = "global";

/// Builds and parses the canonical key names under a configured prefix.
#[derive(Debug, Clone)]
pub struct KeyLayout {
    prefix: String,
}

impl KeyLayout {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn partitions(&self, queue: &str) -> String {
        format!("{}:queues:{}:partitions", self.prefix, queue)
    }

    pub fn queue(&self, queue: &str, partition: &str) -> String {
        format!("{}:queues:{}:{}", self.prefix, queue, partition)
    }

    pub fn active(&self, queue: &str, partition: &str) -> String {
        format!("{}:queues:{}:{}:active", self.prefix, queue, partition)
    }

    pub fn delayed(&self, queue: &str, partition: &str) -> String {
        format!("{}:queues:{}:{}:delayed", self.prefix, queue, partition)
    }

    pub fn metrics(&self, queue: &str, partition: &str) -> String {
        format!("{}:metrics:{}:{}", self.prefix, queue, partition)
    }

    pub fn global_metrics(&self, queue: &str) -> String {
        self.metrics(queue, GLOBAL_PARTITION)
    }

    pub fn rr_state(&self, queue: &str) -> String {
        format!("{}:rr-state:{}", self.prefix, queue)
    }

    /// Scan pattern matching every queue's partition set.
    pub fn partitions_pattern(&self) -> String {
        format!("{}:queues:*:partitions", self.prefix)
    }

    /// Scan pattern matching every metrics hash (incl. globals).
    pub fn metrics_pattern(&self) -> String {
        format!("{}:metrics:*", self.prefix)
    }

    /// Scan pattern matching every delayed zset of one queue.
    pub fn delayed_pattern(&self, queue: &str) -> String {
        format!("{}:queues:{}:*:delayed", self.prefix, queue)
    }

    /// Recover `Q` from a `P:queues:Q:partitions` key.
    pub fn queue_from_partitions_key(&self, key: &str) -> Option<String> {
        let body = key.strip_prefix(&format!("{}:queues:", self.prefix))?;
        let queue = body.strip_suffix(":partitions")?;
        if queue.is_empty() {
            None
        } else {
            Some(queue.to_string())
        }
    }

    /// Recover `(Q, K)` from a `P:metrics:Q:K` key. Queue names carry no
    /// colon; everything after the first one belongs to the partition.
    pub fn parse_metrics_key(&self, key: &str) -> Option<(String, String)> {
        let body = key.strip_prefix(&format!("{}:metrics:", self.prefix))?;
        let (queue, partition) = body.split_once(':')?;
        if queue.is_empty() || partition.is_empty() {
            None
        } else {
            Some((queue.to_string(), partition.to_string()))
        }
    }

    /// Recover `K` from a `P:queues:Q:K:delayed` key.
    pub fn partition_from_delayed_key(&self, queue: &str, key: &str) -> Option<String> {
        let body = key.strip_prefix(&format!("{}:queues:{}:", self.prefix, queue))?;
        let partition = body.strip_suffix(":delayed")?;
        if partition.is_empty() {
            None
        } else {
            Some(partition.to_string())
        }
    }
}
