//! The queue driver: the push/pop/release/delete protocol over the
//! keyspace, orchestrating the script library, the partition strategy and
//! the concurrency limiter.

use super::reservation::Reservation;
use super::resolver::{DispatchableJob, PartitionResolver, detect_partition_field};
use crate::core::error::{BrokerError, Result};
use crate::core::kv::unix_now;
use crate::core::scripts::{self, ClearKeys, PopKeys, PushKeys};
use crate::core::{KeyLayout, KvEngine};
use crate::limiter::ConcurrencyLimiter;
use crate::strategy::PartitionStrategy;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Options accepted at push time.
#[derive(Debug, Default, Clone)]
pub struct PushOptions {
    /// Overrides every other partition source.
    pub partition: Option<String>,
}

/// Where a pushed job landed.
#[derive(Debug, Clone)]
pub struct PushReceipt {
    pub partition: String,
    /// Queue depth of the partition right after the push.
    pub depth: usize,
}

/// Stateless front door to the partitioned queue. Cheap to clone; all state
/// lives in the keyspace.
#[derive(Clone)]
pub struct QueueDriver {
    kv: Arc<KvEngine>,
    keys: Arc<KeyLayout>,
    strategy: Arc<dyn PartitionStrategy>,
    limiter: Arc<dyn ConcurrencyLimiter>,
    resolver: Option<PartitionResolver>,
    default_partition: String,
}

impl QueueDriver {
    pub fn new(
        kv: Arc<KvEngine>,
        keys: Arc<KeyLayout>,
        strategy: Arc<dyn PartitionStrategy>,
        limiter: Arc<dyn ConcurrencyLimiter>,
        default_partition: impl Into<String>,
    ) -> Self {
        Self {
            kv,
            keys,
            strategy,
            limiter,
            resolver: None,
            default_partition: default_partition.into(),
        }
    }

    /// Register a partition resolver consulted when neither the push
    /// options nor the job supply a partition.
    pub fn with_resolver(mut self, resolver: PartitionResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn strategy(&self) -> &dyn PartitionStrategy {
        self.strategy.as_ref()
    }

    pub fn limiter(&self) -> &dyn ConcurrencyLimiter {
        self.limiter.as_ref()
    }

    /// Enqueue a JSON payload.
    pub fn push(&self, payload: &Value, queue: &str, options: PushOptions) -> Result<PushReceipt> {
        self.push_resolved(payload, queue, options.partition, None)
    }

    /// Enqueue a typed job, honoring its `partition_key()` capability.
    pub fn push_job<J: DispatchableJob>(
        &self,
        job: &J,
        queue: &str,
        options: PushOptions,
    ) -> Result<PushReceipt> {
        let payload = serde_json::to_value(job)?;
        self.push_resolved(&payload, queue, options.partition, job.partition_key())
    }

    fn push_resolved(
        &self,
        payload: &Value,
        queue: &str,
        override_partition: Option<String>,
        job_partition: Option<String>,
    ) -> Result<PushReceipt> {
        let partition = override_partition
            .or(job_partition)
            .or_else(|| self.resolver.as_ref().and_then(|resolve| resolve(payload)))
            .or_else(|| detect_partition_field(payload))
            .unwrap_or_else(|| self.default_partition.clone());

        let body = serde_json::to_string(payload)?;
        let partitions_key = self.keys.partitions(queue);
        let queue_key = self.keys.queue(queue, &partition);
        let metrics_key = self.keys.metrics(queue, &partition);
        let now = unix_now();

        let depth = self.kv.atomic(|ks| {
            scripts::push(
                ks,
                PushKeys {
                    partitions: &partitions_key,
                    queue: &queue_key,
                    metrics: &metrics_key,
                },
                &body,
                &partition,
                now,
            )
        })?;

        debug!(queue, partition, depth, "job queued");
        Ok(PushReceipt { partition, depth })
    }

    /// Serve the next job: the strategy picks a partition, the limiter
    /// gates it, the pop script reserves atomically. `None` when nothing
    /// is ready or every eligible partition is at its cap.
    pub fn pop(&self, queue: &str) -> Result<Option<Reservation>> {
        let Some(partition) = self.strategy.select(&self.kv, &self.keys, queue)? else {
            return Ok(None);
        };
        if !self.limiter.can_process(&self.kv, &self.keys, queue, &partition)? {
            return self.try_next_partition(queue, &partition);
        }
        self.pop_from_partition(queue, &partition)
    }

    /// One pass over the remaining partitions after `exclude` hit its cap:
    /// serve the first one with headroom that yields a payload.
    fn try_next_partition(&self, queue: &str, exclude: &str) -> Result<Option<Reservation>> {
        for partition in self.kv.smembers(&self.keys.partitions(queue))? {
            if partition == exclude {
                continue;
            }
            if !self.limiter.can_process(&self.kv, &self.keys, queue, &partition)? {
                continue;
            }
            if let Some(reservation) = self.pop_from_partition(queue, &partition)? {
                return Ok(Some(reservation));
            }
        }
        Ok(None)
    }

    fn pop_from_partition(&self, queue: &str, partition: &str) -> Result<Option<Reservation>> {
        let reservation_id = Uuid::new_v4().to_string();
        let cap = self
            .limiter
            .current_cap(&self.kv, &self.keys, queue)?
            .unwrap_or(usize::MAX);
        let ttl = self.limiter.lock_ttl_secs();

        let queue_key = self.keys.queue(queue, partition);
        let partitions_key = self.keys.partitions(queue);
        let active_key = self.keys.active(queue, partition);
        let metrics_key = self.keys.metrics(queue, partition);
        let now = unix_now();

        let popped = self.kv.atomic(|ks| {
            scripts::pop_with_cap(
                ks,
                PopKeys {
                    queue: &queue_key,
                    partitions: &partitions_key,
                    active: &active_key,
                    metrics: &metrics_key,
                },
                partition,
                &reservation_id,
                cap,
                ttl,
                now,
            )
        })?;

        match popped {
            Some(payload) => {
                self.limiter.record_acquired(&self.kv, &self.keys, queue)?;
                debug!(queue, partition, reservation_id, "job reserved");
                Ok(Some(Reservation::new(
                    self.clone(),
                    queue.to_string(),
                    partition.to_string(),
                    reservation_id,
                    payload,
                )))
            }
            None => Ok(None),
        }
    }

    /// Drop the reservation and put the payload back: re-queued through the
    /// push script when `delay_secs == 0`, parked in the delayed set
    /// otherwise.
    pub fn release(
        &self,
        queue: &str,
        partition: &str,
        reservation_id: &str,
        payload: &str,
        delay_secs: u64,
    ) -> Result<()> {
        let active_key = self.keys.active(queue, partition);
        let now = unix_now();

        if delay_secs > 0 {
            let delayed_key = self.keys.delayed(queue, partition);
            self.kv.atomic(|ks| {
                ks.hdel(&active_key, reservation_id)?;
                ks.zadd(&delayed_key, payload, (now + delay_secs) as f64)?;
                Ok::<(), BrokerError>(())
            })?;
            debug!(queue, partition, reservation_id, delay_secs, "job delayed");
        } else {
            let partitions_key = self.keys.partitions(queue);
            let queue_key = self.keys.queue(queue, partition);
            let metrics_key = self.keys.metrics(queue, partition);
            self.kv.atomic(|ks| {
                ks.hdel(&active_key, reservation_id)?;
                scripts::push(
                    ks,
                    PushKeys {
                        partitions: &partitions_key,
                        queue: &queue_key,
                        metrics: &metrics_key,
                    },
                    payload,
                    partition,
                    now,
                )?;
                Ok::<(), BrokerError>(())
            })?;
            debug!(queue, partition, reservation_id, "job released");
        }
        Ok(())
    }

    /// Settle the reservation as completed.
    pub fn delete(&self, queue: &str, partition: &str, reservation_id: &str) -> Result<()> {
        let active_key = self.keys.active(queue, partition);
        self.kv.atomic(|ks| ks.hdel(&active_key, reservation_id))?;
        debug!(queue, partition, reservation_id, "job completed");
        Ok(())
    }

    /// Jobs queued across every partition. A sampled estimate under
    /// concurrent mutation.
    pub fn size(&self, queue: &str) -> Result<usize> {
        let mut total = 0;
        for partition in self.kv.smembers(&self.keys.partitions(queue))? {
            total += self.kv.llen(&self.keys.queue(queue, &partition))?;
        }
        Ok(total)
    }

    /// Alias kept for host frameworks that poll readiness.
    pub fn ready_now(&self, queue: &str) -> Result<usize> {
        self.size(queue)
    }

    /// Promote every delayed payload that came due back onto its partition.
    /// Returns how many were promoted.
    pub fn promote_due(&self, queue: &str) -> Result<usize> {
        let now = unix_now();
        let mut promoted = 0;
        for delayed_key in self.kv.scan_match(&self.keys.delayed_pattern(queue)) {
            let Some(partition) = self.keys.partition_from_delayed_key(queue, &delayed_key) else {
                continue;
            };
            let partitions_key = self.keys.partitions(queue);
            let queue_key = self.keys.queue(queue, &partition);
            let metrics_key = self.keys.metrics(queue, &partition);
            promoted += self.kv.atomic(|ks| {
                scripts::promote_due(
                    ks,
                    &delayed_key,
                    PushKeys {
                        partitions: &partitions_key,
                        queue: &queue_key,
                        metrics: &metrics_key,
                    },
                    &partition,
                    now,
                )
            })?;
        }
        if promoted > 0 {
            debug!(queue, promoted, "promoted delayed jobs");
        }
        Ok(promoted)
    }

    /// Remove one partition's jobs, reservations, delayed entries and
    /// counters. Succeeds on an already-empty partition.
    pub fn clear_partition(&self, queue: &str, partition: &str) -> Result<()> {
        let queue_key = self.keys.queue(queue, partition);
        let active_key = self.keys.active(queue, partition);
        let delayed_key = self.keys.delayed(queue, partition);
        let metrics_key = self.keys.metrics(queue, partition);
        let partitions_key = self.keys.partitions(queue);
        self.kv.atomic(|ks| {
            scripts::clear_partition(
                ks,
                ClearKeys {
                    queue: &queue_key,
                    active: &active_key,
                    delayed: &delayed_key,
                    metrics: &metrics_key,
                    partitions: &partitions_key,
                },
                partition,
            )
        })?;
        debug!(queue, partition, "partition cleared");
        Ok(())
    }

    /// Remove a whole queue: every known partition (live or drained), the
    /// partition set, the round-robin state and the global metrics hash.
    /// Returns how many partitions were wiped.
    pub fn clear_queue(&self, queue: &str) -> Result<usize> {
        let mut partitions: BTreeSet<String> = self
            .kv
            .smembers(&self.keys.partitions(queue))?
            .into_iter()
            .collect();
        for metrics_key in self.kv.scan_match(&self.keys.metrics_pattern()) {
            if let Some((metrics_queue, partition)) = self.keys.parse_metrics_key(&metrics_key) {
                if metrics_queue == queue && partition != crate::core::keys::GLOBAL_PARTITION {
                    partitions.insert(partition);
                }
            }
        }

        let cleared = partitions.len();
        for partition in partitions {
            self.clear_partition(queue, &partition)?;
        }
        self.kv.del(&self.keys.partitions(queue));
        self.kv.del(&self.keys.rr_state(queue));
        self.kv.del(&self.keys.global_metrics(queue));
        debug!(queue, cleared, "queue cleared");
        Ok(cleared)
    }

    /// Drop expired keys; the sweeper calls this alongside promotion.
    pub fn purge_expired(&self) -> usize {
        self.kv.purge_expired()
    }

    pub(crate) fn kv(&self) -> &KvEngine {
        &self.kv
    }

    pub(crate) fn keys(&self) -> &KeyLayout {
        &self.keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::keys::{FIELD_FIRST_JOB_TIME, FIELD_TOTAL_POPPED, FIELD_TOTAL_PUSHED};
    use crate::limiter::{FixedLimiter, FixedSettings, NullLimiter};
    use crate::strategy::RoundRobinStrategy;
    use serde::Serialize;
    use serde_json::json;

    fn driver_with(limiter: Arc<dyn ConcurrencyLimiter>) -> QueueDriver {
        QueueDriver::new(
            Arc::new(KvEngine::new()),
            Arc::new(KeyLayout::new("bq")),
            Arc::new(RoundRobinStrategy),
            limiter,
            "default",
        )
    }

    fn driver() -> QueueDriver {
        driver_with(Arc::new(NullLimiter))
    }

    fn capped_driver(cap: usize) -> QueueDriver {
        driver_with(Arc::new(FixedLimiter::new(FixedSettings {
            max_concurrent: cap,
            lock_ttl: 300,
        })))
    }

    fn push_to(driver: &QueueDriver, queue: &str, partition: &str, tag: &str) {
        driver
            .push(
                &json!({ "tag": tag }),
                queue,
                PushOptions {
                    partition: Some(partition.to_string()),
                },
            )
            .unwrap();
    }

    fn tag_of(reservation: &Reservation) -> String {
        reservation.payload_json().unwrap()["tag"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_push_creates_partition() {
        let driver = driver();
        let receipt = driver
            .push(
                &json!({"job": "send-mail", "user_id": "ignored"}),
                "default",
                PushOptions {
                    partition: Some("user:123".to_string()),
                },
            )
            .unwrap();

        assert_eq!(receipt.partition, "user:123");
        assert_eq!(receipt.depth, 1);
        assert_eq!(
            driver.kv().smembers(&driver.keys().partitions("default")).unwrap(),
            vec!["user:123"]
        );
        assert_eq!(
            driver
                .kv()
                .hget(&driver.keys().metrics("default", "user:123"), FIELD_TOTAL_PUSHED)
                .unwrap()
                .as_deref(),
            Some("1")
        );
    }

    #[test]
    fn test_partition_resolution_priority() {
        let resolver: PartitionResolver =
            Arc::new(|payload| payload.get("merchant").and_then(|v| v.as_str()).map(String::from));
        let driver = driver().with_resolver(resolver);

        // Explicit override wins over everything.
        let receipt = driver
            .push(
                &json!({"merchant": "m-1", "user_id": "u-1"}),
                "q",
                PushOptions {
                    partition: Some("override".to_string()),
                },
            )
            .unwrap();
        assert_eq!(receipt.partition, "override");

        // Resolver beats field auto-detection.
        let receipt = driver
            .push(&json!({"merchant": "m-1", "user_id": "u-1"}), "q", PushOptions::default())
            .unwrap();
        assert_eq!(receipt.partition, "m-1");

        // Auto-detection when the resolver abstains.
        let receipt = driver
            .push(&json!({"user_id": "u-1"}), "q", PushOptions::default())
            .unwrap();
        assert_eq!(receipt.partition, "u-1");

        // Nothing resolves: the configured default.
        let receipt = driver
            .push(&json!({"job": "cleanup"}), "q", PushOptions::default())
            .unwrap();
        assert_eq!(receipt.partition, "default");
    }

    #[test]
    fn test_job_capability_beats_resolver() {
        #[derive(Serialize)]
        struct Invoice {
            merchant: String,
        }
        impl DispatchableJob for Invoice {
            fn partition_key(&self) -> Option<String> {
                Some(format!("merchant:{}", self.merchant))
            }
        }

        let resolver: PartitionResolver = Arc::new(|_| Some("from-resolver".to_string()));
        let driver = driver().with_resolver(resolver);
        let receipt = driver
            .push_job(
                &Invoice {
                    merchant: "acme".to_string(),
                },
                "q",
                PushOptions::default(),
            )
            .unwrap();
        assert_eq!(receipt.partition, "merchant:acme");
    }

    #[test]
    fn test_numeric_partition_key_becomes_string() {
        let driver = driver();
        let receipt = driver
            .push(&json!({"userId": 12345}), "q", PushOptions::default())
            .unwrap();
        assert_eq!(receipt.partition, "12345");
        assert!(
            driver
                .kv()
                .smembers(&driver.keys().partitions("q"))
                .unwrap()
                .contains(&"12345".to_string())
        );
    }

    #[test]
    fn test_round_robin_rotation_across_partitions() {
        let driver = driver();
        for i in 1..=5 {
            push_to(&driver, "q", "A", &format!("A{i}"));
        }
        for i in 1..=2 {
            push_to(&driver, "q", "B", &format!("B{i}"));
        }
        for i in 1..=2 {
            push_to(&driver, "q", "C", &format!("C{i}"));
        }

        let mut order = Vec::new();
        for _ in 0..12 {
            if let Some(reservation) = driver.pop("q").unwrap() {
                order.push(tag_of(&reservation));
                reservation.delete().unwrap();
            }
        }
        assert_eq!(order, vec!["A1", "B1", "C1", "A2", "B2", "C2", "A3", "A4", "A5"]);
        assert_eq!(driver.size("q").unwrap(), 0);
    }

    #[test]
    fn test_cap_enforcement_and_release_cycle() {
        let driver = capped_driver(2);
        for i in 0..3 {
            push_to(&driver, "q", "u:888", &format!("job-{i}"));
        }

        let first = driver.pop("q").unwrap().expect("first pop");
        let second = driver.pop("q").unwrap().expect("second pop");
        // Cap of 2 reached and no other partition exists.
        assert!(driver.pop("q").unwrap().is_none());

        first.delete().unwrap();
        let fourth = driver.pop("q").unwrap().expect("pop after delete");
        assert_eq!(tag_of(&fourth), "job-2");

        second.delete().unwrap();
        fourth.delete().unwrap();
    }

    #[test]
    fn test_try_next_partition_serves_uncapped_tenant() {
        let driver = capped_driver(1);
        push_to(&driver, "q", "busy", "busy-1");
        push_to(&driver, "q", "busy", "busy-2");

        let busy = driver.pop("q").unwrap().expect("pop busy");
        assert_eq!(tag_of(&busy), "busy-1");

        // Sole partition at its cap: nothing else to slide to.
        assert!(driver.pop("q").unwrap().is_none());

        // The rotation lands on "busy" again (tick 3 over a sorted pair);
        // its cap is exhausted, so the driver slides to "idle".
        push_to(&driver, "q", "idle", "idle-1");
        let next = driver.pop("q").unwrap().expect("pop via try-next");
        assert_eq!(tag_of(&next), "idle-1");

        busy.delete().unwrap();
        next.delete().unwrap();
    }

    #[test]
    fn test_pop_empty_queue_is_none() {
        assert!(driver().pop("q").unwrap().is_none());
    }

    #[test]
    fn test_delete_empties_partition_state() {
        let driver = driver();
        push_to(&driver, "q", "X", "only");

        let reservation = driver.pop("q").unwrap().expect("pop");
        reservation.delete().unwrap();
        // Double settle is a no-op.
        reservation.delete().unwrap();
        reservation.release(0).unwrap();

        let keys = driver.keys();
        let kv = driver.kv();
        assert!(!kv.exists(&keys.partitions("q")));
        assert_eq!(kv.hget(&keys.metrics("q", "X"), FIELD_FIRST_JOB_TIME).unwrap(), None);
        assert_eq!(
            kv.hget(&keys.metrics("q", "X"), FIELD_TOTAL_PUSHED).unwrap().as_deref(),
            Some("1")
        );
        assert_eq!(
            kv.hget(&keys.metrics("q", "X"), FIELD_TOTAL_POPPED).unwrap().as_deref(),
            Some("1")
        );
        assert_eq!(kv.hlen(&keys.active("q", "X")).unwrap(), 0);
    }

    #[test]
    fn test_release_requeues_same_payload() {
        let driver = driver();
        push_to(&driver, "q", "A", "the-one");

        let reservation = driver.pop("q").unwrap().expect("pop");
        reservation.release(0).unwrap();

        let again = driver.pop("q").unwrap().expect("pop after release");
        assert_eq!(tag_of(&again), "the-one");
        assert_eq!(
            driver
                .kv()
                .hlen(&driver.keys().active("q", "A"))
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_release_with_delay_parks_and_promotes() {
        let driver = driver();
        push_to(&driver, "q", "A", "later");

        let reservation = driver.pop("q").unwrap().expect("pop");
        reservation.release(0).unwrap();
        let reservation = driver.pop("q").unwrap().expect("re-pop");
        // Park far in the future: not promotable yet.
        driver
            .release("q", "A", reservation.id(), reservation.payload(), 3600)
            .unwrap();
        let parts = reservation.into_parts();

        assert_eq!(driver.size("q").unwrap(), 0);
        assert_eq!(
            driver.kv().zcard(&driver.keys().delayed("q", "A")).unwrap(),
            1
        );
        assert_eq!(driver.promote_due("q").unwrap(), 0);

        // Re-park as already due and promote.
        driver.kv().del(&driver.keys().delayed("q", "A"));
        let delayed_key = driver.keys().delayed("q", "A");
        driver
            .kv()
            .atomic(|ks| ks.zadd(&delayed_key, &parts.payload, 1.0))
            .unwrap();
        assert_eq!(driver.promote_due("q").unwrap(), 1);
        assert_eq!(driver.size("q").unwrap(), 1);

        let revived = driver.pop("q").unwrap().expect("promoted pop");
        assert_eq!(tag_of(&revived), "later");
    }

    #[test]
    fn test_counters_balance_at_quiescence() {
        let driver = driver();
        for i in 0..5 {
            push_to(&driver, "q", "A", &format!("job-{i}"));
        }
        for _ in 0..3 {
            driver.pop("q").unwrap().expect("pop").delete().unwrap();
        }

        let kv = driver.kv();
        let metrics_key = driver.keys().metrics("q", "A");
        let pushed: i64 = kv.hget(&metrics_key, FIELD_TOTAL_PUSHED).unwrap().unwrap().parse().unwrap();
        let popped: i64 = kv.hget(&metrics_key, FIELD_TOTAL_POPPED).unwrap().unwrap().parse().unwrap();
        assert_eq!(pushed - popped, driver.size("q").unwrap() as i64);
    }

    #[test]
    fn test_clear_partition() {
        let driver = driver();
        push_to(&driver, "q", "A", "a-1");
        push_to(&driver, "q", "B", "b-1");

        driver.clear_partition("q", "A").unwrap();
        assert_eq!(driver.kv().smembers(&driver.keys().partitions("q")).unwrap(), vec!["B"]);
        assert!(!driver.kv().exists(&driver.keys().metrics("q", "A")));

        // Clearing an absent partition still succeeds.
        driver.clear_partition("q", "ghost").unwrap();
    }

    #[test]
    fn test_clear_queue_wipes_drained_partitions_too() {
        let driver = driver();
        push_to(&driver, "q", "live", "l-1");
        push_to(&driver, "q", "drained", "d-1");
        driver.pop("q").unwrap().expect("pop").delete().unwrap();
        driver.pop("q").unwrap().expect("pop").delete().unwrap();
        push_to(&driver, "q", "live", "l-2");

        // "drained" no longer sits in the partition set, only its counters
        // remain; clear must still find it.
        let cleared = driver.clear_queue("q").unwrap();
        assert_eq!(cleared, 2);

        let kv = driver.kv();
        let keys = driver.keys();
        assert!(!kv.exists(&keys.partitions("q")));
        assert!(!kv.exists(&keys.rr_state("q")));
        assert!(!kv.exists(&keys.metrics("q", "live")));
        assert!(!kv.exists(&keys.metrics("q", "drained")));
        assert_eq!(driver.size("q").unwrap(), 0);
    }

    #[test]
    fn test_size_sums_partitions() {
        let driver = driver();
        push_to(&driver, "q", "A", "a-1");
        push_to(&driver, "q", "A", "a-2");
        push_to(&driver, "q", "B", "b-1");
        assert_eq!(driver.size("q").unwrap(), 3);
        assert_eq!(driver.ready_now("q").unwrap(), 3);
    }
}
