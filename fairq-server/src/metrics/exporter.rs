//! Line-protocol and JSON rendering of queue snapshots.
//!
//! The text variant aggregates per queue only. Partition cardinality is
//! O(tenants) and would blow up a metrics store, so per-partition detail is
//! reserved for the JSON variant.

use super::QueueSnapshot;
use crate::core::error::Result;
use chrono::Utc;
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use serde::Serialize;

/// Render the aggregate `balanced_queue_*` metric families. Values are
/// keyspace snapshots, so a fresh registry is assembled per scrape instead
/// of mutating process-global collectors.
pub fn render_line_protocol(snapshots: &[QueueSnapshot]) -> Result<String> {
    let registry = Registry::new();

    let pending = IntGaugeVec::new(
        Opts::new(
            "balanced_queue_pending_jobs",
            "Jobs queued across all partitions of the queue.",
        ),
        &["queue"],
    )?;
    let active = IntGaugeVec::new(
        Opts::new(
            "balanced_queue_active_jobs",
            "Reservations currently held across all partitions of the queue.",
        ),
        &["queue"],
    )?;
    let processed = IntCounterVec::new(
        Opts::new(
            "balanced_queue_processed_total",
            "Jobs handed to workers since the queue appeared.",
        ),
        &["queue"],
    )?;
    let partitions = IntGaugeVec::new(
        Opts::new(
            "balanced_queue_partitions_total",
            "Partitions known to the queue.",
        ),
        &["queue"],
    )?;

    registry.register(Box::new(pending.clone()))?;
    registry.register(Box::new(active.clone()))?;
    registry.register(Box::new(processed.clone()))?;
    registry.register(Box::new(partitions.clone()))?;

    for snapshot in snapshots {
        let labels = &[snapshot.queue.as_str()];
        pending.with_label_values(labels).set(snapshot.pending as i64);
        active.with_label_values(labels).set(snapshot.active as i64);
        processed.with_label_values(labels).inc_by(snapshot.processed);
        partitions
            .with_label_values(labels)
            .set(snapshot.partition_count as i64);
    }

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|err| crate::core::BrokerError::Metrics(err.to_string()))
}

/// Per-partition detail for pull-model dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub timestamp: String,
    pub queues: Vec<QueueSnapshot>,
}

pub fn render_json(snapshots: Vec<QueueSnapshot>) -> MetricsReport {
    MetricsReport {
        timestamp: Utc::now().to_rfc3339(),
        queues: snapshots,
    }
}
