//! Atomic script library.
//!
//! Every operation that touches more than one key runs as a single function
//! over the exclusively-locked [`Keyspace`], invoked through
//! [`KvEngine::atomic`](super::kv::KvEngine::atomic). The key structs mirror
//! the KEYS/ARGV split of a server-side script: callers resolve names
//! through [`KeyLayout`](super::keys::KeyLayout) and pass them in.

use super::error::Result;
use super::keys::{FIELD_FIRST_JOB_TIME, FIELD_TOTAL_POPPED, FIELD_TOTAL_PUSHED};
use super::kv::Keyspace;

/// Keys touched by [`push`].
#[derive(Debug, Clone, Copy)]
pub struct PushKeys<'a> {
    pub partitions: &'a str,
    pub queue: &'a str,
    pub metrics: &'a str,
}

/// Keys touched by [`pop_with_cap`].
#[derive(Debug, Clone, Copy)]
pub struct PopKeys<'a> {
    pub queue: &'a str,
    pub partitions: &'a str,
    pub active: &'a str,
    pub metrics: &'a str,
}

/// Keys touched by [`clear_partition`].
#[derive(Debug, Clone, Copy)]
pub struct ClearKeys<'a> {
    pub queue: &'a str,
    pub active: &'a str,
    pub delayed: &'a str,
    pub metrics: &'a str,
    pub partitions: &'a str,
}

/// Enqueue a payload: registers the partition, appends the payload, stamps
/// `first_job_time` on a fresh partition and bumps `total_pushed`. Returns
/// the new queue depth.
pub fn push(
    ks: &mut Keyspace,
    keys: PushKeys<'_>,
    payload: &str,
    partition: &str,
    now: u64,
) -> Result<usize> {
    ks.sadd(keys.partitions, partition)?;
    let depth = ks.rpush(keys.queue, payload)?;
    ks.hsetnx(keys.metrics, FIELD_FIRST_JOB_TIME, &now.to_string())?;
    ks.hincrby(keys.metrics, FIELD_TOTAL_PUSHED, 1)?;
    Ok(depth)
}

/// Pop the head payload iff the raw active-set size is below `cap`, record
/// the reservation and bump `total_popped`. A pop that empties the partition
/// unregisters it and clears `first_job_time` in the same step.
///
/// The raw size is intentional: the caller reaped stale reservations while
/// selecting the partition.
#[allow(clippy::too_many_arguments)]
pub fn pop_with_cap(
    ks: &mut Keyspace,
    keys: PopKeys<'_>,
    partition: &str,
    reservation_id: &str,
    cap: usize,
    ttl_secs: u64,
    now: u64,
) -> Result<Option<String>> {
    if ks.hlen(keys.active)? >= cap {
        return Ok(None);
    }
    let Some(payload) = ks.lpop(keys.queue)? else {
        return Ok(None);
    };
    ks.hset(keys.active, reservation_id, &now.to_string())?;
    ks.expire(keys.active, ttl_secs);
    ks.hincrby(keys.metrics, FIELD_TOTAL_POPPED, 1)?;
    if ks.llen(keys.queue)? == 0 {
        ks.srem(keys.partitions, partition)?;
        ks.hdel(keys.metrics, FIELD_FIRST_JOB_TIME)?;
    }
    Ok(Some(payload))
}

/// Drop every reservation acquired before `threshold`, return the surviving
/// count. Unparseable timestamps are treated as stale.
pub fn reap_and_count(ks: &mut Keyspace, active_key: &str, threshold: u64) -> Result<usize> {
    for (id, stamp) in ks.hgetall(active_key)? {
        let stale = stamp.parse::<u64>().map(|at| at < threshold).unwrap_or(true);
        if stale {
            ks.hdel(active_key, &id)?;
        }
    }
    ks.hlen(active_key)
}

/// Reap, then record a reservation iff the post-reap count is below `cap`.
pub fn acquire_with_reap(
    ks: &mut Keyspace,
    active_key: &str,
    reservation_id: &str,
    cap: usize,
    ttl_secs: u64,
    now: u64,
    threshold: u64,
) -> Result<bool> {
    if reap_and_count(ks, active_key, threshold)? >= cap {
        return Ok(false);
    }
    ks.hset(active_key, reservation_id, &now.to_string())?;
    ks.expire(active_key, ttl_secs);
    Ok(true)
}

/// Move every delayed payload due at or before `now` back onto the queue
/// with full push semantics. Returns how many were promoted.
pub fn promote_due(
    ks: &mut Keyspace,
    delayed_key: &str,
    keys: PushKeys<'_>,
    partition: &str,
    now: u64,
) -> Result<usize> {
    let due = ks.zpop_le(delayed_key, now as f64)?;
    let promoted = due.len();
    for payload in due {
        push(ks, keys, &payload, partition, now)?;
    }
    Ok(promoted)
}

/// Remove every trace of one partition: job list, reservations, delayed
/// entries, counters, and its membership in the partition set.
pub fn clear_partition(ks: &mut Keyspace, keys: ClearKeys<'_>, partition: &str) -> Result<()> {
    ks.del(keys.queue);
    ks.del(keys.active);
    ks.del(keys.delayed);
    ks.del(keys.metrics);
    ks.srem(keys.partitions, partition)?;
    Ok(())
}
