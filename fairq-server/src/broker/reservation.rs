use super::driver::QueueDriver;
use crate::core::error::Result;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Exclusive handle over one in-flight job. Bound to `(queue, partition,
/// reservation id)` until [`release`](Self::release) or
/// [`delete`](Self::delete) settles it; settling twice is a no-op on the
/// handle and idempotent on the keyspace.
pub struct Reservation {
    driver: QueueDriver,
    queue: String,
    partition: String,
    id: String,
    payload: String,
    settled: AtomicBool,
}

/// The raw fields of a reservation, for transports that settle it later
/// through the driver instead of this handle.
#[derive(Debug, Clone)]
pub struct ReservationParts {
    pub queue: String,
    pub partition: String,
    pub id: String,
    pub payload: String,
}

impl Reservation {
    pub(crate) fn new(
        driver: QueueDriver,
        queue: String,
        partition: String,
        id: String,
        payload: String,
    ) -> Self {
        Self {
            driver,
            queue,
            partition,
            id,
            payload,
            settled: AtomicBool::new(false),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The payload exactly as stored.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// The payload parsed back to JSON.
    pub fn payload_json(&self) -> Result<Value> {
        Ok(serde_json::from_str(&self.payload)?)
    }

    /// Put the job back: immediately re-queued with `delay_secs == 0`,
    /// otherwise parked in the delayed set until its due-time.
    pub fn release(&self, delay_secs: u64) -> Result<()> {
        if self.settled.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.driver
            .release(&self.queue, &self.partition, &self.id, &self.payload, delay_secs)
            .inspect_err(|_| self.settled.store(false, Ordering::SeqCst))
    }

    /// Settle the job as completed.
    pub fn delete(&self) -> Result<()> {
        if self.settled.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.driver
            .delete(&self.queue, &self.partition, &self.id)
            .inspect_err(|_| self.settled.store(false, Ordering::SeqCst))
    }

    /// Disarm the handle and hand its fields to the caller, who becomes
    /// responsible for settling the reservation.
    pub fn into_parts(self) -> ReservationParts {
        ReservationParts {
            queue: self.queue,
            partition: self.partition,
            id: self.id,
            payload: self.payload,
        }
    }
}

impl fmt::Debug for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("queue", &self.queue)
            .field("partition", &self.partition)
            .field("id", &self.id)
            .field("settled", &self.settled.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
