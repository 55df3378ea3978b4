use super::driver::QueueDriver;
use crate::metrics::MetricsReader;
use std::time::Duration;
use tracing::{debug, warn};

/// Background task promoting due delayed jobs back onto their partitions
/// and dropping expired keys. One sweep per interval over every known
/// queue.
pub fn spawn_sweeper(
    driver: QueueDriver,
    reader: MetricsReader,
    interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            ticker.tick().await;
            let purged = driver.purge_expired();
            if purged > 0 {
                debug!(purged, "dropped expired keys");
            }
            for queue in reader.queue_names() {
                if let Err(error) = driver.promote_due(&queue) {
                    warn!(queue, %error, "delayed-job promotion failed");
                }
            }
        }
    })
}
