//! Worker pool — consumes the work queue.
//!
//! A fixed number of workers share the queue receiver; each takes one
//! item at a time and owns it end to end. On shutdown, workers finish
//! their in-flight item but claim nothing new: an item received after
//! the flag is set is dropped, which leaves its file untouched in the
//! input directory for the next startup.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::pipeline::{Processor, WorkItem};

/// Spawn `count` workers over a shared queue receiver.
///
/// Returns the worker handles and a shutdown flag. Workers exit when the
/// flag is set or the queue closes.
pub fn spawn_workers(
    count: usize,
    rx: mpsc::Receiver<WorkItem>,
    processor: Arc<Processor>,
) -> (Vec<JoinHandle<()>>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let queue = Arc::new(Mutex::new(rx));

    let handles = (0..count)
        .map(|worker_id| {
            let queue = Arc::clone(&queue);
            let processor = Arc::clone(&processor);
            let shutdown = Arc::clone(&shutdown);

            tokio::spawn(async move {
                debug!(worker_id, "Worker started");
                loop {
                    // Hold the lock only while waiting for the next item.
                    let item = { queue.lock().await.recv().await };
                    let Some(item) = item else {
                        debug!(worker_id, "Queue closed, worker exiting");
                        return;
                    };

                    if shutdown.load(Ordering::Relaxed) {
                        info!(
                            worker_id,
                            file = %item.file_name(),
                            "Shutting down, leaving file unclaimed"
                        );
                        return;
                    }

                    processor.process(item).await;
                }
            })
        })
        .collect();

    (handles, Arc::clone(&shutdown))
}
