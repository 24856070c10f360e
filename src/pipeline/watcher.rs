//! Directory watcher — scans the input directory and emits stable files.
//!
//! Poll-based rather than event-based: every scan interval the watcher
//! lists `*.xml` files and tracks their size and mtime. A file is emitted
//! as a [`WorkItem`] only once it has been unchanged for the quiet period
//! (GARP writes exports incrementally) and is non-empty. Files already in
//! the directory at startup are picked up by the first scans, so nothing
//! that arrived while the service was down is missed.
//!
//! Emission goes into a bounded queue — when every worker is busy and the
//! queue is full, the watcher simply waits, which is the backpressure.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::WatcherConfig;
use crate::pipeline::WorkItem;

/// Size + mtime fingerprint of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Signature {
    size: u64,
    modified: Option<SystemTime>,
}

impl Signature {
    fn of(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        Ok(Self {
            size: meta.len(),
            modified: meta.modified().ok(),
        })
    }
}

#[derive(Debug)]
struct Tracked {
    signature: Signature,
    unchanged_since: Instant,
}

/// Scans a directory and reports files that have been stable for the
/// quiet period. Pure state machine over scans — the spawn wrapper owns
/// the timer and the queue.
pub struct DirectoryWatcher {
    watch_dir: PathBuf,
    quiet_period: Duration,
    tracked: HashMap<PathBuf, Tracked>,
    /// Files already handed to the queue, with the signature they had at
    /// emission. A same-named file with a new signature counts as new.
    emitted: HashMap<PathBuf, Signature>,
}

impl DirectoryWatcher {
    pub fn new(watch_dir: PathBuf, quiet_period: Duration) -> Self {
        Self {
            watch_dir,
            quiet_period,
            tracked: HashMap::new(),
            emitted: HashMap::new(),
        }
    }

    /// One scan pass. Returns the files that just became stable.
    pub fn scan(&mut self) -> std::io::Result<Vec<PathBuf>> {
        let mut present: Vec<PathBuf> = Vec::new();
        for entry in std::fs::read_dir(&self.watch_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() || !is_xml(&path) {
                continue;
            }
            present.push(path);
        }

        // Forget files that left the directory (claimed or removed).
        self.tracked.retain(|path, _| present.contains(path));
        self.emitted.retain(|path, _| present.contains(path));

        let now = Instant::now();
        let mut stable = Vec::new();

        for path in present {
            let signature = match Signature::of(&path) {
                Ok(s) => s,
                // The file can vanish between listing and stat.
                Err(e) => {
                    debug!(path = %path.display(), "Stat failed mid-scan: {e}");
                    continue;
                }
            };

            if let Some(emitted_sig) = self.emitted.get(&path) {
                if *emitted_sig == signature {
                    continue;
                }
                // Same name, different content — treat as a new file.
                self.emitted.remove(&path);
                self.tracked.remove(&path);
            }

            let tracked = self.tracked.entry(path.clone()).or_insert(Tracked {
                signature,
                unchanged_since: now,
            });
            if tracked.signature != signature {
                tracked.signature = signature;
                tracked.unchanged_since = now;
                continue;
            }

            if signature.size > 0 && now.duration_since(tracked.unchanged_since) >= self.quiet_period
            {
                self.emitted.insert(path.clone(), signature);
                self.tracked.remove(&path);
                stable.push(path);
            }
        }

        Ok(stable)
    }
}

fn is_xml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("xml"))
}

/// Spawn the watcher loop.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop
/// emitting; files not yet emitted stay in the input directory for the
/// next startup.
pub fn spawn_watcher(
    watch_dir: PathBuf,
    config: WatcherConfig,
    tx: mpsc::Sender<WorkItem>,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            dir = %watch_dir.display(),
            interval_secs = config.scan_interval_secs,
            quiet_secs = config.quiet_period_secs,
            "Watcher started"
        );

        let mut watcher = DirectoryWatcher::new(watch_dir, config.quiet_period());
        let mut tick = tokio::time::interval(config.scan_interval());

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Watcher shutting down");
                return;
            }

            let stable = match watcher.scan() {
                Ok(stable) => stable,
                Err(e) => {
                    warn!("Directory scan failed: {e}");
                    continue;
                }
            };

            for path in stable {
                let item = WorkItem::new(path);
                debug!(file = %item.file_name(), "New stable file");
                if tx.send(item).await.is_err() {
                    info!("Work queue closed, watcher stopping");
                    return;
                }
            }
        }
    });

    (handle, shutdown_flag)
}
