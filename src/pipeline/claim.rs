//! Claiming — exclusive ownership of a file via atomic rename.
//!
//! Moving the file into the processing directory *is* the lock: the OS
//! guarantees at most one rename of a given source succeeds, so two
//! workers (or two connector instances on the same share) can never both
//! own a file. No in-process lock exists.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::ClaimError;
use crate::pipeline::WorkItem;

/// Claim a work item by renaming its file into the processing directory.
///
/// Returns the file's new path. A `NotFound` from the rename means
/// another worker won the race — reported as [`ClaimError::Conflict`].
pub fn claim(item: &WorkItem, processing_dir: &Path) -> Result<PathBuf, ClaimError> {
    let dest = processing_dir.join(item.file_name());
    match std::fs::rename(&item.path, &dest) {
        Ok(()) => {
            debug!(file = %item.file_name(), "Claimed");
            Ok(dest)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ClaimError::Conflict {
            path: item.path.clone(),
        }),
        Err(source) => Err(ClaimError::Io {
            path: item.path.clone(),
            source,
        }),
    }
}

/// Move files stranded in the processing directory back into the input
/// directory.
///
/// Runs at startup: no claim survives a restart, so anything still in
/// Processing was orphaned by a crash mid-flight and gets re-queued by
/// the first scans. Returns the number of recovered files.
pub fn recover_stale(processing_dir: &Path, watch_dir: &Path) -> std::io::Result<usize> {
    let mut recovered = 0;
    for entry in std::fs::read_dir(processing_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name() else {
            continue;
        };
        let dest = watch_dir.join(name);
        match std::fs::rename(&path, &dest) {
            Ok(()) => {
                info!(file = %name.to_string_lossy(), "Recovered stale claim");
                recovered += 1;
            }
            Err(e) => {
                warn!(file = %name.to_string_lossy(), "Failed to recover stale claim: {e}");
            }
        }
    }
    Ok(recovered)
}
