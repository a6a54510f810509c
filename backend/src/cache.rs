//! Bounding the size of the download cache.

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tracing::{debug, info, warn};

/// Delete all but the `max_files` most recently modified files in `dir`.
///
/// Subdirectories are left alone. A missing directory is not an error.
/// Returns the paths that were removed.
pub async fn evict_oldest(dir: &Path, max_files: usize) -> io::Result<Vec<PathBuf>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut files: Vec<(PathBuf, SystemTime)> = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!("Skipping {}: {}", entry.path().display(), e);
                continue;
            }
        };
        if metadata.is_file() {
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            files.push((entry.path(), modified));
        }
    }

    // Most recent first
    files.sort_by(|a, b| b.1.cmp(&a.1));

    let mut removed = Vec::new();
    for (path, _) in files.into_iter().skip(max_files) {
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Evicted {} from cache", path.display());
                removed.push(path);
            }
            Err(e) => warn!("Failed to evict {}: {}", path.display(), e),
        }
    }

    Ok(removed)
}
