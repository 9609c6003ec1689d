//! Background sweep of completion markers and empty session directories
//!
//! Everything here is garbage collection: failures are logged and retried
//! on the next cycle. If NFS is wedged the sweep simply hangs on the
//! blocking pool; the liveness probe never depends on it.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::Config;
use crate::fsops;
use crate::work::COMPLETED_SUFFIX;

/// Periodically sweep the processing tree until cancelled.
pub async fn reaper_loop(config: Arc<Config>) {
    loop {
        sleep(config.reaper.interval()).await;
        if let Err(err) = sweep(&config).await {
            warn!(error = %format!("{err:#}"), "Reaper sweep failed");
        }
    }
}

/// One sweep: unlink every completion marker, drop any staging leftovers
/// the worker failed to clean, then prune empty directories bottom-up.
pub async fn sweep(config: &Config) -> Result<()> {
    let processing_root = config.paths.nfs_processing_root.clone();
    let markers = fsops::find_completed_markers(processing_root.clone())
        .await
        .context("walk processing tree")?;

    for marker in markers {
        match fsops::unlink(marker.clone()).await {
            Ok(()) => {
                debug!(marker = %marker.display(), "Removed completion marker");
                remove_staging_leftover(config, &marker);
            }
            Err(err) => {
                debug!(
                    marker = %marker.display(),
                    error = %err,
                    "Could not remove completion marker"
                );
            }
        }
    }

    fsops::prune_empty_dirs(processing_root)
        .await
        .context("prune empty directories")?;

    Ok(())
}

/// Safety-net: delete the staging copy belonging to a reaped marker. The
/// worker normally removes it; a crash between upload and clean leaves it.
fn remove_staging_leftover(config: &Config, marker: &std::path::Path) {
    let Ok(relative) = marker.strip_prefix(&config.paths.nfs_processing_root) else {
        return;
    };
    let Some(name) = relative.file_name().and_then(|n| n.to_str()) else {
        return;
    };
    let Some(original) = name.strip_suffix(COMPLETED_SUFFIX) else {
        return;
    };
    let staging_path = match relative.parent() {
        Some(parent) => config.paths.local_staging_root.join(parent).join(original),
        None => config.paths.local_staging_root.join(original),
    };
    if let Err(err) = std::fs::remove_file(&staging_path) {
        if !fsops::is_gone(&err) {
            debug!(
                staging_path = %staging_path.display(),
                error = %err,
                "Could not delete staging leftover"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::test_config_with_roots;
    use std::fs;

    #[tokio::test]
    async fn test_sweep_removes_markers_and_prunes_empty_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config_with_roots(tmp.path());
        let dir = config.paths.nfs_processing_root.join("20260101").join("S4");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("z.bin.completed"), b"").unwrap();

        sweep(&config).await.unwrap();

        assert!(!dir.join("z.bin.completed").exists());
        assert!(!config.paths.nfs_processing_root.join("20260101").exists());
    }

    #[tokio::test]
    async fn test_sweep_leaves_unfinished_files_alone() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config_with_roots(tmp.path());
        let dir = config.paths.nfs_processing_root.join("20260301").join("S2");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("pending.bin"), b"p").unwrap();
        fs::write(dir.join("done.bin.completed"), b"").unwrap();

        sweep(&config).await.unwrap();

        assert!(dir.join("pending.bin").exists());
        assert!(!dir.join("done.bin.completed").exists());
        // Directory still holds pending work, so it must survive the prune.
        assert!(dir.exists());
    }

    #[tokio::test]
    async fn test_sweep_deletes_staging_leftover() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config_with_roots(tmp.path());
        let processing = config.paths.nfs_processing_root.join("20260301").join("S2");
        let staging = config.paths.local_staging_root.join("20260301").join("S2");
        fs::create_dir_all(&processing).unwrap();
        fs::create_dir_all(&staging).unwrap();
        fs::write(processing.join("a.bin.completed"), b"").unwrap();
        fs::write(staging.join("a.bin"), b"leftover").unwrap();

        sweep(&config).await.unwrap();

        assert!(!staging.join("a.bin").exists());
    }

    #[tokio::test]
    async fn test_sweep_on_missing_root_is_ok() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config_with_roots(tmp.path());
        // Processing root never created.
        sweep(&config).await.unwrap();
    }
}
