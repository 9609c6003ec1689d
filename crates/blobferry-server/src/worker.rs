//! Worker pool: claim -> stage -> upload -> mark -> clean
//!
//! Workers never talk to each other; they synchronize through the queue and
//! through rename semantics on the shared filesystem. Any failure inside one
//! work item is confined to that item: the file stays in the processing tree
//! and recovery rediscovers it on the next start.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::fsops;
use crate::session::SessionState;
use crate::storage::BlobStore;
use crate::work::{WorkItem, WorkQueue, COMPLETED_SUFFIX};

/// What became of one work item
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Uploaded,
    /// Another claimer renamed the file first; nothing to do.
    AlreadyClaimed,
}

/// Spawn the worker pool. Each worker drains the queue until it closes.
pub fn spawn_workers(
    queue: &WorkQueue,
    store: Arc<dyn BlobStore>,
    session: Arc<SessionState>,
    config: Arc<Config>,
) -> Vec<JoinHandle<()>> {
    (0..config.pipeline.worker_concurrency)
        .map(|worker_id| {
            let queue = queue.clone();
            let store = store.clone();
            let session = session.clone();
            let config = config.clone();
            tokio::spawn(worker_loop(worker_id, queue, store, session, config))
        })
        .collect()
}

async fn worker_loop(
    worker_id: usize,
    queue: WorkQueue,
    store: Arc<dyn BlobStore>,
    session: Arc<SessionState>,
    config: Arc<Config>,
) {
    debug!(worker_id, "Worker started");
    while let Some(item) = queue.pop().await {
        match process_item(&item, store.as_ref(), &config).await {
            Ok(Outcome::Uploaded) => session.record_success(),
            Ok(Outcome::AlreadyClaimed) => {
                debug!(worker_id, file_name = %item.filename, "File already claimed");
            }
            Err(err) => {
                session.record_failure(&item.filename, &format!("{err:#}"));
                error!(
                    worker_id,
                    file_name = %item.filename,
                    session_name = %item.session_name,
                    error = %format!("{err:#}"),
                    "Failed to process file"
                );
            }
        }
    }
    debug!(worker_id, "Worker stopped");
}

/// Drive one file through the full pipeline. Steps are strictly sequential
/// within the item; every NFS touch goes through `fsops`.
pub async fn process_item(
    item: &WorkItem,
    store: &dyn BlobStore,
    config: &Config,
) -> Result<Outcome> {
    let processing_dir = config
        .paths
        .nfs_processing_root
        .join(&item.date_prefix)
        .join(&item.session_name);
    let processing_path = processing_dir.join(&item.filename);
    let staging_dir = config
        .paths
        .local_staging_root
        .join(&item.date_prefix)
        .join(&item.session_name);
    let staging_path = staging_dir.join(&item.filename);
    let blob_name = item.blob_name();

    // 1. Claim. The atomic rename is the cross-replica lock: exactly one
    //    claimer wins, the loser sees the source gone.
    if !item.from_recovery {
        fsops::create_dir_all(processing_dir)
            .await
            .context("ensure processing directory")?;
        match fsops::rename(item.source_path.clone(), processing_path.clone()).await {
            Ok(()) => {}
            Err(err) if fsops::is_gone(&err) => return Ok(Outcome::AlreadyClaimed),
            Err(err) => return Err(err).context("claim rename"),
        }
    }

    // 2. Stage to local storage.
    std::fs::create_dir_all(&staging_dir).context("ensure staging directory")?;
    let size_bytes = fsops::copy_preserving(processing_path.clone(), staging_path.clone())
        .await
        .context("copy to staging")?;

    // 3. Upload.
    let started = Instant::now();
    store
        .upload_file(
            &blob_name,
            &staging_path,
            config.pipeline.azure_max_concurrency,
        )
        .await
        .context("upload")?;
    let duration = started.elapsed();

    info!(
        file_name = %item.filename,
        session_name = %item.session_name,
        date_prefix = %item.date_prefix,
        blob_name = %blob_name,
        size_bytes,
        duration_s = format!("{:.3}", duration.as_secs_f64()),
        "Upload complete"
    );

    // 4. Mark. This rename is the commit point; after it the NFS copy is
    //    garbage, and the reaper may collect it.
    let completed_path = marker_path(&processing_path);
    fsops::rename(processing_path, completed_path)
        .await
        .context("completion marker rename")?;

    // 5. Clean staging. Best-effort: staging is ephemeral.
    if let Err(err) = std::fs::remove_file(&staging_path) {
        warn!(
            staging_path = %staging_path.display(),
            error = %err,
            "Could not delete staging file"
        );
    }

    Ok(Outcome::Uploaded)
}

fn marker_path(processing_path: &std::path::Path) -> PathBuf {
    let mut name = processing_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(COMPLETED_SUFFIX);
    processing_path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_path_appends_suffix() {
        let path = PathBuf::from("/nfs/.processing/20260301/S1/a.bin");
        assert_eq!(
            marker_path(&path),
            PathBuf::from("/nfs/.processing/20260301/S1/a.bin.completed")
        );
    }
}
