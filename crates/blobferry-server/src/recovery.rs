//! Startup recovery: rebuild the work queue from the processing tree
//!
//! Any file under `.processing/` without a completion marker is unfinished
//! work from an earlier run. The directory path carries everything needed
//! to build the blob name, so files from older sessions upload correctly
//! without their session being re-activated.

use anyhow::{Context, Result};
use tracing::info;

use crate::config::Config;
use crate::fsops;
use crate::session::SessionState;
use crate::work::{WorkItem, WorkQueue};

/// Scan the processing tree and re-enqueue every unfinished file.
///
/// When anything is found, the lexicographically largest `(date, session)`
/// pair becomes the active session so the watcher resumes polling the most
/// recent one. With nothing to recover the session stays inactive, awaiting
/// an explicit start.
///
/// Returns the number of files re-enqueued.
pub async fn recover(
    queue: &WorkQueue,
    session: &SessionState,
    config: &Config,
) -> Result<usize> {
    let found = fsops::scan_processing_tree(config.paths.nfs_processing_root.clone())
        .await
        .context("scan processing tree")?;

    if found.is_empty() {
        info!("Recovery: processing tree is clean");
        return Ok(0);
    }

    // scan_processing_tree sorts by (date, session, filename), so the last
    // entry is the most recent session.
    let last = &found[found.len() - 1];
    session.activate(&last.session_name, &last.date_prefix);

    info!(
        recovered = found.len(),
        session_name = %last.session_name,
        date_prefix = %last.date_prefix,
        "Recovery: re-enqueueing unfinished files, resuming most recent session"
    );

    let mut enqueued = 0;
    for file in found {
        queue
            .push(WorkItem {
                source_path: file.path,
                session_name: file.session_name,
                date_prefix: file.date_prefix,
                filename: file.filename,
                from_recovery: true,
            })
            .await
            .context("enqueue recovered file")?;
        enqueued += 1;
    }

    Ok(enqueued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::test_config_with_roots;
    use std::fs;

    fn place(config: &Config, date: &str, session: &str, name: &str) {
        let dir = config.paths.nfs_processing_root.join(date).join(session);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(name), b"bytes").unwrap();
    }

    #[tokio::test]
    async fn test_recover_enqueues_unfinished_and_resumes_latest() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config_with_roots(tmp.path());
        place(&config, "20260101", "S4", "z.bin");
        place(&config, "20260301", "S2", "big.dat");
        place(&config, "20260301", "S2", "big.dat.completed");

        let queue = WorkQueue::new(16);
        let session = SessionState::default();
        let count = recover(&queue, &session, &config).await.unwrap();

        assert_eq!(count, 2);
        let target = session.watch_target().unwrap();
        assert_eq!(target.0, "S2");
        assert_eq!(target.1, "20260301");

        let first = queue.pop().await.unwrap();
        assert_eq!(first.filename, "z.bin");
        assert!(first.from_recovery);
        let second = queue.pop().await.unwrap();
        assert_eq!(second.filename, "big.dat");
        assert_eq!(second.blob_name(), "20260301/S2/big.dat");
    }

    #[tokio::test]
    async fn test_recover_empty_tree_leaves_session_inactive() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config_with_roots(tmp.path());

        let queue = WorkQueue::new(16);
        let session = SessionState::default();
        let count = recover(&queue, &session, &config).await.unwrap();

        assert_eq!(count, 0);
        assert!(session.watch_target().is_none());
    }

    #[tokio::test]
    async fn test_recover_skips_completed_markers() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config_with_roots(tmp.path());
        place(&config, "20260301", "S1", "done.bin.completed");

        let queue = WorkQueue::new(16);
        let session = SessionState::default();
        let count = recover(&queue, &session, &config).await.unwrap();

        assert_eq!(count, 0);
        assert!(session.watch_target().is_none());
    }

    #[tokio::test]
    async fn test_recover_after_full_drain_is_a_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config_with_roots(tmp.path());
        place(&config, "20260301", "S1", "a.bin");

        let queue = WorkQueue::new(16);
        let session = SessionState::default();
        assert_eq!(recover(&queue, &session, &config).await.unwrap(), 1);

        // Simulate the worker finishing: marker replaces the file.
        let dir = config.paths.nfs_processing_root.join("20260301").join("S1");
        fs::rename(dir.join("a.bin"), dir.join("a.bin.completed")).unwrap();

        assert_eq!(recover(&queue, &session, &config).await.unwrap(), 0);
    }
}
