//! NFS polling loop: scans the incoming directory and enqueues stable files
//!
//! NFS has no push notifications and attribute caches can serve stale sizes,
//! so discovery is periodic and stability is a two-observation predicate:
//! a file is enqueued only when `(size, mtime)` matched across two
//! consecutive scans and the mtime is at least `min_file_age` in the past.
//! Keep `min_file_age` at or above the mount's attribute-cache timeout
//! (e.g. `actimeo=5` with the 5 s default age).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::Config;
use crate::fsops::{self, ScanMap};
use crate::session::SessionState;
use crate::work::{WorkItem, WorkQueue};

/// Backoff ceiling after repeated scan failures.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Poll the active session's incoming directory forever, enqueuing each
/// stable file exactly once per observation.
///
/// Enqueueing suspends while the queue is full, so the watcher naturally
/// slows to worker throughput; a file left in incoming re-passes the
/// stability check on a later cycle.
pub async fn watcher_loop(
    queue: WorkQueue,
    session: Arc<SessionState>,
    config: Arc<Config>,
) {
    let mut previous = ScanMap::new();
    let mut pending: HashSet<String> = HashSet::new();
    let mut backoff = Duration::ZERO;

    loop {
        sleep(config.watcher.poll_interval() + backoff).await;

        let Some((session_name, date_prefix)) = session.watch_target() else {
            previous.clear();
            pending.clear();
            continue;
        };

        let incoming_dir = config.paths.nfs_incoming_dir.join(&session_name);
        let current = match fsops::scan_dir(
            incoming_dir.clone(),
            config.watcher.file_extensions.clone(),
        )
        .await
        {
            Ok(scan) => {
                backoff = Duration::ZERO;
                scan
            }
            Err(err) => {
                backoff = next_backoff(backoff);
                warn!(
                    error = %err,
                    backoff_s = backoff.as_secs_f64(),
                    "Incoming scan failed"
                );
                continue;
            }
        };

        // Entries absent from the listing were claimed by a worker.
        pending.retain(|name| current.contains_key(name));

        let now = SystemTime::now();
        for filename in stable_candidates(
            &current,
            &previous,
            &pending,
            config.watcher.min_file_age(),
            now,
        ) {
            let item = WorkItem {
                source_path: incoming_dir.join(&filename),
                session_name: session_name.clone(),
                date_prefix: date_prefix.clone(),
                filename: filename.clone(),
                from_recovery: false,
            };
            if queue.push(item).await.is_err() {
                debug!("Work queue closed, watcher exiting");
                return;
            }
            debug!(file_name = %filename, "Enqueued stable file");
            pending.insert(filename);
        }

        previous = current;
    }
}

/// Files in `current` that were observed with identical `(size, mtime)` in
/// `previous`, are old enough, and are not already pending. Sorted for
/// deterministic enqueue order.
fn stable_candidates(
    current: &ScanMap,
    previous: &ScanMap,
    pending: &HashSet<String>,
    min_file_age: Duration,
    now: SystemTime,
) -> Vec<String> {
    let mut selected: Vec<String> = current
        .iter()
        .filter(|(name, _)| !pending.contains(*name))
        .filter(|(name, sig)| previous.get(*name).is_some_and(|prev| prev == *sig))
        .filter(|(_, sig)| {
            now.duration_since(sig.mtime)
                .map(|age| age >= min_file_age)
                .unwrap_or(false)
        })
        .map(|(name, _)| name.clone())
        .collect();
    selected.sort();
    selected
}

fn next_backoff(backoff: Duration) -> Duration {
    if backoff.is_zero() {
        Duration::from_secs(1)
    } else {
        (backoff * 2).min(MAX_BACKOFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsops::FileSig;

    fn sig(size: u64, age: Duration, now: SystemTime) -> FileSig {
        FileSig {
            size,
            mtime: now - age,
        }
    }

    #[test]
    fn test_stable_file_is_selected() {
        let now = SystemTime::now();
        let mut current = ScanMap::new();
        let mut previous = ScanMap::new();
        current.insert("a.bin".into(), sig(100, Duration::from_secs(10), now));
        previous.insert("a.bin".into(), sig(100, Duration::from_secs(10), now));

        let picked = stable_candidates(
            &current,
            &previous,
            &HashSet::new(),
            Duration::from_secs(5),
            now,
        );
        assert_eq!(picked, vec!["a.bin".to_string()]);
    }

    #[test]
    fn test_young_file_is_not_selected() {
        let now = SystemTime::now();
        let mut current = ScanMap::new();
        let mut previous = ScanMap::new();
        current.insert("a.bin".into(), sig(100, Duration::from_secs(2), now));
        previous.insert("a.bin".into(), sig(100, Duration::from_secs(2), now));

        let picked = stable_candidates(
            &current,
            &previous,
            &HashSet::new(),
            Duration::from_secs(5),
            now,
        );
        assert!(picked.is_empty());
    }

    #[test]
    fn test_growing_file_is_not_selected() {
        let now = SystemTime::now();
        let mut current = ScanMap::new();
        let mut previous = ScanMap::new();
        current.insert("a.bin".into(), sig(200, Duration::from_secs(10), now));
        previous.insert("a.bin".into(), sig(100, Duration::from_secs(10), now));

        let picked = stable_candidates(
            &current,
            &previous,
            &HashSet::new(),
            Duration::from_secs(5),
            now,
        );
        assert!(picked.is_empty());
    }

    #[test]
    fn test_first_observation_is_not_selected() {
        let now = SystemTime::now();
        let mut current = ScanMap::new();
        current.insert("a.bin".into(), sig(100, Duration::from_secs(10), now));

        let picked = stable_candidates(
            &current,
            &ScanMap::new(),
            &HashSet::new(),
            Duration::from_secs(5),
            now,
        );
        assert!(picked.is_empty());
    }

    #[test]
    fn test_pending_file_is_not_selected_again() {
        let now = SystemTime::now();
        let mut current = ScanMap::new();
        let mut previous = ScanMap::new();
        current.insert("a.bin".into(), sig(100, Duration::from_secs(10), now));
        previous.insert("a.bin".into(), sig(100, Duration::from_secs(10), now));
        let pending: HashSet<String> = ["a.bin".to_string()].into_iter().collect();

        let picked =
            stable_candidates(&current, &previous, &pending, Duration::from_secs(5), now);
        assert!(picked.is_empty());
    }

    #[test]
    fn test_candidates_are_sorted() {
        let now = SystemTime::now();
        let mut current = ScanMap::new();
        let mut previous = ScanMap::new();
        for name in ["c.bin", "a.bin", "b.bin"] {
            current.insert(name.into(), sig(1, Duration::from_secs(10), now));
            previous.insert(name.into(), sig(1, Duration::from_secs(10), now));
        }

        let picked = stable_candidates(
            &current,
            &previous,
            &HashSet::new(),
            Duration::from_secs(5),
            now,
        );
        assert_eq!(picked, vec!["a.bin", "b.bin", "c.bin"]);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let b1 = next_backoff(Duration::ZERO);
        assert_eq!(b1, Duration::from_secs(1));
        let b2 = next_backoff(b1);
        assert_eq!(b2, Duration::from_secs(2));
        let capped = next_backoff(Duration::from_secs(50));
        assert_eq!(capped, MAX_BACKOFF);
    }
}
