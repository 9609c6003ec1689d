//! Work descriptors and the bounded handoff queue
//!
//! The queue carries small descriptors, never file bytes. The directory tree
//! is the source of truth; the queue is a cache that recovery can rebuild.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

/// Suffix marking a file in the processing tree as uploaded
pub const COMPLETED_SUFFIX: &str = ".completed";

/// Unit of work representing one file to be uploaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Where the file currently lives (incoming, or processing when recovered)
    pub source_path: PathBuf,
    pub session_name: String,
    /// UTC `YYYYMMDD` captured at session start
    pub date_prefix: String,
    pub filename: String,
    /// True when the file is already in the processing tree; the claim
    /// rename is skipped
    pub from_recovery: bool,
}

impl WorkItem {
    /// Blob name inside the configured container
    pub fn blob_name(&self) -> String {
        format!("{}/{}/{}", self.date_prefix, self.session_name, self.filename)
    }
}

/// Bounded FIFO between the watcher/recovery (producers) and the worker
/// pool (consumers).
///
/// `push` suspends when the queue is full, which is the backpressure that
/// slows the watcher to worker throughput. The receiver sits behind a mutex
/// so multiple workers can drain the same channel; the mutex serializes
/// `recv` calls, preserving FIFO order across consumers.
#[derive(Clone)]
pub struct WorkQueue {
    tx: mpsc::Sender<WorkItem>,
    rx: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
}

impl WorkQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Enqueue a work item, suspending while the queue is at capacity.
    pub async fn push(&self, item: WorkItem) -> anyhow::Result<()> {
        self.tx
            .send(item)
            .await
            .map_err(|_| anyhow::anyhow!("work queue closed"))
    }

    /// Dequeue the next work item, suspending while the queue is empty.
    ///
    /// Returns `None` once every producer handle is dropped and the queue
    /// has drained, which lets workers exit cleanly.
    pub async fn pop(&self) -> Option<WorkItem> {
        self.rx.lock().await.recv().await
    }
}
