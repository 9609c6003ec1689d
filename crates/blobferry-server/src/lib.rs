//! Blobferry Server Library
//!
//! Ingest engine for bursty file drops on a shared network filesystem:
//! watches a per-session incoming directory, detects files whose writes
//! have finished, and ships them to Azure Blob Storage exactly once per
//! observation, surviving process crashes mid-upload.
//!
//! # Architecture
//!
//! The directory tree IS the state machine; every in-memory structure is a
//! rebuildable cache:
//!
//! ```text
//! incoming/<session>/<file>                     external writer drops here
//!    | claim (atomic rename = cross-replica lock)
//! .processing/<date>/<session>/<file>           durable work record
//!    | copy                                     local staging for upload
//! staging/<date>/<session>/<file>
//!    | upload (block blob, overwrite)
//! <container>/<date>/<session>/<file>
//!    | mark (atomic rename = commit point)
//! .processing/<date>/<session>/<file>.completed reaper collects
//! ```
//!
//! Components: a polling **watcher** (NFS has no inotify), a bounded
//! **work queue**, a **worker pool** driving the per-file pipeline, a
//! one-shot startup **recovery** sweep, and a periodic **reaper**. Two
//! replicas may share the tree: the claim rename guarantees at most one
//! uploader per file, and re-uploads are idempotent overwrites.

pub mod api;
pub mod config;
pub mod error;
pub mod fsops;
pub mod middleware;
pub mod reaper;
pub mod recovery;
pub mod session;
pub mod storage;
pub mod watcher;
pub mod work;
pub mod worker;


// Re-export commonly used types
pub use error::ApiError;
