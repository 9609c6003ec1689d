//! Filesystem plumbing for paths that may live on NFS
//!
//! Every call that can touch the network filesystem runs on the blocking
//! thread pool via `tokio::task::spawn_blocking`. If the awaiting task is
//! cancelled, the future is dropped and the blocking thread is abandoned
//! rather than joined, so a wedged NFS mount never stalls shutdown. Local
//! staging operations are cheap and stay inline at the call sites.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::work::COMPLETED_SUFFIX;

/// `ESTALE`: the NFS server dropped the file handle. Functionally the same
/// as "gone" for claim races and scans; `std::io::ErrorKind` has no portable
/// mapping for it.
const ESTALE: i32 = 116;

/// Size and mtime observed for one directory entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FileSig {
    pub size: u64,
    pub mtime: SystemTime,
}

/// One watcher observation: filename to `(size, mtime)`
pub type ScanMap = HashMap<String, FileSig>;

/// A non-completed file found under the processing tree
#[derive(Debug, Clone)]
pub struct RecoveredFile {
    pub path: PathBuf,
    pub date_prefix: String,
    pub session_name: String,
    pub filename: String,
}

/// True when the error means the path no longer exists from this client's
/// point of view (claim race, concurrent reaper, stale handle).
pub fn is_gone(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotFound || err.raw_os_error() == Some(ESTALE)
}

async fn run_blocking<T, F>(f: F) -> io::Result<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(join_err) => Err(io::Error::other(join_err)),
    }
}

/// Enumerate regular files in `dir`, recording `(size, mtime)` per entry.
///
/// A missing or stale directory yields an empty map (the session directory
/// may not exist yet). Entries that disappear between listing and stat are
/// skipped. `allowed_extensions` holds lowercased dot-prefixed extensions;
/// an empty set admits everything.
pub async fn scan_dir(
    dir: PathBuf,
    allowed_extensions: std::collections::HashSet<String>,
) -> io::Result<ScanMap> {
    run_blocking(move || {
        let mut result = ScanMap::new();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if is_gone(&err) => return Ok(result),
            Err(err) => return Err(err),
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if is_gone(&err) => continue,
                Err(err) => return Err(err),
            };

            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };

            if !allowed_extensions.is_empty() {
                let ext = Path::new(&name)
                    .extension()
                    .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()));
                match ext {
                    Some(ext) if allowed_extensions.contains(&ext) => {}
                    _ => continue,
                }
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) if is_gone(&err) => continue,
                Err(err) => return Err(err),
            };
            if !metadata.is_file() {
                continue;
            }

            result.insert(
                name,
                FileSig {
                    size: metadata.len(),
                    mtime: metadata.modified()?,
                },
            );
        }

        Ok(result)
    })
    .await
}

/// Atomic same-filesystem rename. The claim and the completion marker both
/// go through here.
pub async fn rename(src: PathBuf, dst: PathBuf) -> io::Result<()> {
    run_blocking(move || fs::rename(&src, &dst)).await
}

pub async fn create_dir_all(path: PathBuf) -> io::Result<()> {
    run_blocking(move || fs::create_dir_all(&path)).await
}

pub async fn unlink(path: PathBuf) -> io::Result<()> {
    run_blocking(move || fs::remove_file(&path)).await
}

/// Copy `src` into `dst`, carrying over the source mtime. The copy is
/// flushed to durable local storage best-effort: the processing tree stays
/// the durable source, so an fsync failure does not fail the item.
pub async fn copy_preserving(src: PathBuf, dst: PathBuf) -> io::Result<u64> {
    run_blocking(move || {
        let mtime = fs::metadata(&src)?.modified()?;
        let size = fs::copy(&src, &dst)?;

        let file = fs::OpenOptions::new().write(true).open(&dst)?;
        file.set_modified(mtime)?;
        if let Err(err) = file.sync_all() {
            tracing::debug!(path = %dst.display(), error = %err, "Staging fsync failed");
        }

        Ok(size)
    })
    .await
}

/// Walk the processing tree and return every file without a completion
/// marker suffix, sorted by `(date, session, filename)`.
pub async fn scan_processing_tree(root: PathBuf) -> io::Result<Vec<RecoveredFile>> {
    run_blocking(move || {
        let mut found = Vec::new();
        for (date_prefix, date_dir) in sorted_subdirs(&root)? {
            for (session_name, session_dir) in sorted_subdirs(&date_dir)? {
                let mut names: Vec<String> = list_regular_files(&session_dir)?;
                names.sort();
                for filename in names {
                    if filename.ends_with(COMPLETED_SUFFIX) {
                        continue;
                    }
                    found.push(RecoveredFile {
                        path: session_dir.join(&filename),
                        date_prefix: date_prefix.clone(),
                        session_name: session_name.clone(),
                        filename,
                    });
                }
            }
        }
        Ok(found)
    })
    .await
}

/// Collect every completion marker under the processing tree.
pub async fn find_completed_markers(root: PathBuf) -> io::Result<Vec<PathBuf>> {
    run_blocking(move || {
        let mut markers = Vec::new();
        for (_, date_dir) in sorted_subdirs(&root)? {
            for (_, session_dir) in sorted_subdirs(&date_dir)? {
                for filename in list_regular_files(&session_dir)? {
                    if filename.ends_with(COMPLETED_SUFFIX) {
                        markers.push(session_dir.join(filename));
                    }
                }
            }
        }
        Ok(markers)
    })
    .await
}

/// Remove empty `<session>/` then `<date>/` directories under the
/// processing root. Non-empty directories are left alone; races with
/// concurrent writers surface as errors that are simply skipped.
pub async fn prune_empty_dirs(root: PathBuf) -> io::Result<()> {
    run_blocking(move || {
        for (_, date_dir) in sorted_subdirs(&root)? {
            for (_, session_dir) in sorted_subdirs(&date_dir)? {
                let _ = fs::remove_dir(&session_dir);
            }
            let _ = fs::remove_dir(&date_dir);
        }
        Ok(())
    })
    .await
}

/// Subdirectories of `path` as `(name, path)`, sorted by name. A missing
/// root is treated as empty.
fn sorted_subdirs(path: &Path) -> io::Result<Vec<(String, PathBuf)>> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(err) if is_gone(&err) => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if is_gone(&err) => continue,
            Err(err) => return Err(err),
        };
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if !is_dir {
            continue;
        }
        if let Ok(name) = entry.file_name().into_string() {
            dirs.push((name, entry.path()));
        }
    }
    dirs.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(dirs)
}

fn list_regular_files(path: &Path) -> io::Result<Vec<String>> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(err) if is_gone(&err) => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if is_gone(&err) => continue,
            Err(err) => return Err(err),
        };
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if !is_file {
            continue;
        }
        if let Ok(name) = entry.file_name().into_string() {
            names.push(name);
        }
    }
    Ok(names)
}
