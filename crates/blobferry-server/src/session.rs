//! Session lifecycle: naming, validation, directory creation, counters
//!
//! The in-memory descriptor is a cache over the directory tree. Counters are
//! updated by workers and read by the status endpoint; one mutex around the
//! whole descriptor gives consistent snapshots.

use std::sync::Mutex;

use chrono::Utc;
use uuid::Uuid;

use crate::config::Config;
use crate::error::ApiError;
use crate::fsops;

/// Prefix for auto-generated session names. Sorts ahead of typical
/// user-provided names so lexicographic order stays chronological when
/// mixed (UUIDv7 payloads are themselves time-ordered).
const AUTO_SESSION_PREFIX: &str = "00-session-";

#[derive(Debug, Clone, Default)]
struct Descriptor {
    active: bool,
    session_name: Option<String>,
    date_prefix: Option<String>,
    processed_ok: u64,
    processed_err: u64,
    last_error: Option<String>,
}

/// Consistent point-in-time view of the session descriptor
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub active: bool,
    pub session_name: Option<String>,
    pub date_prefix: Option<String>,
    pub processed_ok: u64,
    pub processed_err: u64,
    pub last_error: Option<String>,
}

/// Mutable session state shared between the control surface, the watcher,
/// and the workers.
#[derive(Debug, Default)]
pub struct SessionState {
    inner: Mutex<Descriptor>,
}

impl SessionState {
    /// Bind the descriptor to a session and mark it active. Used by
    /// session start and by recovery auto-resume. Counters are preserved
    /// across sessions within one process lifetime.
    pub fn activate(&self, session_name: &str, date_prefix: &str) {
        let mut inner = self.lock();
        inner.active = true;
        inner.session_name = Some(session_name.to_string());
        inner.date_prefix = Some(date_prefix.to_string());
    }

    /// Stop watching. Name and date prefix are preserved so draining
    /// workers and a later recovery still resolve paths.
    pub fn deactivate(&self) {
        self.lock().active = false;
    }

    /// The `(session, date)` pair the watcher should poll, if any.
    pub fn watch_target(&self) -> Option<(String, String)> {
        let inner = self.lock();
        if !inner.active {
            return None;
        }
        match (&inner.session_name, &inner.date_prefix) {
            (Some(name), Some(date)) => Some((name.clone(), date.clone())),
            _ => None,
        }
    }

    pub fn record_success(&self) {
        self.lock().processed_ok += 1;
    }

    pub fn record_failure(&self, filename: &str, error: &str) {
        let mut inner = self.lock();
        inner.processed_err += 1;
        inner.last_error = Some(format!("{filename}: {error}"));
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.lock();
        SessionSnapshot {
            active: inner.active,
            session_name: inner.session_name.clone(),
            date_prefix: inner.date_prefix.clone(),
            processed_ok: inner.processed_ok,
            processed_err: inner.processed_err,
            last_error: inner.last_error.clone(),
        }
    }

    /// Atomically reserve the active slot. Fails when a session is already
    /// active so two concurrent starts cannot both proceed.
    fn reserve(&self, session_name: &str, date_prefix: &str) -> Result<(), ApiError> {
        let mut inner = self.lock();
        if inner.active {
            return Err(ApiError::Conflict("Session already active".to_string()));
        }
        inner.active = true;
        inner.session_name = Some(session_name.to_string());
        inner.date_prefix = Some(date_prefix.to_string());
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Descriptor> {
        // Counter updates cannot panic while holding the lock; recover from
        // poisoning instead of taking the whole control surface down.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Check a user-provided session name against the allowed grammar
/// `[A-Za-z0-9_.-]+`. The name becomes a path component on NFS and a blob
/// name segment, so anything else is rejected at the control surface.
pub fn validate_session_name(name: &str) -> Result<(), ApiError> {
    if name.is_empty() {
        return Err(ApiError::Validation(
            "session_name must not be empty".to_string(),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(ApiError::Validation(
            "session_name must match [A-Za-z0-9_.-]+".to_string(),
        ));
    }
    // In-grammar but still a path traversal as a directory component.
    if name == "." || name == ".." {
        return Err(ApiError::Validation(
            "session_name must not be a relative path component".to_string(),
        ));
    }
    Ok(())
}

/// Generate an auto-session name with a time-ordered UUIDv7 payload.
pub fn generate_session_name() -> String {
    format!("{AUTO_SESSION_PREFIX}{}", Uuid::now_v7())
}

/// Today's UTC date as the 8-digit prefix used in blob and directory names.
pub fn current_date_prefix() -> String {
    Utc::now().format("%Y%m%d").to_string()
}

/// Start a new session: validate or generate the name, create the incoming,
/// processing, and staging directories, and mark the descriptor active.
///
/// Returns the bound `(date_prefix, session_name)`.
pub async fn start_session(
    state: &SessionState,
    config: &Config,
    requested_name: Option<String>,
) -> Result<(String, String), ApiError> {
    let name = match requested_name {
        Some(name) => {
            validate_session_name(&name)?;
            name
        }
        None => generate_session_name(),
    };
    let date_prefix = current_date_prefix();

    state.reserve(&name, &date_prefix)?;

    let incoming_dir = config.paths.nfs_incoming_dir.join(&name);
    let processing_dir = config
        .paths
        .nfs_processing_root
        .join(&date_prefix)
        .join(&name);
    let staging_dir = config
        .paths
        .local_staging_root
        .join(&date_prefix)
        .join(&name);

    let created = async {
        fsops::create_dir_all(incoming_dir).await?;
        fsops::create_dir_all(processing_dir).await?;
        // Staging lives on local ephemeral storage; no blocking dispatch.
        std::fs::create_dir_all(staging_dir)
    }
    .await;

    if let Err(err) = created {
        state.deactivate();
        return Err(ApiError::Internal(
            anyhow::Error::new(err).context("Failed to create session directories"),
        ));
    }

    tracing::info!(
        session_name = %name,
        date_prefix = %date_prefix,
        "Session started"
    );

    Ok((date_prefix, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::test_config_with_roots;

    #[test]
    fn test_validate_session_name_accepts_grammar() {
        assert!(validate_session_name("S1").is_ok());
        assert!(validate_session_name("run_2026-03.01").is_ok());
        assert!(validate_session_name("00-session-0195").is_ok());
    }

    #[test]
    fn test_validate_session_name_rejects_path_components() {
        assert!(validate_session_name("foo/bar").is_err());
        assert!(validate_session_name("..").is_err());
        assert!(validate_session_name(".").is_err());
        assert!(validate_session_name("a b").is_err());
        assert!(validate_session_name("").is_err());
    }

    #[test]
    fn test_generate_session_name_is_prefixed_and_valid() {
        let name = generate_session_name();
        assert!(name.starts_with(AUTO_SESSION_PREFIX));
        assert!(validate_session_name(&name).is_ok());
    }

    #[test]
    fn test_generated_names_sort_chronologically() {
        let a = generate_session_name();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = generate_session_name();
        assert!(a < b);
    }

    #[test]
    fn test_current_date_prefix_is_eight_digits() {
        let date = current_date_prefix();
        assert_eq!(date.len(), 8);
        assert!(date.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_counters_and_snapshot() {
        let state = SessionState::default();
        state.activate("S1", "20260301");
        state.record_success();
        state.record_success();
        state.record_failure("a.bin", "upload failed");

        let snap = state.snapshot();
        assert!(snap.active);
        assert_eq!(snap.processed_ok, 2);
        assert_eq!(snap.processed_err, 1);
        assert_eq!(snap.last_error.as_deref(), Some("a.bin: upload failed"));
    }

    #[test]
    fn test_deactivate_preserves_name_for_draining() {
        let state = SessionState::default();
        state.activate("S1", "20260301");
        state.deactivate();

        assert!(state.watch_target().is_none());
        let snap = state.snapshot();
        assert!(!snap.active);
        assert_eq!(snap.session_name.as_deref(), Some("S1"));
    }

    #[tokio::test]
    async fn test_start_session_creates_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config_with_roots(tmp.path());
        let state = SessionState::default();

        let (date, name) = start_session(&state, &config, Some("S1".to_string()))
            .await
            .unwrap();

        assert_eq!(name, "S1");
        assert!(config.paths.nfs_incoming_dir.join("S1").is_dir());
        assert!(config
            .paths
            .nfs_processing_root
            .join(&date)
            .join("S1")
            .is_dir());
        assert!(config
            .paths
            .local_staging_root
            .join(&date)
            .join("S1")
            .is_dir());
        assert_eq!(state.watch_target().unwrap().0, "S1");
    }

    #[tokio::test]
    async fn test_start_session_rejects_second_start() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config_with_roots(tmp.path());
        let state = SessionState::default();

        start_session(&state, &config, Some("S1".to_string()))
            .await
            .unwrap();
        let second = start_session(&state, &config, Some("S2".to_string())).await;
        assert!(matches!(second, Err(ApiError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_start_session_rejects_bad_name_without_reserving() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config_with_roots(tmp.path());
        let state = SessionState::default();

        let result = start_session(&state, &config, Some("foo/bar".to_string())).await;
        assert!(matches!(result, Err(ApiError::Validation(_))));
        assert!(!state.snapshot().active);
    }
}
