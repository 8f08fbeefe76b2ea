//! Local file backend for state storage
//!
//! Stores state in a local JSON file (default: bcform.state.json) next to a
//! `.lock` file. Writes go through a temporary file in the same directory
//! that is renamed into place.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::backend::{BackendConfig, BackendError, BackendResult, StateBackend};
use crate::lock::{LockInfo, LockOperation};
use crate::state::StateFile;

/// Local file backend
pub struct LocalBackend {
    state_path: PathBuf,
    lock_path: PathBuf,
}

impl LocalBackend {
    /// Default state file name
    pub const DEFAULT_STATE_FILE: &'static str = "bcform.state.json";

    pub fn new() -> Self {
        Self::with_path(PathBuf::from(Self::DEFAULT_STATE_FILE))
    }

    pub fn with_path(state_path: PathBuf) -> Self {
        let lock_path = state_path.with_extension("lock");
        Self {
            state_path,
            lock_path,
        }
    }

    /// Create a LocalBackend from configuration (`path` attribute)
    pub fn from_config(config: &BackendConfig) -> BackendResult<Self> {
        match config.attributes.get("path") {
            None => Ok(Self::new()),
            Some(value) => match value.as_str() {
                Some(path) if !path.is_empty() => Ok(Self::with_path(PathBuf::from(path))),
                _ => Err(BackendError::configuration(
                    "'path' of the local backend must be a non-empty string",
                )),
            },
        }
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    async fn read_lock(&self) -> BackendResult<Option<LockInfo>> {
        match tokio::fs::read_to_string(&self.lock_path).await {
            Ok(content) => serde_json::from_str(&content).map(Some).map_err(|e| {
                BackendError::InvalidState(format!("Failed to parse lock file: {}", e))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BackendError::Io(format!("Failed to read lock file: {}", e))),
        }
    }

    async fn remove_lock_file(&self) -> BackendResult<()> {
        tokio::fs::remove_file(&self.lock_path)
            .await
            .map_err(|e| BackendError::Io(format!("Failed to remove lock file: {}", e)))
    }

    /// Create the lock file; fails with `AlreadyExists` if another lock is present
    async fn create_lock_file(&self, lock: &LockInfo) -> std::io::Result<()> {
        let content = serde_json::to_vec_pretty(lock)?;
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
            .await?;
        file.write_all(&content).await?;
        file.sync_all().await
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateBackend for LocalBackend {
    async fn read_state(&self) -> BackendResult<Option<StateFile>> {
        let content = match tokio::fs::read_to_string(&self.state_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BackendError::Io(format!("Failed to read state file: {}", e))),
        };

        let state: StateFile = serde_json::from_str(&content).map_err(|e| {
            BackendError::InvalidState(format!("Failed to parse state file: {}", e))
        })?;

        if state.version > StateFile::CURRENT_VERSION {
            return Err(BackendError::InvalidState(format!(
                "State file version {} is newer than supported version {}",
                state.version,
                StateFile::CURRENT_VERSION
            )));
        }

        Ok(Some(state))
    }

    async fn write_state(&self, state: &StateFile) -> BackendResult<()> {
        if let Some(existing) = self.read_state().await?
            && existing.lineage != state.lineage
        {
            return Err(BackendError::LineageMismatch {
                expected: existing.lineage,
                actual: state.lineage.clone(),
            });
        }

        let content = serde_json::to_string_pretty(state).map_err(|e| {
            BackendError::Serialization(format!("Failed to serialize state: {}", e))
        })?;

        let file_name = self
            .state_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| Self::DEFAULT_STATE_FILE.to_string());
        let tmp_path = self
            .state_path
            .with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

        tokio::fs::write(&tmp_path, content)
            .await
            .map_err(|e| BackendError::Io(format!("Failed to write state file: {}", e)))?;

        if let Err(e) = tokio::fs::rename(&tmp_path, &self.state_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(BackendError::Io(format!(
                "Failed to move state file into place: {}",
                e
            )));
        }

        log::debug!(
            "Wrote state serial {} to {}",
            state.serial,
            self.state_path.display()
        );
        Ok(())
    }

    async fn acquire_lock(&self, operation: LockOperation) -> BackendResult<LockInfo> {
        let lock = LockInfo::new(operation);

        for _ in 0..2 {
            match self.create_lock_file(&lock).await {
                Ok(()) => return Ok(lock),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    // Take over expired or unreadable locks
                    match self.read_lock().await {
                        Ok(Some(existing)) if !existing.is_expired() => {
                            return Err(BackendError::locked(&existing));
                        }
                        Ok(Some(existing)) => {
                            log::warn!("Taking over expired state lock {}", existing.id);
                        }
                        Ok(None) => continue,
                        Err(e) => log::warn!("Replacing unreadable state lock: {}", e),
                    }
                    match tokio::fs::remove_file(&self.lock_path).await {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => {
                            return Err(BackendError::Io(format!(
                                "Failed to remove lock file: {}",
                                e
                            )));
                        }
                    }
                }
                Err(e) => {
                    return Err(BackendError::Io(format!("Failed to write lock file: {}", e)));
                }
            }
        }

        match self.read_lock().await? {
            Some(existing) => Err(BackendError::locked(&existing)),
            None => Err(BackendError::Io("Failed to acquire state lock".to_string())),
        }
    }

    async fn release_lock(&self, lock: &LockInfo) -> BackendResult<()> {
        let existing = self
            .read_lock()
            .await?
            .ok_or_else(|| BackendError::LockNotFound(lock.id.clone()))?;

        if existing.id != lock.id {
            return Err(BackendError::LockMismatch {
                expected: lock.id.clone(),
                actual: existing.id,
            });
        }

        self.remove_lock_file().await
    }

    async fn force_unlock(&self, lock_id: &str) -> BackendResult<()> {
        if !self.lock_path.exists() {
            return Err(BackendError::LockNotFound(lock_id.to_string()));
        }

        // An unreadable lock file can always be removed
        if let Ok(Some(existing)) = self.read_lock().await
            && existing.id != lock_id
        {
            return Err(BackendError::LockMismatch {
                expected: lock_id.to_string(),
                actual: existing.id,
            });
        }

        self.remove_lock_file().await
    }

    async fn init(&self) -> BackendResult<()> {
        if let Some(parent) = self.state_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                BackendError::Io(format!(
                    "Failed to create state directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_local_backend_read_write() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("test.state.json"));

        assert!(backend.read_state().await.unwrap().is_none());

        let mut state_file = StateFile::new();
        state_file.increment_serial();
        backend.write_state(&state_file).await.unwrap();

        let read_state = backend.read_state().await.unwrap().unwrap();
        assert_eq!(read_state.serial, 1);
        assert_eq!(read_state.lineage, state_file.lineage);

        // No temporary files are left behind
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_lineage_mismatch_is_rejected() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("test.state.json"));

        backend.write_state(&StateFile::new()).await.unwrap();
        let result = backend.write_state(&StateFile::new()).await;
        assert!(matches!(result, Err(BackendError::LineageMismatch { .. })));
    }

    #[tokio::test]
    async fn test_corrupted_state_is_invalid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let backend = LocalBackend::with_path(path);
        assert!(matches!(
            backend.read_state().await,
            Err(BackendError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_local_backend_locking() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("test.state.json"));

        let lock = backend.acquire_lock(LockOperation::Apply).await.unwrap();
        assert_eq!(lock.operation, "apply");
        assert!(backend.lock_path().exists());

        match backend.acquire_lock(LockOperation::Destroy).await {
            Err(BackendError::Locked { lock_id, .. }) => assert_eq!(lock_id, lock.id),
            other => panic!("Expected Locked error, got {:?}", other.map(|l| l.id)),
        }

        backend.release_lock(&lock).await.unwrap();
        assert!(!backend.lock_path().exists());

        let lock2 = backend.acquire_lock(LockOperation::Destroy).await.unwrap();
        backend.release_lock(&lock2).await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_lock_is_taken_over() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("test.state.json"));

        let stale = LockInfo::with_timeout(LockOperation::Apply, -10);
        std::fs::write(backend.lock_path(), serde_json::to_string(&stale).unwrap()).unwrap();

        let lock = backend.acquire_lock(LockOperation::Apply).await.unwrap();
        assert_ne!(lock.id, stale.id);
    }

    #[tokio::test]
    async fn test_release_with_wrong_lock_fails() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("test.state.json"));

        let _lock = backend.acquire_lock(LockOperation::Apply).await.unwrap();
        let other = LockInfo::new(LockOperation::Import);
        assert!(matches!(
            backend.release_lock(&other).await,
            Err(BackendError::LockMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_force_unlock() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("test.state.json"));

        assert!(matches!(
            backend.force_unlock("nope").await,
            Err(BackendError::LockNotFound(_))
        ));

        let lock = backend.acquire_lock(LockOperation::Apply).await.unwrap();
        assert!(backend.force_unlock("other-id").await.is_err());
        backend.force_unlock(&lock.id).await.unwrap();
        assert!(!backend.lock_path().exists());
    }

    #[test]
    fn test_local_backend_from_config() {
        let backend = LocalBackend::from_config(&BackendConfig::default()).unwrap();
        assert_eq!(backend.state_path(), Path::new("bcform.state.json"));
        assert_eq!(backend.lock_path(), Path::new("bcform.state.lock"));

        let backend = LocalBackend::from_config(&BackendConfig::local("custom.state.json")).unwrap();
        assert_eq!(backend.state_path(), Path::new("custom.state.json"));

        assert!(LocalBackend::from_config(&BackendConfig::local("")).is_err());
    }
}
