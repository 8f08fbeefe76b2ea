//! State backend trait and error types

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use bcform_core::parser;
use bcform_core::resource::Value;

use crate::lock::{LockInfo, LockOperation};
use crate::state::StateFile;

/// Errors that can occur when interacting with a state backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// The state is locked by another process
    #[error(
        "State is locked by {who} (lock ID: {lock_id}, operation: {operation}); \
         if that run is gone, release it with `bcform state force-unlock {lock_id}`"
    )]
    Locked {
        lock_id: String,
        who: String,
        operation: String,
    },

    /// The lock was not found (for release/force-unlock operations)
    #[error("Lock not found: {0}")]
    LockNotFound(String),

    /// Lock ID mismatch when trying to release
    #[error("Lock ID mismatch: expected {expected}, got {actual}")]
    LockMismatch { expected: String, actual: String },

    /// The backend type is not supported
    #[error("Unsupported backend type: {0}")]
    UnsupportedBackend(String),

    #[error("Backend configuration error: {0}")]
    Configuration(String),

    /// State file is corrupted or invalid
    #[error("Invalid state file: {0}")]
    InvalidState(String),

    /// State lineage mismatch (prevents accidental state overwrites)
    #[error("State lineage mismatch: expected {expected}, got {actual}")]
    LineageMismatch { expected: String, actual: String },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl BackendError {
    /// Create a Locked error from a LockInfo
    pub fn locked(lock: &LockInfo) -> Self {
        Self::Locked {
            lock_id: lock.id.clone(),
            who: lock.who.clone(),
            operation: lock.operation.clone(),
        }
    }

    pub fn unsupported_backend(backend_type: impl Into<String>) -> Self {
        Self::UnsupportedBackend(backend_type.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Trait for state storage backends
///
/// Stores and retrieves state files and manages the lock that keeps two
/// runs from modifying the same state.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Read the current state; `None` if no state exists yet
    async fn read_state(&self) -> BackendResult<Option<StateFile>>;

    /// Write the state
    ///
    /// The state's serial number should be incremented before calling this.
    /// Writing a state whose lineage differs from the stored one fails.
    async fn write_state(&self, state: &StateFile) -> BackendResult<()>;

    /// Acquire a lock for the given operation
    ///
    /// Fails if a lock is already held by another process, unless the
    /// existing lock has expired.
    async fn acquire_lock(&self, operation: LockOperation) -> BackendResult<LockInfo>;

    /// Release a previously acquired lock; the lock ID must match
    async fn release_lock(&self, lock: &LockInfo) -> BackendResult<()>;

    /// Force release a lock by its ID
    async fn force_unlock(&self, lock_id: &str) -> BackendResult<()>;

    /// Prepare the storage location
    async fn init(&self) -> BackendResult<()>;
}

/// Configuration for a state backend
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Backend type (e.g., "local")
    pub backend_type: String,
    /// Backend-specific attributes
    pub attributes: HashMap<String, Value>,
}

impl BackendConfig {
    /// Local backend storing state at `path`
    pub fn local(path: impl Into<String>) -> Self {
        let mut attributes = HashMap::new();
        attributes.insert("path".to_string(), Value::String(path.into()));
        Self {
            backend_type: "local".to_string(),
            attributes,
        }
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.attributes.get(key).and_then(Value::as_bool)
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).unwrap_or(default)
    }
}

impl From<&parser::BackendConfig> for BackendConfig {
    fn from(config: &parser::BackendConfig) -> Self {
        Self {
            backend_type: config.backend_type.clone(),
            attributes: config.attributes.clone(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            backend_type: "local".to_string(),
            attributes: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_locked() {
        let lock = LockInfo::new(LockOperation::Apply);
        let error = BackendError::locked(&lock);
        assert!(error.to_string().contains(&lock.unlock_command()));
        match error {
            BackendError::Locked {
                lock_id,
                who,
                operation,
            } => {
                assert_eq!(lock_id, lock.id);
                assert_eq!(who, lock.who);
                assert_eq!(operation, "apply");
            }
            other => panic!("Expected Locked error, got {:?}", other),
        }
    }

    #[test]
    fn test_backend_error_display() {
        let error = BackendError::unsupported_backend("bos");
        assert_eq!(error.to_string(), "Unsupported backend type: bos");
    }

    #[test]
    fn test_backend_config_accessors() {
        let mut config = BackendConfig::local("prod.state.json");
        config
            .attributes
            .insert("create_dirs".to_string(), Value::Bool(true));

        assert_eq!(config.get_string("path"), Some("prod.state.json"));
        assert_eq!(config.get_bool("create_dirs"), Some(true));
        assert!(!config.get_bool_or("missing", false));
    }

    #[test]
    fn test_backend_config_from_parsed_block() {
        let parsed = bcform_core::parser::parse(
            r#"
            backend local {
                path = "x.json"
            }
        "#,
        )
        .unwrap();
        let config = BackendConfig::from(parsed.backend.as_ref().unwrap());
        assert_eq!(config.backend_type, "local");
        assert_eq!(config.get_string("path"), Some("x.json"));
    }
}
