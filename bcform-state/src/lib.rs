//! bcform State Management
//!
//! Persists the vendor identifiers and last known attributes of managed
//! resources, with a lock file guarding concurrent runs.
//!
//! - **StateFile**: all managed resources of one configuration
//! - **StateBackend**: storage trait (only the local JSON file is implemented)
//! - **LockInfo**: who holds the state lock and until when
//!
//! # Example
//!
//! ```ignore
//! use bcform_state::{create_backend, BackendConfig, LockOperation};
//!
//! let backend = create_backend(&BackendConfig::local("prod.state.json")).await?;
//! let lock = backend.acquire_lock(LockOperation::Apply).await?;
//! let mut state = backend.read_state().await?.unwrap_or_default();
//! // ... apply effects, upsert resources ...
//! state.increment_serial();
//! backend.write_state(&state).await?;
//! backend.release_lock(&lock).await?;
//! ```

pub mod backend;
pub mod backends;
pub mod lock;
pub mod state;

pub use backend::{BackendConfig, BackendError, BackendResult, StateBackend};
pub use backends::{LocalBackend, create_backend};
pub use lock::{LockInfo, LockOperation};
pub use state::{ResourceState, StateFile};
