//! Lock information for state backend locking

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default lock timeout in seconds (15 minutes)
pub const DEFAULT_LOCK_TIMEOUT_SECS: i64 = 900;

/// Lock lifetime of runs that call the cloud APIs (2 hours)
///
/// Covers the longest resource timeout (an ES cluster create waits up to an
/// hour) plus the refresh before it.
pub const APPLY_LOCK_TIMEOUT_SECS: i64 = 2 * 60 * 60;

/// bcform command that holds the state lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOperation {
    Apply,
    Destroy,
    Import,
    StateRm,
}

impl LockOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockOperation::Apply => "apply",
            LockOperation::Destroy => "destroy",
            LockOperation::Import => "import",
            LockOperation::StateRm => "state rm",
        }
    }

    /// How long the lock stays valid before another run may take it over
    pub fn timeout_secs(&self) -> i64 {
        match self {
            LockOperation::Apply | LockOperation::Destroy => APPLY_LOCK_TIMEOUT_SECS,
            LockOperation::Import | LockOperation::StateRm => DEFAULT_LOCK_TIMEOUT_SECS,
        }
    }
}

impl fmt::Display for LockOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "apply" => Ok(LockOperation::Apply),
            "destroy" => Ok(LockOperation::Destroy),
            "import" => Ok(LockOperation::Import),
            "state rm" => Ok(LockOperation::StateRm),
            other => Err(format!("unknown lock operation: {}", other)),
        }
    }
}

/// Information about a state lock
///
/// `operation` is stored as text so lock files written by other versions
/// still load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Unique identifier for this lock
    pub id: String,
    /// The bcform command holding the lock ("apply", "destroy", "import", "state rm")
    pub operation: String,
    /// Who acquired the lock (username@hostname)
    pub who: String,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
}

impl LockInfo {
    /// Lock for a command, valid for that command's timeout
    pub fn new(operation: LockOperation) -> Self {
        Self::with_timeout(operation, operation.timeout_secs())
    }

    pub fn with_timeout(operation: LockOperation, timeout_secs: i64) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation: operation.to_string(),
            who: lock_owner(),
            created: now,
            expires: now + Duration::seconds(timeout_secs),
        }
    }

    /// The holding command, if this bcform version knows it
    pub fn lock_operation(&self) -> Option<LockOperation> {
        self.operation.parse().ok()
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires
    }

    /// Remaining time until expiration (negative once expired)
    pub fn time_remaining(&self) -> Duration {
        self.expires - Utc::now()
    }

    /// Command that releases this lock by hand
    pub fn unlock_command(&self) -> String {
        format!("bcform state force-unlock {}", self.id)
    }
}

impl fmt::Display for LockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (bcform {}, by {}, since {}, expires {})",
            self.id,
            self.operation,
            self.who,
            self.created.format("%Y-%m-%d %H:%M:%S UTC"),
            self.expires.format("%Y-%m-%d %H:%M:%S UTC"),
        )
    }
}

/// Lock owner string (username@hostname)
pub fn lock_owner() -> String {
    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    format!("{}@{}", username, hostname)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_lock_outlives_the_longest_create() {
        let lock = LockInfo::new(LockOperation::Apply);
        assert_eq!(lock.operation, "apply");
        assert!(lock.who.contains('@'));
        assert_eq!(
            (lock.expires - lock.created).num_seconds(),
            APPLY_LOCK_TIMEOUT_SECS
        );
        assert!(lock.time_remaining().num_minutes() > 60);
        assert!(!lock.is_expired());
    }

    #[test]
    fn state_rm_lock_is_short() {
        let lock = LockInfo::new(LockOperation::StateRm);
        assert_eq!(lock.operation, "state rm");
        assert_eq!(
            (lock.expires - lock.created).num_seconds(),
            DEFAULT_LOCK_TIMEOUT_SECS
        );
    }

    #[test]
    fn expired_destroy_lock() {
        let lock = LockInfo::with_timeout(LockOperation::Destroy, -1);
        assert!(lock.is_expired());
        assert!(lock.time_remaining().num_seconds() <= 0);
    }

    #[test]
    fn operation_names_round_trip_through_the_lock_file() {
        for op in [
            LockOperation::Apply,
            LockOperation::Destroy,
            LockOperation::Import,
            LockOperation::StateRm,
        ] {
            let lock = LockInfo::new(op);
            let json = serde_json::to_string_pretty(&lock).unwrap();
            let loaded: LockInfo = serde_json::from_str(&json).unwrap();
            assert_eq!(loaded.id, lock.id);
            assert_eq!(loaded.lock_operation(), Some(op));
        }
        assert!("plan".parse::<LockOperation>().is_err());
    }

    #[test]
    fn unknown_operation_still_loads() {
        let json = r#"{
            "id": "l-1",
            "operation": "refresh",
            "who": "ops@build-7",
            "created": "2024-01-01T00:00:00Z",
            "expires": "2024-01-01T00:15:00Z"
        }"#;
        let lock: LockInfo = serde_json::from_str(json).unwrap();
        assert_eq!(lock.lock_operation(), None);
        assert!(lock.is_expired());
    }

    #[test]
    fn display_names_the_command_and_unlock_hint() {
        let lock = LockInfo::new(LockOperation::Import);
        assert!(lock.to_string().starts_with(&lock.id));
        assert!(lock.to_string().contains("(bcform import, by "));
        assert_eq!(
            lock.unlock_command(),
            format!("bcform state force-unlock {}", lock.id)
        );
    }
}
