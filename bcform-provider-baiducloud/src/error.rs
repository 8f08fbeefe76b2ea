//! Errors raised while talking to Baidu Cloud

use bcform_core::provider::ProviderError;
use bcform_core::resource::ResourceId;

use crate::connectivity::ConfigError;
use crate::retry::{RetryFailure, WaitError};

/// Vendor error code for transient server-side failures
pub const INTERNAL_ERROR: &str = "InternalError";

/// Vendor codes meaning "the object does not exist"
pub const NOT_FOUND_CODES: &[&str] = &[
    "NoSuchObject",
    "ResourceNotFound",
    "InstanceNotFound",
    "BlbNotFound",
    "NoSuchBLB",
    "CertNotFound",
    "DeploySetNotFound",
    "Cce.warning.ClusterNotExist",
    "ClusterNotFound",
];

#[derive(Debug, thiserror::Error)]
pub enum BceError {
    /// Error document returned by a BCE endpoint
    #[error("[Code: {code}; Message: {message}; RequestId: {request_id}] (HTTP {status})")]
    Service {
        status: u16,
        code: String,
        message: String,
        request_id: String,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Unexpected state: {0}")]
    UnexpectedState(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl BceError {
    pub fn service(
        status: u16,
        code: impl Into<String>,
        message: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        BceError::Service {
            status,
            code: code.into(),
            message: message.into(),
            request_id: request_id.into(),
        }
    }

    /// Vendor error code, if this is a service error
    pub fn code(&self) -> Option<&str> {
        match self {
            BceError::Service { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn has_code(&self, codes: &[&str]) -> bool {
        self.code().is_some_and(|c| codes.contains(&c))
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            BceError::Service { status, .. } => *status == 404 || self.has_code(NOT_FOUND_CODES),
            _ => false,
        }
    }

    /// Errors worth another attempt under `retry_bce`
    pub fn is_retryable(&self) -> bool {
        match self {
            BceError::Service { status, .. } => {
                self.has_code(&[INTERNAL_ERROR]) || *status >= 500 || *status == 429
            }
            _ => false,
        }
    }

    /// Wrap into the error type of the provider seam
    pub fn into_provider_error(self, action: &str, id: &ResourceId) -> ProviderError {
        ProviderError::new(format!("{}: {}", action, self))
            .for_resource(id.clone())
            .with_cause(self)
    }
}

impl From<reqwest::Error> for BceError {
    fn from(err: reqwest::Error) -> Self {
        BceError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for BceError {
    fn from(err: serde_json::Error) -> Self {
        BceError::Decode(err.to_string())
    }
}

impl From<RetryFailure<BceError>> for BceError {
    fn from(failure: RetryFailure<BceError>) -> Self {
        match failure {
            RetryFailure::Failed(err) => err,
            RetryFailure::Timeout { timeout, last } => {
                BceError::Timeout(format!("gave up after {:?}: {}", timeout, last))
            }
        }
    }
}

impl From<WaitError<BceError>> for BceError {
    fn from(err: WaitError<BceError>) -> Self {
        match err {
            WaitError::Refresh(err) => err,
            timeout @ WaitError::Timeout { .. } => BceError::Timeout(timeout.to_string()),
            other => BceError::UnexpectedState(other.to_string()),
        }
    }
}

pub type BceResult<T> = Result<T, BceError>;
