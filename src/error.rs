// gateway/src/error.rs

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Whether a failure may be retried by the dispatch loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryClass { Transient, Permanent }

impl RetryClass {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        }
    }
}

/// Failure of a single upstream attempt. Internal to the gateway: these carry
/// upstream detail and are never handed to callers as-is.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InvokeError {
    #[error("upstream did not answer within {0:?}")]
    Timeout(Duration),
    #[error("connection to upstream failed: {0}")]
    Connect(String),
    #[error("upstream returned status {status}")]
    Status { status: u16 },
    #[error("upstream rejected the request: {0}")]
    Rejected(String),
    #[error("upstream reply could not be decoded: {0}")]
    Malformed(String),
}

impl InvokeError {
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Timeout(_) | Self::Connect(_) => RetryClass::Transient,
            Self::Status { status } if *status >= 500 || *status == 408 || *status == 429 => RetryClass::Transient,
            Self::Status { .. } | Self::Rejected(_) | Self::Malformed(_) => RetryClass::Permanent,
        }
    }
}

/// Typed dispatch failure. Exactly one of these is produced for every
/// dispatch that does not yield a response.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("profile not found: {0}")]
    ProfileNotFound(String),
    #[error("profile '{profile_id}' timed out after {attempts} attempt(s)")]
    UpstreamTimeout { profile_id: String, attempts: u32 },
    #[error("profile '{profile_id}' upstream failed after {attempts} attempt(s)")]
    UpstreamFailure { profile_id: String, attempts: u32, status: Option<u16> },
    #[error("dispatch cancelled")]
    Cancelled,
    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Collapse the last upstream failure into its caller-facing kind.
    pub fn from_upstream(profile_id: &str, attempts: u32, err: &InvokeError) -> Self {
        let profile_id = profile_id.to_string();
        match err {
            InvokeError::Timeout(_) => Self::UpstreamTimeout { profile_id, attempts },
            InvokeError::Status { status } => Self::UpstreamFailure { profile_id, attempts, status: Some(*status) },
            InvokeError::Connect(_) | InvokeError::Rejected(_) | InvokeError::Malformed(_) => {
                Self::UpstreamFailure { profile_id, attempts, status: None }
            }
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ProfileNotFound(_) => ErrorKind::NotFound,
            Self::UpstreamTimeout { .. } | Self::UpstreamFailure { .. } => ErrorKind::ServiceUnavailable,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn outcome(&self) -> Outcome {
        let message = match self {
            Self::Internal(_) => "failed to process message".to_string(),
            other => other.to_string(),
        };
        Outcome::new(self.kind(), message)
    }
}

/// Caller-facing failure category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Cancelled,
    ServiceUnavailable,
    Internal,
}

impl ErrorKind {
    /// Transport-level status the façade maps this kind to.
    pub const fn status(self) -> u16 {
        match self {
            Self::InvalidRequest => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::Cancelled => 499,
            Self::ServiceUnavailable => 503,
            Self::Internal => 500,
        }
    }

    pub const fn retryable(self) -> bool { matches!(self, Self::ServiceUnavailable) }
}

/// Structured failure handed across the façade boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub kind: ErrorKind,
    pub status: u16,
    pub retryable: bool,
    pub message: String,
}

impl Outcome {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, status: kind.status(), retryable: kind.retryable(), message: message.into() }
    }
}
