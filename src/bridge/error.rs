use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::StorageError;

/// Failure reason as it crosses the transport boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorReason {
    InvalidPayload,
    Blocked,
    Unsupported,
    PresentationUnavailable,
    Unknown,
}

/// Errors raised while handling a page request.
///
/// Every variant is converted into a `{ success: false, reason }` reply at the
/// dispatch boundary; none of them ever reach the page as a transport failure.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("token {0} is blocked")]
    Blocked(String),

    #[error("unsupported token: {0}")]
    Unsupported(String),

    #[error("presentation surface unavailable: {0}")]
    PresentationUnavailable(String),

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BrokerError {
    pub fn reason(&self) -> ErrorReason {
        match self {
            BrokerError::InvalidPayload(_) => ErrorReason::InvalidPayload,
            BrokerError::Blocked(_) => ErrorReason::Blocked,
            BrokerError::Unsupported(_) => ErrorReason::Unsupported,
            BrokerError::PresentationUnavailable(_) => ErrorReason::PresentationUnavailable,
            BrokerError::Storage(_) | BrokerError::Internal(_) => ErrorReason::Unknown,
        }
    }
}
