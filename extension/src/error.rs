use serde::Serialize;
use thiserror::Error;

use crate::protocol::codes;

/// Failure of a provider `request` call, as seen by the page.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("a wallet request is already pending for this page")]
    AlreadyPending,
    #[error("{message}")]
    Rejected { code: i64, message: String },
    #[error("wallet request timed out")]
    Timeout,
}

impl ProviderError {
    pub fn code(&self) -> i64 {
        match self {
            ProviderError::AlreadyPending => codes::ALREADY_PENDING,
            ProviderError::Rejected { code, .. } => *code,
            ProviderError::Timeout => codes::REQUEST_TIMEOUT,
        }
    }

    pub fn to_rpc_error(&self) -> RpcError {
        RpcError {
            message: self.to_string(),
            code: self.code(),
        }
    }
}

/// `{ message, code }` object a rejected page promise carries.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RpcError {
    pub message: String,
    pub code: i64,
}

/// The next hop could not be reached.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("extension context invalidated: {0}")]
    ContextInvalidated(String),
    #[error("no receiver answered the message")]
    NoReceiver,
    #[error("malformed message: {0}")]
    Malformed(String),
}

/// A window-management call failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlatformError {
    #[error("window query failed: {0}")]
    Query(String),
    #[error("window creation failed: {0}")]
    Create(String),
    #[error("window focus failed: {0}")]
    Focus(String),
    #[error("popup delivery failed: {0}")]
    Deliver(String),
}
