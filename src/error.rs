use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    /// A read against the chain failed (network error or contract revert).
    #[error("chain query failed: {reason}")]
    QueryFailed { reason: String },

    /// The bundler/paymaster answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    TransportError { status: u16, body: String },

    /// JSON-RPC error, as returned by the provider. `code` is `None` when
    /// the payload carries none.
    #[error("RPC error{}: {message}", .code.map(|c| format!(" {c}")).unwrap_or_default())]
    RpcError {
        code: Option<i64>,
        message: String,
        data: Option<Value>,
    },

    #[error("validation error: {0}")]
    ValidationError(String),

    /// The single POST never produced a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("deadline of {limit:?} exceeded")]
    DeadlineExceeded { limit: Duration },
}

impl Error {
    pub fn query(reason: impl std::fmt::Display) -> Self {
        Self::QueryFailed {
            reason: reason.to_string(),
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::ValidationError(reason.into())
    }
}
