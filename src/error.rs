use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of a failed external call, persisted in `StepOutcome::Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Network,
    RateLimited,
    ServerError,
    ClientError,
    MalformedResponse,
    NoData,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// Transient kinds are retried by the backoff controller.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout | ErrorKind::Network | ErrorKind::RateLimited | ErrorKind::ServerError
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Network => "network",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ServerError => "server_error",
            ErrorKind::ClientError => "client_error",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::NoData => "no_data",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single call to an external dependency.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExternalError {
    #[error("transient {kind} error: {message}")]
    Transient { kind: ErrorKind, message: String },

    #[error("permanent {kind} error: {message}")]
    Permanent { kind: ErrorKind, message: String },
}

impl ExternalError {
    pub fn transient(kind: ErrorKind, message: impl Into<String>) -> Self {
        ExternalError::Transient { kind, message: message.into() }
    }

    pub fn permanent(kind: ErrorKind, message: impl Into<String>) -> Self {
        ExternalError::Permanent { kind, message: message.into() }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::permanent(ErrorKind::MalformedResponse, message)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ExternalError::Transient { kind, .. } | ExternalError::Permanent { kind, .. } => *kind,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ExternalError::Transient { .. })
    }

    /// Map an HTTP status to an error, `None` for 2xx.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=299 => None,
            429 => Some(Self::transient(ErrorKind::RateLimited, "HTTP 429")),
            408 => Some(Self::transient(ErrorKind::Timeout, "HTTP 408")),
            500..=599 => Some(Self::transient(ErrorKind::ServerError, format!("HTTP {}", status))),
            _ => Some(Self::permanent(ErrorKind::ClientError, format!("HTTP {}", status))),
        }
    }
}

#[derive(Error, Debug)]
pub enum EnrichError {
    #[error("external dependency failed: {0}")]
    External(#[from] ExternalError),

    #[error("missing required input: {0}")]
    MissingInput(String),

    #[error("persistence failed for record {record_id}: {message}")]
    Persistence { record_id: String, message: String },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("record store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EnrichError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(ExternalError::from_status(200).is_none());
        assert!(ExternalError::from_status(204).is_none());
        assert_eq!(ExternalError::from_status(429).unwrap().kind(), ErrorKind::RateLimited);
        assert!(ExternalError::from_status(503).unwrap().is_transient());
        assert!(ExternalError::from_status(408).unwrap().is_transient());
        let not_found = ExternalError::from_status(404).unwrap();
        assert!(!not_found.is_transient());
        assert_eq!(not_found.kind(), ErrorKind::ClientError);
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::MalformedResponse).unwrap();
        assert_eq!(json, "\"malformed_response\"");
        assert!(!ErrorKind::NoData.is_transient());
        assert!(ErrorKind::Timeout.is_transient());
    }
}
