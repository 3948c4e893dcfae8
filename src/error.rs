use thiserror::Error;

/// Errors raised while talking to the remote source or shaping its payloads.
#[derive(Debug, Error)]
pub enum EtlError {
    #[error("Request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// Expected element, field or resource is absent (HTTP 404 included).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Payload is present but does not have the expected structure.
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid filter key: {0:?}")]
    InvalidFilter(String),
}

impl EtlError {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Worth another attempt: connection/timeout failures, 429 and 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            EtlError::Http { source, .. } => {
                source.is_timeout() || source.is_connect() || source.is_request()
            }
            EtlError::Status { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }

    /// Failures that a per-game statistics lookup recovers from locally.
    pub fn is_missing_data(&self) -> bool {
        matches!(self, EtlError::NotFound(_) | EtlError::Parse(_))
    }
}
