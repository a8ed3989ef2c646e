//! Error types for the proxy.

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The inbound body is malformed or lacks required fields.
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Upstream rejected the configured credential (401/403).
    /// The credential is never refreshed; the operator must restart with a new one.
    #[error("Upstream rejected credential (status {status}): {message}")]
    UpstreamAuth { status: u16, message: String },

    #[error("Upstream returned status {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Upstream connection failed: {message}")]
    Transport { message: String },

    #[error("Upstream timed out: {message}")]
    Timeout { message: String },

    #[error("Translation error: {message}")]
    Translation { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ProxyError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: msg.into(),
        }
    }

    pub fn translation(msg: impl Into<String>) -> Self {
        Self::Translation {
            message: msg.into(),
        }
    }

    /// Classify a non-success upstream status. 401 and 403 mean the credential
    /// is no longer accepted; everything else is a generic upstream failure.
    pub fn from_upstream_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::UpstreamAuth { status, message },
            _ => Self::Upstream { status, message },
        }
    }

    /// Classify a reqwest failure that happened before a status was available.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                message: err.to_string(),
            }
        } else {
            Self::Transport {
                message: err.to_string(),
            }
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidRequest { .. })
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::UpstreamAuth { .. })
    }

    /// HTTP status to report to the client for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest { .. } => 400,
            Self::UpstreamAuth { .. } => 401,
            Self::Upstream { status, .. } if (400..=599).contains(status) => *status,
            Self::Upstream { .. }
            | Self::Transport { .. }
            | Self::Translation { .. }
            | Self::Http(_) => 502,
            Self::Timeout { .. } => 504,
            Self::Config { .. } | Self::Io(_) | Self::Json(_) | Self::Toml(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_statuses_are_distinct() {
        let err = ProxyError::from_upstream_status(401, "token expired");
        assert!(err.is_auth_failure());
        assert_eq!(err.status_code(), 401);

        let err = ProxyError::from_upstream_status(403, "forbidden");
        assert!(err.is_auth_failure());

        let err = ProxyError::from_upstream_status(500, "boom");
        assert!(!err.is_auth_failure());
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn test_upstream_status_outside_error_range_becomes_bad_gateway() {
        let err = ProxyError::Upstream {
            status: 302,
            message: "redirect".to_string(),
        };
        assert_eq!(err.status_code(), 502);
    }

    #[test]
    fn test_invalid_request_is_client_error() {
        let err = ProxyError::invalid_request("missing field `model`");
        assert!(err.is_client_error());
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.to_string(), "Invalid request: missing field `model`");
    }
}
