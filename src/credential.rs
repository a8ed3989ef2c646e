//! The upstream bearer credential.
//!
//! Read once at startup and handed to the dispatcher. There is no refresh path:
//! when upstream starts rejecting it, the process must be restarted with a new one.

use crate::error::{ProxyError, Result};
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct Credential(Arc<str>);

impl Credential {
    /// Build a credential from a raw token. Surrounding whitespace and an
    /// accidental `Bearer ` prefix are stripped.
    pub fn new(token: impl AsRef<str>) -> Result<Self> {
        let token = token.as_ref().trim();
        let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();
        if token.is_empty() {
            return Err(ProxyError::config("Upstream credential is empty"));
        }
        Ok(Self(Arc::from(token)))
    }

    /// Read the credential from the named environment variable.
    pub fn from_env(var: &str) -> Result<Self> {
        let raw = std::env::var(var).map_err(|_| {
            ProxyError::config(format!(
                "Environment variable '{var}' not set. Set it to the upstream bearer token."
            ))
        })?;
        Self::new(raw).map_err(|_| {
            ProxyError::config(format!("Environment variable '{var}' is empty"))
        })
    }

    pub(crate) fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}
