use crate::credential::Credential;
use crate::error::{ProxyError, Result};
use crate::upstream::UpstreamPreset;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Client model name -> upstream deployment identifier.
    #[serde(default)]
    pub deployments: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            preset: default_preset(),
            base_url: None,
            api_version: None,
            credential_env: None,
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            upstream: UpstreamConfig::default(),
            deployments: HashMap::new(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_preset() -> String {
    "hku".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl ProxyConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make every request fail.
    pub fn validate(&self) -> Result<()> {
        if self.upstream.timeout_secs == 0 {
            return Err(ProxyError::config("upstream.timeout_secs must be greater than 0"));
        }
        if self.upstream.connect_timeout_secs == 0 {
            return Err(ProxyError::config(
                "upstream.connect_timeout_secs must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir > built-in defaults
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in &config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        tracing::info!("No config file found, using built-in defaults");
        Ok(Self::default())
    }

    fn preset(&self) -> Result<&'static UpstreamPreset> {
        UpstreamPreset::from_name(&self.upstream.preset).ok_or_else(|| {
            ProxyError::config(format!(
                "Unknown upstream preset '{}'. Known presets: {}",
                self.upstream.preset,
                UpstreamPreset::all()
                    .iter()
                    .map(|p| p.name)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })
    }

    /// Resolve the effective base URL (config override or preset default)
    pub fn effective_base_url(&self) -> Result<String> {
        if let Some(ref url) = self.upstream.base_url {
            return Ok(url.clone());
        }

        self.preset()?
            .base_url
            .map(str::to_string)
            .ok_or_else(|| {
                ProxyError::config(format!(
                    "Upstream preset '{}' has no default base_url; set upstream.base_url",
                    self.upstream.preset
                ))
            })
    }

    pub fn effective_api_version(&self) -> Result<String> {
        if let Some(ref version) = self.upstream.api_version {
            return Ok(version.clone());
        }
        Ok(self.preset()?.api_version.to_string())
    }

    /// Name of the environment variable that holds the upstream bearer token.
    pub fn credential_env(&self) -> Result<String> {
        if let Some(ref var) = self.upstream.credential_env {
            return Ok(var.clone());
        }
        Ok(self.preset()?.default_credential_env.to_string())
    }

    /// Read the upstream credential from the configured environment variable.
    pub fn resolve_credential(&self) -> Result<Credential> {
        Credential::from_env(&self.credential_env()?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream.connect_timeout_secs)
    }
}

pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("deployment-proxy.toml")];

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(xdg).join("deployment-proxy").join("config.toml"));
    }
    if let Some(home) = home_dir() {
        paths.push(home.join(".config").join("deployment-proxy").join("config.toml"));
        paths.push(home.join(".deployment-proxy.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
