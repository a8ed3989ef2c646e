//! Built-in presets for deployment-addressed upstreams.
//!
//! A preset fills in the base URL, API version, and the environment variable
//! holding the bearer token, so a config file can be as short as
//! `[upstream] preset = "hku"`.

#[derive(Debug, Clone)]
pub struct UpstreamPreset {
    pub name: &'static str,
    pub base_url: Option<&'static str>,
    pub api_version: &'static str,
    pub default_credential_env: &'static str,
}

const PRESETS: &[UpstreamPreset] = &[
    UpstreamPreset {
        name: "hku",
        base_url: Some("https://api.hku.hk"),
        api_version: "2025-01-01-preview",
        default_credential_env: "HKU_AUTH_TOKEN",
    },
    UpstreamPreset {
        name: "azure",
        base_url: None,
        api_version: "2024-10-21",
        default_credential_env: "AZURE_OPENAI_TOKEN",
    },
];

impl UpstreamPreset {
    #[must_use]
    pub fn from_name(name: &str) -> Option<&'static UpstreamPreset> {
        PRESETS.iter().find(|p| p.name == name.to_lowercase())
    }

    #[must_use]
    pub fn all() -> &'static [UpstreamPreset] {
        PRESETS
    }
}

/// Build the outbound completions URL for a deployment.
///
/// `{base}/openai/deployments/{deployment}/chat/completions?api-version={version}`.
/// A `base_url` that already points at a deployments path is used as the prefix as-is.
pub fn completions_url(base_url: &str, deployment: &str, api_version: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let prefix = if base.ends_with("/openai/deployments") {
        base.to_string()
    } else {
        format!("{base}/openai/deployments")
    };
    format!("{prefix}/{deployment}/chat/completions?api-version={api_version}")
}
