use crate::error::{GatewayError, Result};
use crate::normalize::{AspectRatio, ResolutionTier};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    /// Client-visible model name -> backend model id.
    #[serde(default)]
    pub models: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub api_keys: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default = "default_anthropic_versions")]
    pub anthropic_versions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_url")]
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_backend_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_backend_models")]
    pub models: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_max_images")]
    pub max_images: u32,
    #[serde(default)]
    pub default_aspect_ratio: AspectRatio,
    #[serde(default)]
    pub default_resolution: ResolutionTier,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            api_key_env: None,
            anthropic_versions: default_anthropic_versions(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            api_key: None,
            api_key_env: default_backend_key_env(),
            models: default_backend_models(),
            timeout_secs: default_timeout_secs(),
            max_concurrency: default_max_concurrency(),
            max_images: default_max_images(),
            default_aspect_ratio: AspectRatio::default(),
            default_resolution: ResolutionTier::default(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            auth: AuthConfig::default(),
            backend: BackendConfig::default(),
            models: HashMap::new(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8045
}

fn default_anthropic_versions() -> Vec<String> {
    vec!["2023-06-01".to_string(), "2023-01-01".to_string()]
}

fn default_backend_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_backend_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

fn default_backend_models() -> Vec<String> {
    vec!["gemini-3-pro-image".to_string()]
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_concurrency() -> usize {
    8
}

fn default_max_images() -> u32 {
    4
}

impl GatewayConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        let candidates = config_search_paths();
        for candidate in &candidates {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        Err(GatewayError::config(format!(
            "No config file found. Searched: {}",
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }

    /// Every key a client may present, including the one named by `auth.api_key_env`.
    #[must_use]
    pub fn client_keys(&self) -> Vec<String> {
        let mut keys = self.auth.api_keys.clone();
        if let Some(ref var) = self.auth.api_key_env {
            if let Ok(key) = std::env::var(var) {
                if !key.is_empty() {
                    keys.push(key);
                }
            }
        }
        keys
    }

    /// Reject configurations the gateway cannot serve with.
    pub fn validate(&self) -> Result<()> {
        if self.client_keys().is_empty() {
            return Err(GatewayError::config(
                "No client API keys configured. Set auth.api_keys or auth.api_key_env",
            ));
        }
        if self.backend.models.is_empty() {
            return Err(GatewayError::config("backend.models must not be empty"));
        }
        if self.backend.max_concurrency == 0 {
            return Err(GatewayError::config("backend.max_concurrency must be at least 1"));
        }
        if self.backend.max_images == 0 {
            return Err(GatewayError::config("backend.max_images must be at least 1"));
        }
        if let Some((alias, target)) = self
            .models
            .iter()
            .find(|(_, target)| !self.backend.models.contains(target))
        {
            return Err(GatewayError::config(format!(
                "Model alias '{alias}' points at '{target}', which is not in backend.models"
            )));
        }
        Ok(())
    }
}

impl BackendConfig {
    /// Inline key wins over the environment variable.
    pub fn resolve_api_key(&self) -> Result<String> {
        if let Some(ref key) = self.api_key {
            return Ok(key.clone());
        }
        std::env::var(&self.api_key_env).map_err(|_| {
            GatewayError::config(format!(
                "Environment variable '{}' not set. Set it with your backend API key.",
                self.api_key_env
            ))
        })
    }
}

fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    paths.push(PathBuf::from("image-gateway.toml"));

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(xdg).join("image-gateway").join("config.toml"));
    }
    if let Some(home) = home_dir() {
        paths.push(home.join(".config").join("image-gateway").join("config.toml"));
        paths.push(home.join(".image-gateway.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
