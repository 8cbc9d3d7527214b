//! Layered configuration system
//!
//! Config is loaded with three layers of precedence (highest wins):
//! 1. Environment variables: `DRAPE_{PROVIDER}_API_KEY`, `_ENDPOINT`, `_MODEL`
//! 2. Project-local: `.drape/config.toml`
//! 3. Global: `~/.drape/config.toml`
//!
//! Providers keep the order in which they were first seen across the layers,
//! which breaks ties between equal priorities.
//!
//! ```toml
//! [gateway]
//! request_timeout_secs = 60
//!
//! [providers.replicate]
//! api_key = "r8_..."
//! priority = 1
//! fallback = "stability"
//!
//! [providers.replicate.rate_limit]
//! max_requests = 10
//! window_ms = 60000
//! ```

use crate::rate_limit::RateLimit;
use drape_core::{DrapeError, ProviderKind, Result};
use serde::{Deserialize, Serialize};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One provider table as written in a config file. Every field is optional
/// so layers can override each other field by field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderEntry {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub rate_limit: Option<RateLimit>,
    #[serde(default)]
    pub fallback: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// `[gateway]` table. Unset fields fall through to lower layers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewaySettings {
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Top-level config file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfigFile {
    #[serde(default)]
    pub providers: IndexMap<String, ProviderEntry>,
    #[serde(default)]
    pub gateway: GatewaySettings,
}

/// Fully resolved configuration for one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider: ProviderKind,
    pub api_key: String,
    pub endpoint: String,
    pub model: String,
    /// Lower is tried first
    pub priority: i32,
    pub rate_limit: Option<RateLimit>,
    pub fallback: Option<ProviderKind>,
    pub enabled: bool,
}

impl ProviderConfig {
    /// Built-in defaults for `provider` with the given key
    pub fn new(provider: ProviderKind, api_key: impl Into<String>) -> Self {
        let (endpoint, model, priority, rate_limit) = defaults_for(provider);
        Self {
            provider,
            api_key: api_key.into(),
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            priority,
            rate_limit,
            fallback: None,
            enabled: true,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_fallback(mut self, fallback: ProviderKind) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: Option<RateLimit>) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Credentialed and not switched off
    pub fn is_active(&self) -> bool {
        self.enabled && !self.api_key.trim().is_empty()
    }
}

fn defaults_for(provider: ProviderKind) -> (&'static str, &'static str, i32, Option<RateLimit>) {
    let per_minute = |n| Some(RateLimit::new(n, Duration::from_secs(60)));
    match provider {
        ProviderKind::Replicate => {
            ("https://api.replicate.com/v1", "firtoz/trellis", 10, per_minute(50))
        }
        ProviderKind::Stability => {
            ("https://api.stability.ai", "stable-fast-3d", 20, per_minute(150))
        }
        ProviderKind::Luma => (
            "https://webapp.engineering.lumalabs.ai/api/v2",
            "capture",
            30,
            per_minute(10),
        ),
        ProviderKind::GaussianSplatting => {
            ("http://localhost:8080", "splatfacto", 40, per_minute(5))
        }
        ProviderKind::OpenAi => ("https://api.openai.com/v1", "gpt-4o", 50, per_minute(60)),
    }
}

/// Resolved configuration with environment variable overrides applied
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    /// First-seen order across layers
    pub providers: IndexMap<ProviderKind, ProviderEntry>,
    pub gateway: GatewaySettings,
}

impl GatewayConfig {
    /// Load config with layered precedence: global < project < env vars
    pub fn load() -> Result<Self> {
        let mut config = GatewayConfigFile::default();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                let global = Self::load_file(&global_path)?;
                Self::merge_into(&mut config, global);
            }
        }

        let local_path = PathBuf::from(".drape/config.toml");
        if local_path.exists() {
            let local = Self::load_file(&local_path)?;
            Self::merge_into(&mut config, local);
        }

        Self::apply_env_overrides(&mut config);
        Self::resolve(config)
    }

    /// Load config from a specific file path only
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let mut config = Self::load_file(path)?;
        Self::apply_env_overrides(&mut config);
        Self::resolve(config)
    }

    /// Parse config from a TOML string, without environment overrides
    pub fn from_toml(content: &str) -> Result<Self> {
        let file: GatewayConfigFile = toml::from_str(content)?;
        Self::resolve(file)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.gateway
                .request_timeout_secs
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    /// Configured providers that have an API key and are enabled, in the
    /// order they were first configured (the tie-breaker for equal priorities).
    pub fn active_providers(&self) -> Result<Vec<ProviderConfig>> {
        let mut active = Vec::new();
        for (kind, entry) in &self.providers {
            let resolved = Self::resolve_entry(*kind, entry)?;
            if resolved.is_active() {
                active.push(resolved);
            } else {
                tracing::debug!(provider = %kind, "provider inactive (no api key or disabled)");
            }
        }
        Ok(active)
    }

    fn resolve_entry(kind: ProviderKind, entry: &ProviderEntry) -> Result<ProviderConfig> {
        let mut config = ProviderConfig::new(kind, entry.api_key.clone().unwrap_or_default());
        if let Some(endpoint) = &entry.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(model) = &entry.model {
            config.model = model.clone();
        }
        if let Some(priority) = entry.priority {
            config.priority = priority;
        }
        if entry.rate_limit.is_some() {
            config.rate_limit = entry.rate_limit;
        }
        if let Some(enabled) = entry.enabled {
            config.enabled = enabled;
        }
        config.fallback = entry
            .fallback
            .as_deref()
            .map(str::parse::<ProviderKind>)
            .transpose()?;
        Ok(config)
    }

    fn resolve(file: GatewayConfigFile) -> Result<Self> {
        let mut providers = IndexMap::new();
        for (name, entry) in file.providers {
            let kind = name.parse::<ProviderKind>()?;
            if let Some(limit) = entry.rate_limit {
                if limit.max_requests == 0 || limit.window_ms == 0 {
                    return Err(DrapeError::Config(format!(
                        "rate limit for '{}' must have non-zero max_requests and window_ms",
                        name
                    )));
                }
            }
            providers.insert(kind, entry);
        }
        if file.gateway.request_timeout_secs == Some(0) {
            return Err(DrapeError::Config(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(GatewayConfig {
            providers,
            gateway: file.gateway,
        })
    }

    fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".drape").join("config.toml"))
    }

    fn load_file(path: &Path) -> Result<GatewayConfigFile> {
        let content = std::fs::read_to_string(path)?;
        let config: GatewayConfigFile = toml::from_str(&content).map_err(|e| {
            DrapeError::TomlParse(format!("Failed to parse config {}: {}", path.display(), e))
        })?;
        Ok(config)
    }

    fn merge_into(base: &mut GatewayConfigFile, overlay: GatewayConfigFile) {
        for (name, provider) in overlay.providers {
            let entry = base.providers.entry(name).or_default();
            if provider.api_key.is_some() {
                entry.api_key = provider.api_key;
            }
            if provider.endpoint.is_some() {
                entry.endpoint = provider.endpoint;
            }
            if provider.model.is_some() {
                entry.model = provider.model;
            }
            if provider.priority.is_some() {
                entry.priority = provider.priority;
            }
            if provider.rate_limit.is_some() {
                entry.rate_limit = provider.rate_limit;
            }
            if provider.fallback.is_some() {
                entry.fallback = provider.fallback;
            }
            if provider.enabled.is_some() {
                entry.enabled = provider.enabled;
            }
        }

        if overlay.gateway.request_timeout_secs.is_some() {
            base.gateway.request_timeout_secs = overlay.gateway.request_timeout_secs;
        }
    }

    fn apply_env_overrides(config: &mut GatewayConfigFile) {
        for kind in ProviderKind::ALL {
            let stem = kind.env_stem();
            let read = |suffix: &str| std::env::var(format!("DRAPE_{}_{}", stem, suffix)).ok();

            let api_key = read("API_KEY");
            let endpoint = read("ENDPOINT");
            let model = read("MODEL");
            if api_key.is_none() && endpoint.is_none() && model.is_none() {
                continue;
            }

            let entry = config.providers.entry(kind.as_str().to_string()).or_default();
            if api_key.is_some() {
                entry.api_key = api_key;
            }
            if endpoint.is_some() {
                entry.endpoint = endpoint;
            }
            if model.is_some() {
                entry.model = model;
            }
        }
    }
}
