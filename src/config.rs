//! Configuration management
//!
//! Loads service configuration from `config.toml`: server binding,
//! initial catalog, recommendation weights and timeouts, signal source
//! and progress persistence. Everything is validated once at startup.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::recommend::Weights;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Catalog loaded at startup
    #[serde(default)]
    pub catalog: CatalogConfig,
    /// Recommendation scoring
    #[serde(default)]
    pub recommendation: RecommendationConfig,
    /// External analytics signals
    #[serde(default)]
    pub signals: SignalsConfig,
    /// Progress store settings
    #[serde(default)]
    pub progress: ProgressConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound on request handling time (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// JSON or TOML catalog file installed at startup
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationConfig {
    /// Signal weights, must sum to 1.0
    #[serde(default)]
    pub weights: Weights,
    /// In-progress work untouched for longer than this is stale (hours)
    #[serde(default = "default_staleness_hours")]
    pub staleness_threshold_hours: u64,
    /// Bound on each external signal fetch (milliseconds)
    #[serde(default = "default_signal_timeout")]
    pub signal_timeout_ms: u64,
    /// How long a learner's recommendations may be served from cache (seconds)
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    /// Number of items returned when the caller gives no `k`
    #[serde(default = "default_k")]
    pub default_k: usize,
    /// Largest `k` a caller may ask for
    #[serde(default = "default_max_k")]
    pub max_k: usize,
}

fn default_staleness_hours() -> u64 {
    7 * 24
}

fn default_signal_timeout() -> u64 {
    500
}

fn default_cache_ttl() -> u64 {
    30
}

fn default_k() -> usize {
    5
}

fn default_max_k() -> usize {
    50
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            weights: Weights::default(),
            staleness_threshold_hours: default_staleness_hours(),
            signal_timeout_ms: default_signal_timeout(),
            cache_ttl_secs: default_cache_ttl(),
            default_k: default_k(),
            max_k: default_max_k(),
        }
    }
}

impl RecommendationConfig {
    pub fn staleness_threshold(&self) -> chrono::Duration {
        chrono::Duration::hours(self.staleness_threshold_hours as i64)
    }

    pub fn signal_timeout(&self) -> Duration {
        Duration::from_millis(self.signal_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalsConfig {
    /// Base URL of the analytics service; no external signals when unset
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// JSON snapshot loaded at startup and written on shutdown
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
    /// Event ids remembered per learner for duplicate detection. A retry
    /// arriving after this many newer events is applied again.
    #[serde(default = "default_event_history")]
    pub event_history: usize,
}

fn default_event_history() -> usize {
    crate::progress::store::DEFAULT_EVENT_HISTORY
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            snapshot_path: None,
            event_history: default_event_history(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, writing defaults
    /// when no file exists yet
    pub fn load() -> Result<Self> {
        let config_path = config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    /// Load and validate configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let parent = path.parent().context("Config path has no parent")?;

        std::fs::create_dir_all(parent).context("Failed to create config directory")?;

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Reject configurations the service cannot run with
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let rec = &self.recommendation;
        rec.weights.validate()?;

        if rec.staleness_threshold_hours == 0 {
            return Err(ConfigError::InvalidValue(
                "staleness_threshold_hours must be positive".to_string(),
            ));
        }
        if rec.signal_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "signal_timeout_ms must be positive".to_string(),
            ));
        }
        if rec.max_k == 0 || rec.default_k > rec.max_k {
            return Err(ConfigError::InvalidValue(format!(
                "default_k ({}) must be within 1..=max_k ({})",
                rec.default_k, rec.max_k
            )));
        }
        if self.progress.event_history == 0 {
            return Err(ConfigError::InvalidValue(
                "event_history must be positive".to_string(),
            ));
        }
        if self.server.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        if let Some(endpoint) = &self.signals.endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(ConfigError::InvalidValue(format!(
                    "signals endpoint must be an http(s) URL, got {}",
                    endpoint
                )));
            }
        }
        Ok(())
    }
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "learnpath", "learnpath")
        .context("Failed to get project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

/// Show effective configuration
pub fn show_config(config: &Config) -> Result<()> {
    let rec = &config.recommendation;

    println!("Server:");
    println!("  bind:              {}:{}", config.server.host, config.server.port);
    println!("  request timeout:   {}s", config.server.request_timeout_secs);
    println!();
    println!("Catalog:");
    match &config.catalog.path {
        Some(path) => println!("  path:              {}", path.display()),
        None => println!("  path:              (none, starts empty)"),
    }
    println!();
    println!("Recommendation weights:");
    println!("  urgency:           {:.2}", rec.weights.urgency);
    println!("  unlock:            {:.2}", rec.weights.unlock);
    println!("  risk:              {:.2}", rec.weights.risk);
    println!("  staleness:         {:.2}", rec.weights.staleness);
    println!("  staleness after:   {}h", rec.staleness_threshold_hours);
    println!("  signal timeout:    {}ms", rec.signal_timeout_ms);
    println!("  cache ttl:         {}s", rec.cache_ttl_secs);
    println!("  k (default/max):   {}/{}", rec.default_k, rec.max_k);
    println!();
    println!("Signals:");
    println!(
        "  endpoint:          {}",
        config.signals.endpoint.as_deref().unwrap_or("(none)")
    );
    println!();
    println!("Progress:");
    match &config.progress.snapshot_path {
        Some(path) => println!("  snapshot:          {}", path.display()),
        None => println!("  snapshot:          (in memory only)"),
    }
    println!("  event history:     {}", config.progress.event_history);

    Ok(())
}

/// Get default configuration as TOML string
pub fn default_config_toml() -> String {
    let config = Config::default();
    toml::to_string_pretty(&config).unwrap_or_else(|_| "# Default configuration\n".to_string())
}
