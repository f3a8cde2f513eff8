//! Configuration system for the gateway
//!
//! `GatewayConfig` holds process-wide settings. It is read from an optional
//! YAML/JSON file and then overlaid with environment variables, so a
//! container can be configured entirely through its environment.

mod generation;
mod manifest;
mod server;

pub use generation::{
    is_constructor_key, merge_params, request_params, BackendParams, ParamDefaults, ParamMap,
    CONSTRUCTOR_KEYS, UNSUPPORTED_GENERATION_KEYS,
};
pub use manifest::{read_params_file, ModelEntry, ModelManifest};
pub use server::ServerConfig;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Selects `model_config_<environment>.*`
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Model used when a request names none
    #[serde(default = "default_model_id")]
    pub default_model_id: String,

    /// Base directory for relative model paths
    #[serde(default = "default_model_base_path")]
    pub model_base_path: PathBuf,

    /// Directory holding the model manifests
    #[serde(default = "default_model_config_dir")]
    pub model_config_dir: PathBuf,

    /// Shared store connection string
    #[serde(default = "default_store_url")]
    pub store_url: String,

    /// Namespace for every key written to the shared store
    #[serde(default = "default_key_prefix")]
    pub store_key_prefix: String,

    /// Thread count forced into every backend constructor
    #[serde(default = "default_cpu_threads")]
    pub cpu_threads: usize,

    /// Bearer token required on `/v1` routes
    #[serde(default = "default_auth_token")]
    pub auth_token: String,

    /// Global slot capacity; zero or negative disables gating
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: i64,

    /// How long a request waits for a slot
    #[serde(default = "default_slot_timeout")]
    pub slot_timeout_secs: u64,

    /// Sliding expiry of session history
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,

    /// Loaded backends kept resident; 0 = unbounded
    #[serde(default)]
    pub max_loaded_models: usize,

    /// Persist the partial assistant turn when a stream fails mid-way
    #[serde(default)]
    pub persist_partial_streams: bool,

    #[serde(default)]
    pub server: ServerConfig,
}

fn default_environment() -> String {
    "dev".to_string()
}

fn default_model_id() -> String {
    "qwen3-0.6b".to_string()
}

fn default_model_base_path() -> PathBuf {
    PathBuf::from("/app/models/gguf_models")
}

fn default_model_config_dir() -> PathBuf {
    PathBuf::from("./config")
}

fn default_store_url() -> String {
    "memory://".to_string()
}

fn default_key_prefix() -> String {
    "lite-gateway".to_string()
}

fn default_cpu_threads() -> usize {
    4
}

fn default_auth_token() -> String {
    "your-default-secret-token".to_string()
}

fn default_max_concurrent() -> i64 {
    3
}

fn default_slot_timeout() -> u64 {
    120
}

fn default_session_ttl() -> u64 {
    3600 // 1 hour
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            default_model_id: default_model_id(),
            model_base_path: default_model_base_path(),
            model_config_dir: default_model_config_dir(),
            store_url: default_store_url(),
            store_key_prefix: default_key_prefix(),
            cpu_threads: default_cpu_threads(),
            auth_token: default_auth_token(),
            max_concurrent_requests: default_max_concurrent(),
            slot_timeout_secs: default_slot_timeout(),
            session_ttl_secs: default_session_ttl(),
            max_loaded_models: 0,
            persist_partial_streams: false,
            server: ServerConfig::default(),
        }
    }
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| anyhow!("invalid value for {}: '{}' ({})", name, raw, e))
}

impl GatewayConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// File (if any) overlaid with the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(p) => match p.extension().and_then(|e| e.to_str()) {
                Some("json") => Self::from_json(p),
                _ => Self::from_yaml(p),
            }
            .with_context(|| format!("failed to load config {}", p.display()))?,
            None => Self::default(),
        };
        config.with_env_overrides(|name| std::env::var(name).ok())
    }

    /// Apply environment overrides through `lookup`
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ENVIRONMENT") {
            self.environment = v;
        }
        if let Some(v) = lookup("DEFAULT_MODEL_ID") {
            self.default_model_id = v;
        }
        if let Some(v) = lookup("MODEL_BASE_PATH") {
            self.model_base_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("MODEL_CONFIG_DIR") {
            self.model_config_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("STORE_URL") {
            self.store_url = v;
        }
        if let Some(v) = lookup("STORE_KEY_PREFIX") {
            self.store_key_prefix = v;
        }
        if let Some(v) = lookup("CPU_THREADS") {
            self.cpu_threads = parse_env("CPU_THREADS", &v)?;
        }
        if let Some(v) = lookup("AUTH") {
            self.auth_token = v;
        }
        if let Some(v) = lookup("MAX_CONCURRENT_REQUESTS") {
            self.max_concurrent_requests = parse_env("MAX_CONCURRENT_REQUESTS", &v)?;
        }
        self.server.apply_env(&lookup)?;
        Ok(self)
    }

    pub fn slot_timeout(&self) -> Duration {
        Duration::from_secs(self.slot_timeout_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}
