//! HTTP listener settings

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::parse_env;

/// Where the gateway listens and which HTTP layers wrap the API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Origins allowed by CORS; `["*"]` allows any, empty disables CORS
    pub cors_origins: Vec<String>,

    /// Emit a tracing span per HTTP request
    pub trace_requests: bool,

    /// Largest accepted request body. Chat histories travel inline, so this
    /// bounds the conversation a client can send in one request.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            trace_requests: true,
            max_body_bytes: 4 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// `HOST`, `PORT` and `CORS_ORIGINS` (comma separated) from `lookup`
    pub(super) fn apply_env<F>(&mut self, lookup: &F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("HOST") {
            self.host = v;
        }
        if let Some(v) = lookup("PORT") {
            self.port = parse_env("PORT", &v)?;
        }
        if let Some(v) = lookup("CORS_ORIGINS") {
            self.cors_origins = v
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
        }
        Ok(())
    }

    pub fn cors_enabled(&self) -> bool {
        !self.cors_origins.is_empty()
    }

    pub fn cors_allows_any(&self) -> bool {
        self.cors_origins.iter().any(|o| o == "*")
    }

    /// `host:port` for the listener
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
