//! Composer configuration (weave.toml).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// External pipe-runtime loader URL. Mutually exclusive with
    /// `pipe_definition_path` — when both are set, an inlined definition
    /// wins and the preload `Link` header is omitted.
    pub amd_loader_url: Option<String>,

    /// Path to a pipe-runtime script to inline directly into every
    /// response instead of loading it from `amd_loader_url`.
    pub pipe_definition_path: Option<String>,

    #[serde(default = "default_pipe_instance_name")]
    pub pipe_instance_name: String,

    #[serde(default = "default_max_asset_links")]
    pub max_asset_links: usize,

    #[serde(default)]
    pub handled_tags: Vec<String>,

    #[serde(default = "default_upstream_timeout_ms")]
    pub upstream_timeout_ms: u64,

    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_pipe_instance_name() -> String {
    "p".to_string()
}
fn default_max_asset_links() -> usize {
    1
}
fn default_upstream_timeout_ms() -> u64 {
    3000
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            amd_loader_url: None,
            pipe_definition_path: None,
            pipe_instance_name: default_pipe_instance_name(),
            max_asset_links: default_max_asset_links(),
            handled_tags: Vec::new(),
            upstream_timeout_ms: default_upstream_timeout_ms(),
            cors_origins: Vec::new(),
        }
    }
}

impl ComposerConfig {
    /// Loads `path`, falling back to defaults if the file doesn't exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;

        let config: ComposerConfig = toml::from_str(&content).with_context(|| "Failed to parse weave.toml")?;

        Ok(config)
    }

    pub fn addr(&self) -> Result<std::net::SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid host/port: {}:{}", self.host, self.port))
    }
}
