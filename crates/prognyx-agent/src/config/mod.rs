//! Configuration loading for the Prognyx CLI.
//! Reads prognyx.toml from the current directory or the path in PROGNYX_CONFIG.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use prognyx_common::EngineConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Engine sections (`[execution]`, `[[methods]]`, `[backends.*]`, …).
    #[serde(flatten)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub profiles: ProfilesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilesConfig {
    /// Directory holding one `<record_id>.json` per record.
    #[serde(default = "default_profiles_dir")]
    pub dir: PathBuf,
}

fn default_profiles_dir() -> PathBuf { PathBuf::from("./records") }

impl Default for ProfilesConfig {
    fn default() -> Self {
        Self { dir: default_profiles_dir() }
    }
}


impl Config {
    /// Load configuration from `path`, or PROGNYX_CONFIG, or ./prognyx.toml.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => PathBuf::from(
                std::env::var("PROGNYX_CONFIG").unwrap_or_else(|_| "prognyx.toml".to_string()),
            ),
        };

        if !path.exists() {
            anyhow::bail!(
                "Config file not found: {}\n\
                 Copy prognyx.example.toml to prognyx.toml and edit it.",
                path.display()
            );
        }

        let content = std::fs::read_to_string(&path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.resolve_api_keys();
        config.engine.validate()?;
        Ok(config)
    }

    /// Backends without an inline `api_key` pick it up from
    /// `PROGNYX_<METHOD_ID>_API_KEY`.
    fn resolve_api_keys(&mut self) {
        for (method_id, endpoint) in self.engine.backends.iter_mut() {
            if endpoint.api_key.as_deref().map_or(true, str::is_empty) {
                endpoint.api_key = std::env::var(api_key_var(method_id)).ok();
            }
        }
    }
}

fn api_key_var(method_id: &str) -> String {
    format!("PROGNYX_{}_API_KEY", method_id.to_uppercase().replace('-', "_"))
}
