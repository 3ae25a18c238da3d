use std::{env, fs::File, io::BufReader, path::Path, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    aggregate::UndatedRows,
    bridge::{BridgeConfig, DEFAULT_ENDPOINT, DEFAULT_MODEL, DEFAULT_TIMEOUT_SECS},
};

pub const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Optional settings file passed with `--config`. Every field may be omitted.
///
/// ```yaml
/// undated_rows: include
/// bridge:
///   model: gpt-4o-mini
///   timeout_secs: 10
///   api_key_env: LEDGER_LENS_KEY
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub undated_rows: Option<UndatedRows>,
    pub bridge: BridgeSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeSettings {
    pub model: String,
    pub endpoint: String,
    pub timeout_secs: u64,
    pub api_key_env: String,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let reader = BufReader::new(file);
        let config: AppConfig = serde_yaml::from_reader(reader)
            .with_context(|| format!("Parsing config YAML {path:?}"))?;
        config.bridge.validate()?;
        debug!("Loaded config from {path:?}: {config:?}");
        Ok(config)
    }

    pub fn load_optional(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// The command-line flag wins over the file; the file wins over the
    /// built-in default.
    pub fn undated_rows(&self, include_flag: bool) -> UndatedRows {
        if include_flag {
            UndatedRows::Include
        } else {
            self.undated_rows.unwrap_or_default()
        }
    }
}

impl BridgeSettings {
    fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            bail!("bridge.timeout_secs must be at least 1");
        }
        if self.model.trim().is_empty() {
            bail!("bridge.model cannot be empty");
        }
        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            bail!("bridge.endpoint must be an http(s) URL, found '{}'", self.endpoint);
        }
        Ok(())
    }

    /// Builds the bridge configuration, taking the key from `explicit_key`
    /// or else from the environment variable named by `api_key_env`.
    pub fn resolve(&self, explicit_key: Option<&str>) -> Result<BridgeConfig> {
        let api_key = match explicit_key.map(str::trim).filter(|key| !key.is_empty()) {
            Some(key) => key.to_string(),
            None => env::var(&self.api_key_env)
                .ok()
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty())
                .ok_or_else(|| {
                    anyhow!(
                        "No API key available: pass --api-key or set {}",
                        self.api_key_env
                    )
                })?,
        };
        Ok(BridgeConfig {
            api_key,
            model: self.model.clone(),
            endpoint: self.endpoint.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        })
    }
}
