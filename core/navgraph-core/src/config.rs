//! Engine configuration.
//!
//! Every expiry window used by the engine lives here so hosts can tune them
//! without touching code. The file is TOML at `~/.navgraph/daemon/config.toml`;
//! a missing file means defaults.
//!
//! ```toml
//! pending_ttl_ms = 10000
//! click_source_ttl_ms = 30000
//! dedup_window_ms = 1000
//! dedup_eviction_ms = 5000
//! sweep_interval_secs = 60
//! excluded_schemes = ["about", "chrome", "chrome-extension"]
//! ```

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{NavGraphError, Result};

const DEFAULT_CONFIG_RELATIVE_PATH: &str = ".navgraph/daemon/config.toml";

pub const DEFAULT_PENDING_TTL_MS: u64 = 10_000;
pub const DEFAULT_CLICK_SOURCE_TTL_MS: u64 = 30_000;
pub const DEFAULT_DEDUP_WINDOW_MS: u64 = 1_000;
pub const DEFAULT_DEDUP_EVICTION_MS: u64 = 5_000;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default = "default_pending_ttl_ms")]
    pub pending_ttl_ms: u64,
    #[serde(default = "default_click_source_ttl_ms")]
    pub click_source_ttl_ms: u64,
    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: u64,
    #[serde(default = "default_dedup_eviction_ms")]
    pub dedup_eviction_ms: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// URL schemes (without the trailing colon) that never produce a node.
    #[serde(default = "default_excluded_schemes")]
    pub excluded_schemes: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pending_ttl_ms: default_pending_ttl_ms(),
            click_source_ttl_ms: default_click_source_ttl_ms(),
            dedup_window_ms: default_dedup_window_ms(),
            dedup_eviction_ms: default_dedup_eviction_ms(),
            sweep_interval_secs: default_sweep_interval_secs(),
            excluded_schemes: default_excluded_schemes(),
        }
    }
}

impl EngineConfig {
    pub fn pending_ttl(&self) -> Duration {
        millis(self.pending_ttl_ms)
    }

    pub fn click_source_ttl(&self) -> Duration {
        millis(self.click_source_ttl_ms)
    }

    pub fn dedup_window(&self) -> Duration {
        millis(self.dedup_window_ms)
    }

    pub fn dedup_eviction(&self) -> Duration {
        millis(self.dedup_eviction_ms)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

fn millis(value: u64) -> Duration {
    Duration::milliseconds(i64::try_from(value).unwrap_or(i64::MAX))
}

fn default_pending_ttl_ms() -> u64 {
    DEFAULT_PENDING_TTL_MS
}

fn default_click_source_ttl_ms() -> u64 {
    DEFAULT_CLICK_SOURCE_TTL_MS
}

fn default_dedup_window_ms() -> u64 {
    DEFAULT_DEDUP_WINDOW_MS
}

fn default_dedup_eviction_ms() -> u64 {
    DEFAULT_DEDUP_EVICTION_MS
}

fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}

fn default_excluded_schemes() -> Vec<String> {
    [
        "about",
        "chrome",
        "chrome-extension",
        "chrome-search",
        "edge",
        "moz-extension",
        "devtools",
        "view-source",
        "data",
        "javascript",
    ]
    .iter()
    .map(|scheme| scheme.to_string())
    .collect()
}

/// Returns the path to the default configuration file.
pub fn default_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or(NavGraphError::HomeDirNotFound)?;
    Ok(home.join(DEFAULT_CONFIG_RELATIVE_PATH))
}

/// Loads the engine configuration, returning defaults if the file doesn't exist.
pub fn load_engine_config(path: Option<PathBuf>) -> Result<EngineConfig> {
    let config_path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(EngineConfig::default());
    }

    parse_config_file(&config_path)
}

fn parse_config_file(path: &Path) -> Result<EngineConfig> {
    let content = fs_err::read_to_string(path).map_err(|source| NavGraphError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str::<EngineConfig>(&content).map_err(|err| NavGraphError::ConfigMalformed {
        path: path.to_path_buf(),
        details: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let config = load_engine_config(Some(temp_dir.path().join("absent.toml")))
            .expect("load config");
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.pending_ttl(), Duration::seconds(10));
        assert_eq!(config.click_source_ttl(), Duration::seconds(30));
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "dedup_window_ms = 250\nexcluded_schemes = [\"about\"]\n")
            .expect("write config");

        let config = load_engine_config(Some(path)).expect("load config");
        assert_eq!(config.dedup_window_ms, 250);
        assert_eq!(config.excluded_schemes, vec!["about".to_string()]);
        assert_eq!(config.pending_ttl_ms, DEFAULT_PENDING_TTL_MS);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "pending_ttl_ms = \"soon\"").expect("write config");

        let err = load_engine_config(Some(path)).expect_err("malformed");
        assert!(matches!(err, NavGraphError::ConfigMalformed { .. }));
    }

    #[test]
    fn sweep_interval_is_never_zero() {
        let config = EngineConfig {
            sweep_interval_secs: 0,
            ..EngineConfig::default()
        };
        assert_eq!(config.sweep_interval(), std::time::Duration::from_secs(1));
    }
}
