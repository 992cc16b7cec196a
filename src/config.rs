//! User defaults from `~/.config/keel/config.toml`
//!
//! ```toml
//! parallelism = 8
//! timeout = "30m"
//! refresh = true
//! ```
//!
//! Command-line flags override these, and project `[settings]` override
//! them too.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::paths;
use crate::ui;

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct UserConfig {
    /// Concurrent provider operations during apply
    pub parallelism: Option<usize>,
    /// Per-operation timeout such as `"20m"`
    pub timeout: Option<String>,
    /// Refresh before every plan
    pub refresh: bool,
}

impl UserConfig {
    /// Load the user config, or defaults if there is none
    pub fn load() -> Result<Self> {
        let path = paths::config_file()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid TOML format in {}", path.display()))?;
        log::debug!("Loaded user config from {}", path.display());
        Ok(config)
    }

    pub fn timeout(&self) -> Result<Option<Duration>> {
        self.timeout
            .as_deref()
            .map(|raw| {
                ui::parse_duration(raw)
                    .map_err(|e| anyhow::anyhow!("Invalid timeout in user config: {e}"))
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_config_is_default() {
        let dir = TempDir::new().unwrap();
        let config = UserConfig::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, UserConfig::default());
        assert_eq!(config.timeout().unwrap(), None);
    }

    #[test]
    fn test_load_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "parallelism = 8\ntimeout = \"30m\"\nrefresh = true\n").unwrap();

        let config = UserConfig::load_from(&path).unwrap();
        assert_eq!(config.parallelism, Some(8));
        assert!(config.refresh);
        assert_eq!(config.timeout().unwrap(), Some(Duration::from_secs(1800)));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "paralelism = 8\n").unwrap();
        assert!(UserConfig::load_from(&path).is_err());
    }
}
