//! Configuration file management.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default session deadline in seconds when neither flag nor config sets one.
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Default peripheral address
    #[serde(default)]
    pub device: Option<String>,

    /// Session deadline in seconds
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Sessions to run per command
    #[serde(default)]
    pub attempts: Option<u32>,

    /// Disable colored output
    #[serde(default)]
    pub no_color: bool,
}

impl Config {
    /// Get the config file path
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("blecmd")
            .join("config.toml")
    }

    /// Load config from the default path, or return default if not found
    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    /// Load config from `path`; unreadable files fall back to defaults with a warning.
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        eprintln!("Warning: Failed to parse config: {}", e);
                    }
                },
                Err(e) => {
                    eprintln!("Warning: Failed to read config: {}", e);
                }
            }
        }
        Self::default()
    }

    /// Save config to `path`
    #[allow(dead_code)]
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }
}

/// Resolve device from arg (or env var, via clap) or config.
pub fn resolve_device(device: Option<String>, config: &Config) -> Option<String> {
    device
        .filter(|d| !d.trim().is_empty())
        .or_else(|| config.device.clone())
}

/// Resolve the session deadline: flag, then config, then the built-in default.
pub fn resolve_timeout(cmd_timeout: Option<u64>, config: &Config) -> u64 {
    cmd_timeout
        .or(config.timeout)
        .filter(|t| *t > 0)
        .unwrap_or(DEFAULT_TIMEOUT_SECS)
}

/// Resolve the number of sessions to run: flag, then config, then one.
pub fn resolve_attempts(cmd_attempts: Option<u32>, config: &Config) -> u32 {
    cmd_attempts.or(config.attempts).unwrap_or(1).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_device_prefers_arg() {
        let config = Config {
            device: Some("config-device".to_string()),
            ..Default::default()
        };
        let result = resolve_device(Some("arg-device".to_string()), &config);
        assert_eq!(result, Some("arg-device".to_string()));
    }

    #[test]
    fn test_resolve_device_falls_back_to_config() {
        let config = Config {
            device: Some("config-device".to_string()),
            ..Default::default()
        };
        assert_eq!(
            resolve_device(None, &config),
            Some("config-device".to_string())
        );
        assert_eq!(
            resolve_device(Some("  ".to_string()), &config),
            Some("config-device".to_string())
        );
    }

    #[test]
    fn test_resolve_device_none() {
        assert_eq!(resolve_device(None, &Config::default()), None);
    }

    #[test]
    fn test_resolve_timeout_order() {
        let config = Config {
            timeout: Some(9),
            ..Default::default()
        };
        assert_eq!(resolve_timeout(Some(3), &config), 3);
        assert_eq!(resolve_timeout(None, &config), 9);
        assert_eq!(resolve_timeout(None, &Config::default()), DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn test_resolve_timeout_ignores_zero_in_config() {
        let config = Config {
            timeout: Some(0),
            ..Default::default()
        };
        assert_eq!(resolve_timeout(None, &config), DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn test_resolve_attempts() {
        let config = Config {
            attempts: Some(4),
            ..Default::default()
        };
        assert_eq!(resolve_attempts(Some(2), &config), 2);
        assert_eq!(resolve_attempts(None, &config), 4);
        assert_eq!(resolve_attempts(None, &Config::default()), 1);

        let zero = Config {
            attempts: Some(0),
            ..Default::default()
        };
        assert_eq!(resolve_attempts(None, &zero), 1);
    }

    #[test]
    fn test_config_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config {
            device: Some("AA:BB:CC:DD:EE:FF".to_string()),
            timeout: Some(7),
            attempts: Some(2),
            no_color: true,
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path), config);
    }

    #[test]
    fn test_missing_or_invalid_config_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert_eq!(Config::load_from(&missing), Config::default());

        let invalid = dir.path().join("invalid.toml");
        fs::write(&invalid, "timeout = \"soon\"").unwrap();
        assert_eq!(Config::load_from(&invalid), Config::default());
    }

    #[test]
    fn test_partial_config_parses() {
        let config: Config = toml::from_str("device = \"de1\"").unwrap();
        assert_eq!(config.device.as_deref(), Some("de1"));
        assert_eq!(config.timeout, None);
        assert!(!config.no_color);
    }
}
