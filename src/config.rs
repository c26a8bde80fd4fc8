//! Configuration Module - User preferences from ~/.msiecf-drill/config.toml
//!
//! Supports:
//! - Default codepage for non-Unicode strings
//! - Recovery scan behaviour
//! - Read-only enforcement settings

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::codepage::Codepage;
use crate::file::OpenOptions;

/// MSIECF Drill Configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,
    /// String decoding settings
    pub decode: DecodeConfig,
    /// Recovery scan settings
    pub recovery: RecoveryConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Warn when evidence files are writable
    pub enforce_readonly: bool,
    /// Log level: trace, debug, info, warn, error
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            enforce_readonly: true,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    /// Codepage name or number, e.g. "windows-1252" or "1251"
    pub codepage: String,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            codepage: Codepage::default().name().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Scan for records the hash table no longer references
    pub enabled: bool,
    /// Also probe blocks the allocation bitmap marks free
    pub include_unallocated: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            include_unallocated: false,
        }
    }
}

impl Config {
    /// Load config from default path or return defaults
    pub fn load() -> Self {
        Self::load_from(&Self::default_path()).unwrap_or_default()
    }

    /// Load config from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;

        Ok(config)
    }

    /// Save config to default path
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;

        Ok(())
    }

    /// Get default config path
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("com", "tunclon", "msiecf-drill")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".msiecf-drill")
                    .join("config.toml")
            })
    }

    /// Check if config file exists
    pub fn exists() -> bool {
        Self::default_path().exists()
    }

    /// Create default config file if it doesn't exist
    pub fn ensure_exists() -> Result<()> {
        let path = Self::default_path();
        if !path.exists() {
            let config = Config::default();
            config.save_to(&path)?;
            tracing::info!("Created default config at {}", path.display());
        }
        Ok(())
    }

    /// The configured codepage
    pub fn codepage(&self) -> Result<Codepage> {
        Codepage::from_name(&self.decode.codepage)
            .with_context(|| format!("Unsupported codepage in config: {}", self.decode.codepage))
    }

    /// Tracing filter directive for this crate. `verbose` raises anything
    /// quieter than debug; unknown level names fall back to info.
    pub fn log_directive(&self, verbose: bool) -> String {
        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

        let configured = LEVELS
            .iter()
            .copied()
            .find(|level| level.eq_ignore_ascii_case(self.general.log_level.trim()))
            .unwrap_or("info");
        let level = if verbose && configured != "trace" {
            "debug"
        } else {
            configured
        };

        format!("msiecf_drill={}", level)
    }

    /// Library open options for these settings
    pub fn open_options(&self) -> Result<OpenOptions> {
        Ok(OpenOptions {
            codepage: self.codepage()?,
            recovery: self.recovery.enabled,
            include_unallocated: self.recovery.include_unallocated,
            abort: None,
        })
    }
}

/// Generate a sample config file with comments
pub fn generate_sample_config() -> String {
    r#"# MSIECF Drill Configuration
# Location: ~/.msiecf-drill/config.toml (or %APPDATA%\msiecf-drill\config.toml on Windows)

[general]
# Warn when an evidence file is writable (recommended)
enforce_readonly = true

# Log level: trace, debug, info, warn, error
log_level = "info"

[decode]
# Codepage for non-Unicode strings, by name or number
# Examples: "windows-1252", "windows-1251", "932", "koi8-r"
codepage = "windows-1252"

[recovery]
# Look for records the hash table no longer points at
enabled = true

# Also probe blocks marked free in the allocation bitmap (deleted records)
include_unallocated = false
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.general.enforce_readonly);
        assert!(config.recovery.enabled);
        assert!(!config.recovery.include_unallocated);
        assert_eq!(config.codepage().unwrap(), Codepage::Windows1252);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test_config.toml");

        let mut config = Config::default();
        config.decode.codepage = "windows-1251".to_string();
        config.recovery.include_unallocated = true;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.decode.codepage, "windows-1251");
        assert!(loaded.recovery.include_unallocated);
    }

    #[test]
    fn test_parse_sample_config() {
        let sample = generate_sample_config();
        let config: Config = toml::from_str(&sample).unwrap();
        assert_eq!(config.codepage().unwrap().id(), 1252);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str("[recovery]\nenabled = false\n").unwrap();
        assert!(!config.recovery.enabled);
        assert_eq!(config.general.log_level, "info");
    }

    #[test]
    fn test_log_directive() {
        let mut config = Config::default();
        assert_eq!(config.log_directive(false), "msiecf_drill=info");
        assert_eq!(config.log_directive(true), "msiecf_drill=debug");

        config.general.log_level = "WARN".to_string();
        assert_eq!(config.log_directive(false), "msiecf_drill=warn");

        config.general.log_level = "trace".to_string();
        assert_eq!(config.log_directive(true), "msiecf_drill=trace");

        config.general.log_level = "loud".to_string();
        assert_eq!(config.log_directive(false), "msiecf_drill=info");
    }

    #[test]
    fn test_open_options() {
        let mut config = Config::default();
        config.decode.codepage = "932".to_string();
        config.recovery.enabled = false;

        let options = config.open_options().unwrap();
        assert_eq!(options.codepage.id(), 932);
        assert!(!options.recovery);

        config.decode.codepage = "utf-8".to_string();
        assert!(config.open_options().is_err());
    }
}
