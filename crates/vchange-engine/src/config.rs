//! Engine configuration.
//!
//! Stored as YAML in the user's config directory.
//! Default location: ~/.config/vchange/config.yaml

use crate::devices::DeviceSelector;
use crate::engine::EngineSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub devices: DeviceConfig,
    pub engine: TimingConfig,
    pub presets: PresetConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// "default", a device index, or part of a device name
    pub input: DeviceSelector,
    pub output: DeviceSelector,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Wait for the audio worker to finish before forcing streams closed
    pub stop_timeout_ms: u64,
    /// Wait for both device streams to open
    pub open_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            stop_timeout_ms: 1000,
            open_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresetConfig {
    /// User preset file; defaults to presets.yaml next to this config
    pub path: Option<PathBuf>,
    /// Preset applied when the engine comes up
    pub initial: Option<String>,
}

impl EngineConfig {
    pub fn settings(&self) -> EngineSettings {
        EngineSettings {
            stop_timeout: Duration::from_millis(self.engine.stop_timeout_ms),
            open_timeout: Duration::from_millis(self.engine.open_timeout_ms),
            ..EngineSettings::default()
        }
    }

    pub fn presets_path(&self) -> PathBuf {
        self.presets
            .path
            .clone()
            .unwrap_or_else(crate::presets::default_presets_path)
    }
}

pub(crate) fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("vchange")
}

/// Returns: ~/.config/vchange/config.yaml
pub fn default_config_path() -> PathBuf {
    config_dir().join("config.yaml")
}

/// Load configuration from a YAML file
///
/// If the file doesn't exist, returns default config.
/// If the file exists but is invalid, logs a warning and returns default config.
pub fn load_config(path: &Path) -> EngineConfig {
    log::info!("load_config: Loading from {:?}", path);

    if !path.exists() {
        log::info!("load_config: Config file doesn't exist, using defaults");
        return EngineConfig::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<EngineConfig>(&contents) {
            Ok(config) => {
                log::info!(
                    "load_config: input={}, output={}, stop timeout {} ms",
                    config.devices.input,
                    config.devices.output,
                    config.engine.stop_timeout_ms
                );
                config
            }
            Err(e) => {
                log::warn!("load_config: Failed to parse config: {}, using defaults", e);
                EngineConfig::default()
            }
        },
        Err(e) => {
            log::warn!("load_config: Failed to read config file: {}, using defaults", e);
            EngineConfig::default()
        }
    }
}

/// Save configuration to a YAML file, creating parent directories.
pub fn save_config(config: &EngineConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }
    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;
    std::fs::write(path, yaml)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;
    log::info!("save_config: Config saved to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.devices.input, DeviceSelector::Default);
        assert_eq!(config.settings().stop_timeout, Duration::from_secs(1));
        assert_eq!(config.settings().format.block_len, crate::BLOCK_LEN);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = "devices:\n  input: USB\nengine:\n  stop_timeout_ms: 250\n";
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.devices.input, DeviceSelector::Name("USB".into()));
        assert_eq!(config.devices.output, DeviceSelector::Default);
        assert_eq!(config.engine.stop_timeout_ms, 250);
        assert_eq!(config.engine.open_timeout_ms, 2000);
    }

    #[test]
    fn yaml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg").join("config.yaml");
        let config = EngineConfig {
            devices: DeviceConfig {
                input: DeviceSelector::Index(2),
                output: DeviceSelector::Name("Speakers".into()),
            },
            engine: TimingConfig { stop_timeout_ms: 300, open_timeout_ms: 900 },
            presets: PresetConfig {
                path: Some(PathBuf::from("/tmp/presets.yaml")),
                initial: Some("Echo".into()),
            },
        };
        save_config(&config, &path).unwrap();
        assert_eq!(load_config(&path), config);
    }

    #[test]
    fn invalid_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "engine: [not, a, map]").unwrap();
        assert_eq!(load_config(&path), EngineConfig::default());
    }
}
