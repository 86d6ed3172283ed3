//! Named parameter presets.
//!
//! A fixed set of built-ins always exists. User presets live in a separate
//! name → record map that is saved as YAML; built-ins are never written out
//! and can't be replaced or removed.

use crate::params::{EffectParameters, ParameterUpdate, HIGH_PASS_MIN, LOW_PASS_MAX};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// One preset as stored on disk. Missing fields take the bypass defaults;
/// unknown fields are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresetRecord {
    pub pitch: f32,
    pub high_pass: f32,
    pub low_pass: f32,
    pub reverb_on: bool,
    pub room_size: f32,
    pub chorus_on: bool,
    pub delay_on: bool,
}

impl Default for PresetRecord {
    fn default() -> Self {
        Self {
            pitch: 0.0,
            high_pass: HIGH_PASS_MIN,
            low_pass: LOW_PASS_MAX,
            reverb_on: false,
            room_size: 0.0,
            chorus_on: false,
            delay_on: false,
        }
    }
}

impl PresetRecord {
    /// Full update covering every field; values are clamped when merged.
    pub fn to_update(&self) -> ParameterUpdate {
        ParameterUpdate {
            pitch: Some(self.pitch),
            high_pass: Some(self.high_pass),
            low_pass: Some(self.low_pass),
            reverb_on: Some(self.reverb_on),
            room_size: Some(self.room_size),
            chorus_on: Some(self.chorus_on),
            delay_on: Some(self.delay_on),
        }
    }

    /// The record with every field brought into its valid range. Non-finite
    /// values fall back to the bypass default.
    pub fn clamped(&self) -> Self {
        let p = EffectParameters::default().merged(&self.to_update());
        Self {
            pitch: p.pitch_semitones(),
            high_pass: p.high_pass_hz(),
            low_pass: p.low_pass_hz(),
            reverb_on: p.reverb_on(),
            room_size: p.room_size(),
            chorus_on: p.chorus_on(),
            delay_on: p.delay_on(),
        }
    }
}

pub const NORMAL: &str = "Normal";

pub fn builtin_presets() -> Vec<(&'static str, PresetRecord)> {
    vec![
        (NORMAL, PresetRecord::default()),
        ("Deep Voice", PresetRecord { pitch: -8.0, ..PresetRecord::default() }),
        ("High Voice", PresetRecord { pitch: 8.0, ..PresetRecord::default() }),
        ("Echo", PresetRecord { reverb_on: true, room_size: 0.7, ..PresetRecord::default() }),
    ]
}

#[derive(Error, Debug, PartialEq)]
pub enum PresetError {
    #[error("'{0}' is a built-in preset")]
    BuiltIn(String),

    #[error("no preset named '{0}'")]
    NotFound(String),

    #[error("preset name must not be empty")]
    EmptyName,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresetBank {
    user: BTreeMap<String, PresetRecord>,
}

impl PresetBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_builtin(name: &str) -> bool {
        builtin_presets().iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Built-ins first, then user presets.
    pub fn get(&self, name: &str) -> Option<PresetRecord> {
        builtin_presets()
            .into_iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, r)| r)
            .or_else(|| self.user_key(name).and_then(|k| self.user.get(&k).copied()))
    }

    /// Stored key for `name`: exact match first, then ignoring case.
    fn user_key(&self, name: &str) -> Option<String> {
        if self.user.contains_key(name) {
            return Some(name.to_string());
        }
        self.user.keys().find(|k| k.eq_ignore_ascii_case(name)).cloned()
    }

    /// All preset names, built-ins first.
    pub fn names(&self) -> Vec<String> {
        builtin_presets()
            .into_iter()
            .map(|(n, _)| n.to_string())
            .chain(self.user.keys().cloned())
            .collect()
    }

    pub fn user_presets(&self) -> &BTreeMap<String, PresetRecord> {
        &self.user
    }

    /// Add or replace a user preset. Names compare without case, so adding
    /// "robot" replaces "Robot". Values are clamped before they are stored.
    pub fn add(&mut self, name: &str, record: PresetRecord) -> Result<(), PresetError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PresetError::EmptyName);
        }
        if Self::is_builtin(name) {
            return Err(PresetError::BuiltIn(name.to_string()));
        }
        if let Some(old) = self.user_key(name) {
            self.user.remove(&old);
        }
        self.user.insert(name.to_string(), record.clamped());
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<PresetRecord, PresetError> {
        if Self::is_builtin(name) {
            return Err(PresetError::BuiltIn(name.to_string()));
        }
        self.user_key(name)
            .and_then(|k| self.user.remove(&k))
            .ok_or_else(|| PresetError::NotFound(name.to_string()))
    }

    /// Load user presets. A missing file is an empty bank. Entries that
    /// shadow a built-in name are skipped; out-of-range values are clamped.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("no preset file at {path:?}, starting with built-ins only");
            return Ok(Self::new());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read preset file: {path:?}"))?;
        let raw: BTreeMap<String, PresetRecord> = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse preset file: {path:?}"))?;

        let mut bank = Self::new();
        for (name, record) in raw {
            if let Err(e) = bank.add(&name, record) {
                log::warn!("skipping preset '{name}': {e}");
            }
        }
        log::info!("loaded {} user presets from {path:?}", bank.user.len());
        Ok(bank)
    }

    /// Write user presets only. Creates parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create preset directory: {parent:?}"))?;
        }
        let yaml = serde_yaml::to_string(&self.user).context("Failed to serialize presets")?;
        std::fs::write(path, yaml)
            .with_context(|| format!("Failed to write preset file: {path:?}"))?;
        log::info!("saved {} user presets to {path:?}", self.user.len());
        Ok(())
    }
}

/// ~/.config/vchange/presets.yaml
pub fn default_presets_path() -> PathBuf {
    crate::config::config_dir().join("presets.yaml")
}
