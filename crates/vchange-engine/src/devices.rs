use crate::backend::AudioBackend;
use crate::error::{Direction, StreamError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One audio endpoint as seen by a single enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Position in the backend's enumeration; stable for the process lifetime
    /// as long as the physical device set does not change.
    pub index: usize,
    pub name: String,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
}

impl DeviceDescriptor {
    pub fn supports(&self, direction: Direction) -> bool {
        match direction {
            Direction::Input => self.max_input_channels > 0,
            Direction::Output => self.max_output_channels > 0,
        }
    }
}

/// How the user picked a device: explicit index, name (case-insensitive
/// substring), or the host default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeviceSelector {
    #[default]
    Default,
    Index(usize),
    Name(String),
}

impl From<&str> for DeviceSelector {
    fn from(s: &str) -> Self {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("default") {
            DeviceSelector::Default
        } else if let Ok(idx) = s.parse::<usize>() {
            DeviceSelector::Index(idx)
        } else {
            DeviceSelector::Name(s.to_string())
        }
    }
}

impl From<String> for DeviceSelector {
    fn from(s: String) -> Self {
        DeviceSelector::from(s.as_str())
    }
}

impl From<DeviceSelector> for String {
    fn from(sel: DeviceSelector) -> Self {
        sel.to_string()
    }
}

impl std::str::FromStr for DeviceSelector {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(DeviceSelector::from(s))
    }
}

impl std::fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceSelector::Default => f.write_str("default"),
            DeviceSelector::Index(i) => write!(f, "{i}"),
            DeviceSelector::Name(n) => f.write_str(n),
        }
    }
}

/// Enumerates endpoints through the active backend and resolves selectors.
#[derive(Clone)]
pub struct DeviceRegistry {
    backend: Arc<dyn AudioBackend>,
}

impl DeviceRegistry {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self { backend }
    }

    pub fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, StreamError> {
        self.backend.devices()
    }

    pub fn default_input(&self) -> Result<DeviceDescriptor, StreamError> {
        self.backend
            .default_input()
            .ok_or_else(|| StreamError::DeviceNotFound("no default input device".into()))
    }

    pub fn default_output(&self) -> Result<DeviceDescriptor, StreamError> {
        self.backend
            .default_output()
            .ok_or_else(|| StreamError::DeviceNotFound("no default output device".into()))
    }

    /// Resolve a selector against a fresh enumeration.
    pub fn resolve(
        &self,
        selector: &DeviceSelector,
        direction: Direction,
    ) -> Result<DeviceDescriptor, StreamError> {
        match selector {
            DeviceSelector::Default => match direction {
                Direction::Input => self.default_input(),
                Direction::Output => self.default_output(),
            },
            _ => resolve_in(&self.list_devices()?, selector, direction),
        }
    }
}

/// Resolve a non-default selector against an enumeration snapshot.
pub fn resolve_in(
    devices: &[DeviceDescriptor],
    selector: &DeviceSelector,
    direction: Direction,
) -> Result<DeviceDescriptor, StreamError> {
    let found = match selector {
        DeviceSelector::Index(idx) => devices.iter().find(|d| d.index == *idx),
        DeviceSelector::Name(query) => {
            let q = query.to_lowercase();
            // exact match wins over substring
            devices
                .iter()
                .filter(|d| d.supports(direction))
                .find(|d| d.name.to_lowercase() == q)
                .or_else(|| {
                    devices
                        .iter()
                        .filter(|d| d.supports(direction))
                        .find(|d| d.name.to_lowercase().contains(&q))
                })
        }
        DeviceSelector::Default => None,
    };

    match found {
        Some(d) if d.supports(direction) => Ok(d.clone()),
        Some(d) => Err(StreamError::DeviceNotFound(format!(
            "{} has no {direction} channels",
            d.name
        ))),
        None => Err(StreamError::DeviceNotFound(format!("{direction} device '{selector}'"))),
    }
}
