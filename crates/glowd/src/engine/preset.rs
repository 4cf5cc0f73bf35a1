use std::collections::HashMap;

use serde::Serialize;

use super::state::LightState;
use crate::error::ControlError;
use crate::registry::Registry;

/// Identifier of the preset that switches everything off.
pub const OFF_PRESET: &str = "off";

/// Desired state for one light within a preset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresetTarget {
    pub light: String,
    #[serde(flatten)]
    pub state: LightState,
}

/// Named bundle of light states, applied in `targets` order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Preset {
    pub id: String,
    pub name: String,
    #[serde(rename = "lights")]
    pub targets: Vec<PresetTarget>,
}

impl Preset {
    /// The built-in `off` preset: every registered light at brightness 0.
    pub fn all_off(registry: &Registry) -> Self {
        Self {
            id: OFF_PRESET.to_string(),
            name: "All Off".to_string(),
            targets: registry
                .iter()
                .map(|light| PresetTarget {
                    light: light.id.clone(),
                    state: LightState::off(),
                })
                .collect(),
        }
    }
}

/// Read-only table of presets in configuration order.
#[derive(Debug, Default)]
pub struct PresetTable {
    presets: Vec<Preset>,
    index: HashMap<String, usize>,
}

impl PresetTable {
    /// Build the table, adding the `off` preset when it is not configured.
    pub fn new(presets: Vec<Preset>, registry: &Registry) -> Self {
        let mut table = Self::default();
        for preset in presets {
            table.insert(preset);
        }
        if !table.index.contains_key(OFF_PRESET) {
            table.insert(Preset::all_off(registry));
        }
        table
    }

    fn insert(&mut self, preset: Preset) {
        if self.index.contains_key(&preset.id) {
            return;
        }
        self.index.insert(preset.id.clone(), self.presets.len());
        self.presets.push(preset);
    }

    pub fn lookup(&self, id: &str) -> Result<&Preset, ControlError> {
        self.index
            .get(id)
            .map(|&i| &self.presets[i])
            .ok_or_else(|| ControlError::PresetNotFound(id.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Preset> {
        self.presets.iter()
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}
