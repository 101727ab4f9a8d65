use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::impedance::{ImpedanceFrame, ImpedanceReading};

/// Highest hardware channel an electrode can be wired to.
pub const MAX_HARDWARE_CHANNEL: i32 = 256;

/// Wiring of one cap position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ElectrodeSetting {
    pub is_active: bool,
    pub label_text: String,
    /// 1-based amplifier input, 0 when unassigned.
    pub hardware_channel: i32,
}

impl ElectrodeSetting {
    pub fn hardware_channel(&self) -> Option<usize> {
        match self.hardware_channel.clamp(0, MAX_HARDWARE_CHANNEL) {
            0 => None,
            ch => Some(ch as usize),
        }
    }
}

/// Electrode name (`Cz`, `Fp1`, `Left`, ...) to wiring, stored as a JSON object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Montage {
    electrodes: BTreeMap<String, ElectrodeSetting>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElectrodeImpedance<'a> {
    pub electrode: &'a str,
    pub label: &'a str,
    pub hardware_channel: usize,
    pub reading: Option<ImpedanceReading>,
}

impl Montage {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read montage {}", path.display()))?;
        let mut montage: Montage = serde_json::from_str(&json)
            .with_context(|| format!("error loading montage {}", path.display()))?;
        for setting in montage.electrodes.values_mut() {
            setting.hardware_channel = setting.hardware_channel.clamp(0, MAX_HARDWARE_CHANNEL);
        }
        Ok(montage)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write montage {}", path.display()))
    }

    pub fn insert(&mut self, electrode: impl Into<String>, setting: ElectrodeSetting) {
        self.electrodes.insert(electrode.into(), setting);
    }

    pub fn get(&self, electrode: &str) -> Option<&ElectrodeSetting> {
        self.electrodes.get(electrode)
    }

    pub fn len(&self) -> usize {
        self.electrodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.electrodes.is_empty()
    }

    /// Readings for every active, wired electrode in name order. Channels the
    /// frame does not cover come back with `reading: None`.
    pub fn resolve<'a>(&'a self, frame: &ImpedanceFrame) -> Vec<ElectrodeImpedance<'a>> {
        self.electrodes
            .iter()
            .filter(|(_, setting)| setting.is_active)
            .filter_map(|(name, setting)| {
                let hardware_channel = setting.hardware_channel()?;
                Some(ElectrodeImpedance {
                    electrode: name,
                    label: &setting.label_text,
                    hardware_channel,
                    reading: frame.channel(hardware_channel),
                })
            })
            .collect()
    }
}
