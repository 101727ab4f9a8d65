use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::sdk::{ConnectionType, ImpedanceLimit};

/// Names the JSON file [`DriverConfig::from_env`] reads.
pub const CONFIG_ENV: &str = "RTDEVICE_CONFIG";
/// Overrides `library_path` when set.
pub const SDK_PATH_ENV: &str = "TMSI_SDK_PATH";

pub const DEFAULT_LIBRARY: &str = "TMSiSDK.dll";
pub const DEFAULT_REQUESTED_SAMPLES: u32 = 1000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub library_path: PathBuf,
    pub connection: ConnectionType,
    /// Per-channel sample count asked of `SetSignalBuffer`; the SDK may pick another.
    pub requested_samples: u32,
    pub impedance_limit: ImpedanceLimit,
    /// Extra `GetSamples` attempts after a read that returned no bytes.
    pub read_retries: u32,
    pub read_retry_delay_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            library_path: PathBuf::from(DEFAULT_LIBRARY),
            connection: ConnectionType::Usb,
            requested_samples: DEFAULT_REQUESTED_SAMPLES,
            impedance_limit: ImpedanceLimit::Ohm200,
            read_retries: 2,
            read_retry_delay_ms: 10,
        }
    }
}

impl DriverConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("invalid driver config {}", path.display()))
    }

    /// Defaults, then `$RTDEVICE_CONFIG`, then `$TMSI_SDK_PATH`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var_os(key))
    }

    /// [`DriverConfig::from_env`] with variables read through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<OsString>) -> Result<Self> {
        let mut config = match lookup(CONFIG_ENV) {
            Some(path) => Self::from_json_file(path)?,
            None => Self::default(),
        };
        if let Some(sdk) = lookup(SDK_PATH_ENV) {
            config.library_path = PathBuf::from(sdk);
        }
        Ok(config)
    }

    pub fn read_retry_delay(&self) -> Duration {
        Duration::from_millis(self.read_retry_delay_ms)
    }
}
