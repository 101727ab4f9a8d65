use std::path::PathBuf;
use thiserror::Error;

use crate::driver::DriverState;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Cannot open the driver DLL {}: {source}", .path.display())]
    LibraryLoad {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
    #[error("driver DLL does not export `{name}`: {source}")]
    MissingSymbol {
        name: &'static str,
        #[source]
        source: libloading::Error,
    },
    #[error("TMSi library initialization failed (vendor code {code})")]
    SdkInit { code: i32 },
    #[error("TMSi device enumeration failed (vendor code {code})")]
    Enumeration { code: i32 },
    #[error("No TMSi device found")]
    NoDevice,
    #[error("Failed to open TMSi device {locator} (vendor code {code})")]
    Open { locator: String, code: i32 },
    #[error("Cannot get signal format (vendor code {code})")]
    SignalFormat { code: i32 },
    #[error("Error in setting signal buffer of {requested} samples (vendor code {code})")]
    BufferNegotiation { requested: u32, code: i32 },
    #[error("Memory allocation failed for signal buffer of {bytes} bytes")]
    Allocation { bytes: usize },
    #[error("Failed to start data acquisition (vendor code {code})")]
    AcquisitionStart { code: i32 },
    #[error("Failed to stop data acquisition (vendor code {code})")]
    AcquisitionStop { code: i32 },
    #[error("Cannot enter impedance mode (vendor code {code})")]
    ModeSwitch { code: i32 },
    #[error("Cannot retrieve impedance data: no bytes returned after {attempts} attempt(s)")]
    NoData { attempts: u32 },
    #[error("Cannot retrieve impedance data: sample read failed (vendor code {code})")]
    ReadFailed { code: i32 },
    #[error("driver is {actual:?}, operation requires {required}")]
    InvalidState {
        actual: DriverState,
        required: &'static str,
    },
    #[error("impedance data mode has not been initiated")]
    NotConfigured,
}
