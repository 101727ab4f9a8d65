//! Binding for TMSi Refa amplifiers: loads `TMSiSDK.dll`, opens the first
//! device and reads electrode impedances, both from Rust ([`RefaDriver`]) and
//! through a flat C surface ([`exports`]).
pub mod buffer;
pub mod config;
pub mod driver;
pub mod error;
pub mod exports;
pub mod impedance;
pub mod montage;
pub mod sdk;

pub use buffer::SampleBuffer;
pub use config::DriverConfig;
pub use driver::{DriverState, RefaDriver};
pub use error::DriverError;
pub use exports::{RtDeviceEx, RtStatus};
pub use impedance::{ImpedanceFrame, ImpedanceReading};
pub use montage::{ElectrodeSetting, Montage};
pub use sdk::{MockSdk, TmsiLibrary, VendorSdk};
