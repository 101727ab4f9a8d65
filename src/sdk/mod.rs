// src/sdk/mod.rs
// Seam between the driver and the vendor library. `TmsiLibrary` talks to the
// real TMSiSDK.dll, `MockSdk` is the in-memory stand-in used by tests.
pub mod mock;
pub mod tmsi;

use std::ffi::{c_void, CStr, CString};
use std::ptr::NonNull;

use serde::{Deserialize, Serialize};

pub use mock::MockSdk;
pub use tmsi::TmsiLibrary;

/// Size in bytes of one sample word written by `GetSamples`.
pub const SAMPLE_WIDTH_BYTES: usize = std::mem::size_of::<u32>();

/// `TMSiConnectionType` from the vendor header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum ConnectionType {
    Undefined = 0,
    Fiber = 1,
    Bluetooth = 2,
    Usb = 3,
    Wifi = 4,
    Network = 5,
}

/// Measuring modes accepted by `SetMeasuringMode`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum MeasuringMode {
    Normal = 0x0,
    Impedance = 0x1,
    Calibration = 0x2,
    ImpedanceEx = 0x3,
    CalibrationEx = 0x4,
}

/// Impedance limit (`IC_OHM_*`) passed alongside the impedance measuring mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum ImpedanceLimit {
    Ohm002 = 0,
    Ohm005 = 1,
    Ohm010 = 2,
    Ohm020 = 3,
    Ohm050 = 4,
    Ohm100 = 5,
    Ohm200 = 6,
}

/// Opaque session handle returned by `LibraryInit`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SdkHandle(NonNull<c_void>);

impl SdkHandle {
    pub fn from_raw(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    pub fn as_raw(self) -> *mut c_void {
        self.0.as_ptr()
    }
}

// The handle is an opaque token owned by one driver; the SDK never hands it
// to another thread on its own.
unsafe impl Send for SdkHandle {}

/// Subset of `FRONTENDINFO` the driver keeps after opening a device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrontEndInfo {
    pub serial: u32,
    pub channels: u16,
    pub base_sample_rate_hz: u16,
    pub hardware_version: u16,
    pub software_version: u16,
}

/// Vendor calls the driver relies on, expressed with Rust types.
///
/// Boolean results mirror the vendor `BOOLEAN` returns. When a call fails the
/// driver asks [`VendorSdk::error_code`] for details.
pub trait VendorSdk {
    /// `LibraryInit`: `Err` carries the vendor error code when no handle came back.
    fn library_init(&self, connection: ConnectionType) -> Result<SdkHandle, i32>;
    fn library_exit(&self, handle: SdkHandle) -> i32;
    /// `GetDeviceList` followed by `FreeDeviceList`. `Err` carries the enumeration
    /// error code; an empty `Ok` means the SDK found no hardware.
    fn device_list(&self, handle: SdkHandle) -> Result<Vec<CString>, i32>;
    fn open(&self, handle: SdkHandle, locator: &CStr) -> bool;
    fn close(&self, handle: SdkHandle) -> bool;
    fn start(&self, handle: SdkHandle) -> bool;
    fn stop(&self, handle: SdkHandle) -> bool;
    /// `GetSignalFormat` + `Free`: number of channels, `None` when no descriptor came back.
    fn channel_count(&self, handle: SdkHandle) -> Option<u32>;
    /// `SetSignalBuffer`: `samples` is updated with the size the SDK settled on.
    fn set_signal_buffer(&self, handle: SdkHandle, samples: &mut u32) -> bool;
    /// `GetSamples`: bytes written into `buffer`, negative on device error.
    fn get_samples(&self, handle: SdkHandle, buffer: &mut [u32]) -> i32;
    fn set_measuring_mode(
        &self,
        handle: SdkHandle,
        mode: MeasuringMode,
        limit: ImpedanceLimit,
    ) -> bool;

    fn front_end_info(&self, _handle: SdkHandle) -> Option<FrontEndInfo> {
        None
    }
    fn error_code(&self, _handle: SdkHandle) -> Option<i32> {
        None
    }
    fn error_message(&self, _handle: SdkHandle, _code: i32) -> Option<String> {
        None
    }
}

impl<T: VendorSdk + ?Sized> VendorSdk for Box<T> {
    fn library_init(&self, connection: ConnectionType) -> Result<SdkHandle, i32> {
        (**self).library_init(connection)
    }
    fn library_exit(&self, handle: SdkHandle) -> i32 {
        (**self).library_exit(handle)
    }
    fn device_list(&self, handle: SdkHandle) -> Result<Vec<CString>, i32> {
        (**self).device_list(handle)
    }
    fn open(&self, handle: SdkHandle, locator: &CStr) -> bool {
        (**self).open(handle, locator)
    }
    fn close(&self, handle: SdkHandle) -> bool {
        (**self).close(handle)
    }
    fn start(&self, handle: SdkHandle) -> bool {
        (**self).start(handle)
    }
    fn stop(&self, handle: SdkHandle) -> bool {
        (**self).stop(handle)
    }
    fn channel_count(&self, handle: SdkHandle) -> Option<u32> {
        (**self).channel_count(handle)
    }
    fn set_signal_buffer(&self, handle: SdkHandle, samples: &mut u32) -> bool {
        (**self).set_signal_buffer(handle, samples)
    }
    fn get_samples(&self, handle: SdkHandle, buffer: &mut [u32]) -> i32 {
        (**self).get_samples(handle, buffer)
    }
    fn set_measuring_mode(
        &self,
        handle: SdkHandle,
        mode: MeasuringMode,
        limit: ImpedanceLimit,
    ) -> bool {
        (**self).set_measuring_mode(handle, mode, limit)
    }
    fn front_end_info(&self, handle: SdkHandle) -> Option<FrontEndInfo> {
        (**self).front_end_info(handle)
    }
    fn error_code(&self, handle: SdkHandle) -> Option<i32> {
        (**self).error_code(handle)
    }
    fn error_message(&self, handle: SdkHandle, code: i32) -> Option<String> {
        (**self).error_message(handle, code)
    }
}
