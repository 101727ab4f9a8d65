use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::path::Path;

use libloading::Library;
use log::{debug, warn};

use super::{
    ConnectionType, FrontEndInfo, ImpedanceLimit, MeasuringMode, SdkHandle, VendorSdk,
    SAMPLE_WIDTH_BYTES,
};
use crate::error::DriverError;

type Handle = *mut c_void;
type Boolean = u8;

type FnOpen = unsafe extern "system" fn(Handle, *const c_char) -> Boolean;
type FnHandleOnly = unsafe extern "system" fn(Handle) -> Boolean;
type FnSetSignalBuffer = unsafe extern "system" fn(Handle, *mut u32, *mut u32) -> Boolean;
type FnGetSamples = unsafe extern "system" fn(Handle, *mut u32, u32) -> i32;
type FnGetSignalFormat = unsafe extern "system" fn(Handle, *mut c_char) -> *mut SignalFormatHeader;
type FnFree = unsafe extern "system" fn(*mut c_void) -> Boolean;
type FnLibraryInit = unsafe extern "system" fn(c_int, *mut c_int) -> Handle;
type FnLibraryExit = unsafe extern "system" fn(Handle) -> c_int;
type FnGetDeviceList = unsafe extern "system" fn(Handle, *mut c_int) -> *mut *mut c_char;
type FnFreeDeviceList = unsafe extern "system" fn(Handle, c_int, *mut *mut c_char);
type FnSetMeasuringMode = unsafe extern "system" fn(Handle, u32, c_int) -> Boolean;
type FnGetFrontEndInfo = unsafe extern "system" fn(Handle, *mut RawFrontEndInfo) -> Boolean;
type FnGetErrorCode = unsafe extern "system" fn(Handle) -> c_int;
type FnGetErrorCodeMessage = unsafe extern "system" fn(Handle, c_int) -> *const c_char;
type RawEntry = unsafe extern "system" fn();

/// Leading fields of `SIGNAL_FORMAT`; only these are read before the descriptor is freed.
#[allow(dead_code)]
#[repr(C)]
struct SignalFormatHeader {
    size: u32,
    elements: u32,
}

#[allow(dead_code)]
#[repr(C)]
#[derive(Default)]
struct RawFrontEndInfo {
    nr_of_channels: u16,
    sample_rate_setting: u16,
    mode: u16,
    max_rs232: u16,
    serial: u32,
    nr_exg: u16,
    nr_aux: u16,
    hw_version: u16,
    sw_version: u16,
    rec_buf_size: u16,
    send_buf_size: u16,
    nr_of_sw_channels: u16,
    base_sf: u16,
    power: u16,
    check: u16,
}

/// Entry points resolved for reporting only; the driver does not call them.
const AUXILIARY_ENTRY_POINTS: [&str; 8] = [
    "SetRtcTime",
    "GetRtcTime",
    "SetRtcAlarmTime",
    "GetRtcAlarmTime",
    "GetConnectionProperties",
    "SetRefCalculation",
    "GetBufferInfo",
    "OpenFirstDevice",
];

/// Loaded TMSiSDK.dll together with its resolved entry points.
///
/// Every instance owns its own library handle and pointer table, so two
/// drivers never overwrite each other's entry points. Dropping the value
/// unloads the library.
pub struct TmsiLibrary {
    open: FnOpen,
    close: FnHandleOnly,
    start: FnHandleOnly,
    stop: FnHandleOnly,
    set_signal_buffer: FnSetSignalBuffer,
    get_samples: FnGetSamples,
    get_signal_format: FnGetSignalFormat,
    free: FnFree,
    library_init: FnLibraryInit,
    library_exit: FnLibraryExit,
    get_device_list: FnGetDeviceList,
    set_measuring_mode: FnSetMeasuringMode,
    free_device_list: Option<FnFreeDeviceList>,
    get_front_end_info: Option<FnGetFrontEndInfo>,
    get_error_code: Option<FnGetErrorCode>,
    get_error_code_message: Option<FnGetErrorCodeMessage>,
    // Declared last: the pointers above are only valid while this is alive.
    #[allow(dead_code)]
    lib: Library,
}

unsafe fn required<T: Copy>(lib: &Library, name: &'static str) -> Result<T, DriverError> {
    let symbol = format!("{name}\0");
    lib.get::<T>(symbol.as_bytes())
        .map(|s| *s)
        .map_err(|source| DriverError::MissingSymbol { name, source })
}

unsafe fn optional<T: Copy>(lib: &Library, name: &'static str) -> Option<T> {
    let symbol = format!("{name}\0");
    match lib.get::<T>(symbol.as_bytes()) {
        Ok(s) => Some(*s),
        Err(_) => {
            warn!("{name} is not exported by the TMSi SDK");
            None
        }
    }
}

impl TmsiLibrary {
    /// Loads the vendor DLL and resolves its entry points.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DriverError> {
        let path = path.as_ref().to_path_buf();
        // Safety: loading runs the DLL's initializers; TMSiSDK.dll has none we depend on.
        let lib = unsafe { Library::new(&path) }.map_err(|source| DriverError::LibraryLoad {
            path: path.clone(),
            source,
        })?;
        debug!("loaded {}", path.display());
        // Safety: signatures follow TmsiSDK.h; every pointer stays tied to `lib`.
        unsafe {
            let resolved = AUXILIARY_ENTRY_POINTS
                .iter()
                .filter(|&&name| optional::<RawEntry>(&lib, name).is_some())
                .count();
            debug!(
                "{resolved} of {} auxiliary entry points resolved",
                AUXILIARY_ENTRY_POINTS.len()
            );
            Ok(Self {
                open: required(&lib, "Open")?,
                close: required(&lib, "Close")?,
                start: required(&lib, "Start")?,
                stop: required(&lib, "Stop")?,
                set_signal_buffer: required(&lib, "SetSignalBuffer")?,
                get_samples: required(&lib, "GetSamples")?,
                get_signal_format: required(&lib, "GetSignalFormat")?,
                free: required(&lib, "Free")?,
                library_init: required(&lib, "LibraryInit")?,
                library_exit: required(&lib, "LibraryExit")?,
                get_device_list: required(&lib, "GetDeviceList")?,
                set_measuring_mode: required(&lib, "SetMeasuringMode")?,
                free_device_list: optional(&lib, "FreeDeviceList"),
                get_front_end_info: optional(&lib, "GetFrontEndInfo"),
                get_error_code: optional(&lib, "GetErrorCode"),
                get_error_code_message: optional(&lib, "GetErrorCodeMessage"),
                lib,
            })
        }
    }
}

impl VendorSdk for TmsiLibrary {
    fn library_init(&self, connection: ConnectionType) -> Result<SdkHandle, i32> {
        let mut code: c_int = 0;
        let raw = unsafe { (self.library_init)(connection as c_int, &mut code as *mut c_int) };
        SdkHandle::from_raw(raw).ok_or(code)
    }

    fn library_exit(&self, handle: SdkHandle) -> i32 {
        unsafe { (self.library_exit)(handle.as_raw()) }
    }

    fn device_list(&self, handle: SdkHandle) -> Result<Vec<CString>, i32> {
        let mut count: c_int = 0;
        let list = unsafe { (self.get_device_list)(handle.as_raw(), &mut count as *mut c_int) };
        if list.is_null() {
            return match self.error_code(handle) {
                Some(code) if code != 0 => Err(code),
                _ => Ok(Vec::new()),
            };
        }
        let mut locators = Vec::with_capacity(count.max(0) as usize);
        for i in 0..count.max(0) as usize {
            // Safety: the SDK returns `count` entries, each a NUL-terminated string or null.
            let entry = unsafe { *list.add(i) };
            if !entry.is_null() {
                locators.push(unsafe { CStr::from_ptr(entry) }.to_owned());
            }
        }
        match self.free_device_list {
            Some(free_list) => unsafe { free_list(handle.as_raw(), count, list) },
            None => warn!("device list of {count} entries left to the SDK"),
        }
        Ok(locators)
    }

    fn open(&self, handle: SdkHandle, locator: &CStr) -> bool {
        unsafe { (self.open)(handle.as_raw(), locator.as_ptr()) != 0 }
    }

    fn close(&self, handle: SdkHandle) -> bool {
        unsafe { (self.close)(handle.as_raw()) != 0 }
    }

    fn start(&self, handle: SdkHandle) -> bool {
        unsafe { (self.start)(handle.as_raw()) != 0 }
    }

    fn stop(&self, handle: SdkHandle) -> bool {
        unsafe { (self.stop)(handle.as_raw()) != 0 }
    }

    fn channel_count(&self, handle: SdkHandle) -> Option<u32> {
        let format = unsafe { (self.get_signal_format)(handle.as_raw(), std::ptr::null_mut()) };
        if format.is_null() {
            return None;
        }
        // The descriptor belongs to the SDK and must not be touched after `Free`.
        let elements = unsafe { (*format).elements };
        unsafe { (self.free)(format.cast()) };
        Some(elements)
    }

    fn set_signal_buffer(&self, handle: SdkHandle, samples: &mut u32) -> bool {
        unsafe {
            (self.set_signal_buffer)(handle.as_raw(), std::ptr::null_mut(), samples as *mut u32)
                != 0
        }
    }

    fn get_samples(&self, handle: SdkHandle, buffer: &mut [u32]) -> i32 {
        let bytes = u32::try_from(buffer.len() * SAMPLE_WIDTH_BYTES).unwrap_or(u32::MAX);
        unsafe { (self.get_samples)(handle.as_raw(), buffer.as_mut_ptr(), bytes) }
    }

    fn set_measuring_mode(
        &self,
        handle: SdkHandle,
        mode: MeasuringMode,
        limit: ImpedanceLimit,
    ) -> bool {
        unsafe { (self.set_measuring_mode)(handle.as_raw(), mode as u32, limit as c_int) != 0 }
    }

    fn front_end_info(&self, handle: SdkHandle) -> Option<FrontEndInfo> {
        let get = self.get_front_end_info?;
        let mut raw = RawFrontEndInfo::default();
        if unsafe { get(handle.as_raw(), &mut raw as *mut RawFrontEndInfo) } == 0 {
            return None;
        }
        Some(FrontEndInfo {
            serial: raw.serial,
            channels: raw.nr_of_channels,
            base_sample_rate_hz: raw.base_sf,
            hardware_version: raw.hw_version,
            software_version: raw.sw_version,
        })
    }

    fn error_code(&self, handle: SdkHandle) -> Option<i32> {
        let get = self.get_error_code?;
        Some(unsafe { get(handle.as_raw()) })
    }

    fn error_message(&self, handle: SdkHandle, code: i32) -> Option<String> {
        let get = self.get_error_code_message?;
        let message = unsafe { get(handle.as_raw(), code) };
        if message.is_null() {
            return None;
        }
        Some(unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_library_is_a_load_error() {
        let err = TmsiLibrary::load("definitely-not-TMSiSDK.dll").err().unwrap();
        match err {
            DriverError::LibraryLoad { path, .. } => {
                assert_eq!(path, std::path::PathBuf::from("definitely-not-TMSiSDK.dll"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(target_os = "linux")]
    const FOREIGN_LIBRARY: &str = "libc.so.6";
    #[cfg(target_os = "macos")]
    const FOREIGN_LIBRARY: &str = "/usr/lib/libSystem.B.dylib";
    #[cfg(windows)]
    const FOREIGN_LIBRARY: &str = "kernel32.dll";

    #[test]
    fn library_without_vendor_exports_names_the_first_missing_symbol() {
        match TmsiLibrary::load(FOREIGN_LIBRARY) {
            Err(DriverError::MissingSymbol { name, .. }) => assert_eq!(name, "Open"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("{FOREIGN_LIBRARY} resolved the TMSi entry points"),
        }
    }

    #[test]
    fn front_end_info_layout_matches_vendor_struct() {
        assert_eq!(std::mem::size_of::<RawFrontEndInfo>(), 32);
        assert_eq!(std::mem::size_of::<SignalFormatHeader>(), 8);
    }
}
