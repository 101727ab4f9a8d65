//! Flat C surface over [`RefaDriver`].
//!
//! Instances are opaque `RtDeviceEx*` tokens that are never dereferenced.
//! Each token is drawn from a counter and never reused, and the registry
//! owns the instance behind it, so calls with a stale, foreign or already
//! destroyed pointer fail with [`RtStatus::InvalidHandle`] instead of
//! touching freed memory. Failures are reported as negative [`RtStatus`]
//! codes; the message of the last failure on the calling thread is available
//! through `RTDevice_LastErrorMessage`.
#![allow(non_snake_case)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{error, info};
use once_cell::sync::Lazy;

use crate::config::DriverConfig;
use crate::driver::RefaDriver;
use crate::error::DriverError;
use crate::sdk::{TmsiLibrary, VendorSdk};

type DynDriver = RefaDriver<Box<dyn VendorSdk + Send>>;

/// Vendor `BOOLEAN`.
pub type Boolean = u8;

#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RtStatus {
    Ok = 0,
    LibraryLoad = -1,
    MissingSymbol = -2,
    SdkInit = -3,
    Enumeration = -4,
    NoDevice = -5,
    Open = -6,
    SignalFormat = -7,
    BufferNegotiation = -8,
    Allocation = -9,
    AcquisitionStart = -10,
    AcquisitionStop = -11,
    ModeSwitch = -12,
    NoData = -13,
    ReadFailed = -14,
    InvalidState = -15,
    NotConfigured = -16,
    InvalidHandle = -17,
    InvalidArgument = -18,
    BufferTooSmall = -19,
    Config = -20,
    Panic = -21,
}

impl From<&DriverError> for RtStatus {
    fn from(err: &DriverError) -> Self {
        match err {
            DriverError::LibraryLoad { .. } => Self::LibraryLoad,
            DriverError::MissingSymbol { .. } => Self::MissingSymbol,
            DriverError::SdkInit { .. } => Self::SdkInit,
            DriverError::Enumeration { .. } => Self::Enumeration,
            DriverError::NoDevice => Self::NoDevice,
            DriverError::Open { .. } => Self::Open,
            DriverError::SignalFormat { .. } => Self::SignalFormat,
            DriverError::BufferNegotiation { .. } => Self::BufferNegotiation,
            DriverError::Allocation { .. } => Self::Allocation,
            DriverError::AcquisitionStart { .. } => Self::AcquisitionStart,
            DriverError::AcquisitionStop { .. } => Self::AcquisitionStop,
            DriverError::ModeSwitch { .. } => Self::ModeSwitch,
            DriverError::NoData { .. } => Self::NoData,
            DriverError::ReadFailed { .. } => Self::ReadFailed,
            DriverError::InvalidState { .. } => Self::InvalidState,
            DriverError::NotConfigured => Self::NotConfigured,
        }
    }
}

/// Opaque device object behind the exported pointer.
pub struct RtDeviceEx {
    driver: DynDriver,
}

impl RtDeviceEx {
    /// Hands `driver` to the registry and returns the token C callers use.
    pub fn register(driver: DynDriver) -> *mut RtDeviceEx {
        let token = NEXT_TOKEN.fetch_add(TOKEN_STRIDE, Ordering::Relaxed);
        registry().insert(token, Arc::new(Mutex::new(RtDeviceEx { driver })));
        token as *mut RtDeviceEx
    }
}

// Tokens look like aligned pointers to C callers and never repeat.
const TOKEN_STRIDE: usize = 16;
static NEXT_TOKEN: AtomicUsize = AtomicUsize::new(0x1000);

// The registry lock only guards lookups; calls run under the device's own lock.
type SharedDevice = Arc<Mutex<RtDeviceEx>>;

static DEVICES: Lazy<Mutex<HashMap<usize, SharedDevice>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

thread_local! {
    static LAST_ERROR: RefCell<(RtStatus, String)> = RefCell::new((RtStatus::Ok, String::new()));
}

fn registry() -> MutexGuard<'static, HashMap<usize, SharedDevice>> {
    DEVICES.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn lookup(device: *mut RtDeviceEx) -> Option<SharedDevice> {
    registry().get(&(device as usize)).cloned()
}

fn set_last_error(status: RtStatus, message: String) {
    if status != RtStatus::Ok {
        error!("{message} (status {})", status as i32);
    }
    LAST_ERROR.with(|last| *last.borrow_mut() = (status, message));
}

fn fail(err: &DriverError) -> RtStatus {
    let status = RtStatus::from(err);
    set_last_error(status, err.to_string());
    status
}

/// Runs `f` against the registered device, converting panics and unknown
/// pointers into status codes.
fn with_device<T>(
    device: *mut RtDeviceEx,
    f: impl FnOnce(&mut DynDriver) -> Result<T, RtStatus>,
) -> Result<T, RtStatus> {
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let Some(shared) = lookup(device) else {
            set_last_error(
                RtStatus::InvalidHandle,
                format!("{device:p} is not a live RTDeviceEx"),
            );
            return Err(RtStatus::InvalidHandle);
        };
        let mut entry = shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut entry.driver)
    }));
    match outcome {
        Ok(result) => {
            if result.is_ok() {
                set_last_error(RtStatus::Ok, String::new());
            }
            result
        }
        Err(_) => {
            set_last_error(RtStatus::Panic, "panic inside RTDevice call".to_string());
            Err(RtStatus::Panic)
        }
    }
}

fn status_code(result: Result<(), RtStatus>) -> i32 {
    match result {
        Ok(()) => RtStatus::Ok as i32,
        Err(status) => status as i32,
    }
}

fn open_from_env() -> Result<DynDriver, RtStatus> {
    let config = DriverConfig::from_env().map_err(|err| {
        set_last_error(RtStatus::Config, format!("{err:#}"));
        RtStatus::Config
    })?;
    let sdk = TmsiLibrary::load(&config.library_path).map_err(|err| fail(&err))?;
    RefaDriver::connect(Box::new(sdk) as Box<dyn VendorSdk + Send>, config)
        .map_err(|err| fail(&err))
}

/// Loads the SDK, opens the first device and returns the new instance, or
/// null on failure (see `RTDevice_LastError`).
#[no_mangle]
pub extern "C" fn CreateRTDeviceEx() -> *mut RtDeviceEx {
    let _ = env_logger::try_init();
    match catch_unwind(open_from_env) {
        Ok(Ok(driver)) => {
            set_last_error(RtStatus::Ok, String::new());
            let device = RtDeviceEx::register(driver);
            info!("created RTDeviceEx {device:p}");
            device
        }
        Ok(Err(_)) => std::ptr::null_mut(),
        Err(_) => {
            set_last_error(RtStatus::Panic, "panic while creating RTDeviceEx".to_string());
            std::ptr::null_mut()
        }
    }
}

/// Releases an instance. Null, unknown and already destroyed pointers are ignored.
///
/// A call still running on another thread keeps the instance alive until it
/// returns.
#[no_mangle]
pub extern "C" fn DestroyRTDeviceEx(device: *mut RtDeviceEx) {
    let removed = registry().remove(&(device as usize));
    match removed {
        Some(instance) => {
            if catch_unwind(AssertUnwindSafe(move || drop(instance))).is_err() {
                set_last_error(RtStatus::Panic, "panic while destroying RTDeviceEx".to_string());
            } else {
                info!("destroyed RTDeviceEx {device:p}");
            }
        }
        None if device.is_null() => {}
        None => set_last_error(
            RtStatus::InvalidHandle,
            format!("{device:p} is not a live RTDeviceEx"),
        ),
    }
}

#[no_mangle]
pub extern "C" fn RTDevice_Start(device: *mut RtDeviceEx) -> Boolean {
    with_device(device, |driver| driver.start().map_err(|err| fail(&err))).is_ok() as Boolean
}

#[no_mangle]
pub extern "C" fn RTDevice_Stop(device: *mut RtDeviceEx) -> Boolean {
    with_device(device, |driver| driver.stop().map_err(|err| fail(&err))).is_ok() as Boolean
}

#[no_mangle]
pub extern "C" fn RTDevice_InitiateImpedanceDataMode(device: *mut RtDeviceEx) -> i32 {
    status_code(with_device(device, |driver| {
        driver
            .initiate_impedance_data_mode()
            .map_err(|err| fail(&err))
    }))
}

/// Channel count of the configured impedance mode, or a negative status.
#[no_mangle]
pub extern "C" fn RTDevice_GetChannelCount(device: *mut RtDeviceEx) -> i32 {
    match with_device(device, |driver| {
        driver
            .channel_count()
            .ok_or_else(|| fail(&DriverError::NotConfigured))
    }) {
        Ok(channels) => i32::try_from(channels).unwrap_or(i32::MAX),
        Err(status) => status as i32,
    }
}

/// Copies the latest impedance word of every channel into `out`.
///
/// `written` (optional) receives the number of words the read delivered,
/// which is below the channel count after a short read. It is also set when
/// `capacity` is too small, in which case nothing is copied.
///
/// # Safety
/// `out` must be valid for `capacity` writes of `u32`; `written` must be null
/// or valid for one write.
#[no_mangle]
pub unsafe extern "C" fn RTDevice_GetImpedances(
    device: *mut RtDeviceEx,
    out: *mut u32,
    capacity: u32,
    written: *mut u32,
) -> i32 {
    if out.is_null() {
        set_last_error(RtStatus::InvalidArgument, "output array is null".to_string());
        return RtStatus::InvalidArgument as i32;
    }
    status_code(with_device(device, |driver| {
        let buffer = driver.get_impedances().map_err(|err| fail(&err))?;
        let latest = buffer.latest();
        if !written.is_null() {
            unsafe { *written = latest.len() as u32 };
        }
        if latest.len() > capacity as usize {
            set_last_error(
                RtStatus::BufferTooSmall,
                format!("{} channels do not fit into {capacity}", latest.len()),
            );
            return Err(RtStatus::BufferTooSmall);
        }
        unsafe { std::ptr::copy_nonoverlapping(latest.as_ptr(), out, latest.len()) };
        Ok(())
    }))
}

/// Status of the last failed call on this thread, 0 after a success.
#[no_mangle]
pub extern "C" fn RTDevice_LastError() -> i32 {
    LAST_ERROR.with(|last| last.borrow().0 as i32)
}

/// Copies the last error message as a NUL-terminated UTF-8 string, truncated
/// to `len - 1` bytes. Returns the untruncated length without the NUL.
///
/// # Safety
/// `buf` must be null or valid for `len` writes.
#[no_mangle]
pub unsafe extern "C" fn RTDevice_LastErrorMessage(buf: *mut c_char, len: u32) -> u32 {
    LAST_ERROR.with(|last| {
        let last = last.borrow();
        let message = last.1.as_bytes();
        if !buf.is_null() && len > 0 {
            let n = message.len().min(len as usize - 1);
            unsafe {
                std::ptr::copy_nonoverlapping(message.as_ptr().cast::<c_char>(), buf, n);
                *buf.add(n) = 0;
            }
        }
        u32::try_from(message.len()).unwrap_or(u32::MAX)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::mock::{Call, CallLog, MockRead};
    use crate::sdk::MockSdk;

    fn register(sdk: MockSdk) -> (*mut RtDeviceEx, CallLog) {
        let log = sdk.log();
        let config = DriverConfig {
            read_retries: 0,
            ..DriverConfig::default()
        };
        let driver = RefaDriver::connect(Box::new(sdk) as Box<dyn VendorSdk + Send>, config)
            .unwrap();
        (RtDeviceEx::register(driver), log)
    }

    fn last_message() -> String {
        let mut buf = vec![0 as c_char; 256];
        let len = unsafe { RTDevice_LastErrorMessage(buf.as_mut_ptr(), buf.len() as u32) };
        let bytes: Vec<u8> = buf[..len.min(255) as usize].iter().map(|&c| c as u8).collect();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn create_without_sdk_reports_library_load() {
        let device = CreateRTDeviceEx();
        assert!(device.is_null());
        assert_eq!(RTDevice_LastError(), RtStatus::LibraryLoad as i32);
        assert!(last_message().starts_with("Cannot open the driver DLL"));
    }

    #[test]
    fn unknown_pointers_are_rejected() {
        assert_eq!(RTDevice_Start(std::ptr::null_mut()), 0);
        assert_eq!(RTDevice_LastError(), RtStatus::InvalidHandle as i32);
        let bogus = 0x18 as *mut RtDeviceEx;
        assert_eq!(
            RTDevice_InitiateImpedanceDataMode(bogus),
            RtStatus::InvalidHandle as i32
        );
        DestroyRTDeviceEx(std::ptr::null_mut());
    }

    #[test]
    fn impedances_flow_through_the_c_surface() {
        let (device, _log) = register(
            MockSdk::new()
                .with_channels(Some(3))
                .with_reads([MockRead::Data(vec![4, 18, 255])]),
        );
        assert_eq!(RTDevice_InitiateImpedanceDataMode(device), 0);
        assert_eq!(RTDevice_GetChannelCount(device), 3);
        let mut out = [0u32; 8];
        let mut written = 0u32;
        let status =
            unsafe { RTDevice_GetImpedances(device, out.as_mut_ptr(), 8, &mut written) };
        assert_eq!(status, 0);
        assert_eq!(written, 3);
        assert_eq!(&out[..3], &[4, 18, 255]);
        assert_eq!(RTDevice_LastError(), 0);
        DestroyRTDeviceEx(device);
    }

    #[test]
    fn impedances_before_mode_setup_return_not_configured() {
        let (device, log) = register(MockSdk::new());
        let mut out = [0u32; 4];
        let status =
            unsafe { RTDevice_GetImpedances(device, out.as_mut_ptr(), 4, std::ptr::null_mut()) };
        assert_eq!(status, RtStatus::NotConfigured as i32);
        assert_eq!(RTDevice_GetChannelCount(device), RtStatus::NotConfigured as i32);
        assert_eq!(log.count(|c| matches!(c, Call::GetSamples { .. })), 0);
        DestroyRTDeviceEx(device);
    }

    #[test]
    fn small_output_array_reports_required_length() {
        let (device, _log) = register(
            MockSdk::new().with_reads([MockRead::Data(vec![1, 2, 3, 4])]),
        );
        assert_eq!(RTDevice_InitiateImpedanceDataMode(device), 0);
        let mut out = [0u32; 2];
        let mut written = 0u32;
        let status =
            unsafe { RTDevice_GetImpedances(device, out.as_mut_ptr(), 2, &mut written) };
        assert_eq!(status, RtStatus::BufferTooSmall as i32);
        assert_eq!(written, 4);
        assert_eq!(out, [0, 0]);
        DestroyRTDeviceEx(device);
    }

    #[test]
    fn zero_byte_read_has_its_own_status() {
        let (device, _log) = register(MockSdk::new());
        assert_eq!(RTDevice_InitiateImpedanceDataMode(device), 0);
        let mut out = [0u32; 4];
        let status =
            unsafe { RTDevice_GetImpedances(device, out.as_mut_ptr(), 4, std::ptr::null_mut()) };
        assert_eq!(status, RtStatus::NoData as i32);
        DestroyRTDeviceEx(device);
    }

    #[test]
    fn start_and_stop_report_booleans() {
        let (device, log) = register(MockSdk::new());
        assert_eq!(RTDevice_Start(device), 0);
        assert_eq!(RTDevice_LastError(), RtStatus::NotConfigured as i32);
        assert_eq!(RTDevice_InitiateImpedanceDataMode(device), 0);
        assert_eq!(RTDevice_Stop(device), 1);
        assert_eq!(RTDevice_Start(device), 1);
        assert_eq!(log.count(|c| *c == Call::Start), 2);
        DestroyRTDeviceEx(device);
    }

    #[test]
    fn double_destroy_releases_library_once() {
        let (device, log) = register(MockSdk::new());
        DestroyRTDeviceEx(device);
        DestroyRTDeviceEx(device);
        assert_eq!(RTDevice_LastError(), RtStatus::InvalidHandle as i32);
        assert_eq!(log.count(|c| *c == Call::Unload), 1);
        assert_eq!(log.count(|c| *c == Call::LibraryExit), 1);
        assert_eq!(RTDevice_Stop(device), 0);
        assert_eq!(RTDevice_LastError(), RtStatus::InvalidHandle as i32);
    }

    #[test]
    fn a_busy_device_does_not_block_another() {
        let (first, _first_log) = register(MockSdk::new());
        let (second, _second_log) = register(MockSdk::new());
        let (first_token, second_token) = (first as usize, second as usize);
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let nested = with_device(first_token as *mut RtDeviceEx, |_| {
                Ok(RTDevice_GetChannelCount(second_token as *mut RtDeviceEx))
            });
            let _ = tx.send(nested);
        });
        let nested = rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("call on the second device stalled behind the first");
        assert_eq!(nested, Ok(RtStatus::NotConfigured as i32));
        DestroyRTDeviceEx(first);
        DestroyRTDeviceEx(second);
    }

    #[test]
    fn last_error_message_is_truncated_and_terminated() {
        set_last_error(RtStatus::NoDevice, "No TMSi device found".to_string());
        let mut buf = [0x7f as c_char; 8];
        let len = unsafe { RTDevice_LastErrorMessage(buf.as_mut_ptr(), 5) };
        assert_eq!(len, 20);
        let copied: Vec<u8> = buf[..5].iter().map(|&c| c as u8).collect();
        assert_eq!(copied, b"No T\0");
        assert_eq!(buf[5], 0x7f);

        let len = unsafe { RTDevice_LastErrorMessage(buf.as_mut_ptr(), 0) };
        assert_eq!(len, 20);
        assert_eq!(buf[0], b'N' as c_char);
        assert_eq!(unsafe { RTDevice_LastErrorMessage(std::ptr::null_mut(), 8) }, 20);

        let len = unsafe { RTDevice_LastErrorMessage(buf.as_mut_ptr(), 1) };
        assert_eq!(len, 20);
        assert_eq!(buf[0], 0);
    }

    #[test]
    fn status_codes_follow_the_error_taxonomy() {
        assert_eq!(RtStatus::from(&DriverError::NoDevice), RtStatus::NoDevice);
        assert_eq!(
            RtStatus::from(&DriverError::NoData { attempts: 1 }),
            RtStatus::NoData
        );
        assert_eq!(
            RtStatus::from(&DriverError::ReadFailed { code: -1 }),
            RtStatus::ReadFailed
        );
        assert_eq!(RtStatus::from(&DriverError::ModeSwitch { code: 0 }), RtStatus::ModeSwitch);
    }
}
