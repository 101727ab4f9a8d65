use std::collections::VecDeque;
use std::ffi::{c_void, CStr, CString};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{
    ConnectionType, FrontEndInfo, ImpedanceLimit, MeasuringMode, SdkHandle, VendorSdk,
    SAMPLE_WIDTH_BYTES,
};

/// Vendor call observed by a [`MockSdk`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    LibraryInit(ConnectionType),
    LibraryExit,
    DeviceList,
    Open(String),
    Close,
    Start,
    Stop,
    SignalFormat,
    SetSignalBuffer(u32),
    GetSamples { capacity_bytes: usize },
    SetMeasuringMode(MeasuringMode, ImpedanceLimit),
    /// The mock was dropped, i.e. the "library" was unloaded.
    Unload,
}

/// Scripted outcome of one `GetSamples` call.
#[derive(Clone, Debug)]
pub enum MockRead {
    /// Copies the words into the caller's buffer and reports their byte count.
    Data(Vec<u32>),
    Empty,
    Error(i32),
}

/// Shared view of the calls a [`MockSdk`] received, usable after the mock
/// has been moved into a driver.
#[derive(Clone, Debug, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    fn lock(&self) -> MutexGuard<'_, Vec<Call>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, call: Call) {
        self.lock().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.lock().iter().filter(|c| pred(c)).count()
    }

    pub fn contains(&self, call: &Call) -> bool {
        self.lock().contains(call)
    }
}

/// In-memory vendor SDK for tests and host-side development without hardware.
pub struct MockSdk {
    log: CallLog,
    init_error: Option<i32>,
    devices: Result<Vec<String>, i32>,
    open_ok: bool,
    channels: Option<u32>,
    negotiated_samples: Option<u32>,
    buffer_ok: bool,
    start_ok: bool,
    stop_ok: bool,
    mode_ok: bool,
    error_code: i32,
    front_end: Option<FrontEndInfo>,
    reads: Mutex<VecDeque<MockRead>>,
}

impl Default for MockSdk {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSdk {
    /// One device (`USB:0001`), four channels, every call succeeding.
    pub fn new() -> Self {
        Self {
            log: CallLog::default(),
            init_error: None,
            devices: Ok(vec!["USB:0001".to_string()]),
            open_ok: true,
            channels: Some(4),
            negotiated_samples: None,
            buffer_ok: true,
            start_ok: true,
            stop_ok: true,
            mode_ok: true,
            error_code: 0,
            front_end: None,
            reads: Mutex::new(VecDeque::new()),
        }
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    pub fn failing_init(mut self, code: i32) -> Self {
        self.init_error = Some(code);
        self
    }

    pub fn with_devices(mut self, devices: &[&str]) -> Self {
        self.devices = Ok(devices.iter().map(|d| d.to_string()).collect());
        self
    }

    pub fn with_enumeration_error(mut self, code: i32) -> Self {
        self.devices = Err(code);
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.open_ok = false;
        self
    }

    pub fn with_channels(mut self, channels: Option<u32>) -> Self {
        self.channels = channels;
        self
    }

    /// Makes `SetSignalBuffer` settle on `samples` regardless of the request.
    pub fn negotiating_to(mut self, samples: u32) -> Self {
        self.negotiated_samples = Some(samples);
        self
    }

    pub fn rejecting_buffer(mut self) -> Self {
        self.buffer_ok = false;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.start_ok = false;
        self
    }

    pub fn failing_stop(mut self) -> Self {
        self.stop_ok = false;
        self
    }

    pub fn failing_mode_switch(mut self) -> Self {
        self.mode_ok = false;
        self
    }

    /// Value reported by `GetErrorCode` after a failed call.
    pub fn with_error_code(mut self, code: i32) -> Self {
        self.error_code = code;
        self
    }

    pub fn with_front_end(mut self, info: FrontEndInfo) -> Self {
        self.front_end = Some(info);
        self
    }

    /// Queues `GetSamples` outcomes; once exhausted every read returns zero bytes.
    pub fn with_reads(self, reads: impl IntoIterator<Item = MockRead>) -> Self {
        self.reads
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend(reads);
        self
    }
}

impl VendorSdk for MockSdk {
    fn library_init(&self, connection: ConnectionType) -> Result<SdkHandle, i32> {
        self.log.push(Call::LibraryInit(connection));
        match self.init_error {
            Some(code) => Err(code),
            None => SdkHandle::from_raw(std::ptr::NonNull::<c_void>::dangling().as_ptr()).ok_or(0),
        }
    }

    fn library_exit(&self, _handle: SdkHandle) -> i32 {
        self.log.push(Call::LibraryExit);
        0
    }

    fn device_list(&self, _handle: SdkHandle) -> Result<Vec<CString>, i32> {
        self.log.push(Call::DeviceList);
        let devices = self.devices.clone()?;
        Ok(devices
            .into_iter()
            .filter_map(|d| CString::new(d).ok())
            .collect())
    }

    fn open(&self, _handle: SdkHandle, locator: &CStr) -> bool {
        self.log
            .push(Call::Open(locator.to_string_lossy().into_owned()));
        self.open_ok
    }

    fn close(&self, _handle: SdkHandle) -> bool {
        self.log.push(Call::Close);
        true
    }

    fn start(&self, _handle: SdkHandle) -> bool {
        self.log.push(Call::Start);
        self.start_ok
    }

    fn stop(&self, _handle: SdkHandle) -> bool {
        self.log.push(Call::Stop);
        self.stop_ok
    }

    fn channel_count(&self, _handle: SdkHandle) -> Option<u32> {
        self.log.push(Call::SignalFormat);
        self.channels
    }

    fn set_signal_buffer(&self, _handle: SdkHandle, samples: &mut u32) -> bool {
        self.log.push(Call::SetSignalBuffer(*samples));
        if !self.buffer_ok {
            return false;
        }
        if let Some(negotiated) = self.negotiated_samples {
            *samples = negotiated;
        }
        true
    }

    fn get_samples(&self, _handle: SdkHandle, buffer: &mut [u32]) -> i32 {
        self.log.push(Call::GetSamples {
            capacity_bytes: buffer.len() * SAMPLE_WIDTH_BYTES,
        });
        let next = self
            .reads
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();
        match next {
            Some(MockRead::Data(words)) => {
                let n = words.len().min(buffer.len());
                buffer[..n].copy_from_slice(&words[..n]);
                (n * SAMPLE_WIDTH_BYTES) as i32
            }
            Some(MockRead::Error(code)) => code,
            Some(MockRead::Empty) | None => 0,
        }
    }

    fn set_measuring_mode(
        &self,
        _handle: SdkHandle,
        mode: MeasuringMode,
        limit: ImpedanceLimit,
    ) -> bool {
        self.log.push(Call::SetMeasuringMode(mode, limit));
        self.mode_ok
    }

    fn front_end_info(&self, _handle: SdkHandle) -> Option<FrontEndInfo> {
        self.front_end
    }

    fn error_code(&self, _handle: SdkHandle) -> Option<i32> {
        Some(self.error_code)
    }

    fn error_message(&self, _handle: SdkHandle, code: i32) -> Option<String> {
        (code != 0).then(|| format!("mock error {code}"))
    }
}

impl Drop for MockSdk {
    fn drop(&mut self) {
        self.log.push(Call::Unload);
    }
}
