use std::ffi::{CStr, CString};

use log::{debug, info, warn};

use crate::buffer::SampleBuffer;
use crate::config::DriverConfig;
use crate::error::DriverError;
use crate::impedance::ImpedanceFrame;
use crate::sdk::{FrontEndInfo, MeasuringMode, SdkHandle, TmsiLibrary, VendorSdk};

/// Lifecycle of a [`RefaDriver`]. Transitions only move forward, except that
/// [`RefaDriver::stop`] returns an acquiring driver to `ModeConfigured`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverState {
    Uninitialized,
    Initializing,
    Ready,
    ModeConfigured,
    Acquiring,
}

/// Owns one TMSi acquisition session: the vendor library, the device
/// handle and the sample buffer.
pub struct RefaDriver<S: VendorSdk> {
    config: DriverConfig,
    state: DriverState,
    handle: Option<SdkHandle>,
    device: Option<CString>,
    front_end: Option<FrontEndInfo>,
    buffer: Option<SampleBuffer>,
    sdk: S,
}

impl RefaDriver<TmsiLibrary> {
    /// Loads the DLL named by `config` and opens the first device it reports.
    pub fn open(config: DriverConfig) -> Result<Self, DriverError> {
        let sdk = TmsiLibrary::load(&config.library_path)?;
        Self::connect(sdk, config)
    }
}

impl<S: VendorSdk> RefaDriver<S> {
    pub fn new(sdk: S, config: DriverConfig) -> Self {
        Self {
            config,
            state: DriverState::Uninitialized,
            handle: None,
            device: None,
            front_end: None,
            buffer: None,
            sdk,
        }
    }

    /// [`RefaDriver::new`] followed by [`RefaDriver::initialize`].
    pub fn connect(sdk: S, config: DriverConfig) -> Result<Self, DriverError> {
        let mut driver = Self::new(sdk, config);
        driver.initialize()?;
        Ok(driver)
    }

    /// Initializes the SDK and opens the first enumerated device.
    ///
    /// On failure the SDK handle obtained so far is released and the driver
    /// is left `Uninitialized`.
    pub fn initialize(&mut self) -> Result<(), DriverError> {
        if self.state != DriverState::Uninitialized {
            return Err(DriverError::InvalidState {
                actual: self.state,
                required: "an uninitialized driver",
            });
        }
        self.state = DriverState::Initializing;
        let handle = match self.sdk.library_init(self.config.connection) {
            Ok(handle) => handle,
            Err(code) => {
                self.state = DriverState::Uninitialized;
                return Err(DriverError::SdkInit { code });
            }
        };
        debug!("TMSi library initialized over {:?}", self.config.connection);
        match self.open_first_device(handle) {
            Ok(locator) => {
                self.front_end = self.sdk.front_end_info(handle);
                if let Some(info) = &self.front_end {
                    info!(
                        "front end serial {} ({} channels, base rate {} Hz, hw {:#x}, sw {:#x})",
                        info.serial,
                        info.channels,
                        info.base_sample_rate_hz,
                        info.hardware_version,
                        info.software_version
                    );
                }
                info!("opened TMSi device {}", locator.to_string_lossy());
                self.handle = Some(handle);
                self.device = Some(locator);
                self.state = DriverState::Ready;
                Ok(())
            }
            Err(err) => {
                let code = self.sdk.library_exit(handle);
                if code != 0 {
                    warn!("LibraryExit after failed initialization returned {code}");
                }
                self.state = DriverState::Uninitialized;
                Err(err)
            }
        }
    }

    fn open_first_device(&self, handle: SdkHandle) -> Result<CString, DriverError> {
        let devices = self
            .sdk
            .device_list(handle)
            .map_err(|code| DriverError::Enumeration { code })?;
        debug!("{} device(s) enumerated", devices.len());
        let locator = devices.into_iter().next().ok_or(DriverError::NoDevice)?;
        if !self.sdk.open(handle, &locator) {
            return Err(DriverError::Open {
                locator: locator.to_string_lossy().into_owned(),
                code: self.vendor_code(handle),
            });
        }
        Ok(locator)
    }

    /// Error code of the last failed vendor call, 0 when the SDK cannot tell.
    fn vendor_code(&self, handle: SdkHandle) -> i32 {
        let code = self.sdk.error_code(handle).unwrap_or(0);
        if code != 0 {
            if let Some(message) = self.sdk.error_message(handle, code) {
                warn!("TMSi error {code}: {message}");
            }
        }
        code
    }

    fn require_handle(&self) -> Result<SdkHandle, DriverError> {
        self.handle.ok_or(DriverError::InvalidState {
            actual: self.state,
            required: "an initialized device",
        })
    }

    /// Sizes the sample buffer, starts acquisition and switches the device to
    /// impedance measurement.
    ///
    /// Steps that succeeded before a failure are not rolled back: a rejected
    /// mode switch leaves acquisition running.
    pub fn initiate_impedance_data_mode(&mut self) -> Result<(), DriverError> {
        let handle = self.require_handle()?;
        if self.state == DriverState::Acquiring {
            self.stop()?;
        }
        self.buffer = None;
        self.state = DriverState::Ready;

        let channels = self
            .sdk
            .channel_count(handle)
            .ok_or_else(|| DriverError::SignalFormat {
                code: self.vendor_code(handle),
            })?;

        let requested = self.config.requested_samples;
        let mut samples = requested;
        if !self.sdk.set_signal_buffer(handle, &mut samples) {
            return Err(DriverError::BufferNegotiation {
                requested,
                code: self.vendor_code(handle),
            });
        }
        debug!("requested {requested} samples per channel, SDK settled on {samples}");

        // Must exist before Start: the SDK begins filling it immediately.
        let buffer = SampleBuffer::allocate(samples, channels)?;
        debug!(
            "signal buffer: {} channels x {} samples = {} bytes",
            buffer.channels(),
            buffer.samples_per_channel(),
            buffer.len_bytes()
        );
        self.buffer = Some(buffer);
        self.state = DriverState::ModeConfigured;

        if !self.sdk.start(handle) {
            return Err(DriverError::AcquisitionStart {
                code: self.vendor_code(handle),
            });
        }
        self.state = DriverState::Acquiring;

        let limit = self.config.impedance_limit;
        if !self
            .sdk
            .set_measuring_mode(handle, MeasuringMode::ImpedanceEx, limit)
        {
            return Err(DriverError::ModeSwitch {
                code: self.vendor_code(handle),
            });
        }
        info!("impedance mode active ({channels} channels, limit {limit:?})");
        Ok(())
    }

    /// Reads the latest impedance block into the driver's buffer.
    ///
    /// A negative read is a device error; a read that keeps returning zero
    /// bytes after the configured retries is reported as `NoData`. Only the
    /// words the read actually wrote are exposed through
    /// [`SampleBuffer::latest`].
    pub fn get_impedances(&mut self) -> Result<&SampleBuffer, DriverError> {
        let handle = self.require_handle()?;
        let Some(buffer) = self.buffer.as_mut() else {
            return Err(DriverError::NotConfigured);
        };
        let attempts = self.config.read_retries.saturating_add(1);
        let mut attempt = 0;
        let bytes = loop {
            attempt += 1;
            let bytes = self.sdk.get_samples(handle, buffer.as_mut_slice());
            if bytes != 0 || attempt >= attempts {
                break bytes;
            }
            debug!("GetSamples returned no data (attempt {attempt}/{attempts})");
            std::thread::sleep(self.config.read_retry_delay());
        };
        if bytes < 0 {
            let code = match self.sdk.error_code(handle) {
                Some(code) if code != 0 => code,
                _ => bytes,
            };
            return Err(DriverError::ReadFailed { code });
        }
        if bytes == 0 {
            return Err(DriverError::NoData { attempts });
        }
        buffer.record_read(bytes as usize);
        if buffer.latest().len() < buffer.channels() {
            debug!(
                "short read of {bytes} bytes covers {} of {} channels",
                buffer.latest().len(),
                buffer.channels()
            );
        }
        Ok(&*buffer)
    }

    /// Owned copy of the latest per-channel impedances.
    pub fn impedance_frame(&mut self) -> Result<ImpedanceFrame, DriverError> {
        let buffer = self.get_impedances()?;
        Ok(ImpedanceFrame::from_buffer(buffer))
    }

    pub fn start(&mut self) -> Result<(), DriverError> {
        match self.state {
            DriverState::Acquiring => Ok(()),
            DriverState::ModeConfigured => {
                let handle = self.require_handle()?;
                if !self.sdk.start(handle) {
                    return Err(DriverError::AcquisitionStart {
                        code: self.vendor_code(handle),
                    });
                }
                self.state = DriverState::Acquiring;
                info!("acquisition started");
                Ok(())
            }
            DriverState::Ready => Err(DriverError::NotConfigured),
            actual => Err(DriverError::InvalidState {
                actual,
                required: "a configured measuring mode",
            }),
        }
    }

    pub fn stop(&mut self) -> Result<(), DriverError> {
        if self.state != DriverState::Acquiring {
            return Ok(());
        }
        let handle = self.require_handle()?;
        if !self.sdk.stop(handle) {
            return Err(DriverError::AcquisitionStop {
                code: self.vendor_code(handle),
            });
        }
        self.state = DriverState::ModeConfigured;
        info!("acquisition stopped");
        Ok(())
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn device_locator(&self) -> Option<&CStr> {
        self.device.as_deref()
    }

    pub fn front_end(&self) -> Option<&FrontEndInfo> {
        self.front_end.as_ref()
    }

    pub fn sample_rate_hz(&self) -> Option<u32> {
        self.front_end.map(|info| u32::from(info.base_sample_rate_hz))
    }

    pub fn channel_count(&self) -> Option<usize> {
        self.buffer.as_ref().map(SampleBuffer::channels)
    }

    pub fn buffer(&self) -> Option<&SampleBuffer> {
        self.buffer.as_ref()
    }
}

impl<S: VendorSdk> Drop for RefaDriver<S> {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if self.state == DriverState::Acquiring && !self.sdk.stop(handle) {
            warn!("Stop failed during teardown");
        }
        if !self.sdk.close(handle) {
            warn!("Close failed during teardown");
        }
        let code = self.sdk.library_exit(handle);
        if code != 0 {
            warn!("LibraryExit returned {code}");
        }
        self.buffer = None;
        self.state = DriverState::Uninitialized;
        debug!("TMSi session released");
    }
}
