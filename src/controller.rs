//! Device handle: lifecycle state machine, configuration and frame access.

use tracing::{debug, error, warn};

use crate::buffer::{FrameBufferDescriptor, PixelGrid};
use crate::error::{BufferError, ConfigError, ConfigureError, InitError, StreamError};
use crate::traits::{
    ConfigField, Configuration, Driver, DriverCapabilities, Status, StreamState,
};

/// One driver session.
///
/// The handle owns its driver exclusively. Every operation that changes
/// driver state takes `&mut self`, and frame views borrow the handle, so a
/// view can never be held across [`stop`](Self::stop) or outlive the handle.
pub struct DeviceHandle<D: Driver> {
    driver: D,
    state: StreamState,
    descriptor: Option<FrameBufferDescriptor>,
    channel: Option<u32>,
}

/// Create a handle over `driver` and initialize it.
pub fn initialize<D: Driver>(
    driver: D,
    verbose: bool,
) -> Result<(DeviceHandle<D>, FrameBufferDescriptor), InitError> {
    let mut handle = DeviceHandle::new(driver);
    let descriptor = handle.initialize(verbose)?;
    Ok((handle, descriptor))
}

impl<D: Driver> DeviceHandle<D> {
    /// Wrap a driver in an uninitialized handle.
    pub const fn new(driver: D) -> Self {
        Self {
            driver,
            state: StreamState::Uninitialized,
            descriptor: None,
            channel: None,
        }
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> StreamState {
        self.state
    }

    /// Buffer description, once initialized.
    pub const fn descriptor(&self) -> Option<FrameBufferDescriptor> {
        self.descriptor
    }

    /// Channel passed to `start`, once running.
    pub const fn channel(&self) -> Option<u32> {
        self.channel
    }

    /// Capability flags of the underlying driver.
    pub fn capabilities(&self) -> &DriverCapabilities {
        self.driver.capabilities()
    }

    /// The underlying driver.
    pub const fn driver(&self) -> &D {
        &self.driver
    }

    /// Initialize the driver session and allocate its frame buffer.
    ///
    /// Verbosity is applied as part of initialization.
    pub fn initialize(&mut self, verbose: bool) -> Result<FrameBufferDescriptor, InitError> {
        if self.state != StreamState::Uninitialized {
            return Err(InitError::AlreadyInitialized);
        }

        let geometry = match self.driver.initialize(verbose) {
            Ok(geometry) => geometry,
            Err(status) => {
                error!(%status, driver = %self.capabilities().driver, "initialize failed");
                self.state = StreamState::Failed;
                return Err(InitError::DriverRejected(status));
            }
        };

        let Some(descriptor) = FrameBufferDescriptor::new(geometry) else {
            error!(
                width = geometry.width,
                height = geometry.height,
                "driver reported degenerate frame buffer"
            );
            self.release();
            return Err(InitError::DegenerateBuffer {
                width: geometry.width,
                height: geometry.height,
            });
        };

        let actual = self.driver.frame().map_or(0, |frame| frame.len());
        if actual != descriptor.len() {
            error!(expected = descriptor.len(), actual, "driver buffer does not match geometry");
            self.release();
            return Err(InitError::BufferMismatch {
                expected: descriptor.len(),
                actual,
            });
        }

        self.descriptor = Some(descriptor);
        self.state = StreamState::Initialized;
        debug!(
            width = descriptor.width(),
            height = descriptor.height(),
            driver = %self.capabilities().driver,
            "device initialized"
        );
        Ok(descriptor)
    }

    /// Set driver log verbosity.
    pub fn set_verbose(&mut self, verbose: bool) -> Result<(), ConfigError> {
        self.check_field(ConfigField::Verbose)?;
        let status = self.driver.set_verbose(verbose);
        Self::field_result(ConfigField::Verbose, status)
    }

    /// Set the fade duration in milliseconds.
    pub fn set_fade_time(&mut self, milliseconds: u32) -> Result<(), ConfigError> {
        self.check_field(ConfigField::FadeTime)?;
        let status = self.driver.set_fade_time(milliseconds);
        Self::field_result(ConfigField::FadeTime, status)
    }

    /// Set how many times per second the fade is applied.
    pub fn set_fade_frequency(&mut self, hertz: u32) -> Result<(), ConfigError> {
        self.check_field(ConfigField::FadeFrequency)?;
        let status = self.driver.set_fade_frequency(hertz);
        Self::field_result(ConfigField::FadeFrequency, status)
    }

    /// Set the driver-internal event wait timeout in milliseconds.
    pub fn set_timeout(&mut self, milliseconds: u32) -> Result<(), ConfigError> {
        self.check_field(ConfigField::Timeout)?;
        let status = self.driver.set_timeout(milliseconds);
        Self::field_result(ConfigField::Timeout, status)
    }

    /// Read back the fade duration in milliseconds.
    pub fn fade_time(&self) -> Result<u32, ConfigError> {
        self.check_field(ConfigField::FadeTime)?;
        self.driver
            .fade_time()
            .map_err(|status| ConfigError::Rejected {
                field: ConfigField::FadeTime,
                status,
            })
    }

    /// Read back the fade frequency in hertz.
    pub fn fade_frequency(&self) -> Result<u32, ConfigError> {
        self.check_field(ConfigField::FadeFrequency)?;
        self.driver
            .fade_frequency()
            .map_err(|status| ConfigError::Rejected {
                field: ConfigField::FadeFrequency,
                status,
            })
    }

    /// Apply every field set in `config` that the driver accepts in the
    /// current state. Fields the driver lacks, or only accepts in another
    /// state, are skipped. Returns the fields applied.
    ///
    /// Each field is applied independently: a rejected field does not stop
    /// the rest. If any field fails, the error lists both the fields that
    /// took effect and one error per failed field.
    pub fn configure(&mut self, config: &Configuration) -> Result<Vec<ConfigField>, ConfigureError> {
        let mut applied = Vec::new();
        let mut errors = Vec::new();
        for field in ConfigField::ALL {
            if !config.has(field) {
                continue;
            }
            let result = match self.check_field(field) {
                Err(ConfigError::Unsupported(_) | ConfigError::NotPermitted { .. }) => {
                    debug!(%field, state = %self.state, "skipping configuration field");
                    continue;
                }
                Err(err) => Err(err),
                Ok(()) => match field {
                    ConfigField::Verbose => self.set_verbose(config.verbose.unwrap_or_default()),
                    ConfigField::FadeTime => {
                        self.set_fade_time(config.fade_time_ms.unwrap_or_default())
                    }
                    ConfigField::FadeFrequency => {
                        self.set_fade_frequency(config.fade_frequency_hz.unwrap_or_default())
                    }
                    ConfigField::Timeout => self.set_timeout(config.timeout_ms.unwrap_or_default()),
                },
            };
            match result {
                Ok(()) => applied.push(field),
                Err(err) => errors.push(err),
            }
        }

        if errors.is_empty() {
            Ok(applied)
        } else {
            Err(ConfigureError { applied, errors })
        }
    }

    /// Start continuous frame production on `channel`.
    ///
    /// Legal only once, from `Initialized`. The channel is passed to the
    /// driver unchanged.
    pub fn start(&mut self, channel: u32) -> Result<(), StreamError> {
        match self.state {
            StreamState::Initialized => {}
            StreamState::Running => return Err(StreamError::AlreadyRunning),
            StreamState::Stopped => return Err(StreamError::AlreadyStopped),
            state @ (StreamState::Uninitialized | StreamState::Failed) => {
                return Err(StreamError::InvalidState(state));
            }
        }

        let status = self.driver.start(channel);
        if !status.is_ok() {
            error!(%status, channel, "start failed");
            self.state = StreamState::Failed;
            return Err(StreamError::DriverRejected(status));
        }

        self.channel = Some(channel);
        self.state = StreamState::Running;
        debug!(channel, "stream started");
        Ok(())
    }

    /// Halt frame production and release the frame buffer.
    ///
    /// Returns once the driver's writer has quiesced. Stopping an already
    /// stopped stream succeeds without calling the driver.
    pub fn stop(&mut self) -> Result<(), StreamError> {
        match self.state {
            StreamState::Running => {}
            StreamState::Stopped => return Ok(()),
            state => return Err(StreamError::InvalidState(state)),
        }

        let status = self.driver.stop();
        if !status.is_ok() {
            error!(%status, "stop failed");
            self.state = StreamState::Failed;
            return Err(StreamError::DriverRejected(status));
        }

        self.state = StreamState::Stopped;
        debug!("stream stopped");
        Ok(())
    }

    /// Borrow the frame buffer. Only valid while running.
    pub fn read(&self) -> Result<PixelGrid<'_>, BufferError> {
        let (StreamState::Running, Some(descriptor)) = (self.state, self.descriptor) else {
            return Err(BufferError::NotStreaming(self.state));
        };
        let frame = self
            .driver
            .frame()
            .ok_or(BufferError::NotStreaming(self.state))?;
        PixelGrid::new(frame, descriptor, self.capabilities().publishes_generations)
    }

    /// Whether frames are being produced.
    pub fn is_running(&self) -> bool {
        self.state == StreamState::Running
    }

    /// Release the driver session if it still holds one.
    pub(crate) fn shutdown(&mut self) {
        match self.state {
            StreamState::Running => {
                if let Err(err) = self.stop() {
                    warn!(error = %err, "failed to stop stream on shutdown");
                }
            }
            StreamState::Initialized => {
                let status = self.driver.stop();
                if !status.is_ok() {
                    warn!(%status, "failed to release driver on shutdown");
                }
                self.state = StreamState::Stopped;
            }
            // A failed start or stop leaves the driver session allocated.
            StreamState::Failed if self.descriptor.is_some() => {
                let status = self.driver.stop();
                if !status.is_ok() {
                    warn!(%status, "failed to release driver on shutdown");
                }
                self.descriptor = None;
            }
            _ => {}
        }
    }

    /// Give back whatever the driver allocated after a failed initialize.
    fn release(&mut self) {
        let status = self.driver.stop();
        if !status.is_ok() {
            warn!(%status, "failed to release driver after rejected initialize");
        }
        self.state = StreamState::Failed;
    }

    fn check_field(&self, field: ConfigField) -> Result<(), ConfigError> {
        let state = self.state;
        if !matches!(state, StreamState::Initialized | StreamState::Running) {
            return Err(ConfigError::InvalidState { field, state });
        }
        let capability = self.driver.capabilities().field(field);
        if !capability.is_supported() {
            return Err(ConfigError::Unsupported(field));
        }
        if !capability.allows(state) {
            return Err(ConfigError::NotPermitted { field, state });
        }
        Ok(())
    }

    fn field_result(field: ConfigField, status: Status) -> Result<(), ConfigError> {
        status.into_result().map_err(|status| {
            warn!(%field, %status, "driver rejected configuration");
            ConfigError::Rejected { field, status }
        })
    }
}

impl<D: Driver> Drop for DeviceHandle<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<D: Driver> std::fmt::Debug for DeviceHandle<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("driver", &self.driver.capabilities().driver)
            .field("state", &self.state)
            .field("descriptor", &self.descriptor)
            .field("channel", &self.channel)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, MockDriver};
    use crate::traits::DriverCapabilities;

    fn running(driver: MockDriver) -> DeviceHandle<MockDriver> {
        let (mut handle, _) = initialize(driver, false).expect("initialize failed");
        handle.start(0).expect("start failed");
        handle
    }

    #[test]
    fn test_initialize_twice_is_rejected() {
        let mut handle = DeviceHandle::new(MockDriver::new());
        handle.initialize(false).expect("first initialize failed");
        assert_eq!(handle.initialize(false), Err(InitError::AlreadyInitialized));
        assert_eq!(handle.state(), StreamState::Initialized);
    }

    #[test]
    fn test_initialize_rejected_by_driver() {
        let driver = MockDriver::new().with_failure(Call::Initialize);
        let err = initialize(driver, false).expect_err("initialize should fail");
        assert_eq!(err, InitError::DriverRejected(Status::FAILED));
    }

    #[test]
    fn test_buffer_mismatch_is_rejected() {
        let driver = MockDriver::new().with_geometry(4, 4).with_buffer_len(10);
        let mut handle = DeviceHandle::new(driver);
        let err = handle.initialize(false).expect_err("initialize should fail");
        assert_eq!(
            err,
            InitError::BufferMismatch {
                expected: 48,
                actual: 10
            }
        );
        assert_eq!(handle.state(), StreamState::Failed);
        assert_eq!(handle.driver().releases(), 1);
    }

    #[test]
    fn test_start_requires_initialize() {
        let mut handle = DeviceHandle::new(MockDriver::new());
        assert_eq!(
            handle.start(0),
            Err(StreamError::InvalidState(StreamState::Uninitialized))
        );
    }

    #[test]
    fn test_start_failure_poisons_handle() {
        let driver = MockDriver::new().with_failure(Call::Start);
        let (mut handle, _) = initialize(driver, false).expect("initialize failed");

        assert_eq!(handle.start(1), Err(StreamError::DriverRejected(Status::FAILED)));
        assert_eq!(handle.state(), StreamState::Failed);
        assert_eq!(handle.start(1), Err(StreamError::InvalidState(StreamState::Failed)));
        assert!(matches!(
            handle.set_fade_time(10),
            Err(ConfigError::InvalidState { .. })
        ));
        assert_eq!(
            handle.read().err(),
            Some(BufferError::NotStreaming(StreamState::Failed))
        );
    }

    #[test]
    fn test_stop_failure_poisons_handle() {
        let mut handle = running(MockDriver::new().with_failure(Call::Stop));
        assert_eq!(handle.stop(), Err(StreamError::DriverRejected(Status::FAILED)));
        assert_eq!(handle.state(), StreamState::Failed);
    }

    #[test]
    fn test_stop_before_start_is_invalid() {
        let (mut handle, _) = initialize(MockDriver::new(), false).expect("initialize failed");
        assert_eq!(
            handle.stop(),
            Err(StreamError::InvalidState(StreamState::Initialized))
        );
    }

    #[test]
    fn test_rejected_setter_keeps_handle_usable() {
        let driver = MockDriver::new().with_failure(Call::SetFadeTime);
        let (mut handle, _) = initialize(driver, false).expect("initialize failed");

        assert_eq!(
            handle.set_fade_time(500),
            Err(ConfigError::Rejected {
                field: ConfigField::FadeTime,
                status: Status::FAILED
            })
        );
        assert_eq!(handle.state(), StreamState::Initialized);
        handle.set_fade_frequency(30).expect("other fields still apply");
        handle.start(0).expect("start still succeeds");
    }

    #[test]
    fn test_unsupported_field_skips_driver() {
        let (mut handle, _) = initialize(MockDriver::new(), false).expect("initialize failed");
        assert_eq!(
            handle.set_timeout(10_000),
            Err(ConfigError::Unsupported(ConfigField::Timeout))
        );
        assert!(!handle.driver().calls().contains(&Call::SetTimeout));
    }

    #[test]
    fn test_running_only_field_before_start() {
        let driver = MockDriver::new().with_capabilities(DriverCapabilities::legacy("mock"));
        let (mut handle, _) = initialize(driver, false).expect("initialize failed");

        assert_eq!(
            handle.set_fade_time(1000),
            Err(ConfigError::NotPermitted {
                field: ConfigField::FadeTime,
                state: StreamState::Initialized
            })
        );
        handle.start(14).expect("start failed");
        handle.set_fade_time(1000).expect("fade time while running");
        assert_eq!(handle.fade_time(), Ok(1000));
    }

    #[test]
    fn test_configure_defers_running_only_fields() {
        let driver = MockDriver::new().with_capabilities(DriverCapabilities::legacy("mock"));
        let (mut handle, _) = initialize(driver, false).expect("initialize failed");
        let config = Configuration::default()
            .with_verbose(true)
            .with_fade_time(1000)
            .with_fade_frequency(60)
            .with_timeout(10_000);

        let before = handle.configure(&config).expect("configure before start");
        assert_eq!(before, vec![ConfigField::Verbose]);

        handle.start(14).expect("start failed");
        let after = handle.configure(&config).expect("configure while running");
        assert_eq!(
            after,
            vec![ConfigField::Verbose, ConfigField::FadeTime, ConfigField::Timeout]
        );
        assert_eq!(handle.driver().settings().timeout_ms, 10_000);
    }

    #[test]
    fn test_configure_continues_past_rejected_field() {
        let driver = MockDriver::new().with_failure(Call::SetFadeTime);
        let (mut handle, _) = initialize(driver, false).expect("initialize failed");
        let config = Configuration::default()
            .with_fade_time(1000)
            .with_fade_frequency(60);

        let err = handle.configure(&config).expect_err("fade time is rejected");
        assert_eq!(err.applied, vec![ConfigField::FadeFrequency]);
        assert_eq!(
            err.errors,
            vec![ConfigError::Rejected {
                field: ConfigField::FadeTime,
                status: Status::FAILED
            }]
        );
        assert_eq!(err.failed().collect::<Vec<_>>(), vec![ConfigField::FadeTime]);
        assert_eq!(
            handle.driver().calls(),
            &[Call::Initialize, Call::SetFadeTime, Call::SetFadeFrequency]
        );
        assert_eq!(handle.driver().settings().fade_frequency_hz, 60);
        assert_eq!(handle.state(), StreamState::Initialized);
    }

    #[test]
    fn test_configure_outside_session_reports_every_field() {
        let mut handle = DeviceHandle::new(MockDriver::new());
        let config = Configuration::default().with_verbose(true).with_fade_time(1000);

        let err = handle.configure(&config).expect_err("not initialized");
        assert!(err.applied.is_empty());
        assert_eq!(
            err.failed().collect::<Vec<_>>(),
            vec![ConfigField::Verbose, ConfigField::FadeTime]
        );
        assert!(handle.driver().calls().is_empty());
    }

    #[test]
    fn test_oversized_geometry_is_degenerate() {
        let mut handle = DeviceHandle::new(MockDriver::new().with_geometry(u32::MAX, u32::MAX));
        assert_eq!(
            handle.initialize(false),
            Err(InitError::DegenerateBuffer {
                width: u32::MAX,
                height: u32::MAX
            })
        );
        assert_eq!(handle.state(), StreamState::Failed);
        assert_eq!(handle.driver().releases(), 1);
    }

    #[test]
    fn test_shutdown_releases_after_failed_start() {
        let driver = MockDriver::new().with_failure(Call::Start);
        let (mut handle, _) = initialize(driver, false).expect("initialize failed");
        assert!(handle.start(0).is_err());

        handle.shutdown();
        assert_eq!(handle.driver().releases(), 1);
        assert_eq!(handle.state(), StreamState::Failed);

        handle.shutdown();
        assert_eq!(handle.driver().releases(), 1);
    }

    #[test]
    fn test_read_from_sequenced_driver_is_verified() {
        let handle = running(MockDriver::new().with_geometry(4, 4));
        let grid = handle.read().expect("read failed");
        assert!(grid.is_consistent().is_some());
        assert!(grid.snapshot().is_verified());
    }

    #[test]
    fn test_fade_getters_round_trip() {
        let mut handle = running(MockDriver::new());
        handle.set_fade_frequency(45).expect("set_fade_frequency failed");
        assert_eq!(handle.fade_frequency(), Ok(45));
        handle.set_verbose(true).expect("set_verbose failed");
        assert!(handle.driver().settings().verbose);
    }

    #[test]
    fn test_shutdown_stops_running_stream() {
        let mut handle = running(MockDriver::new());
        handle.shutdown();
        assert_eq!(handle.state(), StreamState::Stopped);
        assert_eq!(handle.driver().calls().last(), Some(&Call::Stop));
        assert_eq!(handle.driver().releases(), 1);
    }
}
