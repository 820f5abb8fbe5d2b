//! Core traits and types for the streaming driver contract.

use std::fmt;

use crate::buffer::FrameRef;

/// Raw status code returned by every cross-boundary call.
///
/// Zero means success. Any other value is a failure whose meaning is
/// driver-defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub i32);

impl Status {
    /// The success status.
    pub const OK: Self = Self(0);
    /// Generic failure, as returned by the reference drivers.
    pub const FAILED: Self = Self(-1);

    /// Whether the call succeeded.
    #[must_use]
    pub const fn is_ok(self) -> bool {
        self.0 == 0
    }

    /// Convert into a `Result`, keeping the failing status as the error.
    pub const fn into_result(self) -> Result<(), Self> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl From<i32> for Status {
    fn from(code: i32) -> Self {
        Self(code)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status {}", self.0)
    }
}

/// Frame dimensions reported by the driver at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
}

impl Geometry {
    /// Create a new geometry.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Lifecycle state of one device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    /// Handle exists but the driver has not been initialized.
    Uninitialized,
    /// Driver initialized, buffer allocated, not producing frames.
    Initialized,
    /// Driver is continuously writing frames.
    Running,
    /// Stream halted; the buffer has been released.
    Stopped,
    /// A cross-boundary call failed; the handle is unusable.
    Failed,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        })
    }
}

/// A configurable driver field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigField {
    /// Driver log verbosity.
    Verbose,
    /// Fade duration in milliseconds.
    FadeTime,
    /// Fade applications per second.
    FadeFrequency,
    /// Driver-internal event wait timeout in milliseconds.
    Timeout,
}

impl ConfigField {
    /// Every field, in the order they are applied by `configure`.
    pub const ALL: [Self; 4] = [Self::Verbose, Self::FadeTime, Self::FadeFrequency, Self::Timeout];
}

impl fmt::Display for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Verbose => "verbose",
            Self::FadeTime => "fade time",
            Self::FadeFrequency => "fade frequency",
            Self::Timeout => "timeout",
        })
    }
}

/// In which lifecycle states a driver accepts a configuration field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldCapability {
    /// Accepted while initialized, before `start`.
    pub before_start: bool,
    /// Accepted while running.
    pub while_running: bool,
}

impl FieldCapability {
    /// Accepted in both configurable states.
    pub const ANY: Self = Self {
        before_start: true,
        while_running: true,
    };
    /// Accepted only once the stream is running.
    pub const RUNNING_ONLY: Self = Self {
        before_start: false,
        while_running: true,
    };
    /// Not provided by this driver generation.
    pub const UNSUPPORTED: Self = Self {
        before_start: false,
        while_running: false,
    };

    /// Whether the driver exposes the field at all.
    #[must_use]
    pub const fn is_supported(self) -> bool {
        self.before_start || self.while_running
    }

    /// Whether the field may be applied in `state`.
    #[must_use]
    pub const fn allows(self, state: StreamState) -> bool {
        match state {
            StreamState::Initialized => self.before_start,
            StreamState::Running => self.while_running,
            _ => false,
        }
    }
}

/// Which revision of the driver API a driver implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiGeneration {
    /// One implicit process-wide session, no instance pointer.
    Legacy,
    /// Opaque instance pointer per session.
    Instance,
}

/// Capability flags reported by a driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverCapabilities {
    /// Driver name, for logging.
    pub driver: String,
    /// API revision.
    pub generation: ApiGeneration,
    /// Verbosity setter.
    pub verbose: FieldCapability,
    /// Fade time setter and getter.
    pub fade_time: FieldCapability,
    /// Fade frequency setter and getter.
    pub fade_frequency: FieldCapability,
    /// Event timeout setter.
    pub timeout: FieldCapability,
    /// Whether the driver bumps the buffer sequence around every frame it
    /// writes. Without it, reads cannot detect torn frames.
    pub publishes_generations: bool,
}

impl DriverCapabilities {
    /// Capabilities of the instance-based API: every field except the event
    /// timeout, configurable before and after `start`. The compiled library
    /// publishes no per-frame generation.
    #[must_use]
    pub fn instance(driver: &str) -> Self {
        Self {
            driver: driver.to_owned(),
            generation: ApiGeneration::Instance,
            verbose: FieldCapability::ANY,
            fade_time: FieldCapability::ANY,
            fade_frequency: FieldCapability::ANY,
            timeout: FieldCapability::UNSUPPORTED,
            publishes_generations: false,
        }
    }

    /// Capabilities of the global-singleton API. Fade time and timeout are
    /// only accepted while the stream runs; there is no fade frequency.
    #[must_use]
    pub fn legacy(driver: &str) -> Self {
        Self {
            driver: driver.to_owned(),
            generation: ApiGeneration::Legacy,
            verbose: FieldCapability::ANY,
            fade_time: FieldCapability::RUNNING_ONLY,
            fade_frequency: FieldCapability::UNSUPPORTED,
            timeout: FieldCapability::RUNNING_ONLY,
            publishes_generations: false,
        }
    }

    /// Capability for one field.
    #[must_use]
    pub const fn field(&self, field: ConfigField) -> FieldCapability {
        match field {
            ConfigField::Verbose => self.verbose,
            ConfigField::FadeTime => self.fade_time,
            ConfigField::FadeFrequency => self.fade_frequency,
            ConfigField::Timeout => self.timeout,
        }
    }
}

/// A set of configuration values to apply; `None` leaves the driver default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Configuration {
    /// Driver log verbosity.
    pub verbose: Option<bool>,
    /// Fade duration in milliseconds.
    pub fade_time_ms: Option<u32>,
    /// Fade applications per second.
    pub fade_frequency_hz: Option<u32>,
    /// Event wait timeout in milliseconds.
    pub timeout_ms: Option<u32>,
}

impl Configuration {
    /// Set verbosity.
    #[must_use]
    pub const fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = Some(verbose);
        self
    }

    /// Set fade time.
    #[must_use]
    pub const fn with_fade_time(mut self, milliseconds: u32) -> Self {
        self.fade_time_ms = Some(milliseconds);
        self
    }

    /// Set fade frequency.
    #[must_use]
    pub const fn with_fade_frequency(mut self, hertz: u32) -> Self {
        self.fade_frequency_hz = Some(hertz);
        self
    }

    /// Set event timeout.
    #[must_use]
    pub const fn with_timeout(mut self, milliseconds: u32) -> Self {
        self.timeout_ms = Some(milliseconds);
        self
    }

    /// Whether a value is set for `field`.
    #[must_use]
    pub const fn has(&self, field: ConfigField) -> bool {
        match field {
            ConfigField::Verbose => self.verbose.is_some(),
            ConfigField::FadeTime => self.fade_time_ms.is_some(),
            ConfigField::FadeFrequency => self.fade_frequency_hz.is_some(),
            ConfigField::Timeout => self.timeout_ms.is_some(),
        }
    }
}

/// The cross-boundary call contract of a streaming driver.
///
/// Methods mirror the driver's exported calls one to one and return raw
/// statuses; state checks and error mapping live in
/// [`DeviceHandle`](crate::DeviceHandle).
pub trait Driver {
    /// Capability flags for this driver.
    fn capabilities(&self) -> &DriverCapabilities;

    /// Create the session and allocate the frame buffer.
    fn initialize(&mut self, verbose: bool) -> Result<Geometry, Status>;

    /// Set driver log verbosity.
    fn set_verbose(&mut self, verbose: bool) -> Status;

    /// Set the fade duration.
    fn set_fade_time(&mut self, milliseconds: u32) -> Status;

    /// Read back the fade duration.
    fn fade_time(&self) -> Result<u32, Status>;

    /// Set how many times per second the fade is applied.
    fn set_fade_frequency(&mut self, hertz: u32) -> Status;

    /// Read back the fade frequency.
    fn fade_frequency(&self) -> Result<u32, Status>;

    /// Set the driver-internal event wait timeout.
    fn set_timeout(&mut self, milliseconds: u32) -> Status;

    /// Begin continuous frame production on `channel`.
    fn start(&mut self, channel: u32) -> Status;

    /// Halt frame production and release the buffer. Must not return until
    /// the driver's writer has quiesced.
    fn stop(&mut self) -> Status;

    /// The shared frame buffer, if one is allocated.
    fn frame(&self) -> Option<FrameRef<'_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_zero_is_success() {
        assert!(Status::OK.is_ok());
        assert!(!Status(3).is_ok());
        assert_eq!(Status(-2).into_result(), Err(Status(-2)));
    }

    #[test]
    fn test_field_capability_states() {
        assert!(FieldCapability::ANY.allows(StreamState::Initialized));
        assert!(FieldCapability::ANY.allows(StreamState::Running));
        assert!(!FieldCapability::ANY.allows(StreamState::Stopped));
        assert!(!FieldCapability::RUNNING_ONLY.allows(StreamState::Initialized));
        assert!(!FieldCapability::UNSUPPORTED.is_supported());
    }

    #[test]
    fn test_generation_capabilities() {
        let instance = DriverCapabilities::instance("streamer");
        assert!(instance.field(ConfigField::FadeFrequency).is_supported());
        assert!(!instance.field(ConfigField::Timeout).is_supported());

        let legacy = DriverCapabilities::legacy("streamer");
        assert!(!legacy.field(ConfigField::FadeFrequency).is_supported());
        assert_eq!(legacy.field(ConfigField::Timeout), FieldCapability::RUNNING_ONLY);
        assert!(!instance.publishes_generations && !legacy.publishes_generations);
    }

    #[test]
    fn test_configuration_builder() {
        let config = Configuration::default().with_fade_time(1000).with_timeout(10_000);
        assert!(config.has(ConfigField::FadeTime));
        assert!(config.has(ConfigField::Timeout));
        assert!(!config.has(ConfigField::Verbose));
    }
}
