//! Cam-Streamer: a safe controller over a compiled camera/LED streaming driver
//!
//! This library wraps the driver's call contract (initialize, configure,
//! start, stop) in a lifecycle-checked [`DeviceHandle`] and exposes the
//! driver-owned frame buffer as a bounds-checked, generation-counted view.
//! Drivers plug in through the [`Driver`] trait: the compiled library via
//! [`native`], or the [`mock`] driver for testing without hardware.

pub mod buffer;
pub mod controller;
pub mod error;
pub mod global;
pub mod mock;
pub mod native;
pub mod settings;
pub mod traits;
pub mod validation;

pub use buffer::{FrameBufferDescriptor, FrameSnapshot, PixelGrid};
pub use controller::{initialize, DeviceHandle};
pub use error::{BufferError, ConfigError, ConfigureError, InitError, LoadError, StreamError};
pub use global::GlobalSession;
pub use traits::{
    ConfigField, Configuration, Driver, DriverCapabilities, Geometry, Status, StreamState,
};
