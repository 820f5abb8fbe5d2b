//! Error types, one per call category.

use std::path::PathBuf;

use thiserror::Error;

use crate::traits::{ConfigField, Status, StreamState};

/// Failure to create a device session.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InitError {
    /// The driver's initialize call returned a nonzero status.
    #[error("driver rejected initialize: {0}")]
    DriverRejected(Status),

    /// The driver reported a zero width or height, or a size too large to
    /// address.
    #[error("driver reported a degenerate {width}x{height} frame buffer")]
    DegenerateBuffer {
        /// Reported width.
        width: u32,
        /// Reported height.
        height: u32,
    },

    /// The session was already initialized.
    #[error("device session is already initialized")]
    AlreadyInitialized,

    /// The driver reported success but its buffer does not match the
    /// reported geometry.
    #[error("driver exposed a {actual}-byte frame buffer, expected {expected}")]
    BufferMismatch {
        /// Bytes implied by the reported geometry.
        expected: usize,
        /// Bytes actually exposed.
        actual: usize,
    },
}

/// Failure to apply or read a configuration field.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The driver returned a nonzero status for this field.
    #[error("driver rejected {field}: {status}")]
    Rejected {
        /// Field being applied.
        field: ConfigField,
        /// Status returned by the driver.
        status: Status,
    },

    /// This driver generation has no call for the field.
    #[error("driver does not support {0}")]
    Unsupported(ConfigField),

    /// The driver supports the field, but not in the current state.
    #[error("driver does not accept {field} while {state}")]
    NotPermitted {
        /// Field being applied.
        field: ConfigField,
        /// Current state.
        state: StreamState,
    },

    /// The handle is not initialized or running.
    #[error("cannot configure {field} while {state}")]
    InvalidState {
        /// Field being applied.
        field: ConfigField,
        /// Current state.
        state: StreamState,
    },
}

impl ConfigError {
    /// The field this error concerns.
    pub const fn field(&self) -> ConfigField {
        match self {
            Self::Rejected { field, .. }
            | Self::NotPermitted { field, .. }
            | Self::InvalidState { field, .. }
            | Self::Unsupported(field) => *field,
        }
    }
}

/// One or more fields of a [`Configuration`](crate::Configuration) failed.
///
/// Fields are applied independently, so the ones in `applied` took effect
/// even though others were rejected.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{} configuration field(s) failed", .errors.len())]
pub struct ConfigureError {
    /// Fields the driver accepted.
    pub applied: Vec<ConfigField>,
    /// One error per failed field, in field order.
    pub errors: Vec<ConfigError>,
}

impl ConfigureError {
    /// Fields that failed.
    pub fn failed(&self) -> impl Iterator<Item = ConfigField> + '_ {
        self.errors.iter().map(ConfigError::field)
    }
}

/// Failure of a start or stop transition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StreamError {
    /// The driver's start or stop call returned a nonzero status.
    #[error("driver rejected stream transition: {0}")]
    DriverRejected(Status),

    /// `start` on a running stream.
    #[error("stream is already running")]
    AlreadyRunning,

    /// `start` after `stop`; restarting requires a fresh handle.
    #[error("stream was stopped; initialize a new handle to restart")]
    AlreadyStopped,

    /// Transition not legal from the current state.
    #[error("stream transition not allowed while {0}")]
    InvalidState(StreamState),
}

/// Failure to read the frame buffer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    /// Reads are only valid while running.
    #[error("frame buffer is not streaming (state: {0})")]
    NotStreaming(StreamState),

    /// The driver's buffer no longer matches the geometry fixed at
    /// initialization.
    #[error("frame buffer changed size: expected {expected} bytes, found {actual}")]
    GeometryChanged {
        /// Bytes fixed at initialization.
        expected: usize,
        /// Bytes now exposed.
        actual: usize,
    },
}

/// Failure to load a compiled driver library.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The shared library could not be opened.
    #[error("failed to load driver library {path}: {source}")]
    Library {
        /// Library path.
        path: PathBuf,
        /// Loader error.
        #[source]
        source: libloading::Error,
    },

    /// A required symbol is missing.
    #[error("driver library is missing symbol `{name}`: {source}")]
    Symbol {
        /// Symbol name.
        name: &'static str,
        /// Loader error.
        #[source]
        source: libloading::Error,
    },
}
