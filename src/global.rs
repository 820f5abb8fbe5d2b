//! Process-wide session for the legacy global-singleton driver API.
//!
//! The legacy driver keeps one implicit session in global state. Rather than
//! mirroring that as global mutable state, a [`GlobalSession`] is an ordinary
//! [`DeviceHandle`] that additionally holds a process-wide claim, so at most
//! one exists at a time.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::buffer::FrameBufferDescriptor;
use crate::controller::DeviceHandle;
use crate::error::InitError;
use crate::traits::Driver;

static SESSION_CLAIMED: AtomicBool = AtomicBool::new(false);

/// The single live session of a global-singleton driver.
pub struct GlobalSession<D: Driver> {
    handle: DeviceHandle<D>,
}

impl<D: Driver> GlobalSession<D> {
    /// Claim the process-wide session and initialize `driver` in it.
    ///
    /// Fails with [`InitError::AlreadyInitialized`] while another session is
    /// alive. The claim is released if initialization fails.
    pub fn initialize(driver: D, verbose: bool) -> Result<(Self, FrameBufferDescriptor), InitError> {
        if SESSION_CLAIMED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(InitError::AlreadyInitialized);
        }

        let mut handle = DeviceHandle::new(driver);
        match handle.initialize(verbose) {
            Ok(descriptor) => {
                debug!("global session claimed");
                Ok((Self { handle }, descriptor))
            }
            Err(err) => {
                drop(handle);
                SESSION_CLAIMED.store(false, Ordering::Release);
                Err(err)
            }
        }
    }

    /// Whether a global session is currently alive in this process.
    pub fn is_active() -> bool {
        SESSION_CLAIMED.load(Ordering::Acquire)
    }
}

impl<D: Driver> Deref for GlobalSession<D> {
    type Target = DeviceHandle<D>;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl<D: Driver> DerefMut for GlobalSession<D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.handle
    }
}

impl<D: Driver> std::fmt::Debug for GlobalSession<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalSession")
            .field("handle", &self.handle)
            .finish()
    }
}

impl<D: Driver> Drop for GlobalSession<D> {
    fn drop(&mut self) {
        self.handle.shutdown();
        SESSION_CLAIMED.store(false, Ordering::Release);
        debug!("global session released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, MockDriver};
    use crate::traits::{DriverCapabilities, StreamState};
    use serial_test::serial;

    fn legacy_mock() -> MockDriver {
        MockDriver::new()
            .with_geometry(16, 8)
            .with_capabilities(DriverCapabilities::legacy("mock-legacy"))
    }

    #[test]
    #[serial(global_session)]
    fn test_second_session_is_rejected() {
        let (session, _) = GlobalSession::initialize(legacy_mock(), true).expect("first session");
        assert!(GlobalSession::<MockDriver>::is_active());

        let err = GlobalSession::initialize(legacy_mock(), true).expect_err("second session");
        assert_eq!(err, InitError::AlreadyInitialized);

        drop(session);
        assert!(!GlobalSession::<MockDriver>::is_active());
    }

    #[test]
    #[serial(global_session)]
    fn test_session_debug_shows_handle_state() {
        let (session, _) = GlobalSession::initialize(legacy_mock(), false).expect("session");
        let text = format!("{session:?}");
        assert!(text.starts_with("GlobalSession"));
        assert!(text.contains("mock-legacy"));
        assert!(text.contains("Initialized"));
    }

    #[test]
    #[serial(global_session)]
    fn test_failed_initialize_releases_claim() {
        let driver = legacy_mock().with_failure(Call::Initialize);
        assert!(GlobalSession::initialize(driver, false).is_err());
        assert!(!GlobalSession::<MockDriver>::is_active());

        let (session, descriptor) =
            GlobalSession::initialize(legacy_mock(), false).expect("session after failure");
        assert_eq!(descriptor.width(), 16);
        assert_eq!(session.state(), StreamState::Initialized);
    }

    #[test]
    #[serial(global_session)]
    fn test_session_runs_through_handle() {
        let (mut session, _) = GlobalSession::initialize(legacy_mock(), false).expect("session");
        session.start(14).expect("start failed");
        session.set_timeout(10_000).expect("timeout while running");
        assert!(session.read().is_ok());
        session.stop().expect("stop failed");
        assert_eq!(session.driver().releases(), 1);
    }
}
