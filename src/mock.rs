//! Mock driver for testing without hardware.
//!
//! [`MockDriver`] follows the driver contract closely enough to stand in for
//! the compiled driver: it allocates a frame buffer at initialize, writes
//! frames from its own thread between start and stop, records configuration,
//! and can be told to fail individual calls.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info};

use crate::buffer::{FrameBufferDescriptor, FrameRef, FrameStore, CHANNELS};
use crate::traits::{Driver, DriverCapabilities, Geometry, Status};

/// Cross-boundary calls a mock can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    /// `initialize`
    Initialize,
    /// `setVerbose`
    SetVerbose,
    /// `setFadeTime`
    SetFadeTime,
    /// `getFadeTime`
    FadeTime,
    /// `setFadeFrequency`
    SetFadeFrequency,
    /// `getFadeFrequency`
    FadeFrequency,
    /// `setTimeout`
    SetTimeout,
    /// `start`
    Start,
    /// `stop`
    Stop,
}

/// Driver-side configuration recorded by the mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockSettings {
    /// Last verbosity applied.
    pub verbose: bool,
    /// Last fade time applied.
    pub fade_time_ms: u32,
    /// Last fade frequency applied.
    pub fade_frequency_hz: u32,
    /// Last timeout applied.
    pub timeout_ms: u32,
    /// Channel passed to `start`.
    pub channel: Option<u32>,
}

impl Default for MockSettings {
    fn default() -> Self {
        Self {
            verbose: false,
            fade_time_ms: 1000,
            fade_frequency_hz: 30,
            timeout_ms: 0,
            channel: None,
        }
    }
}

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPattern {
    /// Every byte holds the low byte of the frame generation.
    Generation,
    /// Horizontal ramp that scrolls one pixel per generation.
    Gradient,
    /// Random bytes.
    Noise,
    /// One color everywhere.
    Solid([u8; 3]),
}

impl TestPattern {
    #[allow(clippy::cast_possible_truncation)]
    fn render(self, data: &mut [u8], width: u32, generation: u64) {
        match self {
            Self::Generation => data.fill(generation as u8),
            Self::Gradient => {
                let width = width.max(1) as usize;
                for (index, px) in data.chunks_exact_mut(CHANNELS as usize).enumerate() {
                    let x = (index % width + generation as usize) % width;
                    px.fill(((x * 255) / width) as u8);
                }
            }
            Self::Noise => rand::rng().fill(data),
            Self::Solid(color) => {
                for px in data.chunks_exact_mut(CHANNELS as usize) {
                    px.copy_from_slice(&color);
                }
            }
        }
    }
}

struct Writer {
    running: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Mock driver for testing without hardware.
pub struct MockDriver {
    capabilities: DriverCapabilities,
    geometry: Geometry,
    buffer_len: Option<usize>,
    pattern: TestPattern,
    interval: Duration,
    failures: HashSet<Call>,
    settings: MockSettings,
    calls: Vec<Call>,
    store: Option<Arc<FrameStore>>,
    writer: Option<Writer>,
    releases: u32,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    /// Create a new mock: 640x480, instance API, generation pattern at ~30fps.
    #[must_use]
    pub fn new() -> Self {
        Self {
            capabilities: DriverCapabilities {
                publishes_generations: true,
                ..DriverCapabilities::instance("mock")
            },
            geometry: Geometry::new(640, 480),
            buffer_len: None,
            pattern: TestPattern::Generation,
            interval: Duration::from_millis(33),
            failures: HashSet::new(),
            settings: MockSettings::default(),
            calls: Vec::new(),
            store: None,
            writer: None,
            releases: 0,
        }
    }

    /// Set the geometry reported at initialize.
    #[must_use]
    pub const fn with_geometry(mut self, width: u32, height: u32) -> Self {
        self.geometry = Geometry::new(width, height);
        self
    }

    /// Allocate a buffer of `len` bytes regardless of geometry.
    #[must_use]
    pub const fn with_buffer_len(mut self, len: usize) -> Self {
        self.buffer_len = Some(len);
        self
    }

    /// Set the capabilities for this mock driver.
    ///
    /// `publishes_generations` is always kept on; the mock writer bumps the
    /// sequence around every frame.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: DriverCapabilities) -> Self {
        self.capabilities = DriverCapabilities {
            publishes_generations: true,
            ..capabilities
        };
        self
    }

    /// Set the pattern the writer thread produces.
    #[must_use]
    pub const fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Set the delay between frames.
    #[must_use]
    pub const fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Make `call` return a failure status.
    #[must_use]
    pub fn with_failure(mut self, call: Call) -> Self {
        self.failures.insert(call);
        self
    }

    /// Configuration applied so far.
    pub const fn settings(&self) -> &MockSettings {
        &self.settings
    }

    /// Mutating calls received, in order.
    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    /// How many times the frame buffer has been released.
    pub const fn releases(&self) -> u32 {
        self.releases
    }

    /// Record a mutating call and return its status.
    fn record(&mut self, call: Call) -> Status {
        self.calls.push(call);
        self.status(call)
    }

    fn status(&self, call: Call) -> Status {
        if self.failures.contains(&call) {
            debug!(?call, "mock driver failing call");
            Status::FAILED
        } else {
            Status::OK
        }
    }

    fn spawn_writer(&self, store: Arc<FrameStore>) -> std::io::Result<Writer> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let pattern = self.pattern;
        let interval = self.interval;
        let width = self.geometry.width;

        let thread = thread::Builder::new()
            .name("mock-writer".to_owned())
            .spawn(move || {
                debug!("mock writer started");
                let mut scratch = vec![0u8; store.len()];
                while flag.load(Ordering::Acquire) {
                    pattern.render(&mut scratch, width, store.generation() + 1);
                    store.publish(&scratch);
                    thread::sleep(interval);
                }
                debug!("mock writer stopped");
            })?;

        Ok(Writer { running, thread })
    }
}

impl Driver for MockDriver {
    fn capabilities(&self) -> &DriverCapabilities {
        &self.capabilities
    }

    fn initialize(&mut self, verbose: bool) -> Result<Geometry, Status> {
        self.record(Call::Initialize).into_result()?;
        if self.store.is_some() {
            return Err(Status::FAILED);
        }

        self.settings.verbose = verbose;
        let len = self
            .buffer_len
            .or_else(|| FrameBufferDescriptor::new(self.geometry).map(|desc| desc.len()))
            .unwrap_or(0);
        self.store = Some(Arc::new(FrameStore::new(len)));
        info!(
            width = self.geometry.width,
            height = self.geometry.height,
            "mock driver initialized"
        );
        Ok(self.geometry)
    }

    fn set_verbose(&mut self, verbose: bool) -> Status {
        let status = self.record(Call::SetVerbose);
        if status.is_ok() {
            self.settings.verbose = verbose;
        }
        status
    }

    fn set_fade_time(&mut self, milliseconds: u32) -> Status {
        let status = self.record(Call::SetFadeTime);
        if status.is_ok() {
            self.settings.fade_time_ms = milliseconds;
        }
        status
    }

    fn fade_time(&self) -> Result<u32, Status> {
        self.status(Call::FadeTime).into_result()?;
        Ok(self.settings.fade_time_ms)
    }

    fn set_fade_frequency(&mut self, hertz: u32) -> Status {
        let status = self.record(Call::SetFadeFrequency);
        if status.is_ok() {
            self.settings.fade_frequency_hz = hertz;
        }
        status
    }

    fn fade_frequency(&self) -> Result<u32, Status> {
        self.status(Call::FadeFrequency).into_result()?;
        Ok(self.settings.fade_frequency_hz)
    }

    fn set_timeout(&mut self, milliseconds: u32) -> Status {
        let status = self.record(Call::SetTimeout);
        if status.is_ok() {
            self.settings.timeout_ms = milliseconds;
        }
        status
    }

    fn start(&mut self, channel: u32) -> Status {
        let status = self.record(Call::Start);
        if !status.is_ok() {
            return status;
        }
        let Some(store) = self.store.as_ref().map(Arc::clone) else {
            return Status::FAILED;
        };
        if self.writer.is_some() {
            return Status::FAILED;
        }

        match self.spawn_writer(store) {
            Ok(writer) => self.writer = Some(writer),
            Err(err) => {
                debug!(error = %err, "failed to spawn mock writer");
                return Status::FAILED;
            }
        }
        self.settings.channel = Some(channel);
        info!(channel, "mock driver started");
        Status::OK
    }

    fn stop(&mut self) -> Status {
        let status = self.record(Call::Stop);
        if !status.is_ok() {
            return status;
        }

        if let Some(writer) = self.writer.take() {
            writer.running.store(false, Ordering::Release);
            if writer.thread.join().is_err() {
                return Status::FAILED;
            }
        }
        if self.store.take().is_none() {
            return Status::FAILED;
        }
        self.releases += 1;
        info!("mock driver stopped");
        Status::OK
    }

    fn frame(&self) -> Option<FrameRef<'_>> {
        self.store.as_deref().map(FrameStore::frame)
    }
}

impl Drop for MockDriver {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.running.store(false, Ordering::Release);
            let _ = writer.thread.join();
        }
    }
}
