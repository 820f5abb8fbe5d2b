//! Drivers backed by the compiled streaming library, loaded at runtime.
//!
//! Two generations of the library exist. [`NativeDriver`] binds the
//! instance-based API, where every call takes an opaque `StreamerInstance*`.
//! [`LegacyDriver`] binds the earlier API that keeps one session in global
//! state; wrap it in a [`GlobalSession`](crate::GlobalSession).
//!
//! The library writes frames into its buffer from its own threads and
//! publishes no generation counter, so the sequence exposed here only
//! advances on lifecycle transitions. Both drivers report
//! `publishes_generations: false`, and views over their buffers make no
//! tear-detection claims.
#![allow(unsafe_code)]

use std::ffi::{c_int, c_void};
use std::path::Path;
use std::ptr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use libloading::Library;
use tracing::{debug, warn};

use crate::buffer::{FrameBufferDescriptor, FrameRef};
use crate::error::LoadError;
use crate::traits::{Driver, DriverCapabilities, FieldCapability, Geometry, Status};

type InstanceInitFn =
    unsafe extern "C" fn(*mut *mut c_void, *mut *mut u8, *mut u32, *mut u32) -> c_int;
type InstanceFn = unsafe extern "C" fn(*mut c_void) -> c_int;
type InstanceU32Fn = unsafe extern "C" fn(*mut c_void, u32) -> c_int;
type InstanceU8Fn = unsafe extern "C" fn(*mut c_void, u8) -> c_int;
type InstanceGetFn = unsafe extern "C" fn(*mut c_void, *mut u32) -> c_int;

type LegacyInitFn = unsafe extern "C" fn(*mut *mut u8, *mut u32, *mut u32) -> c_int;
type LegacyFn = unsafe extern "C" fn() -> c_int;
type LegacyU32Fn = unsafe extern "C" fn(u32) -> c_int;
type LegacyBoolFn = unsafe extern "C" fn(bool) -> c_int;
type LegacyGetFn = unsafe extern "C" fn(*mut u32) -> c_int;

fn open(path: &Path) -> Result<Library, LoadError> {
    // SAFETY: loading runs the library's static initializers; the driver
    // library has no initialization side effects beyond its own globals.
    unsafe { Library::new(path) }.map_err(|source| LoadError::Library {
        path: path.to_path_buf(),
        source,
    })
}

fn symbol<T: Copy>(library: &Library, name: &'static str) -> Result<T, LoadError> {
    // SAFETY: `T` is the function pointer type declared in the driver header
    // for `name`; the copied pointer is only called while `library` is held.
    unsafe { library.get::<T>(name.as_bytes()) }
        .map(|sym| *sym)
        .map_err(|source| LoadError::Symbol { name, source })
}

fn optional_symbol<T: Copy>(library: &Library, name: &'static str) -> Option<T> {
    let found = symbol(library, name).ok();
    if found.is_none() {
        debug!(name, "optional driver symbol not present");
    }
    found
}

/// View of `len` driver-owned bytes as atomics.
///
/// # Safety
///
/// `buffer` must point to at least `len` bytes that stay allocated for `'a`.
unsafe fn driver_pixels<'a>(buffer: *mut u8, len: usize) -> &'a [AtomicU8] {
    // SAFETY: `AtomicU8` has the same size and alignment as `u8`; validity
    // and lifetime are guaranteed by the caller.
    unsafe { std::slice::from_raw_parts(buffer.cast::<AtomicU8>(), len) }
}

/// Bytes implied by the reported geometry, or 0 when it is not addressable.
fn buffer_len(width: u32, height: u32) -> usize {
    FrameBufferDescriptor::new(Geometry::new(width, height)).map_or(0, |desc| desc.len())
}

struct InstanceApi {
    initialize: InstanceInitFn,
    start: InstanceU32Fn,
    stop: InstanceFn,
    set_verbose: InstanceU8Fn,
    set_fade_time: InstanceU32Fn,
    get_fade_time: InstanceGetFn,
    set_fade_frequency: Option<InstanceU32Fn>,
    get_fade_frequency: Option<InstanceGetFn>,
}

/// Instance-based driver generation.
pub struct NativeDriver {
    api: InstanceApi,
    capabilities: DriverCapabilities,
    instance: *mut c_void,
    buffer: *mut u8,
    len: usize,
    sequence: AtomicU64,
    _library: Library,
}

impl NativeDriver {
    /// Load the driver library at `path` and resolve its symbols.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let library = open(path)?;
        let api = InstanceApi {
            initialize: symbol(&library, "initialize")?,
            start: symbol(&library, "start")?,
            stop: symbol(&library, "stop")?,
            set_verbose: symbol(&library, "setVerbose")?,
            set_fade_time: symbol(&library, "setFadeTime")?,
            get_fade_time: symbol(&library, "getFadeTime")?,
            set_fade_frequency: optional_symbol(&library, "setFadeFrequency"),
            get_fade_frequency: optional_symbol(&library, "getFadeFrequency"),
        };

        let mut capabilities = DriverCapabilities::instance(&path.display().to_string());
        if api.set_fade_frequency.is_none() {
            capabilities.fade_frequency = FieldCapability::UNSUPPORTED;
        }
        debug!(path = %path.display(), "loaded instance driver");

        Ok(Self {
            api,
            capabilities,
            instance: ptr::null_mut(),
            buffer: ptr::null_mut(),
            len: 0,
            sequence: AtomicU64::new(0),
            _library: library,
        })
    }

    fn advance(&self) {
        self.sequence.fetch_add(2, Ordering::AcqRel);
    }
}

impl Driver for NativeDriver {
    fn capabilities(&self) -> &DriverCapabilities {
        &self.capabilities
    }

    fn initialize(&mut self, verbose: bool) -> Result<Geometry, Status> {
        if !self.instance.is_null() {
            return Err(Status::FAILED);
        }
        let mut instance: *mut c_void = ptr::null_mut();
        let mut buffer: *mut u8 = ptr::null_mut();
        let (mut width, mut height) = (0u32, 0u32);
        // SAFETY: all four out-pointers reference live locals.
        let status = Status(unsafe {
            (self.api.initialize)(&mut instance, &mut buffer, &mut width, &mut height)
        });
        status.into_result()?;
        if instance.is_null() {
            return Err(Status::FAILED);
        }

        self.instance = instance;
        self.buffer = buffer;
        self.len = if buffer.is_null() { 0 } else { buffer_len(width, height) };
        if let Err(status) = self.set_verbose(verbose).into_result() {
            let released = self.stop();
            if !released.is_ok() {
                warn!(status = %released, "failed to release driver after rejected verbosity");
            }
            return Err(status);
        }
        Ok(Geometry::new(width, height))
    }

    fn set_verbose(&mut self, verbose: bool) -> Status {
        // SAFETY: `instance` came from `initialize`; the driver checks it.
        Status(unsafe { (self.api.set_verbose)(self.instance, u8::from(verbose)) })
    }

    fn set_fade_time(&mut self, milliseconds: u32) -> Status {
        // SAFETY: as for `set_verbose`.
        Status(unsafe { (self.api.set_fade_time)(self.instance, milliseconds) })
    }

    fn fade_time(&self) -> Result<u32, Status> {
        let mut value = 0u32;
        // SAFETY: `value` is a live local.
        Status(unsafe { (self.api.get_fade_time)(self.instance, &mut value) }).into_result()?;
        Ok(value)
    }

    fn set_fade_frequency(&mut self, hertz: u32) -> Status {
        let Some(set) = self.api.set_fade_frequency else {
            return Status::FAILED;
        };
        // SAFETY: as for `set_verbose`.
        Status(unsafe { set(self.instance, hertz) })
    }

    fn fade_frequency(&self) -> Result<u32, Status> {
        let get = self.api.get_fade_frequency.ok_or(Status::FAILED)?;
        let mut value = 0u32;
        // SAFETY: `value` is a live local.
        Status(unsafe { get(self.instance, &mut value) }).into_result()?;
        Ok(value)
    }

    fn set_timeout(&mut self, _milliseconds: u32) -> Status {
        Status::FAILED
    }

    fn start(&mut self, channel: u32) -> Status {
        // SAFETY: as for `set_verbose`.
        let status = Status(unsafe { (self.api.start)(self.instance, channel) });
        if status.is_ok() {
            self.advance();
        }
        status
    }

    fn stop(&mut self) -> Status {
        // SAFETY: as for `set_verbose`. The driver joins its workers and
        // frees the buffer before returning.
        let status = Status(unsafe { (self.api.stop)(self.instance) });
        if status.is_ok() {
            self.advance();
            self.instance = ptr::null_mut();
            self.buffer = ptr::null_mut();
            self.len = 0;
        }
        status
    }

    fn frame(&self) -> Option<FrameRef<'_>> {
        if self.buffer.is_null() {
            return None;
        }
        // SAFETY: the buffer stays allocated until `stop`, which needs
        // `&mut self` and so cannot run while this borrow is alive.
        let pixels = unsafe { driver_pixels(self.buffer, self.len) };
        Some(FrameRef::new(pixels, &self.sequence))
    }
}

impl Drop for NativeDriver {
    fn drop(&mut self) {
        if self.instance.is_null() {
            return;
        }
        let status = self.stop();
        if !status.is_ok() {
            warn!(%status, "failed to release driver instance on drop");
        }
    }
}

struct LegacyApi {
    initialize: LegacyInitFn,
    start: LegacyU32Fn,
    stop: LegacyFn,
    set_verbose: LegacyBoolFn,
    set_fade_time: LegacyU32Fn,
    get_fade_time: LegacyGetFn,
    set_timeout: Option<LegacyU32Fn>,
}

/// Global-singleton driver generation.
///
/// The library holds its session in process-wide state, so only one
/// `LegacyDriver` may be initialized at a time. Use it through
/// [`GlobalSession`](crate::GlobalSession), which enforces that.
pub struct LegacyDriver {
    api: LegacyApi,
    capabilities: DriverCapabilities,
    active: bool,
    buffer: *mut u8,
    len: usize,
    sequence: AtomicU64,
    _library: Library,
}

impl LegacyDriver {
    /// Load the driver library at `path` and resolve its symbols.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let library = open(path)?;
        let api = LegacyApi {
            initialize: symbol(&library, "initialize")?,
            start: symbol(&library, "start")?,
            stop: symbol(&library, "stop")?,
            set_verbose: symbol(&library, "setVerbose")?,
            set_fade_time: symbol(&library, "setFadeTime")?,
            get_fade_time: symbol(&library, "getFadeTime")?,
            set_timeout: optional_symbol(&library, "setTimeout"),
        };

        let mut capabilities = DriverCapabilities::legacy(&path.display().to_string());
        if api.set_timeout.is_none() {
            capabilities.timeout = FieldCapability::UNSUPPORTED;
        }
        debug!(path = %path.display(), "loaded legacy driver");

        Ok(Self {
            api,
            capabilities,
            active: false,
            buffer: ptr::null_mut(),
            len: 0,
            sequence: AtomicU64::new(0),
            _library: library,
        })
    }
}

impl Driver for LegacyDriver {
    fn capabilities(&self) -> &DriverCapabilities {
        &self.capabilities
    }

    fn initialize(&mut self, verbose: bool) -> Result<Geometry, Status> {
        // Verbosity is global state here and must be set first.
        self.set_verbose(verbose).into_result()?;

        let mut buffer: *mut u8 = ptr::null_mut();
        let (mut width, mut height) = (0u32, 0u32);
        // SAFETY: all three out-pointers reference live locals.
        Status(unsafe { (self.api.initialize)(&mut buffer, &mut width, &mut height) })
            .into_result()?;

        self.active = true;
        self.buffer = buffer;
        self.len = if buffer.is_null() { 0 } else { buffer_len(width, height) };
        Ok(Geometry::new(width, height))
    }

    fn set_verbose(&mut self, verbose: bool) -> Status {
        // SAFETY: takes a plain value.
        Status(unsafe { (self.api.set_verbose)(verbose) })
    }

    fn set_fade_time(&mut self, milliseconds: u32) -> Status {
        // SAFETY: takes a plain value.
        Status(unsafe { (self.api.set_fade_time)(milliseconds) })
    }

    fn fade_time(&self) -> Result<u32, Status> {
        let mut value = 0u32;
        // SAFETY: `value` is a live local.
        Status(unsafe { (self.api.get_fade_time)(&mut value) }).into_result()?;
        Ok(value)
    }

    fn set_fade_frequency(&mut self, _hertz: u32) -> Status {
        Status::FAILED
    }

    fn fade_frequency(&self) -> Result<u32, Status> {
        Err(Status::FAILED)
    }

    fn set_timeout(&mut self, milliseconds: u32) -> Status {
        let Some(set) = self.api.set_timeout else {
            return Status::FAILED;
        };
        // SAFETY: takes a plain value.
        Status(unsafe { set(milliseconds) })
    }

    fn start(&mut self, channel: u32) -> Status {
        // SAFETY: takes a plain value.
        let status = Status(unsafe { (self.api.start)(channel) });
        if status.is_ok() {
            self.sequence.fetch_add(2, Ordering::AcqRel);
        }
        status
    }

    fn stop(&mut self) -> Status {
        // SAFETY: no arguments. The driver frees the buffer before returning.
        let status = Status(unsafe { (self.api.stop)() });
        if status.is_ok() {
            self.sequence.fetch_add(2, Ordering::AcqRel);
            self.active = false;
            self.buffer = ptr::null_mut();
            self.len = 0;
        }
        status
    }

    fn frame(&self) -> Option<FrameRef<'_>> {
        if self.buffer.is_null() {
            return None;
        }
        // SAFETY: as for `NativeDriver::frame`.
        let pixels = unsafe { driver_pixels(self.buffer, self.len) };
        Some(FrameRef::new(pixels, &self.sequence))
    }
}

impl Drop for LegacyDriver {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        let status = self.stop();
        if !status.is_ok() {
            warn!(%status, "failed to release driver session on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_library_is_reported() {
        let err = NativeDriver::load("/nonexistent/libstreamer.so").err();
        assert!(matches!(err, Some(LoadError::Library { .. })));

        let err = LegacyDriver::load("/nonexistent/liblib.so").err();
        assert!(matches!(err, Some(LoadError::Library { .. })));
    }

    #[test]
    fn test_buffer_len_is_interleaved_rgb() {
        assert_eq!(buffer_len(64, 32), 64 * 32 * 3);
        assert_eq!(buffer_len(0, 32), 0);
        assert_eq!(buffer_len(u32::MAX, u32::MAX), 0);
    }
}
