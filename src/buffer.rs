//! Shared frame memory and the read-only views over it.
//!
//! The driver owns the pixel memory and writes it from its own thread while
//! consumers read it. Pixels are stored as `AtomicU8` so concurrent access is
//! never a data race, and every buffer carries a sequence counter: a writer
//! makes it odd before touching pixels and even again afterwards. Half the
//! sequence is the frame generation, which only ever grows. A reader that
//! sees the same even sequence before and after copying holds one whole
//! generation.

use std::sync::atomic::{fence, AtomicU64, AtomicU8, Ordering};
use std::thread;

use crate::error::BufferError;
use crate::traits::Geometry;

/// Interleaved channels per pixel.
pub const CHANNELS: u32 = 3;

/// Static description of a frame buffer, fixed at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameBufferDescriptor {
    width: u32,
    height: u32,
    stride: usize,
    len: usize,
}

impl FrameBufferDescriptor {
    /// Describe a buffer of the given geometry. Returns `None` when either
    /// dimension is zero or the byte size does not fit in `usize`.
    #[must_use]
    pub const fn new(geometry: Geometry) -> Option<Self> {
        if geometry.width == 0 || geometry.height == 0 {
            return None;
        }
        let Some(stride) = (geometry.width as usize).checked_mul(CHANNELS as usize) else {
            return None;
        };
        let Some(len) = stride.checked_mul(geometry.height as usize) else {
            return None;
        };
        Some(Self {
            width: geometry.width,
            height: geometry.height,
            stride,
            len,
        })
    }

    /// Frame width in pixels.
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Frame height in pixels.
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Channels per pixel; always 3.
    pub const fn channels(&self) -> u32 {
        CHANNELS
    }

    /// Bytes per row.
    pub const fn stride(&self) -> usize {
        self.stride
    }

    /// Total bytes.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Always false; a descriptor never describes an empty buffer.
    pub const fn is_empty(&self) -> bool {
        false
    }
}

/// Borrowed access to driver-owned pixel memory and its sequence counter.
#[derive(Debug, Clone, Copy)]
pub struct FrameRef<'a> {
    pixels: &'a [AtomicU8],
    sequence: &'a AtomicU64,
}

impl<'a> FrameRef<'a> {
    /// Pair a pixel slice with its sequence counter.
    pub fn new(pixels: &'a [AtomicU8], sequence: &'a AtomicU64) -> Self {
        Self { pixels, sequence }
    }

    /// Bytes in the buffer.
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    /// Whether the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Last completed generation.
    pub fn generation(&self) -> u64 {
        self.sequence.load(Ordering::Acquire) / 2
    }

    /// Copy one whole generation into `out`, retrying while a write
    /// overlaps. Returns the generation copied.
    fn copy_consistent(&self, out: &mut [u8]) -> u64 {
        loop {
            let before = self.sequence.load(Ordering::Acquire);
            if before & 1 == 1 {
                thread::yield_now();
                continue;
            }
            for (dst, cell) in out.iter_mut().zip(self.pixels) {
                *dst = cell.load(Ordering::Relaxed);
            }
            fence(Ordering::Acquire);
            if self.sequence.load(Ordering::Relaxed) == before {
                return before / 2;
            }
        }
    }
}

/// Owned frame memory with a single writer, for drivers implemented in Rust.
#[derive(Debug)]
pub struct FrameStore {
    pixels: Box<[AtomicU8]>,
    sequence: AtomicU64,
}

impl FrameStore {
    /// Allocate a zeroed buffer of `len` bytes at generation 0.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            pixels: (0..len).map(|_| AtomicU8::new(0)).collect(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Bytes in the buffer.
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    /// Whether the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Last completed generation.
    pub fn generation(&self) -> u64 {
        self.sequence.load(Ordering::Acquire) / 2
    }

    /// Write a full frame and return its generation.
    ///
    /// Bytes beyond the buffer length are ignored. Only one thread may
    /// publish to a store at a time.
    pub fn publish(&self, frame: &[u8]) -> u64 {
        let start = self.sequence.load(Ordering::Relaxed);
        self.sequence.store(start + 1, Ordering::Relaxed);
        fence(Ordering::Release);
        for (cell, byte) in self.pixels.iter().zip(frame) {
            cell.store(*byte, Ordering::Relaxed);
        }
        self.sequence.store(start + 2, Ordering::Release);
        (start + 2) / 2
    }

    /// Borrow the buffer for reading.
    pub fn frame(&self) -> FrameRef<'_> {
        FrameRef::new(&self.pixels, &self.sequence)
    }
}

/// Zero-copy, read-only view of a streaming frame buffer.
///
/// The driver may overwrite pixels while the view is held. Use
/// [`is_consistent`](Self::is_consistent) after reading individual pixels to
/// detect an overlapping write, or [`snapshot`](Self::snapshot) for a copy of
/// one whole generation.
///
/// Tear detection needs a driver that bumps the sequence around every frame
/// write. For drivers that only bump it on lifecycle transitions the view is
/// unsequenced: `is_consistent` returns `None` and snapshots are unverified.
#[derive(Debug, Clone, Copy)]
pub struct PixelGrid<'a> {
    frame: FrameRef<'a>,
    descriptor: FrameBufferDescriptor,
    opened_at: u64,
    sequenced: bool,
}

impl<'a> PixelGrid<'a> {
    pub(crate) fn new(
        frame: FrameRef<'a>,
        descriptor: FrameBufferDescriptor,
        sequenced: bool,
    ) -> Result<Self, BufferError> {
        if frame.len() != descriptor.len() {
            return Err(BufferError::GeometryChanged {
                expected: descriptor.len(),
                actual: frame.len(),
            });
        }
        let opened_at = frame.sequence.load(Ordering::Acquire);
        Ok(Self {
            frame,
            descriptor,
            opened_at,
            sequenced,
        })
    }

    /// Frame width in pixels.
    pub const fn width(&self) -> u32 {
        self.descriptor.width()
    }

    /// Frame height in pixels.
    pub const fn height(&self) -> u32 {
        self.descriptor.height()
    }

    /// Channels per pixel.
    pub const fn channels(&self) -> u32 {
        self.descriptor.channels()
    }

    /// Buffer description.
    pub const fn descriptor(&self) -> FrameBufferDescriptor {
        self.descriptor
    }

    /// Generation completed when the view was opened.
    pub const fn generation(&self) -> u64 {
        self.opened_at / 2
    }

    /// Channel values of the pixel at (`x`, `y`), or `None` out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        let offset = y as usize * self.descriptor.stride() + x as usize * CHANNELS as usize;
        let cells = self.frame.pixels.get(offset..offset + CHANNELS as usize)?;
        Some([
            cells.first()?.load(Ordering::Relaxed),
            cells.get(1)?.load(Ordering::Relaxed),
            cells.get(2)?.load(Ordering::Relaxed),
        ])
    }

    /// Whether no write started since the view was opened, i.e. every pixel
    /// read so far belongs to [`generation`](Self::generation).
    ///
    /// `None` when the driver does not publish per-frame generations.
    pub fn is_consistent(&self) -> Option<bool> {
        if !self.sequenced {
            return None;
        }
        fence(Ordering::Acquire);
        let now = self.frame.sequence.load(Ordering::Relaxed);
        Some(now == self.opened_at && now & 1 == 0)
    }

    /// Copy the buffer out.
    ///
    /// With a sequenced driver the copy is retried until it holds one whole
    /// generation. Otherwise it is a single pass that may be torn, and the
    /// snapshot says so through [`FrameSnapshot::is_verified`].
    pub fn snapshot(&self) -> FrameSnapshot {
        let mut data = vec![0u8; self.descriptor.len()];
        let generation = self.frame.copy_consistent(&mut data);
        FrameSnapshot {
            generation,
            descriptor: self.descriptor,
            data,
            verified: self.sequenced,
        }
    }
}

/// An owned copy of the frame buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSnapshot {
    generation: u64,
    descriptor: FrameBufferDescriptor,
    data: Vec<u8>,
    verified: bool,
}

impl FrameSnapshot {
    /// Whether the copy is known to hold a single generation.
    pub const fn is_verified(&self) -> bool {
        self.verified
    }

    /// Generation this copy belongs to.
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Buffer description.
    pub const fn descriptor(&self) -> FrameBufferDescriptor {
        self.descriptor
    }

    /// Row-major interleaved pixel bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Take the pixel bytes.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Channel values of the pixel at (`x`, `y`), or `None` out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.descriptor.width() || y >= self.descriptor.height() {
            return None;
        }
        let offset = y as usize * self.descriptor.stride() + x as usize * CHANNELS as usize;
        match self.data.get(offset..offset + CHANNELS as usize)? {
            [a, b, c] => Some([*a, *b, *c]),
            _ => None,
        }
    }

    /// Mean value of each channel across the frame.
    #[allow(clippy::cast_precision_loss)]
    pub fn mean_channels(&self) -> [f64; 3] {
        let mut sums = [0u64; 3];
        for px in self.data.chunks_exact(CHANNELS as usize) {
            for (sum, value) in sums.iter_mut().zip(px) {
                *sum += u64::from(*value);
            }
        }
        let count = (self.data.len() / CHANNELS as usize).max(1) as f64;
        sums.map(|sum| sum as f64 / count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(width: u32, height: u32) -> FrameBufferDescriptor {
        FrameBufferDescriptor::new(Geometry::new(width, height)).expect("non-zero geometry")
    }

    #[test]
    fn test_descriptor_rejects_zero_dimensions() {
        assert!(FrameBufferDescriptor::new(Geometry::new(0, 32)).is_none());
        assert!(FrameBufferDescriptor::new(Geometry::new(64, 0)).is_none());
        assert!(FrameBufferDescriptor::new(Geometry::new(u32::MAX, u32::MAX)).is_none());

        let desc = descriptor(64, 32);
        assert_eq!(desc.channels(), 3);
        assert_eq!(desc.stride(), 192);
        assert_eq!(desc.len(), 64 * 32 * 3);
    }

    #[test]
    fn test_publish_advances_generation() {
        let store = FrameStore::new(12);
        assert_eq!(store.generation(), 0);
        assert_eq!(store.publish(&[1; 12]), 1);
        assert_eq!(store.publish(&[2; 12]), 2);
        assert_eq!(store.frame().generation(), 2);
    }

    #[test]
    fn test_pixel_grid_bounds() {
        let desc = descriptor(2, 2);
        let store = FrameStore::new(desc.len());
        store.publish(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11]);

        let grid = PixelGrid::new(store.frame(), desc, true).expect("matching geometry");
        assert_eq!(grid.pixel(0, 0), Some([0, 1, 2]));
        assert_eq!(grid.pixel(1, 1), Some([9, 10, 11]));
        assert_eq!(grid.pixel(2, 0), None);
        assert_eq!(grid.pixel(0, 2), None);
    }

    #[test]
    fn test_pixel_grid_rejects_resized_buffer() {
        let store = FrameStore::new(10);
        let err = PixelGrid::new(store.frame(), descriptor(2, 2), true).expect_err("size mismatch");
        assert_eq!(
            err,
            BufferError::GeometryChanged {
                expected: 12,
                actual: 10
            }
        );
    }

    #[test]
    fn test_consistency_detects_later_write() {
        let desc = descriptor(1, 1);
        let store = FrameStore::new(desc.len());
        let grid = PixelGrid::new(store.frame(), desc, true).expect("matching geometry");
        assert_eq!(grid.is_consistent(), Some(true));

        store.publish(&[7, 7, 7]);
        assert_eq!(grid.is_consistent(), Some(false));

        let snapshot = grid.snapshot();
        assert_eq!(snapshot.generation(), 1);
        assert_eq!(snapshot.data(), &[7, 7, 7]);
        assert!(snapshot.is_verified());
    }

    #[test]
    fn test_unsequenced_view_makes_no_consistency_claim() {
        let desc = descriptor(1, 1);
        let store = FrameStore::new(desc.len());
        let grid = PixelGrid::new(store.frame(), desc, false).expect("matching geometry");
        assert_eq!(grid.is_consistent(), None);

        store.publish(&[9, 9, 9]);
        assert_eq!(grid.is_consistent(), None);

        let snapshot = grid.snapshot();
        assert_eq!(snapshot.data(), &[9, 9, 9]);
        assert!(!snapshot.is_verified());
    }

    #[test]
    fn test_snapshot_mean_channels() {
        let desc = descriptor(2, 1);
        let store = FrameStore::new(desc.len());
        store.publish(&[10, 20, 30, 30, 40, 50]);

        let snapshot = PixelGrid::new(store.frame(), desc, true)
            .expect("matching geometry")
            .snapshot();
        assert_eq!(snapshot.mean_channels(), [20.0, 30.0, 40.0]);
        assert_eq!(snapshot.pixel(1, 0), Some([30, 40, 50]));
    }
}
