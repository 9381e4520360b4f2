//! Image and frame buffer types.
//!
//! An [`Image`] is a 2-D grid of `u32` samples stored row-major: the sample at
//! coordinate `(x, y)` lives at `y * width + x`. Frames read from a dataset are
//! copied into a [`FrameBuffer`], which is allocated once per session and
//! overwritten on every read.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Width and height of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    /// Samples per row
    pub width: usize,
    /// Number of rows
    pub height: usize,
}

impl Dimensions {
    /// Create dimensions from width and height.
    pub const fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Total number of samples in a frame of this shape.
    pub const fn sample_count(&self) -> usize {
        self.width * self.height
    }

    /// Sample count, or `None` when `width * height` does not fit in `usize`.
    pub const fn checked_sample_count(&self) -> Option<usize> {
        self.width.checked_mul(self.height)
    }

    /// Flat row-major index of `(x, y)`.
    #[inline]
    pub const fn index_of(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Owned 2-D grid of samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    dims: Dimensions,
    data: Vec<u32>,
}

impl Image {
    /// Zero-filled image of the given shape.
    pub fn zeroed(dims: Dimensions) -> Self {
        Self {
            dims,
            data: vec![0; dims.sample_count()],
        }
    }

    /// Build an image from row-major samples.
    ///
    /// Returns `None` when `data.len()` is not `width * height`.
    pub fn from_samples(dims: Dimensions, data: Vec<u32>) -> Option<Self> {
        (data.len() == dims.sample_count()).then_some(Self { dims, data })
    }

    /// Shape of the image.
    pub fn dims(&self) -> Dimensions {
        self.dims
    }

    /// Sample at `(x, y)`, or `None` when out of bounds.
    pub fn get(&self, x: usize, y: usize) -> Option<u32> {
        if x >= self.dims.width || y >= self.dims.height {
            return None;
        }
        self.data.get(self.dims.index_of(x, y)).copied()
    }

    /// Overwrite the sample at `(x, y)`. Out-of-bounds writes are ignored.
    pub fn set(&mut self, x: usize, y: usize, value: u32) {
        if x < self.dims.width && y < self.dims.height {
            let index = self.dims.index_of(x, y);
            self.data[index] = value;
        }
    }

    /// Row-major samples.
    pub fn samples(&self) -> &[u32] {
        &self.data
    }

    /// Mutable row-major samples, for storage backends filling the buffer in place.
    pub fn samples_mut(&mut self) -> &mut [u32] {
        &mut self.data
    }
}

/// Session-owned buffer holding the most recently read frame.
///
/// The buffer is sized from the reference dimensions at session start and reused for
/// every read, so reading a frame never allocates.
#[derive(Debug)]
pub struct FrameBuffer {
    image: Image,
    frame_index: Option<u64>,
}

impl FrameBuffer {
    /// Allocate a buffer for frames of the given shape.
    pub fn new(dims: Dimensions) -> Self {
        Self {
            image: Image::zeroed(dims),
            frame_index: None,
        }
    }

    /// Shape of the frames this buffer holds.
    pub fn dims(&self) -> Dimensions {
        self.image.dims()
    }

    /// Index of the frame currently held, `None` before the first read.
    pub fn frame_index(&self) -> Option<u64> {
        self.frame_index
    }

    /// Number of frames up to and including the one held (0 before the first read).
    pub fn frames_consumed(&self) -> u64 {
        self.frame_index.map_or(0, |index| index + 1)
    }

    /// The image most recently read.
    pub fn image(&self) -> &Image {
        &self.image
    }

    /// Mutable access for a storage backend. Call [`FrameBuffer::mark_read`] after a
    /// successful transfer.
    pub fn image_mut(&mut self) -> &mut Image {
        &mut self.image
    }

    /// Record that the buffer now holds frame `index`.
    pub fn mark_read(&mut self, index: u64) {
        self.frame_index = Some(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_major_indexing() {
        let dims = Dimensions::new(4, 3);
        let image = Image::from_samples(dims, (1..=12).collect()).unwrap();
        assert_eq!(image.get(0, 0), Some(1));
        assert_eq!(image.get(3, 0), Some(4));
        assert_eq!(image.get(0, 1), Some(5));
        assert_eq!(image.get(3, 2), Some(12));
        assert_eq!(image.get(4, 0), None);
        assert_eq!(image.get(0, 3), None);
    }

    #[test]
    fn from_samples_rejects_wrong_length() {
        assert!(Image::from_samples(Dimensions::new(4, 3), vec![0; 11]).is_none());
    }

    #[test]
    fn frame_buffer_tracks_index() {
        let mut buffer = FrameBuffer::new(Dimensions::new(2, 2));
        assert_eq!(buffer.frame_index(), None);
        assert_eq!(buffer.frames_consumed(), 0);

        buffer.image_mut().set(1, 1, 7);
        buffer.mark_read(4);

        assert_eq!(buffer.frame_index(), Some(4));
        assert_eq!(buffer.frames_consumed(), 5);
        assert_eq!(buffer.image().get(1, 1), Some(7));
    }

    #[test]
    fn oversized_shape_has_no_sample_count() {
        assert_eq!(Dimensions::new(4, 3).checked_sample_count(), Some(12));
        assert_eq!(Dimensions::new(usize::MAX, 2).checked_sample_count(), None);
    }

    #[test]
    fn dimensions_display() {
        assert_eq!(Dimensions::new(4, 3).to_string(), "4x3");
    }
}
