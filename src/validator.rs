//! Frame validation against the reference pattern.

use crate::image::Image;
use serde::Serialize;
use std::fmt;

/// First coordinate at which a frame differs from the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    /// Column of the differing sample
    pub x: usize,
    /// Row of the differing sample
    pub y: usize,
    /// Reference value
    pub expected: u32,
    /// Value read from the dataset
    pub actual: u32,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}) expected {} got {}",
            self.x, self.y, self.expected, self.actual
        )
    }
}

/// Compare `candidate` against `reference` and report the first differing sample.
///
/// Coordinates are scanned column by column (`x` outer, `y` inner) and the scan stops
/// at the first difference. Both images must have the same dimensions; callers
/// guarantee this by checking the dataset shape before any read.
pub fn first_mismatch(reference: &Image, candidate: &Image) -> Option<Mismatch> {
    debug_assert_eq!(reference.dims(), candidate.dims());

    let dims = reference.dims();
    let expected = reference.samples();
    let actual = candidate.samples();
    for x in 0..dims.width {
        for y in 0..dims.height {
            let index = dims.index_of(x, y);
            tracing::trace!(x, y, expected = expected[index], actual = actual[index], "Comparing");
            if expected[index] != actual[index] {
                return Some(Mismatch {
                    x,
                    y,
                    expected: expected[index],
                    actual: actual[index],
                });
            }
        }
    }
    None
}

/// `true` iff every sample of `candidate` equals the reference.
pub fn matches(reference: &Image, candidate: &Image) -> bool {
    first_mismatch(reference, candidate).is_none()
}
