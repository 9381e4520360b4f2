//! Dataset access.
//!
//! The monitor never talks to a storage engine directly. It goes through the
//! [`FrameSource`] capability, which models the reader side of a single-writer /
//! multiple-reader store:
//!
//! - `latest_frame_count` refreshes the reader's view so that writer commits made
//!   before the call become visible, then reports the extent along the growth
//!   dimension. The frame shape is checked against the reference on every call.
//! - `read_frame` copies one committed frame into a caller-owned image.
//! - `close` releases the handle; it is idempotent and backends also release on drop.
//!
//! # Backends
//!
//! - [`hdf5::Hdf5Source`] - HDF5 files opened in SWMR-read mode (feature `storage_hdf5`)
//! - [`memory::MemoryStore`] - in-process emulation of the same commit/refresh protocol,
//!   used by the `simulate` command and the test suite

use crate::error::MonitorResult;
use crate::image::{Dimensions, Image};
use async_trait::async_trait;
use serde::Serialize;

#[allow(unsafe_code)]
pub mod hdf5;
pub mod memory;

/// Number of open storage objects per kind, for leak diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ObjectCounts {
    /// Open dataset objects
    pub datasets: u64,
    /// Open groups
    pub groups: u64,
    /// Open attributes
    pub attributes: u64,
    /// Open committed datatypes
    pub datatypes: u64,
    /// Open files
    pub files: u64,
    /// Sum over all kinds
    pub all: u64,
}

/// Reader side of a dataset that another process appends frames to.
///
/// # Contract
/// - Frame counts observed through one source never decrease.
/// - A frame with index `< latest_frame_count()` is fully committed and readable.
/// - After `close`, every method except `close` and `is_closed` fails with
///   [`crate::error::MonitorError::Closed`].
#[async_trait]
pub trait FrameSource: Send {
    /// Human-readable location of the dataset, for logs.
    fn describe(&self) -> String;

    /// Refresh the view and return the committed frame count.
    ///
    /// Fails with a consistency error when the frame shape differs from `expected`.
    async fn latest_frame_count(&mut self, expected: Dimensions) -> MonitorResult<u64>;

    /// Copy frame `index` into `into`, whose dimensions were validated upstream.
    async fn read_frame(&mut self, index: u64, into: &mut Image) -> MonitorResult<()>;

    /// Release the handle. Calling it again is a no-op.
    async fn close(&mut self) -> MonitorResult<()>;

    /// Whether `close` has run.
    fn is_closed(&self) -> bool;

    /// Open-object counts for diagnostics, when the backend can report them.
    fn open_object_counts(&self) -> Option<ObjectCounts> {
        None
    }
}
