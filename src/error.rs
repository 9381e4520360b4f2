//! Custom error types for the monitor.
//!
//! This module defines the primary error type, `MonitorError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the things that can go wrong while watching a dataset that another process is
//! appending to.
//!
//! ## Error Hierarchy
//!
//! `MonitorError` consolidates the failure modes of a monitoring session:
//!
//! - **`Open`**: The dataset file could not be opened for concurrent (SWMR) reading. The
//!   path may not exist, may not be a valid store, or the store may refuse SWMR-read mode.
//! - **`Consistency`**: The writer and the reader disagree about the shape of a frame, or
//!   the writer appears to have removed committed frames. These indicate a protocol
//!   violation and are never retried.
//! - **`Refresh`**: The file is open but the dataset inside it could not be refreshed or
//!   its extent could not be queried.
//! - **`Read`**: A frame whose existence was already confirmed could not be transferred.
//! - **`Closed`**: An operation was attempted on a dataset handle that was already released.
//! - **`Config`** / **`Configuration`**: Parsing and semantic validation failures of the
//!   configuration files.
//! - **`FeatureNotEnabled`**: The requested storage backend was not compiled in. The message
//!   tells the user which cargo feature to enable.
//!
//! A frame whose contents differ from the reference pattern is *not* an error; see
//! [`crate::validator::Mismatch`]. Neither is an inactivity timeout; see
//! [`crate::monitor::MonitorOutcome`].

use crate::image::Dimensions;
use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type MonitorResult<T> = std::result::Result<T, MonitorError>;

/// Primary error type for a monitoring session.
///
/// Every variant is fatal to the session that produced it: the session releases its
/// dataset handle and propagates the error to its owner, which decides what to do.
#[derive(Error, Debug)]
pub enum MonitorError {
    /// The dataset file could not be opened in SWMR-read mode.
    #[error("Failed to open '{}' for SWMR reading: {reason}", path.display())]
    Open {
        /// Path that was passed to `open`
        path: PathBuf,
        /// Underlying cause reported by the storage layer
        reason: String,
    },

    /// The open dataset could not be refreshed or its extent could not be queried.
    #[error("Failed to refresh dataset in '{}': {reason}", path.display())]
    Refresh {
        /// File holding the dataset
        path: PathBuf,
        /// Step that failed
        reason: String,
    },

    /// Writer and reader disagree about the layout of the dataset.
    #[error("Dataset consistency violation: {0}")]
    Consistency(#[from] ConsistencyError),

    /// A committed frame could not be transferred into the read buffer.
    #[error("Failed to read frame {index}: {reason}")]
    Read {
        /// Frame index along the growth dimension
        index: u64,
        /// Underlying cause reported by the storage layer
        reason: String,
    },

    /// The dataset handle was already released.
    #[error("Dataset handle is closed")]
    Closed,

    /// Configuration file parsing failed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration parsed but failed semantic validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// The requested backend was compiled out.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl MonitorError {
    /// Build an `Open` error from any displayable cause.
    pub fn open(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::Open {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Build a `Refresh` error from any displayable cause.
    pub fn refresh(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::Refresh {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Build a `Read` error from any displayable cause.
    pub fn read(index: u64, reason: impl std::fmt::Display) -> Self {
        Self::Read {
            index,
            reason: reason.to_string(),
        }
    }

    /// Whether the error ends the session.
    ///
    /// All current variants do; the method exists so that callers can express the
    /// decision explicitly instead of matching on variants.
    pub fn is_fatal(&self) -> bool {
        match self {
            MonitorError::Open { .. }
            | MonitorError::Refresh { .. }
            | MonitorError::Consistency(_)
            | MonitorError::Read { .. }
            | MonitorError::Closed
            | MonitorError::Config(_)
            | MonitorError::Configuration(_)
            | MonitorError::FeatureNotEnabled(_) => true,
        }
    }
}

impl From<figment::Error> for MonitorError {
    fn from(value: figment::Error) -> Self {
        MonitorError::Config(Box::new(value))
    }
}

/// Ways in which the dataset can disagree with what the reader expects.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyError {
    /// The non-growth dimensions differ from the reference image.
    #[error("frame shape mismatch: expected {expected}, dataset reports {actual}")]
    ShapeMismatch {
        /// Dimensions of the reference image
        expected: Dimensions,
        /// Dimensions observed in the dataset
        actual: Dimensions,
    },

    /// The dataset does not have one growth dimension plus two frame dimensions.
    #[error("dataset rank mismatch: expected {expected} dimensions, found {actual}")]
    RankMismatch {
        /// Required rank
        expected: usize,
        /// Observed rank
        actual: usize,
    },

    /// The committed frame count went backwards.
    #[error("committed frame count regressed from {previous} to {observed}")]
    FrameCountRegressed {
        /// Largest count seen earlier in the session
        previous: u64,
        /// Count reported by the latest refresh
        observed: u64,
    },

    /// A dataset dimension does not fit in the platform's address space.
    #[error("dataset dimension {extent} is too large for this platform")]
    ExtentTooLarge {
        /// Reported dimension length
        extent: u64,
    },

    /// A read was requested past the committed extent.
    #[error("frame {index} requested but only {available} frames are committed")]
    MissingFrame {
        /// Requested frame index
        index: u64,
        /// Committed frame count at the time of the request
        available: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_mismatch_names_both_shapes() {
        let err: MonitorError = ConsistencyError::ShapeMismatch {
            expected: Dimensions::new(4, 3),
            actual: Dimensions::new(5, 3),
        }
        .into();
        let message = err.to_string();
        assert!(message.contains("4x3"), "{message}");
        assert!(message.contains("5x3"), "{message}");
        assert!(err.is_fatal());
    }

    #[test]
    fn open_error_names_path() {
        let err = MonitorError::open("/tmp/missing.h5", "no such file");
        assert_eq!(
            err.to_string(),
            "Failed to open '/tmp/missing.h5' for SWMR reading: no such file"
        );
    }

    #[test]
    fn refresh_error_names_the_failed_step() {
        let err = MonitorError::refresh("/data/run.h5", "H5Drefresh failed");
        let message = err.to_string();
        assert_eq!(
            message,
            "Failed to refresh dataset in '/data/run.h5': H5Drefresh failed"
        );
        assert!(!message.contains("open"));
        assert!(err.is_fatal());
    }

    #[test]
    fn extent_too_large_is_a_consistency_error() {
        let err: MonitorError = ConsistencyError::ExtentTooLarge { extent: u64::MAX }.into();
        assert!(matches!(err, MonitorError::Consistency(_)));
        assert!(err.to_string().contains(&u64::MAX.to_string()));
    }

    #[test]
    fn feature_not_enabled_tells_how_to_fix() {
        let err = MonitorError::FeatureNotEnabled("storage_hdf5".into());
        assert!(err.to_string().contains("--features storage_hdf5"));
    }
}
