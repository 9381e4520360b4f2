//! # SWMR Dataset Monitor
//!
//! Watches a dataset that a single writer appends image frames to while it is being
//! read (single-writer / multiple-reader access). Every time the committed extent
//! grows, the newest frame is read and compared sample by sample against a known
//! reference image. Monitoring ends when no new data arrives within a timeout or when
//! the caller asks it to stop.
//!
//! ## Crate Structure
//!
//! - **`stopwatch`**: Elapsed time since the last successful read.
//! - **`image`**: `Dimensions`, `Image` and the reusable `FrameBuffer`.
//! - **`reference`**: The known-good pattern frames are compared against.
//! - **`validator`**: Sample-by-sample comparison reporting the first mismatch.
//! - **`store`**: The `FrameSource` capability with HDF5 and in-memory backends.
//! - **`monitor`**: The polling state machine, check history and report.
//! - **`session`**: Opens a source, runs the monitor, always closes the source.
//! - **`config`**: Figment-based settings (defaults, TOML, environment).
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`error`**: `MonitorError` and `ConsistencyError`.

pub mod config;
pub mod error;
pub mod image;
pub mod logging;
pub mod monitor;
pub mod reference;
pub mod session;
pub mod stopwatch;
pub mod store;
pub mod validator;

pub use error::{MonitorError, MonitorResult};
pub use monitor::{Monitor, MonitorOptions, MonitorOutcome, MonitorReport, MonitorState};
pub use session::Session;
