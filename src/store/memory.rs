//! In-process SWMR store.
//!
//! Emulates the commit/refresh protocol of an SWMR-capable file format so the monitor
//! can be exercised without a file on disk:
//!
//! - A [`MemoryWriter`] stages frames with `append` and publishes them with `commit`.
//!   Staged frames are invisible to readers.
//! - A [`MemorySource`] keeps a cached view of the committed extent. The view only
//!   changes inside `latest_frame_count`, which performs the refresh.
//!
//! # Example
//!
//! ```rust,ignore
//! let store = MemoryStore::new(Dimensions::new(4, 3));
//! let mut writer = store.writer();
//! let mut reader = store.reader();
//!
//! writer.append(&ReferencePattern::builtin().load()).await?;
//! assert_eq!(reader.latest_frame_count(dims).await?, 0); // staged, not committed
//! writer.commit().await;
//! assert_eq!(reader.latest_frame_count(dims).await?, 1);
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{FrameSource, ObjectCounts};
use crate::error::{ConsistencyError, MonitorError, MonitorResult};
use crate::image::{Dimensions, Image};

#[derive(Debug)]
struct StoreState {
    dims: Dimensions,
    frames: Vec<Vec<u32>>,
    open_readers: u64,
}

/// Shared in-memory dataset with one growth dimension.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<StoreState>>,
    name: Arc<str>,
}

impl MemoryStore {
    /// Empty dataset whose frames have the given shape.
    pub fn new(dims: Dimensions) -> Self {
        Self::named("memory", dims)
    }

    /// Empty dataset with a name used in log output.
    pub fn named(name: &str, dims: Dimensions) -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState {
                dims,
                frames: Vec::new(),
                open_readers: 0,
            })),
            name: Arc::from(name),
        }
    }

    /// Writer handle. The protocol allows one writer; this is not enforced.
    pub fn writer(&self) -> MemoryWriter {
        MemoryWriter {
            store: self.clone(),
            staged: Vec::new(),
        }
    }

    /// Open a reader handle.
    pub async fn reader(&self) -> MemorySource {
        self.state.write().await.open_readers += 1;
        MemorySource {
            store: self.clone(),
            view: None,
            closed: false,
        }
    }

    /// Number of committed frames, bypassing any reader view.
    pub async fn committed(&self) -> u64 {
        self.state.read().await.frames.len() as u64
    }

    /// Number of reader handles not yet closed.
    pub async fn open_readers(&self) -> u64 {
        self.state.read().await.open_readers
    }
}

/// Appending side of a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryWriter {
    store: MemoryStore,
    staged: Vec<Vec<u32>>,
}

impl MemoryWriter {
    /// Stage a frame. It becomes visible to readers on the next `commit`.
    pub async fn append(&mut self, frame: &Image) -> MonitorResult<()> {
        let dims = self.store.state.read().await.dims;
        if frame.dims() != dims {
            return Err(ConsistencyError::ShapeMismatch {
                expected: dims,
                actual: frame.dims(),
            }
            .into());
        }
        self.staged.push(frame.samples().to_vec());
        Ok(())
    }

    /// Publish all staged frames atomically. Returns the new committed count.
    pub async fn commit(&mut self) -> u64 {
        let mut state = self.store.state.write().await;
        state.frames.append(&mut self.staged);
        state.frames.len() as u64
    }

    /// Stage and publish a single frame.
    pub async fn append_and_commit(&mut self, frame: &Image) -> MonitorResult<u64> {
        self.append(frame).await?;
        Ok(self.commit().await)
    }

    /// Change the frame shape the dataset reports, as a misbehaving writer would.
    ///
    /// Already committed frames keep their old sample count. Staged frames are dropped.
    pub async fn reshape(&mut self, dims: Dimensions) {
        self.staged.clear();
        self.store.state.write().await.dims = dims;
    }

    /// Number of frames staged but not yet committed.
    pub fn staged(&self) -> usize {
        self.staged.len()
    }
}

#[derive(Debug, Clone, Copy)]
struct View {
    frames: u64,
}

/// Reading side of a [`MemoryStore`].
#[derive(Debug)]
pub struct MemorySource {
    store: MemoryStore,
    view: Option<View>,
    closed: bool,
}

impl MemorySource {
    fn ensure_open(&self) -> MonitorResult<()> {
        if self.closed {
            Err(MonitorError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl FrameSource for MemorySource {
    fn describe(&self) -> String {
        format!("memory:{}", self.store.name)
    }

    async fn latest_frame_count(&mut self, expected: Dimensions) -> MonitorResult<u64> {
        self.ensure_open()?;
        let state = self.store.state.read().await;
        if state.dims != expected {
            return Err(ConsistencyError::ShapeMismatch {
                expected,
                actual: state.dims,
            }
            .into());
        }
        let view = View {
            frames: state.frames.len() as u64,
        };
        self.view = Some(view);
        tracing::debug!(
            width = state.dims.width,
            height = state.dims.height,
            frames = view.frames,
            "Got dimensions"
        );
        Ok(view.frames)
    }

    async fn read_frame(&mut self, index: u64, into: &mut Image) -> MonitorResult<()> {
        self.ensure_open()?;
        let available = self.view.map_or(0, |view| view.frames);
        if index >= available {
            return Err(ConsistencyError::MissingFrame { index, available }.into());
        }

        let state = self.store.state.read().await;
        let frame = usize::try_from(index)
            .ok()
            .and_then(|i| state.frames.get(i))
            .ok_or_else(|| MonitorError::read(index, "frame vanished from the store"))?;
        let target = into.samples_mut();
        if frame.len() != target.len() {
            return Err(MonitorError::read(
                index,
                format!(
                    "frame holds {} samples, buffer expects {}",
                    frame.len(),
                    target.len()
                ),
            ));
        }
        target.copy_from_slice(frame);
        Ok(())
    }

    async fn close(&mut self) -> MonitorResult<()> {
        if !self.closed {
            self.closed = true;
            self.view = None;
            let mut state = self.store.state.write().await;
            state.open_readers = state.open_readers.saturating_sub(1);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn open_object_counts(&self) -> Option<ObjectCounts> {
        let files = u64::from(!self.closed);
        Some(ObjectCounts {
            files,
            all: files,
            ..ObjectCounts::default()
        })
    }
}

impl Drop for MemorySource {
    fn drop(&mut self) {
        if !self.closed {
            // Best effort: a writer holding the lock right now keeps the stale count.
            if let Ok(mut state) = self.store.state.try_write() {
                state.open_readers = state.open_readers.saturating_sub(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::ReferencePattern;

    fn dims() -> Dimensions {
        Dimensions::new(4, 3)
    }

    #[tokio::test]
    async fn staged_frames_are_invisible_until_commit() {
        let store = MemoryStore::new(dims());
        let mut writer = store.writer();
        let mut reader = store.reader().await;

        writer.append(&ReferencePattern::builtin().load()).await.unwrap();
        assert_eq!(writer.staged(), 1);
        assert_eq!(reader.latest_frame_count(dims()).await.unwrap(), 0);

        assert_eq!(writer.commit().await, 1);
        assert_eq!(reader.latest_frame_count(dims()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn read_requires_refresh() {
        let store = MemoryStore::new(dims());
        let mut writer = store.writer();
        let mut reader = store.reader().await;
        let mut buffer = Image::zeroed(dims());

        writer
            .append_and_commit(&ReferencePattern::builtin().load())
            .await
            .unwrap();

        // Committed, but this reader has not refreshed yet.
        let err = reader.read_frame(0, &mut buffer).await.unwrap_err();
        assert!(matches!(
            err,
            MonitorError::Consistency(ConsistencyError::MissingFrame { index: 0, available: 0 })
        ));

        reader.latest_frame_count(dims()).await.unwrap();
        reader.read_frame(0, &mut buffer).await.unwrap();
        assert_eq!(buffer, ReferencePattern::builtin().load());
    }

    #[tokio::test]
    async fn reshape_is_reported_as_shape_mismatch() {
        let store = MemoryStore::new(dims());
        let mut writer = store.writer();
        let mut reader = store.reader().await;

        writer.reshape(Dimensions::new(5, 3)).await;
        let err = reader.latest_frame_count(dims()).await.unwrap_err();
        assert!(matches!(
            err,
            MonitorError::Consistency(ConsistencyError::ShapeMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_releases_reader() {
        let store = MemoryStore::new(dims());
        let mut reader = store.reader().await;
        assert_eq!(store.open_readers().await, 1);

        reader.close().await.unwrap();
        reader.close().await.unwrap();

        assert!(reader.is_closed());
        assert_eq!(store.open_readers().await, 0);
        assert!(matches!(
            reader.latest_frame_count(dims()).await,
            Err(MonitorError::Closed)
        ));
        assert_eq!(reader.open_object_counts().unwrap().files, 0);
    }

    #[tokio::test]
    async fn writer_rejects_wrong_shape() {
        let store = MemoryStore::new(dims());
        let mut writer = store.writer();
        let frame = Image::zeroed(Dimensions::new(3, 3));
        assert!(writer.append(&frame).await.is_err());
        assert_eq!(store.committed().await, 0);
    }
}
