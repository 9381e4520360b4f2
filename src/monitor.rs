//! Monitor loop.
//!
//! The monitor polls a [`FrameSource`] for its committed frame count. When the count
//! has grown past the last frame it consumed, it reads the newest frame into the
//! session's [`FrameBuffer`], compares it with the reference image and records the
//! result. When nothing new arrived it checks the inactivity timeout and otherwise
//! sleeps for the poll interval.
//!
//! ```text
//!            new frames committed
//!   WAITING ─────────────────────────▶ READING
//!      ▲  │                               │ read + validate, reset stopwatch
//!      │  │ idle, sleep poll_interval     │
//!      │  ◀───────────────────────────────┘
//!      │  ├── idle > timeout ───────────▶ TIMED_OUT
//!      └──┴── stop requested ───────────▶ STOPPED
//! ```
//!
//! Polling is the only option: an SWMR reader observes writer progress through an
//! explicit refresh and the store offers no wait-for-change primitive.
//!
//! # Frame selection
//!
//! By default only the newest committed frame is read on each poll
//! ([`ReadMode::LatestOnly`]). If the writer commits several frames between two polls
//! the earlier ones are never validated; they are counted in
//! [`MonitorReport::frames_skipped`]. [`ReadMode::CatchUp`] reads every frame in order
//! instead.
//!
//! Errors from the source are fatal and returned immediately. A frame that does not
//! match the reference is not an error: it is recorded and monitoring continues.

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::config::MonitorConfig;
use crate::error::{ConsistencyError, MonitorResult};
use crate::image::{FrameBuffer, Image};
use crate::stopwatch::Stopwatch;
use crate::store::FrameSource;
use crate::validator::{self, Mismatch};

/// Default sleep between empty polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Default inactivity timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    /// No new data since the last check
    Waiting,
    /// A new frame is being fetched and validated
    Reading,
    /// Terminal: no new data within the timeout
    TimedOut,
    /// Terminal: a stop was requested
    Stopped,
}

impl MonitorState {
    /// Whether the loop has finished.
    pub fn is_terminal(self) -> bool {
        matches!(self, MonitorState::TimedOut | MonitorState::Stopped)
    }
}

/// How a loop that did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MonitorOutcome {
    /// No frame arrived within the timeout
    TimedOut {
        /// Seconds since the last successful read (or the start)
        idle_secs: f64,
    },
    /// A stop was requested
    Stopped,
}

/// Which committed frames are read when the count grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadMode {
    /// Read only the newest frame
    #[default]
    LatestOnly,
    /// Read every frame not yet read, oldest first
    CatchUp,
}

/// Tuning knobs of the loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorOptions {
    /// Inactivity timeout; `None` runs until stopped
    pub timeout: Option<Duration>,
    /// Sleep between empty polls
    pub poll_interval: Duration,
    /// Frame selection policy
    pub mode: ReadMode,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_TIMEOUT),
            poll_interval: DEFAULT_POLL_INTERVAL,
            mode: ReadMode::LatestOnly,
        }
    }
}

impl From<&MonitorConfig> for MonitorOptions {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            timeout: config.timeout(),
            poll_interval: config.poll_interval(),
            mode: if config.catch_up {
                ReadMode::CatchUp
            } else {
                ReadMode::LatestOnly
            },
        }
    }
}

/// Pass/fail result of every validated frame, in read order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CheckHistory(Vec<bool>);

impl CheckHistory {
    /// Append one result.
    pub fn record(&mut self, passed: bool) {
        self.0.push(passed);
    }

    /// Number of validated frames.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no frame has been validated.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of frames that matched the reference.
    pub fn passed(&self) -> usize {
        self.0.iter().filter(|passed| **passed).count()
    }

    /// Number of frames that did not match.
    pub fn failed(&self) -> usize {
        self.len() - self.passed()
    }

    /// Whether every validated frame matched. Vacuously true when empty.
    pub fn all_passed(&self) -> bool {
        self.0.iter().all(|passed| *passed)
    }

    /// Results in read order.
    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        self.0.iter().copied()
    }

    /// Results as a slice.
    pub fn as_slice(&self) -> &[bool] {
        &self.0
    }
}

/// A frame that did not match the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameFailure {
    /// Frame index along the growth dimension
    pub frame: u64,
    /// First differing sample
    pub mismatch: Mismatch,
}

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorReport {
    /// Where the frames came from
    pub source: String,
    /// How the loop ended
    pub outcome: MonitorOutcome,
    /// One entry per validated frame
    pub checks: CheckHistory,
    /// Frames that failed validation
    pub failures: Vec<FrameFailure>,
    /// Frames read and validated
    pub frames_read: u64,
    /// Committed frames never read because a newer one was read instead
    pub frames_skipped: u64,
    /// Largest committed frame count observed
    pub frames_committed: u64,
    /// Index of the last frame read
    pub last_frame_index: Option<u64>,
}

/// Polling state machine for one session.
pub struct Monitor {
    reference: Image,
    buffer: FrameBuffer,
    options: MonitorOptions,
    state: MonitorState,
    state_tx: Option<watch::Sender<MonitorState>>,
    checks: CheckHistory,
    failures: Vec<FrameFailure>,
    frames_read: u64,
    frames_skipped: u64,
    observed_count: u64,
}

impl Monitor {
    /// Monitor checking frames against `reference`.
    ///
    /// The read buffer is allocated here, once, with the reference dimensions.
    pub fn new(reference: Image, options: MonitorOptions) -> Self {
        let buffer = FrameBuffer::new(reference.dims());
        Self {
            reference,
            buffer,
            options,
            state: MonitorState::Waiting,
            state_tx: None,
            checks: CheckHistory::default(),
            failures: Vec::new(),
            frames_read: 0,
            frames_skipped: 0,
            observed_count: 0,
        }
    }

    /// Publish state transitions on a watch channel.
    pub fn subscribe_state(&mut self) -> watch::Receiver<MonitorState> {
        let (tx, rx) = watch::channel(self.state);
        self.state_tx = Some(tx);
        rx
    }

    /// Current state.
    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Reference image.
    pub fn reference(&self) -> &Image {
        &self.reference
    }

    /// Buffer holding the most recently read frame.
    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    /// Results recorded so far.
    pub fn checks(&self) -> &CheckHistory {
        &self.checks
    }

    fn set_state(&mut self, state: MonitorState) {
        if self.state != state {
            trace!(from = ?self.state, to = ?state, "Monitor state change");
            self.state = state;
            if let Some(tx) = &self.state_tx {
                tx.send_replace(state);
            }
        }
    }

    /// Run until timeout, stop request or error.
    ///
    /// `stop` is checked on every iteration and also interrupts the poll sleep.
    pub async fn run<S>(
        &mut self,
        source: &mut S,
        mut stop: Option<watch::Receiver<bool>>,
    ) -> MonitorResult<MonitorOutcome>
    where
        S: FrameSource + ?Sized,
    {
        debug!(
            source = %source.describe(),
            timeout = ?self.options.timeout,
            poll_interval = ?self.options.poll_interval,
            mode = ?self.options.mode,
            "Starting monitoring"
        );
        let mut stopwatch = Stopwatch::start();
        self.set_state(MonitorState::Waiting);

        loop {
            if stop_requested(&stop) {
                info!("Stop requested");
                self.set_state(MonitorState::Stopped);
                return Ok(MonitorOutcome::Stopped);
            }

            if self.poll_once(source).await? > 0 {
                stopwatch.reset();
                continue;
            }

            if let Some(timeout) = self.options.timeout {
                if stopwatch.exceeded(timeout) {
                    let idle_secs = stopwatch.elapsed_seconds();
                    warn!("Timeout: it's been {idle_secs:.3} seconds since last read");
                    self.set_state(MonitorState::TimedOut);
                    return Ok(MonitorOutcome::TimedOut { idle_secs });
                }
            }

            self.wait(&mut stop).await;
        }
    }

    /// One refresh-and-read step without sleeping. Returns how many frames were read.
    pub async fn poll_once<S>(&mut self, source: &mut S) -> MonitorResult<u64>
    where
        S: FrameSource + ?Sized,
    {
        let count = source.latest_frame_count(self.reference.dims()).await?;
        if count < self.observed_count {
            return Err(ConsistencyError::FrameCountRegressed {
                previous: self.observed_count,
                observed: count,
            }
            .into());
        }
        self.observed_count = count;

        let consumed = self.buffer.frames_consumed();
        if count <= consumed {
            return Ok(0);
        }

        self.set_state(MonitorState::Reading);
        let first = match self.options.mode {
            ReadMode::LatestOnly => {
                let skipped = count - 1 - consumed;
                if skipped > 0 {
                    debug!(skipped, latest = count - 1, "Frames committed since last poll not read");
                    self.frames_skipped += skipped;
                }
                count - 1
            }
            ReadMode::CatchUp => consumed,
        };
        for index in first..count {
            self.read_and_check(source, index).await?;
        }
        self.set_state(MonitorState::Waiting);
        Ok(count - first)
    }

    async fn read_and_check<S>(&mut self, source: &mut S, index: u64) -> MonitorResult<()>
    where
        S: FrameSource + ?Sized,
    {
        source.read_frame(index, self.buffer.image_mut()).await?;
        self.buffer.mark_read(index);
        self.frames_read += 1;

        match validator::first_mismatch(&self.reference, self.buffer.image()) {
            None => {
                debug!(frame = index, "Frame matches reference");
                self.checks.record(true);
            }
            Some(mismatch) => {
                warn!(
                    frame = index,
                    x = mismatch.x,
                    y = mismatch.y,
                    expected = mismatch.expected,
                    actual = mismatch.actual,
                    "Data mismatch in frame {index} at ({}, {})",
                    mismatch.x,
                    mismatch.y
                );
                self.checks.record(false);
                self.failures.push(FrameFailure {
                    frame: index,
                    mismatch,
                });
            }
        }
        Ok(())
    }

    async fn wait(&self, stop: &mut Option<watch::Receiver<bool>>) {
        let sleep = tokio::time::sleep(self.options.poll_interval);
        tokio::pin!(sleep);

        let sender_gone = match stop.as_mut() {
            Some(rx) => tokio::select! {
                _ = &mut sleep => false,
                changed = rx.changed() => changed.is_err(),
            },
            None => {
                (&mut sleep).await;
                false
            }
        };

        if sender_gone {
            // Nobody can request a stop any more; finish this interval and stop listening.
            *stop = None;
            sleep.await;
        }
    }

    /// Summary of everything recorded so far.
    pub fn report(&self, source: String, outcome: MonitorOutcome) -> MonitorReport {
        MonitorReport {
            source,
            outcome,
            checks: self.checks.clone(),
            failures: self.failures.clone(),
            frames_read: self.frames_read,
            frames_skipped: self.frames_skipped,
            frames_committed: self.observed_count,
            last_frame_index: self.buffer.frame_index(),
        }
    }
}

fn stop_requested(stop: &Option<watch::Receiver<bool>>) -> bool {
    stop.as_ref().is_some_and(|rx| *rx.borrow())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MonitorError;
    use crate::image::Dimensions;
    use crate::reference::ReferencePattern;
    use crate::store::memory::MemoryStore;
    use tracing_test::traced_test;

    fn reference() -> Image {
        ReferencePattern::builtin().load()
    }

    fn corrupted() -> Image {
        let mut image = reference();
        image.set(1, 2, 999);
        image
    }

    #[tokio::test]
    async fn poll_without_growth_reads_nothing() {
        let store = MemoryStore::new(Dimensions::new(4, 3));
        let mut source = store.reader().await;
        let mut monitor = Monitor::new(reference(), MonitorOptions::default());

        assert_eq!(monitor.poll_once(&mut source).await.unwrap(), 0);
        assert!(monitor.checks().is_empty());
        assert_eq!(monitor.state(), MonitorState::Waiting);
    }

    #[tokio::test]
    async fn latest_only_skips_intermediate_frames() {
        let store = MemoryStore::new(Dimensions::new(4, 3));
        let mut writer = store.writer();
        let mut source = store.reader().await;
        let mut monitor = Monitor::new(reference(), MonitorOptions::default());

        writer.append(&corrupted()).await.unwrap();
        writer.append(&corrupted()).await.unwrap();
        writer.append(&reference()).await.unwrap();
        writer.commit().await;

        assert_eq!(monitor.poll_once(&mut source).await.unwrap(), 1);
        assert_eq!(monitor.checks().as_slice(), &[true]);
        assert_eq!(monitor.buffer().frame_index(), Some(2));

        let report = monitor.report("test".into(), MonitorOutcome::Stopped);
        assert_eq!(report.frames_skipped, 2);
        assert_eq!(report.frames_read, 1);
    }

    #[tokio::test]
    async fn catch_up_reads_every_frame_in_order() {
        let store = MemoryStore::new(Dimensions::new(4, 3));
        let mut writer = store.writer();
        let mut source = store.reader().await;
        let options = MonitorOptions {
            mode: ReadMode::CatchUp,
            ..MonitorOptions::default()
        };
        let mut monitor = Monitor::new(reference(), options);

        writer.append(&reference()).await.unwrap();
        writer.append(&corrupted()).await.unwrap();
        writer.append(&reference()).await.unwrap();
        writer.commit().await;

        assert_eq!(monitor.poll_once(&mut source).await.unwrap(), 3);
        assert_eq!(monitor.checks().as_slice(), &[true, false, true]);

        let report = monitor.report("test".into(), MonitorOutcome::Stopped);
        assert_eq!(report.frames_skipped, 0);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].frame, 1);
        assert_eq!((report.failures[0].mismatch.x, report.failures[0].mismatch.y), (1, 2));
    }

    #[tokio::test]
    async fn same_frame_is_never_processed_twice() {
        let store = MemoryStore::new(Dimensions::new(4, 3));
        let mut writer = store.writer();
        let mut source = store.reader().await;
        let mut monitor = Monitor::new(reference(), MonitorOptions::default());

        writer.append_and_commit(&reference()).await.unwrap();
        assert_eq!(monitor.poll_once(&mut source).await.unwrap(), 1);
        assert_eq!(monitor.poll_once(&mut source).await.unwrap(), 0);
        assert_eq!(monitor.poll_once(&mut source).await.unwrap(), 0);
        assert_eq!(monitor.checks().len(), 1);
    }

    #[tokio::test]
    async fn shrinking_extent_is_a_consistency_error() {
        struct Shrinking(Vec<u64>);

        #[async_trait::async_trait]
        impl FrameSource for Shrinking {
            fn describe(&self) -> String {
                "shrinking".into()
            }
            async fn latest_frame_count(&mut self, _: Dimensions) -> MonitorResult<u64> {
                Ok(self.0.remove(0))
            }
            async fn read_frame(&mut self, _: u64, into: &mut Image) -> MonitorResult<()> {
                into.samples_mut().copy_from_slice(&crate::reference::BUILTIN_SAMPLES);
                Ok(())
            }
            async fn close(&mut self) -> MonitorResult<()> {
                Ok(())
            }
            fn is_closed(&self) -> bool {
                false
            }
        }

        let mut source = Shrinking(vec![2, 1]);
        let mut monitor = Monitor::new(reference(), MonitorOptions::default());
        monitor.poll_once(&mut source).await.unwrap();
        let err = monitor.poll_once(&mut source).await.unwrap_err();
        assert!(matches!(
            err,
            MonitorError::Consistency(ConsistencyError::FrameCountRegressed {
                previous: 2,
                observed: 1
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn state_channel_reports_terminal_state() {
        let store = MemoryStore::new(Dimensions::new(4, 3));
        let mut source = store.reader().await;
        let mut monitor = Monitor::new(reference(), MonitorOptions::default());
        let state_rx = monitor.subscribe_state();

        let outcome = monitor.run(&mut source, None).await.unwrap();

        assert!(matches!(outcome, MonitorOutcome::TimedOut { .. }));
        assert_eq!(*state_rx.borrow(), MonitorState::TimedOut);
        assert!(monitor.state().is_terminal());
    }

    #[tokio::test]
    #[traced_test]
    async fn mismatch_is_logged_with_frame_and_coordinate() {
        let store = MemoryStore::new(Dimensions::new(4, 3));
        let mut writer = store.writer();
        let mut source = store.reader().await;
        let mut monitor = Monitor::new(reference(), MonitorOptions::default());

        writer.append_and_commit(&corrupted()).await.unwrap();
        monitor.poll_once(&mut source).await.unwrap();

        assert!(logs_contain("Data mismatch in frame 0 at (1, 2)"));
        assert_eq!(monitor.checks().as_slice(), &[false]);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn timeout_is_logged() {
        let store = MemoryStore::new(Dimensions::new(4, 3));
        let mut source = store.reader().await;
        let mut monitor = Monitor::new(reference(), MonitorOptions::default());

        monitor.run(&mut source, None).await.unwrap();

        assert!(logs_contain("since last read"));
    }

    #[test]
    fn history_counts() {
        let mut history = CheckHistory::default();
        assert!(history.all_passed());
        history.record(true);
        history.record(false);
        history.record(true);
        assert_eq!(history.passed(), 2);
        assert_eq!(history.failed(), 1);
        assert!(!history.all_passed());
        assert_eq!(serde_json::to_string(&history).unwrap(), "[true,false,true]");
    }

    #[test]
    fn options_from_config() {
        let config = MonitorConfig {
            timeout_secs: 0.0,
            poll_interval_secs: 0.05,
            catch_up: true,
        };
        let options = MonitorOptions::from(&config);
        assert_eq!(options.timeout, None);
        assert_eq!(options.poll_interval, Duration::from_millis(50));
        assert_eq!(options.mode, ReadMode::CatchUp);
    }
}
