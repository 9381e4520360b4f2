//! Monitoring sessions.
//!
//! A [`Session`] owns one open [`FrameSource`] together with the [`Monitor`] that
//! watches it. Opening a session loads the reference pattern and allocates the read
//! buffer once; running it drives the monitor loop to completion and then closes the
//! source, whether the loop ended normally or with an error.
//!
//! ```no_run
//! use swmr_monitor::{config::MonitorSettings, session};
//!
//! # async fn demo() -> swmr_monitor::error::MonitorResult<()> {
//! let settings = MonitorSettings::load()?;
//! let report = session::open_hdf5(&settings)?.run(None).await?;
//! println!("{} frames checked", report.checks.len());
//! # Ok(())
//! # }
//! ```

use tokio::sync::watch;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::MonitorSettings;
use crate::error::MonitorResult;
use crate::monitor::{Monitor, MonitorOptions, MonitorReport, MonitorState};
use crate::reference::ReferencePattern;
use crate::store::hdf5::Hdf5Source;
use crate::store::FrameSource;

/// One monitor attached to one open dataset.
pub struct Session<S: FrameSource> {
    source: S,
    monitor: Monitor,
}

impl<S: FrameSource> Session<S> {
    /// Attach a monitor configured by `settings` to an already open source.
    pub fn open(settings: &MonitorSettings, source: S) -> MonitorResult<Self> {
        let reference = ReferencePattern::from_config(settings.reference.as_ref())?;
        let monitor = Monitor::new(reference.load(), MonitorOptions::from(&settings.monitor));
        debug!(
            source = %source.describe(),
            reference = %reference.dims(),
            "Session opened"
        );
        Ok(Self { source, monitor })
    }

    /// Attach a monitor with explicit options and reference.
    pub fn with_monitor(source: S, monitor: Monitor) -> Self {
        Self { source, monitor }
    }

    /// Observe state transitions of the monitor loop.
    pub fn subscribe_state(&mut self) -> watch::Receiver<MonitorState> {
        self.monitor.subscribe_state()
    }

    /// The underlying source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Run the monitor loop, then close the source.
    ///
    /// A loop error takes precedence over a close error; the close error is logged.
    pub async fn run(mut self, stop: Option<watch::Receiver<bool>>) -> MonitorResult<MonitorReport> {
        let description = self.source.describe();
        let span = info_span!("swmr_session", source = %description);

        async {
            info!("Monitoring started");
            let result = self.monitor.run(&mut self.source, stop).await;

            if let Some(counts) = self.source.open_object_counts() {
                debug!(?counts, "Open objects before close");
            }
            let closed = self.source.close().await;

            let outcome = match (result, closed) {
                (Ok(outcome), Ok(())) => outcome,
                (Ok(_), Err(close_err)) => return Err(close_err),
                (Err(err), Ok(())) => return Err(err),
                (Err(err), Err(close_err)) => {
                    warn!(error = %close_err, "Failed to close source after error");
                    return Err(err);
                }
            };

            let report = self.monitor.report(description.clone(), outcome);
            info!(
                outcome = ?report.outcome,
                checked = report.checks.len(),
                failed = report.checks.failed(),
                skipped = report.frames_skipped,
                "Monitoring finished"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }
}

/// Open the HDF5 dataset named in `settings` and attach a monitor to it.
pub fn open_hdf5(settings: &MonitorSettings) -> MonitorResult<Session<Hdf5Source>> {
    let source = Hdf5Source::open(&settings.dataset.path, &settings.dataset.name)?;
    Session::open(settings, source)
}
