//! CLI Entry Point for swmr-monitor
//!
//! Provides command-line interface for:
//! - Watching an HDF5 dataset opened in SWMR-read mode
//! - Simulating a writer in-process to exercise the monitor without a file
//! - Printing the effective configuration
//!
//! # Usage
//!
//! Watch a file:
//! ```bash
//! swmr-monitor watch swmr.h5 --timeout 5
//! ```
//!
//! Simulate a writer that corrupts every third frame:
//! ```bash
//! swmr-monitor simulate --frames 10 --corrupt-every 3
//! ```
//!
//! Exit status: 0 when every checked frame matched, 1 when at least one did not,
//! 2 on a fatal error.

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use swmr_monitor::config::{MonitorSettings, DEFAULT_CONFIG_FILE};
use swmr_monitor::image::Image;
use swmr_monitor::monitor::MonitorReport;
use swmr_monitor::reference::ReferencePattern;
use swmr_monitor::store::memory::MemoryStore;
use swmr_monitor::{logging, session, MonitorResult, Session};

#[derive(Parser)]
#[command(name = "swmr-monitor")]
#[command(about = "Validate frames appended to an SWMR dataset while it is written", long_about = None)]
struct Cli {
    /// Configuration file (TOML format)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch an HDF5 file until no new frame arrives within the timeout
    Watch {
        /// File holding the growing dataset (overrides dataset.path)
        path: Option<PathBuf>,

        /// Dataset inside the file (overrides dataset.name)
        #[arg(long)]
        dataset: Option<String>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Run the monitor against an in-process simulated writer
    Simulate {
        /// Number of frames the writer appends
        #[arg(long, default_value = "10")]
        frames: u64,

        /// Delay between commits in milliseconds
        #[arg(long, default_value = "100")]
        period_ms: u64,

        /// Corrupt every K-th frame (0 never corrupts)
        #[arg(long, default_value = "0")]
        corrupt_every: u64,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Print the effective configuration as TOML
    PrintConfig,
}

#[derive(Args)]
struct RunArgs {
    /// Seconds without new data before stopping (0 disables)
    #[arg(long)]
    timeout: Option<f64>,

    /// Seconds between polls that found nothing new
    #[arg(long)]
    poll_interval: Option<f64>,

    /// Validate every committed frame, not only the newest
    #[arg(long)]
    catch_up: bool,

    /// Print the final report as JSON on stdout
    #[arg(long)]
    json: bool,
}

impl RunArgs {
    fn apply(&self, settings: &mut MonitorSettings) {
        if let Some(timeout) = self.timeout {
            settings.monitor.timeout_secs = timeout;
        }
        if let Some(poll_interval) = self.poll_interval {
            settings.monitor.poll_interval_secs = poll_interval;
        }
        if self.catch_up {
            settings.monitor.catch_up = true;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut settings = MonitorSettings::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;

    match cli.command {
        Commands::Watch {
            path,
            dataset,
            run: args,
        } => {
            if let Some(path) = path {
                settings.dataset.path = path;
            }
            if let Some(dataset) = dataset {
                settings.dataset.name = dataset;
            }
            args.apply(&mut settings);
            init(&settings)?;

            let session = session::open_hdf5(&settings)?;
            let report = session.run(Some(stop_on_ctrl_c())).await?;
            finish(&report, args.json)
        }
        Commands::Simulate {
            frames,
            period_ms,
            corrupt_every,
            run: args,
        } => {
            args.apply(&mut settings);
            init(&settings)?;
            let report = simulate(
                &settings,
                frames,
                Duration::from_millis(period_ms),
                corrupt_every,
            )
            .await?;
            finish(&report, args.json)
        }
        Commands::PrintConfig => {
            print!("{}", settings.to_toml()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init(settings: &MonitorSettings) -> Result<()> {
    settings.validate()?;
    logging::init_from_settings(settings).map_err(anyhow::Error::msg)
}

fn stop_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping");
            let _ = tx.send(true);
        }
    });
    rx
}

async fn simulate(
    settings: &MonitorSettings,
    frames: u64,
    period: Duration,
    corrupt_every: u64,
) -> Result<MonitorReport> {
    let reference = ReferencePattern::from_config(settings.reference.as_ref())?;
    let store = MemoryStore::named("simulated", reference.dims());
    let mut writer = store.writer();
    let good = reference.load();
    let bad = corrupt(&good);

    let producer = tokio::spawn(async move {
        for i in 1..=frames {
            tokio::time::sleep(period).await;
            let frame = if corrupt_every > 0 && i % corrupt_every == 0 {
                &bad
            } else {
                &good
            };
            writer.append_and_commit(frame).await?;
        }
        tracing::debug!(frames, "Simulated writer finished");
        MonitorResult::Ok(())
    });

    let session = Session::open(settings, store.reader().await)?;
    let report = session.run(Some(stop_on_ctrl_c())).await;
    let writer = finish_writer(producer).await;
    let report = report?;
    writer?;
    Ok(report)
}

/// Stop the simulated writer and surface any error it returned.
async fn finish_writer(producer: JoinHandle<MonitorResult<()>>) -> Result<()> {
    if !producer.is_finished() {
        producer.abort();
        tracing::debug!("Simulated writer stopped before committing every frame");
        return Ok(());
    }
    match producer.await {
        Ok(result) => result.context("simulated writer failed"),
        Err(e) => Err(anyhow::anyhow!("simulated writer task panicked: {e}")),
    }
}

fn corrupt(image: &Image) -> Image {
    let mut bad = image.clone();
    let dims = bad.dims();
    let (x, y) = (dims.width / 2, dims.height / 2);
    let value = bad.get(x, y).unwrap_or(0);
    bad.set(x, y, value.wrapping_add(1000));
    bad
}

fn finish(report: &MonitorReport, json: bool) -> Result<ExitCode> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("Source:  {}", report.source);
        println!("Outcome: {:?}", report.outcome);
        println!(
            "Frames:  {} checked, {} passed, {} failed, {} skipped",
            report.checks.len(),
            report.checks.passed(),
            report.checks.failed(),
            report.frames_skipped
        );
        for failure in &report.failures {
            println!("  frame {}: {}", failure.frame, failure.mismatch);
        }
    }

    Ok(if report.checks.all_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}
