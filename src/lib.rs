pub mod config;
pub mod db;
pub mod error;
pub mod flags;
pub mod goal;
pub mod models;
pub mod persistence;
pub mod reconcile;
pub mod replay;
pub mod sensing;
pub mod tracker;
pub mod utils;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

pub use config::{Settings, SettingsPatch, TrackingConfig};
pub use db::Database;
pub use error::{Sensor, SensorStatus, TrackingError, TrackingResult};
pub use flags::{JsonFlagStore, MemoryFlagStore};
pub use goal::{FeedbackKind, FeedbackSink, GoalNotifier};
pub use models::{DailySnapshot, GeoFix, RemoteBaseline, SensorReading};
pub use persistence::{FlagStore, PersistenceScheduler, RemoteStore};
pub use reconcile::{merge, BaselineReconciler};
pub use sensing::{
    AccelerometerEventStream, GeoDistanceAccumulator, HardwareStepQuery, LocationWatcher,
    StepSource, StepStrategy,
};
pub use tracker::{Tracker, TrackingDeps, TrackingHandle, TrackingStatus};
pub use utils::{Clock, ManualClock, SystemClock};

use replay::{run_trace, Trace, DEFAULT_HISTORY_DAYS};

/// Replays a recorded sensor trace against the SQLite store and prints the result.
#[derive(Parser, Debug)]
#[command(name = "stepfuse", version)]
struct Args {
    /// Path to the JSON trace
    trace: PathBuf,

    /// SQLite database holding daily snapshots and settings
    #[arg(long, default_value = "stepfuse.sqlite3")]
    db: PathBuf,

    /// JSON file holding per-day goal flags
    #[arg(long, default_value = "stepfuse-flags.json")]
    flags: PathBuf,

    /// Number of recent days to include in the report
    #[arg(long, default_value_t = DEFAULT_HISTORY_DAYS)]
    history: usize,
}

pub fn run() -> Result<()> {
    utils::init_logging();
    log::info!("stepfuse starting up...");

    let args = Args::parse();
    let trace = Trace::load(&args.trace)?;
    let database = Database::new(args.db)?;
    let flags = JsonFlagStore::new(args.flags)?;

    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    let report = runtime.block_on(run_trace(
        trace,
        Arc::new(database),
        Arc::new(flags),
        args.history,
    ))?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
