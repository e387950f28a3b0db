//! Recorded-trace replay: drives a real tracking session from a JSON file.
//!
//! Timings in a trace are wall-clock milliseconds from the start of the
//! replay, so traces are usually recorded with short poll and autosave
//! intervals.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Local};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{self, Duration, Instant};

use crate::config::{SettingsPatch, TrackingConfig};
use crate::error::{Sensor, TrackingError, TrackingResult};
use crate::goal::{FeedbackKind, FeedbackSink};
use crate::models::{AccelEvent, DailySnapshot, GeoFix, WatchOptions};
use crate::persistence::{FlagStore, RemoteStore};
use crate::sensing::{AccelerometerEventStream, HardwareStepQuery, LocationWatcher};
use crate::tracker::{Tracker, TrackingDeps, TrackingStatus};
use crate::utils::{Clock, ManualClock, SystemClock};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

pub const DEFAULT_HISTORY_DAYS: usize = 30;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimedCount {
    pub at_ms: u64,
    pub steps: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimedEvent {
    pub at_ms: u64,
    pub cumulative: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimedFix {
    pub at_ms: u64,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    pub user_id: String,
    /// Explicit config; falls back to the user's stored settings.
    #[serde(default)]
    pub config: Option<TrackingConfig>,
    /// Applied to the stored settings before the session starts.
    #[serde(default)]
    pub settings_patch: Option<SettingsPatch>,
    /// Pins the local clock; the replay advances it with elapsed time.
    #[serde(default)]
    pub start_at: Option<DateTime<Local>>,
    #[serde(default = "default_true")]
    pub hardware_available: bool,
    /// Hardware queries fail, which selects the accelerometer fallback.
    #[serde(default)]
    pub hardware_fails: bool,
    #[serde(default = "default_true")]
    pub location_permitted: bool,
    #[serde(default)]
    pub step_counts: Vec<TimedCount>,
    #[serde(default)]
    pub step_events: Vec<TimedEvent>,
    #[serde(default)]
    pub fixes: Vec<TimedFix>,
    pub duration_ms: u64,
}

impl Trace {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read trace from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse trace {}", path.display()))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    pub status: TrackingStatus,
    pub final_snapshot: DailySnapshot,
    pub writes: usize,
    pub history: Vec<DailySnapshot>,
}

struct TraceHardware {
    counts: Vec<TimedCount>,
    started: Instant,
    available: bool,
    fails: bool,
}

#[async_trait]
impl HardwareStepQuery for TraceHardware {
    async fn request_permission(&self) -> TrackingResult<()> {
        Ok(())
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn query(&self, _since: DateTime<Local>, _until: DateTime<Local>) -> TrackingResult<u64> {
        if self.fails {
            return Err(TrackingError::TransientQueryFailure(
                "step counter query rejected".into(),
            ));
        }
        let elapsed = self.started.elapsed().as_millis() as u64;
        Ok(self
            .counts
            .iter()
            .filter(|count| count.at_ms <= elapsed)
            .last()
            .map_or(0, |count| count.steps))
    }
}

#[derive(Default)]
struct TraceAccelerometer {
    sender: Mutex<Option<mpsc::UnboundedSender<AccelEvent>>>,
}

impl TraceAccelerometer {
    fn push(&self, cumulative: u64) {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sender) = guard.as_ref() {
            let _ = sender.send(AccelEvent {
                cumulative_events: cumulative,
            });
        }
    }
}

impl AccelerometerEventStream for TraceAccelerometer {
    fn subscribe(&self) -> TrackingResult<mpsc::UnboundedReceiver<AccelEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sender.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        Ok(rx)
    }

    fn unsubscribe(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

struct TraceLocation {
    permitted: bool,
    sender: Mutex<Option<mpsc::UnboundedSender<GeoFix>>>,
}

impl TraceLocation {
    fn push(&self, fix: GeoFix) {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sender) = guard.as_ref() {
            let _ = sender.send(fix);
        }
    }
}

#[async_trait]
impl LocationWatcher for TraceLocation {
    async fn watch(&self, _options: WatchOptions) -> TrackingResult<mpsc::UnboundedReceiver<GeoFix>> {
        if !self.permitted {
            return Err(TrackingError::PermissionDenied(Sensor::Location));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sender.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        Ok(rx)
    }

    fn unwatch(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Goal feedback for headless runs: a log line.
pub struct LogFeedback;

#[async_trait]
impl FeedbackSink for LogFeedback {
    async fn fire(&self, kind: FeedbackKind) -> Result<()> {
        log_info!("feedback: {:?}", kind);
        Ok(())
    }
}

enum TimelineItem {
    Event(u64),
    Fix(f64, f64),
}

/// Replays `trace` against `store` and `flags`, then reads back the history.
pub async fn run_trace(
    trace: Trace,
    store: Arc<dyn RemoteStore>,
    flags: Arc<dyn FlagStore>,
    history_days: usize,
) -> Result<ReplayReport> {
    let mut settings = store
        .get_settings(&trace.user_id)
        .await
        .context("failed to load user settings")?;
    if let Some(patch) = trace.settings_patch {
        settings = settings.apply(patch)?;
        store
            .put_settings(&trace.user_id, &settings)
            .await
            .context("failed to save user settings")?;
    }
    let config = trace
        .config
        .clone()
        .unwrap_or_else(|| TrackingConfig::from_settings(&settings));

    let manual_clock = trace.start_at.map(ManualClock::new);
    let clock: Arc<dyn Clock> = match &manual_clock {
        Some(clock) => Arc::new(clock.clone()),
        None => Arc::new(SystemClock),
    };

    let started = Instant::now();
    let accelerometer = Arc::new(TraceAccelerometer::default());
    let location = Arc::new(TraceLocation {
        permitted: trace.location_permitted,
        sender: Mutex::new(None),
    });
    let deps = TrackingDeps {
        hardware: Arc::new(TraceHardware {
            counts: trace.step_counts.clone(),
            started,
            available: trace.hardware_available,
            fails: trace.hardware_fails,
        }),
        accelerometer: accelerometer.clone(),
        location: location.clone(),
        store: store.clone(),
        flags,
        feedback: Arc::new(LogFeedback),
        clock,
    };

    let handle = Tracker::start(deps, trace.user_id.clone(), config).await?;
    let writes = Arc::new(Mutex::new(0usize));
    {
        let writes = writes.clone();
        handle.on_snapshot_persisted(move |snapshot| {
            *writes.lock().unwrap_or_else(PoisonError::into_inner) += 1;
            log_info!("saved {} steps / {:.3} km for {}", snapshot.steps, snapshot.distance_km, snapshot.date);
        });
    }

    let mut timeline: Vec<(u64, TimelineItem)> = trace
        .step_events
        .iter()
        .map(|event| (event.at_ms, TimelineItem::Event(event.cumulative)))
        .chain(
            trace
                .fixes
                .iter()
                .map(|fix| (fix.at_ms, TimelineItem::Fix(fix.lat, fix.lon))),
        )
        .collect();
    timeline.sort_by_key(|(at_ms, _)| *at_ms);

    let advance_clock = |at_ms: u64| {
        if let (Some(clock), Some(start)) = (&manual_clock, trace.start_at) {
            clock.set(start + ChronoDuration::milliseconds(at_ms as i64));
        }
    };

    for (at_ms, item) in timeline {
        time::sleep_until(started + Duration::from_millis(at_ms)).await;
        advance_clock(at_ms);
        match item {
            TimelineItem::Event(cumulative) => accelerometer.push(cumulative),
            TimelineItem::Fix(lat, lon) => {
                let timestamp = trace
                    .start_at
                    .map(|start| start + ChronoDuration::milliseconds(at_ms as i64))
                    .unwrap_or_else(Local::now);
                location.push(GeoFix::new(lat, lon, timestamp.into()));
            }
        }
    }

    time::sleep_until(started + Duration::from_millis(trace.duration_ms)).await;
    advance_clock(trace.duration_ms);
    handle.stop().await?;

    let history = match store.list_recent(&trace.user_id, history_days).await {
        Ok(history) => history,
        Err(err) => {
            log_warn!("failed to read history: {err:?}");
            Vec::new()
        }
    };
    let writes = *writes.lock().unwrap_or_else(PoisonError::into_inner);

    Ok(ReplayReport {
        status: handle.status(),
        final_snapshot: handle.current_snapshot(),
        writes,
        history,
    })
}
