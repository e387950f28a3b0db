use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::{debug_mode, TrackingConfig};
use crate::error::{SensorStatus, TrackingError};
use crate::goal::{FeedbackSink, GoalNotifier};
use crate::models::{DailySnapshot, RemoteBaseline, SensorReading};
use crate::persistence::{FlagStore, PersistOutcome, PersistenceScheduler, RemoteStore, Trigger};
use crate::sensing::{AccelerometerEventStream, HardwareStepQuery, LocationWatcher, SensingController};
use crate::utils::Clock;

use super::state::{TrackingSession, TrackingStatus};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

pub const BASELINE_FETCH_TIMEOUT_SECS: u64 = 10;

pub type PersistCallback = Arc<dyn Fn(&DailySnapshot) + Send + Sync>;

/// Ports the engine runs against.
#[derive(Clone)]
pub struct TrackingDeps {
    pub hardware: Arc<dyn HardwareStepQuery>,
    pub accelerometer: Arc<dyn AccelerometerEventStream>,
    pub location: Arc<dyn LocationWatcher>,
    pub store: Arc<dyn RemoteStore>,
    pub flags: Arc<dyn FlagStore>,
    pub feedback: Arc<dyn FeedbackSink>,
    pub clock: Arc<dyn Clock>,
}

enum EngineCommand {
    Baseline {
        date: NaiveDate,
        result: Result<Option<RemoteBaseline>, TrackingError>,
    },
}

pub struct Tracker;

impl Tracker {
    /// Sets up the sensors, then hands the session to a dedicated engine task.
    ///
    /// Sensor problems are reported through [`TrackingHandle::status`]; only an
    /// invalid configuration fails here.
    pub async fn start(
        deps: TrackingDeps,
        user_id: impl Into<String>,
        config: TrackingConfig,
    ) -> Result<TrackingHandle> {
        config.validate().context("invalid tracking config")?;
        let user_id = user_id.into();

        let (readings_tx, readings_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let mut sensing = SensingController::new(readings_tx);
        let steps = sensing
            .start_steps(
                deps.hardware.clone(),
                deps.accelerometer.clone(),
                deps.clock.clone(),
                config.poll_interval(),
            )
            .await;
        let location = sensing
            .start_location(deps.location.clone(), config.gps_enabled)
            .await;

        let session = TrackingSession::new(
            deps.clock.today(),
            steps.source,
            location == SensorStatus::Active,
            config.daily_goal,
        );

        let status = TrackingStatus {
            session_id: session.id().to_string(),
            date: session.date(),
            step_strategy: session.step_strategy(),
            motion: steps.status,
            location,
            baseline_loaded: false,
            running: true,
        };
        log_info!(
            "tracking session {} started for {} (steps: {:?}, gps: {:?})",
            status.session_id,
            status.date,
            status.motion,
            status.location
        );

        let (snapshot_tx, snapshot_rx) = watch::channel(session.current().clone());
        let (status_tx, status_rx) = watch::channel(status);
        let callbacks: Arc<RwLock<Vec<PersistCallback>>> = Arc::new(RwLock::new(Vec::new()));
        let cancel_token = CancellationToken::new();

        let engine = Engine {
            autosave: autosave_ticker(config.autosave_interval()),
            scheduler: PersistenceScheduler::new(
                deps.store.clone(),
                user_id.clone(),
                config.autosave_interval(),
            ),
            notifier: GoalNotifier::new(deps.flags.clone(), deps.feedback.clone(), deps.clock.clone()),
            session,
            sensing,
            store: deps.store,
            clock: deps.clock,
            user_id,
            config,
            readings_rx,
            control_tx,
            control_rx,
            snapshot_tx,
            status_tx,
            callbacks: callbacks.clone(),
            baseline_in_flight: false,
            debug: debug_mode(),
        };
        let task = tokio::spawn(engine.run(cancel_token.child_token()));

        Ok(TrackingHandle {
            inner: Arc::new(HandleInner {
                snapshot_rx,
                status_rx,
                callbacks,
                cancel_token,
                engine: Mutex::new(Some(task)),
            }),
        })
    }
}

struct HandleInner {
    snapshot_rx: watch::Receiver<DailySnapshot>,
    status_rx: watch::Receiver<TrackingStatus>,
    callbacks: Arc<RwLock<Vec<PersistCallback>>>,
    cancel_token: CancellationToken,
    engine: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for HandleInner {
    // Last handle gone without stop(): the engine still shuts down and
    // flushes on its own task, nobody waits for it.
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Caller's view of a running session. Cheap to clone.
#[derive(Clone)]
pub struct TrackingHandle {
    inner: Arc<HandleInner>,
}

impl TrackingHandle {
    /// Latest reconciled snapshot. Never goes backwards within a day.
    pub fn current_snapshot(&self) -> DailySnapshot {
        self.inner.snapshot_rx.borrow().clone()
    }

    pub fn status(&self) -> TrackingStatus {
        self.inner.status_rx.borrow().clone()
    }

    /// Receiver that wakes on every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<DailySnapshot> {
        self.inner.snapshot_rx.clone()
    }

    /// Runs `callback` after every successful write, on the engine task.
    /// Callbacks may register further callbacks; those run from the next
    /// write on.
    pub fn on_snapshot_persisted<F>(&self, callback: F)
    where
        F: Fn(&DailySnapshot) + Send + Sync + 'static,
    {
        self.inner
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    /// Stops the sensors, flushes the final snapshot and waits for the
    /// engine to finish. Later calls return immediately.
    pub async fn stop(&self) -> Result<()> {
        let task = self.inner.engine.lock().await.take();
        let Some(task) = task else {
            return Ok(());
        };
        self.inner.cancel_token.cancel();
        task.await.context("tracking engine failed to join")
    }
}

/// First tick one interval after start; re-armed after every successful write.
fn autosave_ticker(interval: Duration) -> time::Interval {
    let mut autosave = time::interval_at(Instant::now() + interval, interval);
    autosave.set_missed_tick_behavior(MissedTickBehavior::Delay);
    autosave
}

struct Engine {
    session: TrackingSession,
    sensing: SensingController,
    scheduler: PersistenceScheduler,
    autosave: time::Interval,
    notifier: GoalNotifier,
    store: Arc<dyn RemoteStore>,
    clock: Arc<dyn Clock>,
    user_id: String,
    config: TrackingConfig,
    readings_rx: mpsc::UnboundedReceiver<SensorReading>,
    control_tx: mpsc::UnboundedSender<EngineCommand>,
    control_rx: mpsc::UnboundedReceiver<EngineCommand>,
    snapshot_tx: watch::Sender<DailySnapshot>,
    status_tx: watch::Sender<TrackingStatus>,
    callbacks: Arc<RwLock<Vec<PersistCallback>>>,
    baseline_in_flight: bool,
    debug: bool,
}

impl Engine {
    async fn run(mut self, cancel_token: CancellationToken) {
        self.request_baseline();

        loop {
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => break,
                Some(reading) = self.readings_rx.recv() => {
                    self.on_reading(reading).await;
                }
                Some(command) = self.control_rx.recv() => {
                    self.on_command(command).await;
                }
                _ = self.autosave.tick() => {
                    self.on_autosave().await;
                }
            }
        }

        self.shutdown().await;
    }

    async fn on_reading(&mut self, reading: SensorReading) {
        self.check_rollover();
        if self.debug {
            log_debug!("reading {}: {:?}", reading.kind(), reading);
        }
        if self.session.apply_reading(reading) {
            self.on_change(Trigger::Change).await;
        }
    }

    async fn on_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Baseline { date, result } => {
                if date != self.session.date() {
                    log_debug!("dropping baseline for {date}, session is on {}", self.session.date());
                    return;
                }
                self.baseline_in_flight = false;

                match result {
                    Ok(remote) => {
                        if let Some(remote) = &remote {
                            self.scheduler.note_known(remote);
                        }
                        let steps = remote.as_ref().map_or(0, |snapshot| snapshot.steps);
                        if self.session.resolve_baseline(date, remote) {
                            log_info!("baseline for {} loaded: {} steps", date, steps);
                            self.publish_status(true);
                            self.on_change(Trigger::Change).await;
                        }
                    }
                    Err(err) => {
                        log_warn!("{err}; running on local values until the next autosave retry");
                    }
                }
            }
        }
    }

    async fn on_autosave(&mut self) {
        self.check_rollover();
        if !self.session.baseline_loaded() {
            self.request_baseline();
        }
        let snapshot = self.session.current().clone();
        self.persist(&snapshot, Trigger::Timer).await;
    }

    /// Publish, check the goal, then let the scheduler decide on a write.
    async fn on_change(&mut self, trigger: Trigger) {
        let snapshot = self.session.refresh();
        self.snapshot_tx.send_replace(snapshot.clone());

        if snapshot.steps > 0 {
            self.notifier
                .check_goal(snapshot.steps, self.config.daily_goal, self.config.vibration_enabled)
                .await;
        }

        self.persist(&snapshot, trigger).await;
    }

    async fn persist(&mut self, snapshot: &DailySnapshot, trigger: Trigger) {
        // Nothing is written until the stored value for the day is known,
        // otherwise a provisional local value could overwrite a higher one.
        if !self.session.baseline_loaded() {
            return;
        }

        if let PersistOutcome::Written(written) = self
            .scheduler
            .maybe_persist(snapshot, Instant::now(), trigger)
            .await
        {
            self.session.record_persisted(&written);
            // Periodic writes are measured from the last success.
            if let Some(next) = self.scheduler.next_periodic_at() {
                self.autosave.reset_at(next);
            }

            let callbacks: Vec<PersistCallback> = self
                .callbacks
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            for callback in &callbacks {
                callback(&written);
            }
        }
    }

    fn request_baseline(&mut self) {
        if self.baseline_in_flight {
            return;
        }
        self.baseline_in_flight = true;

        let store = self.store.clone();
        let user_id = self.user_id.clone();
        let date = self.session.date();
        let control_tx = self.control_tx.clone();

        tokio::spawn(async move {
            let fetch = store.get_snapshot(&user_id, date);
            let result = match time::timeout(Duration::from_secs(BASELINE_FETCH_TIMEOUT_SECS), fetch).await {
                Ok(Ok(remote)) => Ok(remote),
                Ok(Err(err)) => {
                    log_error!("failed to load baseline for {date}: {err:?}");
                    Err(TrackingError::DataUnavailable)
                }
                Err(_) => {
                    log_warn!("baseline fetch timed out (> {}s)", BASELINE_FETCH_TIMEOUT_SECS);
                    Err(TrackingError::DataUnavailable)
                }
            };
            // Engine may already be gone.
            let _ = control_tx.send(EngineCommand::Baseline { date, result });
        });
    }

    fn check_rollover(&mut self) {
        let today = self.clock.today();
        if today == self.session.date() {
            return;
        }

        log_info!(
            "day changed from {} to {}, starting new totals (session {})",
            self.session.date(),
            today,
            self.session.id()
        );
        self.session.roll_over(today);
        self.scheduler.new_day();
        self.baseline_in_flight = false;
        self.snapshot_tx.send_replace(self.session.current().clone());
        self.publish_status(true);
        self.request_baseline();
    }

    fn publish_status(&self, running: bool) {
        let baseline_loaded = self.session.baseline_loaded();
        let date = self.session.date();
        self.status_tx.send_modify(|status| {
            status.date = date;
            status.baseline_loaded = baseline_loaded;
            status.running = running;
        });
    }

    async fn shutdown(&mut self) {
        if let Err(err) = self.sensing.stop_sensing().await {
            log_error!("failed to stop sensing cleanly: {err:?}");
        }

        // Producers are joined; whatever they queued is applied before the
        // final flush.
        let mut changed = false;
        while let Ok(reading) = self.readings_rx.try_recv() {
            changed |= self.session.apply_reading(reading);
        }
        if changed {
            self.snapshot_tx.send_replace(self.session.refresh());
        }

        let snapshot = self.session.current().clone();
        self.persist(&snapshot, Trigger::Flush).await;

        self.publish_status(false);
        self.status_tx.send_modify(|status| {
            if status.motion == SensorStatus::Active {
                status.motion = SensorStatus::Idle;
            }
            if status.location == SensorStatus::Active {
                status.location = SensorStatus::Idle;
            }
        });

        log_info!(
            "tracking session {} stopped at {} steps / {:.3} km",
            self.session.id(),
            snapshot.steps,
            snapshot.distance_km
        );
    }
}
