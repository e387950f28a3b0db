#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, TimeZone};
use tokio::sync::mpsc;
use tokio::time::Duration;

use stepfuse_lib::error::{Sensor, TrackingError, TrackingResult};
use stepfuse_lib::models::{AccelEvent, WatchOptions};
use stepfuse_lib::{
    AccelerometerEventStream, DailySnapshot, FeedbackKind, FeedbackSink, FlagStore, GeoFix,
    HardwareStepQuery, LocationWatcher, ManualClock, MemoryFlagStore, RemoteStore, Settings,
    TrackingDeps,
};

pub fn noon() -> DateTime<Local> {
    Local.with_ymd_and_hms(2026, 1, 27, 12, 0, 0).unwrap()
}

pub fn today() -> NaiveDate {
    noon().date_naive()
}

/// Hardware counter answering queries from a script; the last answer repeats.
pub struct ScriptedHardware {
    script: Mutex<VecDeque<TrackingResult<u64>>>,
    last: Mutex<u64>,
    pub queries: AtomicUsize,
}

impl ScriptedHardware {
    pub fn new(script: Vec<TrackingResult<u64>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(0),
            queries: AtomicUsize::new(0),
        })
    }

    pub fn counts(counts: &[u64]) -> Arc<Self> {
        Self::new(counts.iter().copied().map(Ok).collect())
    }

    pub fn failing() -> Arc<Self> {
        Self::new(vec![Err(TrackingError::TransientQueryFailure(
            "sensor busy".into(),
        ))])
    }
}

#[async_trait]
impl HardwareStepQuery for ScriptedHardware {
    async fn request_permission(&self) -> TrackingResult<()> {
        Ok(())
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn query(&self, _since: DateTime<Local>, _until: DateTime<Local>) -> TrackingResult<u64> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(steps)) => {
                *self.last.lock().unwrap() = steps;
                Ok(steps)
            }
            Some(Err(err)) => Err(err),
            None => Ok(*self.last.lock().unwrap()),
        }
    }
}

#[derive(Default)]
pub struct FakeAccelerometer {
    sender: Mutex<Option<mpsc::UnboundedSender<AccelEvent>>>,
}

impl FakeAccelerometer {
    pub fn emit(&self, cumulative: u64) {
        if let Some(sender) = self.sender.lock().unwrap().as_ref() {
            sender
                .send(AccelEvent {
                    cumulative_events: cumulative,
                })
                .unwrap();
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.sender.lock().unwrap().is_some()
    }
}

impl AccelerometerEventStream for FakeAccelerometer {
    fn subscribe(&self) -> TrackingResult<mpsc::UnboundedReceiver<AccelEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sender.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    fn unsubscribe(&self) {
        self.sender.lock().unwrap().take();
    }
}

pub struct FakeLocation {
    permitted: bool,
    sender: Mutex<Option<mpsc::UnboundedSender<GeoFix>>>,
}

impl FakeLocation {
    pub fn new(permitted: bool) -> Arc<Self> {
        Arc::new(Self {
            permitted,
            sender: Mutex::new(None),
        })
    }

    pub fn emit(&self, lat: f64, lon: f64) {
        if let Some(sender) = self.sender.lock().unwrap().as_ref() {
            sender.send(GeoFix::new(lat, lon, chrono::Utc::now())).unwrap();
        }
    }
}

#[async_trait]
impl LocationWatcher for FakeLocation {
    async fn watch(&self, _options: WatchOptions) -> TrackingResult<mpsc::UnboundedReceiver<GeoFix>> {
        if !self.permitted {
            return Err(TrackingError::PermissionDenied(Sensor::Location));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sender.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    fn unwatch(&self) {
        self.sender.lock().unwrap().take();
    }
}

/// In-memory store that records every write.
#[derive(Default)]
pub struct MemoryStore {
    snapshots: Mutex<HashMap<(String, NaiveDate), DailySnapshot>>,
    pub writes: Mutex<Vec<DailySnapshot>>,
    pub put_attempts: AtomicUsize,
    fail_writes: AtomicBool,
    get_delay: Mutex<Option<Duration>>,
    put_delay: Mutex<Option<Duration>>,
}

impl MemoryStore {
    pub fn with_snapshot(user_id: &str, snapshot: DailySnapshot) -> Arc<Self> {
        let store = Self::default();
        store
            .snapshots
            .lock()
            .unwrap()
            .insert((user_id.to_string(), snapshot.date), snapshot);
        Arc::new(store)
    }

    pub fn delay_reads(&self, delay: Duration) {
        *self.get_delay.lock().unwrap() = Some(delay);
    }

    pub fn delay_writes(&self, delay: Duration) {
        *self.put_delay.lock().unwrap() = Some(delay);
    }

    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.put_attempts.load(Ordering::SeqCst)
    }

    pub fn written(&self) -> Vec<DailySnapshot> {
        self.writes.lock().unwrap().clone()
    }

    pub fn stored(&self, user_id: &str, date: NaiveDate) -> Option<DailySnapshot> {
        self.snapshots
            .lock()
            .unwrap()
            .get(&(user_id.to_string(), date))
            .cloned()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get_snapshot(&self, user_id: &str, date: NaiveDate) -> Result<Option<DailySnapshot>> {
        let delay = *self.get_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.stored(user_id, date))
    }

    async fn put_snapshot(&self, user_id: &str, snapshot: &DailySnapshot) -> Result<()> {
        self.put_attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.put_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("store offline"));
        }
        self.writes.lock().unwrap().push(snapshot.clone());
        self.snapshots
            .lock()
            .unwrap()
            .insert((user_id.to_string(), snapshot.date), snapshot.clone());
        Ok(())
    }

    async fn list_recent(&self, user_id: &str, limit: usize) -> Result<Vec<DailySnapshot>> {
        let mut days: Vec<DailySnapshot> = self
            .snapshots
            .lock()
            .unwrap()
            .iter()
            .filter(|((user, _), _)| user == user_id)
            .map(|(_, snapshot)| snapshot.clone())
            .collect();
        days.sort_by(|a, b| b.date.cmp(&a.date));
        days.truncate(limit);
        Ok(days)
    }

    async fn get_settings(&self, _user_id: &str) -> Result<Settings> {
        Ok(Settings::default())
    }

    async fn put_settings(&self, _user_id: &str, _settings: &Settings) -> Result<()> {
        Err(anyhow!("read-only settings"))
    }
}

#[derive(Default)]
pub struct CountingFeedback {
    fired: AtomicUsize,
}

impl CountingFeedback {
    pub fn fired(&self) -> usize {
        self.fired.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedbackSink for CountingFeedback {
    async fn fire(&self, _kind: FeedbackKind) -> Result<()> {
        self.fired.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct Harness {
    pub hardware: Arc<ScriptedHardware>,
    pub accelerometer: Arc<FakeAccelerometer>,
    pub location: Arc<FakeLocation>,
    pub store: Arc<MemoryStore>,
    pub flags: Arc<MemoryFlagStore>,
    pub feedback: Arc<CountingFeedback>,
    pub clock: ManualClock,
}

impl Harness {
    pub fn new(hardware: Arc<ScriptedHardware>, store: Arc<MemoryStore>) -> Self {
        Self {
            hardware,
            accelerometer: Arc::new(FakeAccelerometer::default()),
            location: FakeLocation::new(true),
            store,
            flags: Arc::new(MemoryFlagStore::default()),
            feedback: Arc::new(CountingFeedback::default()),
            clock: ManualClock::new(noon()),
        }
    }

    pub fn deps(&self) -> TrackingDeps {
        let flags: Arc<dyn FlagStore> = self.flags.clone();
        TrackingDeps {
            hardware: self.hardware.clone(),
            accelerometer: self.accelerometer.clone(),
            location: self.location.clone(),
            store: self.store.clone(),
            flags,
            feedback: self.feedback.clone(),
            clock: Arc::new(self.clock.clone()),
        }
    }
}
