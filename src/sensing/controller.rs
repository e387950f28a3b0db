use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::{Sensor, SensorStatus, TrackingError};
use crate::models::{SensorReading, WatchOptions};
use crate::utils::{start_of_local_day, Clock};

use super::loop_worker::{accelerometer_pump, hardware_poll_loop, location_pump};
use super::step_source::{FilteredEventCounter, HardwareCounterPoller, StepSource};
use super::{AccelerometerEventStream, HardwareStepQuery, LocationWatcher};

/// Outcome of choosing a step strategy at setup.
#[derive(Debug, Clone)]
pub struct StepSetup {
    pub source: Option<StepSource>,
    pub status: SensorStatus,
}

/// Owns the producer tasks of one tracking session.
pub struct SensingController {
    readings: mpsc::UnboundedSender<SensorReading>,
    cancel_token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    accelerometer: Option<Arc<dyn AccelerometerEventStream>>,
    location: Option<Arc<dyn LocationWatcher>>,
    stopped: bool,
}

impl SensingController {
    pub fn new(readings: mpsc::UnboundedSender<SensorReading>) -> Self {
        Self {
            readings,
            cancel_token: CancellationToken::new(),
            handles: Vec::new(),
            accelerometer: None,
            location: None,
            stopped: false,
        }
    }

    /// Picks the step strategy for this session and starts its producer.
    ///
    /// Permission → availability → first hardware query. If that query fails
    /// the accelerometer fallback is used for the rest of the session.
    ///
    /// Sensing starts before the day's stored value is fetched, so sources
    /// begin at zero and the reconciler floors them once it arrives.
    pub async fn start_steps(
        &mut self,
        hardware: Arc<dyn HardwareStepQuery>,
        accelerometer: Arc<dyn AccelerometerEventStream>,
        clock: Arc<dyn Clock>,
        poll_interval: Duration,
    ) -> StepSetup {
        if let Err(err) = hardware.request_permission().await {
            warn!("step tracking disabled: {err}");
            return StepSetup {
                source: None,
                status: SensorStatus::from_setup_error(&err),
            };
        }

        if !hardware.is_available().await {
            let err = TrackingError::SourceUnavailable(Sensor::Motion);
            warn!("step tracking disabled: {err}");
            return StepSetup {
                source: None,
                status: SensorStatus::Unavailable,
            };
        }

        let now = clock.now();
        match hardware.query(start_of_local_day(now), now).await {
            Ok(initial) => {
                let mut poller = HardwareCounterPoller::start(0);
                poller.apply_count(initial);
                info!("step source: hardware counter ({} steps so far today)", initial);

                let handle = tokio::spawn(hardware_poll_loop(
                    hardware,
                    clock,
                    poll_interval,
                    self.readings.clone(),
                    self.cancel_token.child_token(),
                ));
                self.handles.push(handle);

                StepSetup {
                    source: Some(StepSource::HardwareCounter(poller)),
                    status: SensorStatus::Active,
                }
            }
            Err(err) => {
                warn!("hardware step query failed: {err}");
                warn!("falling back to accelerometer step events (less accurate)");
                self.start_event_fallback(accelerometer)
            }
        }
    }

    fn start_event_fallback(
        &mut self,
        accelerometer: Arc<dyn AccelerometerEventStream>,
    ) -> StepSetup {
        match accelerometer.subscribe() {
            Ok(events) => {
                let counter = FilteredEventCounter::start(None, Instant::now());
                let handle = tokio::spawn(accelerometer_pump(
                    events,
                    self.readings.clone(),
                    self.cancel_token.child_token(),
                ));
                self.handles.push(handle);
                self.accelerometer = Some(accelerometer);

                StepSetup {
                    source: Some(StepSource::FilteredEvents(counter)),
                    status: SensorStatus::Active,
                }
            }
            Err(err) => {
                warn!("accelerometer fallback unavailable: {err}");
                StepSetup {
                    source: None,
                    status: SensorStatus::from_setup_error(&err),
                }
            }
        }
    }

    pub async fn start_location(
        &mut self,
        location: Arc<dyn LocationWatcher>,
        enabled: bool,
    ) -> SensorStatus {
        if !enabled {
            return SensorStatus::Disabled;
        }

        match location.watch(WatchOptions::default()).await {
            Ok(fixes) => {
                let handle = tokio::spawn(location_pump(
                    fixes,
                    self.readings.clone(),
                    self.cancel_token.child_token(),
                ));
                self.handles.push(handle);
                self.location = Some(location);
                SensorStatus::Active
            }
            Err(err) => {
                warn!("GPS distance disabled: {err}");
                SensorStatus::from_setup_error(&err)
            }
        }
    }

    /// Cancels every producer and releases the sensor subscriptions.
    /// Calling it again is a no-op.
    pub async fn stop_sensing(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        self.cancel_token.cancel();

        if let Some(accelerometer) = self.accelerometer.take() {
            accelerometer.unsubscribe();
        }
        if let Some(location) = self.location.take() {
            location.unwatch();
        }

        for handle in self.handles.drain(..) {
            handle.await.context("sensing task failed to join")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackingResult;
    use crate::models::{AccelEvent, GeoFix};
    use crate::sensing::StepStrategy;
    use crate::utils::SystemClock;
    use async_trait::async_trait;
    use chrono::{DateTime, Local};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct FakeHardware {
        permission: TrackingResult<()>,
        available: bool,
        initial: TrackingResult<u64>,
    }

    #[async_trait]
    impl HardwareStepQuery for FakeHardware {
        async fn request_permission(&self) -> TrackingResult<()> {
            self.permission.clone()
        }

        async fn is_available(&self) -> bool {
            self.available
        }

        async fn query(&self, _since: DateTime<Local>, _until: DateTime<Local>) -> TrackingResult<u64> {
            self.initial.clone()
        }
    }

    #[derive(Default)]
    struct FakeAccelerometer {
        sender: Mutex<Option<mpsc::UnboundedSender<AccelEvent>>>,
        unsubscribed: AtomicBool,
    }

    impl AccelerometerEventStream for FakeAccelerometer {
        fn subscribe(&self) -> TrackingResult<mpsc::UnboundedReceiver<AccelEvent>> {
            let (tx, rx) = mpsc::unbounded_channel();
            *self.sender.lock().unwrap() = Some(tx);
            Ok(rx)
        }

        fn unsubscribe(&self) {
            self.unsubscribed.store(true, Ordering::SeqCst);
        }
    }

    struct DeniedLocation;

    #[async_trait]
    impl LocationWatcher for DeniedLocation {
        async fn watch(&self, _options: WatchOptions) -> TrackingResult<mpsc::UnboundedReceiver<GeoFix>> {
            Err(TrackingError::PermissionDenied(Sensor::Location))
        }

        fn unwatch(&self) {}
    }

    fn hardware(initial: TrackingResult<u64>) -> Arc<FakeHardware> {
        Arc::new(FakeHardware {
            permission: Ok(()),
            available: true,
            initial,
        })
    }

    #[tokio::test]
    async fn test_hardware_success_selects_poller() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut controller = SensingController::new(tx);
        let accel = Arc::new(FakeAccelerometer::default());

        let setup = controller
            .start_steps(hardware(Ok(120)), accel.clone(), Arc::new(SystemClock), Duration::from_secs(5))
            .await;

        let source = setup.source.unwrap();
        assert_eq!(source.strategy(), StepStrategy::HardwareCounter);
        assert_eq!(source.current_steps(), 120);
        assert_eq!(setup.status, SensorStatus::Active);
        assert!(accel.sender.lock().unwrap().is_none());

        controller.stop_sensing().await.unwrap();
    }

    #[tokio::test]
    async fn test_query_failure_falls_back_to_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut controller = SensingController::new(tx);
        let accel = Arc::new(FakeAccelerometer::default());

        let setup = controller
            .start_steps(
                hardware(Err(TrackingError::TransientQueryFailure("boom".into()))),
                accel.clone(),
                Arc::new(SystemClock),
                Duration::from_secs(5),
            )
            .await;

        let source = setup.source.unwrap();
        assert_eq!(source.strategy(), StepStrategy::FilteredEvents);
        assert_eq!(source.current_steps(), 0);

        let sender = accel.sender.lock().unwrap().clone().unwrap();
        sender.send(AccelEvent { cumulative_events: 7 }).unwrap();
        match rx.recv().await.unwrap() {
            SensorReading::StepEvents { cumulative, .. } => assert_eq!(cumulative, 7),
            other => panic!("unexpected reading {other:?}"),
        }

        controller.stop_sensing().await.unwrap();
        assert!(accel.unsubscribed.load(Ordering::SeqCst));
        // Idempotent.
        controller.stop_sensing().await.unwrap();
    }

    #[tokio::test]
    async fn test_permission_denied_is_a_status_not_an_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut controller = SensingController::new(tx);
        let denied = Arc::new(FakeHardware {
            permission: Err(TrackingError::PermissionDenied(Sensor::Motion)),
            available: true,
            initial: Ok(0),
        });

        let setup = controller
            .start_steps(denied, Arc::new(FakeAccelerometer::default()), Arc::new(SystemClock), Duration::from_secs(5))
            .await;
        assert!(setup.source.is_none());
        assert_eq!(setup.status, SensorStatus::PermissionDenied);

        let location = controller.start_location(Arc::new(DeniedLocation), true).await;
        assert_eq!(location, SensorStatus::PermissionDenied);
        assert_eq!(
            controller.start_location(Arc::new(DeniedLocation), false).await,
            SensorStatus::Disabled
        );
    }

    #[tokio::test]
    async fn test_missing_hardware_is_unavailable() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut controller = SensingController::new(tx);
        let missing = Arc::new(FakeHardware {
            permission: Ok(()),
            available: false,
            initial: Ok(0),
        });

        let setup = controller
            .start_steps(missing, Arc::new(FakeAccelerometer::default()), Arc::new(SystemClock), Duration::from_secs(5))
            .await;
        assert!(setup.source.is_none());
        assert_eq!(setup.status, SensorStatus::Unavailable);
    }
}
