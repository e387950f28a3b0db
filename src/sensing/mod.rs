//! Sensor ports, step strategies and the loops that feed the engine.

pub mod controller;
pub mod geo;
pub mod loop_worker;
pub mod step_source;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use tokio::sync::mpsc;

use crate::error::TrackingResult;
use crate::models::{AccelEvent, GeoFix, WatchOptions};

pub use controller::{SensingController, StepSetup};
pub use geo::{haversine_km, GeoDistanceAccumulator};
pub use step_source::{
    rate_limited_delta, FilteredEventCounter, HardwareCounterPoller, StepSource, StepStrategy,
};

/// OS step counter that can report elapsed steps for a time range.
#[async_trait]
pub trait HardwareStepQuery: Send + Sync {
    async fn request_permission(&self) -> TrackingResult<()>;

    async fn is_available(&self) -> bool;

    /// Steps counted in `[since, until)`.
    async fn query(&self, since: DateTime<Local>, until: DateTime<Local>) -> TrackingResult<u64>;
}

/// Push source of accelerometer-derived step events.
///
/// Implementations push into the returned channel from their own callback
/// thread; an unbounded sender never blocks them.
pub trait AccelerometerEventStream: Send + Sync {
    fn subscribe(&self) -> TrackingResult<mpsc::UnboundedReceiver<AccelEvent>>;

    fn unsubscribe(&self);
}

/// Push source of GPS fixes.
#[async_trait]
pub trait LocationWatcher: Send + Sync {
    /// Requests permission and starts watching.
    async fn watch(&self, options: WatchOptions) -> TrackingResult<mpsc::UnboundedReceiver<GeoFix>>;

    fn unwatch(&self);
}
