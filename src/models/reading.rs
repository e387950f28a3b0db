use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// One GPS position report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoFix {
    pub lat: f64,
    pub lon: f64,
    pub timestamp: DateTime<Utc>,
}

impl GeoFix {
    pub fn new(lat: f64, lon: f64, timestamp: DateTime<Utc>) -> Self {
        Self { lat, lon, timestamp }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Payload pushed by the accelerometer step-event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccelEvent {
    /// Events counted since the subscription started, not since midnight.
    pub cumulative_events: u64,
}

/// Location watcher settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchOptions {
    pub high_accuracy: bool,
    pub min_interval_ms: u64,
    pub min_distance_m: u32,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            min_interval_ms: 5_000,
            min_distance_m: 10,
        }
    }
}

/// Raw reading travelling from a producer to the fusion engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorReading {
    /// Hardware counter total for `[midnight, now)` of `day`.
    StepCount { day: NaiveDate, steps: u64 },
    /// Accelerometer cumulative count, stamped on arrival.
    StepEvents { cumulative: u64, at: Instant },
    Fix(GeoFix),
}

impl SensorReading {
    pub fn kind(&self) -> &'static str {
        match self {
            SensorReading::StepCount { .. } => "step-count",
            SensorReading::StepEvents { .. } => "step-events",
            SensorReading::Fix(_) => "geo-fix",
        }
    }
}
