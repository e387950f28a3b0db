pub mod reading;
pub mod snapshot;

pub use reading::{AccelEvent, GeoFix, SensorReading, WatchOptions};
pub use snapshot::{
    calories_for, estimated_distance_km, DailySnapshot, Fingerprint, RemoteBaseline,
};
