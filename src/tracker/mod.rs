pub mod controller;
pub mod state;

pub use controller::{PersistCallback, Tracker, TrackingDeps, TrackingHandle};
pub use state::{TrackingSession, TrackingStatus};
