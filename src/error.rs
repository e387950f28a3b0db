use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Physical sensor a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Sensor {
    Motion,
    Location,
}

impl Sensor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sensor::Motion => "motion",
            Sensor::Location => "location",
        }
    }
}

/// Everything that can go wrong while fusing readings. None of it is fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackingError {
    #[error("{} permission denied", .0.as_str())]
    PermissionDenied(Sensor),

    #[error("{} sensor not available on this device", .0.as_str())]
    SourceUnavailable(Sensor),

    #[error("query failed: {0}")]
    TransientQueryFailure(String),

    #[error("remote baseline not loaded yet")]
    DataUnavailable,
}

pub type TrackingResult<T> = Result<T, TrackingError>;

/// Non-fatal per-sensor status surfaced on the tracking handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SensorStatus {
    /// Not started yet (or tracking stopped).
    Idle,
    Active,
    /// Turned off by configuration (GPS only).
    Disabled,
    PermissionDenied,
    Unavailable,
}

impl SensorStatus {
    /// Status a failed setup leaves behind. Transient failures at setup are
    /// reported as unavailable since nothing will retry them.
    pub fn from_setup_error(err: &TrackingError) -> Self {
        match err {
            TrackingError::PermissionDenied(_) => SensorStatus::PermissionDenied,
            TrackingError::SourceUnavailable(_)
            | TrackingError::TransientQueryFailure(_)
            | TrackingError::DataUnavailable => SensorStatus::Unavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_sensor() {
        let err = TrackingError::PermissionDenied(Sensor::Motion);
        assert_eq!(err.to_string(), "motion permission denied");

        let err = TrackingError::SourceUnavailable(Sensor::Location);
        assert_eq!(err.to_string(), "location sensor not available on this device");
    }

    #[test]
    fn test_setup_error_maps_to_status() {
        assert_eq!(
            SensorStatus::from_setup_error(&TrackingError::PermissionDenied(Sensor::Location)),
            SensorStatus::PermissionDenied
        );
        assert_eq!(
            SensorStatus::from_setup_error(&TrackingError::TransientQueryFailure("x".into())),
            SensorStatus::Unavailable
        );
    }
}
