//! Daily activity snapshot and the helpers that keep it monotonic.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::{CALORIES_PER_STEP, STEP_LENGTH_KM};

/// One user's activity for one local calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySnapshot {
    pub date: NaiveDate,
    pub steps: u64,
    pub distance_km: f64,
    /// Always `calories_for(steps)`.
    pub calories: u64,
    pub goal_reached: bool,
}

/// The last snapshot known to be durably stored for today.
pub type RemoteBaseline = DailySnapshot;

/// Identity of a snapshot for duplicate-write suppression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    steps: u64,
    distance_bits: u64,
    goal_reached: bool,
}

pub fn calories_for(steps: u64) -> u64 {
    (steps as f64 * CALORIES_PER_STEP).round() as u64
}

pub fn estimated_distance_km(steps: u64) -> f64 {
    steps as f64 * STEP_LENGTH_KM
}

impl DailySnapshot {
    pub fn new(date: NaiveDate, steps: u64, distance_km: f64, goal_reached: bool) -> Self {
        Self {
            date,
            steps,
            distance_km: sanitize_km(distance_km),
            calories: calories_for(steps),
            goal_reached,
        }
    }

    pub fn empty(date: NaiveDate) -> Self {
        Self::new(date, 0, 0.0, false)
    }

    /// Per-metric max (OR for the goal flag). Calories are recomputed from the
    /// merged steps and the date of `self` is kept.
    pub fn monotonic_max(&self, other: &DailySnapshot) -> DailySnapshot {
        DailySnapshot::new(
            self.date,
            self.steps.max(other.steps),
            self.distance_km.max(other.distance_km),
            self.goal_reached || other.goal_reached,
        )
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            steps: self.steps,
            distance_bits: self.distance_km.to_bits(),
            goal_reached: self.goal_reached,
        }
    }

    /// Percentage of `goal` reached, capped at 100.
    pub fn goal_progress(&self, goal: u32) -> f64 {
        if goal == 0 {
            return 0.0;
        }
        (self.steps as f64 / goal as f64 * 100.0).min(100.0)
    }
}

fn sanitize_km(km: f64) -> f64 {
    if km.is_finite() && km > 0.0 {
        km
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 27).unwrap()
    }

    #[test]
    fn test_calories_are_derived_from_steps() {
        assert_eq!(calories_for(0), 0);
        assert_eq!(calories_for(10_050), 402);
        assert_eq!(calories_for(12), 0);
        assert_eq!(calories_for(13), 1);
        assert_eq!(DailySnapshot::new(day(), 2_500, 1.0, false).calories, 100);
    }

    #[test]
    fn test_monotonic_max_per_metric() {
        let local = DailySnapshot::new(day(), 800, 0.3, false);
        let remote = DailySnapshot::new(day(), 500, 0.9, true);
        let merged = local.monotonic_max(&remote);

        assert_eq!(merged.steps, 800);
        assert_eq!(merged.distance_km, 0.9);
        assert!(merged.goal_reached);
        assert_eq!(merged.calories, calories_for(800));
    }

    #[test]
    fn test_fingerprint_tracks_goal_flag() {
        let a = DailySnapshot::new(day(), 100, 0.1, false);
        let b = DailySnapshot::new(day(), 100, 0.1, false);
        let c = DailySnapshot::new(day(), 100, 0.1, true);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_negative_or_nan_distance_is_clamped() {
        assert_eq!(DailySnapshot::new(day(), 1, -2.0, false).distance_km, 0.0);
        assert_eq!(DailySnapshot::new(day(), 1, f64::NAN, false).distance_km, 0.0);
    }

    #[test]
    fn test_goal_progress_caps_at_100() {
        let snapshot = DailySnapshot::new(day(), 5_000, 0.0, false);
        assert_eq!(snapshot.goal_progress(10_000), 50.0);
        assert_eq!(snapshot.goal_progress(4_000), 100.0);
        assert_eq!(snapshot.goal_progress(0), 0.0);
    }

    #[test]
    fn test_serializes_camel_case_with_iso_date() {
        let json = serde_json::to_value(DailySnapshot::new(day(), 10, 0.0, false)).unwrap();
        assert_eq!(json["date"], "2026-01-27");
        assert_eq!(json["distanceKm"], 0.0);
        assert_eq!(json["goalReached"], false);
    }
}
