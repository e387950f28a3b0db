use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SensorStatus;
use crate::models::{estimated_distance_km, DailySnapshot, RemoteBaseline, SensorReading};
use crate::reconcile::BaselineReconciler;
use crate::sensing::{GeoDistanceAccumulator, StepSource, StepStrategy};

/// What the handle reports about the running session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingStatus {
    pub session_id: String,
    pub date: NaiveDate,
    pub step_strategy: Option<StepStrategy>,
    pub motion: SensorStatus,
    pub location: SensorStatus,
    pub baseline_loaded: bool,
    pub running: bool,
}

/// Everything one tracking run knows. Owned by the engine task only.
#[derive(Debug, Clone)]
pub struct TrackingSession {
    id: String,
    date: NaiveDate,
    daily_goal: u32,
    step_source: Option<StepSource>,
    /// `None` when GPS is off or its watcher failed to start.
    geo: Option<GeoDistanceAccumulator>,
    reconciler: BaselineReconciler,
    /// Highest snapshot shown so far today.
    high_water: DailySnapshot,
}

impl TrackingSession {
    pub fn new(
        date: NaiveDate,
        step_source: Option<StepSource>,
        gps_active: bool,
        daily_goal: u32,
    ) -> Self {
        let mut session = Self {
            id: Uuid::new_v4().to_string(),
            date,
            daily_goal,
            step_source,
            geo: gps_active.then(GeoDistanceAccumulator::new),
            reconciler: BaselineReconciler::new(date),
            high_water: DailySnapshot::empty(date),
        };
        session.refresh();
        session
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn step_strategy(&self) -> Option<StepStrategy> {
        self.step_source.as_ref().map(StepSource::strategy)
    }

    pub fn baseline_loaded(&self) -> bool {
        self.reconciler.is_loaded()
    }

    pub fn current(&self) -> &DailySnapshot {
        &self.high_water
    }

    /// Feed one reading into the matching running total. Returns false when
    /// the reading was dropped (stale day, no matching source).
    pub fn apply_reading(&mut self, reading: SensorReading) -> bool {
        match reading {
            SensorReading::StepCount { day, steps } => {
                if day != self.date {
                    return false;
                }
                self.step_source
                    .as_mut()
                    .map_or(false, |source| source.apply_count(steps))
            }
            SensorReading::StepEvents { cumulative, at } => self
                .step_source
                .as_mut()
                .map_or(false, |source| source.apply_event(cumulative, at)),
            SensorReading::Fix(fix) => match self.geo.as_mut() {
                Some(geo) => {
                    geo.on_fix(fix);
                    true
                }
                None => false,
            },
        }
    }

    /// Unmerged view of the live sensors.
    pub fn local_snapshot(&self) -> DailySnapshot {
        let steps = self
            .step_source
            .as_ref()
            .map_or(0, StepSource::current_steps);
        let estimated = estimated_distance_km(steps);
        let distance_km = match &self.geo {
            Some(geo) => geo.cumulative_km().max(estimated),
            None => estimated,
        };
        DailySnapshot::new(
            self.date,
            steps,
            distance_km,
            steps >= u64::from(self.daily_goal),
        )
    }

    /// Recompute the displayed snapshot from the live totals and the floor.
    pub fn refresh(&mut self) -> DailySnapshot {
        let merged = self.reconciler.reconcile(&self.local_snapshot());
        let goal_reached = merged.goal_reached || merged.steps >= u64::from(self.daily_goal);
        let merged = DailySnapshot::new(merged.date, merged.steps, merged.distance_km, goal_reached);
        self.high_water = self.high_water.monotonic_max(&merged);
        self.high_water.clone()
    }

    /// Apply the fetched baseline for `date`. Returns true when it was taken,
    /// after which the caller should refresh.
    pub fn resolve_baseline(&mut self, date: NaiveDate, remote: Option<RemoteBaseline>) -> bool {
        let fetched_steps = remote
            .as_ref()
            .filter(|snapshot| snapshot.date == date)
            .map_or(0, |snapshot| snapshot.steps);
        if !self.reconciler.resolve(date, remote) {
            return false;
        }
        // Seed the live source from the fetched value only; the persisted
        // part of the floor is already counted by the source itself.
        if let Some(source) = self.step_source.as_mut() {
            source.apply_baseline(fetched_steps);
        }
        true
    }

    pub fn baseline(&self) -> Option<DailySnapshot> {
        self.reconciler.floor()
    }

    pub fn record_persisted(&mut self, snapshot: &DailySnapshot) {
        self.reconciler.record_persisted(snapshot);
    }

    /// Start `new_date` with empty totals. Raw sensor anchors are kept so the
    /// first delta of the new day is measured from the last reading.
    pub fn roll_over(&mut self, new_date: NaiveDate) {
        if let Some(source) = self.step_source.as_mut() {
            source.new_day();
        }
        if let Some(geo) = self.geo.as_mut() {
            geo.reset_total();
        }
        self.date = new_date;
        self.reconciler = BaselineReconciler::new(new_date);
        self.high_water = DailySnapshot::empty(new_date);
        self.refresh();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GeoFix;
    use crate::sensing::{FilteredEventCounter, HardwareCounterPoller};
    use approx::assert_relative_eq;
    use chrono::Utc;
    use tokio::time::{Duration, Instant};

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 27).unwrap()
    }

    fn hardware_session(initial: u64, gps: bool) -> TrackingSession {
        let mut poller = HardwareCounterPoller::start(0);
        poller.apply_count(initial);
        TrackingSession::new(day(), Some(StepSource::HardwareCounter(poller)), gps, 10_000)
    }

    fn count(steps: u64) -> SensorReading {
        SensorReading::StepCount { day: day(), steps }
    }

    #[test]
    fn test_late_baseline_never_lowers_display() {
        let mut session = hardware_session(120, false);
        assert_eq!(session.refresh().steps, 120);

        assert!(session.resolve_baseline(day(), Some(DailySnapshot::new(day(), 500, 0.4, false))));
        assert_eq!(session.refresh().steps, 500);

        session.apply_reading(count(130));
        assert_eq!(session.refresh().steps, 500);

        session.apply_reading(count(800));
        let snapshot = session.refresh();
        assert_eq!(snapshot.steps, 800);
        assert_eq!(snapshot.calories, 32);
    }

    #[test]
    fn test_fallback_seeds_from_fetched_baseline_once() {
        let start = Instant::now();
        let counter = FilteredEventCounter::start(None, start);
        let mut session =
            TrackingSession::new(day(), Some(StepSource::FilteredEvents(counter)), false, 10_000);

        session.apply_reading(SensorReading::StepEvents {
            cumulative: 3,
            at: start + Duration::from_secs(1),
        });
        assert_eq!(session.refresh().steps, 3);

        session.record_persisted(&DailySnapshot::new(day(), 3, 0.0, false));
        session.resolve_baseline(day(), Some(DailySnapshot::new(day(), 400, 0.0, false)));
        assert_eq!(session.refresh().steps, 403);
    }

    #[test]
    fn test_distance_prefers_larger_of_gps_and_estimate() {
        let mut session = hardware_session(10, true);
        let now = Utc::now();
        session.apply_reading(SensorReading::Fix(GeoFix::new(47.0, 8.0, now)));
        session.apply_reading(SensorReading::Fix(GeoFix::new(47.00045, 8.0, now)));

        let snapshot = session.refresh();
        assert_relative_eq!(snapshot.distance_km, 0.05, max_relative = 0.01);

        let without_gps = hardware_session(100, false).refresh();
        assert_relative_eq!(without_gps.distance_km, 0.0762, max_relative = 1e-9);
        assert!(!without_gps.goal_reached);
    }

    #[test]
    fn test_fix_ignored_when_gps_off() {
        let mut session = hardware_session(0, false);
        assert!(!session.apply_reading(SensorReading::Fix(GeoFix::new(47.0, 8.0, Utc::now()))));
    }

    #[test]
    fn test_stale_day_counts_are_dropped() {
        let mut session = hardware_session(50, false);
        let yesterday = day().pred_opt().unwrap();
        assert!(!session.apply_reading(SensorReading::StepCount { day: yesterday, steps: 9_000 }));
        assert_eq!(session.refresh().steps, 50);
    }

    #[test]
    fn test_goal_flag_follows_merged_steps() {
        let mut session = hardware_session(100, false);
        session.resolve_baseline(day(), Some(DailySnapshot::new(day(), 10_200, 7.0, false)));
        assert!(session.refresh().goal_reached);
    }

    #[test]
    fn test_roll_over_starts_fresh_day() {
        let mut session = hardware_session(9_000, false);
        session.resolve_baseline(day(), None);
        session.refresh();

        let tomorrow = day().succ_opt().unwrap();
        session.roll_over(tomorrow);
        assert_eq!(session.date(), tomorrow);
        assert_eq!(session.current().steps, 0);
        assert!(!session.baseline_loaded());

        session.apply_reading(SensorReading::StepCount { day: tomorrow, steps: 40 });
        assert_eq!(session.refresh().steps, 40);
    }
}
