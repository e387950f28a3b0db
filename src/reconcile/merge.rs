use chrono::NaiveDate;

use crate::models::{DailySnapshot, RemoteBaseline};

/// Merge a local reading with the remote baseline. The remote value is only
/// ever a floor: steps and distance take the max, the goal flag is OR-ed and
/// calories follow the merged steps.
pub fn merge(local: &DailySnapshot, remote: Option<&RemoteBaseline>) -> DailySnapshot {
    match remote {
        Some(remote) => local.monotonic_max(remote),
        None => DailySnapshot::new(local.date, local.steps, local.distance_km, local.goal_reached),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BaselineState {
    /// Fetch still in flight (or failed and will be retried).
    Loading,
    /// Fetched; `None` means nothing stored for the day yet.
    Resolved(Option<RemoteBaseline>),
}

/// Keeps the floor a session's snapshots are merged against.
#[derive(Debug, Clone)]
pub struct BaselineReconciler {
    date: NaiveDate,
    state: BaselineState,
    persisted: Option<DailySnapshot>,
}

impl BaselineReconciler {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            state: BaselineState::Loading,
            persisted: None,
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn state(&self) -> &BaselineState {
        &self.state
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, BaselineState::Resolved(_))
    }

    /// Record the fetched baseline. Returns true only for the first
    /// resolution, which is when the retroactive merge has to run.
    pub fn resolve(&mut self, date: NaiveDate, remote: Option<RemoteBaseline>) -> bool {
        if date != self.date || self.is_loaded() {
            return false;
        }
        let remote = remote.filter(|snapshot| snapshot.date == self.date);
        self.state = BaselineState::Resolved(remote);
        true
    }

    /// Raise the floor after a successful write.
    pub fn record_persisted(&mut self, snapshot: &DailySnapshot) {
        if snapshot.date != self.date {
            return;
        }
        self.persisted = Some(match &self.persisted {
            Some(previous) => previous.monotonic_max(snapshot),
            None => snapshot.clone(),
        });
    }

    /// Current floor: max of the fetched baseline and anything persisted since.
    pub fn floor(&self) -> Option<DailySnapshot> {
        let fetched = match &self.state {
            BaselineState::Resolved(Some(remote)) => Some(remote),
            _ => None,
        };
        match (fetched, &self.persisted) {
            (Some(a), Some(b)) => Some(a.monotonic_max(b)),
            (Some(a), None) => Some(a.clone()),
            (None, Some(b)) => Some(b.clone()),
            (None, None) => None,
        }
    }

    pub fn baseline_steps(&self) -> u64 {
        self.floor().map(|snapshot| snapshot.steps).unwrap_or(0)
    }

    pub fn reconcile(&self, local: &DailySnapshot) -> DailySnapshot {
        merge(local, self.floor().as_ref())
    }
}
