use std::sync::Arc;

use tokio::time::{Duration, Instant};

use crate::models::{DailySnapshot, Fingerprint};

use super::RemoteStore;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_warn};

/// A write is attempted whenever the step count enters a new block of this size.
pub const STEP_DELTA_TRIGGER: u64 = 100;
pub const WRITE_TIMEOUT_SECS: u64 = 10;

/// What prompted a persistence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The reconciled snapshot changed.
    Change,
    /// Autosave ticker fired.
    Timer,
    /// Tracking is stopping; skip the timing rules.
    Flush,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoSteps,
    NotDue,
    Duplicate,
    Regression,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PersistOutcome {
    Written(DailySnapshot),
    Skipped(SkipReason),
    Failed,
}

/// Decides when a reconciled snapshot goes to the store.
///
/// Due when the step count crossed a multiple of [`STEP_DELTA_TRIGGER`]
/// since the previous check, or on a timer tick once the autosave interval
/// has passed since the last successful write. A failed write is therefore
/// retried by the next crossing or tick, never by an unrelated change.
/// Identical fingerprints and snapshots below the last known step count are
/// never written.
pub struct PersistenceScheduler {
    store: Arc<dyn RemoteStore>,
    user_id: String,
    interval: Duration,
    write_timeout: Duration,
    last_success_at: Option<Instant>,
    last_attempt: Option<Fingerprint>,
    last_observed_steps: u64,
    known_steps: u64,
}

impl PersistenceScheduler {
    pub fn new(store: Arc<dyn RemoteStore>, user_id: impl Into<String>, interval: Duration) -> Self {
        Self {
            store,
            user_id: user_id.into(),
            interval,
            write_timeout: Duration::from_secs(WRITE_TIMEOUT_SECS),
            last_success_at: None,
            last_attempt: None,
            last_observed_steps: 0,
            known_steps: 0,
        }
    }

    /// Tell the scheduler about a snapshot known to be stored already
    /// (the fetched baseline).
    pub fn note_known(&mut self, snapshot: &DailySnapshot) {
        self.known_steps = self.known_steps.max(snapshot.steps);
    }

    pub fn known_steps(&self) -> u64 {
        self.known_steps
    }

    pub fn new_day(&mut self) {
        self.last_success_at = None;
        self.last_attempt = None;
        self.last_observed_steps = 0;
        self.known_steps = 0;
    }

    /// When the next timer tick should fire: one interval after the last
    /// successful write, if there was one.
    pub fn next_periodic_at(&self) -> Option<Instant> {
        self.last_success_at.map(|at| at + self.interval)
    }

    fn is_due(&mut self, steps: u64, now: Instant, trigger: Trigger) -> bool {
        let crossed = steps / STEP_DELTA_TRIGGER > self.last_observed_steps / STEP_DELTA_TRIGGER;
        self.last_observed_steps = steps;

        match trigger {
            Trigger::Flush => true,
            Trigger::Change => crossed,
            Trigger::Timer => {
                crossed
                    || self
                        .last_success_at
                        .map_or(true, |at| now.saturating_duration_since(at) >= self.interval)
            }
        }
    }

    pub async fn maybe_persist(
        &mut self,
        snapshot: &DailySnapshot,
        now: Instant,
        trigger: Trigger,
    ) -> PersistOutcome {
        if snapshot.steps == 0 {
            return PersistOutcome::Skipped(SkipReason::NoSteps);
        }

        if !self.is_due(snapshot.steps, now, trigger) {
            return PersistOutcome::Skipped(SkipReason::NotDue);
        }

        if snapshot.steps < self.known_steps {
            log_warn!(
                "refusing to persist {} steps below known {} for {}",
                snapshot.steps,
                self.known_steps,
                snapshot.date
            );
            return PersistOutcome::Skipped(SkipReason::Regression);
        }

        let fingerprint = snapshot.fingerprint();
        if self.last_attempt == Some(fingerprint) {
            return PersistOutcome::Skipped(SkipReason::Duplicate);
        }
        self.last_attempt = Some(fingerprint);

        let write = self.store.put_snapshot(&self.user_id, snapshot);
        match tokio::time::timeout(self.write_timeout, write).await {
            Ok(Ok(())) => {
                self.last_success_at = Some(now);
                self.known_steps = self.known_steps.max(snapshot.steps);
                log_debug!(
                    "persisted {} steps / {:.3} km for {} ({:?})",
                    snapshot.steps,
                    snapshot.distance_km,
                    snapshot.date,
                    trigger
                );
                PersistOutcome::Written(snapshot.clone())
            }
            Ok(Err(err)) => {
                // Let the next trigger retry this exact state.
                self.last_attempt = None;
                log_error!("failed to save step data for {}: {err:?}", snapshot.date);
                PersistOutcome::Failed
            }
            Err(_) => {
                self.last_attempt = None;
                log_warn!("step data write timed out (> {}s)", self.write_timeout.as_secs());
                PersistOutcome::Failed
            }
        }
    }
}
