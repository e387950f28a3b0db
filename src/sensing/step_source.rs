//! Step count strategies.
//!
//! `HardwareCounterPoller` trusts the OS step counter and is the default.
//! `FilteredEventCounter` is the accelerometer fallback used when the
//! counter query fails at setup; it caps implausible step rates.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Step rate above which accelerometer events are treated as handling noise
/// (picking the phone up, unlocking it) rather than walking.
pub const MAX_STEPS_PER_SECOND: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepStrategy {
    HardwareCounter,
    FilteredEvents,
}

/// Delta to accept for `step_delta` events observed over `time_delta_secs`.
///
/// Rates up to `MAX_STEPS_PER_SECOND` (inclusive) pass whole; faster bursts
/// are capped to what the max rate allows instead of being dropped.
pub fn rate_limited_delta(step_delta: u64, time_delta_secs: f64) -> u64 {
    if step_delta == 0 || !(time_delta_secs > 0.0) {
        return 0;
    }

    let rate = step_delta as f64 / time_delta_secs;
    if rate <= MAX_STEPS_PER_SECOND {
        step_delta
    } else {
        (MAX_STEPS_PER_SECOND * time_delta_secs).round() as u64
    }
}

#[derive(Debug, Clone)]
pub struct HardwareCounterPoller {
    current: u64,
    baseline: u64,
    seeded: bool,
}

impl HardwareCounterPoller {
    pub fn start(baseline: u64) -> Self {
        Self {
            current: baseline,
            baseline,
            seeded: false,
        }
    }

    /// Apply one successful query. The first one of the day is floored by the
    /// baseline; every later one replaces the value outright.
    pub fn apply_count(&mut self, reported: u64) {
        if self.seeded {
            self.current = reported;
        } else {
            self.current = reported.max(self.baseline);
            self.seeded = true;
        }
    }

    /// Late baseline. Only matters before the first successful query; once
    /// the setup query has seeded the poller a higher stored value is
    /// enforced by the reconciler floor instead.
    pub fn apply_baseline(&mut self, baseline: u64) {
        if !self.seeded {
            self.baseline = baseline;
            self.current = self.current.max(baseline);
        }
    }

    pub fn current_steps(&self) -> u64 {
        self.current
    }

    pub fn new_day(&mut self) {
        self.current = 0;
        self.baseline = 0;
        self.seeded = false;
    }
}

#[derive(Debug, Clone)]
pub struct FilteredEventCounter {
    base_steps: u64,
    base_seeded: bool,
    accepted_steps: u64,
    last_raw: u64,
    last_event_at: Instant,
}

impl FilteredEventCounter {
    /// `baseline` is `None` while the remote baseline is still loading.
    pub fn start(baseline: Option<u64>, subscribed_at: Instant) -> Self {
        Self {
            base_steps: baseline.unwrap_or(0),
            base_seeded: baseline.is_some(),
            accepted_steps: 0,
            last_raw: 0,
            last_event_at: subscribed_at,
        }
    }

    /// Apply one cumulative event count; returns the accepted delta.
    pub fn on_event(&mut self, cumulative: u64, at: Instant) -> u64 {
        let time_delta = at
            .checked_duration_since(self.last_event_at)
            .map(|elapsed| elapsed.as_secs_f64())
            .unwrap_or(0.0);
        // A lower cumulative value means the stream restarted; re-anchor.
        let step_delta = cumulative.saturating_sub(self.last_raw);

        let accepted = rate_limited_delta(step_delta, time_delta);
        self.accepted_steps += accepted;
        self.last_raw = cumulative;
        self.last_event_at = at;
        accepted
    }

    /// Seeds `base_steps` the first time a baseline becomes known.
    pub fn apply_baseline(&mut self, baseline: u64) {
        if !self.base_seeded {
            self.base_steps = baseline;
            self.base_seeded = true;
        }
    }

    pub fn current_steps(&self) -> u64 {
        self.base_steps + self.accepted_steps
    }

    /// New day: totals restart, raw anchors stay so the next delta is right.
    pub fn new_day(&mut self) {
        self.base_steps = 0;
        self.base_seeded = false;
        self.accepted_steps = 0;
    }
}

/// The one strategy active for a tracking session.
#[derive(Debug, Clone)]
pub enum StepSource {
    HardwareCounter(HardwareCounterPoller),
    FilteredEvents(FilteredEventCounter),
}

impl StepSource {
    pub fn strategy(&self) -> StepStrategy {
        match self {
            StepSource::HardwareCounter(_) => StepStrategy::HardwareCounter,
            StepSource::FilteredEvents(_) => StepStrategy::FilteredEvents,
        }
    }

    pub fn current_steps(&self) -> u64 {
        match self {
            StepSource::HardwareCounter(poller) => poller.current_steps(),
            StepSource::FilteredEvents(counter) => counter.current_steps(),
        }
    }

    pub fn apply_baseline(&mut self, baseline: u64) {
        match self {
            StepSource::HardwareCounter(poller) => poller.apply_baseline(baseline),
            StepSource::FilteredEvents(counter) => counter.apply_baseline(baseline),
        }
    }

    /// Returns false when the reading belongs to the other strategy.
    pub fn apply_count(&mut self, steps: u64) -> bool {
        match self {
            StepSource::HardwareCounter(poller) => {
                poller.apply_count(steps);
                true
            }
            StepSource::FilteredEvents(_) => false,
        }
    }

    pub fn apply_event(&mut self, cumulative: u64, at: Instant) -> bool {
        match self {
            StepSource::FilteredEvents(counter) => {
                counter.on_event(cumulative, at);
                true
            }
            StepSource::HardwareCounter(_) => false,
        }
    }

    pub fn new_day(&mut self) {
        match self {
            StepSource::HardwareCounter(poller) => poller.new_day(),
            StepSource::FilteredEvents(counter) => counter.new_day(),
        }
    }
}
