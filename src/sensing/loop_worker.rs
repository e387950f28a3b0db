use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::models::{AccelEvent, GeoFix, SensorReading};
use crate::utils::{start_of_local_day, Clock};

use super::HardwareStepQuery;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

pub const QUERY_TIMEOUT_SECS: u64 = 10;

/// Polls the hardware counter for `[midnight, now)` every `poll_interval`.
///
/// The setup probe already took the first reading, so the first poll waits a
/// full interval. Failed or timed-out polls keep nothing and retry next tick.
pub async fn hardware_poll_loop(
    query: Arc<dyn HardwareStepQuery>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    readings: mpsc::UnboundedSender<SensorReading>,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + poll_interval, poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut consecutive_failures: u32 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = clock.now();
                let since = start_of_local_day(now);
                let fut = query.query(since, now);

                match tokio::time::timeout(Duration::from_secs(QUERY_TIMEOUT_SECS), fut).await {
                    Ok(Ok(steps)) => {
                        if consecutive_failures > 0 {
                            log_info!("step poll recovered after {} failed cycles", consecutive_failures);
                        }
                        consecutive_failures = 0;
                        let reading = SensorReading::StepCount { day: now.date_naive(), steps };
                        if readings.send(reading).is_err() {
                            log_info!("engine gone, step poll loop exiting");
                            break;
                        }
                    }
                    Ok(Err(err)) => {
                        consecutive_failures += 1;
                        log_debug!("step poll failed ({} in a row), retrying next cycle: {err}", consecutive_failures);
                    }
                    Err(_) => {
                        consecutive_failures += 1;
                        log_warn!("step poll timed out (> {}s), retrying next cycle", QUERY_TIMEOUT_SECS);
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("step poll loop shutting down");
                break;
            }
        }
    }
}

/// Stamps accelerometer events with their arrival time and forwards them.
pub async fn accelerometer_pump(
    mut events: mpsc::UnboundedReceiver<AccelEvent>,
    readings: mpsc::UnboundedSender<SensorReading>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    log_warn!("accelerometer stream closed");
                    break;
                };
                let reading = SensorReading::StepEvents {
                    cumulative: event.cumulative_events,
                    at: Instant::now(),
                };
                if readings.send(reading).is_err() {
                    break;
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("accelerometer pump shutting down");
                break;
            }
        }
    }
}

pub async fn location_pump(
    mut fixes: mpsc::UnboundedReceiver<GeoFix>,
    readings: mpsc::UnboundedSender<SensorReading>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            fix = fixes.recv() => {
                let Some(fix) = fix else {
                    log_warn!("location stream closed");
                    break;
                };
                if readings.send(SensorReading::Fix(fix)).is_err() {
                    break;
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("location pump shutting down");
                break;
            }
        }
    }
}
