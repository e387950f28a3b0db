//! Once-per-day goal feedback.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::persistence::FlagStore;
use crate::utils::{day_key, Clock};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FeedbackKind {
    GoalReached,
}

/// Haptic / notification output. Fire-and-forget from the engine's view.
#[async_trait]
pub trait FeedbackSink: Send + Sync {
    async fn fire(&self, kind: FeedbackKind) -> Result<()>;
}

pub fn goal_flag_key(date: NaiveDate) -> String {
    format!("goalReached_{}", day_key(date))
}

pub struct GoalNotifier {
    flags: Arc<dyn FlagStore>,
    feedback: Arc<dyn FeedbackSink>,
    clock: Arc<dyn Clock>,
}

impl GoalNotifier {
    pub fn new(
        flags: Arc<dyn FlagStore>,
        feedback: Arc<dyn FeedbackSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            flags,
            feedback,
            clock,
        }
    }

    /// Fires goal feedback at most once per local day. Returns true when it
    /// fired on this call.
    ///
    /// The day's flag is read before firing and written only after the sink
    /// reported success, so a failed fire is retried on the next check.
    pub async fn check_goal(&self, steps: u64, goal: u32, enabled: bool) -> bool {
        if !enabled || steps < u64::from(goal) {
            return false;
        }

        let key = goal_flag_key(self.clock.today());
        match self.flags.get(&key).await {
            Ok(Some(_)) => return false,
            Ok(None) => {}
            Err(err) => {
                log_error!("error checking goal flag {key}: {err:?}");
                return false;
            }
        }

        if let Err(err) = self.feedback.fire(FeedbackKind::GoalReached).await {
            log_warn!("goal feedback failed, will retry on next check: {err}");
            return false;
        }

        if let Err(err) = self.flags.set(&key, "true").await {
            log_error!("failed to record goal flag {key}: {err:?}");
        }
        log_info!("daily goal of {} reached with {} steps", goal, steps);
        true
    }
}
