use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_GOAL: u32 = 10_000;
pub const MIN_GOAL: u32 = 5_000;
pub const MAX_GOAL: u32 = 20_000;
pub const GOAL_STEP: u32 = 1_000;

/// Approximate kcal burned per step.
pub const CALORIES_PER_STEP: f64 = 0.04;
/// Average step length (~76.2 cm), used when GPS is off or behind.
pub const STEP_LENGTH_KM: f64 = 0.000_762;

pub const DEFAULT_AUTOSAVE_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

/// Per-user preferences, stored alongside the daily documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub gps_enabled: bool,
    pub vibration_enabled: bool,
    pub daily_goal: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gps_enabled: true,
            vibration_enabled: true,
            daily_goal: DEFAULT_GOAL,
        }
    }
}

/// Partial settings update; `None` keeps the current value.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub gps_enabled: Option<bool>,
    pub vibration_enabled: Option<bool>,
    pub daily_goal: Option<u32>,
}

impl Settings {
    pub fn apply(&self, patch: SettingsPatch) -> Result<Settings> {
        let updated = Settings {
            gps_enabled: patch.gps_enabled.unwrap_or(self.gps_enabled),
            vibration_enabled: patch.vibration_enabled.unwrap_or(self.vibration_enabled),
            daily_goal: patch.daily_goal.unwrap_or(self.daily_goal),
        };
        validation::validate_goal(updated.daily_goal)?;
        Ok(updated)
    }
}

/// Options recognised by `Tracker::start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackingConfig {
    pub gps_enabled: bool,
    pub daily_goal: u32,
    /// Gates the once-per-day goal feedback.
    pub vibration_enabled: bool,
    pub autosave_interval_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl TrackingConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            gps_enabled: settings.gps_enabled,
            daily_goal: settings.daily_goal,
            vibration_enabled: settings.vibration_enabled,
            autosave_interval_ms: DEFAULT_AUTOSAVE_INTERVAL_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read tracking config from {}", path.display()))?;
        let config: TrackingConfig = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse tracking config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validation::validate_goal(self.daily_goal)?;
        validation::validate_interval("autosave_interval_ms", self.autosave_interval_ms)?;
        validation::validate_interval("poll_interval_ms", self.poll_interval_ms)?;
        Ok(())
    }

    pub fn autosave_interval(&self) -> Duration {
        Duration::from_millis(self.autosave_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// `STEPFUSE_DEBUG=1` (or `true`) turns on per-reading debug logs.
pub fn debug_mode() -> bool {
    std::env::var("STEPFUSE_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub mod validation {
    use super::{GOAL_STEP, MAX_GOAL, MIN_GOAL};
    use anyhow::{bail, Result};

    pub fn validate_goal(goal: u32) -> Result<()> {
        if !(MIN_GOAL..=MAX_GOAL).contains(&goal) {
            bail!("Invalid daily goal {goal}. Must be between {MIN_GOAL} and {MAX_GOAL}");
        }
        if goal % GOAL_STEP != 0 {
            bail!("Invalid daily goal {goal}. Must be a multiple of {GOAL_STEP}");
        }
        Ok(())
    }

    pub fn validate_interval(name: &str, millis: u64) -> Result<()> {
        if millis == 0 {
            bail!("{name} must be greater than zero");
        }
        Ok(())
    }
}
