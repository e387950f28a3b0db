use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::config::Settings;
use crate::models::DailySnapshot;

/// Durable per-user document store. One snapshot document per user per day,
/// one settings document per user.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get_snapshot(&self, user_id: &str, date: NaiveDate) -> Result<Option<DailySnapshot>>;

    /// Upserts the document for `snapshot.date`, keeping any fields the
    /// store tracks on its own (creation time and the like).
    async fn put_snapshot(&self, user_id: &str, snapshot: &DailySnapshot) -> Result<()>;

    /// Most recently updated days first.
    async fn list_recent(&self, user_id: &str, limit: usize) -> Result<Vec<DailySnapshot>>;

    /// Stored settings, or the defaults when the user has none yet.
    async fn get_settings(&self, user_id: &str) -> Result<Settings>;

    async fn put_settings(&self, user_id: &str, settings: &Settings) -> Result<()>;
}

/// Small string key-value store for once-per-day flags.
#[async_trait]
pub trait FlagStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;
}
