pub mod connection;
pub mod helpers;
pub mod migrations;
pub mod repositories;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

pub use connection::Database;
use repositories::{SettingsRepository, SnapshotRepository};

use crate::config::Settings;
use crate::models::DailySnapshot;
use crate::persistence::RemoteStore;

#[async_trait]
impl RemoteStore for Database {
    async fn get_snapshot(&self, user_id: &str, date: NaiveDate) -> Result<Option<DailySnapshot>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| SnapshotRepository::new(conn).get(&user_id, date))
            .await
    }

    async fn put_snapshot(&self, user_id: &str, snapshot: &DailySnapshot) -> Result<()> {
        let user_id = user_id.to_string();
        let snapshot = snapshot.clone();
        self.execute(move |conn| SnapshotRepository::new(conn).upsert(&user_id, &snapshot))
            .await
    }

    async fn list_recent(&self, user_id: &str, limit: usize) -> Result<Vec<DailySnapshot>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| SnapshotRepository::new(conn).list_recent(&user_id, limit))
            .await
    }

    async fn get_settings(&self, user_id: &str) -> Result<Settings> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            Ok(SettingsRepository::new(conn)
                .get(&user_id)?
                .unwrap_or_default())
        })
        .await
    }

    async fn put_settings(&self, user_id: &str, settings: &Settings) -> Result<()> {
        let user_id = user_id.to_string();
        let settings = *settings;
        self.execute(move |conn| SettingsRepository::new(conn).put(&user_id, &settings))
            .await
    }
}
