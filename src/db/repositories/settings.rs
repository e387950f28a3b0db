use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::config::Settings;
use crate::db::helpers::{conversion_error, to_u32};

pub struct SettingsRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SettingsRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self, user_id: &str) -> Result<Option<Settings>> {
        self.conn
            .query_row(
                "SELECT gps_enabled, vibration_enabled, daily_goal
                 FROM user_settings WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(Settings {
                        gps_enabled: row.get::<_, i64>(0)? != 0,
                        vibration_enabled: row.get::<_, i64>(1)? != 0,
                        daily_goal: to_u32(row.get(2)?, "daily_goal").map_err(conversion_error)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn put(&self, user_id: &str, settings: &Settings) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO user_settings (user_id, gps_enabled, vibration_enabled, daily_goal, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id) DO UPDATE SET
                     gps_enabled = excluded.gps_enabled,
                     vibration_enabled = excluded.vibration_enabled,
                     daily_goal = excluded.daily_goal,
                     updated_at = excluded.updated_at",
                params![
                    user_id,
                    settings.gps_enabled as i64,
                    settings.vibration_enabled as i64,
                    i64::from(settings.daily_goal),
                    Utc::now().to_rfc3339(),
                ],
            )
            .context("failed to save user settings")?;
        Ok(())
    }
}
