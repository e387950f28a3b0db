use anyhow::{Context, Result};
use chrono::{NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::helpers::{conversion_error, format_date, parse_date, to_i64, to_u64};
use crate::models::DailySnapshot;

fn row_to_snapshot(row: &Row) -> Result<DailySnapshot, rusqlite::Error> {
    let date_str: String = row.get("date")?;
    let date = parse_date(&date_str, "date").map_err(conversion_error)?;
    let steps = to_u64(row.get("steps")?, "steps").map_err(conversion_error)?;

    // Calories are derived from steps on the way back in.
    Ok(DailySnapshot::new(
        date,
        steps,
        row.get("distance_km")?,
        row.get::<_, i64>("goal_reached")? != 0,
    ))
}

pub struct SnapshotRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SnapshotRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert or replace the day's metrics; `created_at` survives updates.
    pub fn upsert(&self, user_id: &str, snapshot: &DailySnapshot) -> Result<()> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
        self.conn
            .execute(
                "INSERT INTO daily_snapshots
                    (user_id, date, steps, distance_km, calories, goal_reached, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                 ON CONFLICT(user_id, date) DO UPDATE SET
                     steps = excluded.steps,
                     distance_km = excluded.distance_km,
                     calories = excluded.calories,
                     goal_reached = excluded.goal_reached,
                     updated_at = excluded.updated_at",
                params![
                    user_id,
                    format_date(snapshot.date),
                    to_i64(snapshot.steps)?,
                    snapshot.distance_km,
                    to_i64(snapshot.calories)?,
                    snapshot.goal_reached as i64,
                    now,
                ],
            )
            .with_context(|| format!("failed to upsert snapshot for {}", snapshot.date))?;
        Ok(())
    }

    pub fn get(&self, user_id: &str, date: NaiveDate) -> Result<Option<DailySnapshot>> {
        self.conn
            .query_row(
                "SELECT date, steps, distance_km, goal_reached
                 FROM daily_snapshots
                 WHERE user_id = ?1 AND date = ?2",
                params![user_id, format_date(date)],
                row_to_snapshot,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn list_recent(&self, user_id: &str, limit: usize) -> Result<Vec<DailySnapshot>> {
        let mut stmt = self.conn.prepare(
            "SELECT date, steps, distance_km, goal_reached
             FROM daily_snapshots
             WHERE user_id = ?1
             ORDER BY updated_at DESC, date DESC
             LIMIT ?2",
        )?;

        let snapshots = stmt
            .query_map(params![user_id, to_i64(limit as u64)?], row_to_snapshot)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(snapshots)
    }

    pub fn created_at(&self, user_id: &str, date: NaiveDate) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT created_at FROM daily_snapshots WHERE user_id = ?1 AND date = ?2",
                params![user_id, format_date(date)],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }
}
