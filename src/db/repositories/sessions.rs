use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_optional_datetime, parse_status},
    models::{Session, SessionStatus, SessionSummary},
};

fn row_to_session(row: &Row) -> Result<Session> {
    let started_at: String = row.get("started_at")?;
    let stopped_at: Option<String> = row.get("stopped_at")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let status: String = row.get("status")?;

    Ok(Session {
        id: row.get("id")?,
        name: row.get("name")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        stopped_at: parse_optional_datetime(stopped_at, "stopped_at")?,
        status: parse_status(&status)?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

impl Database {
    pub async fn insert_session(&self, session: &Session) -> Result<()> {
        let record = session.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO roast_sessions (id, name, started_at, stopped_at, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.id,
                    record.name,
                    record.started_at.to_rfc3339(),
                    record.stopped_at.as_ref().map(|dt| dt.to_rfc3339()),
                    record.status.as_str(),
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Set the terminal status of a session. Only transitions an `active`
    /// row so a stale caller cannot clobber an already-finalized session.
    pub async fn finalize_session(
        &self,
        session_id: &str,
        status: SessionStatus,
        stopped_at: DateTime<Utc>,
    ) -> Result<bool> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let affected = conn.execute(
                "UPDATE roast_sessions
                 SET status = ?1,
                     stopped_at = ?2,
                     updated_at = ?3
                 WHERE id = ?4 AND status = 'active'",
                params![
                    status.as_str(),
                    stopped_at.to_rfc3339(),
                    stopped_at.to_rfc3339(),
                    session_id,
                ],
            )?;
            Ok(affected > 0)
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, started_at, stopped_at, status, created_at, updated_at
                 FROM roast_sessions
                 WHERE id = ?1",
            )?;

            let mut rows = stmt.query(params![session_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_session(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn get_active_session(&self) -> Result<Option<Session>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, started_at, stopped_at, status, created_at, updated_at
                 FROM roast_sessions
                 WHERE status = 'active'
                 ORDER BY started_at DESC
                 LIMIT 1",
            )?;

            let mut rows = stmt.query([])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_session(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// Mark every session left `active` by a crash as stopped. Returns how
    /// many rows were recovered. Run once at startup, before the collector
    /// accepts start requests.
    pub async fn recover_interrupted_sessions(&self, now: DateTime<Utc>) -> Result<usize> {
        self.execute(move |conn| {
            let affected = conn.execute(
                "UPDATE roast_sessions
                 SET status = 'stopped',
                     stopped_at = ?1,
                     updated_at = ?1
                 WHERE status = 'active'",
                params![now.to_rfc3339()],
            )?;
            Ok(affected)
        })
        .await
    }

    pub async fn list_sessions(&self, limit: usize) -> Result<Vec<SessionSummary>> {
        let limit = limit as i64;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, started_at, stopped_at, status,
                        (SELECT COUNT(*) FROM sensor_readings WHERE session_id = roast_sessions.id) AS reading_count,
                        (SELECT MAX(value) FROM sensor_readings
                         WHERE session_id = roast_sessions.id AND metric_type = 'temperature') AS peak_temperature
                 FROM roast_sessions
                 ORDER BY started_at DESC
                 LIMIT ?1",
            )?;

            let mut rows = stmt.query(params![limit])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                let started_at: String = row.get("started_at")?;
                let stopped_at: Option<String> = row.get("stopped_at")?;
                let status: String = row.get("status")?;
                sessions.push(SessionSummary {
                    id: row.get("id")?,
                    name: row.get("name")?,
                    started_at: parse_datetime(&started_at, "started_at")?,
                    stopped_at: parse_optional_datetime(stopped_at, "stopped_at")?,
                    status: parse_status(&status)?,
                    reading_count: row.get("reading_count")?,
                    peak_temperature: row.get("peak_temperature")?,
                });
            }

            Ok(sessions)
        })
        .await
    }

    /// Delete a session. Readings and first-crack rows go with it via
    /// ON DELETE CASCADE.
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "DELETE FROM roast_sessions WHERE id = ?1",
                params![session_id],
            )?;
            Ok(())
        })
        .await
    }
}
