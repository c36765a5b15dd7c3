use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_metric},
    models::{MetricType, SensorReading},
};

fn row_to_reading(row: &Row) -> Result<SensorReading> {
    let timestamp: String = row.get("timestamp")?;
    let metric: String = row.get("metric_type")?;

    Ok(SensorReading {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        sensor_name: row.get("sensor_name")?,
        metric: parse_metric(&metric)?,
        value: row.get("value")?,
        unit: row.get("unit")?,
        timestamp: parse_datetime(&timestamp, "timestamp")?,
    })
}

impl Database {
    pub async fn insert_reading(&self, reading: &SensorReading) -> Result<()> {
        let record = reading.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO sensor_readings (session_id, sensor_name, metric_type, value, unit, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.session_id,
                    record.sensor_name,
                    record.metric.as_str(),
                    record.value,
                    record.unit,
                    record.timestamp.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Fetch readings for a session ordered by timestamp, optionally
    /// filtered to one metric and/or an inclusive time range.
    pub async fn get_readings(
        &self,
        session_id: &str,
        metric: Option<MetricType>,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<SensorReading>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut sql = String::from(
                "SELECT id, session_id, sensor_name, metric_type, value, unit, timestamp
                 FROM sensor_readings
                 WHERE session_id = ?1",
            );
            let mut bindings: Vec<String> = vec![session_id];

            if let Some(metric) = metric {
                sql.push_str(&format!(" AND metric_type = ?{}", bindings.len() + 1));
                bindings.push(metric.as_str().to_string());
            }
            if let Some((from, to)) = range {
                sql.push_str(&format!(
                    " AND timestamp >= ?{} AND timestamp <= ?{}",
                    bindings.len() + 1,
                    bindings.len() + 2
                ));
                bindings.push(from.to_rfc3339());
                bindings.push(to.to_rfc3339());
            }
            sql.push_str(" ORDER BY timestamp ASC");

            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(rusqlite::params_from_iter(bindings))?;

            let mut readings = Vec::new();
            while let Some(row) = rows.next()? {
                readings.push(row_to_reading(row)?);
            }

            Ok(readings)
        })
        .await
    }

    pub async fn count_readings(&self, session_id: &str) -> Result<i64> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM sensor_readings WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
        .await
    }
}
