use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension};

use crate::db::{
    connection::Database,
    helpers::parse_datetime,
    models::{FirstCrackEvent, FirstCrackPrediction, SignalScores},
};

impl Database {
    /// Store the manual first-crack mark for a session, replacing any
    /// previous mark. A new mark expresses the operator correcting the old
    /// one, so the row is overwritten rather than appended.
    pub async fn put_first_crack_event(&self, event: &FirstCrackEvent) -> Result<()> {
        let record = event.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO first_crack_events (session_id, timestamp, source)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(session_id) DO UPDATE SET
                     timestamp = excluded.timestamp,
                     source = excluded.source",
                params![
                    record.session_id,
                    record.timestamp.to_rfc3339(),
                    record.source,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_first_crack_event(&self, session_id: &str) -> Result<Option<FirstCrackEvent>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let row = conn
                .query_row(
                    "SELECT session_id, timestamp, source
                     FROM first_crack_events
                     WHERE session_id = ?1",
                    params![session_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()?;

            match row {
                Some((session_id, timestamp, source)) => Ok(Some(FirstCrackEvent {
                    session_id,
                    timestamp: parse_datetime(&timestamp, "timestamp")?,
                    source,
                })),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn delete_first_crack_event(&self, session_id: &str) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "DELETE FROM first_crack_events WHERE session_id = ?1",
                params![session_id],
            )?;
            Ok(())
        })
        .await
    }

    /// Store a prediction for a session. The row is only replaced when the
    /// new confidence is greater than or equal to the stored one, so the
    /// persisted confidence never decreases within a session. Returns
    /// whether the row was written.
    pub async fn put_first_crack_prediction(
        &self,
        prediction: &FirstCrackPrediction,
    ) -> Result<bool> {
        let record = prediction.clone();
        self.execute(move |conn| {
            let scores_json = serde_json::to_string(&record.signal_scores)
                .context("failed to serialize signal scores")?;

            let affected = conn.execute(
                "INSERT INTO first_crack_predictions (session_id, timestamp, confidence, signal_scores, source)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(session_id) DO UPDATE SET
                     timestamp = excluded.timestamp,
                     confidence = excluded.confidence,
                     signal_scores = excluded.signal_scores,
                     source = excluded.source
                 WHERE excluded.confidence >= first_crack_predictions.confidence",
                params![
                    record.session_id,
                    record.timestamp.to_rfc3339(),
                    record.confidence,
                    scores_json,
                    record.source,
                ],
            )?;
            Ok(affected > 0)
        })
        .await
    }

    pub async fn get_first_crack_prediction(
        &self,
        session_id: &str,
    ) -> Result<Option<FirstCrackPrediction>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let row = conn
                .query_row(
                    "SELECT session_id, timestamp, confidence, signal_scores, source
                     FROM first_crack_predictions
                     WHERE session_id = ?1",
                    params![session_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, f64>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                        ))
                    },
                )
                .optional()?;

            match row {
                Some((session_id, timestamp, confidence, scores_json, source)) => {
                    let signal_scores: SignalScores = serde_json::from_str(&scores_json)
                        .context("failed to deserialize signal scores")?;
                    Ok(Some(FirstCrackPrediction {
                        session_id,
                        timestamp: parse_datetime(&timestamp, "timestamp")?,
                        confidence,
                        signal_scores,
                        source,
                    }))
                }
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn delete_first_crack_prediction(&self, session_id: &str) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "DELETE FROM first_crack_predictions WHERE session_id = ?1",
                params![session_id],
            )?;
            Ok(())
        })
        .await
    }
}
