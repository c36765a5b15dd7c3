//! Sensor reading data model.
//!
//! Represents a single logged value for one metric of one sensor during a
//! roast session. Readings are append-only; the timestamp is the moment the
//! hardware was read, not the moment the row was written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MetricType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorReading {
    pub id: Option<i64>,
    pub session_id: String,
    pub sensor_name: String,
    pub metric: MetricType,
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
}

impl SensorReading {
    pub fn new(
        session_id: impl Into<String>,
        sensor_name: impl Into<String>,
        metric: MetricType,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            session_id: session_id.into(),
            sensor_name: sensor_name.into(),
            metric,
            value,
            unit: metric.unit().to_string(),
            timestamp,
        }
    }
}
