use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};

use super::models::{MetricType, SessionStatus};

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

pub fn parse_status(value: &str) -> Result<SessionStatus> {
    match value {
        "active" => Ok(SessionStatus::Active),
        "completed" => Ok(SessionStatus::Completed),
        "stopped" => Ok(SessionStatus::Stopped),
        other => Err(anyhow!("unknown session status {other}")),
    }
}

pub fn parse_metric(value: &str) -> Result<MetricType> {
    match value {
        "temperature" => Ok(MetricType::Temperature),
        "humidity" => Ok(MetricType::Humidity),
        "voc" => Ok(MetricType::Voc),
        "co2" => Ok(MetricType::Co2),
        other => Err(anyhow!("unknown metric type {other}")),
    }
}
