//! First-crack marker models.
//!
//! A session carries at most one manual mark and at most one algorithmic
//! prediction. The manual mark is overwritten by every new mark; the
//! prediction is only replaced by a candidate of equal or higher
//! confidence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SOURCE_MANUAL: &str = "manual";
pub const SOURCE_PREDICTED: &str = "predicted";

/// Operator-placed first-crack marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirstCrackEvent {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

impl FirstCrackEvent {
    pub fn manual(session_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            timestamp,
            source: SOURCE_MANUAL.to_string(),
        }
    }
}

/// Per-signal scores behind a prediction's confidence. `None` marks a
/// signal whose sensor is absent from the configuration, as opposed to a
/// present signal that scored 0.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalScores {
    pub temperature_ror: Option<f64>,
    pub voc_spike: Option<f64>,
    pub co2_spike: Option<f64>,
    pub humidity_spike: Option<f64>,
}

/// Algorithmic first-crack estimate for a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirstCrackPrediction {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub confidence: f64,
    pub signal_scores: SignalScores,
    pub source: String,
}

impl FirstCrackPrediction {
    pub fn new(
        session_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        confidence: f64,
        signal_scores: SignalScores,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            timestamp,
            confidence,
            signal_scores,
            source: SOURCE_PREDICTED.to_string(),
        }
    }
}
