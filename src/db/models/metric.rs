use serde::{Deserialize, Serialize};

/// The metric kinds a sensor can report. Stored as lowercase strings in
/// SQLite and in the wire payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Temperature,
    Humidity,
    Voc,
    Co2,
}

impl MetricType {
    pub const ALL: [MetricType; 4] = [
        MetricType::Temperature,
        MetricType::Humidity,
        MetricType::Voc,
        MetricType::Co2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Temperature => "temperature",
            MetricType::Humidity => "humidity",
            MetricType::Voc => "voc",
            MetricType::Co2 => "co2",
        }
    }

    /// Canonical unit for the metric. The SGP30 reports VOC in ppb and
    /// CO2-equivalent in ppm.
    pub fn unit(&self) -> &'static str {
        match self {
            MetricType::Temperature => "°C",
            MetricType::Humidity => "%",
            MetricType::Voc => "ppb",
            MetricType::Co2 => "ppm",
        }
    }
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
