//! Application configuration, loaded once at startup from a JSON file.
//!
//! Validation is deliberately strict: a scoring function with weights that
//! do not sum to 1, or a lookahead the spike window can never fit inside,
//! is an ill-defined detector, so the process refuses to start rather than
//! run with it.

use std::{collections::HashSet, fs, path::PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::db::models::MetricType;

const WEIGHT_SUM_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
    pub sensors: Vec<SensorConfig>,
    #[serde(default)]
    pub detection: DetectionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Fixed logging cadence while a session is active.
    pub sample_interval_secs: u64,
    /// Hardware polling cadence; independent of session state. The DHT22
    /// cannot be read more often than every 2 seconds.
    pub poll_interval_secs: u64,
    /// Budget for one hardware read before the poll marks the sensor stale.
    pub read_timeout_secs: u64,
    /// Sessions still active after this long are stopped automatically.
    pub max_session_secs: u64,
    /// Retention of the in-memory analysis window.
    pub buffer_retention_secs: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: 1,
            poll_interval_secs: 2,
            read_timeout_secs: 5,
            max_session_secs: 16 * 60,
            buffer_retention_secs: 300,
        }
    }
}

/// Which driver a configured sensor uses. Adding hardware support means
/// adding a variant here and a driver arm in `sensors::drivers`, not
/// probing attributes at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SensorKind {
    Dht22,
    Sht31,
    Sgp30,
}

impl SensorKind {
    pub fn metrics(&self) -> &'static [MetricType] {
        match self {
            SensorKind::Dht22 | SensorKind::Sht31 => {
                &[MetricType::Temperature, MetricType::Humidity]
            }
            SensorKind::Sgp30 => &[MetricType::Voc, MetricType::Co2],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SensorKind,
    /// GPIO pin for one-wire sensors (DHT22).
    #[serde(default)]
    pub pin: Option<u8>,
    /// I2C address for bus sensors (SHT31, SGP30).
    #[serde(default)]
    pub i2c_address: Option<u8>,
    /// Optional narrowing of the metrics this sensor logs. Must be a
    /// subset of what the driver kind provides.
    #[serde(default)]
    pub metrics: Option<Vec<MetricType>>,
}

impl SensorConfig {
    /// The metrics this sensor contributes downstream.
    pub fn active_metrics(&self) -> Vec<MetricType> {
        match &self.metrics {
            Some(narrowed) => narrowed.clone(),
            None => self.kind.metrics().to_vec(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// °C/min slope at or below which the temperature signal saturates.
    pub temp_ror_threshold: f64,
    pub voc_spike_threshold: f64,
    pub co2_spike_threshold: f64,
    pub humidity_spike_threshold: f64,

    pub temp_weight: f64,
    pub voc_weight: f64,
    pub co2_weight: f64,
    pub humidity_weight: f64,

    /// Candidate gate, calibrated for exhaust-gas measurement rather than
    /// bean temperature.
    pub min_temp_for_fc: f64,
    pub max_temp_for_fc: f64,
    pub confidence_threshold: f64,

    /// Trailing window for the temperature slope.
    pub ror_window_secs: u64,
    /// Spike baseline window: `[t - start_offset, t - end_offset)`.
    pub baseline_start_offset_secs: u64,
    pub baseline_end_offset_secs: u64,
    /// Spike short window: `[t - lead, t + lag]`. The lag is the trailing
    /// data a candidate needs before it can be scored at all.
    pub spike_lead_secs: u64,
    pub spike_lag_secs: u64,
    /// Live mode never confirms an event further in the past than this,
    /// relative to the most recent sample.
    pub lookahead_secs: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            temp_ror_threshold: -1.0,
            voc_spike_threshold: 1.2,
            co2_spike_threshold: 1.15,
            humidity_spike_threshold: 1.1,
            temp_weight: 0.25,
            voc_weight: 0.45,
            co2_weight: 0.20,
            humidity_weight: 0.10,
            min_temp_for_fc: 30.0,
            max_temp_for_fc: 220.0,
            confidence_threshold: 0.50,
            ror_window_secs: 60,
            baseline_start_offset_secs: 120,
            baseline_end_offset_secs: 30,
            spike_lead_secs: 30,
            spike_lag_secs: 15,
            lookahead_secs: 30,
        }
    }
}

impl DetectionConfig {
    pub fn weight_for(&self, metric: MetricType) -> f64 {
        match metric {
            MetricType::Temperature => self.temp_weight,
            MetricType::Voc => self.voc_weight,
            MetricType::Co2 => self.co2_weight,
            MetricType::Humidity => self.humidity_weight,
        }
    }

    pub fn spike_threshold_for(&self, metric: MetricType) -> Option<f64> {
        match metric {
            MetricType::Voc => Some(self.voc_spike_threshold),
            MetricType::Co2 => Some(self.co2_spike_threshold),
            MetricType::Humidity => Some(self.humidity_spike_threshold),
            MetricType::Temperature => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let weight_sum =
            self.temp_weight + self.voc_weight + self.co2_weight + self.humidity_weight;
        if (weight_sum - 1.0).abs() > WEIGHT_SUM_EPSILON {
            bail!("detection weights must sum to 1.0, got {weight_sum}");
        }
        for (name, weight) in [
            ("temp_weight", self.temp_weight),
            ("voc_weight", self.voc_weight),
            ("co2_weight", self.co2_weight),
            ("humidity_weight", self.humidity_weight),
        ] {
            if weight < 0.0 {
                bail!("{name} must be non-negative, got {weight}");
            }
        }
        if self.temp_ror_threshold >= 0.0 {
            bail!(
                "temp_ror_threshold must be negative (a stall/drop), got {}",
                self.temp_ror_threshold
            );
        }
        for (name, threshold) in [
            ("voc_spike_threshold", self.voc_spike_threshold),
            ("co2_spike_threshold", self.co2_spike_threshold),
            ("humidity_spike_threshold", self.humidity_spike_threshold),
        ] {
            if threshold <= 1.0 {
                bail!("{name} must be above 1.0, got {threshold}");
            }
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            bail!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            );
        }
        if self.min_temp_for_fc >= self.max_temp_for_fc {
            bail!("min_temp_for_fc must be below max_temp_for_fc");
        }
        if self.ror_window_secs == 0 {
            bail!("ror_window_secs must be positive");
        }
        if self.baseline_end_offset_secs >= self.baseline_start_offset_secs {
            bail!("baseline window is empty: end offset must be below start offset");
        }
        if self.spike_lag_secs > self.lookahead_secs {
            // Otherwise a candidate ages out of the live lookahead before
            // its short window is ever fully recorded.
            bail!(
                "spike_lag_secs ({}) must not exceed lookahead_secs ({})",
                self.spike_lag_secs,
                self.lookahead_secs
            );
        }
        Ok(())
    }
}

impl AppConfig {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sampling.sample_interval_secs == 0 {
            bail!("sample_interval_secs must be positive");
        }
        if self.sampling.poll_interval_secs == 0 {
            bail!("poll_interval_secs must be positive");
        }
        if self.sampling.buffer_retention_secs
            < self.detection.baseline_start_offset_secs + self.detection.spike_lag_secs
        {
            bail!(
                "buffer_retention_secs ({}) is too small to cover the scoring window ({} + {})",
                self.sampling.buffer_retention_secs,
                self.detection.baseline_start_offset_secs,
                self.detection.spike_lag_secs
            );
        }
        let mut seen = HashSet::new();
        for sensor in &self.sensors {
            if !seen.insert(sensor.name.as_str()) {
                bail!("duplicate sensor name {}", sensor.name);
            }
            if let Some(narrowed) = &sensor.metrics {
                for metric in narrowed {
                    if !sensor.kind.metrics().contains(metric) {
                        bail!(
                            "sensor {} ({:?}) does not provide metric {metric}",
                            sensor.name,
                            sensor.kind
                        );
                    }
                }
            }
        }
        self.detection.validate()
    }

    /// Union of metrics the configured sensors provide; determines which
    /// detection signals are present and how weights are redistributed.
    pub fn configured_metrics(&self) -> HashSet<MetricType> {
        self.sensors
            .iter()
            .flat_map(|sensor| sensor.active_metrics())
            .collect()
    }
}
