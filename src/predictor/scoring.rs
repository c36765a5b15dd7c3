//! Pure scoring math for first-crack detection.
//!
//! Each signal maps raw series evidence onto a [0, 1] score: 1.0 once the
//! configured threshold is met, ramping linearly below it. Confidence is
//! the weighted sum of the scores, with weights renormalized over the
//! metrics the deployment actually has sensors for.

use std::collections::{HashMap, HashSet};

use crate::buffer::TimedValue;
use crate::config::DetectionConfig;
use crate::db::models::MetricType;

/// Least-squares slope of a temperature window, in °C per minute. Needs
/// at least three points spanning a nonzero interval.
pub fn slope_per_minute(points: &[TimedValue]) -> Option<f64> {
    if points.len() < 3 {
        return None;
    }
    let origin = points[0].timestamp;
    let n = points.len() as f64;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xx = 0.0;
    let mut sum_xy = 0.0;
    for point in points {
        let x = (point.timestamp - origin).num_milliseconds() as f64 / 1000.0;
        sum_x += x;
        sum_y += point.value;
        sum_xx += x * x;
        sum_xy += x * point.value;
    }
    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator.abs() < f64::EPSILON {
        return None;
    }
    let per_second = (n * sum_xy - sum_x * sum_y) / denominator;
    Some(per_second * 60.0)
}

/// Temperature rate-of-rise score. The threshold is negative (a stall or
/// drop); any slope at or below it saturates, a shallower drop scores its
/// fraction of the threshold, and a rising temperature scores 0.
pub fn temp_score(slope_per_min: f64, threshold: f64) -> f64 {
    if slope_per_min <= threshold {
        1.0
    } else {
        (slope_per_min / threshold).clamp(0.0, 1.0)
    }
}

/// Spike score from a short-window/baseline mean ratio. The threshold is
/// above 1; a ratio at or beyond it saturates, and the score ramps over
/// the excess above 1.
pub fn spike_score(ratio: f64, threshold: f64) -> f64 {
    if ratio >= threshold {
        1.0
    } else {
        ((ratio - 1.0) / (threshold - 1.0)).clamp(0.0, 1.0)
    }
}

/// Effective per-signal weights for a deployment. Weights of metrics with
/// no configured sensor are redistributed proportionally across the rest,
/// so confidence still spans [0, 1].
#[derive(Debug, Clone)]
pub struct Weights {
    effective: HashMap<MetricType, f64>,
}

impl Weights {
    pub fn for_metrics(config: &DetectionConfig, configured: &HashSet<MetricType>) -> Self {
        let total: f64 = configured
            .iter()
            .map(|metric| config.weight_for(*metric))
            .sum();
        let effective = if total > 0.0 {
            configured
                .iter()
                .map(|metric| (*metric, config.weight_for(*metric) / total))
                .collect()
        } else {
            HashMap::new()
        };
        Self { effective }
    }

    pub fn get(&self, metric: MetricType) -> f64 {
        self.effective.get(&metric).copied().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn ramp(values: &[f64], step_secs: i64) -> Vec<TimedValue> {
        let base = Utc::now();
        values
            .iter()
            .enumerate()
            .map(|(i, value)| TimedValue {
                timestamp: base + Duration::seconds(i as i64 * step_secs),
                value: *value,
            })
            .collect()
    }

    #[test]
    fn slope_recovers_linear_trend() {
        // 0.1 °C per 6 s = 1.0 °C/min.
        let points = ramp(&[200.0, 200.1, 200.2, 200.3, 200.4], 6);
        let slope = slope_per_minute(&points).unwrap();
        assert!((slope - 1.0).abs() < 1e-9);
    }

    #[test]
    fn slope_needs_three_points() {
        let points = ramp(&[200.0, 199.0], 6);
        assert!(slope_per_minute(&points).is_none());
    }

    #[test]
    fn temp_score_ramps_and_saturates() {
        assert_eq!(temp_score(-1.5, -1.0), 1.0);
        assert_eq!(temp_score(-1.0, -1.0), 1.0);
        assert!((temp_score(-0.5, -1.0) - 0.5).abs() < 1e-9);
        assert_eq!(temp_score(0.8, -1.0), 0.0);
    }

    #[test]
    fn spike_score_ramps_and_saturates() {
        assert_eq!(spike_score(1.3, 1.2), 1.0);
        assert_eq!(spike_score(1.2, 1.2), 1.0);
        assert!((spike_score(1.10, 1.15) - 0.10 / 0.15).abs() < 1e-9);
        assert!((spike_score(1.05, 1.10) - 0.5).abs() < 1e-9);
        assert_eq!(spike_score(0.9, 1.2), 0.0);
    }

    #[test]
    fn weights_renormalize_over_configured_metrics() {
        let config = DetectionConfig::default();
        let configured: HashSet<MetricType> = [
            MetricType::Temperature,
            MetricType::Voc,
            MetricType::Co2,
        ]
        .into_iter()
        .collect();
        let weights = Weights::for_metrics(&config, &configured);

        // Humidity's 0.10 is spread proportionally over the other three.
        assert!((weights.get(MetricType::Temperature) - 0.25 / 0.9).abs() < 1e-9);
        assert!((weights.get(MetricType::Voc) - 0.45 / 0.9).abs() < 1e-9);
        assert_eq!(weights.get(MetricType::Humidity), 0.0);

        let sum = weights.get(MetricType::Temperature)
            + weights.get(MetricType::Voc)
            + weights.get(MetricType::Co2);
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn co2_absent_redistributes_to_three_signals() {
        let config = DetectionConfig::default();
        let configured: HashSet<MetricType> = [
            MetricType::Temperature,
            MetricType::Voc,
            MetricType::Humidity,
        ]
        .into_iter()
        .collect();
        let weights = Weights::for_metrics(&config, &configured);
        assert!((weights.get(MetricType::Temperature) - 0.3125).abs() < 1e-9);
        assert!((weights.get(MetricType::Voc) - 0.5625).abs() < 1e-9);
        assert!((weights.get(MetricType::Humidity) - 0.125).abs() < 1e-9);
        assert_eq!(weights.get(MetricType::Co2), 0.0);
    }

    #[test]
    fn combined_scenario_clears_the_confidence_bar() {
        // Slope -1.5 °C/min saturates, VOC ratio 1.3 saturates, CO2 ratio
        // 1.10 and humidity ratio 1.05 land on their ramps.
        let config = DetectionConfig::default();
        let configured: HashSet<MetricType> = MetricType::ALL.into_iter().collect();
        let weights = Weights::for_metrics(&config, &configured);

        let confidence = weights.get(MetricType::Temperature)
            * temp_score(-1.5, config.temp_ror_threshold)
            + weights.get(MetricType::Voc) * spike_score(1.3, config.voc_spike_threshold)
            + weights.get(MetricType::Co2) * spike_score(1.10, config.co2_spike_threshold)
            + weights.get(MetricType::Humidity)
                * spike_score(1.05, config.humidity_spike_threshold);

        assert!((confidence - (0.25 + 0.45 + 0.20 * (0.10 / 0.15) + 0.10 * 0.5)).abs() < 1e-9);
        assert!(confidence >= config.confidence_threshold);
    }

    #[test]
    fn full_sensor_set_keeps_configured_weights() {
        let config = DetectionConfig::default();
        let configured: HashSet<MetricType> = MetricType::ALL.into_iter().collect();
        let weights = Weights::for_metrics(&config, &configured);
        assert!((weights.get(MetricType::Voc) - 0.45).abs() < 1e-9);
        assert!((weights.get(MetricType::Humidity) - 0.10).abs() < 1e-9);
    }
}
