//! Hardware polling and the last-good-value cache.
//!
//! One background task reads every sensor on a fixed cadence and keeps the
//! latest successful value per metric. Readers never touch hardware; they
//! get whatever the cache holds, marked stale when the most recent poll of
//! that sensor failed. The loop runs regardless of session state so gas
//! sensors stay warmed up between roasts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::{SamplingConfig, SensorConfig};
use crate::db::models::MetricType;
use crate::sensors::drivers::{SensorDriver, SensorRead};
use crate::{log_error, log_info, log_warn};

const ENABLE_LOGS: bool = true;

/// A cached reading. `timestamp` is when the value was acquired from
/// hardware, not when it was read out of the cache.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CachedValue {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub stale: bool,
}

struct PolledSensor {
    name: String,
    metrics: Vec<MetricType>,
    driver: Arc<StdMutex<SensorDriver>>,
}

type Cache = Arc<RwLock<HashMap<String, HashMap<MetricType, CachedValue>>>>;

#[derive(Clone)]
struct Poller {
    sensors: Arc<Vec<PolledSensor>>,
    cache: Cache,
    read_timeout: Duration,
}

pub struct SensorManager {
    poller: Poller,
    poll_interval: Duration,
    runner: StdMutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl SensorManager {
    /// Build drivers for every configured sensor. A sensor that fails to
    /// initialize is logged and excluded; the rest of the system runs
    /// without its metrics.
    pub fn from_config(sensors: &[SensorConfig], sampling: &SamplingConfig) -> Self {
        let drivers = sensors
            .iter()
            .map(|config| {
                (
                    config.name.clone(),
                    config.active_metrics(),
                    SensorDriver::from_config(config),
                )
            })
            .collect();
        Self::from_drivers(
            drivers,
            Duration::from_secs(sampling.poll_interval_secs),
            Duration::from_secs(sampling.read_timeout_secs),
        )
    }

    pub fn from_drivers(
        drivers: Vec<(String, Vec<MetricType>, SensorDriver)>,
        poll_interval: Duration,
        read_timeout: Duration,
    ) -> Self {
        let mut sensors = Vec::new();
        for (name, metrics, mut driver) in drivers {
            match driver.initialize() {
                Ok(()) => {
                    log_info!("sensor {} initialized ({} metrics)", name, metrics.len());
                    sensors.push(PolledSensor {
                        name,
                        metrics,
                        driver: Arc::new(StdMutex::new(driver)),
                    });
                }
                Err(err) => {
                    log_error!("sensor {} failed to initialize, excluding: {:#}", name, err);
                }
            }
        }
        Self {
            poller: Poller {
                sensors: Arc::new(sensors),
                cache: Arc::new(RwLock::new(HashMap::new())),
                read_timeout,
            },
            poll_interval,
            runner: StdMutex::new(None),
        }
    }

    /// Names of the sensors that survived initialization, in config order.
    pub fn sensor_names(&self) -> Vec<String> {
        self.poller
            .sensors
            .iter()
            .map(|sensor| sensor.name.clone())
            .collect()
    }

    pub fn start(&self) {
        let mut runner = match self.runner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if runner.is_some() {
            return;
        }
        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let poller = self.poller.clone();
        let poll_interval = self.poll_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => poller.poll_all().await,
                }
            }
            log_info!("sensor polling loop stopped");
        });
        *runner = Some((cancel_token, handle));
    }

    pub async fn stop(&self) {
        let taken = {
            let mut runner = match self.runner.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            runner.take()
        };
        if let Some((cancel_token, handle)) = taken {
            cancel_token.cancel();
            let _ = handle.await;
        }
    }

    /// One full polling pass. The background loop calls this on its
    /// cadence; tests drive it directly.
    pub async fn poll_once(&self) {
        self.poller.poll_all().await;
    }

    pub fn read_cached(&self, sensor: &str, metric: MetricType) -> Option<CachedValue> {
        let cache = match self.poller.cache.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        cache.get(sensor).and_then(|slot| slot.get(&metric)).copied()
    }

    /// Every cached value, ordered by configured sensor then by the
    /// sensor's metric order. Sensors that have never produced a value
    /// contribute nothing.
    pub fn snapshot(&self) -> Vec<(String, MetricType, CachedValue)> {
        let cache = match self.poller.cache.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut out = Vec::new();
        for sensor in self.poller.sensors.iter() {
            let Some(slot) = cache.get(&sensor.name) else {
                continue;
            };
            for metric in &sensor.metrics {
                if let Some(cached) = slot.get(metric) {
                    out.push((sensor.name.clone(), *metric, *cached));
                }
            }
        }
        out
    }
}

impl Poller {
    async fn poll_all(&self) {
        for sensor in self.sensors.iter() {
            self.poll_sensor(sensor).await;
        }
    }

    async fn poll_sensor(&self, sensor: &PolledSensor) {
        let driver = Arc::clone(&sensor.driver);
        let read = tokio::task::spawn_blocking(move || -> Result<HashMap<MetricType, f64>> {
            // A read that outlived its timeout still holds the lock; skip
            // this round instead of queueing behind it.
            let mut guard = driver
                .try_lock()
                .map_err(|_| anyhow!("previous read still in progress"))?;
            guard.read()
        });

        let outcome = match tokio::time::timeout(self.read_timeout, read).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(anyhow!("read task panicked: {join_err}")),
            Err(_) => Err(anyhow!(
                "read timed out after {:?}",
                self.read_timeout
            )),
        };

        match outcome {
            Ok(values) => {
                let acquired_at = Utc::now();
                let mut cache = match self.cache.write() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                let slot = cache.entry(sensor.name.clone()).or_default();
                for metric in &sensor.metrics {
                    if let Some(value) = values.get(metric) {
                        slot.insert(
                            *metric,
                            CachedValue {
                                value: *value,
                                timestamp: acquired_at,
                                stale: false,
                            },
                        );
                    }
                }
            }
            Err(err) => {
                log_warn!(
                    "sensor {} read failed, keeping last good values: {:#}",
                    sensor.name,
                    err
                );
                let mut cache = match self.cache.write() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if let Some(slot) = cache.get_mut(&sensor.name) {
                    for cached in slot.values_mut() {
                        cached.stale = true;
                    }
                }
            }
        }
    }
}
