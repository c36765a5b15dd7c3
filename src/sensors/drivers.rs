//! Sensor drivers.
//!
//! Every driver implements the same `read` contract and the concrete set
//! is a closed enum: adding hardware support means adding a variant, not
//! probing attributes at runtime. A misspelled capability is a compile
//! error here instead of a silently dead sensor.
//!
//! The hardware variants ship their bench profiles (this build carries no
//! GPIO/I2C stack): plausible randomized output with the real devices'
//! quirks kept, most importantly the SGP30's warm-up phase. The warm-up
//! is why the polling loop runs whether or not a roast is active.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use rand::Rng;

use crate::config::{SensorConfig, SensorKind};
use crate::db::models::MetricType;

const DEFAULT_DHT22_PIN: u8 = 4;
const DEFAULT_SHT31_ADDRESS: u8 = 0x44;
const DEFAULT_SGP30_ADDRESS: u8 = 0x58;
const SGP30_WARM_UP: Duration = Duration::from_secs(15);

/// The one capability the manager needs from a sensor.
pub trait SensorRead {
    fn initialize(&mut self) -> Result<()>;
    /// One hardware read. May block; the manager calls this off the async
    /// runtime. A failure here must leave the driver usable for the next
    /// poll.
    fn read(&mut self) -> Result<HashMap<MetricType, f64>>;
    fn metrics(&self) -> &[MetricType];
}

#[derive(Debug)]
pub enum SensorDriver {
    Dht22(Dht22Driver),
    Sht31(Sht31Driver),
    Sgp30(Sgp30Driver),
    Scripted(ScriptedDriver),
}

impl SensorDriver {
    pub fn from_config(config: &SensorConfig) -> Self {
        match config.kind {
            SensorKind::Dht22 => SensorDriver::Dht22(Dht22Driver::new(
                config.pin.unwrap_or(DEFAULT_DHT22_PIN),
            )),
            SensorKind::Sht31 => SensorDriver::Sht31(Sht31Driver::new(
                config.i2c_address.unwrap_or(DEFAULT_SHT31_ADDRESS),
            )),
            SensorKind::Sgp30 => SensorDriver::Sgp30(Sgp30Driver::new(
                config.i2c_address.unwrap_or(DEFAULT_SGP30_ADDRESS),
            )),
        }
    }
}

impl SensorRead for SensorDriver {
    fn initialize(&mut self) -> Result<()> {
        match self {
            SensorDriver::Dht22(driver) => driver.initialize(),
            SensorDriver::Sht31(driver) => driver.initialize(),
            SensorDriver::Sgp30(driver) => driver.initialize(),
            SensorDriver::Scripted(driver) => driver.initialize(),
        }
    }

    fn read(&mut self) -> Result<HashMap<MetricType, f64>> {
        match self {
            SensorDriver::Dht22(driver) => driver.read(),
            SensorDriver::Sht31(driver) => driver.read(),
            SensorDriver::Sgp30(driver) => driver.read(),
            SensorDriver::Scripted(driver) => driver.read(),
        }
    }

    fn metrics(&self) -> &[MetricType] {
        match self {
            SensorDriver::Dht22(driver) => driver.metrics(),
            SensorDriver::Sht31(driver) => driver.metrics(),
            SensorDriver::Sgp30(driver) => driver.metrics(),
            SensorDriver::Scripted(driver) => driver.metrics(),
        }
    }
}

/// DHT22 temperature/humidity sensor on a GPIO pin. Must not be polled
/// more often than every 2 seconds.
#[derive(Debug)]
pub struct Dht22Driver {
    #[allow(dead_code)]
    pin: u8,
    temperature: f64,
    humidity: f64,
    initialized: bool,
}

impl Dht22Driver {
    pub fn new(pin: u8) -> Self {
        Self {
            pin,
            temperature: 24.0,
            humidity: 45.0,
            initialized: false,
        }
    }
}

impl SensorRead for Dht22Driver {
    fn initialize(&mut self) -> Result<()> {
        self.initialized = true;
        Ok(())
    }

    fn read(&mut self) -> Result<HashMap<MetricType, f64>> {
        if !self.initialized {
            bail!("DHT22 not initialized");
        }
        let mut rng = rand::thread_rng();
        self.temperature = (self.temperature + rng.gen_range(-0.4..0.4)).clamp(15.0, 250.0);
        self.humidity = (self.humidity + rng.gen_range(-1.0..1.0)).clamp(5.0, 95.0);
        Ok(HashMap::from([
            (MetricType::Temperature, (self.temperature * 10.0).round() / 10.0),
            (MetricType::Humidity, (self.humidity * 10.0).round() / 10.0),
        ]))
    }

    fn metrics(&self) -> &[MetricType] {
        &[MetricType::Temperature, MetricType::Humidity]
    }
}

/// SHT31 temperature/humidity sensor on the I2C bus.
#[derive(Debug)]
pub struct Sht31Driver {
    #[allow(dead_code)]
    i2c_address: u8,
    temperature: f64,
    humidity: f64,
    initialized: bool,
}

impl Sht31Driver {
    pub fn new(i2c_address: u8) -> Self {
        Self {
            i2c_address,
            temperature: 24.0,
            humidity: 45.0,
            initialized: false,
        }
    }
}

impl SensorRead for Sht31Driver {
    fn initialize(&mut self) -> Result<()> {
        self.initialized = true;
        Ok(())
    }

    fn read(&mut self) -> Result<HashMap<MetricType, f64>> {
        if !self.initialized {
            bail!("SHT31 not initialized");
        }
        let mut rng = rand::thread_rng();
        self.temperature = (self.temperature + rng.gen_range(-0.2..0.2)).clamp(15.0, 250.0);
        self.humidity = (self.humidity + rng.gen_range(-0.5..0.5)).clamp(5.0, 95.0);
        Ok(HashMap::from([
            (MetricType::Temperature, (self.temperature * 100.0).round() / 100.0),
            (MetricType::Humidity, (self.humidity * 100.0).round() / 100.0),
        ]))
    }

    fn metrics(&self) -> &[MetricType] {
        &[MetricType::Temperature, MetricType::Humidity]
    }
}

/// SGP30 VOC/CO2-equivalent gas sensor. Reports its conditioning values
/// for the first 15 seconds after initialization; readings in that phase
/// are distinguishable on the charts (999 ppm / 99 ppb) rather than
/// plausible-looking garbage.
#[derive(Debug)]
pub struct Sgp30Driver {
    #[allow(dead_code)]
    i2c_address: u8,
    initialized_at: Option<Instant>,
}

impl Sgp30Driver {
    pub fn new(i2c_address: u8) -> Self {
        Self {
            i2c_address,
            initialized_at: None,
        }
    }

    fn is_warmed_up(&self) -> bool {
        self.initialized_at
            .is_some_and(|at| at.elapsed() >= SGP30_WARM_UP)
    }
}

impl SensorRead for Sgp30Driver {
    fn initialize(&mut self) -> Result<()> {
        self.initialized_at = Some(Instant::now());
        Ok(())
    }

    fn read(&mut self) -> Result<HashMap<MetricType, f64>> {
        if self.initialized_at.is_none() {
            bail!("SGP30 not initialized");
        }
        if !self.is_warmed_up() {
            return Ok(HashMap::from([
                (MetricType::Co2, 999.0),
                (MetricType::Voc, 99.0),
            ]));
        }
        let mut rng = rand::thread_rng();
        Ok(HashMap::from([
            (MetricType::Co2, (800.0 + rng.gen_range(0.0_f64..400.0)).round()),
            (MetricType::Voc, (100.0 + rng.gen_range(0.0_f64..100.0)).round()),
        ]))
    }

    fn metrics(&self) -> &[MetricType] {
        &[MetricType::Voc, MetricType::Co2]
    }
}

/// One step of a scripted driver's playback.
#[derive(Debug, Clone)]
pub enum ScriptedFrame {
    Values(HashMap<MetricType, f64>),
    Fail(&'static str),
}

/// Replays a fixed sequence of frames; the last frame repeats once the
/// script is exhausted. This is the driver the tests poll.
#[derive(Debug)]
pub struct ScriptedDriver {
    metrics: Vec<MetricType>,
    frames: Vec<ScriptedFrame>,
    cursor: usize,
}

impl ScriptedDriver {
    pub fn new(metrics: Vec<MetricType>, frames: Vec<ScriptedFrame>) -> Self {
        Self {
            metrics,
            frames,
            cursor: 0,
        }
    }
}

impl SensorRead for ScriptedDriver {
    fn initialize(&mut self) -> Result<()> {
        if self.frames.is_empty() {
            bail!("scripted driver has no frames");
        }
        Ok(())
    }

    fn read(&mut self) -> Result<HashMap<MetricType, f64>> {
        let index = self.cursor.min(self.frames.len() - 1);
        self.cursor += 1;
        match &self.frames[index] {
            ScriptedFrame::Values(values) => Ok(values.clone()),
            ScriptedFrame::Fail(reason) => bail!("{reason}"),
        }
    }

    fn metrics(&self) -> &[MetricType] {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sgp30_reports_conditioning_values_until_warmed_up() {
        let mut driver = Sgp30Driver::new(DEFAULT_SGP30_ADDRESS);
        assert!(driver.read().is_err());
        driver.initialize().unwrap();

        let values = driver.read().unwrap();
        assert_eq!(values[&MetricType::Co2], 999.0);
        assert_eq!(values[&MetricType::Voc], 99.0);
    }

    #[test]
    fn sgp30_emits_whole_ppm_readings_after_warm_up() {
        let mut driver = Sgp30Driver::new(DEFAULT_SGP30_ADDRESS);
        driver.initialized_at = Some(Instant::now() - (SGP30_WARM_UP + Duration::from_secs(1)));

        let values = driver.read().unwrap();
        let co2 = values[&MetricType::Co2];
        let voc = values[&MetricType::Voc];
        assert!((800.0..=1200.0).contains(&co2));
        assert!((100.0..=200.0).contains(&voc));
        assert_eq!(co2.fract(), 0.0);
        assert_eq!(voc.fract(), 0.0);
    }
}
