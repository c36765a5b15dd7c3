//! Sensor acquisition and first-crack detection core for a coffee roaster
//! data logger.
//!
//! The crate is the engine an embedding web layer calls into: it polls the
//! configured sensors continuously, logs readings into SQLite while a
//! roast session is active, and estimates the first-crack moment from the
//! combined temperature rate-of-rise and gas spike signals, both live
//! during the roast and definitively once it ends.
//!
//! Typical wiring:
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use roastlog::{AppConfig, DataCollector, Database, EventSink, SensorManager};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Arc::new(AppConfig::load(Path::new("config.json"))?);
//! let db = Database::new(config.database.path.clone())?;
//! let sensors = Arc::new(SensorManager::from_config(&config.sensors, &config.sampling));
//! sensors.start();
//!
//! let collector = DataCollector::new(db, sensors, EventSink::new(), config);
//! collector.recover_interrupted().await?;
//! let session = collector.start_session(None).await?;
//! // ... roast ...
//! collector.stop_session(&session.id).await?;
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod collector;
pub mod config;
pub mod db;
pub mod events;
pub mod predictor;
pub mod sensors;
pub mod utils;

pub use collector::{DataCollector, SessionError};
pub use config::AppConfig;
pub use db::Database;
pub use events::{CoreEvent, EventSink};
pub use predictor::{FirstCrackPredictor, SeriesView};
pub use sensors::{SensorDriver, SensorManager};
pub use utils::logging::init_logging;
