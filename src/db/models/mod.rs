pub mod first_crack;
pub mod metric;
pub mod reading;
pub mod session;

pub use first_crack::{FirstCrackEvent, FirstCrackPrediction, SignalScores};
pub use metric::MetricType;
pub use reading::SensorReading;
pub use session::{Session, SessionStatus, SessionSummary};
