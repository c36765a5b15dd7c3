pub mod drivers;
pub mod manager;

pub use drivers::{ScriptedFrame, SensorDriver, SensorRead};
pub use manager::{CachedValue, SensorManager};
