//! Best-effort notification sink for the web/live-update layer.
//!
//! The core publishes lifecycle and data events on a broadcast channel;
//! whoever relays them to clients subscribes here. Nobody listening is a
//! normal state, so send failures are ignored.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::db::models::{FirstCrackEvent, FirstCrackPrediction, SensorReading, Session};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoreEvent {
    SessionStarted { session: Session },
    SessionStopped { session: Session },
    SensorReadingLogged { reading: SensorReading },
    FirstCrackMarked { event: FirstCrackEvent },
    FirstCrackPredictionUpdated { prediction: FirstCrackPrediction },
}

#[derive(Clone)]
pub struct EventSink {
    tx: broadcast::Sender<CoreEvent>,
}

impl EventSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.tx.subscribe()
    }

    /// Fire-and-forget. Delivery is not the core's responsibility.
    pub fn emit(&self, event: CoreEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}
