//! Session lifecycle and the per-session sampling loop.
//!
//! The collector owns the single active-session slot. Starting a session
//! inserts the row and spawns a tick task that logs every cached sensor
//! value once per sampling interval, feeds the rolling buffer, and runs
//! live first-crack evaluation. Stopping cancels the task, finalizes the
//! row, and runs the definitive full-session analysis.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::buffer::TimeSeriesBuffer;
use crate::config::AppConfig;
use crate::db::models::{
    FirstCrackEvent, FirstCrackPrediction, MetricType, SensorReading, Session, SessionStatus,
};
use crate::db::Database;
use crate::events::{CoreEvent, EventSink};
use crate::predictor::{analyze_session, FirstCrackPredictor, SeriesView};
use crate::sensors::SensorManager;
use crate::{log_error, log_info, log_warn};

const ENABLE_LOGS: bool = true;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a session is already active")]
    AlreadyActive,
    #[error("no active session to {0}")]
    NoActiveSession(&'static str),
}

struct ActiveEntry {
    session: Session,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Cheap to clone; all state is shared behind the slot mutex.
#[derive(Clone)]
pub struct DataCollector {
    db: Database,
    sensors: Arc<SensorManager>,
    events: EventSink,
    config: Arc<AppConfig>,
    configured: HashSet<MetricType>,
    active: Arc<Mutex<Option<ActiveEntry>>>,
    tick_failures: Arc<AtomicU64>,
}

impl DataCollector {
    pub fn new(
        db: Database,
        sensors: Arc<SensorManager>,
        events: EventSink,
        config: Arc<AppConfig>,
    ) -> Self {
        let configured = config.configured_metrics();
        Self {
            db,
            sensors,
            events,
            config,
            configured,
            active: Arc::new(Mutex::new(None)),
            tick_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of sampling ticks that failed to persist since startup. The
    /// web layer exposes this as a health signal.
    pub fn tick_failures(&self) -> u64 {
        self.tick_failures.load(Ordering::Relaxed)
    }

    /// Close out sessions left `active` by a previous run. Call once at
    /// startup, before any start request is accepted.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let recovered = self.db.recover_interrupted_sessions(Utc::now()).await?;
        if recovered > 0 {
            log_warn!("recovered {} interrupted session(s) from previous run", recovered);
        }
        Ok(recovered)
    }

    pub async fn active_session(&self) -> Option<Session> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|entry| entry.session.clone())
    }

    /// Start a new session. The slot lock is held through the row insert
    /// so two concurrent starts cannot both succeed.
    pub async fn start_session(&self, name: Option<String>) -> Result<Session> {
        let mut slot = self.active.lock().await;
        if slot.is_some() {
            return Err(SessionError::AlreadyActive.into());
        }

        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            name: name.unwrap_or_else(|| format!("Roast {}", now.format("%Y-%m-%d %H:%M"))),
            started_at: now,
            stopped_at: None,
            status: SessionStatus::Active,
            created_at: now,
            updated_at: now,
        };
        self.db.insert_session(&session).await?;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(tick_loop(self.clone(), session.clone(), cancel.clone()));
        *slot = Some(ActiveEntry {
            session: session.clone(),
            cancel,
            handle,
        });
        drop(slot);

        log_info!("session {} ({}) started", session.id, session.name);
        self.events.emit(CoreEvent::SessionStarted {
            session: session.clone(),
        });
        Ok(session)
    }

    /// Stop the active session on request. Waits for the tick task to
    /// finish so no reading lands after the stop timestamp, then runs the
    /// definitive analysis.
    pub async fn stop_session(&self, session_id: &str) -> Result<Session> {
        // Take the entry and release the lock before joining: the tick
        // task's auto-stop path takes this same lock.
        let entry = {
            let mut slot = self.active.lock().await;
            let is_active = slot
                .as_ref()
                .is_some_and(|entry| entry.session.id == session_id);
            if is_active {
                slot.take()
            } else {
                None
            }
        };
        let Some(entry) = entry else {
            return Err(SessionError::NoActiveSession("stop").into());
        };

        entry.cancel.cancel();
        if let Err(join_err) = entry.handle.await {
            log_error!("session tick task panicked: {join_err}");
        }

        let stopped_at = Utc::now();
        let finalized = self
            .db
            .finalize_session(&entry.session.id, SessionStatus::Completed, stopped_at)
            .await?;

        let mut session = entry.session;
        if finalized {
            session.status = SessionStatus::Completed;
            session.stopped_at = Some(stopped_at);
            session.updated_at = stopped_at;
            log_info!("session {} completed", session.id);
            self.events.emit(CoreEvent::SessionStopped {
                session: session.clone(),
            });
            self.finish_session(&session.id).await;
        } else if let Some(stored) = self.db.get_session(&session.id).await? {
            // The max-duration guard won the race; report what it wrote.
            session = stored;
        }
        Ok(session)
    }

    /// Record the operator's first-crack mark for a session, overwriting
    /// any previous mark. Works on finished sessions too; a mark is an
    /// annotation, not part of the sampling loop.
    pub async fn mark_first_crack(
        &self,
        session_id: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<FirstCrackEvent> {
        if self.db.get_session(session_id).await?.is_none() {
            anyhow::bail!("unknown session {session_id}");
        }

        let event = FirstCrackEvent::manual(session_id, timestamp.unwrap_or_else(Utc::now));
        self.db.put_first_crack_event(&event).await?;
        log_info!(
            "session {} first crack marked at {}",
            event.session_id,
            event.timestamp
        );
        self.events.emit(CoreEvent::FirstCrackMarked {
            event: event.clone(),
        });
        Ok(event)
    }

    /// Definitive full-session analysis after a session ends. Failures are
    /// logged, not propagated: the session is already finalized and the
    /// stored live prediction remains valid.
    async fn finish_session(&self, session_id: &str) {
        if let Err(err) = analyze_session(
            &self.db,
            &self.events,
            &self.config.detection,
            &self.configured,
            session_id,
        )
        .await
        {
            log_error!("session {} analysis failed: {:#}", session_id, err);
        }
    }

    /// One sampling tick: persist every cached value, feed the buffer, run
    /// live evaluation.
    async fn collect_tick(
        &self,
        session: &Session,
        buffer: &mut TimeSeriesBuffer,
        predictor: &mut FirstCrackPredictor,
    ) -> Result<()> {
        let mut latest = None;
        for (sensor_name, metric, cached) in self.sensors.snapshot() {
            let reading = SensorReading::new(
                &session.id,
                sensor_name,
                metric,
                cached.value,
                cached.timestamp,
            );
            self.db.insert_reading(&reading).await?;
            buffer.append(metric, cached.timestamp, cached.value);
            latest = latest.max(Some(cached.timestamp));
            self.events.emit(CoreEvent::SensorReadingLogged { reading });
        }
        let Some(latest) = latest else {
            // Nothing cached yet; the first poll has not completed.
            return Ok(());
        };
        buffer.trim(latest);

        if let Some(candidate) = predictor.evaluate_live(&SeriesView::from_buffer(buffer)) {
            let prediction = FirstCrackPrediction::new(
                &session.id,
                candidate.timestamp,
                candidate.confidence,
                candidate.scores,
            );
            if self.db.put_first_crack_prediction(&prediction).await? {
                log_info!(
                    "session {} live prediction at {} (confidence {:.2})",
                    session.id,
                    prediction.timestamp,
                    prediction.confidence
                );
                self.events
                    .emit(CoreEvent::FirstCrackPredictionUpdated { prediction });
            }
        }
        Ok(())
    }

    /// Max-duration guard. Finalizes as `Stopped`, releases the slot, and
    /// runs the definitive analysis. Runs inside the tick task, so it must
    /// never join the tick task's own handle.
    async fn auto_stop(&self, session: &Session) {
        {
            let mut slot = self.active.lock().await;
            if slot
                .as_ref()
                .is_some_and(|entry| entry.session.id == session.id)
            {
                slot.take();
            }
        }

        let stopped_at = Utc::now();
        let finalized = match self
            .db
            .finalize_session(&session.id, SessionStatus::Stopped, stopped_at)
            .await
        {
            Ok(finalized) => finalized,
            Err(err) => {
                log_error!("failed to finalize session {}: {:#}", session.id, err);
                return;
            }
        };
        if !finalized {
            return;
        }

        let mut session = session.clone();
        session.status = SessionStatus::Stopped;
        session.stopped_at = Some(stopped_at);
        session.updated_at = stopped_at;
        log_warn!(
            "session {} hit the {}s duration limit, stopping",
            session.id,
            self.config.sampling.max_session_secs
        );
        self.events.emit(CoreEvent::SessionStopped {
            session: session.clone(),
        });
        self.finish_session(&session.id).await;
    }
}

async fn tick_loop(collector: DataCollector, session: Session, cancel: CancellationToken) {
    let sampling = &collector.config.sampling;
    let mut ticker =
        tokio::time::interval(std::time::Duration::from_secs(sampling.sample_interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut buffer =
        TimeSeriesBuffer::new(ChronoDuration::seconds(sampling.buffer_retention_secs as i64));
    let mut predictor = FirstCrackPredictor::new(
        collector.config.detection.clone(),
        collector.configured.clone(),
    );
    let deadline = session.started_at + ChronoDuration::seconds(sampling.max_session_secs as i64);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if Utc::now() >= deadline {
                    collector.auto_stop(&session).await;
                    break;
                }
                if let Err(err) = collector.collect_tick(&session, &mut buffer, &mut predictor).await {
                    collector.tick_failures.fetch_add(1, Ordering::Relaxed);
                    log_error!("session {} tick failed: {:#}", session.id, err);
                }
            }
        }
    }
    log_info!("session {} tick loop stopped", session.id);
}
