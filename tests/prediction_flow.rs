//! First-crack prediction persistence and the definitive session analysis.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use tempfile::TempDir;

use roastlog::collector::DataCollector;
use roastlog::config::{
    AppConfig, DatabaseConfig, DetectionConfig, SamplingConfig, SensorConfig,
};
use roastlog::db::models::{
    FirstCrackPrediction, MetricType, SensorReading, Session, SessionStatus, SignalScores,
};
use roastlog::db::Database;
use roastlog::events::{CoreEvent, EventSink};
use roastlog::predictor::analyze_session;
use roastlog::sensors::SensorManager;

fn open_db(dir: &Path) -> Database {
    Database::new(dir.join("roasts.sqlite3")).unwrap()
}

fn session_row(id: &str, status: SessionStatus) -> Session {
    let now = Utc::now();
    Session {
        id: id.into(),
        name: "test roast".into(),
        started_at: now - ChronoDuration::minutes(12),
        stopped_at: (status != SessionStatus::Active).then_some(now),
        status,
        created_at: now - ChronoDuration::minutes(12),
        updated_at: now,
    }
}

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap()
}

/// Temperature flat at 200 °C then dropping 2 °C/min from 300 s, VOC
/// stepping from 100 to 140 at 300 s, sampled every 5 s out to 420 s.
fn crack_readings(session_id: &str) -> Vec<SensorReading> {
    let mut readings = Vec::new();
    for secs in (0..=420).step_by(5) {
        let timestamp = base() + ChronoDuration::seconds(secs);
        let temp = if secs <= 300 {
            200.0
        } else {
            200.0 - (secs - 300) as f64 / 30.0
        };
        readings.push(SensorReading::new(
            session_id,
            "exhaust",
            MetricType::Temperature,
            temp,
            timestamp,
        ));
        let voc = if secs < 300 { 100.0 } else { 140.0 };
        readings.push(SensorReading::new(
            session_id,
            "gas",
            MetricType::Voc,
            voc,
            timestamp,
        ));
    }
    readings
}

fn temp_voc() -> HashSet<MetricType> {
    [MetricType::Temperature, MetricType::Voc]
        .into_iter()
        .collect()
}

fn scores(value: f64) -> SignalScores {
    SignalScores {
        temperature_ror: Some(value),
        voc_spike: Some(value),
        co2_spike: None,
        humidity_spike: None,
    }
}

#[tokio::test]
async fn analyze_session_persists_and_announces_the_prediction() {
    let dir = TempDir::new().unwrap();
    let db = open_db(dir.path());
    let events = EventSink::new();
    let mut rx = events.subscribe();

    let session = session_row("roast-1", SessionStatus::Completed);
    db.insert_session(&session).await.unwrap();
    for reading in crack_readings(&session.id) {
        db.insert_reading(&reading).await.unwrap();
    }

    let prediction = analyze_session(
        &db,
        &events,
        &DetectionConfig::default(),
        &temp_voc(),
        &session.id,
    )
    .await
    .unwrap()
    .unwrap();

    assert!(prediction.confidence > 0.9);
    assert_eq!(prediction.source, "predicted");
    assert!(prediction.timestamp > base() + ChronoDuration::seconds(300));

    let stored = db
        .get_first_crack_prediction(&session.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.timestamp, prediction.timestamp);
    assert_eq!(stored.confidence, prediction.confidence);
    assert_eq!(stored.signal_scores, prediction.signal_scores);

    assert!(matches!(
        rx.try_recv(),
        Ok(CoreEvent::FirstCrackPredictionUpdated { .. })
    ));
}

#[tokio::test]
async fn analyze_session_without_a_crack_stores_nothing() {
    let dir = TempDir::new().unwrap();
    let db = open_db(dir.path());
    let events = EventSink::new();

    let session = session_row("flat-roast", SessionStatus::Completed);
    db.insert_session(&session).await.unwrap();
    // Steady climb, no stall and no gas spike.
    for secs in (0..=300).step_by(5) {
        let reading = SensorReading::new(
            &session.id,
            "exhaust",
            MetricType::Temperature,
            150.0 + secs as f64 / 10.0,
            base() + ChronoDuration::seconds(secs),
        );
        db.insert_reading(&reading).await.unwrap();
    }

    let result = analyze_session(
        &db,
        &events,
        &DetectionConfig::default(),
        &temp_voc(),
        &session.id,
    )
    .await
    .unwrap();
    assert!(result.is_none());
    assert!(db
        .get_first_crack_prediction(&session.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn stored_prediction_confidence_never_decreases() {
    let dir = TempDir::new().unwrap();
    let db = open_db(dir.path());
    let session = session_row("roast-2", SessionStatus::Active);
    db.insert_session(&session).await.unwrap();

    let at = |secs: i64| base() + ChronoDuration::seconds(secs);
    let put = |timestamp, confidence| {
        FirstCrackPrediction::new(&session.id, timestamp, confidence, scores(confidence))
    };

    assert!(db.put_first_crack_prediction(&put(at(100), 0.6)).await.unwrap());
    // Lower confidence is rejected, the stored row is untouched.
    assert!(!db.put_first_crack_prediction(&put(at(150), 0.4)).await.unwrap());
    let stored = db
        .get_first_crack_prediction(&session.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.confidence, 0.6);
    assert_eq!(stored.timestamp, at(100));

    // Equal confidence may refine the timestamp; higher always wins.
    assert!(db.put_first_crack_prediction(&put(at(90), 0.6)).await.unwrap());
    assert!(db.put_first_crack_prediction(&put(at(120), 0.8)).await.unwrap());
    let stored = db
        .get_first_crack_prediction(&session.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.confidence, 0.8);
    assert_eq!(stored.timestamp, at(120));
}

#[tokio::test]
async fn stopping_a_session_runs_the_definitive_analysis() {
    let dir = TempDir::new().unwrap();
    let config = Arc::new(AppConfig {
        database: DatabaseConfig {
            path: dir.path().join("roasts.sqlite3"),
        },
        sampling: SamplingConfig::default(),
        sensors: vec![
            SensorConfig {
                name: "exhaust".into(),
                kind: roastlog::config::SensorKind::Dht22,
                pin: Some(4),
                i2c_address: None,
                metrics: Some(vec![MetricType::Temperature]),
            },
            SensorConfig {
                name: "gas".into(),
                kind: roastlog::config::SensorKind::Sgp30,
                pin: None,
                i2c_address: Some(0x58),
                metrics: Some(vec![MetricType::Voc]),
            },
        ],
        detection: DetectionConfig::default(),
    });
    let db = Database::new(config.database.path.clone()).unwrap();
    let events = EventSink::new();
    // No initialized drivers: ticks log nothing, the test injects the
    // readings itself.
    let sensors = Arc::new(SensorManager::from_drivers(
        vec![],
        Duration::from_secs(1),
        Duration::from_secs(5),
    ));
    let collector = DataCollector::new(db.clone(), sensors, events.clone(), config);

    let session = collector.start_session(None).await.unwrap();
    for reading in crack_readings(&session.id) {
        db.insert_reading(&reading).await.unwrap();
    }
    collector.stop_session(&session.id).await.unwrap();

    let prediction = db
        .get_first_crack_prediction(&session.id)
        .await
        .unwrap()
        .unwrap();
    assert!(prediction.confidence > 0.9);
    assert_eq!(prediction.source, "predicted");
}

#[tokio::test]
async fn prediction_rows_delete_with_their_session() {
    let dir = TempDir::new().unwrap();
    let db = open_db(dir.path());
    let session = session_row("roast-3", SessionStatus::Completed);
    db.insert_session(&session).await.unwrap();

    let prediction = FirstCrackPrediction::new(&session.id, base(), 0.7, scores(0.7));
    assert!(db.put_first_crack_prediction(&prediction).await.unwrap());

    db.delete_session(&session.id).await.unwrap();
    assert!(db
        .get_first_crack_prediction(&session.id)
        .await
        .unwrap()
        .is_none());
}
