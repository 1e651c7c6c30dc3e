//! SQLite adapter: Implementation of `MeasurementStore`.
//!
//! Keeps per-subject measurement history for trend windows, together with
//! the assessment each measurement received, and aggregates it per subject.
//!
//! # Mutex Behavior
//!
//! The connection is protected by `Mutex`. A poisoned mutex is reported as a
//! storage error; callers treat storage failures as an empty history.
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection};

use crate::domain::{
    ActivityLevel, Assessment, Measurement, SleepQuality, SubjectStatistics, VitalStatistics,
};
use crate::ports::MeasurementStore;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// SQLite storage adapter.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file.
    ///
    /// # Errors
    /// Returns error if database cannot be opened or initialized.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory SQLite database.
    ///
    /// # Errors
    /// Returns error if database cannot be created.
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Serialization("connection mutex poisoned".into()))
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.lock()?;

        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS measurements (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                heart_rate REAL NOT NULL,
                blood_oxygen REAL NOT NULL,
                temperature REAL NOT NULL,
                respiration_rate REAL NOT NULL,
                activity_level TEXT NOT NULL,
                steps INTEGER NOT NULL,
                sleep_quality TEXT NOT NULL,
                health_score INTEGER,
                is_anomaly INTEGER,
                anomaly_score REAL,
                risk_level TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_measurements_subject_time
                ON measurements(subject_id, timestamp DESC);
            ",
        )?;

        Ok(())
    }

    fn insert(
        &self,
        subject_id: &str,
        measurement: &Measurement,
        assessment: Option<&Assessment>,
    ) -> Result<(), StorageError> {
        let conn = self.lock()?;

        conn.execute(
            r"
            INSERT INTO measurements (
                subject_id, timestamp, heart_rate, blood_oxygen, temperature,
                respiration_rate, activity_level, steps, sleep_quality,
                health_score, is_anomaly, anomaly_score, risk_level
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ",
            params![
                subject_id,
                measurement.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
                measurement.heart_rate,
                measurement.blood_oxygen,
                measurement.temperature,
                measurement.respiration_rate,
                measurement.activity_level.as_str(),
                i64::from(measurement.steps),
                measurement.sleep_quality.as_str(),
                assessment.map(|a| i64::from(a.health_score.value())),
                assessment.map(|a| a.anomaly.is_anomaly),
                assessment.map(|a| a.anomaly.score),
                assessment.map(|a| a.risk.level.as_str()),
            ],
        )?;

        tracing::debug!(assessed = assessment.is_some(), "Appended measurement to history");
        Ok(())
    }
}

/// Rows per value of `column` for one subject; NULLs are skipped.
fn distribution(
    conn: &Connection,
    column: &str,
    subject_id: &str,
) -> Result<BTreeMap<String, usize>, StorageError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {column}, COUNT(*) FROM measurements
         WHERE subject_id = ?1 AND {column} IS NOT NULL
         GROUP BY {column}"
    ))?;
    let rows = stmt
        .query_map(params![subject_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .map(|(value, n)| (value, usize::try_from(n).unwrap_or(0)))
        .collect())
}

/// Reads mean, min, max and squared deviations starting at column `base`.
fn vital_at(
    row: &rusqlite::Row<'_>,
    base: usize,
    count: usize,
) -> rusqlite::Result<VitalStatistics> {
    let stats = VitalStatistics::from_moments(
        count,
        row.get(base)?,
        row.get(base + 3)?,
        row.get(base + 1)?,
        row.get(base + 2)?,
    );
    // Callers check for an empty history first.
    stats.ok_or(rusqlite::Error::QueryReturnedNoRows)
}

impl MeasurementStore for SqliteStore {
    type Error = StorageError;

    fn get_window(&self, subject_id: &str, max_count: usize) -> Result<Vec<Measurement>, Self::Error> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            r"
            SELECT timestamp, heart_rate, blood_oxygen, temperature, respiration_rate,
                   activity_level, steps, sleep_quality
            FROM measurements
            WHERE subject_id = ?1
            ORDER BY timestamp DESC, id DESC
            LIMIT ?2
            ",
        )?;

        let rows = stmt
            .query_map(params![subject_id, max_count as i64], |row| {
                let timestamp: String = row.get(0)?;
                let activity: String = row.get(5)?;
                let steps: i64 = row.get(6)?;
                let sleep: String = row.get(7)?;
                Ok((
                    timestamp,
                    row.get::<_, f64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                    activity,
                    steps,
                    sleep,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut window = rows
            .into_iter()
            .map(|(ts, hr, spo2, temp, rr, activity, steps, sleep)| {
                let timestamp = chrono::DateTime::parse_from_rfc3339(&ts)
                    .map(|dt| dt.with_timezone(&chrono::Utc))
                    .map_err(|e| StorageError::Serialization(format!("timestamp {ts}: {e}")))?;
                Ok(Measurement {
                    timestamp,
                    heart_rate: hr,
                    blood_oxygen: spo2,
                    temperature: temp,
                    respiration_rate: rr,
                    activity_level: ActivityLevel::parse(&activity).unwrap_or_default(),
                    steps: u32::try_from(steps).unwrap_or(0),
                    sleep_quality: SleepQuality::parse(&sleep).unwrap_or_default(),
                })
            })
            .collect::<Result<Vec<_>, StorageError>>()?;

        // Query is newest-first; windows are most-recent-last.
        window.reverse();
        Ok(window)
    }

    fn append(&self, subject_id: &str, measurement: &Measurement) -> Result<(), Self::Error> {
        self.insert(subject_id, measurement, None)
    }

    fn append_assessed(
        &self,
        subject_id: &str,
        measurement: &Measurement,
        assessment: &Assessment,
    ) -> Result<(), Self::Error> {
        self.insert(subject_id, measurement, Some(assessment))
    }

    fn count(&self, subject_id: &str) -> Result<usize, Self::Error> {
        let conn = self.lock()?;

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM measurements WHERE subject_id = ?1",
            params![subject_id],
            |row| row.get(0),
        )?;

        Ok(count as usize)
    }

    fn statistics(&self, subject_id: &str) -> Result<SubjectStatistics, Self::Error> {
        let conn = self.lock()?;

        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM measurements WHERE subject_id = ?1",
            params![subject_id],
            |row| row.get(0),
        )?;
        let total_records = usize::try_from(total).unwrap_or(0);
        if total_records == 0 {
            return Err(StorageError::NotFound("no history for subject".into()));
        }

        // Per vital: mean, min, max, sum of squared deviations.
        let (
            heart_rate,
            blood_oxygen,
            temperature,
            respiration_rate,
            steps,
            assessed,
            avg_score,
            anomalies,
        ) = conn.query_row(
            r"
            WITH history AS (
                SELECT * FROM measurements WHERE subject_id = ?1
            ),
            means AS (
                SELECT AVG(heart_rate) AS hr, AVG(blood_oxygen) AS spo2,
                       AVG(temperature) AS temp, AVG(respiration_rate) AS rr
                FROM history
            )
            SELECT
                m.hr, MIN(h.heart_rate), MAX(h.heart_rate),
                SUM((h.heart_rate - m.hr) * (h.heart_rate - m.hr)),
                m.spo2, MIN(h.blood_oxygen), MAX(h.blood_oxygen),
                SUM((h.blood_oxygen - m.spo2) * (h.blood_oxygen - m.spo2)),
                m.temp, MIN(h.temperature), MAX(h.temperature),
                SUM((h.temperature - m.temp) * (h.temperature - m.temp)),
                m.rr, MIN(h.respiration_rate), MAX(h.respiration_rate),
                SUM((h.respiration_rate - m.rr) * (h.respiration_rate - m.rr)),
                COALESCE(SUM(h.steps), 0),
                COUNT(h.health_score),
                AVG(h.health_score),
                COALESCE(SUM(h.is_anomaly), 0)
            FROM history h CROSS JOIN means m
            ",
            params![subject_id],
            |row| {
                Ok((
                    vital_at(row, 0, total_records)?,
                    vital_at(row, 4, total_records)?,
                    vital_at(row, 8, total_records)?,
                    vital_at(row, 12, total_records)?,
                    row.get::<_, i64>(16)?,
                    row.get::<_, i64>(17)?,
                    row.get::<_, Option<f64>>(18)?,
                    row.get::<_, i64>(19)?,
                ))
            },
        )?;

        let total_steps = u64::try_from(steps).unwrap_or(0);

        Ok(SubjectStatistics {
            total_records,
            heart_rate,
            blood_oxygen,
            temperature,
            respiration_rate,
            activity_distribution: distribution(&conn, "activity_level", subject_id)?,
            total_steps,
            avg_steps_per_record: total_steps as f64 / total_records as f64,
            assessed_records: usize::try_from(assessed).unwrap_or(0),
            anomaly_count: usize::try_from(anomalies).unwrap_or(0),
            avg_health_score: avg_score,
            risk_distribution: distribution(&conn, "risk_level", subject_id)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AnomalyResult, HealthScore, RiskResult};
    use chrono::{Duration, Utc};
    use tempfile::tempdir;

    fn reading(hr: f64, minutes_ago: i64) -> Measurement {
        Measurement::new(hr, 97.0, 36.6, 15.0).at(Utc::now() - Duration::minutes(minutes_ago))
    }

    #[test]
    fn test_append_and_count() {
        let store = SqliteStore::in_memory().expect("Should create store");
        assert_eq!(store.count("alice").expect("Should count"), 0);

        store.append("alice", &reading(70.0, 2)).expect("Should append");
        store.append("alice", &reading(72.0, 1)).expect("Should append");
        store.append("bob", &reading(90.0, 1)).expect("Should append");

        assert_eq!(store.count("alice").expect("Should count"), 2);
        assert_eq!(store.count("bob").expect("Should count"), 1);
    }

    #[test]
    fn test_window_is_most_recent_last_and_bounded() {
        let store = SqliteStore::in_memory().expect("Should create store");
        for i in 0..10_i32 {
            store
                .append("alice", &reading(60.0 + f64::from(i), 10 - i64::from(i)))
                .expect("Should append");
        }

        let window = store.get_window("alice", 3).expect("Should read window");
        let rates: Vec<f64> = window.iter().map(|m| m.heart_rate).collect();
        assert_eq!(rates, vec![67.0, 68.0, 69.0]);
    }

    #[test]
    fn test_window_roundtrips_categoricals() {
        let store = SqliteStore::in_memory().expect("Should create store");
        let m = reading(70.0, 1)
            .with_activity(ActivityLevel::High)
            .with_steps(1200)
            .with_sleep(SleepQuality::Poor);
        store.append("alice", &m).expect("Should append");

        let window = store.get_window("alice", 5).expect("Should read window");
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].activity_level, ActivityLevel::High);
        assert_eq!(window[0].steps, 1200);
        assert_eq!(window[0].sleep_quality, SleepQuality::Poor);
    }

    #[test]
    fn test_unknown_subject_has_empty_window() {
        let store = SqliteStore::in_memory().expect("Should create store");
        assert!(store.get_window("nobody", 20).expect("Should read").is_empty());
        assert!(matches!(
            store.statistics("nobody"),
            Err(StorageError::NotFound(_))
        ));
    }

    fn assessed(score: u8, is_anomaly: bool, risk: [f64; 3]) -> Assessment {
        Assessment {
            health_score: HealthScore::new(score),
            anomaly: AnomalyResult {
                is_anomaly,
                score: if is_anomaly { 6.0 } else { 1.5 },
            },
            risk: RiskResult::from_scores(risk).expect("Should build risk"),
        }
    }

    #[test]
    fn test_statistics_aggregate_history() {
        let store = SqliteStore::in_memory().expect("Should create store");
        store
            .append_assessed(
                "alice",
                &reading(70.0, 3).with_steps(1000),
                &assessed(90, false, [0.8, 0.1, 0.1]),
            )
            .expect("Should append");
        store
            .append_assessed(
                "alice",
                &reading(72.0, 2).with_steps(2000).with_activity(ActivityLevel::High),
                &assessed(60, true, [0.1, 0.2, 0.7]),
            )
            .expect("Should append");
        store
            .append("alice", &reading(74.0, 1).with_steps(3000))
            .expect("Should append");
        store.append("bob", &reading(150.0, 1)).expect("Should append");

        let stats = store.statistics("alice").expect("Should aggregate");

        assert_eq!(stats.total_records, 3);
        assert!((stats.heart_rate.mean - 72.0).abs() < 1e-9);
        assert_eq!(stats.heart_rate.min, 70.0);
        assert_eq!(stats.heart_rate.max, 74.0);
        assert!((stats.heart_rate.std - 2.0).abs() < 1e-9);
        assert_eq!(stats.blood_oxygen.std, 0.0);

        assert_eq!(stats.total_steps, 6000);
        assert!((stats.avg_steps_per_record - 2000.0).abs() < 1e-9);
        assert_eq!(stats.activity_distribution.get("moderate"), Some(&2));
        assert_eq!(stats.activity_distribution.get("high"), Some(&1));

        assert_eq!(stats.assessed_records, 2);
        assert_eq!(stats.anomaly_count, 1);
        assert_eq!(stats.avg_health_score, Some(75.0));
        assert_eq!(stats.risk_distribution.get("low"), Some(&1));
        assert_eq!(stats.risk_distribution.get("high"), Some(&1));
        assert_eq!(stats.risk_distribution.len(), 2);
    }

    #[test]
    fn test_statistics_without_assessments() {
        let store = SqliteStore::in_memory().expect("Should create store");
        store.append("alice", &reading(68.0, 1)).expect("Should append");

        let stats = store.statistics("alice").expect("Should aggregate");
        assert_eq!(stats.total_records, 1);
        assert_eq!(stats.heart_rate.std, 0.0);
        assert_eq!(stats.assessed_records, 0);
        assert_eq!(stats.anomaly_count, 0);
        assert_eq!(stats.avg_health_score, None);
        assert!(stats.risk_distribution.is_empty());
    }

    #[test]
    fn test_file_backed_store_persists() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("history.db");
        {
            let store = SqliteStore::new(&path).expect("Should open");
            store.append("alice", &reading(70.0, 1)).expect("Should append");
        }
        let store = SqliteStore::new(&path).expect("Should reopen");
        assert_eq!(store.count("alice").expect("Should count"), 1);
    }
}
