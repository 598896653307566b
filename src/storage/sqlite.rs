use super::{MetricRepository, SeriesKey, StorageStats};
use crate::collectors::{MetricRecord, ResourceDescriptor};
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Params, Row};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const SELECT_COLUMNS: &str =
    "SELECT id, resource, metric_name, value, timestamp, unit, tags FROM metrics";

/// SQLite-backed store with the same contract as the in-memory one.
/// Timestamps are stored as UTC nanoseconds; ties on the newest timestamp
/// resolve by insertion sequence.
pub struct SqliteMetricStore {
    db_path: String,
    conn: Mutex<Connection>,
}

/// Columns of one row, before the JSON columns are decoded.
struct StoredRow {
    id: String,
    resource: String,
    metric_name: String,
    value: f64,
    timestamp: i64,
    unit: String,
    tags: String,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            resource: row.get(1)?,
            metric_name: row.get(2)?,
            value: row.get(3)?,
            timestamp: row.get(4)?,
            unit: row.get(5)?,
            tags: row.get(6)?,
        })
    }

    fn into_record(self) -> Result<MetricRecord, StoreError> {
        let resource: ResourceDescriptor = serde_json::from_str(&self.resource)?;
        let tags: HashMap<String, String> = serde_json::from_str(&self.tags)?;
        Ok(MetricRecord::restore(
            self.id,
            resource,
            self.metric_name,
            self.value,
            DateTime::from_timestamp_nanos(self.timestamp),
            self.unit,
            tags,
        ))
    }
}

impl SqliteMetricStore {
    /// Opens (creating if needed) the database at `db_path`, defaulting to
    /// `~/.healthwatch/metrics.db`.
    pub fn new(db_path: Option<String>) -> Result<Self, StoreError> {
        let path = db_path.unwrap_or_else(Self::default_path);
        Self::ensure_db_directory(&path)?;
        let conn = Connection::open(&path)?;
        let store = Self {
            db_path: path,
            conn: Mutex::new(conn),
        };
        store.create_tables()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            db_path: ":memory:".to_string(),
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.create_tables()?;
        Ok(store)
    }

    pub fn default_path() -> String {
        let home_dir = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{}/.healthwatch/metrics.db", home_dir)
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    fn ensure_db_directory(path: &str) -> Result<(), StoreError> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    fn create_tables(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS metrics (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                resource_id TEXT NOT NULL,
                resource_type TEXT NOT NULL,
                metric_name TEXT NOT NULL,
                value REAL NOT NULL,
                timestamp INTEGER NOT NULL,
                unit TEXT NOT NULL,
                resource TEXT NOT NULL,
                tags TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_metrics_series
             ON metrics(resource_id, metric_name, timestamp)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_metrics_type
             ON metrics(resource_type, metric_name, timestamp)",
            [],
        )?;

        Ok(())
    }

    fn query_records<P: Params>(&self, sql: &str, params: P) -> Result<Vec<MetricRecord>, StoreError> {
        let rows: Vec<StoredRow> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(sql)?;
            let mapped = stmt.query_map(params, StoredRow::from_row)?;
            let rows = mapped.collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        rows.into_iter().map(StoredRow::into_record).collect()
    }

    fn insert(conn: &Connection, record: &MetricRecord) -> Result<(), StoreError> {
        let timestamp = to_nanos(record.timestamp())?;
        conn.execute(
            "INSERT INTO metrics (id, resource_id, resource_type, metric_name, value, timestamp, unit, resource, tags)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.id(),
                record.resource_id(),
                record.resource().resource_type,
                record.metric_name(),
                record.value(),
                timestamp,
                record.unit(),
                serde_json::to_string(record.resource())?,
                serde_json::to_string(record.tags())?,
            ],
        )?;
        Ok(())
    }
}

fn to_nanos(ts: DateTime<Utc>) -> Result<i64, StoreError> {
    ts.timestamp_nanos_opt()
        .ok_or_else(|| StoreError::Timestamp(ts.timestamp()))
}

/// Query bounds saturate instead of failing: nothing stored lies outside
/// the i64 nanosecond range anyway.
fn bound_nanos(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_nanos_opt()
        .unwrap_or(if ts.timestamp() < 0 { i64::MIN } else { i64::MAX })
}

impl MetricRepository for SqliteMetricStore {
    fn save(&self, record: MetricRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        Self::insert(&conn, &record)
    }

    /// Inserts each record in its own statement, so a failure keeps the
    /// records inserted before it.
    fn save_all(&self, records: Vec<MetricRecord>) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let mut saved = 0;
        for record in &records {
            Self::insert(&conn, record)?;
            saved += 1;
        }
        Ok(saved)
    }

    fn find_all(&self) -> Result<Vec<MetricRecord>, StoreError> {
        self.query_records(&format!("{SELECT_COLUMNS} ORDER BY timestamp ASC, seq ASC"), [])
    }

    fn find_by_resource_and_range(
        &self,
        resource_id: &str,
        metric_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MetricRecord>, StoreError> {
        self.query_records(
            &format!(
                "{SELECT_COLUMNS} WHERE resource_id = ?1 AND metric_name = ?2
                 AND timestamp >= ?3 AND timestamp <= ?4 ORDER BY seq ASC"
            ),
            params![resource_id, metric_name, bound_nanos(start), bound_nanos(end)],
        )
    }

    fn find_by_type_and_range(
        &self,
        resource_type: &str,
        metric_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MetricRecord>, StoreError> {
        self.query_records(
            &format!(
                "{SELECT_COLUMNS} WHERE resource_type = ?1 AND metric_name = ?2
                 AND timestamp >= ?3 AND timestamp <= ?4 ORDER BY seq ASC"
            ),
            params![resource_type, metric_name, bound_nanos(start), bound_nanos(end)],
        )
    }

    fn find_latest(&self, resource_id: &str, metric_name: &str) -> Result<Option<MetricRecord>, StoreError> {
        let row = {
            let conn = self.conn.lock();
            conn.query_row(
                &format!(
                    "{SELECT_COLUMNS} WHERE resource_id = ?1 AND metric_name = ?2
                     ORDER BY timestamp DESC, seq DESC LIMIT 1"
                ),
                params![resource_id, metric_name],
                StoredRow::from_row,
            )
            .optional()?
        };
        row.map(StoredRow::into_record).transpose()
    }

    fn series_keys(&self) -> Result<Vec<SeriesKey>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT resource_id, metric_name FROM metrics
             ORDER BY resource_id, metric_name",
        )?;
        let keys = stmt
            .query_map([], |row| Ok(SeriesKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(keys)
    }

    fn stats(&self) -> Result<StorageStats, StoreError> {
        let conn = self.conn.lock();

        let (total_metrics, oldest, newest): (i64, Option<i64>, Option<i64>) = conn.query_row(
            "SELECT COUNT(*), MIN(timestamp), MAX(timestamp) FROM metrics",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let total_series: i64 = conn.query_row(
            "SELECT COUNT(*) FROM (SELECT DISTINCT resource_id, metric_name FROM metrics)",
            [],
            |row| row.get(0),
        )?;

        Ok(StorageStats {
            total_metrics: total_metrics as u64,
            total_series: total_series as u64,
            oldest: oldest.map(DateTime::from_timestamp_nanos),
            newest: newest.map(DateTime::from_timestamp_nanos),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::tags;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn record(id: &str, metric: &str, value: f64, at: DateTime<Utc>) -> MetricRecord {
        let resource = ResourceDescriptor::nagios(id, id, "Server", "shop", "Monitoring", Some("10.0.0.1".into()));
        MetricRecord::new(resource, metric, value, "%", at).with_tag(tags::APPLICATION, "shop")
    }

    #[test]
    fn test_storage_initialization() {
        let store = SqliteMetricStore::open_in_memory().unwrap();
        let count: i64 = store
            .conn
            .lock()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='metrics'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_insert_and_read_back() {
        let store = SqliteMetricStore::open_in_memory().unwrap();
        let original = record("h1", "CPU Usage", 9.4, base());
        store.save(original.clone()).unwrap();

        let all = store.find_all().unwrap();
        assert_eq!(all, vec![original]);
    }

    #[test]
    fn test_ranges_are_inclusive() {
        let store = SqliteMetricStore::open_in_memory().unwrap();
        let start = base();
        let end = base() + Duration::hours(1);
        store
            .save_all(vec![
                record("h1", "CPU Usage", 0.0, start - Duration::nanoseconds(1)),
                record("h1", "CPU Usage", 1.0, start),
                record("h1", "CPU Usage", 2.0, end),
                record("h1", "CPU Usage", 3.0, end + Duration::nanoseconds(1)),
            ])
            .unwrap();

        let by_resource = store.find_by_resource_and_range("h1", "CPU Usage", start, end).unwrap();
        assert_eq!(by_resource.iter().map(|m| m.value()).collect::<Vec<_>>(), vec![1.0, 2.0]);

        let by_type = store.find_by_type_and_range("Server", "CPU Usage", start, end).unwrap();
        assert_eq!(by_type.len(), 2);
        assert!(store.find_by_type_and_range("EC2", "CPU Usage", start, end).unwrap().is_empty());
    }

    #[test]
    fn test_range_bounds_beyond_nanosecond_limits() {
        let store = SqliteMetricStore::open_in_memory().unwrap();
        store.save(record("h1", "CPU Usage", 1.0, base())).unwrap();

        let start = Utc.with_ymd_and_hms(1600, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2300, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(store.find_by_resource_and_range("h1", "CPU Usage", start, end).unwrap().len(), 1);
        assert_eq!(store.find_by_type_and_range("Server", "CPU Usage", start, end).unwrap().len(), 1);

        let too_early = record("h1", "CPU Usage", 2.0, start);
        assert!(matches!(store.save(too_early), Err(StoreError::Timestamp(_))));
    }

    #[test]
    fn test_latest_and_tie_break() {
        let store = SqliteMetricStore::open_in_memory().unwrap();
        store.save(record("h1", "CPU Usage", 1.0, base() + Duration::minutes(5))).unwrap();
        store.save(record("h1", "CPU Usage", 2.0, base())).unwrap();
        store.save(record("h1", "CPU Usage", 3.0, base() + Duration::minutes(5))).unwrap();

        assert_eq!(store.find_latest("h1", "CPU Usage").unwrap().unwrap().value(), 3.0);
        assert!(store.find_latest("h1", "Memory Usage").unwrap().is_none());
    }

    #[test]
    fn test_stats_on_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("metrics.db");
        let store = SqliteMetricStore::new(Some(path.to_string_lossy().to_string())).unwrap();

        store.save(record("h1", "CPU Usage", 1.0, base())).unwrap();
        store.save(record("h1", "Memory Usage", 1.0, base() + Duration::minutes(2))).unwrap();
        store.save(record("h2", "CPU Usage", 1.0, base() + Duration::minutes(1))).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_metrics, 3);
        assert_eq!(stats.total_series, 3);
        assert_eq!(stats.oldest, Some(base()));
        assert_eq!(stats.newest, Some(base() + Duration::minutes(2)));
        assert!(path.exists());

        drop(store);
        let reopened = SqliteMetricStore::new(Some(path.to_string_lossy().to_string())).unwrap();
        assert_eq!(reopened.series_keys().unwrap().len(), 3);
    }

    #[test]
    fn test_concurrent_saves_lose_nothing() {
        let store = Arc::new(SqliteMetricStore::open_in_memory().unwrap());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        store.save(record("h1", "CPU Usage", (t * 50 + i) as f64, base())).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.find_all().unwrap().len(), 200);
    }
}
