use crate::collectors::MetricRecord;
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryMetricStore;
pub use sqlite::SqliteMetricStore;

/// Index key of a series: one metric on one resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey {
    pub resource_id: String,
    pub metric_name: String,
}

impl SeriesKey {
    pub fn new(resource_id: impl Into<String>, metric_name: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            metric_name: metric_name.into(),
        }
    }

    pub fn of(record: &MetricRecord) -> Self {
        Self::new(record.resource_id(), record.metric_name())
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_id, self.metric_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub total_metrics: u64,
    pub total_series: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// Append-only metric store.
///
/// Implementations must accept concurrent `save` calls from several
/// collection cycles without losing or duplicating records. Time ranges are
/// inclusive at both ends. When several records of a series share the
/// newest timestamp, `find_latest` returns the one stored last.
pub trait MetricRepository: Send + Sync {
    fn save(&self, record: MetricRecord) -> Result<(), StoreError>;

    /// Saves each record in turn. Records saved before a failure stay saved.
    fn save_all(&self, records: Vec<MetricRecord>) -> Result<usize, StoreError> {
        let mut saved = 0;
        for record in records {
            self.save(record)?;
            saved += 1;
        }
        Ok(saved)
    }

    /// Every record, ascending by timestamp.
    fn find_all(&self) -> Result<Vec<MetricRecord>, StoreError>;

    fn find_by_resource_and_range(
        &self,
        resource_id: &str,
        metric_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MetricRecord>, StoreError>;

    fn find_by_type_and_range(
        &self,
        resource_type: &str,
        metric_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MetricRecord>, StoreError>;

    fn find_latest(&self, resource_id: &str, metric_name: &str) -> Result<Option<MetricRecord>, StoreError>;

    fn series_keys(&self) -> Result<Vec<SeriesKey>, StoreError>;

    fn stats(&self) -> Result<StorageStats, StoreError>;
}

pub(crate) fn in_range(ts: DateTime<Utc>, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    start <= ts && ts <= end
}
