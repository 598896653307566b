use super::{in_range, MetricRepository, SeriesKey, StorageStats};
use crate::collectors::MetricRecord;
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

type Series = Arc<Mutex<Vec<MetricRecord>>>;

/// Unbounded in-process store. The outer map is only locked long enough to
/// find or create a series handle; each series keeps its records in
/// insertion order behind its own lock, so a reader copying one series never
/// holds up appends to another.
#[derive(Default)]
pub struct InMemoryMetricStore {
    series: RwLock<HashMap<SeriesKey, Series>>,
}

impl InMemoryMetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn series_for(&self, key: SeriesKey) -> Series {
        if let Some(series) = self.series.read().get(&key) {
            return Arc::clone(series);
        }
        Arc::clone(self.series.write().entry(key).or_default())
    }

    fn get(&self, key: &SeriesKey) -> Option<Series> {
        self.series.read().get(key).cloned()
    }

    fn handles(&self) -> Vec<Series> {
        self.series.read().values().cloned().collect()
    }

    fn collect_where(&self, keep: impl Fn(&MetricRecord) -> bool) -> Vec<MetricRecord> {
        let mut out = Vec::new();
        for series in self.handles() {
            out.extend(series.lock().iter().filter(|m| keep(*m)).cloned());
        }
        out
    }
}

impl MetricRepository for InMemoryMetricStore {
    fn save(&self, record: MetricRecord) -> Result<(), StoreError> {
        self.series_for(SeriesKey::of(&record)).lock().push(record);
        Ok(())
    }

    fn save_all(&self, records: Vec<MetricRecord>) -> Result<usize, StoreError> {
        let count = records.len();
        for record in records {
            self.series_for(SeriesKey::of(&record)).lock().push(record);
        }
        Ok(count)
    }

    fn find_all(&self) -> Result<Vec<MetricRecord>, StoreError> {
        let mut all = self.collect_where(|_| true);
        all.sort_by_key(|m| m.timestamp());
        Ok(all)
    }

    fn find_by_resource_and_range(
        &self,
        resource_id: &str,
        metric_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MetricRecord>, StoreError> {
        let key = SeriesKey::new(resource_id, metric_name);
        Ok(self
            .get(&key)
            .map(|series| {
                series
                    .lock()
                    .iter()
                    .filter(|m| in_range(m.timestamp(), start, end))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn find_by_type_and_range(
        &self,
        resource_type: &str,
        metric_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MetricRecord>, StoreError> {
        Ok(self.collect_where(|m| {
            m.resource().resource_type == resource_type
                && m.metric_name() == metric_name
                && in_range(m.timestamp(), start, end)
        }))
    }

    fn find_latest(&self, resource_id: &str, metric_name: &str) -> Result<Option<MetricRecord>, StoreError> {
        let Some(series) = self.get(&SeriesKey::new(resource_id, metric_name)) else {
            return Ok(None);
        };
        let records = series.lock();
        let latest = records
            .iter()
            .fold(None, |best: Option<&MetricRecord>, m| match best {
                Some(b) if b.timestamp() > m.timestamp() => Some(b),
                _ => Some(m),
            });
        Ok(latest.cloned())
    }

    fn series_keys(&self) -> Result<Vec<SeriesKey>, StoreError> {
        let mut keys: Vec<SeriesKey> = self.series.read().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn stats(&self) -> Result<StorageStats, StoreError> {
        let mut stats = StorageStats::default();
        for series in self.handles() {
            let records = series.lock();
            if records.is_empty() {
                continue;
            }
            stats.total_series += 1;
            for record in records.iter() {
                stats.total_metrics += 1;
                let ts = record.timestamp();
                stats.oldest = Some(stats.oldest.map_or(ts, |o| o.min(ts)));
                stats.newest = Some(stats.newest.map_or(ts, |n| n.max(ts)));
            }
        }
        Ok(stats)
    }
}
