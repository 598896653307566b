//! Application health derived from the latest sample of every metric an
//! application reports.

use crate::collectors::{tags, MetricRecord};
use crate::error::StoreError;
use crate::storage::MetricRepository;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Metric name whose thresholds default lower than every other metric.
pub const DISK_USAGE_ROOT: &str = "Disk Usage on /";

/// Ordered `Green < Amber < Critical`; `worse` is `max`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Green,
    Amber,
    Critical,
}

impl HealthStatus {
    pub fn worse(self, other: HealthStatus) -> HealthStatus {
        self.max(other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Green => "green",
            HealthStatus::Amber => "amber",
            HealthStatus::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub warning: f64,
    pub critical: f64,
}

impl Thresholds {
    pub fn defaults_for(metric_name: &str) -> Self {
        if metric_name == DISK_USAGE_ROOT {
            Self { warning: 70.0, critical: 90.0 }
        } else {
            Self { warning: 80.0, critical: 95.0 }
        }
    }

    /// Thresholds carried in the record's tags; a missing or non-numeric tag
    /// falls back to the metric's default.
    pub fn for_record(record: &MetricRecord) -> Self {
        let defaults = Self::defaults_for(record.metric_name());
        Self {
            warning: tag_number(record, tags::WARNING_THRESHOLD).unwrap_or(defaults.warning),
            critical: tag_number(record, tags::CRITICAL_THRESHOLD).unwrap_or(defaults.critical),
        }
    }

    pub fn evaluate(&self, value: f64) -> HealthStatus {
        if value >= self.critical {
            HealthStatus::Critical
        } else if value >= self.warning {
            HealthStatus::Amber
        } else {
            HealthStatus::Green
        }
    }
}

fn tag_number(record: &MetricRecord, key: &str) -> Option<f64> {
    let raw = record.tag(key)?;
    match raw.trim().parse::<f64>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::debug!(metric = record.metric_name(), key, raw, "Ignoring non-numeric threshold tag");
            None
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationHealth {
    pub application: String,
    pub overall_status: HealthStatus,
    pub metrics: BTreeMap<String, HealthStatus>,
    pub timestamp: DateTime<Utc>,
}

/// Read-side queries over a metric store: application views, latest values
/// and health.
#[derive(Clone)]
pub struct HealthEvaluator {
    repository: Arc<dyn MetricRepository>,
}

impl HealthEvaluator {
    pub fn new(repository: Arc<dyn MetricRepository>) -> Self {
        Self { repository }
    }

    /// Every record tagged with `app_name`, ascending by timestamp.
    pub fn metrics_for_application(&self, app_name: &str) -> Result<Vec<MetricRecord>, StoreError> {
        Ok(self
            .repository
            .find_all()?
            .into_iter()
            .filter(|m| m.tag(tags::APPLICATION) == Some(app_name))
            .collect())
    }

    /// Latest record per `host:metricName` among the application's records.
    /// On equal timestamps the later-stored record wins.
    pub fn latest_for_application(&self, app_name: &str) -> Result<HashMap<String, MetricRecord>, StoreError> {
        let mut latest: HashMap<String, MetricRecord> = HashMap::new();

        for record in self.metrics_for_application(app_name)? {
            let host = record.tag(tags::HOST).unwrap_or(record.resource_id());
            let key = format!("{}:{}", host, record.metric_name());
            let newer = latest
                .get(&key)
                .map_or(true, |current| current.timestamp() <= record.timestamp());
            if newer {
                latest.insert(key, record);
            }
        }

        Ok(latest)
    }

    /// Latest record of every series in the store, keyed `resourceId:metricName`.
    pub fn latest_for_all_resources(&self) -> Result<HashMap<String, MetricRecord>, StoreError> {
        let mut latest = HashMap::new();
        for key in self.repository.series_keys()? {
            if let Some(record) = self
                .repository
                .find_latest(&key.resource_id, &key.metric_name)?
            {
                latest.insert(key.to_string(), record);
            }
        }
        Ok(latest)
    }

    /// Evaluates each latest metric of the application against its
    /// thresholds. When several hosts report the same metric name, the
    /// per-metric entry holds the worst of them.
    pub fn application_health(&self, app_name: &str) -> Result<ApplicationHealth, StoreError> {
        let mut metrics: BTreeMap<String, HealthStatus> = BTreeMap::new();
        let mut overall = HealthStatus::Green;

        for record in self.latest_for_application(app_name)?.values() {
            let status = Thresholds::for_record(record).evaluate(record.value());
            metrics
                .entry(record.metric_name().to_string())
                .and_modify(|s| *s = s.worse(status))
                .or_insert(status);
            overall = overall.worse(status);
        }

        tracing::debug!(application = app_name, status = overall.as_str(), "Evaluated application health");

        Ok(ApplicationHealth {
            application: app_name.to_string(),
            overall_status: overall,
            metrics,
            timestamp: Utc::now(),
        })
    }
}
