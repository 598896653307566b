//! Wiring shared by the binaries: turns a [`Config`] into a store and the
//! registered collectors.

use crate::collectors::{Collector, DummyCollector, NagiosApi, NagiosCollector};
use crate::config::{Config, StorageBackend, StorageConfig};
use crate::storage::{InMemoryMetricStore, MetricRepository, SqliteMetricStore};
use anyhow::Context;
use std::sync::Arc;

pub fn open_repository(storage: &StorageConfig) -> anyhow::Result<Arc<dyn MetricRepository>> {
    match storage.backend {
        StorageBackend::Memory => {
            tracing::info!("Using in-memory metric store");
            Ok(Arc::new(InMemoryMetricStore::new()))
        }
        StorageBackend::Sqlite => {
            let store = SqliteMetricStore::new(storage.path.clone()).context("failed to open SQLite store")?;
            tracing::info!(path = store.db_path(), "Using SQLite metric store");
            Ok(Arc::new(store))
        }
    }
}

/// Nagios is registered only when both the API URL and a host mapping are
/// configured; the synthetic collector follows `collection.dummy_enabled`.
pub fn build_collectors(config: &Config) -> anyhow::Result<Vec<Arc<dyn Collector>>> {
    let mut collectors: Vec<Arc<dyn Collector>> = Vec::new();

    if config.nagios.is_enabled() {
        let api = NagiosApi::new(
            &config.nagios.api_url,
            &config.nagios.api_key,
            config.nagios.request_timeout(),
        )
        .context("failed to build Nagios HTTP client")?;
        let collector = NagiosCollector::new(Box::new(api), config.nagios.host_to_app_mapping.clone())
            .context("failed to compile perfdata patterns")?;
        tracing::info!(hosts = config.nagios.host_to_app_mapping.len(), "Registered Nagios collector");
        collectors.push(Arc::new(collector));
    } else {
        tracing::info!("Nagios collector disabled: api_url or host_to_app_mapping not configured");
    }

    if config.collection.dummy_enabled {
        collectors.push(Arc::new(DummyCollector::new()));
    }

    Ok(collectors)
}
