use crate::collectors::Collector;
use crate::storage::MetricRepository;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;

/// Outcome of one pass over every registered collector.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionRound {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub metrics_count: usize,
    pub failed_collectors: Vec<String>,
}

impl CollectionRound {
    pub fn is_complete(&self) -> bool {
        self.failed_collectors.is_empty()
    }
}

/// Runs the registered collectors and persists what they return. The
/// scheduled task and manual triggers share `run_cycle`, so overlapping
/// cycles rely only on the repository being safe for concurrent saves.
pub struct CollectionService {
    collectors: Vec<Arc<dyn Collector>>,
    repository: Arc<dyn MetricRepository>,
}

impl CollectionService {
    pub fn new(collectors: Vec<Arc<dyn Collector>>, repository: Arc<dyn MetricRepository>) -> Self {
        Self {
            collectors,
            repository,
        }
    }

    pub fn collector_names(&self) -> Vec<String> {
        self.collectors.iter().map(|c| c.name().to_string()).collect()
    }

    /// Invokes every collector in order. A collector that fails, or whose
    /// records cannot be stored, is logged and listed in the round; the
    /// remaining collectors still run.
    pub async fn run_cycle(&self) -> CollectionRound {
        let round_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(round = %round_id, collectors = self.collectors.len(), "Starting metrics collection");

        let mut metrics_count = 0;
        let mut failed_collectors = Vec::new();

        for collector in &self.collectors {
            let records = match collector.collect().await {
                Ok(records) => records,
                Err(e) => {
                    tracing::error!(collector = collector.name(), error = %e, "Collector failed");
                    failed_collectors.push(collector.name().to_string());
                    continue;
                }
            };

            let collected = records.len();
            match self.repository.save_all(records) {
                Ok(saved) => {
                    tracing::debug!(collector = collector.name(), saved, "Stored metrics");
                    metrics_count += saved;
                }
                Err(e) => {
                    tracing::error!(collector = collector.name(), collected, error = %e, "Failed to store metrics");
                    failed_collectors.push(collector.name().to_string());
                }
            }
        }

        let round = CollectionRound {
            id: round_id,
            timestamp: Utc::now(),
            metrics_count,
            failed_collectors,
        };
        tracing::info!(
            round = %round.id,
            metrics = round.metrics_count,
            failed = round.failed_collectors.len(),
            "Completed metrics collection"
        );
        round
    }

    /// Spawns the periodic trigger. The first cycle runs immediately.
    pub fn spawn_scheduler(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.run_cycle().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::{MetricRecord, ResourceDescriptor};
    use crate::error::CollectError;
    use crate::storage::InMemoryMetricStore;
    use async_trait::async_trait;

    struct FixedCollector {
        name: &'static str,
        count: usize,
    }

    #[async_trait]
    impl Collector for FixedCollector {
        async fn collect(&self) -> Result<Vec<MetricRecord>, CollectError> {
            let resource = ResourceDescriptor::nagios(self.name, self.name, "Server", "shop", "Monitoring", None);
            Ok((0..self.count)
                .map(|i| MetricRecord::new(resource.clone(), "CPU Usage", i as f64, "%", Utc::now()))
                .collect())
        }

        fn name(&self) -> &str {
            self.name
        }
    }

    struct FailingCollector;

    #[async_trait]
    impl Collector for FailingCollector {
        async fn collect(&self) -> Result<Vec<MetricRecord>, CollectError> {
            Err(CollectError::NoServices { host: "h1".to_string() })
        }

        fn name(&self) -> &str {
            "Failing"
        }
    }

    fn service(collectors: Vec<Arc<dyn Collector>>) -> (Arc<CollectionService>, Arc<InMemoryMetricStore>) {
        let store = Arc::new(InMemoryMetricStore::new());
        let service = Arc::new(CollectionService::new(collectors, store.clone()));
        (service, store)
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_other_collectors() {
        let collectors: Vec<Arc<dyn Collector>> = vec![
            Arc::new(FixedCollector { name: "a", count: 2 }),
            Arc::new(FailingCollector),
            Arc::new(FixedCollector { name: "b", count: 3 }),
        ];
        let (service, store) = service(collectors);

        let round = service.run_cycle().await;
        assert_eq!(round.metrics_count, 5);
        assert_eq!(round.failed_collectors, vec!["Failing".to_string()]);
        assert!(!round.is_complete());
        assert_eq!(store.find_all().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_overlapping_cycles_keep_every_record() {
        let (service, store) = service(vec![Arc::new(FixedCollector { name: "a", count: 20 }) as Arc<dyn Collector>]);

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let service = Arc::clone(&service);
                tokio::spawn(async move { service.run_cycle().await })
            })
            .collect();
        for h in handles {
            assert!(h.await.unwrap().is_complete());
        }

        assert_eq!(store.find_all().unwrap().len(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_runs_on_interval() {
        let (service, store) = service(vec![Arc::new(FixedCollector { name: "a", count: 1 }) as Arc<dyn Collector>]);

        let handle = service.spawn_scheduler(Duration::from_secs(5));
        time::sleep(Duration::from_millis(10_100)).await;
        handle.abort();

        // ticks at 0s, 5s and 10s
        assert_eq!(store.find_all().unwrap().len(), 3);
    }
}
