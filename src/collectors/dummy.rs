use super::{Collector, MetricRecord, ResourceDescriptor};
use crate::error::CollectError;
use chrono::Utc;
use rand::Rng;

/// Generates plausible random readings for a fixed set of AWS and Nagios
/// resources. Makes no external calls.
pub struct DummyCollector;

struct Series {
    metric: &'static str,
    unit: &'static str,
    min: f64,
    max: f64,
}

impl DummyCollector {
    pub fn new() -> Self {
        Self
    }

    fn resources() -> Vec<(ResourceDescriptor, Vec<Series>)> {
        vec![
            (
                ResourceDescriptor::aws("i-1234567890abcdef0", "Production Web Server", "EC2", "us-east-1", "123456789012"),
                vec![
                    Series { metric: "CPUUtilization", unit: "Percent", min: 10.0, max: 90.0 },
                    Series { metric: "StatusCheckFailed", unit: "Count", min: 0.0, max: 0.0 },
                ],
            ),
            (
                ResourceDescriptor::aws("db-1234567890abcdef0", "Production Database", "RDS", "us-east-1", "123456789012"),
                vec![
                    Series { metric: "CPUUtilization", unit: "Percent", min: 5.0, max: 80.0 },
                    Series { metric: "ReadLatency", unit: "Milliseconds", min: 1.0, max: 100.0 },
                    Series { metric: "ReadThroughput", unit: "Count/Second", min: 100.0, max: 10000.0 },
                ],
            ),
            (
                ResourceDescriptor::aws("my-production-bucket", "Production Data Bucket", "S3", "us-east-1", "123456789012"),
                vec![
                    Series { metric: "BucketSizeBytes", unit: "Gigabytes", min: 1.0, max: 1000.0 },
                    Series { metric: "NumberOfObjects", unit: "Count", min: 100.0, max: 100000.0 },
                ],
            ),
            (
                ResourceDescriptor::nagios(
                    "app-server-01",
                    "Application Server",
                    "Server",
                    "AppServers",
                    "WebServices",
                    Some("10.0.0.100".to_string()),
                ),
                vec![
                    Series { metric: "CPULoad", unit: "Load", min: 0.1, max: 4.0 },
                    Series { metric: "MemoryUsage", unit: "Percent", min: 20.0, max: 80.0 },
                    Series { metric: "DiskUsage", unit: "Percent", min: 30.0, max: 80.0 },
                ],
            ),
        ]
    }
}

impl Default for DummyCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Collector for DummyCollector {
    async fn collect(&self) -> Result<Vec<MetricRecord>, CollectError> {
        let mut rng = rand::thread_rng();
        let now = Utc::now();
        let mut metrics = Vec::new();

        for (resource, series) in Self::resources() {
            for s in series {
                let value = if s.metric == "StatusCheckFailed" {
                    // ~5% of checks fail
                    if rng.gen_bool(0.05) { 1.0 } else { 0.0 }
                } else {
                    rng.gen_range(s.min..=s.max)
                };
                metrics.push(MetricRecord::new(resource.clone(), s.metric, value, s.unit, now));
            }
        }

        Ok(metrics)
    }

    fn name(&self) -> &str {
        "DummyCollector"
    }
}
