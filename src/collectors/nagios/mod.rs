pub mod perfdata;

use super::types::tags;
use super::{Collector, MetricRecord, ResourceDescriptor};
use crate::error::CollectError;
use async_trait::async_trait;
use perfdata::{PerfdataParser, ServiceKind, ServiceStatus};
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Fetches the full service-status list for one host.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_services(&self, host_name: &str) -> Result<Vec<ServiceStatus>, CollectError>;
}

#[derive(Debug, Deserialize)]
struct ServiceStatusResponse {
    servicestatus: Option<Vec<ServiceStatus>>,
}

/// HTTP client for a Nagios XI style `objects/servicestatus` endpoint.
///
/// Services are filtered client-side; only `apikey` and `host_name` are sent
/// so descriptions containing `/` never need encoding.
pub struct NagiosApi {
    client: Client,
    api_url: String,
    api_key: String,
}

impl NagiosApi {
    pub fn new(api_url: &str, api_key: &str, timeout: Duration) -> Result<Self, CollectError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl StatusSource for NagiosApi {
    async fn fetch_services(&self, host_name: &str) -> Result<Vec<ServiceStatus>, CollectError> {
        tracing::debug!(host = host_name, url = %self.api_url, "Calling Nagios status API");

        let response = self
            .client
            .get(&self.api_url)
            .query(&[("apikey", self.api_key.as_str()), ("host_name", host_name)])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(CollectError::Status {
                host: host_name.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        decode_services(host_name, &body)
    }
}

fn decode_services(host_name: &str, body: &str) -> Result<Vec<ServiceStatus>, CollectError> {
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Err(CollectError::EmptyBody {
            host: host_name.to_string(),
        });
    }

    let response: ServiceStatusResponse = serde_json::from_str(trimmed)?;
    let services = response
        .servicestatus
        .ok_or_else(|| CollectError::MissingServiceStatus {
            host: host_name.to_string(),
        })?;

    if services.is_empty() {
        return Err(CollectError::NoServices {
            host: host_name.to_string(),
        });
    }
    Ok(services)
}

pub struct NagiosCollector {
    source: Box<dyn StatusSource>,
    parser: PerfdataParser,
    /// host name -> application name
    host_to_app: BTreeMap<String, String>,
}

impl NagiosCollector {
    pub fn new(
        source: Box<dyn StatusSource>,
        host_to_app: BTreeMap<String, String>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            source,
            parser: PerfdataParser::new()?,
            host_to_app,
        })
    }

    fn build_record(
        &self,
        host_name: &str,
        app_name: &str,
        kind: ServiceKind,
        services: &[ServiceStatus],
    ) -> Result<MetricRecord, CollectError> {
        let status = services
            .iter()
            .find(|s| s.service_description == kind.description())
            .ok_or_else(|| CollectError::ServiceNotFound {
                host: host_name.to_string(),
                service: kind.description().to_string(),
            })?;

        let sample = self.parser.parse(kind, status)?;

        tracing::debug!(
            host = host_name,
            service = kind.description(),
            output = %status.output,
            perfdata = %status.perfdata,
            state = %status.current_state,
            value = sample.value,
            source = sample.source.as_str(),
            "Parsed Nagios service status"
        );

        let resource = ResourceDescriptor::nagios(
            host_name,
            host_name,
            "Server",
            app_name,
            "Monitoring",
            status.host_address.clone(),
        );

        Ok(
            MetricRecord::new(resource, kind.description(), sample.value, sample.unit, sample.timestamp)
                .with_tag(tags::HOST, host_name)
                .with_tag(tags::APPLICATION, app_name)
                .with_tag(tags::STATE, status.current_state.as_str())
                .with_tag(tags::WARNING_THRESHOLD, format_threshold(sample.thresholds.warning))
                .with_tag(tags::CRITICAL_THRESHOLD, format_threshold(sample.thresholds.critical))
                .with_tag(tags::VALUE_SOURCE, sample.source.as_str()),
        )
    }
}

/// Always keeps a fractional part: `80.0`, `9.4`.
fn format_threshold(value: f64) -> String {
    format!("{:?}", value)
}

#[async_trait]
impl Collector for NagiosCollector {
    async fn collect(&self) -> Result<Vec<MetricRecord>, CollectError> {
        tracing::info!(hosts = self.host_to_app.len(), "Collecting Nagios metrics");
        let mut metrics = Vec::new();

        for (host_name, app_name) in &self.host_to_app {
            let services = match self.source.fetch_services(host_name).await {
                Ok(services) => services,
                Err(e) => {
                    tracing::warn!(host = %host_name, error = %e, "Skipping host, status fetch failed");
                    continue;
                }
            };

            for kind in ServiceKind::ALL {
                match self.build_record(host_name, app_name, kind, &services) {
                    Ok(record) => metrics.push(record),
                    Err(e) => tracing::warn!(
                        host = %host_name,
                        service = kind.description(),
                        error = %e,
                        "Skipping metric"
                    ),
                }
            }
        }

        tracing::info!(count = metrics.len(), "Collected Nagios metrics");
        Ok(metrics)
    }

    fn name(&self) -> &str {
        "NagiosCollector"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct MockSource {
        responses: HashMap<String, Vec<ServiceStatus>>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl StatusSource for MockSource {
        async fn fetch_services(&self, host_name: &str) -> Result<Vec<ServiceStatus>, CollectError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .get(host_name)
                .cloned()
                .ok_or_else(|| CollectError::NoServices {
                    host: host_name.to_string(),
                })
        }
    }

    fn service(description: &str, perfdata: &str, output: &str) -> ServiceStatus {
        ServiceStatus {
            service_description: description.to_string(),
            perfdata: perfdata.to_string(),
            output: output.to_string(),
            current_state: "0".to_string(),
            status_update_time: "2024-03-01 12:30:00".to_string(),
            check_command: Some("check_disk!-w '80' -c '90'".to_string()),
            host_address: Some("10.0.0.5".to_string()),
        }
    }

    fn healthy_host() -> Vec<ServiceStatus> {
        vec![
            service("Ping", "rta=0.1ms", "PING OK"),
            service("CPU Usage", "'percent'=9.40%;80;95;", ""),
            service("Memory Usage", "'percent'=30.80%;95;98;", ""),
            service("Disk Usage on /", "", "Used disk space was 55.00 %"),
        ]
    }

    fn collector(responses: HashMap<String, Vec<ServiceStatus>>, mapping: &[(&str, &str)]) -> (NagiosCollector, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = MockSource {
            responses,
            calls: calls.clone(),
        };
        let host_to_app = mapping
            .iter()
            .map(|(h, a)| (h.to_string(), a.to_string()))
            .collect();
        (NagiosCollector::new(Box::new(source), host_to_app).unwrap(), calls)
    }

    #[tokio::test]
    async fn test_collects_three_metrics_per_host_with_one_fetch() {
        let mut responses = HashMap::new();
        responses.insert("h1".to_string(), healthy_host());
        let (collector, calls) = collector(responses, &[("h1", "shop")]);

        let metrics = collector.collect().await.unwrap();
        assert_eq!(metrics.len(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let cpu = metrics.iter().find(|m| m.metric_name() == "CPU Usage").unwrap();
        assert_eq!(cpu.value(), 9.40);
        assert_eq!(cpu.tag(tags::HOST), Some("h1"));
        assert_eq!(cpu.tag(tags::RESOURCE_ID), Some("h1"));
        assert_eq!(cpu.tag(tags::RESOURCE_NAME), Some("h1"));
        assert_eq!(cpu.tag(tags::RESOURCE_TYPE), Some("Server"));
        assert_eq!(cpu.tag(tags::MONITORING_SYSTEM), Some("Nagios"));
        assert_eq!(cpu.tag(tags::APPLICATION), Some("shop"));
        assert_eq!(cpu.tag(tags::UNIT), Some("%"));
        assert_eq!(cpu.tag(tags::STATE), Some("0"));
        assert_eq!(cpu.tag(tags::WARNING_THRESHOLD), Some("80.0"));
        assert_eq!(cpu.tag(tags::CRITICAL_THRESHOLD), Some("95.0"));

        let disk = metrics.iter().find(|m| m.metric_name() == "Disk Usage on /").unwrap();
        assert_eq!(disk.value(), 55.0);
        assert_eq!(disk.tag(tags::WARNING_THRESHOLD), Some("80.0"));
        assert_eq!(disk.tag(tags::CRITICAL_THRESHOLD), Some("90.0"));
        assert_eq!(
            disk.resource().origin,
            crate::collectors::ResourceOrigin::Nagios {
                host_group: "shop".to_string(),
                service_group: "Monitoring".to_string(),
                host_address: Some("10.0.0.5".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_failed_host_does_not_abort_batch() {
        let mut responses = HashMap::new();
        responses.insert("good".to_string(), healthy_host());
        let (collector, calls) = collector(responses, &[("bad", "shop"), ("good", "shop")]);

        let metrics = collector.collect().await.unwrap();
        assert_eq!(metrics.len(), 3);
        assert!(metrics.iter().all(|m| m.tag(tags::HOST) == Some("good")));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_and_unparsable_services_are_skipped() {
        let mut bad_time = service("Memory Usage", "'percent'=30%;95;98;", "");
        bad_time.status_update_time = "yesterday".to_string();

        let mut responses = HashMap::new();
        responses.insert(
            "h1".to_string(),
            vec![service("CPU Usage", "'percent'=5%;80;95;", ""), bad_time],
        );
        let (collector, _) = collector(responses, &[("h1", "shop")]);

        let metrics = collector.collect().await.unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].metric_name(), "CPU Usage");
    }

    #[tokio::test]
    async fn test_first_matching_service_wins() {
        let mut responses = HashMap::new();
        responses.insert(
            "h1".to_string(),
            vec![
                service("CPU Usage", "'percent'=1%;80;95;", ""),
                service("CPU Usage", "'percent'=99%;80;95;", ""),
            ],
        );
        let (collector, _) = collector(responses, &[("h1", "shop")]);

        let metrics = collector.collect().await.unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].value(), 1.0);
    }

    #[test]
    fn test_decode_services_shapes() {
        assert!(matches!(decode_services("h", ""), Err(CollectError::EmptyBody { .. })));
        assert!(matches!(decode_services("h", "null"), Err(CollectError::EmptyBody { .. })));
        assert!(matches!(
            decode_services("h", r#"{"recordcount": 0}"#),
            Err(CollectError::MissingServiceStatus { .. })
        ));
        assert!(matches!(
            decode_services("h", r#"{"servicestatus": []}"#),
            Err(CollectError::NoServices { .. })
        ));
        assert!(matches!(decode_services("h", "<html>"), Err(CollectError::Json(_))));

        let services = decode_services(
            "h",
            r#"{"recordcount": 1, "servicestatus": [{"service_description": "CPU Usage", "current_state": "1"}]}"#,
        )
        .unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].current_state, "1");
    }

    #[test]
    fn test_null_fields_on_unrelated_service_keep_the_host() {
        let services = decode_services(
            "h1",
            r#"{"servicestatus": [
                {"service_description": "Ping", "perfdata": null, "output": null, "status_update_time": null, "current_state": null},
                {"service_description": "CPU Usage", "perfdata": "'percent'=9.40%;80;95;", "output": "", "status_update_time": "2024-03-01 12:30:00", "current_state": 0}
            ]}"#,
        )
        .unwrap();

        assert_eq!(services.len(), 2);
        assert_eq!(services[0].perfdata, "");
        assert_eq!(services[0].status_update_time, "");
        assert_eq!(services[1].current_state, "0");
    }

    type SeenQueries = Arc<parking_lot::Mutex<Vec<HashMap<String, String>>>>;

    async fn status_endpoint(
        axum::extract::State(seen): axum::extract::State<SeenQueries>,
        axum::extract::Query(params): axum::extract::Query<HashMap<String, String>>,
    ) -> (axum::http::StatusCode, String) {
        seen.lock().push(params.clone());
        match params.get("host_name").map(String::as_str) {
            Some("web-01") => (
                axum::http::StatusCode::OK,
                r#"{"recordcount": 3, "servicestatus": [
                    {"service_description": "Ping", "perfdata": null, "output": "PING OK", "current_state": "0", "status_update_time": "2024-03-01 12:30:00"},
                    {"service_description": "CPU Usage", "perfdata": "'percent'=9.40%;80;95;", "output": "", "current_state": "0", "status_update_time": "2024-03-01 12:30:00", "host_address": "10.0.0.5"},
                    {"service_description": "Memory Usage", "perfdata": "'percent'=30.80%;95;98;", "output": "", "current_state": 1, "status_update_time": "2024-03-01 12:30:00"}
                ]}"#
                .to_string(),
            ),
            Some("slow") => {
                tokio::time::sleep(Duration::from_secs(2)).await;
                (axum::http::StatusCode::OK, "{}".to_string())
            }
            _ => (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "backend down".to_string()),
        }
    }

    async fn serve_status_api() -> (String, SeenQueries) {
        let seen: SeenQueries = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let app = axum::Router::new()
            .route("/nagiosxi/api/v1/objects/servicestatus", axum::routing::get(status_endpoint))
            .with_state(seen.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/nagiosxi/api/v1/objects/servicestatus", addr), seen)
    }

    #[tokio::test]
    async fn test_api_sends_only_key_and_host() {
        let (url, seen) = serve_status_api().await;
        let api = NagiosApi::new(&url, "secret", Duration::from_secs(5)).unwrap();

        let services = api.fetch_services("web-01").await.unwrap();
        assert_eq!(services.len(), 3);
        assert_eq!(services[1].host_address.as_deref(), Some("10.0.0.5"));
        assert_eq!(services[2].current_state, "1");

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        let mut expected = HashMap::new();
        expected.insert("apikey".to_string(), "secret".to_string());
        expected.insert("host_name".to_string(), "web-01".to_string());
        assert_eq!(seen[0], expected);
    }

    #[tokio::test]
    async fn test_api_error_status() {
        let (url, _) = serve_status_api().await;
        let api = NagiosApi::new(&url, "secret", Duration::from_secs(5)).unwrap();

        match api.fetch_services("db-01").await {
            Err(CollectError::Status { host, status, body }) => {
                assert_eq!(host, "db-01");
                assert_eq!(status, 500);
                assert_eq!(body, "backend down");
            }
            other => panic!("expected status error, got {:?}", other.map(|s| s.len())),
        }
    }

    #[tokio::test]
    async fn test_api_request_timeout() {
        let (url, _) = serve_status_api().await;
        let api = NagiosApi::new(&url, "secret", Duration::from_millis(200)).unwrap();

        match api.fetch_services("slow").await {
            Err(CollectError::Http(e)) => assert!(e.is_timeout()),
            other => panic!("expected timeout, got {:?}", other.map(|s| s.len())),
        }
    }

    #[tokio::test]
    async fn test_collector_over_http_skips_failing_host() {
        let (url, seen) = serve_status_api().await;
        let api = NagiosApi::new(&url, "secret", Duration::from_secs(5)).unwrap();
        let mut host_to_app = BTreeMap::new();
        host_to_app.insert("db-01".to_string(), "shop".to_string());
        host_to_app.insert("web-01".to_string(), "shop".to_string());
        let collector = NagiosCollector::new(Box::new(api), host_to_app).unwrap();

        let metrics = collector.collect().await.unwrap();
        // web-01 has no disk service, db-01 answers 500
        assert_eq!(metrics.len(), 2);
        assert!(metrics.iter().all(|m| m.tag(tags::HOST) == Some("web-01")));
        let memory = metrics.iter().find(|m| m.metric_name() == "Memory Usage").unwrap();
        assert_eq!(memory.tag(tags::STATE), Some("1"));
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn test_format_threshold() {
        assert_eq!(format_threshold(80.0), "80.0");
        assert_eq!(format_threshold(9.4), "9.4");
    }
}
