use crate::error::CollectError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Well-known keys in [`MetricRecord::tags`].
pub mod tags {
    pub const HOST: &str = "host";
    pub const RESOURCE_ID: &str = "resourceId";
    pub const RESOURCE_NAME: &str = "resourceName";
    pub const RESOURCE_TYPE: &str = "resourceType";
    pub const MONITORING_SYSTEM: &str = "monitoringSystem";
    pub const APPLICATION: &str = "application";
    pub const UNIT: &str = "unit";
    pub const STATE: &str = "state";
    pub const WARNING_THRESHOLD: &str = "warning_threshold";
    pub const CRITICAL_THRESHOLD: &str = "critical_threshold";
    pub const VALUE_SOURCE: &str = "value_source";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MonitoringSystem {
    Nagios,
    #[serde(rename = "AWS")]
    Aws,
}

impl MonitoringSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitoringSystem::Nagios => "Nagios",
            MonitoringSystem::Aws => "AWS",
        }
    }
}

impl fmt::Display for MonitoringSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Origin-specific attributes of a monitored entity. The variant fixes the
/// monitoring system for the lifetime of the descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "monitoringSystem")]
pub enum ResourceOrigin {
    #[serde(rename_all = "camelCase")]
    Nagios {
        host_group: String,
        service_group: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host_address: Option<String>,
    },
    #[serde(rename = "AWS", rename_all = "camelCase")]
    Aws {
        aws_region: String,
        account_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arn_id: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub id: String,
    pub name: String,
    /// `Server`, `EC2`, `RDS`, `S3`, ...
    pub resource_type: String,
    #[serde(flatten)]
    pub origin: ResourceOrigin,
}

impl ResourceDescriptor {
    pub fn nagios(
        id: impl Into<String>,
        name: impl Into<String>,
        resource_type: impl Into<String>,
        host_group: impl Into<String>,
        service_group: impl Into<String>,
        host_address: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            resource_type: resource_type.into(),
            origin: ResourceOrigin::Nagios {
                host_group: host_group.into(),
                service_group: service_group.into(),
                host_address,
            },
        }
    }

    pub fn aws(
        id: impl Into<String>,
        name: impl Into<String>,
        resource_type: impl Into<String>,
        aws_region: impl Into<String>,
        account_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            resource_type: resource_type.into(),
            origin: ResourceOrigin::Aws {
                aws_region: aws_region.into(),
                account_id: account_id.into(),
                arn_id: None,
            },
        }
    }

    pub fn monitoring_system(&self) -> MonitoringSystem {
        match self.origin {
            ResourceOrigin::Nagios { .. } => MonitoringSystem::Nagios,
            ResourceOrigin::Aws { .. } => MonitoringSystem::Aws,
        }
    }
}

/// One observation of one metric on one resource.
///
/// Fields are only reachable through accessors so a record cannot change
/// once it has been built and handed to a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRecord {
    id: String,
    resource: ResourceDescriptor,
    metric_name: String,
    value: f64,
    timestamp: DateTime<Utc>,
    unit: String,
    tags: HashMap<String, String>,
}

impl MetricRecord {
    /// Creates a record with a fresh id. The resource identity, type, origin
    /// and unit are denormalized into the tags so queries can filter without
    /// looking at the descriptor.
    pub fn new(
        resource: ResourceDescriptor,
        metric_name: impl Into<String>,
        value: f64,
        unit: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let unit = unit.into();
        let mut tags = HashMap::new();
        tags.insert(tags::RESOURCE_ID.to_string(), resource.id.clone());
        tags.insert(tags::RESOURCE_NAME.to_string(), resource.name.clone());
        tags.insert(tags::RESOURCE_TYPE.to_string(), resource.resource_type.clone());
        tags.insert(
            tags::MONITORING_SYSTEM.to_string(),
            resource.monitoring_system().to_string(),
        );
        tags.insert(tags::UNIT.to_string(), unit.clone());

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            resource,
            metric_name: metric_name.into(),
            value,
            timestamp,
            unit,
            tags,
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Rebuilds a record that was previously persisted, keeping its id.
    pub(crate) fn restore(
        id: String,
        resource: ResourceDescriptor,
        metric_name: String,
        value: f64,
        timestamp: DateTime<Utc>,
        unit: String,
        tags: HashMap<String, String>,
    ) -> Self {
        Self {
            id,
            resource,
            metric_name,
            value,
            timestamp,
            unit,
            tags,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn resource(&self) -> &ResourceDescriptor {
        &self.resource
    }

    pub fn resource_id(&self) -> &str {
        &self.resource.id
    }

    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn tags(&self) -> &HashMap<String, String> {
        &self.tags
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

/// A source of metric records, polled once per collection cycle.
#[async_trait::async_trait]
pub trait Collector: Send + Sync {
    async fn collect(&self) -> Result<Vec<MetricRecord>, CollectError>;
    fn name(&self) -> &str;
}
