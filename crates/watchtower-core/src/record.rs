//! Record and document shapes flowing through the pipeline.
//!
//! Three families of types live here:
//! - Broadcast models (`LogRecord`, `MetricRecord`): what live subscribers
//!   receive as JSON over the event stream.
//! - Search-store documents (`LogDocument`, `MetricDocument`): the broadcast
//!   shape enriched with bus coordinates for deterministic doc ids.
//! - `AlertEvent`: the pub/sub contract published by the rule engine.
//!
//! Ownership is by-value throughout: every stage holds its own copy and
//! hands records onward by move or clone, never by shared reference.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::proto;

/// Log severity levels accepted by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Debug,
    Warn,
    Error,
    Silly,
    Http,
    Verbose,
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "silly" => Ok(Self::Silly),
            "http" => Ok(Self::Http),
            "verbose" => Ok(Self::Verbose),
            _ => Err(()),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Silly => "silly",
            Self::Http => "http",
            Self::Verbose => "verbose",
        };
        f.write_str(s)
    }
}

/// Build metadata attached to a log record by the client runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDetails {
    #[serde(rename = "nodeVersion")]
    pub node_version: String,
    #[serde(rename = "appVersion")]
    pub app_version: String,
}

/// A structured application log record, as broadcast to live subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(rename = "serviceName")]
    pub service_name: String,
    #[serde(rename = "buildDetails", skip_serializing_if = "Option::is_none")]
    pub build_details: Option<BuildDetails>,
    pub level: String,
    pub message: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub stack: String,
    #[serde(rename = "requestId", skip_serializing_if = "String::is_empty", default)]
    pub request_id: String,
    #[serde(rename = "requestUrl", skip_serializing_if = "String::is_empty", default)]
    pub request_url: String,
    #[serde(
        rename = "requestMethod",
        skip_serializing_if = "String::is_empty",
        default
    )]
    pub request_method: String,
    #[serde(rename = "ipAddress", skip_serializing_if = "String::is_empty", default)]
    pub ip_address: String,
    #[serde(rename = "userAgent", skip_serializing_if = "String::is_empty", default)]
    pub user_agent: String,
    #[serde(
        rename = "responseStatus",
        skip_serializing_if = "String::is_empty",
        default
    )]
    pub response_status: String,
    #[serde(
        rename = "responseTime",
        skip_serializing_if = "String::is_empty",
        default
    )]
    pub response_time: String,
    pub timestamp: DateTime<Utc>,
}

/// A log record enriched with its bus coordinates, as indexed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogDocument {
    #[serde(flatten)]
    pub record: LogRecord,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl LogDocument {
    /// Deterministic document id making redelivery idempotent at the
    /// search-store layer.
    pub fn doc_id(&self) -> String {
        format!("{}-{}-{}", self.topic, self.partition, self.offset)
    }
}

/// Host memory usage sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub timestamp: i64,
    #[serde(rename = "totalMemory")]
    pub total_memory: i64,
    #[serde(rename = "freeMemory")]
    pub free_memory: i64,
    #[serde(rename = "usedMemory")]
    pub used_memory: i64,
    #[serde(rename = "memoryUsagePercentage")]
    pub memory_usage_percentage: f64,
}

/// Per-core CPU usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreUsage {
    pub core: i32,
    pub usage: f64,
}

/// Host CPU usage sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuUsage {
    pub timestamp: i64,
    pub average: f64,
    pub cores: Vec<CoreUsage>,
}

/// A resource-usage sample, as broadcast to live subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRecord {
    #[serde(rename = "serviceName")]
    pub service_name: String,
    #[serde(rename = "memoryUsage")]
    pub memory_usage: Option<MemoryUsage>,
    #[serde(rename = "cpuUsage")]
    pub cpu_usage: Option<CpuUsage>,
}

/// A metric record enriched with its bus coordinates, as indexed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricDocument {
    #[serde(flatten)]
    pub record: MetricRecord,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl MetricDocument {
    pub fn doc_id(&self) -> String {
        format!("{}-{}-{}", self.topic, self.partition, self.offset)
    }
}

/// One notification method attached to an alert rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertMethod {
    #[serde(rename = "method")]
    pub kind: String,
    pub value: String,
}

/// A triggered-rule message published by the rule engine on the `alerts`
/// pub/sub channel, and the document indexed for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: String,
    pub project_name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub rule_type: String,
    #[serde(default)]
    pub metric_name: String,
    #[serde(default)]
    pub log_field: String,
    #[serde(default)]
    pub log_field_value: String,
    #[serde(default)]
    pub operator: String,
    #[serde(default)]
    pub threshold: String,
    #[serde(default)]
    pub current_value: f64,
    #[serde(default)]
    pub time_window: String,
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub methods: Vec<AlertMethod>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub version: String,
}

// =============================================================================
// Bus and index naming
// =============================================================================

/// Prefix of all log topics.
pub const LOG_TOPIC_PREFIX: &str = "logs-";

/// Prefix of all metric topics.
pub const METRIC_TOPIC_PREFIX: &str = "metrics-";

/// Bus topic carrying a project's log records.
pub fn log_topic(project: &str) -> String {
    format!("{LOG_TOPIC_PREFIX}{project}")
}

/// Bus topic carrying a project's metric records.
pub fn metric_topic(project: &str) -> String {
    format!("{METRIC_TOPIC_PREFIX}{project}")
}

/// Index receiving log documents for a service.
pub fn log_index(service: &str) -> String {
    format!("logs-{service}")
}

/// Index receiving metric documents for a service, dated with the local
/// day at flush time.
pub fn metric_index(service: &str, date: chrono::NaiveDate) -> String {
    format!("metrics-{service}-{}", date.format("%d.%m.%Y"))
}

/// Index receiving an alert event, dated with the event's own timestamp.
pub fn alert_index(project_name: &str, timestamp: DateTime<Utc>) -> String {
    format!(
        "alerts-{}-{}",
        project_slug(project_name),
        timestamp.format("%Y-%m-%d")
    )
}

/// Project slug used in alert index names: lowercased, spaces to underscores.
pub fn project_slug(project_name: &str) -> String {
    project_name.to_lowercase().replace(' ', "_")
}

// =============================================================================
// Proto conversions
// =============================================================================

impl From<&proto::Log> for LogRecord {
    fn from(log: &proto::Log) -> Self {
        Self {
            service_name: log.service_name.clone(),
            build_details: log.build_details.as_ref().map(|b| BuildDetails {
                node_version: b.node_version.clone(),
                app_version: b.app_version.clone(),
            }),
            level: log.level.clone(),
            message: log.message.clone(),
            stack: log.stack.clone(),
            request_id: log.request_id.clone(),
            request_url: log.request_url.clone(),
            request_method: log.request_method.clone(),
            ip_address: log.remote_ip.clone(),
            user_agent: log.user_agent.clone(),
            response_status: log.response_status.clone(),
            response_time: log.response_time.clone(),
            timestamp: log
                .timestamp
                .as_ref()
                .map(proto::timestamp_to_utc)
                .unwrap_or_else(Utc::now),
        }
    }
}

impl LogDocument {
    /// Build an indexable document from a decoded bus record.
    pub fn from_proto(log: &proto::Log, topic: &str, partition: i32, offset: i64) -> Self {
        Self {
            record: LogRecord::from(log),
            topic: topic.to_string(),
            partition,
            offset,
        }
    }
}

impl From<&proto::Metrics> for MetricRecord {
    fn from(m: &proto::Metrics) -> Self {
        Self {
            service_name: m.service_name.clone(),
            memory_usage: m.memory_usage.as_ref().map(|mu| MemoryUsage {
                timestamp: mu.timestamp,
                total_memory: mu.total_memory,
                free_memory: mu.free_memory,
                used_memory: mu.used_memory,
                memory_usage_percentage: mu.memory_usage_percentage,
            }),
            cpu_usage: m.cpu_usage.as_ref().map(|cu| CpuUsage {
                timestamp: cu.timestamp,
                average: cu.average,
                cores: cu
                    .cores
                    .iter()
                    .map(|c| CoreUsage {
                        core: c.core,
                        usage: c.usage,
                    })
                    .collect(),
            }),
        }
    }
}

impl MetricDocument {
    /// Build an indexable document from a decoded bus record.
    pub fn from_proto(m: &proto::Metrics, topic: &str, partition: i32, offset: i64) -> Self {
        Self {
            record: MetricRecord::from(m),
            topic: topic.to_string(),
            partition,
            offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_log_level_parse() {
        assert_eq!("info".parse::<LogLevel>(), Ok(LogLevel::Info));
        assert_eq!("silly".parse::<LogLevel>(), Ok(LogLevel::Silly));
        assert!("fatal".parse::<LogLevel>().is_err());
        assert!("INFO".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_doc_id_format() {
        let doc = LogDocument::from_proto(
            &proto::Log {
                service_name: "svcA".into(),
                level: "info".into(),
                message: "hi".into(),
                ..Default::default()
            },
            "logs-svcA",
            1,
            42,
        );
        assert_eq!(doc.doc_id(), "logs-svcA-1-42");
    }

    #[test]
    fn test_topic_names() {
        assert_eq!(log_topic("svcA"), "logs-svcA");
        assert_eq!(metric_topic("svcA"), "metrics-svcA");
        assert!(log_topic("svcA").starts_with(LOG_TOPIC_PREFIX));
    }

    #[test]
    fn test_index_names() {
        assert_eq!(log_index("svcA"), "logs-svcA");

        let date = chrono::NaiveDate::from_ymd_opt(2024, 3, 14).unwrap();
        assert_eq!(metric_index("svcA", date), "metrics-svcA-14.03.2024");

        let ts = Utc.with_ymd_and_hms(2024, 3, 14, 23, 59, 0).unwrap();
        assert_eq!(alert_index("Proj X", ts), "alerts-proj_x-2024-03-14");
    }

    #[test]
    fn test_project_slug() {
        assert_eq!(project_slug("Proj X"), "proj_x");
        assert_eq!(project_slug("already_slugged"), "already_slugged");
        assert_eq!(project_slug("Two  Spaces"), "two__spaces");
    }

    #[test]
    fn test_log_record_json_field_names() {
        let record = LogRecord {
            service_name: "svcA".into(),
            build_details: Some(BuildDetails {
                node_version: "20.1.0".into(),
                app_version: "1.2.3".into(),
            }),
            level: "error".into(),
            message: "boom".into(),
            stack: "at main".into(),
            request_id: String::new(),
            request_url: String::new(),
            request_method: String::new(),
            ip_address: "10.0.0.1".into(),
            user_agent: String::new(),
            response_status: "500".into(),
            response_time: "12ms".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["serviceName"], "svcA");
        assert_eq!(json["buildDetails"]["nodeVersion"], "20.1.0");
        assert_eq!(json["ipAddress"], "10.0.0.1");
        assert_eq!(json["responseStatus"], "500");
        // Empty optionals are omitted entirely
        assert!(json.get("requestId").is_none());
    }

    #[test]
    fn test_alert_event_parse() {
        let payload = r#"{
            "id": "a1",
            "project_name": "Proj X",
            "type": "metric_avg",
            "rule_type": "metric",
            "metric_name": "cpu_usage",
            "operator": ">",
            "threshold": "90",
            "current_value": 97.2,
            "time_window": "5m",
            "priority": "critical",
            "methods": [{"method": "email", "value": "u@e"}],
            "timestamp": "2024-03-14T12:00:00Z",
            "published_at": "2024-03-14T12:00:01Z",
            "source": "alert-manager",
            "version": "1"
        }"#;
        let event: AlertEvent = serde_json::from_str(payload).unwrap();
        assert_eq!(event.id, "a1");
        assert_eq!(event.methods.len(), 1);
        assert_eq!(event.methods[0].kind, "email");
        assert_eq!(alert_index(&event.project_name, event.timestamp), "alerts-proj_x-2024-03-14");
    }

    #[test]
    fn test_log_document_flattens_record() {
        let doc = LogDocument::from_proto(
            &proto::Log {
                service_name: "svcA".into(),
                level: "info".into(),
                message: "hi".into(),
                ..Default::default()
            },
            "logs-svcA",
            0,
            7,
        );
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["serviceName"], "svcA");
        assert_eq!(json["topic"], "logs-svcA");
        assert_eq!(json["partition"], 0);
        assert_eq!(json["offset"], 7);
    }
}
