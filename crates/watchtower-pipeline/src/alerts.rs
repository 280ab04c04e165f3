//! Alert bridge: pub/sub subscriber turning triggered-rule messages into
//! documents, live broadcasts, and e-mails.
//!
//! The rule engine publishes JSON-encoded alert events on the `alerts`
//! channel of the in-memory store. For each event the bridge mails every
//! `email` notification method, broadcasts the event on the alerts hub,
//! and indexes it with immediate refresh; alerts are low-volume and the
//! dashboard reads them right back.
//!
//! The subscription re-establishes itself after transport errors with a
//! fixed backoff, until shutdown.

use elasticsearch::params::Refresh;
use elasticsearch::{Elasticsearch, IndexParts};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use watchtower_core::record::{alert_index, AlertEvent};
use watchtower_stream::Hub;

use crate::error::{Error, Result};
use crate::mailer::Mailer;

/// Pub/sub channel carrying alert events.
const ALERT_CHANNEL: &str = "alerts";

/// Backoff between re-subscription attempts.
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

/// The alert bridge worker.
pub struct AlertBridge {
    redis: redis::Client,
    es: Elasticsearch,
    hub: Arc<Hub<AlertEvent>>,
    mailer: Option<Mailer>,
}

impl AlertBridge {
    pub fn new(
        redis: redis::Client,
        es: Elasticsearch,
        hub: Arc<Hub<AlertEvent>>,
        mailer: Option<Mailer>,
    ) -> Self {
        Self {
            redis,
            es,
            hub,
            mailer,
        }
    }

    /// Subscribe and process until shutdown, re-subscribing on transport
    /// errors.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            match self.listen(&mut shutdown).await {
                Ok(()) => {
                    tracing::info!("alert bridge shutting down");
                    return;
                }
                Err(e) => {
                    tracing::error!("alert subscription error: {e}");
                }
            }

            tokio::select! {
                _ = shutdown.changed() => return,
                _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
            }
        }
    }

    /// One subscription lifetime. Returns `Ok` only on shutdown.
    async fn listen(&self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        let mut pubsub = self.redis.get_async_pubsub().await?;
        pubsub.subscribe(ALERT_CHANNEL).await?;
        tracing::info!("subscribed to alerts channel");

        let mut messages = pubsub.on_message();
        loop {
            tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                message = messages.next() => {
                    let Some(message) = message else {
                        return Err(Error::Redis(redis::RedisError::from((
                            redis::ErrorKind::IoError,
                            "alerts subscription closed",
                        ))));
                    };

                    let payload: String = match message.get_payload() {
                        Ok(payload) => payload,
                        Err(e) => {
                            tracing::warn!("unreadable alert payload: {e}");
                            continue;
                        }
                    };

                    if let Err(e) = self.process_alert(&payload).await {
                        tracing::error!("error processing alert: {e}");
                    }
                }
            }
        }
    }

    /// Handle one alert payload: parse, mail, broadcast, index.
    async fn process_alert(&self, payload: &str) -> Result<()> {
        metrics::counter!("alerts_events_total").increment(1);

        let event: AlertEvent = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(e) => {
                metrics::counter!("alerts_parse_failures_total").increment(1);
                tracing::warn!("failed to parse alert message, skipping: {e}");
                return Ok(());
            }
        };

        // Mail failures never block indexing.
        for method in &event.methods {
            if method.kind != "email" {
                continue;
            }
            let Some(mailer) = &self.mailer else {
                tracing::warn!(event_id = %event.id, "mailer not configured, skipping e-mail");
                continue;
            };

            let subject = format_subject(&event);
            let html = render_alert_html(&event);
            match mailer.send(&method.value, &subject, &html).await {
                Ok(()) => {
                    metrics::counter!("alerts_mails_sent_total").increment(1);
                }
                Err(e) => {
                    metrics::counter!("alerts_mail_failures_total").increment(1);
                    tracing::error!(recipient = %method.value, "failed to send alert mail: {e}");
                }
            }
        }

        self.hub.broadcast(&event.project_name, event.clone());

        let index = alert_index(&event.project_name, event.timestamp);
        let response = self
            .es
            .index(IndexParts::IndexId(&index, &event.id))
            .body(&event)
            .refresh(Refresh::True)
            .send()
            .await?;

        let status = response.status_code();
        if !status.is_success() {
            return Err(Error::BulkRejected(format!(
                "alert indexing for {} returned status {status}",
                event.id
            )));
        }

        metrics::counter!("alerts_indexed_total").increment(1);
        tracing::info!(event_id = %event.id, index = %index, "saved alert");
        Ok(())
    }
}

/// Subject line: `[<PRIORITY> Alert] <metric_name> in <project_name>`.
pub fn format_subject(event: &AlertEvent) -> String {
    format!(
        "[{} Alert] {} in {}",
        event.priority.to_uppercase(),
        event.metric_name,
        event.project_name
    )
}

/// Render the notification body from the event fields.
pub fn render_alert_html(event: &AlertEvent) -> String {
    let mut body = String::new();

    body.push_str("<html><body style='font-family: Arial, sans-serif;'>");
    body.push_str("<h2 style='color: #d9534f;'>Alert Notification</h2>");

    body.push_str("<div style='margin-bottom: 15px;'>");
    body.push_str(&format!(
        "<p><strong>Project:</strong> {}</p>",
        event.project_name
    ));
    body.push_str(&format!("<p><strong>Alert ID:</strong> {}</p>", event.id));
    body.push_str(&format!(
        "<p><strong>Priority:</strong> {}</p>",
        event.priority
    ));
    body.push_str(&format!(
        "<p><strong>Triggered at:</strong> {}</p>",
        event.timestamp.to_rfc2822()
    ));
    body.push_str("</div>");

    body.push_str(
        "<div style='background-color: #f8f9fa; padding: 15px; border-radius: 5px; margin-bottom: 15px;'>",
    );
    body.push_str("<h3 style='color: #337ab7;'>Alert Details</h3>");

    match event.kind.as_str() {
        "metric_avg" => {
            body.push_str(&format!(
                "<p>The average <strong>{}</strong> is currently <strong>{:.2}</strong> which is {} the threshold of <strong>{}</strong>.</p>",
                event.metric_name,
                event.current_value,
                operator_text(&event.operator),
                event.threshold
            ));
            match event.metric_name.as_str() {
                "cpu_usage" => body.push_str(
                    "<p>This indicates that your system CPU usage has exceeded normal levels.</p>",
                ),
                "memory_usage" => body.push_str(
                    "<p>This indicates that your system memory usage has exceeded normal levels.</p>",
                ),
                _ => {}
            }
        }
        "log_count" | "event_count" => {
            body.push_str(&format!(
                "<p>The count of logs with <strong>{}</strong> {} <strong>{}</strong> is currently <strong>{:.0}</strong> which exceeds the threshold of <strong>{}</strong> within the time window of <strong>{}</strong>.</p>",
                event.log_field,
                operator_text(&event.operator),
                event.threshold,
                event.current_value,
                event.threshold,
                event.time_window
            ));
            match event.log_field.as_str() {
                "status_code" => body.push_str(
                    "<p>This indicates an unusual number of HTTP status codes being returned.</p>",
                ),
                "level" => body.push_str(
                    "<p>This indicates an unusual number of log messages at this severity level.</p>",
                ),
                "ip_address" => body.push_str(
                    "<p>This indicates an unusual number of requests from a specific IP address.</p>",
                ),
                _ => {}
            }
        }
        _ => {}
    }

    body.push_str("</div>");

    body.push_str("<div style='background-color: #e7f4ff; padding: 15px; border-radius: 5px;'>");
    body.push_str("<h3 style='color: #337ab7;'>Recommended Actions</h3>");
    body.push_str("<ul>");
    body.push_str("<li>Review the metric/log details in your monitoring dashboard</li>");
    body.push_str("<li>Check system health and recent deployments</li>");
    body.push_str("<li>If this is unexpected, investigate potential issues</li>");
    body.push_str("<li>Consider adjusting thresholds if alerts are too frequent</li>");
    body.push_str("</ul>");
    body.push_str("</div>");

    body.push_str("<div style='margin-top: 20px; font-size: 12px; color: #777;'>");
    body.push_str(&format!(
        "<p>Alert generated by {} (v{})</p>",
        event.source, event.version
    ));
    body.push_str("</div>");

    body.push_str("</body></html>");

    body
}

fn operator_text(op: &str) -> &str {
    match op {
        ">" => "above",
        ">=" => "above or equal to",
        "<" => "below",
        "<=" => "below or equal to",
        "==" => "equal to",
        "!=" => "not equal to",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use watchtower_core::record::AlertMethod;

    fn event() -> AlertEvent {
        AlertEvent {
            id: "a1".into(),
            project_name: "Proj X".into(),
            kind: "metric_avg".into(),
            rule_type: "metric".into(),
            metric_name: "cpu_usage".into(),
            log_field: String::new(),
            log_field_value: String::new(),
            operator: ">".into(),
            threshold: "90".into(),
            current_value: 97.25,
            time_window: "5m".into(),
            priority: "critical".into(),
            methods: vec![AlertMethod {
                kind: "email".into(),
                value: "u@e".into(),
            }],
            timestamp: Utc.with_ymd_and_hms(2024, 3, 14, 12, 0, 0).unwrap(),
            published_at: None,
            source: "alert-manager".into(),
            version: "1".into(),
        }
    }

    #[test]
    fn test_subject_format() {
        assert_eq!(
            format_subject(&event()),
            "[CRITICAL Alert] cpu_usage in Proj X"
        );
    }

    #[test]
    fn test_operator_text() {
        assert_eq!(operator_text(">"), "above");
        assert_eq!(operator_text("<="), "below or equal to");
        assert_eq!(operator_text("~"), "~");
    }

    #[test]
    fn test_metric_html_mentions_threshold_and_value() {
        let html = render_alert_html(&event());
        assert!(html.contains("Proj X"));
        assert!(html.contains("97.25"));
        assert!(html.contains("above"));
        assert!(html.contains("cpu_usage"));
        assert!(html.contains("CPU usage has exceeded normal levels"));
    }

    #[test]
    fn test_log_count_html_uses_time_window() {
        let mut e = event();
        e.kind = "log_count".into();
        e.log_field = "level".into();
        e.current_value = 42.0;

        let html = render_alert_html(&e);
        assert!(html.contains("time window of <strong>5m</strong>"));
        assert!(html.contains("severity level"));
    }

    #[test]
    fn test_alert_index_for_event() {
        let e = event();
        assert_eq!(
            alert_index(&e.project_name, e.timestamp),
            "alerts-proj_x-2024-03-14"
        );
    }
}
