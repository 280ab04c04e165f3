//! Transactional mail submission.
//!
//! The mailer is an external collaborator; this is the one call the alert
//! bridge makes against it: a JSON submission signed with HMAC-SHA256 over
//! the request date, host, and content hash, per the provider's REST
//! contract.

use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

const API_PATH: &str = "/emails:send?api-version=2023-03-31";

/// How long a send may take before being abandoned.
const SEND_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Serialize)]
struct EmailPayload<'a> {
    #[serde(rename = "senderAddress")]
    sender_address: &'a str,
    content: EmailContent<'a>,
    recipients: EmailRecipients<'a>,
}

#[derive(Debug, Serialize)]
struct EmailContent<'a> {
    subject: &'a str,
    html: &'a str,
}

#[derive(Debug, Serialize)]
struct EmailRecipients<'a> {
    to: Vec<EmailAddress<'a>>,
}

#[derive(Debug, Serialize)]
struct EmailAddress<'a> {
    address: &'a str,
}

/// Mailer configuration.
#[derive(Debug, Clone)]
pub struct MailerConfig {
    /// Mailer endpoint base URL.
    pub endpoint: String,
    /// Base64-encoded access key used to sign requests.
    pub access_key: String,
    /// Sender address stamped on every mail.
    pub sender: String,
}

/// Signed-request mail client.
pub struct Mailer {
    config: MailerConfig,
    host: String,
    http: reqwest::Client,
}

impl Mailer {
    pub fn new(config: MailerConfig) -> Result<Self> {
        let url = reqwest::Url::parse(&config.endpoint)
            .map_err(|e| Error::Config(format!("invalid mailer endpoint: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::Config("mailer endpoint has no host".to_string()))?
            .to_string();

        let http = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .expect("reqwest client construction cannot fail with static options");

        Ok(Self { config, host, http })
    }

    /// Submit one HTML mail.
    pub async fn send(&self, recipient: &str, subject: &str, html: &str) -> Result<()> {
        let payload = EmailPayload {
            sender_address: &self.config.sender,
            content: EmailContent { subject, html },
            recipients: EmailRecipients {
                to: vec![EmailAddress { address: recipient }],
            },
        };
        let body = serde_json::to_vec(&payload)?;

        let date = chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let content_hash =
            base64::engine::general_purpose::STANDARD.encode(Sha256::digest(&body));

        let signature = self.sign(&string_to_sign(&date, &self.host, &content_hash))?;

        let url = format!("{}{API_PATH}", self.config.endpoint.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .header("content-type", "application/json")
            .header("x-ms-date", &date)
            .header("x-ms-content-sha256", &content_hash)
            .header(
                "authorization",
                format!(
                    "HMAC-SHA256 SignedHeaders=x-ms-date;host;x-ms-content-sha256&Signature={signature}"
                ),
            )
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Mail(format!(
                "mailer returned status {status}: {body}"
            )));
        }

        tracing::info!(recipient, "alert mail submitted");
        Ok(())
    }

    fn sign(&self, string_to_sign: &str) -> Result<String> {
        let key = base64::engine::general_purpose::STANDARD
            .decode(&self.config.access_key)
            .map_err(|e| Error::Config(format!("invalid mailer access key: {e}")))?;

        let mut mac = HmacSha256::new_from_slice(&key).expect("HMAC accepts keys of any length");
        mac.update(string_to_sign.as_bytes());
        Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
    }
}

fn string_to_sign(date: &str, host: &str, content_hash: &str) -> String {
    format!("POST\n{API_PATH}\n{date};{host};{content_hash}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_to_sign_shape() {
        let s = string_to_sign("Mon, 01 Jan 2024 00:00:00 GMT", "mail.example.com", "abc=");
        assert_eq!(
            s,
            "POST\n/emails:send?api-version=2023-03-31\nMon, 01 Jan 2024 00:00:00 GMT;mail.example.com;abc="
        );
    }

    #[test]
    fn test_payload_json_shape() {
        let payload = EmailPayload {
            sender_address: "alerts@example.com",
            content: EmailContent {
                subject: "s",
                html: "<p>hi</p>",
            },
            recipients: EmailRecipients {
                to: vec![EmailAddress {
                    address: "u@example.com",
                }],
            },
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["senderAddress"], "alerts@example.com");
        assert_eq!(json["content"]["html"], "<p>hi</p>");
        assert_eq!(json["recipients"]["to"][0]["address"], "u@example.com");
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let err = Mailer::new(MailerConfig {
            endpoint: "not a url".into(),
            access_key: "a2V5".into(),
            sender: "alerts@example.com".into(),
        })
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
