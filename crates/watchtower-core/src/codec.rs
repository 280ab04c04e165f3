//! Registry-framed envelope codec for bus payloads.
//!
//! Every value on the bus is laid out as:
//!
//! ```text
//! [ 0x00 magic | 4-byte big-endian schema id | protobuf payload ]
//! ```
//!
//! The schema id ties the payload to a registry entry so producers and
//! consumers can be deployed independently; consumers tolerate ids they
//! cannot resolve because the payload is self-descriptive.
//!
//! The byte-level framing is pure ([`frame`] / [`parse_frame`]);
//! [`EnvelopeCodec`] adds the registry lookup on top.

use prost::Message;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::proto;
use crate::registry::SchemaRegistry;

/// Leading byte of every envelope frame.
pub const MAGIC_BYTE: u8 = 0x00;

/// Magic byte plus the 4-byte schema id.
pub const HEADER_LEN: usize = 5;

/// Registry subject for log payloads.
pub const LOG_SUBJECT: &str = "logs-value";

/// Registry subject for metric payloads.
pub const METRIC_SUBJECT: &str = "metrics-value";

/// Assemble an envelope frame from a schema id and an encoded payload.
pub fn frame(schema_id: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.push(MAGIC_BYTE);
    out.extend_from_slice(&schema_id.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Split an envelope frame into its schema id and payload bytes.
pub fn parse_frame(data: &[u8]) -> Result<(u32, &[u8])> {
    if data.len() < HEADER_LEN {
        return Err(Error::ShortFrame(data.len()));
    }
    if data[0] != MAGIC_BYTE {
        return Err(Error::BadMagic(data[0]));
    }

    let schema_id = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);
    Ok((schema_id, &data[HEADER_LEN..]))
}

/// Envelope codec binding the framing to a schema registry.
#[derive(Clone)]
pub struct EnvelopeCodec {
    registry: Arc<SchemaRegistry>,
}

impl EnvelopeCodec {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self { registry }
    }

    /// Encode a record under the latest schema id for `subject`.
    pub async fn encode<M: Message>(&self, subject: &str, record: &M) -> Result<Vec<u8>> {
        let schema_id = self.registry.latest_schema_id(subject).await?;

        let mut payload = Vec::with_capacity(record.encoded_len());
        record
            .encode(&mut payload)
            .map_err(|e| Error::PayloadEncode(e.to_string()))?;

        Ok(frame(schema_id, &payload))
    }

    /// Decode a log record from an envelope frame.
    pub async fn decode_log(&self, data: &[u8]) -> Result<proto::Log> {
        let (schema_id, payload) = parse_frame(data)?;
        self.check_schema(schema_id).await;

        proto::Log::decode(payload).map_err(|e| Error::PayloadDecode(e.to_string()))
    }

    /// Decode a metric record from an envelope frame.
    pub async fn decode_metrics(&self, data: &[u8]) -> Result<proto::Metrics> {
        let (schema_id, payload) = parse_frame(data)?;
        self.check_schema(schema_id).await;

        proto::Metrics::decode(payload).map_err(|e| Error::PayloadDecode(e.to_string()))
    }

    /// Best-effort schema id validation. Unknown ids are logged and
    /// tolerated; a lagging consumer deployment must keep draining.
    async fn check_schema(&self, schema_id: u32) {
        if let Err(e) = self.registry.schema_exists(schema_id).await {
            tracing::warn!(schema_id, "could not validate schema id: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let framed = frame(7, b"payload");
        assert_eq!(framed[0], MAGIC_BYTE);
        assert_eq!(&framed[1..5], &7u32.to_be_bytes());
        assert_eq!(&framed[5..], b"payload");
    }

    #[test]
    fn test_parse_frame_round_trip() {
        let framed = frame(0x0102_0304, b"abc");
        let (id, payload) = parse_frame(&framed).unwrap();
        assert_eq!(id, 0x0102_0304);
        assert_eq!(payload, b"abc");
    }

    #[test]
    fn test_parse_frame_empty_payload() {
        let framed = frame(1, b"");
        let (id, payload) = parse_frame(&framed).unwrap();
        assert_eq!(id, 1);
        assert!(payload.is_empty());
    }

    #[test]
    fn test_short_frame_rejected() {
        let err = parse_frame(&[0x00, 0x00, 0x00, 0x01]).unwrap_err();
        assert!(matches!(err, Error::ShortFrame(4)));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let err = parse_frame(&[0x01, 0x00, 0x00, 0x00, 0x01, 0xff]).unwrap_err();
        assert!(matches!(err, Error::BadMagic(0x01)));
    }

    #[test]
    fn test_proto_round_trip_through_frame() {
        let record = proto::Log {
            service_name: "svcA".into(),
            level: "info".into(),
            message: "hi".into(),
            ..Default::default()
        };

        let framed = frame(42, &record.encode_to_vec());
        let (id, payload) = parse_frame(&framed).unwrap();
        assert_eq!(id, 42);

        let decoded = proto::Log::decode(payload).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_metrics_round_trip_through_frame() {
        let record = proto::Metrics {
            service_name: "svcA".into(),
            memory_usage: Some(proto::MemoryUsage {
                timestamp: 1_700_000_000,
                total_memory: 16_000,
                free_memory: 4_000,
                used_memory: 12_000,
                memory_usage_percentage: 75.0,
            }),
            cpu_usage: Some(proto::CpuUsage {
                timestamp: 1_700_000_000,
                average: 0.5,
                cores: vec![proto::CoreUsage { core: 0, usage: 0.5 }],
            }),
        };

        let framed = frame(3, &record.encode_to_vec());
        let (_, payload) = parse_frame(&framed).unwrap();
        let decoded = proto::Metrics::decode(payload).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_garbage_payload_fails_decode() {
        let framed = frame(1, &[0xff, 0xff, 0xff, 0xff]);
        let (_, payload) = parse_frame(&framed).unwrap();
        assert!(proto::Log::decode(payload).is_err());
    }
}
