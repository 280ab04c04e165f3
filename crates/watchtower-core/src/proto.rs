//! Generated protobuf types and the ingest service stubs.
//!
//! This module exposes:
//! - Message types for the on-wire telemetry records (`Log`, `Metrics`)
//! - The tonic service definitions for the ingest gateway
//! - Timestamp conversion helpers between protobuf and chrono

use chrono::{DateTime, TimeZone, Utc};

// Include the generated protobuf types
pub mod telemetry {
    #![allow(clippy::doc_markdown)]
    include!(concat!(env!("OUT_DIR"), "/watchtower.telemetry.rs"));
}

pub use telemetry::{Ack, BuildDetails, CoreUsage, CpuUsage, Log, MemoryUsage, Metrics};

pub use telemetry::log_ingest_client::LogIngestClient;
pub use telemetry::log_ingest_server::{LogIngest, LogIngestServer};
pub use telemetry::metric_ingest_client::MetricIngestClient;
pub use telemetry::metric_ingest_server::{MetricIngest, MetricIngestServer};

/// Convert a protobuf timestamp to a UTC instant.
///
/// Out-of-range values clamp to the Unix epoch rather than failing; the
/// pipeline never rejects a record over a bad clock.
pub fn timestamp_to_utc(ts: &prost_types::Timestamp) -> DateTime<Utc> {
    Utc.timestamp_opt(ts.seconds, ts.nanos.max(0) as u32)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap())
}

/// Build a protobuf timestamp from a UTC instant.
pub fn utc_to_timestamp(dt: DateTime<Utc>) -> prost_types::Timestamp {
    prost_types::Timestamp {
        seconds: dt.timestamp(),
        nanos: dt.timestamp_subsec_nanos() as i32,
    }
}

/// Current wall-clock time as a protobuf timestamp.
pub fn timestamp_now() -> prost_types::Timestamp {
    utc_to_timestamp(Utc::now())
}
