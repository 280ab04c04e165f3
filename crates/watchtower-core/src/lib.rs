//! Core types, wire codec, and shared utilities for the Watchtower pipeline.
//!
//! This crate provides:
//! - The telemetry data model (records, search-store documents, alert events)
//! - The registry-framed envelope codec used for every bus payload
//! - A schema registry HTTP client
//! - Prometheus metrics helpers
//! - Shared error types

mod codec;
mod error;
pub mod metrics;
pub mod proto;
pub mod record;
mod registry;

pub use codec::{
    frame, parse_frame, EnvelopeCodec, HEADER_LEN, LOG_SUBJECT, MAGIC_BYTE, METRIC_SUBJECT,
};
pub use error::{Error, Result};
pub use registry::SchemaRegistry;
