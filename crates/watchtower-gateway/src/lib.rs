//! Watchtower Gateway - streaming gRPC ingress.
//!
//! Authenticated client-streaming RPC endpoints that publish log and metric
//! records to per-project bus topics under the registry-framed envelope.
//!
//! # Architecture
//!
//! - **Auth**: HMAC credential check per stream, against the credential store
//! - **Producer**: synchronous-delivery Kafka producer (`acks=all`)
//! - **Service**: the two client-streaming ingest RPCs

pub mod auth;
pub mod config;
mod error;
pub mod producer;
pub mod service;

pub use self::config::Config;
pub use self::error::{Error, Result};
