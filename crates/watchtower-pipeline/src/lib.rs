//! Watchtower Pipeline - consumer fabric, batch indexer, and alert bridge.
//!
//! This crate is the server side of the data plane: it subscribes to the
//! per-project bus topics, decodes the registry-framed envelopes, batches
//! documents into the search store, fans records out to live subscribers,
//! and bridges triggered alerts from pub/sub into documents, broadcasts,
//! and e-mails.
//!
//! # Architecture
//!
//! - **Topics**: per-project topic provisioning and prefix discovery
//! - **Consumer**: one group-subscribed worker per role with dynamic topic
//!   tracking
//! - **Indexer**: per-service batching with deterministic doc ids
//! - **Alerts**: pub/sub bridge to the search store, hub, and mailer
//! - **Server**: SSE surface plus the topic admin route

pub mod alerts;
pub mod config;
pub mod consumer;
mod error;
pub mod indexer;
pub mod mailer;
pub mod server;
pub mod topics;

pub use self::config::Config;
pub use self::error::{Error, Result};
