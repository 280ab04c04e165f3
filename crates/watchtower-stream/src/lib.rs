//! Watchtower Stream - live delivery hub and SSE surface.
//!
//! This crate fans newly ingested records out to browser subscribers over
//! one-way HTTP event streams. Delivery is realtime-only and best-effort:
//! bounded queues everywhere, drop-on-full, no replay. Historical access
//! goes through the query surface, not here.
//!
//! # Architecture
//!
//! - **Hub**: per-project aggregator queues and per-client bounded queues,
//!   one generic implementation instantiated for logs, metrics, and alerts
//! - **Auth**: JWKS-backed bearer token validation for stream requests
//! - **Routes**: the three `*/stream` SSE endpoints

pub mod auth;
mod error;
pub mod hub;
mod routes;

pub use self::auth::{AuthConfig, SseAuth, UserClaims};
pub use self::error::ApiError;
pub use self::hub::{Hub, HubConfig};
pub use self::routes::{router, StreamState};
