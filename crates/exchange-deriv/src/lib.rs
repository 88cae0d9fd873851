//! Deriv WebSocket API client.
//!
//! [`DerivClient`] owns the broker connection: it authorizes with the
//! configured account (falling back from real to demo on a rejected real
//! token), keeps the session alive with application-level pings, and
//! reconnects with capped exponential backoff after probing the network.

pub mod client;
pub mod error;
pub mod health;
pub mod probe;
pub mod protocol;

pub use client::{looks_like_token, validate_endpoint, ClientConfig, DerivClient};
pub use error::{ApiError, AuthErrorKind, DerivError};
pub use health::{HealthConfig, HealthState, HeartbeatAction};
pub use probe::{NetworkProbe, TcpProbe};
