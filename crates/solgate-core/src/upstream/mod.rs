//! Upstream Solana RPC providers.
//!
//! Each configured provider is an [`Endpoint`] owning its transport, its
//! [`CircuitBreaker`] and its health state. The [`EndpointRegistry`] holds the fixed set
//! of endpoints and picks one per call by a weighted score of health, predicted latency,
//! current congestion and priority. The [`HealthProber`] keeps health current between
//! bursts of organic traffic.
//!
//! # Health and breaker interplay
//!
//! ```text
//! send() ──► breaker admits? ──no──► CircuitBreakerOpen (no network)
//!               │ yes
//!               ▼
//!          transport ──► success ──► health += 2 or 5, breaker closes
//!               │
//!               └──────► failure ──► health -= penalty, breaker counts it
//!                                     │
//!                                     └─► health < threshold: deactivate, cooldown
//! ```
//!
//! Client-side JSON-RPC errors (bad params, unknown method) are the caller's fault and
//! never count against an endpoint.

pub mod circuit_breaker;
pub mod endpoint;
pub mod errors;
pub mod health;
pub mod http_client;
pub mod registry;
pub mod scoring;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState};
pub use endpoint::{Endpoint, EndpointSettings, EndpointSnapshot};
pub use errors::{RpcErrorCategory, UpstreamError};
pub use health::{HealthProber, ProbeResult};
pub use http_client::{build_shared_client, HttpClient, HttpClientConfig};
pub use registry::{EndpointRegistry, SelectionError};
pub use scoring::SelectionWeights;
