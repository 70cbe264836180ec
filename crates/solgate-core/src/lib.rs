//! # Solgate Core
//!
//! Core library for solgate, a multi-endpoint Solana JSON-RPC connection manager.
//!
//! Callers issue JSON-RPC calls through one [`manager::ConnectionManager`]. Each call is
//! validated, served from cache or a concurrent identical call when possible, routed to the
//! best healthy endpoint within its rate budget, optionally coalesced into a batch, and
//! failed over once on transient errors.
//!
//! - **[`upstream`]**: endpoints with circuit breakers, health scoring, weighted selection
//!   and a periodic prober.
//! - **[`cache`]**: two-tier TTL cache keyed by canonical request hash, with in-flight
//!   deduplication.
//! - **[`limiter`]**: per-endpoint, per-category request budgets with borrowing and
//!   priority wait queues.
//! - **[`batch`]**: short coalescing windows that fold account and signature lookups into
//!   multi-item calls.
//! - **[`security`]**: parameter validation, provider credentials and HMAC request signing.
//! - **[`metrics`]** and **[`events`]**: Prometheus metrics, a JSON health summary and a
//!   typed event bus.
//! - **[`runtime`]**: wiring from [`config::AppConfig`] and background task lifecycle.
//!
//! ## Request Flow
//!
//! ```text
//! call(method, params, priority)
//!       │
//!       ▼
//! ┌─────────────┐
//! │  Validation │ ─── Invalid ──► CallError::Validation (no cache, no network)
//! └──────┬──────┘
//!        ▼
//! ┌─────────────┐
//! │ Cache Check │ ─── Hit ──► cached payload
//! └──────┬──────┘
//!        ▼
//! ┌─────────────┐
//! │  In-flight  │ ─── Joined ──► leader's outcome
//! └──────┬──────┘
//!        ▼
//! ┌─────────────┐
//! │  Selection  │ ─── none active ──► NoAvailableEndpoints
//! └──────┬──────┘
//!        ▼
//! ┌─────────────┐      ┌──────────────┐
//! │ Batchable?  │─yes─►│ BatchOptimizer│
//! └──────┬──────┘      └──────┬───────┘
//!        ▼                    ▼
//! ┌───────────────────────────────────┐
//! │ rate limit ─► credentials/sign ─► │
//! │ breaker ─► HTTP ─► health update  │
//! └──────┬────────────────────────────┘
//!        │ transient failure: one fallback endpoint
//!        ▼
//!   cache insert ─► response
//! ```

pub mod batch;
pub mod cache;
pub mod config;
pub mod events;
pub mod limiter;
pub mod manager;
pub mod metrics;
pub mod responses;
pub mod runtime;
pub mod security;
pub mod types;
pub mod upstream;
pub mod utils;

pub use config::ConfigError;
