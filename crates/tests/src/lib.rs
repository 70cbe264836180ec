//! Integration tests for solgate against mocked Solana RPC providers.
//!
//! Every scenario runs a real `ConnectionManager` (or a full `SolgateRuntime`) against
//! mockito servers, so requests cross the actual HTTP transport:
//!
//! - `call_path_tests`: validation, caching and in-flight deduplication
//! - `failover_tests`: endpoint selection, single failover and circuit breaking
//! - `credential_tests`: credential placement, expiry and request signing
//! - `batch_tests`: coalescing of account and status reads
//! - `confirmation_tests`: transaction confirmation polling
//! - `stream_tests`: bounded program-account streaming
//! - `runtime_tests`: runtime assembly from configuration and shutdown
//! - `mock_infrastructure`: the mock provider and a manager harness
//!
//! ```bash
//! cargo test --package solgate-tests
//! ```

#[cfg(test)]
mod call_path_tests;

#[cfg(test)]
mod failover_tests;

#[cfg(test)]
mod credential_tests;

#[cfg(test)]
mod batch_tests;

#[cfg(test)]
mod confirmation_tests;

#[cfg(test)]
mod stream_tests;

#[cfg(test)]
mod runtime_tests;

/// Mock infrastructure for testing
pub mod mock_infrastructure;
