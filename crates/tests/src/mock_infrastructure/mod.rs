//! Mock infrastructure for driving the connection manager without real providers.
//!
//! - `SolanaRpcMock`: wraps mockito with Solana-shaped JSON-RPC responses
//! - `unresponsive_endpoint`: a provider that accepts connections and never answers
//! - `ManagerHarness`: wires a `ConnectionManager` against mock endpoints with test-sized
//!   budgets, timeouts and breaker thresholds
//! - Fixture helpers for addresses, signatures and account payloads
//!
//! ## Usage
//!
//! ```ignore
//! use solgate_tests::mock_infrastructure::{ManagerHarness, SolanaRpcMock};
//!
//! let mut rpc = SolanaRpcMock::new().await;
//! let slot = rpc.mock_method("getSlot", &json!(42)).await;
//! let harness = ManagerHarness::builder().endpoint("primary", rpc.url(), 10).build();
//! ```

pub mod rpc_mock;
pub mod test_helpers;

pub use rpc_mock::{unresponsive_endpoint, SolanaRpcMock};
pub use test_helpers::*;
