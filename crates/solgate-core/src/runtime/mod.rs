//! Runtime initialization and lifecycle management.
//!
//! Wires every component from one [`AppConfig`](crate::config::AppConfig) into a single
//! [`ConnectionManager`](crate::manager::ConnectionManager), starts the background tasks
//! and coordinates their shutdown. The HTTP server and embedded users (bots, indexers)
//! both go through this entry point.
//!
//! # Examples
//!
//! ## Server usage
//!
//! ```no_run
//! use solgate_core::{config::AppConfig, runtime::SolgateRuntime};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load()?;
//!
//!     let runtime = SolgateRuntime::builder().with_config(config).enable_health_prober().build()?;
//!
//!     let manager = runtime.manager();
//!     // ... set up HTTP routes around `manager` ...
//!
//!     runtime.wait_for_shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Embedded usage
//!
//! ```no_run
//! use serde_json::json;
//! use solgate_core::{config::AppConfig, runtime::SolgateRuntime, types::Priority};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = SolgateRuntime::builder().with_config(AppConfig::load()?).build()?;
//!
//!     let slot = runtime.manager().call("getSlot", json!([]), Priority::NORMAL).await?;
//!     println!("slot {slot}");
//!
//!     runtime.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod lifecycle;

pub use builder::{RuntimeError, SolgateRuntimeBuilder};
pub use lifecycle::SolgateRuntime;
