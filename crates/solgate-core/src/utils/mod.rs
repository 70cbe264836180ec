//! Utility functions shared across components.
//!
//! ## Canonical JSON (`canonical`)
//! - Sorted-key rendering used for request signing
//! - Seeded `ahash` hashing used for cache keys
//! - Integral floats normalize to integers so `10` and `10.0` collide

pub mod canonical;

pub use canonical::{canonical_string, hash_json_value, request_key};
