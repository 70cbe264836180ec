//! Core type definitions for JSON-RPC framing, request classification and priorities.
//!
//! # Type Categories
//!
//! ## JSON-RPC Protocol Types
//! - [`JsonRpcRequest`], [`JsonRpcResponse`], [`JsonRpcError`]: wire envelopes
//!
//! ## Classification Types
//! - [`RequestCategory`]: rate-limit partition a method belongs to
//! - [`TtlClass`]: cache lifetime class a method belongs to
//! - [`Priority`]: caller urgency on a 0..=10 scale
//!
//! The supported method table ([`SUPPORTED_METHODS`]) is the single source of truth for
//! all three classifications. Anything not listed there is rejected before it reaches the
//! cache or the network.
//!
//! # Performance Notes
//!
//! String interning via `intern()` gives `&'static str` metric labels for method and
//! endpoint names. The set is bounded by the method table plus configured endpoints.

use ahash::AHashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{
    borrow::Cow,
    fmt,
    sync::{Arc, LazyLock},
};

/// JSON-RPC protocol version constant to avoid repeated allocations.
pub const JSONRPC_VERSION: &str = "2.0";

/// Pre-allocated `Cow` for JSON-RPC version.
pub const JSONRPC_VERSION_COW: Cow<'static, str> = Cow::Borrowed(JSONRPC_VERSION);

/// Coarse request class used to partition an endpoint's rate-limit ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestCategory {
    /// Program-wide scans and history walks; the heaviest traffic.
    Discovery,
    /// SPL token account and mint lookups.
    TokenInfo,
    /// Transaction fetch, submission and status polling.
    Transaction,
    /// Single account reads and cheap cluster queries.
    Account,
}

impl RequestCategory {
    pub const ALL: [RequestCategory; 4] =
        [Self::Discovery, Self::TokenInfo, Self::Transaction, Self::Account];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::TokenInfo => "token_info",
            Self::Transaction => "transaction",
            Self::Account => "account",
        }
    }

    /// Stable index into per-category arrays.
    #[must_use]
    pub fn index(&self) -> usize {
        match self {
            Self::Discovery => 0,
            Self::TokenInfo => 1,
            Self::Transaction => 2,
            Self::Account => 3,
        }
    }
}

impl fmt::Display for RequestCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache lifetime class. Each class maps to a configured TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TtlClass {
    /// Changes every slot.
    Realtime,
    /// Mutable account state.
    Account,
    /// Token metadata, which changes rarely.
    Token,
    /// Program-wide account scans.
    Discovery,
    /// Signature history for an address.
    Signatures,
    /// Finalized transactions, effectively immutable.
    Transaction,
    /// State-mutating or liveness calls that must always reach the network.
    Never,
}

/// Static classification of one supported RPC method.
#[derive(Debug, Clone, Copy)]
pub struct MethodSpec {
    pub name: &'static str,
    pub category: RequestCategory,
    pub ttl: TtlClass,
    /// True when the method can change chain state.
    pub mutating: bool,
}

const fn spec(
    name: &'static str,
    category: RequestCategory,
    ttl: TtlClass,
    mutating: bool,
) -> MethodSpec {
    MethodSpec { name, category, ttl, mutating }
}

/// Supported methods - single source of truth for method validation and classification.
pub const SUPPORTED_METHODS: &[MethodSpec] = &[
    spec("getProgramAccounts", RequestCategory::Discovery, TtlClass::Discovery, false),
    spec("getSignaturesForAddress", RequestCategory::Discovery, TtlClass::Signatures, false),
    spec("getTokenAccountsByOwner", RequestCategory::TokenInfo, TtlClass::Token, false),
    spec("getTokenAccountBalance", RequestCategory::TokenInfo, TtlClass::Token, false),
    spec("getTokenSupply", RequestCategory::TokenInfo, TtlClass::Token, false),
    spec("getTokenLargestAccounts", RequestCategory::TokenInfo, TtlClass::Token, false),
    spec("getTransaction", RequestCategory::Transaction, TtlClass::Transaction, false),
    spec("getSignatureStatuses", RequestCategory::Transaction, TtlClass::Never, false),
    spec("sendTransaction", RequestCategory::Transaction, TtlClass::Never, true),
    spec("simulateTransaction", RequestCategory::Transaction, TtlClass::Never, true),
    spec("getLatestBlockhash", RequestCategory::Transaction, TtlClass::Realtime, false),
    spec("getAccountInfo", RequestCategory::Account, TtlClass::Account, false),
    spec("getMultipleAccounts", RequestCategory::Account, TtlClass::Account, false),
    spec("getBalance", RequestCategory::Account, TtlClass::Account, false),
    spec("getSlot", RequestCategory::Account, TtlClass::Realtime, false),
    spec("getBlockHeight", RequestCategory::Account, TtlClass::Realtime, false),
    spec("getEpochInfo", RequestCategory::Account, TtlClass::Realtime, false),
    spec("getHealth", RequestCategory::Account, TtlClass::Never, false),
    spec("getVersion", RequestCategory::Account, TtlClass::Realtime, false),
    spec("getMinimumBalanceForRentExemption", RequestCategory::Account, TtlClass::Token, false),
];

static METHOD_INDEX: LazyLock<AHashMap<&'static str, MethodSpec>> =
    LazyLock::new(|| SUPPORTED_METHODS.iter().map(|spec| (spec.name, *spec)).collect());

/// Looks up the classification of a method (O(1)).
#[inline]
#[must_use]
pub fn method_spec(method: &str) -> Option<&'static MethodSpec> {
    METHOD_INDEX.get(method)
}

#[inline]
#[must_use]
pub fn is_method_supported(method: &str) -> bool {
    METHOD_INDEX.contains_key(method)
}

/// Category for a method, defaulting to [`RequestCategory::Account`] for unknown names.
#[must_use]
pub fn category_for(method: &str) -> RequestCategory {
    method_spec(method).map_or(RequestCategory::Account, |spec| spec.category)
}

static STRING_INTERNER: LazyLock<RwLock<ahash::AHashSet<&'static str>>> = LazyLock::new(|| {
    let set = SUPPORTED_METHODS.iter().map(|spec| spec.name).collect();
    RwLock::new(set)
});

/// Interns a string, returning a `&'static str` reference.
///
/// Used for metric labels. The set of strings is bounded by the method table and the
/// configured endpoint names, so each string is leaked at most once.
#[inline]
pub(crate) fn intern(s: &str) -> &'static str {
    {
        let set = STRING_INTERNER.read();
        if let Some(&existing) = set.get(s) {
            return existing;
        }
    }

    let mut set = STRING_INTERNER.write();
    if let Some(&existing) = set.get(s) {
        return existing;
    }

    let leaked: &'static str = Box::leak(s.to_string().into_boxed_str());
    set.insert(leaked);
    leaked
}

/// Caller urgency on a 0..=10 scale, higher is more urgent.
///
/// Priority orders rate-limit wait queues and gates capacity borrowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(u8);

impl Priority {
    pub const MAX: u8 = 10;
    pub const LOW: Priority = Priority(1);
    pub const NORMAL: Priority = Priority(5);
    pub const HIGH: Priority = Priority(8);
    pub const CRITICAL: Priority = Priority(10);

    /// Creates a priority, clamping values above [`Priority::MAX`].
    #[must_use]
    pub const fn new(value: u8) -> Self {
        if value > Self::MAX {
            Priority(Self::MAX)
        } else {
            Priority(value)
        }
    }

    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl From<u8> for Priority {
    fn from(value: u8) -> Self {
        Self::new(value)
    }
}

/// JSON-RPC 2.0 request structure.
///
/// `id` is an `Arc` so responses can echo it without deep-copying the JSON value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: Cow<'static, str>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    pub id: Arc<serde_json::Value>,
}

impl JsonRpcRequest {
    #[must_use]
    pub fn new(
        method: impl Into<String>,
        params: Option<serde_json::Value>,
        id: serde_json::Value,
    ) -> Self {
        Self { jsonrpc: JSONRPC_VERSION_COW, method: method.into(), params, id: Arc::new(id) }
    }
}

/// JSON-RPC 2.0 response structure. Carries either `result` or `error`, never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: Cow<'static, str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    #[serde(default)]
    pub id: Arc<serde_json::Value>,
}

impl JsonRpcResponse {
    #[must_use]
    pub fn success(result: serde_json::Value, id: Arc<serde_json::Value>) -> Self {
        Self { jsonrpc: JSONRPC_VERSION_COW, result: Some(result), error: None, id }
    }

    #[must_use]
    pub fn error(code: i32, message: String, id: Arc<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION_COW,
            result: None,
            error: Some(JsonRpcError { code, message, data: None }),
            id,
        }
    }
}

/// JSON-RPC 2.0 error object.
///
/// - `-32700`: Parse error
/// - `-32600`: Invalid request
/// - `-32601`: Method not found
/// - `-32602`: Invalid params
/// - `-32603`: Internal error
/// - `-32000` to `-32099`: Server-defined errors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}
