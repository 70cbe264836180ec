use std::time::Duration;

use crate::types::{method_spec, TtlClass};

/// Cache lifetime per [`TtlClass`].
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    pub realtime: Duration,
    pub account: Duration,
    pub token: Duration,
    pub discovery: Duration,
    pub signatures: Duration,
    pub transaction: Duration,
    /// Used for supported methods that carry no more specific class.
    pub default: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            realtime: Duration::from_millis(1_000),
            account: Duration::from_millis(5_000),
            token: Duration::from_millis(300_000),
            discovery: Duration::from_millis(30_000),
            signatures: Duration::from_millis(10_000),
            transaction: Duration::from_millis(3_600_000),
            default: Duration::from_millis(30_000),
        }
    }
}

impl TtlPolicy {
    /// TTL for a method, or `None` when its results must never be cached.
    #[must_use]
    pub fn ttl_for(&self, method: &str) -> Option<Duration> {
        let Some(spec) = method_spec(method) else {
            return Some(self.default);
        };
        match spec.ttl {
            TtlClass::Realtime => Some(self.realtime),
            TtlClass::Account => Some(self.account),
            TtlClass::Token => Some(self.token),
            TtlClass::Discovery => Some(self.discovery),
            TtlClass::Signatures => Some(self.signatures),
            TtlClass::Transaction => Some(self.transaction),
            TtlClass::Never => None,
        }
        .filter(|ttl| !ttl.is_zero())
    }
}
