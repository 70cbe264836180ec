//! Test fixtures and a builder wiring a `ConnectionManager` against mock endpoints.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use solgate_core::{
    batch::BatchConfig,
    cache::{CacheConfig, TieredCache, TtlPolicy},
    events::EventBus,
    limiter::{LimiterConfig, RateLimiter},
    manager::{CategoryTimeouts, ConnectionManager, ManagerComponents, ManagerSettings},
    metrics::MetricsCollector,
    security::{
        CredentialPlacement, CredentialPolicy, CredentialStore, RequestSigner,
        RequestValidator, Secret, SecurityLayer, SigningPolicy,
    },
    upstream::{
        build_shared_client, CircuitBreakerConfig, Endpoint, EndpointRegistry,
        EndpointSettings, HttpClient, HttpClientConfig, SelectionWeights,
    },
};
use std::{sync::Arc, time::Duration};
use tokio::sync::broadcast;

const BASE58_ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// A valid, distinct 32-character base58 address for index `n` (< 3364).
#[must_use]
pub fn test_address(n: usize) -> String {
    let hi = BASE58_ALPHABET[(n / 58) % 58] as char;
    let lo = BASE58_ALPHABET[n % 58] as char;
    format!("{}{hi}{lo}", "1".repeat(30))
}

/// A valid 88-character base58 transaction signature.
#[must_use]
pub fn test_signature(n: usize) -> String {
    let lo = BASE58_ALPHABET[n % 58] as char;
    format!("{}{lo}", "5".repeat(87))
}

/// An account payload as returned inside `getAccountInfo`/`getMultipleAccounts` values.
#[must_use]
pub fn account_json(lamports: u64) -> Value {
    json!({
        "lamports": lamports,
        "owner": "11111111111111111111111111111111",
        "data": ["", "base64"],
        "executable": false,
        "rentEpoch": 361,
        "space": 0
    })
}

/// A signature status entry for `getSignatureStatuses`.
#[must_use]
pub fn status_json(slot: u64, confirmation_status: &str) -> Value {
    json!({
        "slot": slot,
        "confirmations": null,
        "err": null,
        "confirmationStatus": confirmation_status
    })
}

struct EndpointSpec {
    name: String,
    url: String,
    priority: u8,
    credential: Option<(Secret, CredentialPlacement, DateTime<Utc>)>,
    signing_key: Option<Secret>,
}

/// A manager under test plus the handles tests poke at.
pub struct ManagerHarness {
    pub manager: Arc<ConnectionManager>,
    pub events: EventBus,
    shutdown: broadcast::Sender<()>,
}

impl ManagerHarness {
    #[must_use]
    pub fn builder() -> ManagerHarnessBuilder {
        ManagerHarnessBuilder::default()
    }
}

impl Drop for ManagerHarness {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

/// Builds a [`ManagerHarness`] with generous rate budgets and short timeouts.
pub struct ManagerHarnessBuilder {
    endpoints: Vec<EndpointSpec>,
    breaker: CircuitBreakerConfig,
    credential_policy: CredentialPolicy,
    settings: ManagerSettings,
    batch: BatchConfig,
    rate_limit_rps: u32,
    timeout: Duration,
}

impl Default for ManagerHarnessBuilder {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            breaker: CircuitBreakerConfig::default(),
            credential_policy: CredentialPolicy::default(),
            settings: ManagerSettings {
                confirm_poll_interval: Duration::from_millis(10),
                ..ManagerSettings::default()
            },
            batch: BatchConfig::default(),
            rate_limit_rps: 10_000,
            timeout: Duration::from_secs(5),
        }
    }
}

impl ManagerHarnessBuilder {
    #[must_use]
    pub fn endpoint(mut self, name: &str, url: String, priority: u8) -> Self {
        self.endpoints.push(EndpointSpec {
            name: name.to_string(),
            url,
            priority,
            credential: None,
            signing_key: None,
        });
        self
    }

    /// Attaches a credential to the most recently added endpoint.
    #[must_use]
    pub fn credential(
        mut self,
        secret: &str,
        placement: CredentialPlacement,
        created_at: DateTime<Utc>,
    ) -> Self {
        if let Some(endpoint) = self.endpoints.last_mut() {
            endpoint.credential = Some((Secret::new(secret), placement, created_at));
        }
        self
    }

    /// Attaches an HMAC signing key to the most recently added endpoint.
    #[must_use]
    pub fn signing_key(mut self, key: &str) -> Self {
        if let Some(endpoint) = self.endpoints.last_mut() {
            endpoint.signing_key = Some(Secret::new(key));
        }
        self
    }

    #[must_use]
    pub fn breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    #[must_use]
    pub fn credential_policy(mut self, policy: CredentialPolicy) -> Self {
        self.credential_policy = policy;
        self
    }

    #[must_use]
    pub fn ttl(mut self, ttl: TtlPolicy) -> Self {
        self.settings.ttl = ttl;
        self
    }

    /// Disables caching for every method.
    #[must_use]
    pub fn no_cache(self) -> Self {
        self.ttl(TtlPolicy {
            realtime: Duration::ZERO,
            account: Duration::ZERO,
            token: Duration::ZERO,
            discovery: Duration::ZERO,
            signatures: Duration::ZERO,
            transaction: Duration::ZERO,
            default: Duration::ZERO,
        })
    }

    #[must_use]
    pub fn confirm_retries(mut self, retries: u32) -> Self {
        self.settings.confirm_max_retries = retries;
        self
    }

    #[must_use]
    pub fn batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    /// Sets the timeout of every request category.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn rate_limit_rps(mut self, rps: u32) -> Self {
        self.rate_limit_rps = rps;
        self
    }

    /// Builds the manager and starts its rate-limit ticker. Must run inside a Tokio
    /// runtime.
    ///
    /// # Panics
    ///
    /// Panics if an endpoint URL is invalid.
    #[must_use]
    pub fn build(self) -> ManagerHarness {
        let events = EventBus::new(256);
        let client = build_shared_client().expect("http client");
        let credentials = CredentialStore::new(self.credential_policy, events.clone());
        let signer = RequestSigner::new(SigningPolicy::default());

        let endpoints = self
            .endpoints
            .into_iter()
            .map(|spec| {
                if let Some((secret, placement, created_at)) = spec.credential {
                    credentials.insert_created_at(&spec.name, secret, placement, created_at);
                }
                if let Some(key) = &spec.signing_key {
                    signer.register_key(&spec.name, key);
                }
                let endpoint = Endpoint::new(
                    EndpointSettings {
                        name: spec.name,
                        url: spec.url,
                        priority: spec.priority,
                        rate_limit_rps: self.rate_limit_rps,
                    },
                    self.breaker.clone(),
                    HttpClient::new(client.clone(), HttpClientConfig::default()),
                    Duration::from_secs(60),
                    events.clone(),
                )
                .expect("valid endpoint");
                Arc::new(endpoint)
            })
            .collect();

        let limiter = Arc::new(RateLimiter::new(LimiterConfig::default(), events.clone()));
        let (shutdown, _) = broadcast::channel(4);
        let _ticker = limiter.start_ticker_with_shutdown(shutdown.subscribe());

        let manager = Arc::new(ConnectionManager::new(ManagerComponents {
            registry: EndpointRegistry::new(endpoints, SelectionWeights::default()),
            cache: Arc::new(TieredCache::new(CacheConfig::default())),
            limiter,
            security: Arc::new(SecurityLayer::new(
                RequestValidator::default(),
                Arc::new(credentials),
                signer,
            )),
            metrics: Arc::new(MetricsCollector::new()),
            events: events.clone(),
            batch: self.batch,
            timeouts: CategoryTimeouts {
                discovery: self.timeout,
                token_info: self.timeout,
                transaction: self.timeout,
                account: self.timeout,
            },
            settings: self.settings,
            shutdown: shutdown.clone(),
        }));

        ManagerHarness { manager, events, shutdown }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_addresses_are_distinct_and_valid() {
        let addresses: HashSet<String> = (0..200).map(test_address).collect();
        assert_eq!(addresses.len(), 200);
        assert!(addresses.iter().all(|address| address.len() == 32));
    }

    #[test]
    fn test_signature_shape() {
        assert_eq!(test_signature(3).len(), 88);
    }
}
