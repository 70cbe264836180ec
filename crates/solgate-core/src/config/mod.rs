//! Flat, validated application configuration.
//!
//! # Loading order
//!
//! Later layers override earlier ones:
//!
//! 1. **Compiled defaults**: the [`Default`] implementation of [`AppConfig`]
//! 2. **Config file**: TOML named by `SOLGATE_CONFIG` (default `config/solgate.toml`,
//!    optional)
//! 3. **Environment**: `SOLGATE__<OPTION>` variables, e.g. `SOLGATE__METRICS_PORT=9100`
//!
//! Provider secrets never live in the file. Each endpoint names the environment variables
//! holding its credential, signing key and optionally its URL; they are read once by
//! [`AppConfig::resolve_endpoints`].
//!
//! # Example
//!
//! ```toml
//! metrics_port = 9090
//! cache_context = "mainnet-beta"
//!
//! [[endpoints]]
//! name = "premium"
//! url = "https://rpc.example.com"
//! priority = 10
//! rate_limit_rps = 50
//! credential_env = "PREMIUM_API_KEY"
//! credential_placement = "query:api-key"
//!
//! [[endpoints]]
//! name = "public"
//! url = "https://api.mainnet-beta.solana.com"
//! priority = 1
//! ```

use crate::{
    batch::BatchConfig,
    cache::{CacheConfig, TtlPolicy},
    limiter::LimiterConfig,
    manager::{CategoryTimeouts, ManagerSettings},
    security::{CredentialPlacement, CredentialPolicy, Secret, SigningPolicy, ValidationLimits},
    upstream::{CircuitBreakerConfig, EndpointSettings, HttpClientConfig},
};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, path::Path, time::Duration};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Environment variable {var} for endpoint {endpoint} is not set")]
    MissingEnv { endpoint: String, var: String },
}

/// One upstream provider as written in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub name: String,

    /// Base URL. Overridden by the variable named in `url_env` when that is set.
    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub url_env: Option<String>,

    /// 0..=10, higher is preferred.
    #[serde(default = "default_priority")]
    pub priority: u8,

    #[serde(default = "default_rate_limit_rps")]
    pub rate_limit_rps: u32,

    /// Variable holding the provider credential. Public endpoints leave it unset.
    #[serde(default)]
    pub credential_env: Option<String>,

    /// `"bearer"`, `"header:<name>"` or `"query:<name>"`.
    #[serde(default = "default_credential_placement")]
    pub credential_placement: String,

    /// Variable holding the HMAC key used to sign sensitive calls.
    #[serde(default)]
    pub signing_key_env: Option<String>,

    /// Overrides `max_connections_per_endpoint`.
    #[serde(default)]
    pub max_connections: Option<usize>,
}

fn default_priority() -> u8 {
    5
}

fn default_rate_limit_rps() -> u32 {
    10
}

fn default_credential_placement() -> String {
    "query:api-key".to_string()
}

/// An endpoint with its environment-provided secrets read.
#[derive(Debug, Clone)]
pub struct ResolvedEndpoint {
    pub settings: EndpointSettings,
    pub credential: Option<(Secret, CredentialPlacement)>,
    pub signing_key: Option<Secret>,
    pub max_connections: usize,
}

/// Every recognized option. Durations are milliseconds unless the name ends in `_secs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Mixed into cache keys, typically the cluster name.
    pub cache_context: String,
    pub log_level: String,
    /// `"json"` or `"pretty"`.
    pub log_format: String,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
    pub bind_address: String,

    pub breaker_failure_threshold: u32,
    pub breaker_monitoring_window_ms: u64,
    pub breaker_recovery_timeout_ms: u64,
    pub breaker_backoff_multiplier: f64,
    pub breaker_max_backoff_ms: u64,

    pub cache_hot_max_entries: usize,
    pub cache_main_max_entries: usize,
    pub cache_promotion_threshold: u32,
    pub cache_small_object_bytes: usize,
    pub cache_sweep_interval_ms: u64,

    pub ttl_realtime_ms: u64,
    pub ttl_account_ms: u64,
    pub ttl_token_ms: u64,
    pub ttl_discovery_ms: u64,
    pub ttl_signatures_ms: u64,
    pub ttl_transaction_ms: u64,
    pub ttl_default_ms: u64,

    pub share_discovery: f64,
    pub share_token_info: f64,
    pub share_transaction: f64,
    pub share_account: f64,
    pub rate_window_ms: u64,
    pub borrow_min_priority: u8,
    pub max_queue_depth: usize,

    pub batch_window_ms: u64,
    pub batch_max_accounts: usize,
    pub batch_max_signatures: usize,

    pub timeout_discovery_ms: u64,
    pub timeout_token_ms: u64,
    pub timeout_transaction_ms: u64,
    pub timeout_account_ms: u64,

    pub probe_interval_ms: u64,
    pub probe_method: String,
    pub reactivation_base_cooldown_ms: u64,

    pub credential_max_age_secs: u64,
    /// 0 disables scheduled rotation.
    pub credential_rotation_interval_secs: u64,
    pub anomaly_spike_factor: f64,
    pub anomaly_rapid_call_ms: u64,
    pub anomaly_rapid_call_burst: u32,

    pub nonce_window_ms: u64,
    pub large_query_threshold: usize,
    pub max_param_bytes: usize,
    pub max_string_len: usize,

    pub confirm_max_retries: u32,
    pub confirm_poll_interval_ms: u64,
    pub event_buffer: usize,
    pub stream_buffer: usize,
    pub max_connections_per_endpoint: usize,

    pub endpoints: Vec<EndpointConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_context: "mainnet-beta".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            metrics_port: 9090,
            bind_address: "127.0.0.1".to_string(),

            breaker_failure_threshold: 5,
            breaker_monitoring_window_ms: 60_000,
            breaker_recovery_timeout_ms: 30_000,
            breaker_backoff_multiplier: 2.0,
            breaker_max_backoff_ms: 300_000,

            cache_hot_max_entries: 1_000,
            cache_main_max_entries: 10_000,
            cache_promotion_threshold: 3,
            cache_small_object_bytes: 10_240,
            cache_sweep_interval_ms: 60_000,

            ttl_realtime_ms: 1_000,
            ttl_account_ms: 5_000,
            ttl_token_ms: 300_000,
            ttl_discovery_ms: 30_000,
            ttl_signatures_ms: 10_000,
            ttl_transaction_ms: 3_600_000,
            ttl_default_ms: 30_000,

            share_discovery: 0.40,
            share_token_info: 0.20,
            share_transaction: 0.25,
            share_account: 0.15,
            rate_window_ms: 1_000,
            borrow_min_priority: 7,
            max_queue_depth: 1_000,

            batch_window_ms: 20,
            batch_max_accounts: 100,
            batch_max_signatures: 256,

            timeout_discovery_ms: 30_000,
            timeout_token_ms: 10_000,
            timeout_transaction_ms: 15_000,
            timeout_account_ms: 8_000,

            probe_interval_ms: 30_000,
            probe_method: "getSlot".to_string(),
            reactivation_base_cooldown_ms: 10_000,

            credential_max_age_secs: 7_776_000,
            credential_rotation_interval_secs: 0,
            anomaly_spike_factor: 10.0,
            anomaly_rapid_call_ms: 10,
            anomaly_rapid_call_burst: 50,

            nonce_window_ms: 300_000,
            large_query_threshold: 50,
            max_param_bytes: 65_536,
            max_string_len: 4_096,

            confirm_max_retries: 30,
            confirm_poll_interval_ms: 2_000,
            event_buffer: 1_024,
            stream_buffer: 256,
            max_connections_per_endpoint: 64,

            endpoints: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Loads defaults, then the TOML file at `config_path` if it exists, then
    /// `SOLGATE__*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if the file or environment cannot be parsed.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("SOLGATE").separator("__").try_parsing(true))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Loads from the file named by `SOLGATE_CONFIG`, defaulting to
    /// `config/solgate.toml`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if the configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("SOLGATE_CONFIG").unwrap_or_else(|_| "config/solgate.toml".to_string());
        Self::from_file(&config_path)
    }

    /// Checks the configuration for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid(message));

        if self.endpoints.is_empty() {
            return invalid("No RPC endpoints configured".to_string());
        }

        let mut names = HashSet::new();
        for endpoint in &self.endpoints {
            if endpoint.name.is_empty() {
                return invalid("Endpoint name must not be empty".to_string());
            }
            if !names.insert(endpoint.name.as_str()) {
                return invalid(format!("Duplicate endpoint name: {}", endpoint.name));
            }
            // a url_env endpoint may leave url empty until resolution
            if endpoint.url_env.is_none() || !endpoint.url.is_empty() {
                if let Err(e) = url::Url::parse(&endpoint.url) {
                    return invalid(format!("Invalid URL for endpoint {}: {e}", endpoint.name));
                }
            }
            if endpoint.rate_limit_rps == 0 {
                return invalid(format!(
                    "Rate limit must be greater than 0 for endpoint {}",
                    endpoint.name
                ));
            }
            if endpoint.priority > 10 {
                return invalid(format!(
                    "Priority must be within 0..=10 for endpoint {}",
                    endpoint.name
                ));
            }
            if endpoint.max_connections == Some(0) {
                return invalid(format!(
                    "Max connections must be greater than 0 for endpoint {}",
                    endpoint.name
                ));
            }
            if let Err(e) = endpoint.credential_placement.parse::<CredentialPlacement>() {
                return invalid(format!("Endpoint {}: {e}", endpoint.name));
            }
        }

        let shares = self.category_shares();
        let share_sum: f64 = shares.iter().sum();
        if (share_sum - 1.0).abs() > 0.001 {
            return invalid(format!("Category shares must sum to 1, got {share_sum:.3}"));
        }
        if shares.iter().any(|share| *share < 0.0)
        {
            return invalid("Category shares must not be negative".to_string());
        }

        if self.cache_hot_max_entries > self.cache_main_max_entries {
            return invalid("Hot cache tier cannot be larger than the main tier".to_string());
        }
        if self.breaker_backoff_multiplier < 1.0 {
            return invalid("Breaker backoff multiplier must be at least 1".to_string());
        }
        if self.breaker_failure_threshold == 0 {
            return invalid("Breaker failure threshold must be greater than 0".to_string());
        }

        let windows = [
            ("breaker_monitoring_window_ms", self.breaker_monitoring_window_ms),
            ("breaker_recovery_timeout_ms", self.breaker_recovery_timeout_ms),
            ("cache_sweep_interval_ms", self.cache_sweep_interval_ms),
            ("rate_window_ms", self.rate_window_ms),
            ("batch_window_ms", self.batch_window_ms),
            ("timeout_discovery_ms", self.timeout_discovery_ms),
            ("timeout_token_ms", self.timeout_token_ms),
            ("timeout_transaction_ms", self.timeout_transaction_ms),
            ("timeout_account_ms", self.timeout_account_ms),
            ("probe_interval_ms", self.probe_interval_ms),
            ("nonce_window_ms", self.nonce_window_ms),
            ("confirm_poll_interval_ms", self.confirm_poll_interval_ms),
        ];
        if let Some((name, _)) = windows.iter().find(|(_, value)| *value == 0) {
            return invalid(format!("{name} must be greater than 0"));
        }

        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return invalid(format!(
                "Log format must be \"json\" or \"pretty\", got {}",
                self.log_format
            ));
        }
        Ok(())
    }

    /// Reads every endpoint's environment-provided URL override, credential and signing
    /// key from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnv`] when a named variable is not set.
    pub fn resolve_endpoints(&self) -> Result<Vec<ResolvedEndpoint>, ConfigError> {
        self.resolve_endpoints_with(|var| std::env::var(var).ok())
    }

    /// [`AppConfig::resolve_endpoints`] with an injectable variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnv`] when a named variable is not found, or
    /// [`ConfigError::Invalid`] for an unparseable credential placement.
    pub fn resolve_endpoints_with<F>(&self, lookup: F) -> Result<Vec<ResolvedEndpoint>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |endpoint: &EndpointConfig, var: &str| {
            lookup(var).filter(|value| !value.is_empty()).ok_or_else(|| ConfigError::MissingEnv {
                endpoint: endpoint.name.clone(),
                var: var.to_string(),
            })
        };

        self.endpoints
            .iter()
            .map(|endpoint| {
                let url = match &endpoint.url_env {
                    Some(var) => lookup(var)
                        .filter(|value| !value.is_empty())
                        .unwrap_or_else(|| endpoint.url.clone()),
                    None => endpoint.url.clone(),
                };
                let credential = match &endpoint.credential_env {
                    Some(var) => {
                        let placement = endpoint
                            .credential_placement
                            .parse::<CredentialPlacement>()
                            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
                        Some((Secret::new(required(endpoint, var)?), placement))
                    }
                    None => None,
                };
                let signing_key = match &endpoint.signing_key_env {
                    Some(var) => Some(Secret::new(required(endpoint, var)?)),
                    None => None,
                };

                Ok(ResolvedEndpoint {
                    settings: EndpointSettings {
                        name: endpoint.name.clone(),
                        url,
                        priority: endpoint.priority,
                        rate_limit_rps: endpoint.rate_limit_rps,
                    },
                    credential,
                    signing_key,
                    max_connections: endpoint
                        .max_connections
                        .unwrap_or(self.max_connections_per_endpoint),
                })
            })
            .collect()
    }

    #[must_use]
    pub fn circuit_breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.breaker_failure_threshold,
            monitoring_window: Duration::from_millis(self.breaker_monitoring_window_ms),
            recovery_timeout: Duration::from_millis(self.breaker_recovery_timeout_ms),
            backoff_multiplier: self.breaker_backoff_multiplier,
            max_backoff: Duration::from_millis(self.breaker_max_backoff_ms),
        }
    }

    #[must_use]
    pub fn cache(&self) -> CacheConfig {
        CacheConfig {
            hot_max_entries: self.cache_hot_max_entries,
            main_max_entries: self.cache_main_max_entries,
            promotion_threshold: self.cache_promotion_threshold,
            small_object_bytes: self.cache_small_object_bytes,
        }
    }

    #[must_use]
    pub fn ttl_policy(&self) -> TtlPolicy {
        TtlPolicy {
            realtime: Duration::from_millis(self.ttl_realtime_ms),
            account: Duration::from_millis(self.ttl_account_ms),
            token: Duration::from_millis(self.ttl_token_ms),
            discovery: Duration::from_millis(self.ttl_discovery_ms),
            signatures: Duration::from_millis(self.ttl_signatures_ms),
            transaction: Duration::from_millis(self.ttl_transaction_ms),
            default: Duration::from_millis(self.ttl_default_ms),
        }
    }

    /// Category shares in [`RequestCategory::index`](crate::types::RequestCategory::index)
    /// order.
    fn category_shares(&self) -> [f64; 4] {
        [self.share_discovery, self.share_token_info, self.share_transaction, self.share_account]
    }

    #[must_use]
    pub fn limiter(&self) -> LimiterConfig {
        LimiterConfig {
            window: Duration::from_millis(self.rate_window_ms),
            shares: self.category_shares(),
            borrow_min_priority: self.borrow_min_priority,
            max_queue_depth: self.max_queue_depth,
        }
    }

    #[must_use]
    pub fn batch(&self) -> BatchConfig {
        BatchConfig {
            window: Duration::from_millis(self.batch_window_ms),
            max_accounts: self.batch_max_accounts,
            max_signatures: self.batch_max_signatures,
        }
    }

    #[must_use]
    pub fn timeouts(&self) -> CategoryTimeouts {
        CategoryTimeouts {
            discovery: Duration::from_millis(self.timeout_discovery_ms),
            token_info: Duration::from_millis(self.timeout_token_ms),
            transaction: Duration::from_millis(self.timeout_transaction_ms),
            account: Duration::from_millis(self.timeout_account_ms),
        }
    }

    #[must_use]
    pub fn credential_policy(&self) -> CredentialPolicy {
        CredentialPolicy {
            max_age: Duration::from_secs(self.credential_max_age_secs),
            rotation_interval: (self.credential_rotation_interval_secs > 0)
                .then(|| Duration::from_secs(self.credential_rotation_interval_secs)),
            spike_factor: self.anomaly_spike_factor,
            rapid_call: Duration::from_millis(self.anomaly_rapid_call_ms),
            rapid_burst: self.anomaly_rapid_call_burst,
        }
    }

    #[must_use]
    pub fn signing_policy(&self) -> SigningPolicy {
        SigningPolicy {
            large_query_threshold: self.large_query_threshold,
            nonce_window: Duration::from_millis(self.nonce_window_ms),
        }
    }

    #[must_use]
    pub fn validation_limits(&self) -> ValidationLimits {
        ValidationLimits {
            max_param_bytes: self.max_param_bytes,
            max_string_len: self.max_string_len,
            max_accounts: self.batch_max_accounts,
            max_signatures: self.batch_max_signatures,
            ..ValidationLimits::default()
        }
    }

    #[must_use]
    pub fn http_client(&self, max_connections: usize) -> HttpClientConfig {
        HttpClientConfig { concurrent_limit: max_connections, ..HttpClientConfig::default() }
    }

    #[must_use]
    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            cache_context: self.cache_context.clone(),
            ttl: self.ttl_policy(),
            confirm_max_retries: self.confirm_max_retries,
            confirm_poll_interval: Duration::from_millis(self.confirm_poll_interval_ms),
            stream_buffer: self.stream_buffer,
        }
    }

    #[must_use]
    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.cache_sweep_interval_ms)
    }

    #[must_use]
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    #[must_use]
    pub fn reactivation_base_cooldown(&self) -> Duration {
        Duration::from_millis(self.reactivation_base_cooldown_ms)
    }

    /// Socket address for the HTTP surface.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `bind_address` and `metrics_port` do not form
    /// a valid socket address.
    pub fn socket_addr(&self) -> Result<std::net::SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_address, self.metrics_port).parse().map_err(|_| {
            ConfigError::Invalid(format!(
                "Invalid socket address: {}:{}",
                self.bind_address, self.metrics_port
            ))
        })
    }
}
