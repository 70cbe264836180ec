//! Builder wiring configuration into a running [`SolgateRuntime`].

use crate::{
    cache::TieredCache,
    config::{AppConfig, ConfigError},
    events::EventBus,
    limiter::RateLimiter,
    manager::{ConnectionManager, ManagerComponents},
    metrics::MetricsCollector,
    security::{CredentialRotator, CredentialStore, RequestSigner, RequestValidator, SecurityLayer},
    upstream::{
        build_shared_client, Endpoint, EndpointRegistry, HealthProber, HttpClient, SelectionWeights,
        UpstreamError,
    },
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::lifecycle::SolgateRuntime;

/// Errors that can occur during runtime initialization.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("No configuration provided")]
    MissingConfig,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to initialize endpoint {name}: {source}")]
    Endpoint {
        name: String,
        #[source]
        source: UpstreamError,
    },

    /// Generic initialization error
    #[error("Runtime initialization failed: {0}")]
    Initialization(String),
}

#[derive(Clone)]
struct RuntimeOptions {
    enable_health_prober: bool,
    enable_cache_sweep: bool,
    shutdown_channel_capacity: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            enable_health_prober: false,
            enable_cache_sweep: true,
            shutdown_channel_capacity: 16,
        }
    }
}

/// Builder for a [`SolgateRuntime`].
///
/// # Examples
///
/// ```no_run
/// # use solgate_core::{config::AppConfig, runtime::SolgateRuntimeBuilder};
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = AppConfig::load()?;
///
/// let runtime = SolgateRuntimeBuilder::new()
///     .with_config(config)
///     .enable_health_prober()
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct SolgateRuntimeBuilder {
    config: Option<AppConfig>,
    rotator: Option<Arc<dyn CredentialRotator>>,
    options: RuntimeOptions,
}

impl SolgateRuntimeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self { config: None, rotator: None, options: RuntimeOptions::default() }
    }

    #[must_use]
    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Registers the callback that issues fresh provider credentials on scheduled or
    /// anomaly-triggered rotation.
    #[must_use]
    pub fn with_credential_rotator(mut self, rotator: Arc<dyn CredentialRotator>) -> Self {
        self.rotator = Some(rotator);
        self
    }

    /// Enables the background prober that calls every active endpoint each
    /// `probe_interval_ms`.
    #[must_use]
    pub fn enable_health_prober(mut self) -> Self {
        self.options.enable_health_prober = true;
        self
    }

    #[must_use]
    pub fn disable_health_prober(mut self) -> Self {
        self.options.enable_health_prober = false;
        self
    }

    #[must_use]
    pub fn disable_cache_sweep(mut self) -> Self {
        self.options.enable_cache_sweep = false;
        self
    }

    /// Sets custom shutdown channel capacity (default: 16).
    #[must_use]
    pub fn with_shutdown_channel_capacity(mut self, capacity: usize) -> Self {
        self.options.shutdown_channel_capacity = capacity.max(1);
        self
    }

    /// Builds the runtime and starts its background tasks. Must be called from within a
    /// Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError` if configuration is missing or invalid, a referenced secret
    /// is not set in the environment, or an endpoint cannot be constructed.
    pub fn build(self) -> Result<SolgateRuntime, RuntimeError> {
        let config = self.config.ok_or(RuntimeError::MissingConfig)?;
        config.validate()?;
        let resolved = config.resolve_endpoints()?;

        info!(
            endpoints_count = resolved.len(),
            health_prober_enabled = self.options.enable_health_prober,
            cache_sweep_enabled = self.options.enable_cache_sweep,
            "Initializing solgate runtime"
        );

        let (shutdown_tx, _) = broadcast::channel::<()>(self.options.shutdown_channel_capacity);
        let events = EventBus::new(config.event_buffer);
        let metrics = Arc::new(MetricsCollector::new());

        let client =
            build_shared_client().map_err(|e| RuntimeError::Initialization(e.to_string()))?;
        let mut credentials = CredentialStore::new(config.credential_policy(), events.clone());
        if let Some(rotator) = self.rotator {
            credentials = credentials.with_rotator(rotator);
        }
        let signer = RequestSigner::new(config.signing_policy());

        let mut endpoints = Vec::with_capacity(resolved.len());
        for endpoint in resolved {
            let name = endpoint.settings.name.clone();
            if let Some((secret, placement)) = endpoint.credential {
                credentials.insert(&name, secret, placement);
            }
            if let Some(key) = &endpoint.signing_key {
                signer.register_key(&name, key);
            }

            let transport =
                HttpClient::new(client.clone(), config.http_client(endpoint.max_connections));
            let built = Endpoint::new(
                endpoint.settings,
                config.circuit_breaker(),
                transport,
                config.reactivation_base_cooldown(),
                events.clone(),
            )
            .map_err(|source| RuntimeError::Endpoint { name: name.clone(), source })?;
            debug!(endpoint = %name, priority = built.priority(), "endpoint initialized");
            endpoints.push(Arc::new(built));
        }

        let security = Arc::new(SecurityLayer::new(
            RequestValidator::new(config.validation_limits()),
            Arc::new(credentials),
            signer,
        ));

        let manager = Arc::new(ConnectionManager::new(ManagerComponents {
            registry: EndpointRegistry::new(endpoints, SelectionWeights::default()),
            cache: Arc::new(TieredCache::new(config.cache())),
            limiter: Arc::new(RateLimiter::new(config.limiter(), events.clone())),
            security,
            metrics: Arc::clone(&metrics),
            events: events.clone(),
            batch: config.batch(),
            timeouts: config.timeouts(),
            settings: config.manager_settings(),
            shutdown: shutdown_tx.clone(),
        }));
        debug!("Connection manager initialized");

        let prober = if self.options.enable_health_prober {
            let prober = HealthProber::new(
                Arc::clone(manager.registry()),
                Arc::clone(manager.security()),
                metrics,
                events,
                config.probe_interval(),
            )
            .with_method(config.probe_method.clone());
            debug!("Health prober initialized");
            Some(Arc::new(prober))
        } else {
            debug!("Health prober disabled");
            None
        };

        let enable_cache_sweep = self.options.enable_cache_sweep;
        let runtime = SolgateRuntime::new(manager, prober, shutdown_tx, config, enable_cache_sweep);
        info!("solgate runtime initialization complete");
        Ok(runtime)
    }
}

impl Default for SolgateRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
