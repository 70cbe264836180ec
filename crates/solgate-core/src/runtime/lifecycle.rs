//! Runtime lifecycle: background tasks and graceful shutdown.

use crate::{
    cache::start_sweep_with_shutdown,
    config::AppConfig,
    manager::ConnectionManager,
    security::{CredentialStore, SecurityLayer},
    upstream::HealthProber,
};
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::broadcast, task::JoinHandle, time::interval};
use tracing::{debug, error, info, warn};

use super::builder::SolgateRuntimeBuilder;

const ROTATION_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Owns the connection manager and every background task.
///
/// All tasks listen on one broadcast channel. [`SolgateRuntime::shutdown`] signals it and
/// waits for each task to finish.
pub struct SolgateRuntime {
    manager: Arc<ConnectionManager>,
    prober: Option<Arc<HealthProber>>,
    shutdown_tx: broadcast::Sender<()>,
    config: AppConfig,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    shutdown_initiated: AtomicBool,
}

impl SolgateRuntime {
    #[must_use]
    pub fn builder() -> SolgateRuntimeBuilder {
        SolgateRuntimeBuilder::new()
    }

    pub(super) fn new(
        manager: Arc<ConnectionManager>,
        prober: Option<Arc<HealthProber>>,
        shutdown_tx: broadcast::Sender<()>,
        config: AppConfig,
        enable_cache_sweep: bool,
    ) -> Self {
        let mut tasks = Vec::new();

        if enable_cache_sweep {
            tasks.push((
                "cache_sweep",
                start_sweep_with_shutdown(
                    Arc::clone(manager.cache()),
                    config.cache_sweep_interval(),
                    shutdown_tx.subscribe(),
                ),
            ));
        }
        tasks.push((
            "rate_limit_ticker",
            manager.limiter().start_ticker_with_shutdown(shutdown_tx.subscribe()),
        ));
        tasks.push((
            "nonce_purge",
            start_nonce_purge(
                Arc::clone(manager.security()),
                Duration::from_millis(config.nonce_window_ms),
                shutdown_tx.subscribe(),
            ),
        ));
        tasks.push((
            "credential_rotation",
            start_rotation_check(
                Arc::clone(manager.security().credentials()),
                ROTATION_CHECK_INTERVAL,
                shutdown_tx.subscribe(),
            ),
        ));
        if let Some(prober) = &prober {
            let handle = Arc::clone(prober).start_with_shutdown(shutdown_tx.subscribe());
            tasks.push(("health_prober", handle));
        }
        debug!(tasks = tasks.len(), "background tasks started");

        Self {
            manager,
            prober,
            shutdown_tx,
            config,
            tasks: Mutex::new(tasks),
            shutdown_initiated: AtomicBool::new(false),
        }
    }

    /// The single connection manager for this process.
    #[must_use]
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    #[must_use]
    pub fn prober(&self) -> Option<&Arc<HealthProber>> {
        self.prober.as_ref()
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Creates a new shutdown receiver for external shutdown coordination.
    #[must_use]
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Signals every background task to stop and waits for them. Safe to call more than
    /// once; later calls return immediately.
    pub async fn shutdown(&self) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Shutdown already initiated, ignoring duplicate call");
            return;
        }

        info!("Initiating solgate runtime shutdown");
        if let Err(e) = self.shutdown_tx.send(()) {
            warn!(error = %e, "Failed to send shutdown signal (no receivers)");
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for (name, handle) in tasks {
            match handle.await {
                Ok(()) => debug!(task = name, "background task stopped"),
                Err(e) if e.is_cancelled() => debug!(task = name, "background task cancelled"),
                Err(e) => error!(task = name, error = %e, "background task failed"),
            }
        }

        info!("solgate runtime shutdown complete");
    }

    /// Waits for a shutdown signal from any holder of the channel, then cleans up.
    pub async fn wait_for_shutdown(&self) {
        if self.is_shutdown() {
            return;
        }
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let _ = shutdown_rx.recv().await;
        info!("Shutdown signal received, runtime terminating");
        self.shutdown().await;
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown_initiated.load(Ordering::SeqCst)
    }
}

fn start_nonce_purge(
    security: Arc<SecurityLayer>,
    every: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval(every);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let purged = security.signer().purge_nonces();
                    if purged > 0 {
                        debug!(purged = purged, "expired nonces purged");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("nonce purge shutting down");
                    break;
                }
            }
        }
    })
}

fn start_rotation_check(
    credentials: Arc<CredentialStore>,
    every: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval(every);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let rotated = credentials.rotate_due().await;
                    if !rotated.is_empty() {
                        info!(services = ?rotated, "credentials rotated");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("credential rotation check shutting down");
                    break;
                }
            }
        }
    })
}

const _: () = {
    const fn assert_send<T: Send>() {}
    const fn assert_sync<T: Sync>() {}
    let _ = assert_send::<SolgateRuntime>;
    let _ = assert_sync::<SolgateRuntime>;
};
