mod middleware;
mod router;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    serve, Router,
};
use solgate_core::{config::AppConfig, manager::ConnectionManager, runtime::SolgateRuntime};
use std::{sync::Arc, time::Duration};
use tokio::signal;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer};
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Request bodies above this size are rejected before parsing.
const MAX_BODY_BYTES: usize = 1024 * 1024;

const MAX_CONCURRENT_REQUESTS: usize = 1024;

/// Upper bound on one HTTP request, above the slowest per-category upstream timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// `RUST_LOG` wins over the configured level.
fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,solgate_core={level},solgate={level},solgate_tests={level}",
            level = config.log_level
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.log_format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_target(false);
        registry.with(fmt_layer).init();
    }
}

fn create_app(manager: Arc<ConnectionManager>, metrics_enabled: bool) -> Router {
    let (set_request_id, propagate_request_id) = middleware::request_id_layers();

    let mut public = Router::new().route("/health", get(router::handle_health));
    if metrics_enabled {
        public = public.route("/metrics", get(router::handle_metrics));
    }

    let rpc = Router::new()
        .route("/", post(router::handle_rpc))
        .layer(ConcurrencyLimitLayer::new(MAX_CONCURRENT_REQUESTS))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT));

    public
        .merge(rpc)
        .with_state(manager)
        .layer(middleware::trace_layer())
        .layer(propagate_request_id)
        .layer(set_request_id)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;
    init_logging(&config);
    info!("Starting solgate");
    debug!(
        endpoints_count = config.endpoints.len(),
        metrics_enabled = config.metrics_enabled,
        port = config.metrics_port,
        "Configuration loaded"
    );

    let addr = config.socket_addr()?;
    let metrics_enabled = config.metrics_enabled;
    let runtime = SolgateRuntime::builder()
        .with_config(config)
        .enable_health_prober()
        .build()
        .context("Failed to initialize runtime")?;

    let app = create_app(Arc::clone(runtime.manager()), metrics_enabled);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(address = %addr, "solgate listening");

    if let Err(e) = serve(listener, app).with_graceful_shutdown(shutdown_signal()).await {
        error!(error = %e, "Server error occurred");
    }

    runtime.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                () = std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}
