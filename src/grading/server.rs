use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::trace::TraceLayer;

use super::api::{self, AppState};
use super::authorizer::RepositoryAuthorizer;
use super::dispatcher::EventDispatcher;
use super::pipeline::GradingPipeline;
use super::signature::SignatureVerifier;
use crate::config::GraderConfig;

/// Build the full application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    api::api_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Wire the components described by `config` into shared state.
pub fn build_state(config: &GraderConfig) -> Result<Arc<AppState>> {
    config.validate().context("Invalid configuration")?;

    let verifier = SignatureVerifier::new(&config.secret).context("Invalid webhook secret")?;
    let authorizer = RepositoryAuthorizer::new(&config.allowed_repos);
    let pipeline = Arc::new(GradingPipeline::from_config(config));

    Ok(Arc::new(AppState {
        dispatcher: EventDispatcher::new(verifier, authorizer, pipeline),
        port: config.port,
    }))
}

/// Start the grading server and block until it shuts down.
///
/// Runs still in flight at shutdown get `shutdown_grace` to finish.
pub async fn start_server(config: GraderConfig) -> Result<()> {
    let state = build_state(&config)?;
    std::fs::create_dir_all(&config.submissions_dir).with_context(|| {
        format!(
            "Failed to create submissions directory {}",
            config.submissions_dir.display()
        )
    })?;

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    let local_addr = listener.local_addr()?;
    tracing::info!(
        addr = %local_addr,
        repos = config.allowed_repos.len(),
        assignment = %config.assignment,
        image = %config.sandbox.image,
        "grading server listening"
    );

    axum::serve(listener, build_router(Arc::clone(&state)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    drain(&state, config.shutdown_grace()).await;
    tracing::info!("server shut down gracefully");
    Ok(())
}

/// Time cancelled runs get to remove their containers and workspaces.
const TEARDOWN_GRACE: Duration = Duration::from_secs(30);

/// Stop accepting new runs and wait up to `grace` for running ones. Runs
/// still going after that are cancelled, and their teardown is awaited.
async fn drain(state: &AppState, grace: Duration) {
    let tracker = state.dispatcher.tracker();
    tracker.close();
    if tracker.is_empty() {
        return;
    }
    tracing::info!(in_flight = tracker.len(), "waiting for grading runs to finish");
    if tokio::time::timeout(grace, tracker.wait()).await.is_ok() {
        return;
    }

    tracing::warn!(
        in_flight = tracker.len(),
        grace_secs = grace.as_secs(),
        "cancelling grading runs still in flight at shutdown"
    );
    state.dispatcher.pipeline().cancel();
    if tokio::time::timeout(TEARDOWN_GRACE, tracker.wait()).await.is_err() {
        tracing::error!(in_flight = tracker.len(), "grading runs did not finish teardown");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown requested");
}
