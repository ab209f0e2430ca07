//! Metrics HTTP Server
//!
//! Pull-based exposition of the automaton metrics. The server lives for the
//! whole process and is not tied to the automaton's cancellation.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::MetricsConfig;
use crate::error::{Error, Result};
use crate::metrics::Metrics;

const TEXT_FORMAT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// HTTP server exposing a [`Metrics`] registry
pub struct MetricsServer {
    config: MetricsConfig,
    metrics: Arc<Metrics>,
}

impl MetricsServer {
    /// Create a new metrics server
    pub fn new(config: MetricsConfig, metrics: Arc<Metrics>) -> Self {
        Self { config, metrics }
    }

    /// Create the router
    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.config.path, get(handle_metrics))
            .route("/health", get(handle_health))
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&self.metrics))
    }

    /// Bind the listen socket. Failing here is reported to the caller
    /// instead of being lost inside the serving task.
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(&self.config.bind_address)
            .await
            .map_err(|e| Error::Network(format!("Metrics bind {}: {}", self.config.bind_address, e)))?;
        tracing::info!("Metrics listening on {}{}", self.config.bind_address, self.config.path);
        Ok(listener)
    }

    /// Serve on an already bound listener until the process exits
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        axum::serve(listener, self.router())
            .await
            .map_err(|e| Error::Network(format!("Metrics server error: {}", e)))
    }

    /// Bind, then serve from a background task
    pub async fn spawn(self) -> Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
        let listener = self.bind().await?;
        let address = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            if let Err(e) = self.serve(listener).await {
                tracing::error!("{}", e);
            }
        });
        Ok((address, handle))
    }
}

/// Health response
#[derive(Serialize, Deserialize)]
struct HealthResponse {
    healthy: bool,
}

async fn handle_metrics(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    (StatusCode::OK, [(header::CONTENT_TYPE, TEXT_FORMAT)], metrics.render())
}

async fn handle_health() -> impl IntoResponse {
    Json(HealthResponse { healthy: true })
}
