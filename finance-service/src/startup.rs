//! Application startup and lifecycle management.
//!
//! The HTTP surface here is operational only (health/readiness/metrics); the
//! engine's operations are consumed as a library by the API layer.

use crate::config::EngineConfig;
use crate::services::{
    get_metrics, init_metrics, Database, GatewayService, InvoiceService, LedgerService,
    PaymentService, ReportingService,
};
use crate::workers::RenewalWorker;
use axum::{http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use finance_core::error::AppError;
use secrecy::ExposeSecret;
use serde_json::json;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub ledger: LedgerService,
    pub invoices: InvoiceService,
    pub payments: PaymentService,
    pub reporting: ReportingService,
    pub gateway: GatewayService,
    pub config: EngineConfig,
}

/// Health check endpoint for liveness probes.
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": "finance-service",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// Readiness check endpoint.
async fn readiness_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ready" })))
}

/// Prometheus metrics endpoint.
async fn metrics_endpoint() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
    renewal_token: CancellationToken,
    renewal_handle: JoinHandle<()>,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: EngineConfig) -> Result<Self, AppError> {
        let db = Database::new(
            config.database.url.expose_secret(),
            config.database.max_connections,
            config.database.min_connections,
        )
        .await?;

        db.run_migrations().await?;
        db.ensure_system_accounts(&config.ledger).await?;

        init_metrics();

        let ledger = LedgerService::new(db.clone(), config.ledger.clone());
        let invoices = InvoiceService::new(db.clone(), config.ledger.clone());
        let payments = PaymentService::new(
            db.clone(),
            ledger.clone(),
            invoices.clone(),
            config.ledger.clone(),
        );
        let reporting = ReportingService::new(db.clone(), invoices.clone());
        let gateway = GatewayService::new(
            db.clone(),
            invoices.clone(),
            payments.clone(),
            config.ledger.clone(),
        );

        let renewal_token = CancellationToken::new();
        let worker = RenewalWorker::new(db.clone(), config.renewal.clone());
        let renewal_handle = tokio::spawn(worker.run(renewal_token.clone()));

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            AppError::InternalError(anyhow::anyhow!("Failed to bind {}: {}", addr, e))
        })?;
        let port = listener
            .local_addr()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Failed to read addr: {}", e)))?
            .port();

        let state = AppState {
            db,
            ledger,
            invoices,
            payments,
            reporting,
            gateway,
            config,
        };

        Ok(Self {
            port,
            listener,
            state,
            renewal_token,
            renewal_handle,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serve the operational endpoints until shutdown, then stop the renewal
    /// worker cleanly.
    pub async fn run_until_stopped(self) -> Result<(), AppError> {
        let router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_endpoint))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone());

        tracing::info!(port = self.port, "finance-service listening");

        let token = self.renewal_token.clone();
        axum::serve(self.listener, router)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                token.cancel();
            })
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Server error: {}", e)))?;

        self.renewal_token.cancel();
        self.renewal_handle.await.ok();

        Ok(())
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
}
