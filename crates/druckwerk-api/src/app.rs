// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application wiring: the shared context, the router with its layers, and
// graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use axum::routing::{get, post};
use regex::Regex;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use druckwerk_auth::{AccountsClient, AuthGate};
use druckwerk_core::Settings;
use druckwerk_core::error::{DruckwerkError, Result};
use druckwerk_document::HttpConverter;
use druckwerk_print::{IppPrintBackend, PrintBackend, PrintOrchestrator, StatusAggregator};
use druckwerk_scan::ScanOrchestrator;
use druckwerk_store::ArtifactStore;

use crate::routes;

/// Everything the handlers need, shared behind an `Arc`.
pub struct AppContext {
    pub settings: Arc<Settings>,
    pub store: Arc<ArtifactStore>,
    pub print: Arc<PrintOrchestrator>,
    pub scan: Arc<ScanOrchestrator>,
    pub status: Arc<StatusAggregator>,
    pub gate: Arc<AuthGate>,
}

impl AppContext {
    /// Wire the full production stack from settings.
    pub fn build(settings: Settings) -> Result<Arc<Self>> {
        let settings = Arc::new(settings);
        let store = Arc::new(ArtifactStore::new(settings.temp_dir.clone())?);

        let backend: Arc<dyn PrintBackend> = Arc::new(IppPrintBackend::new(&settings.printers)?);
        let converter = Arc::new(HttpConverter::new(settings.converter_url.clone())?);
        let print = Arc::new(PrintOrchestrator::new(
            settings.clone(),
            store.clone(),
            backend.clone(),
            converter,
        ));
        let scan = Arc::new(ScanOrchestrator::new(&settings, store.clone())?);
        let status = Arc::new(StatusAggregator::new(backend));

        let accounts = Arc::new(AccountsClient::new(
            settings.accounts.api_url.clone(),
            &settings.accounts.api_jwt_token,
        )?);
        let gate = Arc::new(AuthGate::new(accounts, settings.bot_token.clone()));

        Ok(Arc::new(Self {
            settings,
            store,
            print,
            scan,
            status,
            gate,
        }))
    }
}

/// Assemble the router under the configured root path.
pub fn router(context: Arc<AppContext>) -> Result<Router> {
    let cors = cors_layer(&context.settings.cors_allow_origin_regex)?;

    let api = Router::new()
        // Print
        .route("/print/get_printers", get(routes::print::get_printers))
        .route(
            "/print/get_printers_status",
            get(routes::print::get_printers_status),
        )
        .route(
            "/print/get_printer_status",
            get(routes::print::get_printer_status),
        )
        .route("/print/prepare", post(routes::print::prepare))
        .route("/print/print", post(routes::print::print))
        .route("/print/job_status", get(routes::print::job_status))
        .route("/print/cancel", post(routes::print::cancel))
        .route(
            "/print/cancel_preparation",
            post(routes::print::cancel_preparation),
        )
        .route("/print/get_file", get(routes::print::get_file))
        // Scan
        .route("/scan/get_scanners", get(routes::scan::get_scanners))
        .route("/scan/manual/start_scan", post(routes::scan::start_scan))
        .route("/scan/manual/cancel_scan", post(routes::scan::cancel_scan))
        .route(
            "/scan/manual/wait_and_merge",
            post(routes::scan::wait_and_merge),
        )
        .route(
            "/scan/manual/remove_last_page",
            post(routes::scan::remove_last_page),
        )
        .route("/scan/manual/delete_file", post(routes::scan::delete_file))
        .route("/scan/get_file", get(routes::scan::get_file))
        .route(
            "/scan/debug/get_scanner_capabilities",
            get(routes::scan::get_scanner_capabilities),
        )
        .route(
            "/scan/debug/get_scanner_status",
            get(routes::scan::get_scanner_status),
        )
        // Users
        .route("/users/my_id", get(routes::users::my_id))
        .layer(DefaultBodyLimit::max(50 * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(6 * 60)))
        .layer(cors)
        .with_state(context.clone());

    let root = context.settings.app_root_path.trim_end_matches('/');
    Ok(if root.is_empty() {
        api
    } else {
        Router::new().nest(root, api)
    })
}

/// CORS restricted to origins matching the configured regex.
fn cors_layer(origin_regex: &str) -> Result<CorsLayer> {
    let regex = Regex::new(origin_regex).map_err(|e| {
        DruckwerkError::InvalidArgument(format!("cors_allow_origin_regex: {e}"))
    })?;
    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            origin
                .to_str()
                .map(|origin| regex.is_match(origin))
                .unwrap_or(false)
        }))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true))
}

/// Serve until SIGINT/SIGTERM, then sweep the artifact store.
pub async fn serve(context: Arc<AppContext>) -> Result<()> {
    let app = router(context.clone())?;
    let listener = TcpListener::bind(&context.settings.bind_addr).await?;
    info!(addr = %context.settings.bind_addr, "druckwerk API listening");

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    if let Err(e) = result {
        warn!(%e, "server exited with error");
    }

    // Temp artifacts are ephemeral; leave nothing behind.
    context.store.on_terminate().await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("interrupt received, shutting down"),
        _ = terminate => info!("terminate received, shutting down"),
    }
}
