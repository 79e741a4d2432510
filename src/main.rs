//! vc-sfu entrypoint.
//!
//! Wires the ambient stack the engine treats as external collaborators:
//! TLS listener, CORS, tracing init, and configuration loading. The
//! signaling/media coordination engine itself lives entirely in the
//! library crate and knows nothing about any of this.

use std::process::ExitCode;
use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use vc_sfu::config::Config;
use vc_sfu::registry::RoomRegistry;
use vc_sfu::ws::{self, AppState};

#[tokio::main]
async fn main() -> ExitCode {
    // Required before any TLS/WebRTC operation touches rustls.
    if rustls::crypto::CryptoProvider::install_default(rustls::crypto::ring::default_provider())
        .is_err()
    {
        eprintln!("failed to install rustls crypto provider");
        return ExitCode::FAILURE;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vc_sfu=info,tower_http=info".into()),
        )
        .init();

    dotenvy::dotenv().ok();

    let config = match Config::from_env() {
        Ok(config) => Arc::new(config),
        Err(err) => {
            error!(%err, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    info!(version = env!("CARGO_PKG_VERSION"), "starting vc-sfu");

    let tls = match RustlsConfig::from_pem_file(&config.tls_cert_path, &config.tls_key_path).await
    {
        Ok(tls) => tls,
        Err(err) => {
            error!(%err, cert = %config.tls_cert_path, key = %config.tls_key_path, "failed to load TLS certificate/key");
            return ExitCode::FAILURE;
        }
    };

    let registry = Arc::new(RoomRegistry::new());
    let state = AppState::new(Arc::clone(&config), registry);

    let cors = match HeaderValue::from_str(&config.frontend_origin) {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
            .allow_credentials(true),
        Err(err) => {
            error!(%err, origin = %config.frontend_origin, "invalid frontend origin, CORS disabled");
            CorsLayer::new()
        }
    };

    let app = Router::new()
        .route("/ws/media", get(ws::upgrade))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let bind_address = match config.bind_address.parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!(%err, address = %config.bind_address, "invalid bind address");
            return ExitCode::FAILURE;
        }
    };

    info!(address = %config.bind_address, "listening");

    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("received shutdown signal");
        shutdown_handle.graceful_shutdown(Some(std::time::Duration::from_secs(5)));
    });

    if let Err(err) = axum_server::bind_rustls(bind_address, tls)
        .handle(handle)
        .serve(app.into_make_service())
        .await
    {
        error!(%err, "TLS listener failed");
        return ExitCode::FAILURE;
    }

    info!("vc-sfu shut down");
    ExitCode::SUCCESS
}

async fn healthz() -> &'static str {
    "ok"
}
