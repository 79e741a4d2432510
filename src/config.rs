//! Server configuration, loaded from environment variables.

use anyhow::{Context, Result};
use std::env;

/// Configuration loaded once at process start.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the signaling listener binds to (e.g. `0.0.0.0:8443`).
    pub bind_address: String,

    /// Frontend origin, used to validate the `Origin` header on upgrade.
    /// Built from `FE_URL` and `FE_PORT` as `"{FE_URL}:{FE_PORT}"`.
    pub frontend_origin: String,

    /// TLS certificate path (PEM).
    pub tls_cert_path: String,

    /// TLS private key path (PEM).
    pub tls_key_path: String,

    /// STUN server URL.
    pub stun_server: String,

    /// TURN server URL, if configured.
    pub turn_server: Option<String>,

    /// TURN username, if configured.
    pub turn_username: Option<String>,

    /// TURN credential, if configured.
    pub turn_credential: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// `FE_URL`, `FE_PORT`, `TLS_CERT_PATH` and `TLS_KEY_PATH` are required;
    /// everything else has a sensible default.
    pub fn from_env() -> Result<Self> {
        let fe_url = env::var("FE_URL").context("FE_URL must be set")?;
        let fe_port = env::var("FE_PORT").context("FE_PORT must be set")?;

        Ok(Self {
            bind_address: env::var("APP_PORT")
                .map(|port| format!("0.0.0.0:{port}"))
                .unwrap_or_else(|_| "0.0.0.0:8443".into()),
            frontend_origin: format!("{fe_url}:{fe_port}"),
            tls_cert_path: env::var("TLS_CERT_PATH")
                .context("TLS_CERT_PATH must be set")?,
            tls_key_path: env::var("TLS_KEY_PATH")
                .context("TLS_KEY_PATH must be set")?,
            stun_server: env::var("STUN_SERVER")
                .unwrap_or_else(|_| "stun:stun.l.google.com:19302".into()),
            turn_server: env::var("TURN_SERVER").ok(),
            turn_username: env::var("TURN_USERNAME").ok(),
            turn_credential: env::var("TURN_CREDENTIAL").ok(),
        })
    }

    /// Whether a TURN server is configured.
    #[must_use]
    pub const fn has_turn(&self) -> bool {
        self.turn_server.is_some()
    }

    /// A configuration suitable for tests: no TLS/frontend requirements.
    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            bind_address: "127.0.0.1:8443".into(),
            frontend_origin: "http://localhost:3000".into(),
            tls_cert_path: "cert.pem".into(),
            tls_key_path: "key.pem".into(),
            stun_server: "stun:stun.l.google.com:19302".into(),
            turn_server: None,
            turn_username: None,
            turn_credential: None,
        }
    }
}
