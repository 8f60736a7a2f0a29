use std::sync::LazyLock;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgSslMode};

use crate::Config;
use crate::shared::ValidationError;

/// Session settings applied to every connection opened by a merge run.
///
/// Grouping a large scratch collection can take minutes, so statements never time out.
pub static MERGE_SESSION: LazyLock<SessionSettings> = LazyLock::new(|| SessionSettings {
    application_name: "denorm_merge",
    statement_timeout_ms: 0,
    lock_timeout_ms: 30_000,
    idle_in_transaction_timeout_ms: 60_000,
});

/// Postgres session parameters sent when a connection is opened.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub application_name: &'static str,
    pub statement_timeout_ms: u32,
    pub lock_timeout_ms: u32,
    pub idle_in_transaction_timeout_ms: u32,
}

impl SessionSettings {
    /// Parameters in the `(name, value)` form accepted by [`PgConnectOptions::options`].
    pub fn parameters(&self) -> Vec<(&'static str, String)> {
        vec![
            ("client_encoding", "UTF8".to_string()),
            ("timezone", "UTC".to_string()),
            ("application_name", self.application_name.to_string()),
            ("statement_timeout", self.statement_timeout_ms.to_string()),
            ("lock_timeout", self.lock_timeout_ms.to_string()),
            (
                "idle_in_transaction_session_timeout",
                self.idle_in_transaction_timeout_ms.to_string(),
            ),
        ]
    }
}

/// Connection settings for a Postgres database holding the collections.
///
/// The password is read from configuration as a secret and only exposed when building the
/// connect options.
#[derive(Debug, Clone, Deserialize)]
pub struct PgConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Database name.
    pub name: String,
    pub username: String,
    pub password: Option<SecretString>,
    #[serde(default = "TlsConfig::disabled")]
    pub tls: TlsConfig,
}

impl PgConnectionConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.host.is_empty() {
            return Err(ValidationError::EmptyName("store.connection.host"));
        }

        if self.name.is_empty() {
            return Err(ValidationError::EmptyName("store.connection.name"));
        }

        self.tls.validate()
    }

    /// Builds connect options for the configured database with `session` applied.
    ///
    /// TLS connections verify the server against the configured root certificates.
    pub fn connect_options(&self, session: &SessionSettings) -> PgConnectOptions {
        let mut options = PgConnectOptions::new_without_pgpass()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .database(&self.name)
            .options(session.parameters());

        options = if self.tls.enabled {
            options
                .ssl_mode(PgSslMode::VerifyFull)
                .ssl_root_cert_from_pem(self.tls.trusted_root_certs.clone().into_bytes())
        } else {
            options.ssl_mode(PgSslMode::Prefer)
        };

        if let Some(password) = &self.password {
            options = options.password(password.expose_secret());
        }

        options
    }
}

impl Config for PgConnectionConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

/// TLS settings of a Postgres connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// PEM encoded root certificates trusted when verifying the server.
    pub trusted_root_certs: String,
    pub enabled: bool,
}

impl TlsConfig {
    pub fn disabled() -> Self {
        Self {
            trusted_root_certs: String::new(),
            enabled: false,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.enabled && self.trusted_root_certs.is_empty() {
            return Err(ValidationError::MissingTrustedRootCerts);
        }

        Ok(())
    }
}
