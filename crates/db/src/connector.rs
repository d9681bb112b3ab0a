//! Postgres implementation of [`InstanceConnector`].
//!
//! [`PgConnector`] opens a dedicated `PgConnection` per instance (no pool:
//! each instance is used once per run), binds the request parameters, and
//! closes the connection on release.
//!
//! The statement timeout is enforced by the server (`statement_timeout`),
//! which cancels and rolls back the statement. A client-side timer only
//! guards against a server that stops responding.

use std::str::FromStr;
use std::time::Duration;

use fanout_core::connector::InstanceConnector;
use fanout_core::error::CoreError;
use fanout_core::registry::{ConnectionTarget, TlsMode};
use fanout_core::types::StatementRequest;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgSslMode};
use sqlx::Connection;

use crate::bind::{bind_request, infer_param_types};

/// Reported to the server as `application_name`.
const APPLICATION_NAME: &str = "fanout";

/// Extra time the client waits past the server-side statement timeout.
const STATEMENT_TIMEOUT_GRACE: Duration = Duration::from_secs(5);

/// Connection settings shared by every instance in a run.
#[derive(Debug, Clone)]
pub struct PgConnectorConfig {
    /// TLS mode for targets that set neither an explicit mode nor
    /// `sslmode` in their URL.
    pub default_tls: TlsMode,
    /// Upper bound on establishing a connection.
    pub connect_timeout: Duration,
    /// Server-side `statement_timeout`; `None` waits indefinitely.
    pub statement_timeout: Option<Duration>,
}

impl Default for PgConnectorConfig {
    fn default() -> Self {
        Self {
            default_tls: TlsMode::Require,
            connect_timeout: Duration::from_secs(30),
            statement_timeout: None,
        }
    }
}

/// Opens one Postgres connection per instance.
#[derive(Debug, Clone, Default)]
pub struct PgConnector {
    config: PgConnectorConfig,
}

impl PgConnector {
    pub fn new(config: PgConnectorConfig) -> Self {
        Self { config }
    }

    /// Build connect options for `target`.
    ///
    /// TLS precedence: the target's explicit mode, then `sslmode` in the
    /// URL, then [`PgConnectorConfig::default_tls`]. A configured statement
    /// timeout is sent as the `statement_timeout` session setting.
    pub fn connect_options(&self, target: &ConnectionTarget) -> Result<PgConnectOptions, CoreError> {
        let options = PgConnectOptions::from_str(target.url())
            .map_err(|e| CoreError::Connection(format!("Invalid connection URL: {e}")))?
            .application_name(APPLICATION_NAME);

        let tls = match target.tls() {
            Some(mode) => Some(mode),
            None if url_declares_sslmode(target.url()) => None,
            None => Some(self.config.default_tls),
        };

        let options = match tls {
            Some(mode) => options.ssl_mode(pg_ssl_mode(mode)),
            None => options,
        };

        Ok(match self.config.statement_timeout {
            Some(limit) => {
                options.options([("statement_timeout", format!("{}ms", limit.as_millis()))])
            }
            None => options,
        })
    }
}

impl InstanceConnector for PgConnector {
    type Conn = PgConnection;

    async fn connect(&self, target: &ConnectionTarget) -> Result<PgConnection, CoreError> {
        let options = self.connect_options(target)?;
        tracing::debug!(url = %target.redacted_url(), "Opening connection");

        match tokio::time::timeout(self.config.connect_timeout, PgConnection::connect_with(&options))
            .await
        {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(CoreError::Connection(describe(&e))),
            Err(_) => Err(CoreError::Connection(format!(
                "Timed out after {}s establishing connection",
                self.config.connect_timeout.as_secs()
            ))),
        }
    }

    async fn execute(
        &self,
        conn: &mut PgConnection,
        request: &StatementRequest,
    ) -> Result<u64, CoreError> {
        let run = async {
            let inferred = infer_param_types(&mut *conn, request)
                .await
                .map_err(|e| CoreError::Execution(describe(&e)))?;

            bind_request(request, &inferred)?
                .execute(&mut *conn)
                .await
                .map(|done| done.rows_affected())
                .map_err(|e| CoreError::Execution(describe(&e)))
        };

        match self.config.statement_timeout {
            Some(limit) => tokio::time::timeout(limit + STATEMENT_TIMEOUT_GRACE, run)
                .await
                .map_err(|_| {
                    CoreError::Execution(format!(
                        "No response from server {}ms after the statement timeout; \
                         the statement outcome is unknown",
                        STATEMENT_TIMEOUT_GRACE.as_millis()
                    ))
                })?,
            None => run.await,
        }
    }

    async fn release(&self, conn: PgConnection) -> Result<(), CoreError> {
        conn.close()
            .await
            .map_err(|e| CoreError::Connection(format!("Failed to close connection: {e}")))
    }
}

/// Map a TLS mode onto the driver's `sslmode`.
pub fn pg_ssl_mode(mode: TlsMode) -> PgSslMode {
    match mode {
        TlsMode::Disable => PgSslMode::Disable,
        TlsMode::Prefer => PgSslMode::Prefer,
        TlsMode::Require => PgSslMode::Require,
        TlsMode::VerifyCa => PgSslMode::VerifyCa,
        TlsMode::VerifyFull => PgSslMode::VerifyFull,
    }
}

/// Whether the URL's query string sets `sslmode` (or its `ssl-mode` alias).
fn url_declares_sslmode(url: &str) -> bool {
    url.split_once('?').is_some_and(|(_, query)| {
        query
            .split('&')
            .filter_map(|pair| pair.split('=').next())
            .any(|key| key.eq_ignore_ascii_case("sslmode") || key.eq_ignore_ascii_case("ssl-mode"))
    })
}

/// Human-readable description of a driver error, including the SQLSTATE
/// for server-side errors.
fn describe(err: &sqlx::Error) -> String {
    match err {
        sqlx::Error::Database(db_err) => match db_err.code() {
            Some(code) => format!("{} (SQLSTATE {code})", db_err.message()),
            None => db_err.message().to_string(),
        },
        other => other.to_string(),
    }
}
