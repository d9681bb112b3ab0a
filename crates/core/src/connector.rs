//! The seam between the fan-out pipeline and a database driver.
//!
//! Defines [`InstanceConnector`], implemented once per driver (Postgres in
//! `fanout-db`) and by in-memory doubles in tests.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::registry::ConnectionTarget;
use crate::types::StatementRequest;

/// Measured result of one successful statement execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementResult {
    pub rows_affected: u64,
    /// Wall-clock time from submission to result, in milliseconds.
    pub duration_ms: u64,
}

/// Driver operations used to run one statement against one instance.
///
/// Every instance gets its own connection from [`connect`](Self::connect);
/// connections are never shared between instances. Callers must hand each
/// connection back to [`release`](Self::release) exactly once.
///
/// Failures from `connect` must be [`CoreError::Connection`] and failures
/// from `execute` must be [`CoreError::Execution`].
pub trait InstanceConnector: Send + Sync {
    /// A live connection to a single instance.
    type Conn: Send;

    /// Establish a new connection to `target`.
    fn connect(
        &self,
        target: &ConnectionTarget,
    ) -> impl Future<Output = Result<Self::Conn, CoreError>> + Send;

    /// Run the request's statement with its parameters bound, returning the
    /// number of rows affected.
    fn execute(
        &self,
        conn: &mut Self::Conn,
        request: &StatementRequest,
    ) -> impl Future<Output = Result<u64, CoreError>> + Send;

    /// Close the connection.
    fn release(&self, conn: Self::Conn) -> impl Future<Output = Result<(), CoreError>> + Send;
}
