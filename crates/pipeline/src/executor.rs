use std::time::Instant;

use fanout_core::connector::{InstanceConnector, StatementResult};
use fanout_core::error::CoreError;
use fanout_core::types::StatementRequest;

/// Run `request` on an open connection and time it.
///
/// The duration covers submission through receipt of the result, measured
/// with a monotonic clock on this host.
pub async fn execute_statement<C: InstanceConnector>(
    connector: &C,
    conn: &mut C::Conn,
    request: &StatementRequest,
) -> Result<StatementResult, CoreError> {
    let start = Instant::now();
    let rows_affected = connector.execute(conn, request).await?;
    let duration_ms = start.elapsed().as_millis() as u64;

    Ok(StatementResult {
        rows_affected,
        duration_ms,
    })
}
