//! Scoped connection lifecycle for a single instance.

use fanout_core::connector::InstanceConnector;
use fanout_core::error::CoreError;
use fanout_core::registry::ConnectionTarget;
use futures::future::BoxFuture;

/// Acquire a connection to `target`, run `f` on it, then release it.
///
/// The connection is released exactly once whether `f` succeeds or fails.
/// A failed release is logged and does not replace `f`'s result. If the
/// connection cannot be established, `f` never runs and the connect error
/// is returned.
pub async fn with_connection<C, T, F>(
    connector: &C,
    target: &ConnectionTarget,
    f: F,
) -> Result<T, CoreError>
where
    C: InstanceConnector,
    T: Send,
    F: for<'c> FnOnce(&'c mut C::Conn) -> BoxFuture<'c, Result<T, CoreError>>,
{
    let mut conn = connector.connect(target).await?;

    let result = f(&mut conn).await;

    if let Err(e) = connector.release(conn).await {
        tracing::warn!(error = %e, "Failed to release connection");
    }

    result
}
