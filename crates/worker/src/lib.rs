//! `fanout-worker` library crate.
//!
//! Wires configuration, the Postgres connector, and the coordinator
//! together. The binary entrypoint lives in `main.rs`.

use std::sync::Arc;

use fanout_core::outcome::RunReport;
use fanout_db::PgConnector;
use fanout_pipeline::FanOutCoordinator;

pub mod config;
pub mod output;

use config::WorkerConfig;

/// Process exit status for a run where every instance succeeded.
pub const EXIT_SUCCESS: u8 = 0;

/// Process exit status for a failed or partially failed run, and for
/// invalid input.
pub const EXIT_FAILURE: u8 = 1;

/// Execute the configured statement against the configured instances.
pub async fn run(config: WorkerConfig) -> RunReport {
    let WorkerConfig {
        request,
        instances,
        registry,
        connector,
        max_concurrency,
        ..
    } = config;

    let connector = Arc::new(PgConnector::new(connector));
    let coordinator =
        FanOutCoordinator::new(Arc::new(registry), connector).with_max_concurrency(max_concurrency);

    coordinator.run(request, &instances).await
}

/// Translate a run report into the process exit status.
pub fn exit_code(report: &RunReport) -> u8 {
    if report.all_succeeded() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    }
}
