//! `fanout-worker` -- apply one write statement to a set of database
//! instances.
//!
//! Reads the statement, its parameters, and the target instance list from
//! the environment, runs the statement against each instance with its own
//! connection, prints a per-instance report, and exits non-zero unless
//! every instance succeeded. See [`fanout_worker::config::WorkerConfig`]
//! for the full list of variables.
//!
//! Logs go to stderr so stdout carries only the report.

use std::process::ExitCode;

use fanout_worker::config::{LogFormat, WorkerConfig};
use fanout_worker::{exit_code, output, EXIT_FAILURE};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "fanout_worker=info,fanout_pipeline=info,fanout_db=info";

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());

    match LogFormat::from_env() {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }

    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration, no instance was contacted");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    tracing::info!(
        instance_count = config.instances.len(),
        registry_size = config.registry.len(),
        max_concurrency = config.max_concurrency,
        "Loaded worker configuration",
    );

    let format = config.output;
    let report = fanout_worker::run(config).await;

    match output::render(&report, format) {
        Ok(text) => println!("{text}"),
        Err(e) => tracing::error!(error = %e, "Failed to render run report"),
    }

    ExitCode::from(exit_code(&report))
}
