//! Fan-out coordinator.
//!
//! [`FanOutCoordinator`] applies one [`StatementRequest`] to each requested
//! instance and records exactly one [`ExecutionOutcome`] per request entry,
//! in request order. Per-instance failures (missing target, connection,
//! execution) become failed outcomes; nothing a single instance does can
//! abort the rest of the run.
//!
//! Instances run one at a time by default. With
//! [`with_max_concurrency`](FanOutCoordinator::with_max_concurrency) up to
//! that many run at once; outcomes are re-sorted into request order before
//! the report is built.

use std::sync::Arc;

use chrono::Utc;
use fanout_core::connector::InstanceConnector;
use fanout_core::error::CoreError;
use fanout_core::outcome::{ExecutionOutcome, RunReport};
use fanout_core::registry::InstanceRegistry;
use fanout_core::types::{InstanceId, StatementRequest};
use futures::stream::{self, StreamExt};
use tracing::Instrument;
use uuid::Uuid;

use crate::connection::with_connection;
use crate::executor::execute_statement;

/// Default number of instances processed at once.
pub const DEFAULT_MAX_CONCURRENCY: usize = 1;

pub struct FanOutCoordinator<C> {
    registry: Arc<InstanceRegistry>,
    connector: Arc<C>,
    max_concurrency: usize,
}

impl<C> FanOutCoordinator<C>
where
    C: InstanceConnector + 'static,
{
    /// Create a sequential coordinator over `registry` and `connector`.
    pub fn new(registry: Arc<InstanceRegistry>, connector: Arc<C>) -> Self {
        Self {
            registry,
            connector,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    /// Allow up to `limit` instances in flight at once. Values below 1 are
    /// treated as 1.
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = limit.max(1);
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Execute `request` against every entry of `instances`.
    ///
    /// Always returns a report with one outcome per entry; the run-level
    /// verdict is [`RunReport::all_succeeded`].
    pub async fn run(&self, request: StatementRequest, instances: &[InstanceId]) -> RunReport {
        let run_id = Uuid::now_v7();
        let started_at = Utc::now();
        let request = Arc::new(request);

        tracing::info!(
            %run_id,
            instance_count = instances.len(),
            statement = request.sql(),
            param_count = request.params().len(),
            max_concurrency = self.max_concurrency,
            "Starting fan-out run",
        );

        let mut indexed: Vec<(usize, ExecutionOutcome)> = stream::iter(instances.iter().enumerate())
            .map(|(position, instance)| {
                let request = Arc::clone(&request);
                let span = tracing::info_span!("instance", %run_id, instance = %instance);
                async move {
                    let outcome = self.run_instance(instance, request).instrument(span).await;
                    (position, outcome)
                }
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;
        indexed.sort_by_key(|(position, _)| *position);

        let outcomes: Vec<ExecutionOutcome> =
            indexed.into_iter().map(|(_, outcome)| outcome).collect();
        let report = RunReport::new(run_id, started_at, Utc::now(), outcomes);

        let summary = report.summary();
        if summary.failed == 0 {
            tracing::info!(%run_id, total = summary.total, "Fan-out run completed successfully");
        } else {
            tracing::error!(
                %run_id,
                total = summary.total,
                failed = summary.failed,
                "Fan-out run finished with failures",
            );
        }

        report
    }

    /// Resolve, connect, execute, and record a single instance.
    async fn run_instance(
        &self,
        instance: &InstanceId,
        request: Arc<StatementRequest>,
    ) -> ExecutionOutcome {
        let Some(target) = self.registry.resolve(instance) else {
            tracing::warn!("Connection target not configured, skipping instance");
            return ExecutionOutcome::failed(instance.clone(), &CoreError::Resolution);
        };

        tracing::info!("Executing statement");

        let connector = Arc::clone(&self.connector);
        let result = with_connection(self.connector.as_ref(), target, move |conn| {
            Box::pin(async move { execute_statement(connector.as_ref(), conn, &request).await })
        })
        .await;

        match result {
            Ok(done) => {
                tracing::info!(
                    rows_affected = done.rows_affected,
                    duration_ms = done.duration_ms,
                    "Statement completed",
                );
                ExecutionOutcome::succeeded(instance.clone(), done)
            }
            Err(e) => {
                tracing::error!(kind = %e.kind(), error = %e, "Statement failed");
                ExecutionOutcome::failed(instance.clone(), &e)
            }
        }
    }
}
