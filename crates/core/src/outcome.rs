//! Per-instance outcomes and their aggregation.
//!
//! An [`ExecutionOutcome`] is created exactly once per requested instance
//! and never modified. [`summarize`] and [`all_succeeded`] derive the run
//! level view; [`RunReport`] is the status object returned by a run.

use serde::Serialize;
use uuid::Uuid;

use crate::connector::StatementResult;
use crate::error::{CoreError, ErrorKind};
use crate::types::{InstanceId, Timestamp};

/// Result of one fan-out attempt against one instance.
///
/// `rows_affected` is present iff `success`; `error` is present iff not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionOutcome {
    instance: InstanceId,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    rows_affected: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_ms: Option<u64>,
}

impl ExecutionOutcome {
    pub fn succeeded(instance: InstanceId, result: StatementResult) -> Self {
        Self {
            instance,
            success: true,
            rows_affected: Some(result.rows_affected),
            error: None,
            error_kind: None,
            duration_ms: Some(result.duration_ms),
        }
    }

    pub fn failed(instance: InstanceId, error: &CoreError) -> Self {
        Self {
            instance,
            success: false,
            rows_affected: None,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            duration_ms: None,
        }
    }

    pub fn instance(&self) -> &InstanceId {
        &self.instance
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn rows_affected(&self) -> Option<u64> {
        self.rows_affected
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error_kind
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.duration_ms
    }
}

/// Derived view over an outcome sequence.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary<'a> {
    pub total: usize,
    pub failed: usize,
    pub failures: Vec<&'a ExecutionOutcome>,
}

impl RunSummary<'_> {
    pub fn succeeded(&self) -> usize {
        self.total - self.failed
    }
}

pub fn summarize(outcomes: &[ExecutionOutcome]) -> RunSummary<'_> {
    let failures: Vec<&ExecutionOutcome> = outcomes.iter().filter(|o| !o.success).collect();
    RunSummary {
        total: outcomes.len(),
        failed: failures.len(),
        failures,
    }
}

/// True iff no outcome failed. An empty sequence counts as success.
pub fn all_succeeded(outcomes: &[ExecutionOutcome]) -> bool {
    outcomes.iter().all(|o| o.success)
}

/// Status object returned by a completed fan-out run.
///
/// Partial success is still a failed run: succeeded writes are not rolled
/// back and any compensation is up to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    outcomes: Vec<ExecutionOutcome>,
}

impl RunReport {
    pub fn new(
        run_id: Uuid,
        started_at: Timestamp,
        finished_at: Timestamp,
        outcomes: Vec<ExecutionOutcome>,
    ) -> Self {
        Self {
            run_id,
            started_at,
            finished_at,
            outcomes,
        }
    }

    pub fn outcomes(&self) -> &[ExecutionOutcome] {
        &self.outcomes
    }

    pub fn summary(&self) -> RunSummary<'_> {
        summarize(&self.outcomes)
    }

    pub fn all_succeeded(&self) -> bool {
        all_succeeded(&self.outcomes)
    }
}
