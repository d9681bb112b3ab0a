use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fanout_core::connector::InstanceConnector;
use fanout_core::error::{CoreError, ErrorKind, TARGET_NOT_CONFIGURED};
use fanout_core::registry::{ConnectionTarget, InstanceRegistry};
use fanout_core::types::{InstanceId, SqlParam, StatementRequest};
use fanout_pipeline::FanOutCoordinator;

// ---------------------------------------------------------------------------
// In-memory connector
// ---------------------------------------------------------------------------

/// How a fake instance behaves, keyed by its connection URL.
#[derive(Debug, Clone, Copy)]
enum Behaviour {
    /// Execute succeeds with this many rows.
    Rows(u64),
    /// Execute succeeds after sleeping.
    SlowRows(Duration, u64),
    /// Connect fails.
    RefuseConnect,
    /// Execute fails.
    Reject,
    /// Execute succeeds but closing the connection fails.
    FailRelease(u64),
}

struct FakeConn {
    url: String,
}

#[derive(Default)]
struct FakeConnector {
    behaviours: HashMap<String, Behaviour>,
    connects: Mutex<Vec<String>>,
    releases: Mutex<Vec<String>>,
    executed: Mutex<Vec<(String, StatementRequest)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeConnector {
    fn new(behaviours: Vec<(String, Behaviour)>) -> Self {
        Self {
            behaviours: behaviours.into_iter().collect(),
            ..Default::default()
        }
    }

    fn behaviour(&self, url: &str) -> Behaviour {
        self.behaviours.get(url).copied().unwrap_or(Behaviour::Rows(1))
    }

    fn connects(&self) -> Vec<String> {
        self.connects.lock().unwrap().clone()
    }

    fn releases(&self) -> Vec<String> {
        self.releases.lock().unwrap().clone()
    }
}

impl InstanceConnector for FakeConnector {
    type Conn = FakeConn;

    async fn connect(&self, target: &ConnectionTarget) -> Result<FakeConn, CoreError> {
        if let Behaviour::RefuseConnect = self.behaviour(target.url()) {
            return Err(CoreError::Connection("connection refused".into()));
        }
        self.connects.lock().unwrap().push(target.url().to_string());
        Ok(FakeConn {
            url: target.url().to_string(),
        })
    }

    async fn execute(&self, conn: &mut FakeConn, request: &StatementRequest) -> Result<u64, CoreError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        self.executed
            .lock()
            .unwrap()
            .push((conn.url.clone(), request.clone()));

        let result = match self.behaviour(&conn.url) {
            Behaviour::Rows(n) | Behaviour::FailRelease(n) => Ok(n),
            Behaviour::SlowRows(delay, n) => {
                tokio::time::sleep(delay).await;
                Ok(n)
            }
            Behaviour::Reject => Err(CoreError::Execution(
                "duplicate key value violates unique constraint (SQLSTATE 23505)".into(),
            )),
            Behaviour::RefuseConnect => unreachable!("connect was refused"),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn release(&self, conn: FakeConn) -> Result<(), CoreError> {
        self.releases.lock().unwrap().push(conn.url.clone());
        if let Behaviour::FailRelease(_) = self.behaviour(&conn.url) {
            return Err(CoreError::Connection("close failed".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn url(id: &str) -> String {
    format!("postgres://app:secret@{id}.db/app")
}

fn registry(ids: &[&str]) -> Arc<InstanceRegistry> {
    Arc::new(
        ids.iter()
            .map(|id| (InstanceId::from(*id), ConnectionTarget::new(url(id))))
            .collect(),
    )
}

fn instances(ids: &[&str]) -> Vec<InstanceId> {
    ids.iter().map(|id| InstanceId::from(*id)).collect()
}

fn update_request() -> StatementRequest {
    StatementRequest::new("UPDATE t SET x=1 WHERE id=$1", vec![SqlParam::Int(42)]).unwrap()
}

fn ids_of(report: &fanout_core::outcome::RunReport) -> Vec<&str> {
    report.outcomes().iter().map(|o| o.instance().as_str()).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_target_fails_only_that_instance() {
    let connector = Arc::new(FakeConnector::default());
    let coordinator = FanOutCoordinator::new(registry(&["A", "B"]), Arc::clone(&connector));

    let report = coordinator
        .run(update_request(), &instances(&["A", "B", "C"]))
        .await;

    let outcomes = report.outcomes();
    assert_eq!(ids_of(&report), ["A", "B", "C"]);
    assert!(outcomes[0].success());
    assert_eq!(outcomes[0].rows_affected(), Some(1));
    assert!(outcomes[1].success());
    assert_eq!(outcomes[1].rows_affected(), Some(1));
    assert!(!outcomes[2].success());
    assert_eq!(outcomes[2].error(), Some(TARGET_NOT_CONFIGURED));
    assert_eq!(outcomes[2].error_kind(), Some(ErrorKind::Resolution));
    assert!(!report.all_succeeded());

    // No connection attempt for the unresolved instance.
    assert_eq!(connector.connects(), [url("A"), url("B")]);
}

#[tokio::test]
async fn empty_instance_list_succeeds() {
    let connector = Arc::new(FakeConnector::default());
    let coordinator = FanOutCoordinator::new(registry(&["A"]), Arc::clone(&connector));

    let report = coordinator.run(update_request(), &[]).await;

    assert!(report.outcomes().is_empty());
    assert!(report.all_succeeded());
    assert_eq!(report.summary().total, 0);
    assert!(connector.connects().is_empty());
}

#[tokio::test]
async fn execution_failure_does_not_stop_later_instances() {
    let connector = Arc::new(FakeConnector::new(vec![
        (url("A"), Behaviour::Reject),
        (url("B"), Behaviour::Rows(3)),
    ]));
    let coordinator = FanOutCoordinator::new(registry(&["A", "B"]), Arc::clone(&connector));

    let report = coordinator.run(update_request(), &instances(&["A", "B"])).await;
    let outcomes = report.outcomes();

    assert!(!outcomes[0].success());
    assert_eq!(outcomes[0].error_kind(), Some(ErrorKind::Execution));
    assert!(outcomes[0].error().unwrap().contains("23505"));
    assert_eq!(outcomes[0].rows_affected(), None);

    assert!(outcomes[1].success());
    assert_eq!(outcomes[1].rows_affected(), Some(3));

    assert!(!report.all_succeeded());
    let summary = report.summary();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures[0].instance().as_str(), "A");
}

#[tokio::test]
async fn connection_failure_is_recorded_as_connection_kind() {
    let connector = Arc::new(FakeConnector::new(vec![(url("A"), Behaviour::RefuseConnect)]));
    let coordinator = FanOutCoordinator::new(registry(&["A", "B"]), Arc::clone(&connector));

    let report = coordinator.run(update_request(), &instances(&["A", "B"])).await;
    let outcomes = report.outcomes();

    assert_eq!(outcomes[0].error_kind(), Some(ErrorKind::Connection));
    assert!(outcomes[1].success());
    // Nothing acquired for A, so nothing to release.
    assert_eq!(connector.releases(), [url("B")]);
}

#[tokio::test]
async fn every_acquired_connection_is_released_once() {
    let connector = Arc::new(FakeConnector::new(vec![
        (url("A"), Behaviour::Rows(1)),
        (url("B"), Behaviour::Reject),
        (url("C"), Behaviour::FailRelease(2)),
    ]));
    let coordinator = FanOutCoordinator::new(registry(&["A", "B", "C"]), Arc::clone(&connector));

    coordinator
        .run(update_request(), &instances(&["A", "B", "C"]))
        .await;

    assert_eq!(connector.connects(), connector.releases());
    assert_eq!(connector.releases(), [url("A"), url("B"), url("C")]);
}

#[tokio::test]
async fn release_failure_does_not_mask_success() {
    let connector = Arc::new(FakeConnector::new(vec![(url("A"), Behaviour::FailRelease(5))]));
    let coordinator = FanOutCoordinator::new(registry(&["A"]), Arc::clone(&connector));

    let report = coordinator.run(update_request(), &instances(&["A"])).await;

    assert!(report.all_succeeded());
    assert_eq!(report.outcomes()[0].rows_affected(), Some(5));
}

#[tokio::test]
async fn same_statement_and_params_reach_every_instance() {
    let connector = Arc::new(FakeConnector::default());
    let coordinator = FanOutCoordinator::new(registry(&["A", "B"]), Arc::clone(&connector));
    let request = StatementRequest::new(
        "UPDATE t SET note=$2 WHERE id=$1",
        vec![SqlParam::Int(7), SqlParam::Null],
    )
    .unwrap();

    coordinator
        .run(request.clone(), &instances(&["A", "B"]))
        .await;

    let executed = connector.executed.lock().unwrap();
    assert_eq!(executed.len(), 2);
    assert!(executed.iter().all(|(_, sent)| *sent == request));
}

#[tokio::test]
async fn duplicate_identifiers_get_one_outcome_each() {
    let connector = Arc::new(FakeConnector::default());
    let coordinator = FanOutCoordinator::new(registry(&["A"]), Arc::clone(&connector));

    let report = coordinator.run(update_request(), &instances(&["A", "A"])).await;

    assert_eq!(ids_of(&report), ["A", "A"]);
    assert_eq!(connector.connects().len(), 2);
}

#[tokio::test]
async fn sequential_by_default() {
    let connector = Arc::new(FakeConnector::new(vec![
        (url("A"), Behaviour::SlowRows(Duration::from_millis(20), 1)),
        (url("B"), Behaviour::SlowRows(Duration::from_millis(20), 1)),
    ]));
    let coordinator = FanOutCoordinator::new(registry(&["A", "B"]), Arc::clone(&connector));

    coordinator.run(update_request(), &instances(&["A", "B"])).await;

    assert_eq!(connector.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_run_keeps_request_order() {
    // Earlier instances are slower so they finish last.
    let connector = Arc::new(FakeConnector::new(vec![
        (url("A"), Behaviour::SlowRows(Duration::from_millis(80), 1)),
        (url("B"), Behaviour::SlowRows(Duration::from_millis(40), 2)),
        (url("C"), Behaviour::SlowRows(Duration::from_millis(5), 3)),
        (url("D"), Behaviour::Reject),
    ]));
    let coordinator =
        FanOutCoordinator::new(registry(&["A", "B", "C", "D"]), Arc::clone(&connector))
            .with_max_concurrency(2);

    let report = coordinator
        .run(update_request(), &instances(&["A", "B", "C", "D", "E"]))
        .await;

    assert_eq!(ids_of(&report), ["A", "B", "C", "D", "E"]);
    let rows: Vec<Option<u64>> = report.outcomes().iter().map(|o| o.rows_affected()).collect();
    assert_eq!(rows, [Some(1), Some(2), Some(3), None, None]);
    assert_eq!(connector.max_in_flight.load(Ordering::SeqCst), 2);
    assert_eq!(connector.connects().len(), connector.releases().len());
}

#[test]
fn concurrency_limit_is_at_least_one() {
    let coordinator = FanOutCoordinator::new(registry(&[]), Arc::new(FakeConnector::default()))
        .with_max_concurrency(0);
    assert_eq!(coordinator.max_concurrency(), 1);
}
