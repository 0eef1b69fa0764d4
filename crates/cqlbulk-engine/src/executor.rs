//! The bulk executor: dispatches write units and read statements against
//! the driver session under concurrency, query and rate bounds.
//!
//! Each unit moves through `queued → rate-gated → in-flight → completed or
//! failed`. The in-flight cap is a semaphore acquired before dispatch; the
//! rate limit is a token bucket consulted before the semaphore; both apply
//! backpressure by suspending the dispatch loop, which in turn stops
//! pulling from the upstream channel. In fail-safe mode failures become
//! failed results and the stream continues; in fail-fast mode the first
//! failure cancels dispatch, and whatever was already in flight may still
//! deliver results before the stream ends.

use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};

use cqlbulk_core::settings::ExecutorSettings;
use cqlbulk_core::{
    BoundStatement, BulkError, BulkExecutionError, DriverSession, ReadOptions, ReadResult,
    Result, WriteResult, WriteUnit,
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

fn semaphore(limit: i64) -> Option<Arc<Semaphore>> {
    // Non-positive disables the bound.
    (limit > 0).then(|| Arc::new(Semaphore::new(limit as usize)))
}

pub struct BulkExecutor {
    session: Arc<dyn DriverSession>,
    requests: Option<Arc<Semaphore>>,
    queries: Option<Arc<Semaphore>>,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
    read_options: ReadOptions,
    fail_fast: bool,
    dry_run: bool,
}

impl BulkExecutor {
    pub fn new(
        session: Arc<dyn DriverSession>,
        settings: &ExecutorSettings,
        dry_run: bool,
    ) -> Self {
        let limiter = u32::try_from(settings.max_requests_per_second)
            .ok()
            .and_then(NonZeroU32::new)
            .map(|rate| Arc::new(RateLimiter::direct(Quota::per_second(rate))));
        Self {
            session,
            requests: semaphore(settings.max_in_flight_requests),
            queries: semaphore(settings.max_in_flight_queries),
            limiter,
            read_options: ReadOptions {
                page_size: settings.page_size.max(1),
                continuous_paging: settings.continuous_paging,
            },
            fail_fast: settings.fail_fast,
            dry_run,
        }
    }

    /// Dispatch one unit, subject to the rate and in-flight bounds.
    pub async fn write_one(&self, unit: WriteUnit) -> WriteResult {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
        let _permit = match &self.requests {
            Some(s) => s.acquire().await.ok(),
            None => None,
        };
        if self.dry_run {
            return WriteResult::success(unit);
        }
        match self.session.execute(&unit).await {
            Ok(()) => WriteResult::success(unit),
            Err(e) => {
                let error = BulkExecutionError { query: Arc::from(unit.query()), source: e };
                WriteResult::failure(unit, error)
            }
        }
    }

    /// Fan a stream of write units out to the driver, emitting exactly one
    /// result per unit. Returns the first failure in fail-fast mode (or on
    /// a fatal session error); otherwise runs the stream to the end.
    pub async fn write_stream(
        &self,
        mut rx: mpsc::Receiver<WriteUnit>,
        tx: mpsc::Sender<WriteResult>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let abort = cancel.child_token();
        let failure: Arc<Mutex<Option<BulkExecutionError>>> = Arc::default();
        let mut tasks = JoinSet::new();
        'dispatch: loop {
            let unit = tokio::select! {
                _ = abort.cancelled() => break 'dispatch,
                next = rx.recv() => match next {
                    Some(unit) => unit,
                    None => break 'dispatch,
                },
            };
            if let Some(limiter) = &self.limiter {
                tokio::select! {
                    _ = abort.cancelled() => break 'dispatch,
                    _ = limiter.until_ready() => {}
                }
            }
            let permit = match &self.requests {
                Some(s) => {
                    let acquired = tokio::select! {
                        _ = abort.cancelled() => break 'dispatch,
                        p = s.clone().acquire_owned() => p,
                    };
                    match acquired {
                        Ok(p) => Some(p),
                        Err(_) => break 'dispatch,
                    }
                }
                None => None,
            };
            let session = self.session.clone();
            let tx = tx.clone();
            let abort = abort.clone();
            let failure = failure.clone();
            let fail_fast = self.fail_fast;
            let dry_run = self.dry_run;
            tasks.spawn(async move {
                let outcome = if dry_run { Ok(()) } else { session.execute(&unit).await };
                drop(permit);
                let result = match outcome {
                    Ok(()) => WriteResult::success(unit),
                    Err(e) => {
                        let fatal = e.is_fatal();
                        let error =
                            BulkExecutionError { query: Arc::from(unit.query()), source: e };
                        if fail_fast || fatal {
                            let mut slot = failure.lock().unwrap();
                            if slot.is_none() {
                                *slot = Some(error.clone());
                            }
                            abort.cancel();
                        }
                        WriteResult::failure(unit, error)
                    }
                };
                // A closed receiver means downstream cancelled; the result
                // is discarded silently.
                let _ = tx.send(result).await;
            });
        }
        while tasks.join_next().await.is_some() {}
        let stored = failure.lock().unwrap().take();
        match stored {
            Some(error) => Err(BulkError::Execution(error)),
            None => Ok(()),
        }
    }

    /// Execute read statements, emitting zero or more row results per
    /// statement. A multi-page read holds one query permit for its whole
    /// duration regardless of page count.
    pub async fn read_stream(
        &self,
        statements: Vec<BoundStatement>,
        tx: mpsc::Sender<ReadResult>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let abort = cancel.child_token();
        let failure: Arc<Mutex<Option<BulkExecutionError>>> = Arc::default();
        let mut tasks = JoinSet::new();
        'dispatch: for statement in statements {
            if abort.is_cancelled() {
                break;
            }
            let query_permit = match &self.queries {
                Some(s) => {
                    let acquired = tokio::select! {
                        _ = abort.cancelled() => break 'dispatch,
                        p = s.clone().acquire_owned() => p,
                    };
                    match acquired {
                        Ok(p) => Some(p),
                        Err(_) => break 'dispatch,
                    }
                }
                None => None,
            };
            if let Some(limiter) = &self.limiter {
                tokio::select! {
                    _ = abort.cancelled() => break 'dispatch,
                    _ = limiter.until_ready() => {}
                }
            }
            let request_permit = match &self.requests {
                Some(s) => {
                    let acquired = tokio::select! {
                        _ = abort.cancelled() => break 'dispatch,
                        p = s.clone().acquire_owned() => p,
                    };
                    match acquired {
                        Ok(p) => Some(p),
                        Err(_) => break 'dispatch,
                    }
                }
                None => None,
            };
            if self.dry_run {
                continue;
            }
            let session = self.session.clone();
            let tx = tx.clone();
            let abort = abort.clone();
            let failure = failure.clone();
            let fail_fast = self.fail_fast;
            let options = self.read_options;
            tasks.spawn(async move {
                let _query_permit = query_permit;
                let _request_permit = request_permit;
                let statement = Arc::new(statement);
                // Row demand: the bounded channel is what downstream
                // backpressure propagates through.
                let demand = options.page_size.min(1024).max(1);
                let (row_tx, mut row_rx) = mpsc::channel(demand);
                let reader = session.read(&statement, options, row_tx, abort.clone());
                let forward = async {
                    while let Some(item) = row_rx.recv().await {
                        match item {
                            Ok(row) => {
                                if tx.send(ReadResult::row(statement.clone(), row)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                let fatal = e.is_fatal();
                                let error = BulkExecutionError {
                                    query: statement.template.query.clone(),
                                    source: e,
                                };
                                if fail_fast || fatal {
                                    let mut slot = failure.lock().unwrap();
                                    if slot.is_none() {
                                        *slot = Some(error.clone());
                                    }
                                    abort.cancel();
                                }
                                let _ = tx
                                    .send(ReadResult::failure(statement.clone(), error))
                                    .await;
                                break;
                            }
                        }
                    }
                };
                let (driver_outcome, ()) = tokio::join!(reader, forward);
                if let Err(e) = driver_outcome {
                    debug!(error = %e, "read terminated with driver error");
                }
            });
        }
        while tasks.join_next().await.is_some() {}
        let stored = failure.lock().unwrap().take();
        match stored {
            Some(error) => Err(BulkError::Execution(error)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cqlbulk_core::testing::{row, MockSession};
    use cqlbulk_core::{
        Consistency, CqlType, CqlValue, DriverError, PreparedTemplate, RecordMeta, VariableDef,
    };
    use std::time::{Duration, Instant};
    use url::Url;

    fn template() -> Arc<PreparedTemplate> {
        Arc::new(PreparedTemplate::new(
            "INSERT INTO ks.t (k) VALUES (:k)",
            vec![VariableDef { name: "k".into(), cql_type: CqlType::Text }],
            vec![0],
        ))
    }

    fn unit(position: u64) -> WriteUnit {
        let meta = RecordMeta::new(
            "src",
            Arc::new(Url::parse("memory://rows").unwrap()),
            position,
        );
        let mut s = BoundStatement::new(template(), Consistency::LocalOne).with_origin(meta);
        s.values[0] = CqlValue::Text(format!("k{position}"));
        WriteUnit::Statement(s)
    }

    fn settings(f: impl FnOnce(&mut ExecutorSettings)) -> ExecutorSettings {
        let mut s = ExecutorSettings::default();
        f(&mut s);
        s
    }

    async fn run_writes(
        executor: &BulkExecutor,
        units: Vec<WriteUnit>,
    ) -> (Result<()>, Vec<WriteResult>) {
        let (unit_tx, unit_rx) = mpsc::channel(256);
        let (result_tx, mut result_rx) = mpsc::channel(256);
        for u in units {
            unit_tx.send(u).await.unwrap();
        }
        drop(unit_tx);
        let outcome = executor
            .write_stream(unit_rx, result_tx, CancellationToken::new())
            .await;
        let mut results = vec![];
        while let Some(r) = result_rx.recv().await {
            results.push(r);
        }
        (outcome, results)
    }

    #[tokio::test]
    async fn one_result_per_unit() {
        let session = Arc::new(MockSession::new());
        let executor = BulkExecutor::new(session.clone(), &settings(|_| {}), false);
        let (outcome, results) = run_writes(&executor, (1..=24).map(unit).collect()).await;
        outcome.unwrap();
        assert_eq!(results.len(), 24);
        assert!(results.iter().all(WriteResult::is_success));
        assert_eq!(session.queries_observed(), 24);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn in_flight_requests_never_exceed_the_bound() {
        let session =
            Arc::new(MockSession::new().with_latency(Duration::from_millis(10)));
        let executor = BulkExecutor::new(
            session.clone(),
            &settings(|s| s.max_in_flight_requests = 4),
            false,
        );
        let (outcome, results) = run_writes(&executor, (1..=32).map(unit).collect()).await;
        outcome.unwrap();
        assert_eq!(results.len(), 32);
        assert!(
            session.peak_in_flight() <= 4,
            "peak in-flight was {}",
            session.peak_in_flight()
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn rate_limiter_throttles_dispatch() {
        let session = Arc::new(MockSession::new());
        let executor = BulkExecutor::new(
            session.clone(),
            &settings(|s| s.max_requests_per_second = 2),
            false,
        );
        let start = Instant::now();
        let (outcome, results) = run_writes(&executor, (1..=5).map(unit).collect()).await;
        outcome.unwrap();
        assert_eq!(results.len(), 5);
        // Burst of 2, then 3 more at 2/s.
        assert!(
            start.elapsed() >= Duration::from_millis(1200),
            "finished in {:?}",
            start.elapsed()
        );
    }

    #[tokio::test]
    async fn fail_safe_captures_failures_and_continues() {
        let session = Arc::new(MockSession::new());
        session.prime_failure(3, DriverError::WriteFailure, 1);
        let executor = BulkExecutor::new(session.clone(), &settings(|_| {}), false);
        let (outcome, results) = run_writes(&executor, (1..=10).map(unit).collect()).await;
        outcome.unwrap();
        assert_eq!(results.len(), 10);
        assert_eq!(results.iter().filter(|r| !r.is_success()).count(), 1);
    }

    #[tokio::test]
    async fn fail_fast_surfaces_the_first_error() {
        let session = Arc::new(MockSession::new());
        session.prime_failure(2, DriverError::WriteFailure, 1);
        let executor =
            BulkExecutor::new(session.clone(), &settings(|s| s.fail_fast = true), false);
        let (outcome, _results) = run_writes(&executor, (1..=100).map(unit).collect()).await;
        let err = outcome.unwrap_err();
        assert!(matches!(err, BulkError::Execution(_)));
        // Dispatch stopped early; nowhere near all 100 were observed.
        assert!(session.queries_observed() < 100);
    }

    #[tokio::test]
    async fn fatal_session_error_aborts_even_in_fail_safe() {
        let session = Arc::new(MockSession::new());
        session.prime_failure(1, DriverError::SessionClosed, 10);
        let executor = BulkExecutor::new(session.clone(), &settings(|_| {}), false);
        let (outcome, _results) = run_writes(&executor, (1..=50).map(unit).collect()).await;
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn dry_run_dispatches_nothing() {
        let session = Arc::new(MockSession::new());
        let executor = BulkExecutor::new(session.clone(), &settings(|_| {}), true);
        let (outcome, results) = run_writes(&executor, (1..=24).map(unit).collect()).await;
        outcome.unwrap();
        assert_eq!(results.len(), 24);
        assert!(results.iter().all(WriteResult::is_success));
        assert_eq!(session.queries_observed(), 0);
    }

    #[tokio::test]
    async fn read_stream_emits_rows_then_completes() {
        let rows = vec![
            row(vec![("v", CqlValue::Int(1))]),
            row(vec![("v", CqlValue::Int(2))]),
        ];
        let session = Arc::new(MockSession::new().with_rows(rows));
        let executor = BulkExecutor::new(session.clone(), &settings(|_| {}), false);
        let statement = {
            let WriteUnit::Statement(s) = unit(1) else { unreachable!() };
            s
        };
        let (tx, mut rx) = mpsc::channel(16);
        executor
            .read_stream(vec![statement], tx, CancellationToken::new())
            .await
            .unwrap();
        let mut rows_seen = 0;
        while let Some(result) = rx.recv().await {
            assert!(result.is_success());
            rows_seen += 1;
        }
        assert_eq!(rows_seen, 2);
    }

    #[tokio::test]
    async fn read_failure_is_captured_in_fail_safe() {
        let rows = vec![
            row(vec![("v", CqlValue::Int(1))]),
            row(vec![("v", CqlValue::Int(2))]),
            row(vec![("v", CqlValue::Int(3))]),
        ];
        let session = Arc::new(MockSession::new().with_rows(rows));
        session.prime_read_failure(1, DriverError::ReadTimeout);
        let executor = BulkExecutor::new(session.clone(), &settings(|_| {}), false);
        let statement = {
            let WriteUnit::Statement(s) = unit(1) else { unreachable!() };
            s
        };
        let (tx, mut rx) = mpsc::channel(16);
        executor
            .read_stream(vec![statement], tx, CancellationToken::new())
            .await
            .unwrap();
        let results: Vec<_> = {
            let mut v = vec![];
            while let Some(r) = rx.recv().await {
                v.push(r);
            }
            v
        };
        assert_eq!(results.len(), 2);
        assert!(results[0].is_success());
        assert!(!results[1].is_success());
    }
}
