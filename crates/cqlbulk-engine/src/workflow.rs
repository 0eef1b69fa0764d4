//! Workflow drivers: LOAD, UNLOAD and COUNT.
//!
//! A workflow wires the pipeline together: one task per operator, bounded
//! channels between them, a root cancellation token with a child token per
//! task. Execution ends in one of five terminal states; `close` is
//! idempotent and safe from any state, including concurrently with
//! `execute`. Cancellation is cooperative with a 10-second grace: a
//! pipeline that does not unwind in time is declared crashed.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cqlbulk_codec::{ConversionContext, CodecRegistry, RecordMapper};
use cqlbulk_core::connector::{Connector, RecordRx};
use cqlbulk_core::{
    BoundStatement, BulkError, BulkSettings, DriverSession, ExternalType, PreparedTemplate,
    Record, RecordMeta, WriteResult,
};
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use url::Url;

use crate::batcher::BatchingEngine;
use crate::executor::BulkExecutor;
use crate::logman::{LogCategory, LogManager};
use crate::stats::RateReporter;

const CHANNEL_CAPACITY: usize = 128;
const CANCEL_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Load,
    Unload,
    Count,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Load => write!(f, "load"),
            Operation::Unload => write!(f, "unload"),
            Operation::Count => write!(f, "count"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStatus {
    Created,
    Initialized,
    Executing,
    CompletedOk,
    CompletedWithErrors,
    Aborted,
    Interrupted,
    Crashed,
    Closed,
}

/// Final account of one execution, consumed by the binary for exit codes
/// and the closing summary.
#[derive(Debug, Clone)]
pub struct WorkflowReport {
    pub operation: Operation,
    pub status: WorkflowStatus,
    pub records: u64,
    pub errors: u64,
    /// Rows read from the database (UNLOAD and COUNT).
    pub rows: u64,
    pub execution_dir: Option<PathBuf>,
    /// Sanitized failure chain, present for aborted/crashed runs.
    pub failure: Option<String>,
    /// Distinguishes ceiling aborts (exit 2) from fatal aborts (exit 3).
    pub fatal: bool,
}

impl WorkflowReport {
    pub fn exit_code(&self) -> i32 {
        match self.status {
            WorkflowStatus::CompletedOk => 0,
            WorkflowStatus::CompletedWithErrors => 1,
            WorkflowStatus::Aborted => {
                if self.fatal {
                    3
                } else {
                    2
                }
            }
            WorkflowStatus::Interrupted => 4,
            _ => 5,
        }
    }
}

/// Render the execution id: a user template with `{operation}`,
/// `{timestamp}` and `{hostname}` substitutions, or `OPERATION_uuid` by
/// default.
pub fn execution_id(operation: Operation, template: Option<&str>) -> String {
    match template {
        None => format!(
            "{}_{}",
            operation.to_string().to_uppercase(),
            uuid::Uuid::new_v4()
        ),
        Some(template) => {
            let host = hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "localhost".into());
            template
                .replace("{operation}", &operation.to_string().to_uppercase())
                .replace(
                    "{timestamp}",
                    &chrono::Utc::now().format("%Y%m%d-%H%M%S").to_string(),
                )
                .replace("{hostname}", &host)
        }
    }
}

/// How the pipeline ended, before the report is assembled.
enum PipelineEnd {
    Completed,
    Aborted(BulkError),
    Fatal(BulkError),
    Interrupted,
    Crashed,
}

pub struct Workflow {
    operation: Operation,
    settings: BulkSettings,
    connector: tokio::sync::Mutex<Option<Box<dyn Connector>>>,
    session: Arc<dyn DriverSession>,
    state: Mutex<WorkflowStatus>,
    log: Mutex<Option<Arc<LogManager>>>,
    closed: AtomicBool,
}

impl Workflow {
    pub fn load(
        settings: BulkSettings,
        connector: Box<dyn Connector>,
        session: Arc<dyn DriverSession>,
    ) -> Self {
        Self::new(Operation::Load, settings, Some(connector), session)
    }

    pub fn unload(
        settings: BulkSettings,
        connector: Box<dyn Connector>,
        session: Arc<dyn DriverSession>,
    ) -> Self {
        Self::new(Operation::Unload, settings, Some(connector), session)
    }

    pub fn count(settings: BulkSettings, session: Arc<dyn DriverSession>) -> Self {
        Self::new(Operation::Count, settings, None, session)
    }

    fn new(
        operation: Operation,
        settings: BulkSettings,
        connector: Option<Box<dyn Connector>>,
        session: Arc<dyn DriverSession>,
    ) -> Self {
        Self {
            operation,
            settings,
            connector: tokio::sync::Mutex::new(connector),
            session,
            state: Mutex::new(WorkflowStatus::Created),
            log: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn status(&self) -> WorkflowStatus {
        *self.state.lock().unwrap()
    }

    fn set_status(&self, status: WorkflowStatus) {
        let mut state = self.state.lock().unwrap();
        // Closed is terminal; nothing overrides it.
        if *state != WorkflowStatus::Closed {
            *state = status;
        }
    }

    /// Run the workflow to a terminal state. `cancel` is the root token the
    /// caller fires on interruption signals.
    pub async fn execute(&self, cancel: CancellationToken) -> WorkflowReport {
        info!(operation = %self.operation, "workflow starting");
        let (log, end, rows) = match self.run(cancel).await {
            Ok(parts) => parts,
            Err(e) => {
                // Initialization failure: surfaced before execution began.
                error!(error = %e, "workflow failed to initialize");
                return WorkflowReport {
                    operation: self.operation,
                    status: WorkflowStatus::Aborted,
                    records: 0,
                    errors: 0,
                    rows: 0,
                    execution_dir: None,
                    failure: Some(e.to_string()),
                    fatal: true,
                };
            }
        };
        let (status, failure, fatal) = match end {
            PipelineEnd::Completed => {
                if log.errors() > 0 {
                    (WorkflowStatus::CompletedWithErrors, None, false)
                } else {
                    (WorkflowStatus::CompletedOk, None, false)
                }
            }
            PipelineEnd::Aborted(e) => {
                let fatal = !matches!(e, BulkError::TooManyErrors { .. });
                (WorkflowStatus::Aborted, Some(log.sanitize(&e)), fatal)
            }
            PipelineEnd::Fatal(e) => (WorkflowStatus::Aborted, Some(log.sanitize(&e)), true),
            PipelineEnd::Interrupted => (WorkflowStatus::Interrupted, None, false),
            PipelineEnd::Crashed => (WorkflowStatus::Crashed, None, true),
        };
        self.set_status(status);
        match status {
            WorkflowStatus::Interrupted => {
                info!(operation = %self.operation, "operation interrupted, shutting down")
            }
            WorkflowStatus::Aborted => {
                error!(operation = %self.operation, failure = failure.as_deref().unwrap_or(""), "operation aborted")
            }
            _ => info!(
                operation = %self.operation,
                records = log.total(),
                errors = log.errors(),
                "workflow finished"
            ),
        }
        WorkflowReport {
            operation: self.operation,
            status,
            records: log.total(),
            errors: log.errors(),
            rows,
            execution_dir: Some(log.directory().to_path_buf()),
            failure,
            fatal,
        }
    }

    async fn run(
        &self,
        cancel: CancellationToken,
    ) -> Result<(Arc<LogManager>, PipelineEnd, u64), BulkError> {
        // Initialization: contracts resolved, codecs built, directories
        // created. Everything here is fatal.
        let query = self.settings.schema.query.clone().ok_or_else(|| {
            BulkError::Config("schema.query is required (schema synthesis not configured)".into())
        })?;
        let template = self
            .session
            .prepare(&query)
            .await
            .map_err(|e| BulkError::Fatal(anyhow::anyhow!("prepare failed: {e}")))?;

        let context = Arc::new(ConversionContext::from_settings(&self.settings.codec)?);
        let registry = Arc::new(CodecRegistry::new(context));
        let external = if self.settings.connector.name == "json" {
            ExternalType::Json
        } else {
            ExternalType::Text
        };
        let mapper = Arc::new(RecordMapper::new(
            template.clone(),
            registry,
            external,
            &self.settings.schema,
            self.settings.driver.consistency,
        )?);

        let id = execution_id(self.operation, self.settings.engine.execution_id.as_deref());
        let dir = PathBuf::from(&self.settings.log.directory).join(id);
        let log = Arc::new(LogManager::new(&dir, &self.settings.log)?);
        *self.log.lock().unwrap() = Some(log.clone());

        if let Some(connector) = self.connector.lock().await.as_mut() {
            connector.configure(&self.settings.connector, self.operation == Operation::Load)?;
            connector.init().await?;
        }
        self.set_status(WorkflowStatus::Initialized);

        let executor = Arc::new(BulkExecutor::new(
            self.session.clone(),
            &self.settings.executor,
            self.settings.engine.dry_run,
        ));

        self.set_status(WorkflowStatus::Executing);
        let children = cancel.child_token();
        let reporter = RateReporter::spawn(
            log.clone(),
            self.settings.monitoring.console_interval_secs,
            children.clone(),
        );
        let abort = log.abort_token();

        let rows_read = Arc::new(AtomicU64::new(0));
        let mut pipeline: BoxFuture<'_, Result<(), BulkError>> = match self.operation {
            Operation::Load => {
                self.spawn_load(mapper, executor, log.clone(), children.clone()).await?
            }
            Operation::Unload => {
                self.spawn_unload(
                    template.clone(),
                    mapper,
                    executor,
                    log.clone(),
                    rows_read.clone(),
                    children.clone(),
                )
                .await?
            }
            Operation::Count => self.spawn_count(
                template.clone(),
                executor,
                log.clone(),
                rows_read.clone(),
                children.clone(),
            ),
        };

        let end = tokio::select! {
            outcome = &mut pipeline => Self::end_from_outcome(outcome, &log),
            _ = abort.cancelled() => {
                children.cancel();
                match tokio::time::timeout(CANCEL_GRACE, &mut pipeline).await {
                    Ok(_) => PipelineEnd::Aborted(
                        log.abort_error().unwrap_or(BulkError::Interrupted),
                    ),
                    Err(_) => PipelineEnd::Crashed,
                }
            }
            _ = cancel.cancelled() => {
                children.cancel();
                match tokio::time::timeout(CANCEL_GRACE, &mut pipeline).await {
                    Ok(_) => PipelineEnd::Interrupted,
                    Err(_) => PipelineEnd::Crashed,
                }
            }
        };
        reporter.stop().await;
        self.teardown(&log).await;
        Ok((log, end, rows_read.load(Ordering::Relaxed)))
    }

    fn end_from_outcome(outcome: Result<(), BulkError>, log: &LogManager) -> PipelineEnd {
        // A ceiling abort may race normal completion; the log manager is
        // authoritative.
        if let Some(abort) = log.abort_error() {
            return PipelineEnd::Aborted(abort);
        }
        match outcome {
            Ok(()) => PipelineEnd::Completed,
            Err(e) => PipelineEnd::Fatal(e),
        }
    }

    async fn teardown(&self, log: &LogManager) {
        if let Some(connector) = self.connector.lock().await.as_mut() {
            if let Err(e) = connector.close().await {
                warn!(error = %e, "connector close failed");
            }
        }
        log.close();
    }

    /// connector.read → mapper → batcher → executor.write → log sink.
    async fn spawn_load(
        &self,
        mapper: Arc<RecordMapper>,
        executor: Arc<BulkExecutor>,
        log: Arc<LogManager>,
        cancel: CancellationToken,
    ) -> Result<BoxFuture<'_, Result<(), BulkError>>, BulkError> {
        let (record_tx, record_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (stmt_tx, stmt_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (unit_tx, unit_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (result_tx, result_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let mut connector = self
            .connector
            .lock()
            .await
            .take()
            .ok_or_else(|| BulkError::Config("load requires a connector".into()))?;
        let read_cancel = cancel.clone();
        let read_task: JoinHandle<(Box<dyn Connector>, Result<(), BulkError>)> =
            tokio::spawn(async move {
                let outcome = connector.read(record_tx, read_cancel).await;
                (connector, outcome)
            });

        let map_task = tokio::spawn(run_load_mapper(
            mapper,
            log.clone(),
            record_rx,
            stmt_tx,
            cancel.clone(),
        ));

        let batcher = BatchingEngine::new(&self.settings.batch, self.session.clone());
        let batch_cancel = cancel.clone();
        let batch_task =
            tokio::spawn(async move { batcher.run(stmt_rx, unit_tx, batch_cancel).await });

        let exec_cancel = cancel.clone();
        let exec_task = tokio::spawn(async move {
            executor.write_stream(unit_rx, result_tx, exec_cancel).await
        });

        let sink_log = log.clone();
        let sink_task = tokio::spawn(run_write_log_sink(sink_log, result_rx));

        let connector_slot = &self.connector;
        Ok(Box::pin(async move {
            let (connector, read_outcome) = read_task
                .await
                .map_err(|e| BulkError::Fatal(anyhow::anyhow!("connector task panicked: {e}")))?;
            *connector_slot.lock().await = Some(connector);
            let map_outcome = map_task
                .await
                .map_err(|e| BulkError::Fatal(anyhow::anyhow!("mapper task panicked: {e}")))?;
            let batch_outcome = batch_task
                .await
                .map_err(|e| BulkError::Fatal(anyhow::anyhow!("batcher task panicked: {e}")))?;
            let exec_outcome = exec_task
                .await
                .map_err(|e| BulkError::Fatal(anyhow::anyhow!("executor task panicked: {e}")))?;
            sink_task
                .await
                .map_err(|e| BulkError::Fatal(anyhow::anyhow!("log sink task panicked: {e}")))?;
            read_outcome?;
            map_outcome?;
            batch_outcome?;
            exec_outcome
        }))
    }

    /// executor.read → inverse mapper → connector.write, results logged as
    /// they stream.
    async fn spawn_unload(
        &self,
        template: Arc<PreparedTemplate>,
        mapper: Arc<RecordMapper>,
        executor: Arc<BulkExecutor>,
        log: Arc<LogManager>,
        rows_read: Arc<AtomicU64>,
        cancel: CancellationToken,
    ) -> Result<BoxFuture<'_, Result<(), BulkError>>, BulkError> {
        let (result_tx, mut result_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (record_tx, record_rx) = mpsc::channel::<Record>(CHANNEL_CAPACITY);

        let statements =
            vec![BoundStatement::new(template, self.settings.driver.consistency)];
        let read_cancel = cancel.clone();
        let read_task = tokio::spawn(async move {
            executor.read_stream(statements, result_tx, read_cancel).await
        });

        let resource = Arc::new(unload_resource(&self.settings));
        let unmap_log = log.clone();
        let unmap_task = tokio::spawn(async move {
            let mut position = 0u64;
            while let Some(result) = result_rx.recv().await {
                match (result.row, result.error) {
                    (Some(row), None) => {
                        position += 1;
                        rows_read.fetch_add(1, Ordering::Relaxed);
                        let meta = RecordMeta::new("", resource.clone(), position);
                        match mapper.unmap(&row, meta.clone()) {
                            Record::Data(data) => {
                                unmap_log.record_success(&meta);
                                if record_tx.send(Record::Data(data)).await.is_err() {
                                    break;
                                }
                            }
                            Record::Error(err) => unmap_log.record_error_record(&err),
                        }
                    }
                    (_, Some(error)) => {
                        unmap_log.record_failure(
                            LogCategory::Unload,
                            None,
                            &BulkError::Execution(error),
                        );
                    }
                    (None, None) => {}
                }
            }
        });

        let mut connector = self
            .connector
            .lock()
            .await
            .take()
            .ok_or_else(|| BulkError::Config("unload requires a connector".into()))?;
        let write_cancel = cancel.clone();
        let write_task: JoinHandle<(Box<dyn Connector>, Result<(), BulkError>)> =
            tokio::spawn(async move {
                let outcome = connector.write(record_rx, write_cancel).await;
                (connector, outcome)
            });

        let connector_slot = &self.connector;
        Ok(Box::pin(async move {
            let read_outcome = read_task
                .await
                .map_err(|e| BulkError::Fatal(anyhow::anyhow!("read task panicked: {e}")))?;
            unmap_task
                .await
                .map_err(|e| BulkError::Fatal(anyhow::anyhow!("unmap task panicked: {e}")))?;
            let (connector, write_outcome) = write_task
                .await
                .map_err(|e| BulkError::Fatal(anyhow::anyhow!("connector task panicked: {e}")))?;
            *connector_slot.lock().await = Some(connector);
            read_outcome?;
            write_outcome
        }))
    }

    /// executor.read → row counter.
    fn spawn_count(
        &self,
        template: Arc<PreparedTemplate>,
        executor: Arc<BulkExecutor>,
        log: Arc<LogManager>,
        rows_read: Arc<AtomicU64>,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<(), BulkError>> {
        let (result_tx, mut result_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let statement = BoundStatement::new(template, self.settings.driver.consistency);
        let read_task = tokio::spawn(async move {
            executor.read_stream(vec![statement], result_tx, cancel).await
        });
        let count_task = tokio::spawn(async move {
            while let Some(result) = result_rx.recv().await {
                match result.error {
                    None => {
                        rows_read.fetch_add(1, Ordering::Relaxed);
                    }
                    Some(error) => log.record_failure(
                        LogCategory::Unload,
                        None,
                        &BulkError::Execution(error),
                    ),
                }
            }
        });
        Box::pin(async move {
            let read_outcome = read_task
                .await
                .map_err(|e| BulkError::Fatal(anyhow::anyhow!("read task panicked: {e}")))?;
            count_task
                .await
                .map_err(|e| BulkError::Fatal(anyhow::anyhow!("count task panicked: {e}")))?;
            read_outcome
        })
    }

    /// Close all held resources. Idempotent; callable from any state.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(connector) = self.connector.lock().await.as_mut() {
            if let Err(e) = connector.close().await {
                warn!(error = %e, "connector close failed");
            }
        }
        if let Some(log) = self.log.lock().unwrap().take() {
            log.close();
        }
        *self.state.lock().unwrap() = WorkflowStatus::Closed;
    }
}

fn unload_resource(settings: &BulkSettings) -> Url {
    let keyspace = settings.schema.keyspace.as_deref().unwrap_or("ks");
    let table = settings.schema.table.as_deref().unwrap_or("table");
    Url::parse(&format!("cql://{keyspace}/{table}"))
        .unwrap_or_else(|_| Url::parse("cql://unload").unwrap())
}

async fn run_load_mapper(
    mapper: Arc<RecordMapper>,
    log: Arc<LogManager>,
    mut rx: RecordRx,
    tx: mpsc::Sender<BoundStatement>,
    cancel: CancellationToken,
) -> Result<(), BulkError> {
    loop {
        let record = tokio::select! {
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(r) => r,
                None => break,
            },
        };
        match record {
            Record::Data(data) => match mapper.map(&data) {
                Ok(statement) => {
                    if tx.send(statement).await.is_err() {
                        break;
                    }
                }
                Err(error_record) => log.record_error_record(&error_record),
            },
            Record::Error(error_record) => log.record_error_record(&error_record),
        }
    }
    Ok(())
}

async fn run_write_log_sink(log: Arc<LogManager>, mut rx: mpsc::Receiver<WriteResult>) {
    while let Some(result) = rx.recv().await {
        match &result.error {
            None => {
                for statement in result.unit.statements() {
                    if let Some(meta) = &statement.origin {
                        log.record_success(meta);
                    }
                }
            }
            Some(error) => {
                // A failed unit fails every statement in it.
                for statement in result.unit.statements() {
                    log.record_failure(
                        LogCategory::Load,
                        statement.origin.as_ref(),
                        &BulkError::Execution(error.clone()),
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cqlbulk_core::testing::{row, MemoryConnector, MockSession};
    use cqlbulk_core::{CqlType, CqlValue, DriverError, VariableDef};
    use std::path::Path;

    const INSERT: &str = "INSERT INTO ks.ip_by_country \
        (country_code, country_name, beginning_ip_number) \
        VALUES (:country_code, :country_name, :beginning_ip_number)";
    const SELECT: &str =
        "SELECT country_code, country_name, beginning_ip_number FROM ks.ip_by_country";

    fn template(query: &str) -> PreparedTemplate {
        PreparedTemplate::new(
            query,
            vec![
                VariableDef { name: "country_code".into(), cql_type: CqlType::Text },
                VariableDef { name: "country_name".into(), cql_type: CqlType::Text },
                VariableDef { name: "beginning_ip_number".into(), cql_type: CqlType::BigInt },
            ],
            vec![0],
        )
    }

    fn settings(
        log_root: &Path,
        query: &str,
        tweak: impl FnOnce(&mut BulkSettings),
    ) -> BulkSettings {
        let mut s = BulkSettings::default();
        s.schema.keyspace = Some("ks".into());
        s.schema.table = Some("ip_by_country".into());
        s.schema.query = Some(query.into());
        s.schema.mapping =
            Some("0 = country_code, 1 = country_name, 2 = beginning_ip_number".into());
        s.log.directory = log_root.display().to_string();
        s.monitoring.console_interval_secs = 0;
        tweak(&mut s);
        s
    }

    fn csv_lines(n: usize) -> Vec<String> {
        (0..n)
            .map(|i| format!("C{i:02},Country {i},{}", 1000 + i))
            .collect()
    }

    fn connector(lines: &[String]) -> MemoryConnector {
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        MemoryConnector::new("file:///data/export.csv").with_csv(&[], &refs)
    }

    fn session() -> MockSession {
        MockSession::new()
            .with_template(INSERT, template(INSERT))
            .with_template(SELECT, template(SELECT))
    }

    fn error_files(execution_dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(execution_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with("-errors.log"))
            .collect();
        names.sort();
        names
    }

    async fn run_load(
        settings: BulkSettings,
        connector: MemoryConnector,
        session: Arc<MockSession>,
    ) -> WorkflowReport {
        let workflow = Workflow::load(settings, Box::new(connector), session);
        let report = workflow.execute(CancellationToken::new()).await;
        workflow.close().await;
        report
    }

    #[tokio::test]
    async fn load_clean_csv_completes_without_bad_files() {
        let root = tempfile::tempdir().unwrap();
        let session = Arc::new(session());
        let report = run_load(
            settings(root.path(), INSERT, |_| {}),
            connector(&csv_lines(24)),
            session.clone(),
        )
        .await;
        assert_eq!(report.status, WorkflowStatus::CompletedOk);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.records, 24);
        assert_eq!(report.errors, 0);
        assert_eq!(session.queries_observed(), 24);
        let dir = report.execution_dir.unwrap();
        assert!(error_files(&dir).is_empty());
        let positions = std::fs::read_to_string(dir.join("positions.txt")).unwrap();
        assert_eq!(positions.trim(), "file:///data/export.csv:1-24");
    }

    #[tokio::test]
    async fn load_with_malformed_rows_logs_mapping_errors() {
        let root = tempfile::tempdir().unwrap();
        let mut lines = csv_lines(24);
        lines.insert(4, "XX,Broken,not-a-number".into());
        lines.insert(11, "YY,Broken,also-bad".into());
        lines.insert(19, "ZZ,Broken,NaN?".into());
        let session = Arc::new(session());
        let report = run_load(
            settings(root.path(), INSERT, |_| {}),
            connector(&lines),
            session.clone(),
        )
        .await;
        assert_eq!(report.status, WorkflowStatus::CompletedWithErrors);
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.errors, 3);
        assert_eq!(session.queries_observed(), 24);
        let dir = report.execution_dir.unwrap();
        assert_eq!(error_files(&dir), vec!["mapping-errors.log"]);
        let content = std::fs::read_to_string(dir.join("mapping-errors.log")).unwrap();
        assert_eq!(content.matches("Position:").count(), 3);
        assert!(content.contains("not-a-number"));
    }

    #[tokio::test]
    async fn load_with_primed_driver_failures_retries_and_logs() {
        let root = tempfile::tempdir().unwrap();
        let session = Arc::new(session().with_max_retries(1));
        // Two retryable failures exhaust one retry each; two non-retryable
        // failures fail on the first attempt.
        session.prime_failure(3, DriverError::Unavailable, 2);
        session.prime_failure(8, DriverError::WriteTimeout, 2);
        session.prime_failure(15, DriverError::WriteFailure, 1);
        session.prime_failure(21, DriverError::FunctionFailure, 1);
        let report = run_load(
            settings(root.path(), INSERT, |_| {}),
            connector(&csv_lines(24)),
            session.clone(),
        )
        .await;
        assert_eq!(report.status, WorkflowStatus::CompletedWithErrors);
        assert_eq!(report.errors, 4);
        // 20 clean rows + 2×2 retried attempts + 2×1 direct failures.
        assert_eq!(session.queries_observed(), 26);
        let dir = report.execution_dir.unwrap();
        assert_eq!(error_files(&dir), vec!["load-errors.log"]);
        let content = std::fs::read_to_string(dir.join("load-errors.log")).unwrap();
        assert_eq!(content.matches("Position:").count(), 4);
    }

    #[tokio::test]
    async fn dry_run_dispatches_no_queries() {
        let root = tempfile::tempdir().unwrap();
        let session = Arc::new(session());
        let report = run_load(
            settings(root.path(), INSERT, |s| s.engine.dry_run = true),
            connector(&csv_lines(24)),
            session.clone(),
        )
        .await;
        assert_eq!(report.status, WorkflowStatus::CompletedOk);
        assert_eq!(report.records, 24);
        assert_eq!(session.queries_observed(), 0);
    }

    #[tokio::test]
    async fn error_ceiling_aborts_with_exit_code_2() {
        let root = tempfile::tempdir().unwrap();
        let mut lines = csv_lines(24);
        for i in 0..5 {
            lines.insert(i * 4, format!("B{i},Broken,bad-number-{i}"));
        }
        let session = Arc::new(session());
        let report = run_load(
            settings(root.path(), INSERT, |s| s.log.max_errors = "2".into()),
            connector(&lines),
            session.clone(),
        )
        .await;
        assert_eq!(report.status, WorkflowStatus::Aborted);
        assert_eq!(report.exit_code(), 2);
        assert!(report.failure.unwrap().contains("too many errors"));
        let dir = report.execution_dir.unwrap();
        let content = std::fs::read_to_string(dir.join("mapping-errors.log")).unwrap();
        assert!(content.matches("Position:").count() >= 3);
    }

    #[tokio::test]
    async fn unload_writes_rows_through_the_connector() {
        let root = tempfile::tempdir().unwrap();
        let rows: Vec<_> = (0..24)
            .map(|i| {
                row(vec![
                    ("country_code", CqlValue::Text(format!("C{i:02}"))),
                    ("country_name", CqlValue::Text(format!("Country {i}"))),
                    ("beginning_ip_number", CqlValue::BigInt(1000 + i)),
                ])
            })
            .collect();
        let session = Arc::new(session().with_rows(rows));
        let sink = MemoryConnector::new("file:///out/export.csv");
        let written = sink.written();
        let workflow =
            Workflow::unload(settings(root.path(), SELECT, |_| {}), Box::new(sink), session);
        let report = workflow.execute(CancellationToken::new()).await;
        workflow.close().await;
        assert_eq!(report.status, WorkflowStatus::CompletedOk);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.rows, 24);
        let written = written.lock().unwrap();
        assert_eq!(written.len(), 24);
        let Record::Data(first) = &written[0] else { panic!("expected data record") };
        assert_eq!(
            first.value(&cqlbulk_core::Field::Index(2)),
            Some(&cqlbulk_core::ExternalValue::Text("1000".into()))
        );
    }

    #[tokio::test]
    async fn count_reports_total_rows() {
        let root = tempfile::tempdir().unwrap();
        let rows: Vec<_> = (0..17)
            .map(|i| row(vec![("country_code", CqlValue::Text(format!("C{i}")))]))
            .collect();
        let session = Arc::new(session().with_rows(rows));
        let workflow = Workflow::count(settings(root.path(), SELECT, |_| {}), session);
        let report = workflow.execute(CancellationToken::new()).await;
        workflow.close().await;
        assert_eq!(report.status, WorkflowStatus::CompletedOk);
        assert_eq!(report.rows, 17);
    }

    #[tokio::test]
    async fn missing_query_is_a_config_abort() {
        let root = tempfile::tempdir().unwrap();
        let session = Arc::new(session());
        let report = run_load(
            settings(root.path(), INSERT, |s| s.schema.query = None),
            connector(&csv_lines(1)),
            session,
        )
        .await;
        assert_eq!(report.status, WorkflowStatus::Aborted);
        assert_eq!(report.exit_code(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancellation_interrupts_the_workflow() {
        let root = tempfile::tempdir().unwrap();
        let session = Arc::new(
            session().with_latency(std::time::Duration::from_millis(20)),
        );
        let cancel = CancellationToken::new();
        let workflow = Arc::new(Workflow::load(
            settings(root.path(), INSERT, |s| s.executor.max_in_flight_requests = 1),
            Box::new(connector(&csv_lines(500))),
            session,
        ));
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(80)).await;
            trigger.cancel();
        });
        let report = workflow.execute(cancel).await;
        workflow.close().await;
        assert_eq!(report.status, WorkflowStatus::Interrupted);
        assert_eq!(report.exit_code(), 4);
        assert!(report.records < 500);
    }

    #[test]
    fn execution_id_rendering() {
        let rendered = execution_id(Operation::Load, Some("{operation}_{timestamp}_run"));
        assert!(rendered.starts_with("LOAD_"));
        assert!(rendered.ends_with("_run"));
        let default = execution_id(Operation::Count, None);
        assert!(default.starts_with("COUNT_"));
    }
}
