//! In-memory doubles for the connector and driver contracts.
//!
//! These back the end-to-end workflow tests: [`MemoryConnector`] plays a
//! delimited-text source/sink without touching the filesystem, and
//! [`MockSession`] plays a primed cluster that can be told to fail specific
//! rows with specific driver errors. Both record enough observations
//! (queries seen, peak concurrency, dispatch timestamps) to assert the
//! executor's invariants.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use indexmap::IndexMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::batch::WriteUnit;
use crate::connector::{Connector, RecordRx, RecordTx};
use crate::driver::{DriverSession, ReadOptions};
use crate::error::{BulkError, DriverError, Result};
use crate::record::{DataRecord, ErrorRecord, Field, Record, RecordMeta};
use crate::result::Row;
use crate::settings::ConnectorSettings;
use crate::statement::{BoundStatement, PreparedTemplate, Token};
use crate::value::ExternalValue;

/// One row held by a [`MemoryConnector`].
#[derive(Debug, Clone)]
enum MemoryRow {
    Data { source: String, fields: Vec<(Field, ExternalValue)> },
    Bad { source: String, cause: String },
}

/// A connector over in-memory rows with a stable synthetic resource URI.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    resource: Option<Arc<Url>>,
    rows: Vec<MemoryRow>,
    written: Arc<Mutex<Vec<Record>>>,
}

impl MemoryConnector {
    pub fn new(resource: &str) -> Self {
        Self {
            resource: Some(Arc::new(Url::parse(resource).expect("resource url"))),
            rows: vec![],
            written: Arc::default(),
        }
    }

    /// Add rows from comma-separated lines, fields named by `header`.
    pub fn with_csv(mut self, header: &[&str], lines: &[&str]) -> Self {
        for line in lines {
            let fields = line
                .split(',')
                .enumerate()
                .map(|(i, cell)| {
                    let field = header
                        .get(i)
                        .map(|h| Field::Name((*h).to_string()))
                        .unwrap_or(Field::Index(i));
                    (field, ExternalValue::Text(cell.to_string()))
                })
                .collect();
            self.rows.push(MemoryRow::Data { source: (*line).to_string(), fields });
        }
        self
    }

    /// Add a row the connector itself fails to parse; it will be emitted as
    /// an error record.
    pub fn with_bad_row(mut self, source: &str, cause: &str) -> Self {
        self.rows
            .push(MemoryRow::Bad { source: source.to_string(), cause: cause.to_string() });
        self
    }

    /// Handle to everything a write direction received.
    pub fn written(&self) -> Arc<Mutex<Vec<Record>>> {
        self.written.clone()
    }

    fn resource(&self) -> Arc<Url> {
        self.resource
            .clone()
            .unwrap_or_else(|| Arc::new(Url::parse("memory://records").unwrap()))
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    fn configure(&mut self, _settings: &ConnectorSettings, _read: bool) -> Result<()> {
        Ok(())
    }

    async fn init(&mut self) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    async fn read(&mut self, tx: RecordTx, cancel: CancellationToken) -> Result<()> {
        let resource = self.resource();
        for (i, row) in self.rows.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            let position = (i + 1) as u64;
            let record = match row {
                MemoryRow::Data { source, fields } => {
                    let meta = RecordMeta::new(source.as_str(), resource.clone(), position);
                    Record::Data(DataRecord::new(meta, fields.iter().cloned().collect()))
                }
                MemoryRow::Bad { source, cause } => {
                    let meta = RecordMeta::new(source.as_str(), resource.clone(), position);
                    Record::Error(ErrorRecord::new(
                        meta,
                        BulkError::Connector(anyhow::anyhow!("{cause}")),
                    ))
                }
            };
            if tx.send(record).await.is_err() {
                break;
            }
        }
        Ok(())
    }

    async fn write(&mut self, mut rx: RecordRx, cancel: CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(record) => self.written.lock().unwrap().push(record),
                    None => break,
                },
            }
        }
        Ok(())
    }
}

/// How a primed failure behaves inside the mock driver's retry loop.
#[derive(Debug, Clone)]
struct PrimedFailure {
    error: DriverError,
    /// Attempts that fail before the mock would succeed. When this exceeds
    /// the configured retries the statement ultimately fails.
    failing_attempts: u32,
}

/// A driver session double with primed responses and observation counters.
pub struct MockSession {
    templates: Mutex<HashMap<String, Arc<PreparedTemplate>>>,
    rows_per_read: Vec<Row>,
    max_retries: u32,
    latency: Duration,
    primed: Mutex<HashMap<u64, PrimedFailure>>,
    read_failure: Mutex<Option<(usize, DriverError)>>,
    executed: Mutex<Vec<WriteUnit>>,
    queries_observed: AtomicU64,
    dispatch_times: Mutex<Vec<Instant>>,
    in_flight: AtomicI64,
    peak_in_flight: AtomicI64,
}

impl MockSession {
    pub fn new() -> Self {
        Self {
            templates: Mutex::default(),
            rows_per_read: vec![],
            max_retries: 0,
            latency: Duration::from_millis(0),
            primed: Mutex::default(),
            read_failure: Mutex::default(),
            executed: Mutex::default(),
            queries_observed: AtomicU64::new(0),
            dispatch_times: Mutex::default(),
            in_flight: AtomicI64::new(0),
            peak_in_flight: AtomicI64::new(0),
        }
    }

    pub fn with_template(self, query: &str, template: PreparedTemplate) -> Self {
        self.templates.lock().unwrap().insert(query.to_string(), Arc::new(template));
        self
    }

    pub fn with_rows(mut self, rows: Vec<Row>) -> Self {
        self.rows_per_read = rows;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Prime the statement originating at `position` to fail `attempts`
    /// times with `error` before succeeding. Retryable errors (timeouts,
    /// unavailable) are retried up to `max_retries` inside `execute`, like
    /// a real driver's retry policy.
    pub fn prime_failure(&self, position: u64, error: DriverError, attempts: u32) {
        self.primed
            .lock()
            .unwrap()
            .insert(position, PrimedFailure { error, failing_attempts: attempts });
    }

    /// Prime reads to fail after emitting `after_rows` rows.
    pub fn prime_read_failure(&self, after_rows: usize, error: DriverError) {
        *self.read_failure.lock().unwrap() = Some((after_rows, error));
    }

    pub fn queries_observed(&self) -> u64 {
        self.queries_observed.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<WriteUnit> {
        self.executed.lock().unwrap().clone()
    }

    pub fn peak_in_flight(&self) -> i64 {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn dispatch_times(&self) -> Vec<Instant> {
        self.dispatch_times.lock().unwrap().clone()
    }

    fn is_retryable(error: &DriverError) -> bool {
        matches!(
            error,
            DriverError::Unavailable | DriverError::WriteTimeout | DriverError::ReadTimeout
        )
    }

    fn observe_attempt(&self) {
        self.queries_observed.fetch_add(1, Ordering::SeqCst);
        self.dispatch_times.lock().unwrap().push(Instant::now());
    }

    async fn run_statement(&self, statement: &BoundStatement) -> Result<(), DriverError> {
        let primed = statement
            .origin
            .as_ref()
            .and_then(|meta| self.primed.lock().unwrap().get(&meta.position).cloned());
        let Some(failure) = primed else {
            self.observe_attempt();
            return Ok(());
        };
        let budget = if Self::is_retryable(&failure.error) { self.max_retries + 1 } else { 1 };
        let attempts = budget.min(failure.failing_attempts + 1);
        for _ in 0..attempts {
            self.observe_attempt();
        }
        if failure.failing_attempts >= budget {
            Err(failure.error)
        } else {
            Ok(())
        }
    }
}

impl Default for MockSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DriverSession for MockSession {
    async fn prepare(&self, query: &str) -> Result<Arc<PreparedTemplate>, DriverError> {
        let templates = self.templates.lock().unwrap();
        templates
            .get(query)
            .cloned()
            .ok_or_else(|| DriverError::Syntax(format!("unknown query: {query}")))
    }

    async fn execute(&self, unit: &WriteUnit) -> Result<(), DriverError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let mut outcome = Ok(());
        for statement in unit.statements() {
            if let Err(e) = self.run_statement(statement).await {
                outcome = Err(e);
            }
        }
        self.executed.lock().unwrap().push(unit.clone());
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    async fn read(
        &self,
        _statement: &BoundStatement,
        _options: ReadOptions,
        tx: mpsc::Sender<Result<Row, DriverError>>,
        cancel: CancellationToken,
    ) -> Result<(), DriverError> {
        self.observe_attempt();
        let failure = self.read_failure.lock().unwrap().clone();
        for (i, row) in self.rows_per_read.iter().enumerate() {
            if cancel.is_cancelled() {
                return Ok(());
            }
            if let Some((after, error)) = &failure {
                if i >= *after {
                    let _ = tx.send(Err(error.clone())).await;
                    return Err(error.clone());
                }
            }
            if tx.send(Ok(row.clone())).await.is_err() {
                return Ok(());
            }
        }
        Ok(())
    }

    fn token_for(&self, routing_key: &Bytes) -> Token {
        // FNV-1a, folded to i64; stable across runs so tests can predict
        // grouping.
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for b in routing_key.as_ref() {
            hash ^= u64::from(*b);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        Token(hash as i64)
    }

    fn replicas_for(&self, token: Token) -> Vec<String> {
        let first = (token.0.rem_euclid(3)) as u8;
        vec![format!("node{first}"), format!("node{}", (first + 1) % 3)]
    }
}

/// Convenience: a row from column/value pairs.
pub fn row(columns: Vec<(&str, crate::value::CqlValue)>) -> Row {
    let mut map = IndexMap::new();
    for (name, value) in columns {
        map.insert(name.to_string(), value);
    }
    Row { columns: map }
}
