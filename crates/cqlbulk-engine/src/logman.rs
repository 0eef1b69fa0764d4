//! The log manager: per-record outcome bookkeeping.
//!
//! Consumes results and error records, appends failures to per-category
//! bad-record files, tracks the highest contiguous processed position per
//! resource, and enforces the error ceiling. The ceiling fires at most
//! once: later failures still reach the disk log but do not re-emit the
//! abort. File writes go through a mutex-guarded writer per manager, which
//! gives each file a single-writer discipline; counters are atomic and
//! consulted lock-free by the stats reporter.

use std::collections::{BTreeSet, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use cqlbulk_core::settings::LogSettings;
use cqlbulk_core::{BulkError, ErrorRecord, ErrorThreshold, RecordMeta};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Bad-record file categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogCategory {
    Connector,
    Mapping,
    Load,
    Unload,
}

impl LogCategory {
    pub fn file_name(self) -> &'static str {
        match self {
            LogCategory::Connector => "connector-errors.log",
            LogCategory::Mapping => "mapping-errors.log",
            LogCategory::Load => "load-errors.log",
            LogCategory::Unload => "unload-errors.log",
        }
    }
}

/// Highest contiguous processed position for one resource, with a bounded
/// window of out-of-order completions.
#[derive(Debug, Default)]
struct PositionTracker {
    contiguous: u64,
    held: BTreeSet<u64>,
}

impl PositionTracker {
    fn ack(&mut self, position: u64, max_held: usize, resource: &str) {
        if position <= self.contiguous {
            return;
        }
        if position == self.contiguous + 1 {
            self.contiguous = position;
            while self.held.remove(&(self.contiguous + 1)) {
                self.contiguous += 1;
            }
            return;
        }
        self.held.insert(position);
        if self.held.len() > max_held {
            // Window full: stop tracking the oldest hole and move the
            // watermark over it.
            let next = *self.held.iter().next().unwrap();
            warn!(
                resource,
                hole_start = self.contiguous + 1,
                hole_end = next - 1,
                "held-position window exceeded, dropping oldest hole from tracking"
            );
            self.held.remove(&next);
            self.contiguous = next;
            while self.held.remove(&(self.contiguous + 1)) {
                self.contiguous += 1;
            }
        }
    }
}

/// Format a cause chain, optionally hiding entries matching the configured
/// prefixes and truncating depth. `depth = 0` and no filters yields the
/// full chain.
fn format_chain(error: &BulkError, depth: usize, filters: &[String]) -> String {
    let mut lines = vec![error.to_string()];
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        lines.push(format!("  Caused by: {cause}"));
        source = cause.source();
    }
    let filtered: Vec<String> = lines
        .into_iter()
        .filter(|line| {
            !filters
                .iter()
                .any(|prefix| line.trim_start().trim_start_matches("Caused by: ").starts_with(prefix.as_str()))
        })
        .collect();
    let truncated = if depth > 0 && filtered.len() > depth {
        let hidden = filtered.len() - depth;
        let mut kept: Vec<String> = filtered.into_iter().take(depth).collect();
        kept.push(format!("  ... {hidden} more"));
        kept
    } else {
        filtered
    };
    truncated.join("\n")
}

pub struct LogManager {
    directory: PathBuf,
    threshold: ErrorThreshold,
    max_held: usize,
    trace_depth: usize,
    trace_filters: Vec<String>,
    total: AtomicU64,
    errors: AtomicU64,
    observed_at_abort: AtomicU64,
    aborted: AtomicBool,
    io_failed: AtomicBool,
    closed: AtomicBool,
    abort_token: CancellationToken,
    files: Mutex<HashMap<LogCategory, BufWriter<File>>>,
    positions: Mutex<HashMap<String, PositionTracker>>,
}

impl LogManager {
    pub fn new(execution_dir: &Path, settings: &LogSettings) -> Result<Self, BulkError> {
        std::fs::create_dir_all(execution_dir).map_err(|e| {
            BulkError::Fatal(anyhow::anyhow!(
                "cannot create execution directory {}: {e}",
                execution_dir.display()
            ))
        })?;
        let threshold = settings.max_errors.parse().map_err(BulkError::Config)?;
        Ok(Self {
            directory: execution_dir.to_path_buf(),
            threshold,
            max_held: settings.max_held_positions.max(1),
            trace_depth: settings.stack_trace_depth,
            trace_filters: settings.stack_trace_filters.clone(),
            total: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            observed_at_abort: AtomicU64::new(0),
            aborted: AtomicBool::new(false),
            io_failed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            abort_token: CancellationToken::new(),
            files: Mutex::new(HashMap::new()),
            positions: Mutex::new(HashMap::new()),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Cancelled when the error ceiling is exceeded. The workflow driver
    /// watches this to abort.
    pub fn abort_token(&self) -> CancellationToken {
        self.abort_token.clone()
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// The error the workflow reports after an abort, carrying the counter
    /// value observed at the moment the ceiling fired.
    pub fn abort_error(&self) -> Option<BulkError> {
        if !self.is_aborted() {
            return None;
        }
        if self.io_failed.load(Ordering::SeqCst) {
            return Some(BulkError::Fatal(anyhow::anyhow!(
                "cannot write bad-record files under {}",
                self.directory.display()
            )));
        }
        Some(BulkError::TooManyErrors {
            observed: self.observed_at_abort.load(Ordering::SeqCst).max(1),
            ceiling: self.threshold.to_string(),
        })
    }

    /// One successful terminal outcome.
    pub fn record_success(&self, meta: &RecordMeta) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.ack_position(meta);
    }

    /// One failed terminal outcome: persists the bad-record entry, counts
    /// it against the ceiling, and fires the abort token the first time the
    /// ceiling is exceeded.
    pub fn record_failure(
        &self,
        category: LogCategory,
        meta: Option<&RecordMeta>,
        error: &BulkError,
    ) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let errors = self.errors.fetch_add(1, Ordering::SeqCst) + 1;
        if let Err(e) = self.append_entry(category, meta, error) {
            // Failing to persist outcomes is itself fatal: force the abort
            // path so the workflow stops.
            warn!(error = %e, "cannot write bad-record file, aborting");
            self.io_failed.store(true, Ordering::SeqCst);
            self.aborted.store(true, Ordering::SeqCst);
            self.abort_token.cancel();
            return;
        }
        if let Some(meta) = meta {
            self.ack_position(meta);
        }
        if self.threshold.exceeded(errors, self.total())
            && !self.aborted.swap(true, Ordering::SeqCst)
        {
            self.observed_at_abort.store(errors, Ordering::SeqCst);
            self.abort_token.cancel();
        }
    }

    pub fn record_error_record(&self, record: &ErrorRecord) {
        let category = match record.cause() {
            BulkError::Mapping(_) => LogCategory::Mapping,
            _ => LogCategory::Connector,
        };
        self.record_failure(category, Some(record.meta()), record.cause());
    }

    /// The sanitized chain shown to the user; the on-disk entry always
    /// carries the full chain.
    pub fn sanitize(&self, error: &BulkError) -> String {
        format_chain(error, self.trace_depth, &self.trace_filters)
    }

    fn ack_position(&self, meta: &RecordMeta) {
        let mut positions = self.positions.lock().unwrap();
        let resource = meta.resource.as_str();
        let tracker = positions.entry(resource.to_string()).or_default();
        tracker.ack(meta.position, self.max_held, resource);
    }

    fn append_entry(
        &self,
        category: LogCategory,
        meta: Option<&RecordMeta>,
        error: &BulkError,
    ) -> std::io::Result<()> {
        let mut files = self.files.lock().unwrap();
        let writer = match files.entry(category) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(self.directory.join(category.file_name()))?;
                e.insert(BufWriter::new(file))
            }
        };
        if let Some(meta) = meta {
            writeln!(writer, "Resource: {}", meta.resource)?;
            writeln!(writer, "Position: {}", meta.position)?;
            writeln!(writer, "Source: {}", escape_source(&meta.source))?;
        }
        // Full chain on disk, always.
        writeln!(writer, "{}", format_chain(error, 0, &[]))?;
        writeln!(writer)?;
        writer.flush()
    }

    /// Flush bad-record files and write the positions summary. Idempotent;
    /// later calls are no-ops.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut files = self.files.lock().unwrap();
        for writer in files.values_mut() {
            let _ = writer.flush();
        }
        let positions = self.positions.lock().unwrap();
        if positions.is_empty() {
            return;
        }
        let mut entries: Vec<_> = positions
            .iter()
            .map(|(resource, tracker)| (resource.clone(), tracker.contiguous))
            .collect();
        entries.sort();
        if let Ok(file) = File::create(self.directory.join("positions.txt")) {
            let mut writer = BufWriter::new(file);
            for (resource, contiguous) in entries {
                let _ = writeln!(writer, "{resource}:1-{contiguous}");
            }
            let _ = writer.flush();
        }
    }
}

fn escape_source(source: &str) -> String {
    source.replace('\\', "\\\\").replace('\n', "\\n").replace('\r', "\\r")
}
