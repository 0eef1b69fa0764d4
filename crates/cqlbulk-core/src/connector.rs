//! The connector contract.
//!
//! Connector implementations (delimited text, line-delimited JSON, URL
//! streams) live outside this workspace; the engine consumes them through
//! this trait. A reading connector runs as its own task and pushes records
//! into a bounded channel — the channel capacity is the demand the pipeline
//! grants it. A writing connector drains a channel of records produced by
//! the unload mapper.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::record::Record;
use crate::settings::ConnectorSettings;

/// Sender side of a record channel between pipeline operators.
pub type RecordTx = mpsc::Sender<Record>;

/// Receiver side of a record channel between pipeline operators.
pub type RecordRx = mpsc::Receiver<Record>;

/// A source or sink of records over some external medium.
///
/// Lifecycle: `configure` → `init` → `read` or `write` → `close`. Resource
/// URIs observed in emitted records must be stable for the whole operation,
/// and positions within one resource must ascend from 1 without gaps.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Validate and store settings. `read` tells the connector which
    /// direction it will be used in, so it can reject write-only options on
    /// a read and vice versa.
    fn configure(&mut self, settings: &ConnectorSettings, read: bool) -> Result<()>;

    /// Acquire resources (open files, resolve URLs). Called once, after
    /// `configure`.
    async fn init(&mut self) -> Result<()>;

    /// Release all resources. Idempotent; safe to call from any state.
    async fn close(&mut self) -> Result<()>;

    /// Read all resources, emitting records in ascending position order per
    /// resource. Rows that fail to parse are emitted as
    /// [`Record::Error`](crate::record::Record) rather than terminating the
    /// stream. Returns when all resources are exhausted, the channel
    /// closes, or `cancel` fires.
    async fn read(&mut self, tx: RecordTx, cancel: CancellationToken) -> Result<()>;

    /// Drain the channel, writing one external row per record. Returns when
    /// the channel closes or `cancel` fires.
    async fn write(&mut self, rx: RecordRx, cancel: CancellationToken) -> Result<()>;
}
