//! The database driver contract.
//!
//! The wire-level driver lives outside this workspace. The engine requires:
//! async prepare/execute, a row stream for reads with channel-driven demand,
//! and the token/replica topology hints the batching engine groups by. The
//! session is internally thread-safe and shared as `Arc<dyn DriverSession>`
//! across every operator; operators hold non-owning handles and never close
//! it themselves.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::batch::WriteUnit;
use crate::error::DriverError;
use crate::result::Row;
use crate::statement::{BoundStatement, PreparedTemplate, Token};
use std::sync::Arc;

/// Read-shaping options passed through to the driver.
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    /// Rows per page.
    pub page_size: usize,
    /// When true the driver keeps pages flowing server-side instead of
    /// round-tripping a fetch per page; demand is still bounded by the row
    /// channel's capacity.
    pub continuous_paging: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self { page_size: 5000, continuous_paging: false }
    }
}

/// A shared handle to one database session.
#[async_trait]
pub trait DriverSession: Send + Sync {
    /// Prepare a CQL statement, returning the template with variable
    /// definitions and partition-key metadata.
    async fn prepare(&self, query: &str) -> Result<Arc<PreparedTemplate>, DriverError>;

    /// Execute a write unit (single statement or batch). Driver-level
    /// retries happen inside this call; the engine only distinguishes
    /// success from failure.
    async fn execute(&self, unit: &WriteUnit) -> Result<(), DriverError>;

    /// Execute a read statement, pushing rows into `tx` until exhaustion,
    /// channel closure, or cancellation. A multi-page read is one call.
    /// Errors are sent through the channel and also returned.
    async fn read(
        &self,
        statement: &BoundStatement,
        options: ReadOptions,
        tx: mpsc::Sender<Result<Row, DriverError>>,
        cancel: CancellationToken,
    ) -> Result<(), DriverError>;

    /// Map a routing key onto the partitioner ring.
    fn token_for(&self, routing_key: &Bytes) -> Token;

    /// The replica set owning a token, used by replica-set batching. Order
    /// is canonical: equal sets compare equal.
    fn replicas_for(&self, token: Token) -> Vec<String>;
}
