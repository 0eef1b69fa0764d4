//! # cqlbulk Core - Data Model and Contracts
//!
//! This crate provides the foundational types, traits, and abstractions for
//! the cqlbulk transfer engine. It defines the record and statement data
//! model, the connector and driver contracts, the settings tree, and the
//! error taxonomy used throughout the workspace.
//!
//! ## Key Components
//!
//! - **Records**: positional rows read from external resources, with stable
//!   origin attribution ([`record`])
//! - **Values**: the external (text/JSON) and internal (typed CQL) value
//!   representations codecs convert between ([`value`])
//! - **Statements & Batches**: prepared templates, bound statements, routing
//!   keys and write units ([`statement`], [`batch`])
//! - **Contracts**: the [`Connector`](connector::Connector) and
//!   [`DriverSession`](driver::DriverSession) traits implemented outside
//!   this workspace
//! - **Settings**: the hierarchical configuration tree with dotted-key
//!   overrides ([`settings`])
//! - **Errors**: the recoverable/fatal taxonomy driving exit codes
//!   ([`error`])
//!
//! Operators communicate over bounded `tokio::mpsc` channels of [`Record`]s
//! and derived items; channel capacity is the backpressure demand granted to
//! the upstream operator.

pub mod batch;
pub mod connector;
pub mod driver;
pub mod error;
pub mod record;
pub mod result;
pub mod settings;
pub mod statement;
pub mod value;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use batch::{Batch, BatchMode, WriteUnit};
pub use connector::{Connector, RecordRx, RecordTx};
pub use driver::{DriverSession, ReadOptions};
pub use error::{BulkError, BulkExecutionError, CodecError, DriverError, MappingError, Result};
pub use record::{DataRecord, ErrorRecord, Field, Record, RecordMeta};
pub use result::{ReadResult, Row, WriteResult};
pub use settings::{
    BulkSettings, CodecSettings, ConnectorSettings, ErrorThreshold, ExecutorSettings,
    LogSettings, OverflowStrategy, RoundingMode, SchemaSettings, TimeUnit, UuidStrategy,
};
pub use statement::{BoundStatement, Consistency, PreparedTemplate, Token, VariableDef};
pub use value::{CqlType, CqlValue, ExternalType, ExternalValue, LineString, Point, Polygon};
