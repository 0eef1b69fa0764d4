//! # cqlbulk Engine - Workflow Execution
//!
//! This crate is the execution core of cqlbulk: it turns streams of records
//! into streams of acknowledged database operations (and back), under
//! explicit concurrency, rate and error bounds.
//!
//! ## Key Components
//!
//! - **Batching Engine**: routing-token-aware statement grouping with
//!   statement and byte ceilings ([`batcher`])
//! - **Bulk Executor**: the concurrency governor — in-flight semaphores,
//!   token-bucket rate limiting, fail-fast/fail-safe result streams
//!   ([`executor`])
//! - **Log Manager**: per-record outcome capture, bad-record files,
//!   positional checkpointing and the error ceiling ([`logman`])
//! - **Workflows**: the LOAD / UNLOAD / COUNT compositions and their state
//!   machine ([`workflow`])
//! - **Stats**: periodic throughput reporting ([`stats`])
//!
//! Operators run as tokio tasks connected by bounded channels; channel
//! capacity is the demand granted upstream, and a `CancellationToken` tree
//! carries cooperative shutdown through every task.

pub mod batcher;
pub mod executor;
pub mod logman;
pub mod stats;
pub mod workflow;

pub use batcher::BatchingEngine;
pub use executor::BulkExecutor;
pub use logman::{LogCategory, LogManager};
pub use workflow::{execution_id, Operation, Workflow, WorkflowReport, WorkflowStatus};
