//! Batches and the unit of dispatch handed to the executor.

use serde::{Deserialize, Serialize};

use crate::statement::{BoundStatement, Token};

/// How the batching engine groups statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchMode {
    /// Group by partition routing token (default). Batches never mix
    /// tokens.
    PartitionKey,
    /// Group by the replica set owning the token; weaker key, larger
    /// groups.
    ReplicaSet,
    /// No grouping; every statement dispatches as a singleton.
    Disabled,
}

impl Default for BatchMode {
    fn default() -> Self {
        BatchMode::PartitionKey
    }
}

/// An ordered group of statements sharing a routing token (or replica set).
#[derive(Debug, Clone)]
pub struct Batch {
    pub token: Option<Token>,
    pub statements: Vec<BoundStatement>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.statements.iter().map(BoundStatement::size_in_bytes).sum()
    }
}

/// What the executor dispatches: a lone statement or a batch.
#[derive(Debug, Clone)]
pub enum WriteUnit {
    Statement(BoundStatement),
    Batch(Batch),
}

impl WriteUnit {
    /// Number of statements in the unit.
    pub fn len(&self) -> usize {
        match self {
            WriteUnit::Statement(_) => 1,
            WriteUnit::Batch(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn statements(&self) -> &[BoundStatement] {
        match self {
            WriteUnit::Statement(s) => std::slice::from_ref(s),
            WriteUnit::Batch(b) => &b.statements,
        }
    }

    /// The query text of the (first) statement, for error reporting.
    pub fn query(&self) -> &str {
        match self {
            WriteUnit::Statement(s) => &s.template.query,
            WriteUnit::Batch(b) => {
                b.statements.first().map(|s| &*s.template.query).unwrap_or("")
            }
        }
    }
}
