//! Execution results flowing out of the bulk executor.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::batch::WriteUnit;
use crate::error::BulkExecutionError;
use crate::statement::BoundStatement;
use crate::value::CqlValue;

/// One row returned by a read statement, columns in select order.
#[derive(Debug, Clone)]
pub struct Row {
    pub columns: IndexMap<String, CqlValue>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&CqlValue> {
        self.columns.get(column)
    }
}

/// Outcome of dispatching one write unit. Exactly one of these is emitted
/// per unit that entered the executor.
#[derive(Debug, Clone)]
pub struct WriteResult {
    pub unit: WriteUnit,
    pub error: Option<BulkExecutionError>,
}

impl WriteResult {
    pub fn success(unit: WriteUnit) -> Self {
        Self { unit, error: None }
    }

    pub fn failure(unit: WriteUnit, error: BulkExecutionError) -> Self {
        Self { unit, error: Some(error) }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome element of a read statement: a row, or the error that ended the
/// read in fail-safe mode.
#[derive(Debug, Clone)]
pub struct ReadResult {
    pub statement: Arc<BoundStatement>,
    pub row: Option<Row>,
    pub error: Option<BulkExecutionError>,
}

impl ReadResult {
    pub fn row(statement: Arc<BoundStatement>, row: Row) -> Self {
        Self { statement, row: Some(row), error: None }
    }

    pub fn failure(statement: Arc<BoundStatement>, error: BulkExecutionError) -> Self {
        Self { statement, row: None, error: Some(error) }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
