//! Records: the unit of transfer between connectors and the mapper.
//!
//! A connector emits one [`Record`] per row read from an external resource.
//! Records carry their origin (resource URI and 1-based position) so that
//! every downstream outcome — success, mapping failure, driver rejection —
//! can be attributed back to the exact row that caused it.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use url::Url;

use crate::error::BulkError;
use crate::value::ExternalValue;

/// A field identifier: positional for delimited sources, named for JSON
/// sources and named mappings.
///
/// Indexed fields order numerically; named fields keep the insertion order
/// of the map they live in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Field {
    Index(usize),
    Name(String),
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Index(i) => write!(f, "{i}"),
            Field::Name(n) => f.write_str(n),
        }
    }
}

/// Origin metadata shared by records, statements and results.
///
/// The resource URL is memoized by the connector and shared, so cloning the
/// metadata never re-renders or re-parses the URI.
#[derive(Debug, Clone)]
pub struct RecordMeta {
    /// The original representation of the row, kept verbatim for bad-record
    /// files.
    pub source: Arc<str>,
    /// URI of the resource the record was read from; stable for the whole
    /// operation.
    pub resource: Arc<Url>,
    /// 1-based ordinal of the record within its resource.
    pub position: u64,
}

impl RecordMeta {
    pub fn new(source: impl Into<Arc<str>>, resource: Arc<Url>, position: u64) -> Self {
        debug_assert!(position >= 1, "record positions are 1-based");
        Self { source: source.into(), resource, position }
    }
}

/// A successfully parsed record: ordered fields plus origin metadata.
#[derive(Debug, Clone)]
pub struct DataRecord {
    meta: RecordMeta,
    fields: IndexMap<Field, ExternalValue>,
}

impl DataRecord {
    pub fn new(meta: RecordMeta, fields: IndexMap<Field, ExternalValue>) -> Self {
        Self { meta, fields }
    }

    pub fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    pub fn fields(&self) -> &IndexMap<Field, ExternalValue> {
        &self.fields
    }

    pub fn value(&self, field: &Field) -> Option<&ExternalValue> {
        self.fields.get(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A record that failed before mapping: carries a cause and no fields.
///
/// Connectors emit these for rows they could read but not parse, so the
/// failure flows through the pipeline and is logged with its position
/// instead of silently vanishing.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    meta: RecordMeta,
    cause: Arc<BulkError>,
}

impl ErrorRecord {
    pub fn new(meta: RecordMeta, cause: BulkError) -> Self {
        Self { meta, cause: Arc::new(cause) }
    }

    pub fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    pub fn cause(&self) -> &BulkError {
        &self.cause
    }
}

/// What flows through a record channel: a parsed row or a per-row failure.
#[derive(Debug, Clone)]
pub enum Record {
    Data(DataRecord),
    Error(ErrorRecord),
}

impl Record {
    pub fn meta(&self) -> &RecordMeta {
        match self {
            Record::Data(r) => r.meta(),
            Record::Error(r) => r.meta(),
        }
    }

    pub fn resource(&self) -> &Url {
        &self.meta().resource
    }

    pub fn position(&self) -> u64 {
        self.meta().position
    }
}
