//! Prepared templates and bound statements.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::record::RecordMeta;
use crate::value::{CqlType, CqlValue};

/// Consistency level attached to every dispatched statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Consistency {
    Any,
    One,
    Two,
    Three,
    Quorum,
    All,
    LocalQuorum,
    EachQuorum,
    LocalOne,
}

impl Default for Consistency {
    fn default() -> Self {
        Consistency::LocalOne
    }
}

/// A token on the partitioner ring, derived from a routing key. Statements
/// with equal tokens are destined for the same replica set and may be
/// batched together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub i64);

/// One bound variable of a prepared template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableDef {
    pub name: String,
    pub cql_type: CqlType,
}

/// A prepared statement template, as produced by the schema engine.
///
/// This is the contract artifact of the out-of-scope query synthesis: the
/// CQL text, the bound variables in wire order, and which of them form the
/// partition key.
#[derive(Debug, Clone)]
pub struct PreparedTemplate {
    pub query: Arc<str>,
    pub variables: Vec<VariableDef>,
    /// Indices into `variables` of the partition-key components, in ring
    /// order. Empty when the template has no computable routing key.
    pub partition_key_indices: Vec<usize>,
}

impl PreparedTemplate {
    pub fn new(
        query: impl Into<Arc<str>>,
        variables: Vec<VariableDef>,
        partition_key_indices: Vec<usize>,
    ) -> Self {
        Self { query: query.into(), variables, partition_key_indices }
    }

    pub fn variable_index(&self, name: &str) -> Option<usize> {
        self.variables.iter().position(|v| v.name == name)
    }
}

/// A prepared template plus bound values, ready for dispatch.
#[derive(Debug, Clone)]
pub struct BoundStatement {
    pub template: Arc<PreparedTemplate>,
    /// Bound values, parallel to `template.variables`. Missing fields stay
    /// [`CqlValue::Unset`].
    pub values: Vec<CqlValue>,
    pub consistency: Consistency,
    /// Origin of the record this statement was generated from. Attribution
    /// only; dropping the record does not invalidate the statement.
    pub origin: Option<RecordMeta>,
}

impl BoundStatement {
    pub fn new(template: Arc<PreparedTemplate>, consistency: Consistency) -> Self {
        let values = vec![CqlValue::Unset; template.variables.len()];
        Self { template, values, consistency, origin: None }
    }

    pub fn with_origin(mut self, origin: RecordMeta) -> Self {
        self.origin = Some(origin);
        self
    }

    /// The routing key: partition-key components serialized and
    /// concatenated in ring order. `None` when any component is null or
    /// unset, or the template has no partition key — such statements bypass
    /// token-aware batching.
    pub fn routing_key(&self) -> Option<Bytes> {
        let indices = &self.template.partition_key_indices;
        if indices.is_empty() {
            return None;
        }
        let mut buf = BytesMut::new();
        for &i in indices {
            let value = self.values.get(i)?;
            if value.is_null() || value.is_unset() {
                return None;
            }
            let component = encode_component(value);
            if indices.len() == 1 {
                buf.put_slice(&component);
            } else {
                // Composite keys use the length-prefixed multi-component
                // format of the native protocol.
                buf.put_u16(component.len() as u16);
                buf.put_slice(&component);
                buf.put_u8(0);
            }
        }
        Some(buf.freeze())
    }

    /// Estimated wire size of the bound values, consumed by the batching
    /// engine's byte ceiling.
    pub fn size_in_bytes(&self) -> usize {
        self.values.iter().map(CqlValue::serialized_size).sum()
    }
}

fn encode_component(value: &CqlValue) -> Vec<u8> {
    match value {
        CqlValue::Boolean(b) => vec![*b as u8],
        CqlValue::TinyInt(v) => v.to_be_bytes().to_vec(),
        CqlValue::SmallInt(v) => v.to_be_bytes().to_vec(),
        CqlValue::Int(v) => v.to_be_bytes().to_vec(),
        CqlValue::BigInt(v) => v.to_be_bytes().to_vec(),
        CqlValue::Float(v) => v.to_be_bytes().to_vec(),
        CqlValue::Double(v) => v.to_be_bytes().to_vec(),
        CqlValue::Text(s) => s.as_bytes().to_vec(),
        CqlValue::Blob(b) => b.clone(),
        CqlValue::Timestamp(ts) => ts.timestamp_millis().to_be_bytes().to_vec(),
        CqlValue::Uuid(u) | CqlValue::TimeUuid(u) => u.as_bytes().to_vec(),
        other => format!("{other:?}").into_bytes(),
    }
}
