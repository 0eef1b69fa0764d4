//! External and internal value representations.
//!
//! Every field travels through the pipeline in one of two shapes: the
//! connector-facing [`ExternalValue`] (a raw string for delimited sources, a
//! JSON value for JSON sources) and the driver-facing [`CqlValue`], a typed
//! CQL value ready to be bound to a prepared statement variable. Codecs
//! convert between the two; nothing else in the pipeline touches field
//! contents.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The family of external representations a codec converts from and to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternalType {
    /// Raw text, as produced by delimited-text connectors.
    Text,
    /// A JSON value, as produced by line-delimited JSON connectors.
    Json,
}

impl fmt::Display for ExternalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternalType::Text => write!(f, "text"),
            ExternalType::Json => write!(f, "json"),
        }
    }
}

/// A field value as seen by a connector.
#[derive(Debug, Clone, PartialEq)]
pub enum ExternalValue {
    Text(String),
    Json(serde_json::Value),
}

impl ExternalValue {
    pub fn external_type(&self) -> ExternalType {
        match self {
            ExternalValue::Text(_) => ExternalType::Text,
            ExternalValue::Json(_) => ExternalType::Json,
        }
    }

    /// The textual content, when this value is a string either way.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ExternalValue::Text(s) => Some(s),
            ExternalValue::Json(serde_json::Value::String(s)) => Some(s),
            ExternalValue::Json(_) => None,
        }
    }
}

impl fmt::Display for ExternalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternalValue::Text(s) => f.write_str(s),
            ExternalValue::Json(v) => write!(f, "{v}"),
        }
    }
}

/// The CQL type of a bound variable or column.
///
/// Collection types nest; everything else is scalar. The geospatial types
/// correspond to the `PointType`, `LineStringType` and `PolygonType` custom
/// types of DSE-flavored clusters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CqlType {
    Boolean,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    Text,
    Blob,
    Timestamp,
    Date,
    Time,
    Uuid,
    TimeUuid,
    List(Box<CqlType>),
    Set(Box<CqlType>),
    Map(Box<CqlType>, Box<CqlType>),
    Point,
    LineString,
    Polygon,
}

impl CqlType {
    /// Textual CQL types keep null sentinels readable on unload; all other
    /// types get the typed null. See the codec registry for the exact rules.
    pub fn is_textual(&self) -> bool {
        matches!(self, CqlType::Text)
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, CqlType::List(_) | CqlType::Set(_) | CqlType::Map(_, _))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            CqlType::TinyInt
                | CqlType::SmallInt
                | CqlType::Int
                | CqlType::BigInt
                | CqlType::Float
                | CqlType::Double
        )
    }
}

impl fmt::Display for CqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CqlType::Boolean => write!(f, "boolean"),
            CqlType::TinyInt => write!(f, "tinyint"),
            CqlType::SmallInt => write!(f, "smallint"),
            CqlType::Int => write!(f, "int"),
            CqlType::BigInt => write!(f, "bigint"),
            CqlType::Float => write!(f, "float"),
            CqlType::Double => write!(f, "double"),
            CqlType::Text => write!(f, "text"),
            CqlType::Blob => write!(f, "blob"),
            CqlType::Timestamp => write!(f, "timestamp"),
            CqlType::Date => write!(f, "date"),
            CqlType::Time => write!(f, "time"),
            CqlType::Uuid => write!(f, "uuid"),
            CqlType::TimeUuid => write!(f, "timeuuid"),
            CqlType::List(inner) => write!(f, "list<{inner}>"),
            CqlType::Set(inner) => write!(f, "set<{inner}>"),
            CqlType::Map(k, v) => write!(f, "map<{k}, {v}>"),
            CqlType::Point => write!(f, "point"),
            CqlType::LineString => write!(f, "linestring"),
            CqlType::Polygon => write!(f, "polygon"),
        }
    }
}

/// A 2-D point, the atom of the geospatial types.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LineString(pub Vec<Point>);

/// A polygon as a list of rings; the first ring is the exterior.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Polygon {
    pub rings: Vec<Vec<Point>>,
}

/// A typed CQL value bound (or about to be bound) to a statement variable.
///
/// `Null` is the typed null; `Unset` leaves the variable unbound, which the
/// wire protocol distinguishes from null (no tombstone is written).
#[derive(Debug, Clone, PartialEq)]
pub enum CqlValue {
    Null,
    Unset,
    Boolean(bool),
    TinyInt(i8),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    Text(String),
    Blob(Vec<u8>),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    Uuid(Uuid),
    TimeUuid(Uuid),
    List(Vec<CqlValue>),
    Set(Vec<CqlValue>),
    Map(Vec<(CqlValue, CqlValue)>),
    Point(Point),
    LineString(LineString),
    Polygon(Polygon),
}

impl CqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CqlValue::Null)
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, CqlValue::Unset)
    }

    /// Estimated serialized size in bytes, used by the batching engine to
    /// enforce the byte ceiling. The estimate mirrors the native protocol
    /// encoding closely enough for sizing decisions.
    pub fn serialized_size(&self) -> usize {
        match self {
            CqlValue::Null | CqlValue::Unset => 4,
            CqlValue::Boolean(_) | CqlValue::TinyInt(_) => 1,
            CqlValue::SmallInt(_) => 2,
            CqlValue::Int(_) | CqlValue::Float(_) | CqlValue::Date(_) => 4,
            CqlValue::BigInt(_)
            | CqlValue::Double(_)
            | CqlValue::Timestamp(_)
            | CqlValue::Time(_) => 8,
            CqlValue::Text(s) => s.len(),
            CqlValue::Blob(b) => b.len(),
            CqlValue::Uuid(_) | CqlValue::TimeUuid(_) => 16,
            CqlValue::List(items) | CqlValue::Set(items) => {
                4 + items.iter().map(|v| 4 + v.serialized_size()).sum::<usize>()
            }
            CqlValue::Map(entries) => {
                4 + entries
                    .iter()
                    .map(|(k, v)| 8 + k.serialized_size() + v.serialized_size())
                    .sum::<usize>()
            }
            CqlValue::Point(_) => 16,
            CqlValue::LineString(ls) => 8 + ls.0.len() * 16,
            CqlValue::Polygon(p) => 8 + p.rings.iter().map(|r| 4 + r.len() * 16).sum::<usize>(),
        }
    }
}
