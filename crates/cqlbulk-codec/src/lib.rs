//! # cqlbulk Codec - Conversion and Mapping
//!
//! This crate converts field values between their external representations
//! (raw text, JSON) and typed CQL values, and binds converted fields to
//! prepared-statement variables.
//!
//! ## Key Components
//!
//! - **Conversion Context**: the immutable formatter and policy bundle —
//!   null sentinels, boolean words, number pattern, temporal formats,
//!   overflow strategy ([`context`])
//! - **Codec Registry**: exact `(external type, CQL type)` lookup over
//!   bidirectional codecs, with null handling applied uniformly at the
//!   registry boundary ([`registry`])
//! - **Codecs**: scalars ([`scalar`]), temporals ([`temporal`]),
//!   collections ([`collection`]) and geospatial types ([`geo`])
//! - **Record Mapper**: the declarative mapping engine turning records into
//!   bound statements and result rows back into records ([`mapper`])
//!
//! The registry and context are immutable once built and shared behind
//! `Arc`s for the lifetime of the operation.

pub mod collection;
pub mod context;
pub mod geo;
pub mod mapper;
pub mod registry;
pub mod scalar;
pub mod temporal;

pub use context::{ConversionContext, NumberFormat, TemporalFormat};
pub use mapper::{parse_mapping, MappingEntry, MappingSource, RecordMapper};
pub use registry::{Codec, CodecRegistry};
