//! The codec registry: `(external type, CQL type) → codec` with exact
//! lookup.
//!
//! Scalar codecs are registered at build time from the conversion context;
//! collection codecs compose recursively from their element codecs at
//! lookup. Every codec handed out is wrapped in the null-sentinel decorator,
//! so the registry rules for nulls and empty strings apply uniformly and
//! individual codecs never see a null.

use std::collections::HashMap;
use std::sync::Arc;

use cqlbulk_core::{CodecError, CqlType, CqlValue, ExternalType, ExternalValue};

use crate::collection::{ListCodec, MapCodec, SetCodec};
use crate::context::ConversionContext;
use crate::geo::{LineStringCodec, PointCodec, PolygonCodec};
use crate::scalar::{
    BlobCodec, BooleanCodec, DoubleCodec, FloatCodec, IntCodec, JsonScalarCodec, TextCodec,
    UuidCodec,
};
use crate::temporal::{DateCodec, TimeCodec, TimestampCodec};

/// A bidirectional converter between one external representation and one
/// CQL type.
///
/// Both directions are failable. Implementations never receive nulls: the
/// registry's null-sentinel wrapper resolves those before delegating.
pub trait Codec: std::fmt::Debug + Send + Sync {
    fn external_type(&self) -> ExternalType;
    fn cql_type(&self) -> CqlType;
    fn external_to_internal(&self, value: &ExternalValue) -> Result<CqlValue, CodecError>;
    fn internal_to_external(&self, value: &CqlValue) -> Result<ExternalValue, CodecError>;
}

/// Null-sentinel decorator applied to every registered codec.
///
/// Load: external nulls (JSON `null`, any configured null string, and the
/// empty string when the target type is not textual) become the typed null.
/// Unload: internal nulls become the first configured null string (or the
/// empty string) for textual externals, and the typed JSON null otherwise.
#[derive(Debug)]
struct NullSentinel {
    inner: Arc<dyn Codec>,
    context: Arc<ConversionContext>,
}

impl Codec for NullSentinel {
    fn external_type(&self) -> ExternalType {
        self.inner.external_type()
    }

    fn cql_type(&self) -> CqlType {
        self.inner.cql_type()
    }

    fn external_to_internal(&self, value: &ExternalValue) -> Result<CqlValue, CodecError> {
        match value {
            ExternalValue::Json(serde_json::Value::Null) => return Ok(CqlValue::Null),
            _ => {}
        }
        if let Some(s) = value.as_str() {
            if self.context.is_null_string(s) {
                return Ok(CqlValue::Null);
            }
            // Empty strings cannot represent a non-textual value, so they
            // load as null regardless of the configured sentinels.
            if s.is_empty() && !self.cql_type().is_textual() {
                return Ok(CqlValue::Null);
            }
        }
        self.inner.external_to_internal(value)
    }

    fn internal_to_external(&self, value: &CqlValue) -> Result<ExternalValue, CodecError> {
        if value.is_null() {
            return Ok(match self.external_type() {
                ExternalType::Text => {
                    ExternalValue::Text(self.context.null_word().to_string())
                }
                ExternalType::Json => ExternalValue::Json(serde_json::Value::Null),
            });
        }
        self.inner.internal_to_external(value)
    }
}

/// Registry of codecs keyed by `(external type, CQL type)`.
#[derive(Debug)]
pub struct CodecRegistry {
    context: Arc<ConversionContext>,
    scalars: HashMap<(ExternalType, CqlType), Arc<dyn Codec>>,
}

impl CodecRegistry {
    pub fn new(context: Arc<ConversionContext>) -> Self {
        let mut registry = Self { context: context.clone(), scalars: HashMap::new() };
        for external in [ExternalType::Text, ExternalType::Json] {
            for cql in scalar_types() {
                registry.register(build_scalar(external, &cql, &context));
            }
        }
        registry
    }

    pub fn context(&self) -> &Arc<ConversionContext> {
        &self.context
    }

    fn register(&mut self, codec: Arc<dyn Codec>) {
        let key = (codec.external_type(), codec.cql_type());
        let wrapped: Arc<dyn Codec> =
            Arc::new(NullSentinel { inner: codec, context: self.context.clone() });
        self.scalars.insert(key, wrapped);
    }

    /// Exact lookup. Collection codecs are composed on demand from their
    /// element codecs; everything else must have been registered.
    pub fn lookup(
        &self,
        external: ExternalType,
        cql: &CqlType,
    ) -> Result<Arc<dyn Codec>, CodecError> {
        match cql {
            CqlType::List(element) => {
                let inner = self.lookup(ExternalType::Json, element)?;
                Ok(self.wrap(Arc::new(ListCodec::new(external, inner))))
            }
            CqlType::Set(element) => {
                let inner = self.lookup(ExternalType::Json, element)?;
                Ok(self.wrap(Arc::new(SetCodec::new(external, inner))))
            }
            CqlType::Map(key, value) => {
                let key_codec = self.lookup(ExternalType::Text, key)?;
                let value_codec = self.lookup(ExternalType::Json, value)?;
                Ok(self.wrap(Arc::new(MapCodec::new(external, key_codec, value_codec))))
            }
            _ => self
                .scalars
                .get(&(external, cql.clone()))
                .cloned()
                .ok_or_else(|| CodecError::NoCodecFound { external, cql: cql.clone() }),
        }
    }

    /// All registered codecs able to produce the given CQL type, one per
    /// external representation.
    pub fn codecs_for(&self, cql: &CqlType) -> Vec<Arc<dyn Codec>> {
        [ExternalType::Text, ExternalType::Json]
            .into_iter()
            .filter_map(|external| self.lookup(external, cql).ok())
            .collect()
    }

    fn wrap(&self, codec: Arc<dyn Codec>) -> Arc<dyn Codec> {
        Arc::new(NullSentinel { inner: codec, context: self.context.clone() })
    }
}

fn scalar_types() -> Vec<CqlType> {
    vec![
        CqlType::Text,
        CqlType::Boolean,
        CqlType::TinyInt,
        CqlType::SmallInt,
        CqlType::Int,
        CqlType::BigInt,
        CqlType::Float,
        CqlType::Double,
        CqlType::Blob,
        CqlType::Timestamp,
        CqlType::Date,
        CqlType::Time,
        CqlType::Uuid,
        CqlType::TimeUuid,
        CqlType::Point,
        CqlType::LineString,
        CqlType::Polygon,
    ]
}

fn build_scalar(
    external: ExternalType,
    cql: &CqlType,
    context: &Arc<ConversionContext>,
) -> Arc<dyn Codec> {
    let text: Arc<dyn Codec> = match cql {
        CqlType::Text => Arc::new(TextCodec),
        CqlType::Boolean => Arc::new(BooleanCodec::new(context.clone())),
        CqlType::TinyInt | CqlType::SmallInt | CqlType::Int | CqlType::BigInt => {
            Arc::new(IntCodec::new(cql.clone(), context.clone()))
        }
        CqlType::Float => Arc::new(FloatCodec::new(context.clone())),
        CqlType::Double => Arc::new(DoubleCodec::new(context.clone())),
        CqlType::Blob => Arc::new(BlobCodec),
        CqlType::Timestamp => Arc::new(TimestampCodec::new(context.clone())),
        CqlType::Date => Arc::new(DateCodec::new(context.clone())),
        CqlType::Time => Arc::new(TimeCodec::new(context.clone())),
        CqlType::Uuid => Arc::new(UuidCodec::new(false, context.clone())),
        CqlType::TimeUuid => Arc::new(UuidCodec::new(true, context.clone())),
        CqlType::Point => Arc::new(PointCodec),
        CqlType::LineString => Arc::new(LineStringCodec),
        CqlType::Polygon => Arc::new(PolygonCodec),
        other => unreachable!("not a scalar type: {other}"),
    };
    match external {
        ExternalType::Text => text,
        ExternalType::Json => Arc::new(JsonScalarCodec::with_context(text, context.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> CodecRegistry {
        CodecRegistry::new(Arc::new(ConversionContext::default()))
    }

    #[test]
    fn lookup_miss_reports_the_pair() {
        let mut settings = cqlbulk_core::CodecSettings::default();
        settings.null_strings = vec!["NULL".into()];
        let ctx = ConversionContext::from_settings(&settings).unwrap();
        let reg = CodecRegistry { context: Arc::new(ctx), scalars: HashMap::new() };
        let err = reg.lookup(ExternalType::Text, &CqlType::Int).unwrap_err();
        assert!(matches!(err, CodecError::NoCodecFound { .. }));
    }

    #[test]
    fn null_string_loads_as_typed_null() {
        let mut settings = cqlbulk_core::CodecSettings::default();
        settings.null_strings = vec!["NULL".into()];
        let ctx = Arc::new(ConversionContext::from_settings(&settings).unwrap());
        let reg = CodecRegistry::new(ctx);
        let codec = reg.lookup(ExternalType::Text, &CqlType::Int).unwrap();
        let v = codec
            .external_to_internal(&ExternalValue::Text("NULL".into()))
            .unwrap();
        assert!(v.is_null());
    }

    #[test]
    fn empty_string_is_null_for_non_textual_targets_only() {
        let reg = registry();
        let int_codec = reg.lookup(ExternalType::Text, &CqlType::Int).unwrap();
        assert!(int_codec
            .external_to_internal(&ExternalValue::Text(String::new()))
            .unwrap()
            .is_null());

        let text_codec = reg.lookup(ExternalType::Text, &CqlType::Text).unwrap();
        assert_eq!(
            text_codec
                .external_to_internal(&ExternalValue::Text(String::new()))
                .unwrap(),
            CqlValue::Text(String::new())
        );
    }

    #[test]
    fn null_unloads_as_first_sentinel_for_text_and_typed_null_for_json() {
        let mut settings = cqlbulk_core::CodecSettings::default();
        settings.null_strings = vec!["N/A".into(), "NULL".into()];
        let ctx = Arc::new(ConversionContext::from_settings(&settings).unwrap());
        let reg = CodecRegistry::new(ctx);

        let text_side = reg.lookup(ExternalType::Text, &CqlType::Int).unwrap();
        assert_eq!(
            text_side.internal_to_external(&CqlValue::Null).unwrap(),
            ExternalValue::Text("N/A".into())
        );

        let json_side = reg.lookup(ExternalType::Json, &CqlType::Int).unwrap();
        assert_eq!(
            json_side.internal_to_external(&CqlValue::Null).unwrap(),
            ExternalValue::Json(serde_json::Value::Null)
        );
    }

    #[test]
    fn collection_codecs_compose_on_demand() {
        let reg = registry();
        let codec = reg
            .lookup(ExternalType::Text, &CqlType::List(Box::new(CqlType::Int)))
            .unwrap();
        let v = codec
            .external_to_internal(&ExternalValue::Text("[1, 2, 3]".into()))
            .unwrap();
        assert_eq!(
            v,
            CqlValue::List(vec![CqlValue::Int(1), CqlValue::Int(2), CqlValue::Int(3)])
        );
    }

    #[test]
    fn codecs_for_lists_both_external_families() {
        let reg = registry();
        let found = reg.codecs_for(&CqlType::Timestamp);
        assert_eq!(found.len(), 2);
    }
}
