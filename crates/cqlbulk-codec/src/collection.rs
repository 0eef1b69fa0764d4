//! Collection codecs: list, set and map.
//!
//! Collections delegate recursively to their element codecs. The textual
//! presentation is JSON (`[1, 2, 3]`, `{"a": 1}`), so the text-side codec
//! parses the string into JSON and shares everything else with the
//! JSON-side codec. Lists preserve insertion order; sets deduplicate
//! keeping the first occurrence; maps are keyed by strings.

use std::sync::Arc;

use cqlbulk_core::{CodecError, CqlType, CqlValue, ExternalType, ExternalValue};
use serde_json::Value as Json;

use crate::registry::Codec;

fn as_json(external: ExternalType, value: &ExternalValue, target: &CqlType) -> Result<Json, CodecError> {
    match (external, value) {
        (ExternalType::Json, ExternalValue::Json(v)) => Ok(v.clone()),
        (_, other) => {
            let text = other.to_string();
            serde_json::from_str(&text).map_err(|e| CodecError::Parse {
                input: text,
                target: target.clone(),
                reason: format!("not valid JSON: {e}"),
            })
        }
    }
}

fn render(external: ExternalType, json: Json) -> ExternalValue {
    match external {
        ExternalType::Json => ExternalValue::Json(json),
        ExternalType::Text => ExternalValue::Text(json.to_string()),
    }
}

fn element_to_json(codec: &Arc<dyn Codec>, value: &CqlValue) -> Result<Json, CodecError> {
    match codec.internal_to_external(value)? {
        ExternalValue::Json(j) => Ok(j),
        ExternalValue::Text(s) => Ok(Json::String(s)),
    }
}

#[derive(Debug)]
pub struct ListCodec {
    external: ExternalType,
    element: Arc<dyn Codec>,
}

impl ListCodec {
    pub fn new(external: ExternalType, element: Arc<dyn Codec>) -> Self {
        Self { external, element }
    }
}

impl Codec for ListCodec {
    fn external_type(&self) -> ExternalType {
        self.external
    }

    fn cql_type(&self) -> CqlType {
        CqlType::List(Box::new(self.element.cql_type()))
    }

    fn external_to_internal(&self, value: &ExternalValue) -> Result<CqlValue, CodecError> {
        let target = self.cql_type();
        let json = as_json(self.external, value, &target)?;
        let Json::Array(items) = json else {
            return Err(CodecError::Parse {
                input: value.to_string(),
                target,
                reason: "expected a JSON array".into(),
            });
        };
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(self.element.external_to_internal(&ExternalValue::Json(item))?);
        }
        Ok(CqlValue::List(out))
    }

    fn internal_to_external(&self, value: &CqlValue) -> Result<ExternalValue, CodecError> {
        let items = match value {
            CqlValue::List(items) | CqlValue::Set(items) => items,
            other => {
                return Err(CodecError::Format {
                    cql: self.cql_type(),
                    external: self.external,
                    reason: format!("unexpected internal value {other:?}"),
                })
            }
        };
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(element_to_json(&self.element, item)?);
        }
        Ok(render(self.external, Json::Array(out)))
    }
}

#[derive(Debug)]
pub struct SetCodec {
    inner: ListCodec,
}

impl SetCodec {
    pub fn new(external: ExternalType, element: Arc<dyn Codec>) -> Self {
        Self { inner: ListCodec::new(external, element) }
    }
}

impl Codec for SetCodec {
    fn external_type(&self) -> ExternalType {
        self.inner.external
    }

    fn cql_type(&self) -> CqlType {
        CqlType::Set(Box::new(self.inner.element.cql_type()))
    }

    fn external_to_internal(&self, value: &ExternalValue) -> Result<CqlValue, CodecError> {
        let CqlValue::List(items) = self.inner.external_to_internal(value)? else {
            unreachable!("list codec produces lists");
        };
        // First occurrence wins.
        let mut out: Vec<CqlValue> = Vec::with_capacity(items.len());
        for item in items {
            if !out.contains(&item) {
                out.push(item);
            }
        }
        Ok(CqlValue::Set(out))
    }

    fn internal_to_external(&self, value: &CqlValue) -> Result<ExternalValue, CodecError> {
        self.inner.internal_to_external(value)
    }
}

#[derive(Debug)]
pub struct MapCodec {
    external: ExternalType,
    key: Arc<dyn Codec>,
    value: Arc<dyn Codec>,
}

impl MapCodec {
    pub fn new(external: ExternalType, key: Arc<dyn Codec>, value: Arc<dyn Codec>) -> Self {
        Self { external, key, value }
    }
}

impl Codec for MapCodec {
    fn external_type(&self) -> ExternalType {
        self.external
    }

    fn cql_type(&self) -> CqlType {
        CqlType::Map(Box::new(self.key.cql_type()), Box::new(self.value.cql_type()))
    }

    fn external_to_internal(&self, value: &ExternalValue) -> Result<CqlValue, CodecError> {
        let target = self.cql_type();
        let json = as_json(self.external, value, &target)?;
        let Json::Object(entries) = json else {
            return Err(CodecError::Parse {
                input: value.to_string(),
                target,
                reason: "expected a JSON object".into(),
            });
        };
        let mut out = Vec::with_capacity(entries.len());
        for (k, v) in entries {
            let key = self.key.external_to_internal(&ExternalValue::Text(k))?;
            let val = self.value.external_to_internal(&ExternalValue::Json(v))?;
            out.push((key, val));
        }
        Ok(CqlValue::Map(out))
    }

    fn internal_to_external(&self, value: &CqlValue) -> Result<ExternalValue, CodecError> {
        let CqlValue::Map(entries) = value else {
            return Err(CodecError::Format {
                cql: self.cql_type(),
                external: self.external,
                reason: format!("unexpected internal value {value:?}"),
            });
        };
        let mut object = serde_json::Map::with_capacity(entries.len());
        for (k, v) in entries {
            let key = match self.key.internal_to_external(k)? {
                ExternalValue::Text(s) => s,
                ExternalValue::Json(j) => match j {
                    Json::String(s) => s,
                    other => other.to_string(),
                },
            };
            object.insert(key, element_to_json(&self.value, v)?);
        }
        Ok(render(self.external, Json::Object(object)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ConversionContext;
    use crate::registry::CodecRegistry;

    fn registry() -> CodecRegistry {
        CodecRegistry::new(Arc::new(ConversionContext::default()))
    }

    #[test]
    fn set_deduplicates_preserving_first() {
        let reg = registry();
        let codec = reg
            .lookup(ExternalType::Text, &CqlType::Set(Box::new(CqlType::Int)))
            .unwrap();
        let v = codec
            .external_to_internal(&ExternalValue::Text("[3, 1, 3, 2, 1]".into()))
            .unwrap();
        assert_eq!(
            v,
            CqlValue::Set(vec![CqlValue::Int(3), CqlValue::Int(1), CqlValue::Int(2)])
        );
    }

    #[test]
    fn map_converts_keys_and_values() {
        let reg = registry();
        let codec = reg
            .lookup(
                ExternalType::Json,
                &CqlType::Map(Box::new(CqlType::Int), Box::new(CqlType::Boolean)),
            )
            .unwrap();
        let v = codec
            .external_to_internal(&ExternalValue::Json(serde_json::json!({"1": true, "2": false})))
            .unwrap();
        assert_eq!(
            v,
            CqlValue::Map(vec![
                (CqlValue::Int(1), CqlValue::Boolean(true)),
                (CqlValue::Int(2), CqlValue::Boolean(false)),
            ])
        );
    }

    #[test]
    fn nested_collections_round_trip_as_text() {
        let reg = registry();
        let cql = CqlType::List(Box::new(CqlType::List(Box::new(CqlType::Int))));
        let codec = reg.lookup(ExternalType::Text, &cql).unwrap();
        let v = codec
            .external_to_internal(&ExternalValue::Text("[[1,2],[3]]".into()))
            .unwrap();
        let back = codec.internal_to_external(&v).unwrap();
        assert_eq!(back, ExternalValue::Text("[[1,2],[3]]".into()));
    }

    #[test]
    fn null_elements_survive() {
        let reg = registry();
        let codec = reg
            .lookup(ExternalType::Text, &CqlType::List(Box::new(CqlType::Int)))
            .unwrap();
        let v = codec
            .external_to_internal(&ExternalValue::Text("[1, null, 2]".into()))
            .unwrap();
        assert_eq!(
            v,
            CqlValue::List(vec![CqlValue::Int(1), CqlValue::Null, CqlValue::Int(2)])
        );
    }
}
