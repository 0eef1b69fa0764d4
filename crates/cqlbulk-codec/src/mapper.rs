//! The record mapper: binds record fields to prepared-statement variables.
//!
//! The mapping declaration is the compact `lhs = variable` list produced by
//! the schema settings: `0 = code, 1 = name` (positional), `field = col`
//! (named), `'fixed' = col` (literal constant), `now() = updated_at`
//! (function reference). Indexed and named entries cannot be mixed. With no
//! declaration, fields map to variables by name.
//!
//! Mapping is bidirectional: `map` turns records into bound statements for
//! LOAD, `unmap` turns result rows back into records for UNLOAD.

use std::sync::Arc;

use chrono::Utc;
use cqlbulk_core::{
    BoundStatement, BulkError, Consistency, CqlType, CqlValue, DataRecord, ErrorRecord,
    ExternalType, ExternalValue, Field, MappingError, PreparedTemplate, Record, RecordMeta, Row,
};
use cqlbulk_core::settings::SchemaSettings;
use indexmap::IndexMap;

use crate::registry::{Codec, CodecRegistry};
use crate::scalar::timeuuid_from_instant;

/// Left-hand side of one mapping entry.
#[derive(Debug, Clone, PartialEq)]
pub enum MappingSource {
    Field(Field),
    Literal(String),
    Function(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MappingEntry {
    pub source: MappingSource,
    pub variable: String,
}

/// Parse the declarative mapping syntax.
pub fn parse_mapping(decl: &str) -> Result<Vec<MappingEntry>, MappingError> {
    let mut entries = Vec::new();
    let mut saw_indexed = false;
    let mut saw_named = false;
    for part in split_top_level(decl) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (lhs, rhs) = part.split_once('=').ok_or_else(|| {
            MappingError::InvalidMapping(format!("entry '{part}' has no '='"))
        })?;
        let (lhs, variable) = (lhs.trim(), rhs.trim());
        if variable.is_empty() {
            return Err(MappingError::InvalidMapping(format!(
                "entry '{part}' maps to an empty variable"
            )));
        }
        let source = if let Some(inner) =
            lhs.strip_prefix('\'').and_then(|r| r.strip_suffix('\''))
        {
            MappingSource::Literal(inner.to_string())
        } else if let Some(name) = lhs.strip_suffix("()") {
            MappingSource::Function(name.trim().to_lowercase())
        } else if lhs.bytes().all(|b| b.is_ascii_digit()) && !lhs.is_empty() {
            saw_indexed = true;
            MappingSource::Field(Field::Index(lhs.parse().unwrap()))
        } else if !lhs.is_empty() {
            saw_named = true;
            let name = lhs
                .strip_prefix('"')
                .and_then(|r| r.strip_suffix('"'))
                .unwrap_or(lhs);
            MappingSource::Field(Field::Name(name.to_string()))
        } else {
            return Err(MappingError::InvalidMapping(format!("entry '{part}' has no source")));
        };
        entries.push(MappingEntry { source, variable: variable.to_string() });
    }
    if saw_indexed && saw_named {
        return Err(MappingError::InvalidMapping(
            "indexed and named fields cannot be mixed".into(),
        ));
    }
    if entries.is_empty() {
        return Err(MappingError::InvalidMapping("mapping is empty".into()));
    }
    Ok(entries)
}

/// Split on commas not inside single or double quotes.
fn split_top_level(decl: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in decl.chars() {
        match (c, quote) {
            (q @ ('\'' | '"'), None) => {
                quote = Some(q);
                current.push(c);
            }
            (c, Some(q)) if c == q => {
                quote = None;
                current.push(c);
            }
            (',', None) => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}

/// How one template variable gets its value.
enum Binding {
    Field { field: Field, codec: Arc<dyn Codec> },
    Literal(CqlValue),
    Now(CqlType),
    /// Not covered by the mapping; bound as Unset.
    Unmapped,
}

pub struct RecordMapper {
    template: Arc<PreparedTemplate>,
    registry: Arc<CodecRegistry>,
    consistency: Consistency,
    allow_extra: bool,
    allow_missing: bool,
    bindings: Vec<Binding>,
}

impl RecordMapper {
    /// Resolve the mapping against a prepared template, looking up one
    /// codec per bound variable. Declarations that reference unknown
    /// variables, uncovered variables with `allow-missing-fields=false`,
    /// and unconvertible literals are all rejected here, before any record
    /// flows.
    pub fn new(
        template: Arc<PreparedTemplate>,
        registry: Arc<CodecRegistry>,
        external: ExternalType,
        schema: &SchemaSettings,
        consistency: Consistency,
    ) -> Result<Self, BulkError> {
        let entries = match &schema.mapping {
            Some(decl) => parse_mapping(decl).map_err(|e| BulkError::Config(e.to_string()))?,
            None => template
                .variables
                .iter()
                .map(|v| MappingEntry {
                    source: MappingSource::Field(Field::Name(v.name.clone())),
                    variable: v.name.clone(),
                })
                .collect(),
        };
        for entry in &entries {
            if template.variable_index(&entry.variable).is_none() {
                return Err(BulkError::Config(format!(
                    "mapping references unknown variable '{}'",
                    entry.variable
                )));
            }
        }
        let mut bindings = Vec::with_capacity(template.variables.len());
        for var in &template.variables {
            let entry = entries.iter().find(|e| e.variable == var.name);
            let binding = match entry {
                None => {
                    if !schema.allow_missing_fields {
                        return Err(BulkError::Config(format!(
                            "mapping does not cover variable '{}' and schema.allow-missing-fields is false",
                            var.name
                        )));
                    }
                    Binding::Unmapped
                }
                Some(MappingEntry { source: MappingSource::Field(field), .. }) => {
                    let codec = registry
                        .lookup(external, &var.cql_type)
                        .map_err(|e| BulkError::Config(e.to_string()))?;
                    Binding::Field { field: field.clone(), codec }
                }
                Some(MappingEntry { source: MappingSource::Literal(text), .. }) => {
                    let codec = registry
                        .lookup(ExternalType::Text, &var.cql_type)
                        .map_err(|e| BulkError::Config(e.to_string()))?;
                    let value = codec
                        .external_to_internal(&ExternalValue::Text(text.clone()))
                        .map_err(|e| {
                            BulkError::Config(format!(
                                "literal '{text}' for variable '{}': {e}",
                                var.name
                            ))
                        })?;
                    Binding::Literal(value)
                }
                Some(MappingEntry { source: MappingSource::Function(name), .. }) => {
                    if name != "now" {
                        return Err(BulkError::Config(format!(
                            "unknown mapping function '{name}()'"
                        )));
                    }
                    if !matches!(var.cql_type, CqlType::Timestamp | CqlType::TimeUuid) {
                        return Err(BulkError::Config(format!(
                            "now() cannot target variable '{}' of type {}",
                            var.name, var.cql_type
                        )));
                    }
                    Binding::Now(var.cql_type.clone())
                }
            };
            bindings.push(binding);
        }
        Ok(Self {
            template,
            registry,
            consistency,
            allow_extra: schema.allow_extra_fields,
            allow_missing: schema.allow_missing_fields,
            bindings,
        })
    }

    fn mapped_fields(&self) -> impl Iterator<Item = &Field> {
        self.bindings.iter().filter_map(|b| match b {
            Binding::Field { field, .. } => Some(field),
            _ => None,
        })
    }

    fn error_record(&self, meta: RecordMeta, error: MappingError) -> ErrorRecord {
        ErrorRecord::new(meta, BulkError::Mapping(error))
    }

    /// Bind one record. Mapping failures produce an error record carrying
    /// the offending field; no statement is emitted for them.
    pub fn map(&self, record: &DataRecord) -> Result<BoundStatement, ErrorRecord> {
        let meta = record.meta().clone();
        if !self.allow_extra {
            for field in record.fields().keys() {
                if !self.mapped_fields().any(|mapped| mapped == field) {
                    return Err(self.error_record(
                        meta,
                        MappingError::ExtraField { field: field.clone() },
                    ));
                }
            }
        }
        let mut statement = BoundStatement::new(self.template.clone(), self.consistency);
        for (i, binding) in self.bindings.iter().enumerate() {
            let variable = &self.template.variables[i];
            statement.values[i] = match binding {
                Binding::Unmapped => CqlValue::Unset,
                Binding::Literal(value) => value.clone(),
                Binding::Now(cql_type) => {
                    let now = Utc::now();
                    match cql_type {
                        CqlType::TimeUuid => CqlValue::TimeUuid(timeuuid_from_instant(
                            self.registry.context().uuid_strategy,
                            now,
                        )),
                        _ => CqlValue::Timestamp(now),
                    }
                }
                Binding::Field { field, codec } => match record.value(field) {
                    None => {
                        if !self.allow_missing {
                            return Err(self.error_record(
                                meta,
                                MappingError::MissingField {
                                    variable: variable.name.clone(),
                                },
                            ));
                        }
                        CqlValue::Unset
                    }
                    Some(external) => match codec.external_to_internal(external) {
                        Ok(value) => value,
                        Err(e) => {
                            return Err(self.error_record(
                                meta,
                                MappingError::Conversion {
                                    field: field.clone(),
                                    variable: variable.name.clone(),
                                    source: e,
                                },
                            ))
                        }
                    },
                },
            };
        }
        Ok(statement.with_origin(meta))
    }

    /// The inverse direction: turn a result row into a record for UNLOAD,
    /// driven by the same mapping and the codecs' internal-to-external
    /// functions.
    pub fn unmap(&self, row: &Row, meta: RecordMeta) -> Record {
        let mut fields: IndexMap<Field, ExternalValue> = IndexMap::new();
        for (i, binding) in self.bindings.iter().enumerate() {
            let variable = &self.template.variables[i];
            let Binding::Field { field, codec } = binding else {
                continue;
            };
            let Some(value) = row.get(&variable.name) else {
                if self.allow_missing {
                    continue;
                }
                return Record::Error(self.error_record(
                    meta,
                    MappingError::MissingField { variable: variable.name.clone() },
                ));
            };
            match codec.internal_to_external(value) {
                Ok(external) => {
                    fields.insert(field.clone(), external);
                }
                Err(e) => {
                    return Record::Error(self.error_record(
                        meta,
                        MappingError::Conversion {
                            field: field.clone(),
                            variable: variable.name.clone(),
                            source: e,
                        },
                    ))
                }
            }
        }
        Record::Data(DataRecord::new(meta, fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ConversionContext;
    use cqlbulk_core::VariableDef;
    use std::sync::Arc;
    use url::Url;

    fn template() -> Arc<PreparedTemplate> {
        Arc::new(PreparedTemplate::new(
            "INSERT INTO ks.ip_by_country (country_code, country_name, beginning_ip_number) \
             VALUES (:country_code, :country_name, :beginning_ip_number)",
            vec![
                VariableDef { name: "country_code".into(), cql_type: CqlType::Text },
                VariableDef { name: "country_name".into(), cql_type: CqlType::Text },
                VariableDef { name: "beginning_ip_number".into(), cql_type: CqlType::BigInt },
            ],
            vec![0],
        ))
    }

    fn registry() -> Arc<CodecRegistry> {
        Arc::new(CodecRegistry::new(Arc::new(ConversionContext::default())))
    }

    fn meta() -> RecordMeta {
        RecordMeta::new("src", Arc::new(Url::parse("memory://rows").unwrap()), 1)
    }

    fn record(fields: Vec<(Field, &str)>) -> DataRecord {
        let map = fields
            .into_iter()
            .map(|(f, v)| (f, ExternalValue::Text(v.to_string())))
            .collect();
        DataRecord::new(meta(), map)
    }

    fn mapper(mapping: Option<&str>, schema_tweak: impl FnOnce(&mut SchemaSettings)) -> RecordMapper {
        let mut schema = SchemaSettings::default();
        schema.mapping = mapping.map(str::to_string);
        schema_tweak(&mut schema);
        RecordMapper::new(
            template(),
            registry(),
            ExternalType::Text,
            &schema,
            Consistency::LocalOne,
        )
        .unwrap()
    }

    #[test]
    fn parses_indexed_named_literal_and_function_entries() {
        let entries =
            parse_mapping("0 = a, 'lit' = b, now() = c").unwrap();
        assert_eq!(entries[0].source, MappingSource::Field(Field::Index(0)));
        assert_eq!(entries[1].source, MappingSource::Literal("lit".into()));
        assert_eq!(entries[2].source, MappingSource::Function("now".into()));
    }

    #[test]
    fn rejects_mixed_indexed_and_named() {
        assert!(matches!(
            parse_mapping("0 = a, fieldB = b"),
            Err(MappingError::InvalidMapping(_))
        ));
    }

    #[test]
    fn literal_with_comma_survives_splitting() {
        let entries = parse_mapping("'a, b' = col").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source, MappingSource::Literal("a, b".into()));
    }

    #[test]
    fn positional_mapping_binds_by_index() {
        let m = mapper(
            Some("0 = country_code, 1 = country_name, 2 = beginning_ip_number"),
            |_| {},
        );
        let rec = record(vec![
            (Field::Index(0), "DE"),
            (Field::Index(1), "Germany"),
            (Field::Index(2), "16777216"),
        ]);
        let stmt = m.map(&rec).unwrap();
        assert_eq!(stmt.values[0], CqlValue::Text("DE".into()));
        assert_eq!(stmt.values[2], CqlValue::BigInt(16777216));
        assert_eq!(stmt.origin.as_ref().unwrap().position, 1);
    }

    #[test]
    fn conversion_failure_becomes_error_record() {
        let m = mapper(
            Some("0 = country_code, 1 = country_name, 2 = beginning_ip_number"),
            |_| {},
        );
        let rec = record(vec![
            (Field::Index(0), "DE"),
            (Field::Index(1), "Germany"),
            (Field::Index(2), "not-a-number"),
        ]);
        let err = m.map(&rec).unwrap_err();
        assert!(matches!(
            err.cause(),
            BulkError::Mapping(MappingError::Conversion { .. })
        ));
    }

    #[test]
    fn extra_field_policy() {
        let m = mapper(Some("0 = country_code"), |s| s.allow_extra_fields = false);
        let rec = record(vec![(Field::Index(0), "DE"), (Field::Index(1), "x")]);
        let err = m.map(&rec).unwrap_err();
        assert!(matches!(
            err.cause(),
            BulkError::Mapping(MappingError::ExtraField { .. })
        ));
    }

    #[test]
    fn missing_field_becomes_unset_when_allowed() {
        let m = mapper(
            Some("0 = country_code, 1 = country_name, 2 = beginning_ip_number"),
            |_| {},
        );
        let rec = record(vec![(Field::Index(0), "DE")]);
        let stmt = m.map(&rec).unwrap();
        assert!(stmt.values[1].is_unset());
        assert!(stmt.values[2].is_unset());
    }

    #[test]
    fn missing_field_rejected_when_disallowed() {
        let m = mapper(
            Some("0 = country_code, 1 = country_name, 2 = beginning_ip_number"),
            |s| s.allow_missing_fields = false,
        );
        let rec = record(vec![(Field::Index(0), "DE")]);
        let err = m.map(&rec).unwrap_err();
        assert!(matches!(
            err.cause(),
            BulkError::Mapping(MappingError::MissingField { .. })
        ));
    }

    #[test]
    fn uncovered_variable_fails_at_build_when_disallowed() {
        let mut schema = SchemaSettings::default();
        schema.mapping = Some("0 = country_code".into());
        schema.allow_missing_fields = false;
        let err = RecordMapper::new(
            template(),
            registry(),
            ExternalType::Text,
            &schema,
            Consistency::LocalOne,
        )
        .unwrap_err();
        assert!(matches!(err, BulkError::Config(_)));
    }

    #[test]
    fn unknown_variable_rejected_at_build() {
        let mut schema = SchemaSettings::default();
        schema.mapping = Some("0 = nope".into());
        let err = RecordMapper::new(
            template(),
            registry(),
            ExternalType::Text,
            &schema,
            Consistency::LocalOne,
        )
        .unwrap_err();
        assert!(matches!(err, BulkError::Config(_)));
    }

    #[test]
    fn unmap_inverts_named_mapping() {
        let m = mapper(None, |_| {});
        let row = cqlbulk_core::testing::row(vec![
            ("country_code", CqlValue::Text("FR".into())),
            ("country_name", CqlValue::Text("France".into())),
            ("beginning_ip_number", CqlValue::BigInt(42)),
        ]);
        let Record::Data(rec) = m.unmap(&row, meta()) else { panic!("expected data") };
        assert_eq!(
            rec.value(&Field::Name("beginning_ip_number".into())),
            Some(&ExternalValue::Text("42".into()))
        );
    }
}
