//! Scalar codecs: text, boolean, the integer and float families, blob and
//! UUIDs, plus the JSON-side adapter that lets every scalar round-trip
//! through native JSON values.

use std::sync::Arc;

use cqlbulk_core::{CodecError, CqlType, CqlValue, ExternalType, ExternalValue};
use cqlbulk_core::settings::{OverflowStrategy, RoundingMode, UuidStrategy};
use uuid::Uuid;

use crate::context::ConversionContext;
use crate::registry::Codec;
use crate::temporal::{parse_timestamp, timestamp_from_units};

/// A number parsed from external input, integer-exact when possible.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ParsedNumber {
    Int(i128),
    Float(f64),
}

/// Parse with the configured number pattern, falling back to
/// locale-neutral parsing of the raw input.
pub(crate) fn parse_number(
    ctx: &ConversionContext,
    input: &str,
) -> Result<ParsedNumber, CodecError> {
    let normalized = ctx.number_format.normalize(input.trim());
    for candidate in [normalized.as_str(), input.trim()] {
        if let Ok(i) = candidate.parse::<i128>() {
            return Ok(ParsedNumber::Int(i));
        }
        if let Ok(f) = candidate.parse::<f64>() {
            return Ok(ParsedNumber::Float(f));
        }
    }
    Err(CodecError::Parse {
        input: input.to_string(),
        target: CqlType::Double,
        reason: "not a number".into(),
    })
}

fn apply_rounding(mode: RoundingMode, v: f64) -> f64 {
    let is_half = (v.fract().abs() - 0.5).abs() < f64::EPSILON;
    match mode {
        RoundingMode::Ceiling => v.ceil(),
        RoundingMode::Floor => v.floor(),
        RoundingMode::Up => {
            if v >= 0.0 {
                v.ceil()
            } else {
                v.floor()
            }
        }
        RoundingMode::Down => v.trunc(),
        RoundingMode::HalfUp => v.round(),
        RoundingMode::HalfDown => {
            if is_half {
                v.trunc()
            } else {
                v.round()
            }
        }
        RoundingMode::HalfEven => {
            if is_half {
                let t = v.trunc();
                if (t as i128) % 2 == 0 {
                    t
                } else {
                    t + v.signum()
                }
            } else {
                v.round()
            }
        }
    }
}

fn int_bounds(target: &CqlType) -> (i128, i128) {
    match target {
        CqlType::TinyInt => (i8::MIN as i128, i8::MAX as i128),
        CqlType::SmallInt => (i16::MIN as i128, i16::MAX as i128),
        CqlType::Int => (i32::MIN as i128, i32::MAX as i128),
        CqlType::BigInt => (i64::MIN as i128, i64::MAX as i128),
        other => unreachable!("not an integer type: {other}"),
    }
}

fn make_int(target: &CqlType, v: i128) -> CqlValue {
    match target {
        CqlType::TinyInt => CqlValue::TinyInt(v as i8),
        CqlType::SmallInt => CqlValue::SmallInt(v as i16),
        CqlType::Int => CqlValue::Int(v as i32),
        CqlType::BigInt => CqlValue::BigInt(v as i64),
        other => unreachable!("not an integer type: {other}"),
    }
}

/// Narrow a parsed number into the target numeric type, honoring the
/// overflow strategy: Reject fails, Truncate drops fractions toward zero
/// and clamps magnitudes, Round applies the rounding mode to fractions and
/// then range-checks like Reject.
pub(crate) fn narrow(
    ctx: &ConversionContext,
    n: ParsedNumber,
    target: &CqlType,
    input: &str,
) -> Result<CqlValue, CodecError> {
    let overflow = || CodecError::Overflow { input: input.to_string(), target: target.clone() };
    match target {
        CqlType::Float => {
            let f = match n {
                ParsedNumber::Int(i) => i as f64,
                ParsedNumber::Float(f) => f,
            };
            if f.is_finite() && f.abs() > f64::from(f32::MAX) {
                return match ctx.overflow {
                    OverflowStrategy::Truncate => {
                        Ok(CqlValue::Float(f32::MAX.copysign(f as f32)))
                    }
                    _ => Err(overflow()),
                };
            }
            Ok(CqlValue::Float(f as f32))
        }
        CqlType::Double => Ok(CqlValue::Double(match n {
            ParsedNumber::Int(i) => i as f64,
            ParsedNumber::Float(f) => f,
        })),
        CqlType::TinyInt | CqlType::SmallInt | CqlType::Int | CqlType::BigInt => {
            let (min, max) = int_bounds(target);
            let whole: i128 = match n {
                ParsedNumber::Int(i) => i,
                ParsedNumber::Float(f) => {
                    let rounded = if f.fract() == 0.0 {
                        f
                    } else {
                        match ctx.overflow {
                            OverflowStrategy::Reject => return Err(overflow()),
                            OverflowStrategy::Truncate => f.trunc(),
                            OverflowStrategy::Round => apply_rounding(ctx.rounding, f),
                        }
                    };
                    if !rounded.is_finite() || rounded < i128::MIN as f64 || rounded > i128::MAX as f64 {
                        return Err(overflow());
                    }
                    rounded as i128
                }
            };
            if whole < min || whole > max {
                return match ctx.overflow {
                    OverflowStrategy::Truncate => Ok(make_int(target, whole.clamp(min, max))),
                    _ => Err(overflow()),
                };
            }
            Ok(make_int(target, whole))
        }
        other => unreachable!("not a numeric type: {other}"),
    }
}

/// text ↔ text identity.
#[derive(Debug)]
pub struct TextCodec;

impl Codec for TextCodec {
    fn external_type(&self) -> ExternalType {
        ExternalType::Text
    }

    fn cql_type(&self) -> CqlType {
        CqlType::Text
    }

    fn external_to_internal(&self, value: &ExternalValue) -> Result<CqlValue, CodecError> {
        Ok(CqlValue::Text(value.to_string()))
    }

    fn internal_to_external(&self, value: &CqlValue) -> Result<ExternalValue, CodecError> {
        match value {
            CqlValue::Text(s) => Ok(ExternalValue::Text(s.clone())),
            other => Err(format_mismatch(other, CqlType::Text, ExternalType::Text)),
        }
    }
}

#[derive(Debug)]
pub struct BooleanCodec {
    ctx: Arc<ConversionContext>,
}

impl BooleanCodec {
    pub fn new(ctx: Arc<ConversionContext>) -> Self {
        Self { ctx }
    }
}

impl Codec for BooleanCodec {
    fn external_type(&self) -> ExternalType {
        ExternalType::Text
    }

    fn cql_type(&self) -> CqlType {
        CqlType::Boolean
    }

    fn external_to_internal(&self, value: &ExternalValue) -> Result<CqlValue, CodecError> {
        let input = value.to_string();
        let lowered = input.trim().to_lowercase();
        for (t, f) in &self.ctx.boolean_pairs {
            if lowered == *t {
                return Ok(CqlValue::Boolean(true));
            }
            if lowered == *f {
                return Ok(CqlValue::Boolean(false));
            }
        }
        if let Ok(n) = parse_number(&self.ctx, &input) {
            let f = match n {
                ParsedNumber::Int(i) => i as f64,
                ParsedNumber::Float(f) => f,
            };
            if f == self.ctx.boolean_numbers.0 {
                return Ok(CqlValue::Boolean(true));
            }
            if f == self.ctx.boolean_numbers.1 {
                return Ok(CqlValue::Boolean(false));
            }
        }
        Err(CodecError::Parse {
            input,
            target: CqlType::Boolean,
            reason: "no boolean word pair or boolean number matched".into(),
        })
    }

    fn internal_to_external(&self, value: &CqlValue) -> Result<ExternalValue, CodecError> {
        let CqlValue::Boolean(b) = value else {
            return Err(format_mismatch(value, CqlType::Boolean, ExternalType::Text));
        };
        // Only the first pair formats.
        let word = match self.ctx.boolean_pairs.first() {
            Some((t, f)) => {
                if *b {
                    t.clone()
                } else {
                    f.clone()
                }
            }
            None => b.to_string(),
        };
        Ok(ExternalValue::Text(word))
    }
}

/// Codec for the whole integer family; the target type is a parameter.
#[derive(Debug)]
pub struct IntCodec {
    target: CqlType,
    ctx: Arc<ConversionContext>,
}

impl IntCodec {
    pub fn new(target: CqlType, ctx: Arc<ConversionContext>) -> Self {
        Self { target, ctx }
    }
}

impl Codec for IntCodec {
    fn external_type(&self) -> ExternalType {
        ExternalType::Text
    }

    fn cql_type(&self) -> CqlType {
        self.target.clone()
    }

    fn external_to_internal(&self, value: &ExternalValue) -> Result<CqlValue, CodecError> {
        let input = value.to_string();
        let n = parse_number(&self.ctx, &input).map_err(|_| CodecError::Parse {
            input: input.clone(),
            target: self.target.clone(),
            reason: "not a number".into(),
        })?;
        narrow(&self.ctx, n, &self.target, &input)
    }

    fn internal_to_external(&self, value: &CqlValue) -> Result<ExternalValue, CodecError> {
        let rendered = match value {
            CqlValue::TinyInt(v) => v.to_string(),
            CqlValue::SmallInt(v) => v.to_string(),
            CqlValue::Int(v) => v.to_string(),
            CqlValue::BigInt(v) => v.to_string(),
            other => return Err(format_mismatch(other, self.target.clone(), ExternalType::Text)),
        };
        Ok(ExternalValue::Text(rendered))
    }
}

#[derive(Debug)]
pub struct FloatCodec {
    ctx: Arc<ConversionContext>,
}

impl FloatCodec {
    pub fn new(ctx: Arc<ConversionContext>) -> Self {
        Self { ctx }
    }
}

impl Codec for FloatCodec {
    fn external_type(&self) -> ExternalType {
        ExternalType::Text
    }

    fn cql_type(&self) -> CqlType {
        CqlType::Float
    }

    fn external_to_internal(&self, value: &ExternalValue) -> Result<CqlValue, CodecError> {
        let input = value.to_string();
        let n = parse_number(&self.ctx, &input).map_err(|_| CodecError::Parse {
            input: input.clone(),
            target: CqlType::Float,
            reason: "not a number".into(),
        })?;
        narrow(&self.ctx, n, &CqlType::Float, &input)
    }

    fn internal_to_external(&self, value: &CqlValue) -> Result<ExternalValue, CodecError> {
        let CqlValue::Float(v) = value else {
            return Err(format_mismatch(value, CqlType::Float, ExternalType::Text));
        };
        Ok(ExternalValue::Text(self.ctx.number_format.denormalize(&v.to_string())))
    }
}

#[derive(Debug)]
pub struct DoubleCodec {
    ctx: Arc<ConversionContext>,
}

impl DoubleCodec {
    pub fn new(ctx: Arc<ConversionContext>) -> Self {
        Self { ctx }
    }
}

impl Codec for DoubleCodec {
    fn external_type(&self) -> ExternalType {
        ExternalType::Text
    }

    fn cql_type(&self) -> CqlType {
        CqlType::Double
    }

    fn external_to_internal(&self, value: &ExternalValue) -> Result<CqlValue, CodecError> {
        let input = value.to_string();
        let n = parse_number(&self.ctx, &input)?;
        narrow(&self.ctx, n, &CqlType::Double, &input)
    }

    fn internal_to_external(&self, value: &CqlValue) -> Result<ExternalValue, CodecError> {
        let CqlValue::Double(v) = value else {
            return Err(format_mismatch(value, CqlType::Double, ExternalType::Text));
        };
        Ok(ExternalValue::Text(self.ctx.number_format.denormalize(&v.to_string())))
    }
}

/// blob ↔ `0x`-prefixed hex.
#[derive(Debug)]
pub struct BlobCodec;

impl Codec for BlobCodec {
    fn external_type(&self) -> ExternalType {
        ExternalType::Text
    }

    fn cql_type(&self) -> CqlType {
        CqlType::Blob
    }

    fn external_to_internal(&self, value: &ExternalValue) -> Result<CqlValue, CodecError> {
        let input = value.to_string();
        let hex = input.trim().strip_prefix("0x").or_else(|| input.trim().strip_prefix("0X")).unwrap_or(input.trim());
        if hex.len() % 2 != 0 {
            return Err(CodecError::Parse {
                input,
                target: CqlType::Blob,
                reason: "odd number of hex digits".into(),
            });
        }
        let mut bytes = Vec::with_capacity(hex.len() / 2);
        for chunk in hex.as_bytes().chunks(2) {
            let pair = std::str::from_utf8(chunk).unwrap_or("");
            let byte = u8::from_str_radix(pair, 16).map_err(|_| CodecError::Parse {
                input: input.clone(),
                target: CqlType::Blob,
                reason: format!("invalid hex digits '{pair}'"),
            })?;
            bytes.push(byte);
        }
        Ok(CqlValue::Blob(bytes))
    }

    fn internal_to_external(&self, value: &CqlValue) -> Result<ExternalValue, CodecError> {
        let CqlValue::Blob(bytes) = value else {
            return Err(format_mismatch(value, CqlType::Blob, ExternalType::Text));
        };
        let mut out = String::with_capacity(2 + bytes.len() * 2);
        out.push_str("0x");
        for b in bytes {
            out.push_str(&format!("{b:02x}"));
        }
        Ok(ExternalValue::Text(out))
    }
}

/// uuid / timeuuid. For timeuuid, input that is not a UUID literal is
/// parsed as a timestamp and a version-1 UUID is generated from it
/// according to the configured strategy.
#[derive(Debug)]
pub struct UuidCodec {
    time_based: bool,
    ctx: Arc<ConversionContext>,
}

impl UuidCodec {
    pub fn new(time_based: bool, ctx: Arc<ConversionContext>) -> Self {
        Self { time_based, ctx }
    }
}

impl Codec for UuidCodec {
    fn external_type(&self) -> ExternalType {
        ExternalType::Text
    }

    fn cql_type(&self) -> CqlType {
        if self.time_based {
            CqlType::TimeUuid
        } else {
            CqlType::Uuid
        }
    }

    fn external_to_internal(&self, value: &ExternalValue) -> Result<CqlValue, CodecError> {
        let input = value.to_string();
        if let Ok(parsed) = Uuid::parse_str(input.trim()) {
            return Ok(if self.time_based {
                CqlValue::TimeUuid(parsed)
            } else {
                CqlValue::Uuid(parsed)
            });
        }
        if self.time_based {
            let instant = parse_timestamp(&self.ctx, input.trim()).map_err(|_| {
                CodecError::Parse {
                    input: input.clone(),
                    target: CqlType::TimeUuid,
                    reason: "neither a UUID nor a timestamp".into(),
                }
            })?;
            return Ok(CqlValue::TimeUuid(timeuuid_from_instant(
                self.ctx.uuid_strategy,
                instant,
            )));
        }
        Err(CodecError::Parse {
            input,
            target: CqlType::Uuid,
            reason: "not a UUID".into(),
        })
    }

    fn internal_to_external(&self, value: &CqlValue) -> Result<ExternalValue, CodecError> {
        match value {
            CqlValue::Uuid(u) | CqlValue::TimeUuid(u) => {
                Ok(ExternalValue::Text(u.hyphenated().to_string()))
            }
            other => Err(format_mismatch(other, self.cql_type(), ExternalType::Text)),
        }
    }
}

// 100-ns ticks between 1582-10-15 (the gregorian UUID epoch) and
// 1970-01-01.
const GREGORIAN_OFFSET_TICKS: u64 = 0x01B2_1DD2_1381_4000;

fn build_v1(ticks: u64, clock_seq: u16, node: [u8; 6]) -> Uuid {
    let time_low = ticks as u32;
    let time_mid = (ticks >> 32) as u16;
    let time_hi_and_version = ((ticks >> 48) as u16 & 0x0FFF) | 0x1000;
    let mut d4 = [0u8; 8];
    d4[0] = ((clock_seq >> 8) as u8 & 0x3F) | 0x80;
    d4[1] = clock_seq as u8;
    d4[2..8].copy_from_slice(&node);
    Uuid::from_fields(time_low, time_mid, time_hi_and_version, &d4)
}

/// Generate a version-1 UUID at `instant`, with sub-timestamp bits chosen
/// per strategy: Random draws them, Fixed zeroes them, Min/Max produce the
/// smallest/largest UUID for the instant (useful as range-scan endpoints).
pub(crate) fn timeuuid_from_instant(
    strategy: UuidStrategy,
    instant: chrono::DateTime<chrono::Utc>,
) -> Uuid {
    let nanos = instant.timestamp_nanos_opt().unwrap_or(0);
    let ticks = GREGORIAN_OFFSET_TICKS.wrapping_add((nanos / 100) as u64);
    match strategy {
        UuidStrategy::Random => {
            let entropy = Uuid::new_v4();
            let b = entropy.as_bytes();
            let clock_seq = u16::from_be_bytes([b[0], b[1]]);
            let node = [b[2], b[3], b[4], b[5], b[6], b[7]];
            build_v1(ticks, clock_seq, node)
        }
        UuidStrategy::Fixed => build_v1(ticks, 0, [0; 6]),
        UuidStrategy::Min => build_v1(ticks, 0, [0; 6]),
        UuidStrategy::Max => build_v1(ticks, 0x3FFF, [0xFF; 6]),
    }
}

/// Adapter giving every text-side scalar codec a JSON-side counterpart.
/// Native JSON booleans and numbers convert directly; strings delegate to
/// the wrapped text codec. Unloading emits native JSON scalars.
#[derive(Debug)]
pub struct JsonScalarCodec {
    inner: Arc<dyn Codec>,
    ctx: Arc<ConversionContext>,
}

impl JsonScalarCodec {
    pub fn new(inner: Arc<dyn Codec>) -> Self {
        // The context only matters for native-number narrowing; codecs
        // that never see numbers share the default.
        Self { inner, ctx: Arc::new(ConversionContext::default()) }
    }

    pub fn with_context(inner: Arc<dyn Codec>, ctx: Arc<ConversionContext>) -> Self {
        Self { inner, ctx }
    }
}

impl Codec for JsonScalarCodec {
    fn external_type(&self) -> ExternalType {
        ExternalType::Json
    }

    fn cql_type(&self) -> CqlType {
        self.inner.cql_type()
    }

    fn external_to_internal(&self, value: &ExternalValue) -> Result<CqlValue, CodecError> {
        let ExternalValue::Json(json) = value else {
            return self.inner.external_to_internal(value);
        };
        let target = self.cql_type();
        match json {
            serde_json::Value::String(s) => {
                self.inner.external_to_internal(&ExternalValue::Text(s.clone()))
            }
            serde_json::Value::Bool(b) if target == CqlType::Boolean => {
                Ok(CqlValue::Boolean(*b))
            }
            serde_json::Value::Number(n) if target.is_numeric() => {
                let parsed = if let Some(i) = n.as_i64() {
                    ParsedNumber::Int(i as i128)
                } else {
                    ParsedNumber::Float(n.as_f64().unwrap_or(f64::NAN))
                };
                narrow(&self.ctx, parsed, &target, &n.to_string())
            }
            serde_json::Value::Number(n) if target == CqlType::Timestamp => {
                let units = n.as_i64().ok_or_else(|| CodecError::Parse {
                    input: n.to_string(),
                    target: CqlType::Timestamp,
                    reason: "numeric timestamp must be integral".into(),
                })?;
                Ok(CqlValue::Timestamp(timestamp_from_units(&self.ctx, units)))
            }
            other => Err(CodecError::Parse {
                input: other.to_string(),
                target,
                reason: "JSON value has the wrong shape".into(),
            }),
        }
    }

    fn internal_to_external(&self, value: &CqlValue) -> Result<ExternalValue, CodecError> {
        let json = match value {
            CqlValue::Boolean(b) => serde_json::Value::Bool(*b),
            CqlValue::TinyInt(v) => serde_json::Value::from(*v),
            CqlValue::SmallInt(v) => serde_json::Value::from(*v),
            CqlValue::Int(v) => serde_json::Value::from(*v),
            CqlValue::BigInt(v) => serde_json::Value::from(*v),
            CqlValue::Float(v) => serde_json::Number::from_f64(f64::from(*v))
                .map(serde_json::Value::Number)
                .unwrap_or_else(|| serde_json::Value::String(v.to_string())),
            CqlValue::Double(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or_else(|| serde_json::Value::String(v.to_string())),
            other => {
                let ExternalValue::Text(s) = self.inner.internal_to_external(other)? else {
                    return Err(CodecError::Format {
                        cql: self.cql_type(),
                        external: ExternalType::Json,
                        reason: "inner codec produced non-text".into(),
                    });
                };
                serde_json::Value::String(s)
            }
        };
        Ok(ExternalValue::Json(json))
    }
}

fn format_mismatch(value: &CqlValue, cql: CqlType, external: ExternalType) -> CodecError {
    CodecError::Format {
        cql,
        external,
        reason: format!("unexpected internal value {value:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cqlbulk_core::CodecSettings;

    fn ctx() -> Arc<ConversionContext> {
        Arc::new(ConversionContext::default())
    }

    fn ctx_with(f: impl FnOnce(&mut CodecSettings)) -> Arc<ConversionContext> {
        let mut settings = CodecSettings::default();
        f(&mut settings);
        Arc::new(ConversionContext::from_settings(&settings).unwrap())
    }

    #[test]
    fn boolean_words_match_case_insensitively() {
        let codec = BooleanCodec::new(ctx());
        for input in ["Y", "yes", "TRUE", "t", "1"] {
            assert_eq!(
                codec.external_to_internal(&ExternalValue::Text(input.into())).unwrap(),
                CqlValue::Boolean(true),
                "{input}"
            );
        }
        for input in ["N", "no", "false", "F", "0"] {
            assert_eq!(
                codec.external_to_internal(&ExternalValue::Text(input.into())).unwrap(),
                CqlValue::Boolean(false),
                "{input}"
            );
        }
    }

    #[test]
    fn boolean_formats_with_first_pair_only() {
        let codec = BooleanCodec::new(ctx());
        // default first pair is 1:0
        assert_eq!(
            codec.internal_to_external(&CqlValue::Boolean(true)).unwrap(),
            ExternalValue::Text("1".into())
        );
    }

    #[test]
    fn int_parses_grouped_input() {
        let codec = IntCodec::new(CqlType::Int, ctx());
        assert_eq!(
            codec.external_to_internal(&ExternalValue::Text("1,234".into())).unwrap(),
            CqlValue::Int(1234)
        );
    }

    #[test]
    fn overflow_reject_fails() {
        let codec = IntCodec::new(CqlType::TinyInt, ctx());
        let err = codec
            .external_to_internal(&ExternalValue::Text("300".into()))
            .unwrap_err();
        assert!(matches!(err, CodecError::Overflow { .. }));
    }

    #[test]
    fn overflow_truncate_clamps_and_drops_fraction() {
        let ctx = ctx_with(|s| s.overflow_strategy = OverflowStrategy::Truncate);
        let codec = IntCodec::new(CqlType::TinyInt, ctx);
        assert_eq!(
            codec.external_to_internal(&ExternalValue::Text("300".into())).unwrap(),
            CqlValue::TinyInt(127)
        );
        assert_eq!(
            codec.external_to_internal(&ExternalValue::Text("12.9".into())).unwrap(),
            CqlValue::TinyInt(12)
        );
    }

    #[test]
    fn overflow_round_uses_rounding_mode() {
        let ctx = ctx_with(|s| {
            s.overflow_strategy = OverflowStrategy::Round;
            s.rounding_mode = RoundingMode::HalfEven;
        });
        let codec = IntCodec::new(CqlType::Int, ctx);
        assert_eq!(
            codec.external_to_internal(&ExternalValue::Text("2.5".into())).unwrap(),
            CqlValue::Int(2)
        );
        assert_eq!(
            codec.external_to_internal(&ExternalValue::Text("3.5".into())).unwrap(),
            CqlValue::Int(4)
        );
    }

    #[test]
    fn fraction_rejected_by_default() {
        let codec = IntCodec::new(CqlType::Int, ctx());
        assert!(matches!(
            codec.external_to_internal(&ExternalValue::Text("1.5".into())),
            Err(CodecError::Overflow { .. })
        ));
    }

    #[test]
    fn blob_round_trip() {
        let codec = BlobCodec;
        let v = codec
            .external_to_internal(&ExternalValue::Text("0xCAFEf00d".into()))
            .unwrap();
        assert_eq!(v, CqlValue::Blob(vec![0xCA, 0xFE, 0xF0, 0x0D]));
        assert_eq!(
            codec.internal_to_external(&v).unwrap(),
            ExternalValue::Text("0xcafef00d".into())
        );
    }

    #[test]
    fn timeuuid_from_timestamp_min_max_bracket_random() {
        let instant = chrono::DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let min = timeuuid_from_instant(UuidStrategy::Min, instant);
        let max = timeuuid_from_instant(UuidStrategy::Max, instant);
        let random = timeuuid_from_instant(UuidStrategy::Random, instant);
        assert_eq!(min.get_version_num(), 1);
        assert_eq!(max.get_version_num(), 1);
        assert_eq!(random.get_version_num(), 1);
        // All three encode the same 60-bit timestamp.
        assert_eq!(min.as_fields().0, max.as_fields().0);
        assert_eq!(min.as_fields().0, random.as_fields().0);
    }

    #[test]
    fn uuid_codec_generates_timeuuid_from_timestamp() {
        let codec = UuidCodec::new(true, ctx());
        let v = codec
            .external_to_internal(&ExternalValue::Text("2024-06-01T12:00:00Z".into()))
            .unwrap();
        let CqlValue::TimeUuid(u) = v else { panic!("expected timeuuid") };
        assert_eq!(u.get_version_num(), 1);
    }

    #[test]
    fn plain_uuid_rejects_timestamps() {
        let codec = UuidCodec::new(false, ctx());
        assert!(codec
            .external_to_internal(&ExternalValue::Text("2024-06-01T12:00:00Z".into()))
            .is_err());
    }

    #[test]
    fn json_side_accepts_native_scalars() {
        let codec = JsonScalarCodec::new(Arc::new(IntCodec::new(CqlType::Int, ctx())));
        assert_eq!(
            codec
                .external_to_internal(&ExternalValue::Json(serde_json::json!(42)))
                .unwrap(),
            CqlValue::Int(42)
        );
        assert_eq!(
            codec
                .external_to_internal(&ExternalValue::Json(serde_json::json!("17")))
                .unwrap(),
            CqlValue::Int(17)
        );
    }

    #[test]
    fn json_side_emits_native_scalars() {
        let codec = JsonScalarCodec::new(Arc::new(IntCodec::new(CqlType::BigInt, ctx())));
        assert_eq!(
            codec.internal_to_external(&CqlValue::BigInt(9)).unwrap(),
            ExternalValue::Json(serde_json::json!(9))
        );
    }
}
