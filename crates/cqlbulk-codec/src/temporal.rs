//! Temporal codecs: timestamp, date and time.
//!
//! The `CQL_TIMESTAMP` pseudo-pattern accepts any CQL temporal literal
//! (RFC 3339, `yyyy-MM-dd[ T]HH:mm[:ss[.SSS]]` with or without offset, or a
//! bare date). Local inputs resolve in the configured zone. Input that the
//! pattern rejects but consists purely of digits is read as a count of the
//! configured unit since the configured epoch.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use cqlbulk_core::{CodecError, CqlType, CqlValue, ExternalType, ExternalValue};

use crate::context::{ConversionContext, TemporalFormat};
use crate::registry::Codec;

const LOCAL_PATTERNS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

fn pattern_has_offset(pattern: &str) -> bool {
    ["%z", "%:z", "%#z", "%Z"].iter().any(|tok| pattern.contains(tok))
}

fn is_pure_digits(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// The instant `count` units after the configured epoch.
pub(crate) fn timestamp_from_units(ctx: &ConversionContext, count: i64) -> DateTime<Utc> {
    ctx.epoch + ctx.unit_to_duration(count)
}

fn resolve_local(ctx: &ConversionContext, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    ctx.zone.from_local_datetime(&naive).single().map(|dt| dt.with_timezone(&Utc))
}

/// Parse a timestamp per the context's pattern, with the pure-digits epoch
/// fallback. Shared with the time-UUID codec.
pub(crate) fn parse_timestamp(
    ctx: &ConversionContext,
    input: &str,
) -> Result<DateTime<Utc>, CodecError> {
    let parse_err = || CodecError::Parse {
        input: input.to_string(),
        target: CqlType::Timestamp,
        reason: "not a recognized temporal literal".into(),
    };
    let by_pattern = match &ctx.timestamp_format {
        TemporalFormat::CqlTimestamp => DateTime::parse_from_rfc3339(input)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                LOCAL_PATTERNS.iter().find_map(|p| {
                    NaiveDateTime::parse_from_str(input, p)
                        .ok()
                        .and_then(|naive| resolve_local(ctx, naive))
                })
            })
            .or_else(|| {
                NaiveDate::parse_from_str(input, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| resolve_local(ctx, d.and_hms_opt(0, 0, 0)?))
            }),
        TemporalFormat::Pattern(pattern) => {
            if pattern_has_offset(pattern) {
                DateTime::parse_from_str(input, pattern)
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok()
            } else {
                NaiveDateTime::parse_from_str(input, pattern)
                    .ok()
                    .and_then(|naive| resolve_local(ctx, naive))
                    .or_else(|| {
                        NaiveDate::parse_from_str(input, pattern)
                            .ok()
                            .and_then(|d| resolve_local(ctx, d.and_hms_opt(0, 0, 0)?))
                    })
            }
        }
    };
    if let Some(instant) = by_pattern {
        return Ok(instant);
    }
    if is_pure_digits(input) {
        let count: i64 = input.parse().map_err(|_| parse_err())?;
        return Ok(timestamp_from_units(ctx, count));
    }
    Err(parse_err())
}

pub(crate) fn format_timestamp(ctx: &ConversionContext, instant: &DateTime<Utc>) -> String {
    let zoned = instant.with_timezone(&ctx.zone);
    match &ctx.timestamp_format {
        // ISO offset date-time under the pseudo-pattern.
        TemporalFormat::CqlTimestamp => zoned.to_rfc3339(),
        TemporalFormat::Pattern(p) => zoned.format(p).to_string(),
    }
}

#[derive(Debug)]
pub struct TimestampCodec {
    ctx: Arc<ConversionContext>,
}

impl TimestampCodec {
    pub fn new(ctx: Arc<ConversionContext>) -> Self {
        Self { ctx }
    }
}

impl Codec for TimestampCodec {
    fn external_type(&self) -> ExternalType {
        ExternalType::Text
    }

    fn cql_type(&self) -> CqlType {
        CqlType::Timestamp
    }

    fn external_to_internal(&self, value: &ExternalValue) -> Result<CqlValue, CodecError> {
        parse_timestamp(&self.ctx, value.to_string().trim()).map(CqlValue::Timestamp)
    }

    fn internal_to_external(&self, value: &CqlValue) -> Result<ExternalValue, CodecError> {
        let CqlValue::Timestamp(ts) = value else {
            return Err(CodecError::Format {
                cql: CqlType::Timestamp,
                external: ExternalType::Text,
                reason: format!("unexpected internal value {value:?}"),
            });
        };
        Ok(ExternalValue::Text(format_timestamp(&self.ctx, ts)))
    }
}

#[derive(Debug)]
pub struct DateCodec {
    ctx: Arc<ConversionContext>,
}

impl DateCodec {
    pub fn new(ctx: Arc<ConversionContext>) -> Self {
        Self { ctx }
    }

    fn pattern(&self) -> &str {
        match &self.ctx.date_format {
            TemporalFormat::Pattern(p) => p,
            TemporalFormat::CqlTimestamp => "%Y-%m-%d",
        }
    }
}

impl Codec for DateCodec {
    fn external_type(&self) -> ExternalType {
        ExternalType::Text
    }

    fn cql_type(&self) -> CqlType {
        CqlType::Date
    }

    fn external_to_internal(&self, value: &ExternalValue) -> Result<CqlValue, CodecError> {
        let input = value.to_string();
        let trimmed = input.trim();
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, self.pattern()) {
            return Ok(CqlValue::Date(date));
        }
        if is_pure_digits(trimmed) {
            let count: i64 = trimmed.parse().unwrap_or(0);
            let instant = timestamp_from_units(&self.ctx, count);
            return Ok(CqlValue::Date(instant.with_timezone(&self.ctx.zone).date_naive()));
        }
        Err(CodecError::Parse {
            input,
            target: CqlType::Date,
            reason: format!("does not match pattern '{}'", self.pattern()),
        })
    }

    fn internal_to_external(&self, value: &CqlValue) -> Result<ExternalValue, CodecError> {
        let CqlValue::Date(d) = value else {
            return Err(CodecError::Format {
                cql: CqlType::Date,
                external: ExternalType::Text,
                reason: format!("unexpected internal value {value:?}"),
            });
        };
        Ok(ExternalValue::Text(d.format(self.pattern()).to_string()))
    }
}

#[derive(Debug)]
pub struct TimeCodec {
    ctx: Arc<ConversionContext>,
}

impl TimeCodec {
    pub fn new(ctx: Arc<ConversionContext>) -> Self {
        Self { ctx }
    }

    fn pattern(&self) -> &str {
        match &self.ctx.time_format {
            TemporalFormat::Pattern(p) => p,
            TemporalFormat::CqlTimestamp => "%H:%M:%S%.f",
        }
    }
}

impl Codec for TimeCodec {
    fn external_type(&self) -> ExternalType {
        ExternalType::Text
    }

    fn cql_type(&self) -> CqlType {
        CqlType::Time
    }

    fn external_to_internal(&self, value: &ExternalValue) -> Result<CqlValue, CodecError> {
        let input = value.to_string();
        let trimmed = input.trim();
        if let Ok(time) = NaiveTime::parse_from_str(trimmed, self.pattern()) {
            return Ok(CqlValue::Time(time));
        }
        if is_pure_digits(trimmed) {
            let count: i64 = trimmed.parse().unwrap_or(0);
            let since_midnight = self.ctx.unit_to_duration(count);
            let time = NaiveTime::from_hms_opt(0, 0, 0).unwrap() + since_midnight;
            return Ok(CqlValue::Time(time));
        }
        Err(CodecError::Parse {
            input,
            target: CqlType::Time,
            reason: format!("does not match pattern '{}'", self.pattern()),
        })
    }

    fn internal_to_external(&self, value: &CqlValue) -> Result<ExternalValue, CodecError> {
        let CqlValue::Time(t) = value else {
            return Err(CodecError::Format {
                cql: CqlType::Time,
                external: ExternalType::Text,
                reason: format!("unexpected internal value {value:?}"),
            });
        };
        Ok(ExternalValue::Text(t.format(self.pattern()).to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cqlbulk_core::{CodecSettings, TimeUnit};

    fn ctx() -> Arc<ConversionContext> {
        Arc::new(ConversionContext::default())
    }

    fn ctx_with(f: impl FnOnce(&mut CodecSettings)) -> Arc<ConversionContext> {
        let mut settings = CodecSettings::default();
        f(&mut settings);
        Arc::new(ConversionContext::from_settings(&settings).unwrap())
    }

    #[test]
    fn cql_timestamp_accepts_many_shapes() {
        let ctx = ctx();
        for input in [
            "2024-06-01T12:30:00Z",
            "2024-06-01T12:30:00+02:00",
            "2024-06-01 12:30:00",
            "2024-06-01T12:30:00.250",
            "2024-06-01",
        ] {
            parse_timestamp(&ctx, input).unwrap_or_else(|e| panic!("{input}: {e}"));
        }
    }

    #[test]
    fn local_input_resolves_in_configured_zone() {
        let ctx = ctx_with(|s| s.time_zone = "+02:00".into());
        let instant = parse_timestamp(&ctx, "2024-06-01 12:00:00").unwrap();
        assert_eq!(instant.to_rfc3339(), "2024-06-01T10:00:00+00:00");
    }

    #[test]
    fn pure_digits_fall_back_to_epoch_units() {
        let ctx = ctx_with(|s| s.unit = TimeUnit::Seconds);
        let instant = parse_timestamp(&ctx, "86400").unwrap();
        assert_eq!(instant.to_rfc3339(), "1970-01-02T00:00:00+00:00");
    }

    #[test]
    fn digits_respect_custom_epoch() {
        let ctx = ctx_with(|s| {
            s.unit = TimeUnit::Days;
            s.epoch = "2000-01-01T00:00:00Z".into();
        });
        let instant = parse_timestamp(&ctx, "1").unwrap();
        assert_eq!(instant.to_rfc3339(), "2000-01-02T00:00:00+00:00");
    }

    #[test]
    fn unload_formats_iso_offset_under_cql_timestamp() {
        let ctx = ctx();
        let codec = TimestampCodec::new(ctx.clone());
        let instant = parse_timestamp(&ctx, "2024-06-01T12:30:00Z").unwrap();
        let out = codec.internal_to_external(&CqlValue::Timestamp(instant)).unwrap();
        assert_eq!(out, ExternalValue::Text("2024-06-01T12:30:00+00:00".into()));
    }

    #[test]
    fn explicit_pattern_round_trips() {
        let ctx = ctx_with(|s| s.timestamp = "%d/%m/%Y %H:%M".into());
        let codec = TimestampCodec::new(ctx);
        let v = codec
            .external_to_internal(&ExternalValue::Text("01/06/2024 09:15".into()))
            .unwrap();
        assert_eq!(
            codec.internal_to_external(&v).unwrap(),
            ExternalValue::Text("01/06/2024 09:15".into())
        );
    }

    #[test]
    fn date_and_time_parse_iso_by_default() {
        let date = DateCodec::new(ctx());
        assert_eq!(
            date.external_to_internal(&ExternalValue::Text("2024-06-01".into())).unwrap(),
            CqlValue::Date(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
        );
        let time = TimeCodec::new(ctx());
        assert_eq!(
            time.external_to_internal(&ExternalValue::Text("12:34:56".into())).unwrap(),
            CqlValue::Time(NaiveTime::from_hms_opt(12, 34, 56).unwrap())
        );
    }

    #[test]
    fn time_accepts_digit_counts_since_midnight() {
        let ctx = ctx_with(|s| s.unit = TimeUnit::Seconds);
        let time = TimeCodec::new(ctx);
        assert_eq!(
            time.external_to_internal(&ExternalValue::Text("3661".into())).unwrap(),
            CqlValue::Time(NaiveTime::from_hms_opt(1, 1, 1).unwrap())
        );
    }
}
