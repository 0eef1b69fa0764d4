//! The conversion context: the immutable formatter and policy bundle every
//! codec consults.
//!
//! Built once from [`CodecSettings`] before the operation starts, then
//! shared behind an `Arc` for its whole lifetime. Nothing here mutates
//! after construction.

use chrono::{DateTime, FixedOffset, Utc};
use cqlbulk_core::settings::{parse_time_zone, CodecSettings};
use cqlbulk_core::{BulkError, OverflowStrategy, RoundingMode, TimeUnit, UuidStrategy};

/// A temporal pattern: the `CQL_TIMESTAMP` pseudo-pattern accepting any CQL
/// temporal literal, or a concrete chrono format string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemporalFormat {
    CqlTimestamp,
    Pattern(String),
}

impl TemporalFormat {
    fn from_setting(s: &str, iso_alias: &str, iso_pattern: &str) -> Self {
        if s == "CQL_TIMESTAMP" {
            TemporalFormat::CqlTimestamp
        } else if s == iso_alias {
            TemporalFormat::Pattern(iso_pattern.to_string())
        } else {
            TemporalFormat::Pattern(s.to_string())
        }
    }
}

/// Grouping and decimal separators extracted from a `#,###.##` pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberFormat {
    pub grouping: Option<char>,
    pub decimal: char,
}

impl NumberFormat {
    /// The separators are whatever non-`#`/non-`0` characters the pattern
    /// carries: the last one is the decimal separator, an earlier distinct
    /// one is the grouping separator.
    pub fn from_pattern(pattern: &str) -> Self {
        let seps: Vec<char> =
            pattern.chars().filter(|c| *c != '#' && *c != '0').collect();
        match seps.as_slice() {
            [] => Self { grouping: None, decimal: '.' },
            [d] => Self { grouping: None, decimal: *d },
            [g, .., d] => Self { grouping: Some(*g), decimal: *d },
        }
    }

    /// Normalize an external number into parseable ASCII: strip grouping
    /// separators, map the decimal separator to `.`.
    pub fn normalize(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        for c in input.chars() {
            if Some(c) == self.grouping {
                continue;
            }
            if c == self.decimal {
                out.push('.');
            } else {
                out.push(c);
            }
        }
        out
    }

    /// Render a decimal string using the configured decimal separator.
    pub fn denormalize(&self, plain: &str) -> String {
        if self.decimal == '.' {
            return plain.to_string();
        }
        plain.replace('.', &self.decimal.to_string())
    }
}

/// Immutable bag of formatters and conversion policy.
#[derive(Debug, Clone)]
pub struct ConversionContext {
    pub zone: FixedOffset,
    /// Strings treated as null on load; the first formats nulls on unload.
    pub null_strings: Vec<String>,
    /// `(true-word, false-word)` pairs, lowercased; all match on load, the
    /// first formats on unload.
    pub boolean_pairs: Vec<(String, String)>,
    /// `(true-number, false-number)`.
    pub boolean_numbers: (f64, f64),
    pub number_format: NumberFormat,
    pub overflow: OverflowStrategy,
    pub rounding: RoundingMode,
    pub timestamp_format: TemporalFormat,
    pub date_format: TemporalFormat,
    pub time_format: TemporalFormat,
    /// Instant that pure-digit temporal input counts from.
    pub epoch: DateTime<Utc>,
    /// Unit of pure-digit temporal input.
    pub unit: TimeUnit,
    pub uuid_strategy: UuidStrategy,
}

impl ConversionContext {
    pub fn from_settings(codec: &CodecSettings) -> Result<Self, BulkError> {
        let zone = parse_time_zone(&codec.time_zone)?;
        let mut boolean_pairs = Vec::with_capacity(codec.boolean_strings.len());
        for pair in &codec.boolean_strings {
            let mut split = pair.splitn(2, ':');
            match (split.next(), split.next()) {
                (Some(t), Some(f)) if !t.is_empty() && !f.is_empty() => {
                    boolean_pairs.push((t.to_lowercase(), f.to_lowercase()));
                }
                _ => {
                    return Err(BulkError::Config(format!(
                        "codec.boolean-strings entry '{pair}' is not a 'true:false' pair"
                    )))
                }
            }
        }
        if codec.boolean_numbers.len() != 2 {
            return Err(BulkError::Config(
                "codec.boolean-numbers must have exactly 2 entries".into(),
            ));
        }
        let epoch = DateTime::parse_from_rfc3339(&codec.epoch)
            .map_err(|e| BulkError::Config(format!("codec.epoch: {e}")))?
            .with_timezone(&Utc);
        Ok(Self {
            zone,
            null_strings: codec.null_strings.clone(),
            boolean_pairs,
            boolean_numbers: (codec.boolean_numbers[0], codec.boolean_numbers[1]),
            number_format: NumberFormat::from_pattern(&codec.number),
            overflow: codec.overflow_strategy,
            rounding: codec.rounding_mode,
            timestamp_format: TemporalFormat::from_setting(
                &codec.timestamp,
                "ISO_OFFSET_DATE_TIME",
                "%Y-%m-%dT%H:%M:%S%.f%:z",
            ),
            date_format: TemporalFormat::from_setting(&codec.date, "ISO_LOCAL_DATE", "%Y-%m-%d"),
            time_format: TemporalFormat::from_setting(&codec.time, "ISO_LOCAL_TIME", "%H:%M:%S%.f"),
            epoch,
            unit: codec.unit,
            uuid_strategy: codec.uuid_strategy,
        })
    }

    /// The string emitted for a null on unload to a textual external form.
    pub fn null_word(&self) -> &str {
        self.null_strings.first().map(String::as_str).unwrap_or("")
    }

    pub fn is_null_string(&self, s: &str) -> bool {
        self.null_strings.iter().any(|n| n == s)
    }

    /// Duration of `count` units, as whole milliseconds plus nanos.
    pub fn unit_to_duration(&self, count: i64) -> chrono::Duration {
        match self.unit {
            TimeUnit::Nanoseconds => chrono::Duration::nanoseconds(count),
            TimeUnit::Microseconds => chrono::Duration::microseconds(count),
            TimeUnit::Milliseconds => chrono::Duration::milliseconds(count),
            TimeUnit::Seconds => chrono::Duration::seconds(count),
            TimeUnit::Minutes => chrono::Duration::minutes(count),
            TimeUnit::Hours => chrono::Duration::hours(count),
            TimeUnit::Days => chrono::Duration::days(count),
        }
    }
}

impl Default for ConversionContext {
    fn default() -> Self {
        Self::from_settings(&CodecSettings::default()).expect("default codec settings")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_format_from_us_pattern() {
        let fmt = NumberFormat::from_pattern("#,###.##");
        assert_eq!(fmt.grouping, Some(','));
        assert_eq!(fmt.decimal, '.');
        assert_eq!(fmt.normalize("1,234.56"), "1234.56");
    }

    #[test]
    fn number_format_from_european_pattern() {
        let fmt = NumberFormat::from_pattern("#.###,##");
        assert_eq!(fmt.grouping, Some('.'));
        assert_eq!(fmt.decimal, ',');
        assert_eq!(fmt.normalize("1.234,56"), "1234.56");
        assert_eq!(fmt.denormalize("1234.56"), "1234,56");
    }

    #[test]
    fn iso_aliases_resolve_to_patterns() {
        let ctx = ConversionContext::default();
        assert_eq!(ctx.date_format, TemporalFormat::Pattern("%Y-%m-%d".into()));
        assert_eq!(ctx.timestamp_format, TemporalFormat::CqlTimestamp);
    }

    #[test]
    fn boolean_pairs_lowercased() {
        let mut settings = CodecSettings::default();
        settings.boolean_strings = vec!["YES:NO".into()];
        let ctx = ConversionContext::from_settings(&settings).unwrap();
        assert_eq!(ctx.boolean_pairs, vec![("yes".to_string(), "no".to_string())]);
    }

    #[test]
    fn malformed_boolean_pair_rejected() {
        let mut settings = CodecSettings::default();
        settings.boolean_strings = vec!["YES".into()];
        assert!(ConversionContext::from_settings(&settings).is_err());
    }
}
