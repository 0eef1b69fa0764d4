//! The hierarchical settings tree.
//!
//! Settings are one YAML document deserialized into [`BulkSettings`], then
//! patched by dotted-key overrides (`executor.max-per-second=500` style)
//! before the final deserialization. The recognized top-level paths are
//! `connector`, `driver`, `schema`, `batch`, `executor`, `codec`, `log`,
//! `monitoring`, `engine` and `stats`; anything else is rejected as a
//! configuration error. The full hierarchical loader (defaults files, short
//! aliases) is an external collaborator — this module only defines the tree
//! and the override mechanics.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::batch::BatchMode;
use crate::error::BulkError;
use crate::statement::Consistency;

/// Root of the settings tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct BulkSettings {
    pub connector: ConnectorSettings,
    pub driver: DriverSettings,
    pub schema: SchemaSettings,
    pub batch: BatchSettings,
    pub executor: ExecutorSettings,
    pub codec: CodecSettings,
    pub log: LogSettings,
    pub monitoring: MonitoringSettings,
    pub engine: EngineSettings,
    pub stats: StatsSettings,
}

impl BulkSettings {
    /// Parse a YAML settings document and apply dotted-key overrides on
    /// top, in order.
    pub fn load(yaml: &str, overrides: &[(String, String)]) -> Result<Self, BulkError> {
        let mut tree: serde_json::Value = if yaml.trim().is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            serde_yaml::from_str(yaml)
                .map_err(|e| BulkError::Config(format!("settings file is not valid YAML: {e}")))?
        };
        for (key, raw) in overrides {
            apply_override(&mut tree, key, raw)?;
        }
        let settings: BulkSettings = serde_json::from_value(tree)
            .map_err(|e| BulkError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Cross-field checks that serde cannot express.
    pub fn validate(&self) -> Result<(), BulkError> {
        if self.codec.boolean_numbers.len() != 2 {
            return Err(BulkError::Config(format!(
                "codec.boolean-numbers must have exactly 2 entries, got {}",
                self.codec.boolean_numbers.len()
            )));
        }
        for pair in &self.codec.boolean_strings {
            if pair.split(':').count() != 2 {
                return Err(BulkError::Config(format!(
                    "codec.boolean-strings entry '{pair}' is not a 'true:false' pair"
                )));
            }
        }
        if self.batch.max_batch_statements == 0 {
            return Err(BulkError::Config(
                "batch.max-batch-statements must be at least 1".into(),
            ));
        }
        self.log.max_errors.parse::<ErrorThreshold>().map_err(BulkError::Config)?;
        chrono::DateTime::parse_from_rfc3339(&self.codec.epoch).map_err(|e| {
            BulkError::Config(format!("codec.epoch '{}' is not RFC 3339: {e}", self.codec.epoch))
        })?;
        parse_time_zone(&self.codec.time_zone)?;
        Ok(())
    }
}

/// Apply one `a.b.c=value` override onto the raw tree. The value is parsed
/// as YAML scalar, so `true`, `42` and `[a, b]` keep their types and
/// anything else stays a string.
fn apply_override(
    tree: &mut serde_json::Value,
    key: &str,
    raw: &str,
) -> Result<(), BulkError> {
    let parsed: serde_json::Value = serde_yaml::from_str(raw)
        .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
    let mut node = tree;
    let segments: Vec<&str> = key.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(BulkError::Config(format!("invalid settings key '{key}'")));
    }
    for segment in &segments[..segments.len() - 1] {
        if !node.is_object() {
            *node = serde_json::Value::Object(Default::default());
        }
        node = node
            .as_object_mut()
            .unwrap()
            .entry(segment.to_string())
            .or_insert_with(|| serde_json::Value::Object(Default::default()));
    }
    if !node.is_object() {
        *node = serde_json::Value::Object(Default::default());
    }
    node.as_object_mut()
        .unwrap()
        .insert(segments[segments.len() - 1].to_string(), parsed);
    Ok(())
}

/// Accept a bare number where a string is expected, so overrides like
/// `log.max-errors=100` keep working after YAML typing.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or number, got {other}"
        ))),
    }
}

/// Parse a zone setting: `UTC`, `Z` or a fixed offset like `+02:00`.
pub fn parse_time_zone(zone: &str) -> Result<chrono::FixedOffset, BulkError> {
    if zone.eq_ignore_ascii_case("utc") || zone == "Z" {
        return Ok(chrono::FixedOffset::east_opt(0).unwrap());
    }
    zone.parse::<chrono::FixedOffset>()
        .map_err(|e| BulkError::Config(format!("codec.time-zone '{zone}' is invalid: {e}")))
}

/// Connector selection. Option contents belong to the (external) connector
/// implementation and are passed through opaquely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ConnectorSettings {
    /// Connector name: `csv`, `json`, or any registered implementation.
    pub name: String,
    /// Connector-specific options, forwarded verbatim to `configure`.
    pub options: serde_json::Value,
    /// Upper bound on resources read concurrently.
    pub max_concurrent_files: usize,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self { name: "csv".into(), options: serde_json::Value::Null, max_concurrent_files: 4 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct DriverSettings {
    pub contact_points: Vec<String>,
    pub port: u16,
    pub consistency: Consistency,
    /// Per-statement retries, executed inside the driver.
    pub max_retries: u32,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            contact_points: vec!["127.0.0.1".into()],
            port: 9042,
            consistency: Consistency::default(),
            max_retries: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct SchemaSettings {
    pub keyspace: Option<String>,
    pub table: Option<String>,
    /// Explicit query; when absent the (external) schema engine synthesizes
    /// one from keyspace/table.
    pub query: Option<String>,
    /// Declarative field-to-variable mapping, e.g.
    /// `"0 = country_code, 1 = country_name"` or `"fieldA = colA"`.
    pub mapping: Option<String>,
    pub allow_extra_fields: bool,
    pub allow_missing_fields: bool,
}

impl Default for SchemaSettings {
    fn default() -> Self {
        Self {
            keyspace: None,
            table: None,
            query: None,
            mapping: None,
            allow_extra_fields: true,
            allow_missing_fields: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct BatchSettings {
    pub mode: BatchMode,
    /// Statement ceiling per batch.
    pub max_batch_statements: usize,
    /// Byte ceiling per batch; non-positive means unlimited.
    pub max_size_in_bytes: i64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self { mode: BatchMode::default(), max_batch_statements: 32, max_size_in_bytes: -1 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct ExecutorSettings {
    /// Concurrent outstanding driver requests; non-positive disables the
    /// bound.
    pub max_in_flight_requests: i64,
    /// Concurrent user-visible queries (a multi-page read counts once);
    /// non-positive disables the bound.
    pub max_in_flight_queries: i64,
    /// Token-bucket request rate; non-positive disables the limiter.
    pub max_requests_per_second: i64,
    /// Server-side continuous paging for reads.
    pub continuous_paging: bool,
    /// Rows per read page.
    pub page_size: usize,
    /// When true, the first failure cancels the pipeline instead of being
    /// captured as a failed result.
    pub fail_fast: bool,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_in_flight_requests: 1000,
            max_in_flight_queries: -1,
            max_requests_per_second: -1,
            continuous_paging: false,
            page_size: 5000,
            fail_fast: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverflowStrategy {
    Reject,
    Truncate,
    Round,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundingMode {
    Ceiling,
    Floor,
    Up,
    Down,
    HalfUp,
    HalfDown,
    HalfEven,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UuidStrategy {
    Random,
    Fixed,
    Min,
    Max,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct CodecSettings {
    pub locale: String,
    /// `UTC`, `Z`, or a fixed offset such as `+02:00`.
    pub time_zone: String,
    /// Strings treated as null on load; the first one is used when
    /// formatting nulls on unload to textual targets.
    pub null_strings: Vec<String>,
    /// `true:false` word pairs, matched case-insensitively on load; the
    /// first pair is used when formatting.
    pub boolean_strings: Vec<String>,
    /// Two entries: the numbers standing for true and false.
    pub boolean_numbers: Vec<f64>,
    /// Number pattern: `#,###.##` style, giving the grouping and decimal
    /// separators.
    pub number: String,
    pub overflow_strategy: OverflowStrategy,
    pub rounding_mode: RoundingMode,
    /// Timestamp pattern (chrono format string) or `CQL_TIMESTAMP` to
    /// accept any CQL temporal literal.
    pub timestamp: String,
    /// Date pattern or `ISO_LOCAL_DATE`.
    pub date: String,
    /// Time pattern or `ISO_LOCAL_TIME`.
    pub time: String,
    /// Unit of pure-digit temporal input, counted since `epoch`.
    pub unit: TimeUnit,
    /// RFC 3339 instant that pure-digit temporal input counts from.
    pub epoch: String,
    pub uuid_strategy: UuidStrategy,
}

impl Default for CodecSettings {
    fn default() -> Self {
        Self {
            locale: "en-US".into(),
            time_zone: "UTC".into(),
            null_strings: vec![],
            boolean_strings: vec!["1:0".into(), "Y:N".into(), "T:F".into(), "YES:NO".into(), "TRUE:FALSE".into()],
            boolean_numbers: vec![1.0, 0.0],
            number: "#,###.##".into(),
            overflow_strategy: OverflowStrategy::Reject,
            rounding_mode: RoundingMode::HalfEven,
            timestamp: "CQL_TIMESTAMP".into(),
            date: "ISO_LOCAL_DATE".into(),
            time: "ISO_LOCAL_TIME".into(),
            unit: TimeUnit::Milliseconds,
            epoch: "1970-01-01T00:00:00Z".into(),
            uuid_strategy: UuidStrategy::Random,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct LogSettings {
    /// Root under which per-execution directories are created.
    pub directory: String,
    /// Error ceiling: an absolute count (`100`), a ratio (`2%`), or a
    /// negative value for unlimited.
    #[serde(deserialize_with = "string_or_number")]
    pub max_errors: String,
    /// Bound on out-of-order successes held per resource while waiting for
    /// holes to fill.
    pub max_held_positions: usize,
    /// Cause-chain entries kept when formatting an error for display.
    pub stack_trace_depth: usize,
    /// Prefixes of cause-chain entries hidden from display (the on-disk
    /// log always keeps the full chain).
    pub stack_trace_filters: Vec<String>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            directory: "./logs".into(),
            max_errors: "100".into(),
            max_held_positions: 10_000,
            stack_trace_depth: 10,
            stack_trace_filters: vec!["tokio::".into(), "tokio_util::".into(), "futures::".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct MonitoringSettings {
    /// Seconds between console throughput reports; 0 disables them.
    pub console_interval_secs: u64,
    pub rates: bool,
    /// Expected total records, for percent-complete reporting; negative
    /// when unknown.
    pub expected_total: i64,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self { console_interval_secs: 5, rates: true, expected_total: -1 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct EngineSettings {
    /// Execution id template with `{operation}`, `{timestamp}` and
    /// `{hostname}` substitutions; a UUID-based id is generated when
    /// absent.
    pub execution_id: Option<String>,
    /// Run the whole pipeline but skip driver dispatch.
    pub dry_run: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self { execution_id: None, dry_run: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsMode {
    Global,
    Ranges,
    Hosts,
    Partitions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct StatsSettings {
    pub modes: Vec<StatsMode>,
    /// How many of the largest partitions to report in `partitions` mode.
    pub num_partitions: usize,
}

impl Default for StatsSettings {
    fn default() -> Self {
        Self { modes: vec![StatsMode::Global], num_partitions: 10 }
    }
}

/// Parsed form of `log.max-errors`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ErrorThreshold {
    Absolute(u64),
    /// Fraction of total records processed so far, in `(0, 1)`.
    Ratio(f64),
    Unlimited,
}

impl ErrorThreshold {
    /// True when `errors` (out of `total` seen so far) exceeds the ceiling.
    pub fn exceeded(&self, errors: u64, total: u64) -> bool {
        match *self {
            ErrorThreshold::Absolute(max) => errors > max,
            ErrorThreshold::Ratio(ratio) => {
                total > 0 && (errors as f64) / (total as f64) > ratio
            }
            ErrorThreshold::Unlimited => false,
        }
    }
}

impl FromStr for ErrorThreshold {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(pct) = s.strip_suffix('%') {
            let value: f64 = pct
                .trim()
                .parse()
                .map_err(|_| format!("log.max-errors ratio '{s}' is not a number"))?;
            if !(0.0..=100.0).contains(&value) {
                return Err(format!("log.max-errors ratio '{s}' must be between 0% and 100%"));
            }
            return Ok(ErrorThreshold::Ratio(value / 100.0));
        }
        let value: i64 = s
            .parse()
            .map_err(|_| format!("log.max-errors '{s}' is neither a count nor a percentage"))?;
        if value < 0 {
            Ok(ErrorThreshold::Unlimited)
        } else {
            Ok(ErrorThreshold::Absolute(value as u64))
        }
    }
}

impl fmt::Display for ErrorThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorThreshold::Absolute(n) => write!(f, "{n}"),
            ErrorThreshold::Ratio(r) => write!(f, "{}%", r * 100.0),
            ErrorThreshold::Unlimited => write!(f, "unlimited"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        BulkSettings::default().validate().unwrap();
    }

    #[test]
    fn unknown_top_level_path_rejected() {
        let err = BulkSettings::load("bogus:\n  key: 1\n", &[]).unwrap_err();
        assert!(matches!(err, BulkError::Config(_)));
    }

    #[test]
    fn overrides_patch_the_tree() {
        let overrides = vec![
            ("executor.max-requests-per-second".to_string(), "500".to_string()),
            ("schema.keyspace".to_string(), "ks1".to_string()),
            ("engine.dry-run".to_string(), "true".to_string()),
        ];
        let s = BulkSettings::load("", &overrides).unwrap();
        assert_eq!(s.executor.max_requests_per_second, 500);
        assert_eq!(s.schema.keyspace.as_deref(), Some("ks1"));
        assert!(s.engine.dry_run);
    }

    #[test]
    fn yaml_document_and_override_compose() {
        let yaml = "batch:\n  max-batch-statements: 16\n";
        let overrides = vec![("batch.mode".to_string(), "REPLICA_SET".to_string())];
        let s = BulkSettings::load(yaml, &overrides).unwrap();
        assert_eq!(s.batch.max_batch_statements, 16);
        assert_eq!(s.batch.mode, BatchMode::ReplicaSet);
    }

    #[test]
    fn numeric_max_errors_override_is_accepted() {
        let overrides = vec![("log.max-errors".to_string(), "100".to_string())];
        let s = BulkSettings::load("", &overrides).unwrap();
        assert_eq!(s.log.max_errors, "100");
    }

    #[test]
    fn error_threshold_parsing() {
        assert_eq!("100".parse::<ErrorThreshold>().unwrap(), ErrorThreshold::Absolute(100));
        assert_eq!("2%".parse::<ErrorThreshold>().unwrap(), ErrorThreshold::Ratio(0.02));
        assert_eq!("-1".parse::<ErrorThreshold>().unwrap(), ErrorThreshold::Unlimited);
        assert!("200%".parse::<ErrorThreshold>().is_err());
    }

    #[test]
    fn error_threshold_exceeded() {
        let abs = ErrorThreshold::Absolute(2);
        assert!(!abs.exceeded(2, 10));
        assert!(abs.exceeded(3, 10));

        let ratio = ErrorThreshold::Ratio(0.2);
        assert!(!ratio.exceeded(2, 10));
        assert!(ratio.exceeded(3, 10));
        assert!(!ratio.exceeded(0, 0));
    }

    #[test]
    fn bad_boolean_numbers_rejected() {
        let err =
            BulkSettings::load("codec:\n  boolean-numbers: [1]\n", &[]).unwrap_err();
        assert!(err.to_string().contains("boolean-numbers"));
    }
}
