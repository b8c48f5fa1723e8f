use std::path::PathBuf;
use std::time::Duration;

use feedr_value::Value;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumString, strum::Display)]
pub enum SourceKind {
    #[strum(to_string = "sequential-reader", serialize = "csv")]
    SequentialReader,

    #[strum(to_string = "directory-contents")]
    DirectoryContents,

    #[strum(to_string = "numeric-range", serialize = "range")]
    NumericRange,

    #[strum(to_string = "counter")]
    Counter,

    #[strum(to_string = "date")]
    Date,

    #[strum(to_string = "random-integer")]
    RandomInteger,

    #[strum(to_string = "random-string")]
    RandomString,

    #[strum(to_string = "custom")]
    Custom,
}

impl SourceKind {
    /// `None` for custom sources, which must declare it.
    #[must_use]
    pub fn default_exclusivity(self) -> Option<Exclusivity> {
        match self {
            Self::SequentialReader
            | Self::DirectoryContents
            | Self::NumericRange
            | Self::Counter => Some(Exclusivity::Exclusive),
            Self::Date | Self::RandomInteger | Self::RandomString => Some(Exclusivity::Replicated),
            Self::Custom => None,
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::EnumString,
    strum::Display,
)]
#[serde(rename_all = "kebab-case")]
pub enum Exclusivity {
    #[strum(to_string = "exclusive")]
    Exclusive,

    #[strum(to_string = "replicated")]
    Replicated,
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::EnumString,
    strum::Display,
)]
#[serde(rename_all = "kebab-case")]
pub enum ExhaustionPolicy {
    #[strum(to_string = "cycle")]
    Cycle,

    #[default]
    #[strum(to_string = "stop", serialize = "stop-on-exhaustion")]
    #[serde(alias = "stop-on-exhaustion")]
    Stop,

    #[strum(to_string = "error", serialize = "error-on-exhaustion")]
    #[serde(alias = "error-on-exhaustion")]
    Error,
}

/// What a consumer hands back when a source reports exhaustion.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::EnumString,
    strum::Display,
)]
#[serde(rename_all = "kebab-case")]
pub enum OnExhausted {
    #[default]
    #[strum(to_string = "fail")]
    Fail,

    #[strum(to_string = "null")]
    Null,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableDecl {
    pub name: String,

    /// Overrides the kind's default. Mandatory for custom sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclusivity: Option<Exclusivity>,

    #[serde(default, alias = "exhaustion_policy")]
    pub exhaustion: ExhaustionPolicy,

    #[serde(flatten)]
    pub source: SourceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SourceConfig {
    SequentialReader(ReaderConfig),

    DirectoryContents {
        path: PathBuf,
        #[serde(default)]
        random: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seed: Option<u64>,
    },

    NumericRange {
        start: i64,
        end: i64,
        #[serde(default = "one")]
        step: i64,
    },

    Counter {
        #[serde(default = "one")]
        start: i64,
        #[serde(default = "one")]
        step: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<i64>,
    },

    Date {
        #[serde(default = "default_date_format")]
        format: String,
        #[serde(
            default,
            skip_serializing_if = "Option::is_none",
            with = "serde_duration::option"
        )]
        offset: Option<Duration>,
    },

    RandomInteger {
        min: i64,
        max: i64,
    },

    RandomString {
        #[serde(default = "default_string_length")]
        length: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        alphabet: Option<String>,
    },

    Custom {
        generator: String,
    },
}

impl SourceConfig {
    #[must_use]
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::SequentialReader(_) => SourceKind::SequentialReader,
            Self::DirectoryContents { .. } => SourceKind::DirectoryContents,
            Self::NumericRange { .. } => SourceKind::NumericRange,
            Self::Counter { .. } => SourceKind::Counter,
            Self::Date { .. } => SourceKind::Date,
            Self::RandomInteger { .. } => SourceKind::RandomInteger,
            Self::RandomString { .. } => SourceKind::RandomString,
            Self::Custom { .. } => SourceKind::Custom,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReaderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Defaults to the file extension (`.csv`, `.json`), otherwise one value per line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<RecordFormat>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<Value>,

    #[serde(default)]
    pub random: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
pub enum RecordFormat {
    #[strum(to_string = "csv")]
    Csv,
    #[strum(to_string = "json")]
    Json,
    #[strum(to_string = "lines")]
    Lines,
}

#[derive(Debug, Clone, Copy)]
pub struct ConsumerSettings {
    pub request_timeout: Duration,
    pub on_exhausted: OnExhausted,
}

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            on_exhausted: OnExhausted::Fail,
        }
    }
}

fn one() -> i64 {
    1
}

fn default_date_format() -> String {
    "%Y-%m-%d".to_string()
}

fn default_string_length() -> usize {
    8
}

/// Durations as `10s`/`250ms` strings, integer seconds, or float seconds.
pub mod serde_duration {
    use std::time::Duration;

    use serde::{Deserializer, Serializer};

    struct V;

    impl serde::de::Visitor<'_> for V {
        type Value = Duration;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("duration as string (e.g. 10s), integer seconds, or float seconds")
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must not be negative"));
            }
            Ok(Duration::from_secs(v.unsigned_abs()))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if !v.is_finite() || v < 0.0 {
                return Err(E::custom("duration must be a non-negative, finite number"));
            }
            Ok(Duration::from_secs_f64(v))
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            humantime::parse_duration(v).map_err(E::custom)
        }
    }

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        d.deserialize_any(V)
    }

    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        #[derive(Deserialize)]
        struct Wrapped(#[serde(deserialize_with = "super::deserialize")] Duration);

        pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
            match d {
                Some(d) => super::serialize(d, s),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
            Ok(Option::<Wrapped>::deserialize(d)?.map(|w| w.0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_parse_from_plan_names() {
        assert_eq!(
            "sequential-reader".parse::<SourceKind>().ok(),
            Some(SourceKind::SequentialReader)
        );
        assert_eq!("csv".parse::<SourceKind>().ok(), Some(SourceKind::SequentialReader));
        assert_eq!(SourceKind::NumericRange.to_string(), "numeric-range");
        assert!("spreadsheet".parse::<SourceKind>().is_err());
    }

    #[test]
    fn exhaustion_policy_accepts_long_names() {
        assert_eq!(
            "stop-on-exhaustion".parse::<ExhaustionPolicy>().ok(),
            Some(ExhaustionPolicy::Stop)
        );
        assert_eq!(ExhaustionPolicy::default(), ExhaustionPolicy::Stop);
        assert_eq!(ExhaustionPolicy::Error.to_string(), "error");
    }

    #[test]
    fn decl_deserializes_with_kind_tag() {
        let json = r#"{"name":"n","kind":"numeric-range","start":1,"end":2,"exhaustion":"cycle"}"#;
        let decl: VariableDecl = match serde_json::from_str(json) {
            Ok(v) => v,
            Err(err) => panic!("parse failed: {err}"),
        };

        assert_eq!(decl.name, "n");
        assert_eq!(decl.exhaustion, ExhaustionPolicy::Cycle);
        assert_eq!(decl.exclusivity, None);
        match decl.source {
            SourceConfig::NumericRange { start, end, step } => {
                assert_eq!((start, end, step), (1, 2, 1));
            }
            other => panic!("unexpected source config: {other:?}"),
        }
    }

    #[test]
    fn custom_kind_has_no_default_exclusivity() {
        assert_eq!(SourceKind::Custom.default_exclusivity(), None);
        assert_eq!(
            SourceKind::Date.default_exclusivity(),
            Some(Exclusivity::Replicated)
        );
    }
}
