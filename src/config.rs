//! Declarative stage configuration.
//!
//! Every stage, condition inspector, lock store and metric destination is
//! built from a [`Config`]: a type name plus an opaque JSON settings object.
//!
//! ```
//! use conduit::config::Config;
//!
//! let cfg: Config = serde_json::from_str(r#"{
//!     "type": "aggregate_to_array",
//!     "settings": {"batch": {"count": 2}}
//! }"#).unwrap();
//! assert_eq!(cfg.type_name, "aggregate_to_array");
//! ```
//!
//! Settings shared by many stages live here as reusable blocks
//! ([`ObjectConfig`], [`BatchConfig`], [`RetryConfig`], [`MetricConfig`]).

use crate::error::{Error, Result};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;

/// A `(type, settings)` pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "type", default)]
    pub type_name: String,
    #[serde(default)]
    pub settings: serde_json::Value,
}

impl Config {
    pub fn new(type_name: impl Into<String>, settings: serde_json::Value) -> Self {
        Self {
            type_name: type_name.into(),
            settings,
        }
    }

    /// Decode the settings into a stage-specific struct.
    ///
    /// Missing settings decode as the struct's defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] naming the config type when the
    /// settings do not match the expected shape.
    pub fn decode<T: DeserializeOwned + Default>(&self) -> Result<T> {
        if self.settings.is_null() {
            return Ok(T::default());
        }
        serde_json::from_value(self.settings.clone())
            .map_err(|e| Error::invalid(format!("settings ({})", self.type_name), e))
    }

    /// Stable signature used to share resources between identical configs.
    #[must_use]
    pub fn signature(&self) -> String {
        format!("{}:{}", self.type_name, self.settings)
    }
}

/// Keys used to read from and write to message objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectConfig {
    pub source_key: String,
    pub target_key: String,
    /// Partition key for buffering stages; empty batches everything together.
    pub batch_key: String,
    /// Key holding a Unix timestamp used as a time-to-live.
    pub ttl_key: String,
}

/// Aggregation bounds.
///
/// Omitted fields take the defaults below; an explicit zero (or `"0s"`)
/// leaves that dimension unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub count: usize,
    pub size: usize,
    pub duration: String,
}

pub const DEFAULT_BATCH_COUNT: usize = 1000;
pub const DEFAULT_BATCH_SIZE: usize = 1024 * 1024;
pub const DEFAULT_BATCH_DURATION: &str = "5m";

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            count: DEFAULT_BATCH_COUNT,
            size: DEFAULT_BATCH_SIZE,
            duration: DEFAULT_BATCH_DURATION.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub count: usize,
    /// Base backoff; attempt `n` sleeps `n * delay`.
    #[serde(alias = "duration")]
    pub delay: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            count: 3,
            delay: "1s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricConfig {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    pub destination: Config,
}

static DURATION_PART: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+(?:\.\d+)?)(ns|us|µs|ms|s|m|h|d)").expect("duration pattern is valid")
});

/// Parse a Go-style duration such as `"250ms"`, `"1m30s"` or `"1d"`.
///
/// `""` and `"0"` both parse as zero.
///
/// # Errors
///
/// Returns [`Error::InvalidOption`] for anything that is not a sequence of
/// `<number><unit>` groups.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() || s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut consumed = 0;
    let mut total = 0f64;
    for cap in DURATION_PART.captures_iter(s) {
        let whole = cap.get(0).map_or(0..0, |m| m.range());
        if whole.start != consumed {
            break;
        }
        consumed = whole.end;

        let n: f64 = cap[1]
            .parse()
            .map_err(|e| Error::invalid(format!("duration {s:?}"), e))?;
        let secs = match &cap[2] {
            "ns" => n / 1e9,
            "us" | "µs" => n / 1e6,
            "ms" => n / 1e3,
            "s" => n,
            "m" => n * 60.0,
            "h" => n * 3600.0,
            _ => n * 86_400.0,
        };
        total += secs;
    }

    if consumed != s.len() {
        return Err(Error::invalid(format!("duration {s:?}"), "malformed duration"));
    }
    Duration::try_from_secs_f64(total).map_err(|e| Error::invalid(format!("duration {s:?}"), e))
}
