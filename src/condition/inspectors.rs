//! Built-in inspectors.
//!
//! Every inspector reads `object.source_key` (the whole payload when empty)
//! and returns false for control messages.

use super::Inspector;
use crate::config::{Config, ObjectConfig};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::registry::Registry;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;

fn target(msg: &Message, source_key: &str) -> String {
    if source_key.is_empty() {
        return String::from_utf8_lossy(msg.payload()).into_owned();
    }
    msg.get_value(source_key).string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringCompare {
    EqualTo,
    Contains,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StringSettings {
    object: ObjectConfig,
    value: String,
}

/// `string_equal_to`, `string_contains`, `string_starts_with`, `string_ends_with`.
#[derive(Debug)]
pub struct StringInspector {
    source_key: String,
    value: String,
    cmp: StringCompare,
}

impl StringInspector {
    /// # Errors
    ///
    /// Returns an error if the settings are malformed.
    pub fn from_config(cfg: &Config, cmp: StringCompare) -> Result<Self> {
        let s: StringSettings = cfg.decode()?;
        Ok(Self {
            source_key: s.object.source_key,
            value: s.value,
            cmp,
        })
    }
}

impl Inspector for StringInspector {
    fn inspect(&self, _ctx: &Context, msg: &Message) -> Result<bool> {
        if msg.is_control() {
            return Ok(false);
        }
        let check = target(msg, &self.source_key);
        Ok(match self.cmp {
            StringCompare::EqualTo => check == self.value,
            StringCompare::Contains => check.contains(&self.value),
            StringCompare::StartsWith => check.starts_with(&self.value),
            StringCompare::EndsWith => check.ends_with(&self.value),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MatchSettings {
    object: ObjectConfig,
    pattern: String,
}

/// `string_match`: the value matches a regular expression.
#[derive(Debug)]
pub struct StringMatch {
    source_key: String,
    pattern: Regex,
}

impl StringMatch {
    /// # Errors
    ///
    /// Returns an error if `pattern` is missing or not a valid regex.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let s: MatchSettings = cfg.decode()?;
        if s.pattern.is_empty() {
            return Err(Error::missing("pattern"));
        }
        let pattern = Regex::new(&s.pattern).map_err(|e| Error::invalid("pattern", e))?;
        Ok(Self {
            source_key: s.object.source_key,
            pattern,
        })
    }
}

impl Inspector for StringMatch {
    fn inspect(&self, _ctx: &Context, msg: &Message) -> Result<bool> {
        if msg.is_control() {
            return Ok(false);
        }
        Ok(self.pattern.is_match(&target(msg, &self.source_key)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberCompare {
    EqualTo,
    GreaterThan,
    LessThan,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NumberSettings {
    object: ObjectConfig,
    value: f64,
}

/// `number_equal_to`, `number_greater_than`, `number_less_than`.
///
/// Values that are not numbers compare as `0`.
#[derive(Debug)]
pub struct NumberInspector {
    source_key: String,
    value: f64,
    cmp: NumberCompare,
}

impl NumberInspector {
    /// # Errors
    ///
    /// Returns an error if the settings are malformed.
    pub fn from_config(cfg: &Config, cmp: NumberCompare) -> Result<Self> {
        let s: NumberSettings = cfg.decode()?;
        Ok(Self {
            source_key: s.object.source_key,
            value: s.value,
            cmp,
        })
    }
}

impl Inspector for NumberInspector {
    fn inspect(&self, _ctx: &Context, msg: &Message) -> Result<bool> {
        if msg.is_control() {
            return Ok(false);
        }
        let check = if self.source_key.is_empty() {
            target(msg, "").trim().parse::<f64>().unwrap_or_default()
        } else {
            msg.get_value(&self.source_key).float()
        };
        Ok(match self.cmp {
            NumberCompare::EqualTo => (check - self.value).abs() < f64::EPSILON,
            NumberCompare::GreaterThan => check > self.value,
            NumberCompare::LessThan => check < self.value,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FormatSettings {
    object: ObjectConfig,
}

/// `format_json`: the value is a JSON object or array.
#[derive(Debug)]
pub struct FormatJson {
    source_key: String,
}

impl FormatJson {
    /// # Errors
    ///
    /// Returns an error if the settings are malformed.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let s: FormatSettings = cfg.decode()?;
        Ok(Self {
            source_key: s.object.source_key,
        })
    }
}

impl Inspector for FormatJson {
    fn inspect(&self, _ctx: &Context, msg: &Message) -> Result<bool> {
        if msg.is_control() {
            return Ok(false);
        }
        if self.source_key.is_empty() {
            let parsed = serde_json::from_slice::<serde_json::Value>(msg.payload());
            return Ok(parsed.is_ok_and(|v| v.is_object() || v.is_array()));
        }
        let v = msg.get_value(&self.source_key);
        Ok(v.is_object() || v.is_array())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NegateSettings {
    inspector: Config,
}

/// `meta_negate`: inverts a nested inspector.
pub struct MetaNegate {
    inner: Arc<dyn Inspector>,
}

impl MetaNegate {
    /// # Errors
    ///
    /// Returns an error if `inspector` is missing or cannot be built.
    pub fn from_config(registry: &Registry, cfg: &Config) -> Result<Self> {
        let s: NegateSettings = cfg.decode()?;
        if s.inspector.type_name.is_empty() {
            return Err(Error::missing("inspector"));
        }
        Ok(Self {
            inner: registry.new_inspector(&s.inspector)?,
        })
    }
}

impl Inspector for MetaNegate {
    fn inspect(&self, ctx: &Context, msg: &Message) -> Result<bool> {
        if msg.is_control() {
            return Ok(false);
        }
        Ok(!self.inner.inspect(ctx, msg)?)
    }
}
