//! Boolean checks over messages.
//!
//! A condition combines a list of [`Inspector`]s with an operator:
//!
//! | operator | matches when |
//! |---|---|
//! | `all` | every inspector returns true |
//! | `any` | at least one inspector returns true |
//! | `none` | no inspector returns true |
//! | `""` | always (used for else-branches) |
//!
//! `all`, `any` and `none` never match a control message and fail when no
//! inspectors were configured.
//!
//! ```
//! use conduit::condition::{Condition, ConditionConfig, Operator};
//! use conduit::{Context, Message, Registry};
//!
//! let cfg: ConditionConfig = serde_json::from_str(r#"{
//!     "operator": "all",
//!     "inspectors": [
//!         {"type": "string_equal_to", "settings": {"object": {"source_key": "a"}, "value": "b"}}
//!     ]
//! }"#).unwrap();
//!
//! let cond = Condition::new(&Registry::default(), &cfg).unwrap();
//! let ctx = Context::background();
//! assert!(cond.operate(&ctx, &Message::new(r#"{"a":"b"}"#)).unwrap());
//! assert!(!cond.operate(&ctx, &Message::control()).unwrap());
//! ```

mod inspectors;

pub use inspectors::{
    FormatJson, MetaNegate, NumberCompare, NumberInspector, StringCompare, StringInspector,
    StringMatch,
};

use crate::config::Config;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::registry::Registry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A single check against a message.
pub trait Inspector: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the check cannot be evaluated.
    fn inspect(&self, ctx: &Context, msg: &Message) -> Result<bool>;
}

/// A combined check, as consumed by `meta_switch` and `meta_retry`.
pub trait Operator: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if any inspector fails or the operator has nothing
    /// to evaluate.
    fn operate(&self, ctx: &Context, msg: &Message) -> Result<bool>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionConfig {
    pub operator: String,
    pub inspectors: Vec<Config>,
}

impl ConditionConfig {
    /// True for the always-matching configuration.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operator.is_empty() && self.inspectors.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    All,
    Any,
    None,
    Empty,
}

impl Kind {
    fn parse(op: &str) -> Result<Self> {
        match op {
            "all" => Ok(Kind::All),
            "any" => Ok(Kind::Any),
            "none" => Ok(Kind::None),
            "" => Ok(Kind::Empty),
            other => Err(Error::UnknownType {
                kind: "operator",
                name: other.to_string(),
            }),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Kind::All => "all",
            Kind::Any => "any",
            Kind::None => "none",
            Kind::Empty => "",
        }
    }
}

/// The built-in [`Operator`].
pub struct Condition {
    kind: Kind,
    inspectors: Vec<Arc<dyn Inspector>>,
}

impl Condition {
    /// # Errors
    ///
    /// Returns an error for an unknown operator or inspector type, or an
    /// inspector whose settings do not validate.
    pub fn new(registry: &Registry, cfg: &ConditionConfig) -> Result<Self> {
        let kind = Kind::parse(&cfg.operator)?;
        let inspectors = cfg
            .inspectors
            .iter()
            .map(|c| registry.new_inspector(c))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_parts(kind, inspectors))
    }

    pub fn from_parts(kind: Kind, inspectors: Vec<Arc<dyn Inspector>>) -> Self {
        Self { kind, inspectors }
    }

    /// A condition that always matches.
    #[must_use]
    pub fn always() -> Self {
        Self::from_parts(Kind::Empty, Vec::new())
    }

    #[must_use]
    pub fn kind(&self) -> Kind {
        self.kind
    }
}

impl Operator for Condition {
    fn operate(&self, ctx: &Context, msg: &Message) -> Result<bool> {
        if self.kind == Kind::Empty {
            return Ok(true);
        }
        if self.inspectors.is_empty() {
            return Err(Error::Condition(format!(
                "operator {}: no inspectors configured",
                self.kind.as_str()
            )));
        }
        if msg.is_control() {
            return Ok(false);
        }

        match self.kind {
            Kind::All => {
                for insp in &self.inspectors {
                    if !insp.inspect(ctx, msg)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Kind::Any => {
                for insp in &self.inspectors {
                    if insp.inspect(ctx, msg)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Kind::None => {
                for insp in &self.inspectors {
                    if insp.inspect(ctx, msg)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Kind::Empty => Ok(true),
        }
    }
}
