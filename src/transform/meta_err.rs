use super::{Transform, apply, compile_patterns, matches_any, stage_id};
use crate::config::Config;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::registry::Registry;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Settings {
    id: String,
    transforms: Vec<Config>,
    error_messages: Vec<String>,
}

/// `meta_err`: run a sub-pipeline and turn selected errors into a
/// pass-through of the original message.
///
/// With no `error_messages`, every error is suppressed. Otherwise only
/// errors whose text matches one of the patterns are; the rest propagate.
pub struct MetaErr {
    id: String,
    transforms: Vec<Arc<dyn Transform>>,
    suppress: Vec<Regex>,
}

impl MetaErr {
    /// # Errors
    ///
    /// Returns an error for a malformed pattern or sub-transform.
    pub fn new(registry: &Registry, cfg: &Config) -> Result<Self> {
        let s: Settings = cfg.decode()?;
        let id = stage_id(&s.id, "meta_err");
        let transforms = registry
            .new_transforms(&s.transforms)
            .map_err(|e| Error::transform(&id, e))?;
        let suppress = compile_patterns(&s.error_messages).map_err(|e| Error::transform(&id, e))?;
        Ok(Self {
            id,
            transforms,
            suppress,
        })
    }

    fn suppresses(&self, err: &Error) -> bool {
        self.suppress.is_empty() || matches_any(&self.suppress, err)
    }
}

impl Transform for MetaErr {
    fn transform(&self, ctx: &Context, msg: Message) -> Result<Vec<Message>> {
        match apply(ctx, &self.transforms, vec![msg.clone()]) {
            Ok(msgs) => Ok(msgs),
            Err(e) if self.suppresses(&e) => {
                debug!(id = %self.id, error = %e, "Suppressed error");
                Ok(vec![msg])
            }
            Err(e) => Err(Error::transform(&self.id, e)),
        }
    }

    fn close(&self, ctx: &Context) -> Result<()> {
        super::close_all(ctx, &self.transforms)
    }
}
