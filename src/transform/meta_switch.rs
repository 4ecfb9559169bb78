use super::{Transform, apply, stage_id};
use crate::condition::{Condition, ConditionConfig, Operator};
use crate::config::Config;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::registry::Registry;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CaseSettings {
    condition: ConditionConfig,
    transforms: Vec<Config>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Settings {
    id: String,
    cases: Vec<CaseSettings>,
}

struct Case {
    condition: Condition,
    transforms: Vec<Arc<dyn Transform>>,
}

/// `meta_switch`: route each message to the first case whose condition
/// matches.
///
/// A case without a condition always matches, so it works as an else
/// branch. Messages that match nothing pass through unchanged.
///
/// A control message visits every case so that each branch can flush; the
/// control copies the branches return are dropped and a single control
/// message is appended after everything they flushed.
pub struct MetaSwitch {
    id: String,
    cases: Vec<Case>,
}

impl MetaSwitch {
    /// # Errors
    ///
    /// Returns an error if no cases are configured or any case fails to build.
    pub fn new(registry: &Registry, cfg: &Config) -> Result<Self> {
        let s: Settings = cfg.decode()?;
        let id = stage_id(&s.id, "meta_switch");
        if s.cases.is_empty() {
            return Err(Error::transform(&id, Error::missing("cases")));
        }

        let cases = s
            .cases
            .iter()
            .map(|c| {
                Ok(Case {
                    condition: registry.new_condition(&c.condition)?,
                    transforms: registry.new_transforms(&c.transforms)?,
                })
            })
            .collect::<Result<Vec<_>>>()
            .map_err(|e| Error::transform(&id, e))?;
        Ok(Self { id, cases })
    }

    fn flush(&self, ctx: &Context) -> Result<Vec<Message>> {
        let mut out = Vec::new();
        for case in &self.cases {
            let msgs = apply(ctx, &case.transforms, vec![Message::Control])?;
            out.extend(msgs.into_iter().filter(|m| !m.is_control()));
        }
        out.push(Message::Control);
        Ok(out)
    }

    fn route(&self, ctx: &Context, msg: Message) -> Result<Vec<Message>> {
        for case in &self.cases {
            if case.condition.operate(ctx, &msg)? {
                return apply(ctx, &case.transforms, vec![msg]);
            }
        }
        Ok(vec![msg])
    }
}

impl Transform for MetaSwitch {
    fn transform(&self, ctx: &Context, msg: Message) -> Result<Vec<Message>> {
        let res = if msg.is_control() {
            self.flush(ctx)
        } else {
            self.route(ctx, msg)
        };
        res.map_err(|e| Error::transform(&self.id, e))
    }

    fn close(&self, ctx: &Context) -> Result<()> {
        let mut first = None;
        for case in &self.cases {
            if let Err(e) = super::close_all(ctx, &case.transforms) {
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}
