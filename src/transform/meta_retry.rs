use super::{Transform, apply, compile_patterns, matches_any, stage_id};
use crate::condition::{Condition, ConditionConfig, Operator};
use crate::config::{Config, RetryConfig, parse_duration};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::registry::Registry;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Settings {
    id: String,
    transforms: Vec<Config>,
    condition: ConditionConfig,
    retry: RetryConfig,
    error_messages: Vec<String>,
}

/// `meta_retry`: rerun a sub-pipeline until every result satisfies a
/// condition.
///
/// Each attempt starts from a fresh copy of the input message. Attempt `n`
/// (counting retries from 1) first sleeps `n * retry.delay`, so the backoff
/// grows linearly. With `retry.count = N` the sub-pipeline runs at most
/// `N + 1` times before the stage fails with
/// [`Error::RetryLimitReached`].
///
/// Sub-pipeline errors fail immediately unless their text matches one of
/// `error_messages`, in which case they are retried like a failed condition.
/// Control messages run through the sub-pipeline once and are never checked.
pub struct MetaRetry {
    id: String,
    transforms: Vec<Arc<dyn Transform>>,
    condition: Condition,
    count: usize,
    delay: Duration,
    retryable: Vec<Regex>,
}

impl MetaRetry {
    /// # Errors
    ///
    /// Returns an error for a malformed delay, pattern, condition or
    /// sub-transform.
    pub fn new(registry: &Registry, cfg: &Config) -> Result<Self> {
        let s: Settings = cfg.decode()?;
        let id = stage_id(&s.id, "meta_retry");
        let build = || -> Result<Self> {
            Ok(Self {
                id: id.clone(),
                transforms: registry.new_transforms(&s.transforms)?,
                condition: registry.new_condition(&s.condition)?,
                count: s.retry.count,
                delay: parse_duration(&s.retry.delay)?,
                retryable: compile_patterns(&s.error_messages)?,
            })
        };
        build().map_err(|e| Error::transform(&id, e))
    }

    /// Whether every data result satisfies the condition.
    fn accepted(&self, ctx: &Context, msgs: &[Message]) -> Result<bool> {
        for m in msgs.iter().filter(|m| !m.is_control()) {
            if !self.condition.operate(ctx, m)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn run(&self, ctx: &Context, msg: Message) -> Result<Vec<Message>> {
        if msg.is_control() {
            return apply(ctx, &self.transforms, vec![msg]);
        }

        for attempt in 0..=self.count {
            if attempt > 0 {
                let backoff = self.delay.saturating_mul(u32::try_from(attempt).unwrap_or(u32::MAX));
                warn!(id = %self.id, attempt, ?backoff, "Retrying");
                ctx.sleep(backoff)?;
            }

            match apply(ctx, &self.transforms, vec![msg.clone()]) {
                Ok(msgs) => {
                    if self.accepted(ctx, &msgs)? {
                        return Ok(msgs);
                    }
                }
                Err(e) if matches_any(&self.retryable, &e) => {
                    warn!(id = %self.id, attempt, error = %e, "Retryable error");
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::RetryLimitReached)
    }
}

impl Transform for MetaRetry {
    fn transform(&self, ctx: &Context, msg: Message) -> Result<Vec<Message>> {
        self.run(ctx, msg).map_err(|e| Error::transform(&self.id, e))
    }

    fn close(&self, ctx: &Context) -> Result<()> {
        super::close_all(ctx, &self.transforms)
    }
}
