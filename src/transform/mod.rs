//! The stage contract and the driver that threads messages through stages.
//!
//! # The contract
//!
//! A [`Transform`] turns one message into zero or more messages. Every
//! implementation must:
//!
//! - pass control messages on (stages that buffer data first emit what
//!   they buffered, then the control message)
//! - report malformed input as an error instead of panicking
//! - keep construction free of side effects beyond validating settings and
//!   opening resources
//!
//! Stages are shared across worker threads, so any state they keep sits
//! behind a mutex or an atomic.
//!
//! # The driver
//!
//! [`apply`] runs a list of stages over a batch. Each stage sees every
//! message produced by the stage before it, and a single failure aborts the
//! whole call without partial output. Isolation is opt-in through
//! [`MetaErr`] or [`MetaRetry`].
//!
//! ```
//! use conduit::transform::{apply, ObjectCopy};
//! use conduit::{Context, Message, Transform};
//! use std::sync::Arc;
//!
//! let stages: Vec<Arc<dyn Transform>> = vec![Arc::new(ObjectCopy::identity())];
//! let out = apply(&Context::background(), &stages, vec![Message::new("a"), Message::control()]).unwrap();
//! assert_eq!(out.len(), 2);
//! assert!(out[1].is_control());
//! ```

mod aggregate;
mod meta_err;
mod meta_for_each;
mod meta_kv_store_lock;
mod meta_metric_duration;
mod meta_pipeline;
mod meta_retry;
mod meta_switch;
mod object;
mod send_file;
mod utility;

pub use aggregate::{AggregateFromArray, AggregateToArray, AggregateToString};
pub use meta_err::MetaErr;
pub use meta_for_each::MetaForEach;
pub use meta_kv_store_lock::MetaKvStoreLock;
pub use meta_metric_duration::MetaMetricDuration;
pub use meta_pipeline::MetaPipeline;
pub use meta_retry::MetaRetry;
pub use meta_switch::MetaSwitch;
pub use object::{ObjectCopy, ObjectDelete, ObjectInsert};
pub use send_file::SendFile;
pub use utility::{
    UtilityControl, UtilityDelay, UtilityDrop, UtilityErr, UtilityMetricBytes, UtilityMetricCount,
};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::message::Message;
use regex::Regex;
use std::sync::Arc;

/// One configured pipeline stage.
pub trait Transform: Send + Sync {
    /// # Errors
    ///
    /// Returns an error when the message cannot be processed; the caller's
    /// [`apply`] aborts on it.
    fn transform(&self, ctx: &Context, msg: Message) -> Result<Vec<Message>>;

    /// Release resources. Must be safe to call more than once.
    ///
    /// # Errors
    ///
    /// Returns an error if a resource fails to close.
    fn close(&self, _ctx: &Context) -> Result<()> {
        Ok(())
    }
}

/// Run `msgs` through `transforms` in order.
///
/// # Errors
///
/// Returns the first error raised by any stage, or the context error if the
/// context is cancelled between stages.
pub fn apply(ctx: &Context, transforms: &[Arc<dyn Transform>], msgs: Vec<Message>) -> Result<Vec<Message>> {
    let mut batch = msgs;
    for tf in transforms {
        ctx.check()?;
        let mut next = Vec::with_capacity(batch.len());
        for msg in batch {
            next.extend(tf.transform(ctx, msg)?);
        }
        batch = next;
    }
    Ok(batch)
}

/// [`apply`] for a single message.
///
/// # Errors
///
/// See [`apply`].
pub fn apply_one(ctx: &Context, transforms: &[Arc<dyn Transform>], msg: Message) -> Result<Vec<Message>> {
    apply(ctx, transforms, vec![msg])
}

/// Close every stage, returning the first failure after attempting all.
///
/// # Errors
///
/// Returns the first error raised by any `close`.
pub fn close_all(ctx: &Context, transforms: &[Arc<dyn Transform>]) -> Result<()> {
    let mut first = None;
    for tf in transforms {
        if let Err(e) = tf.close(ctx) {
            first.get_or_insert(e);
        }
    }
    first.map_or(Ok(()), Err)
}

/// The configured id, or the type name when none was given.
pub(crate) fn stage_id(id: &str, type_name: &str) -> String {
    if id.is_empty() {
        type_name.to_string()
    } else {
        id.to_string()
    }
}

/// Compile a list of error-message patterns.
pub(crate) fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| Regex::new(p).map_err(|e| Error::invalid("error_messages", e)))
        .collect()
}

pub(crate) fn matches_any(patterns: &[Regex], err: &Error) -> bool {
    let text = err.to_string();
    patterns.iter().any(|r| r.is_match(&text))
}
