use super::{Transform, apply, stage_id};
use crate::config::{Config, ObjectConfig, parse_duration};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::kv::{LockError, Locker, unix_now};
use crate::message::{Data, Message};
use crate::registry::Registry;
use crate::value::Value;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Settings {
    id: String,
    prefix: String,
    ttl_offset: String,
    object: ObjectConfig,
    kv_store: Config,
    transforms: Vec<Config>,
}

/// `meta_kv_store_lock`: run a sub-pipeline only for messages whose lock
/// key this stage could acquire.
///
/// The lock key is the value at `object.source_key`, or the SHA-256 of the
/// payload when that value is missing, joined to `prefix` with a colon.
/// A key that is already held is contention: the message passes through
/// untouched and the sub-pipeline does not run.
///
/// Keys are never released on success; they expire through their TTL,
/// which is the Unix timestamp at `object.ttl_key` plus `ttl_offset`, or
/// now plus `ttl_offset` when no key is configured. When a lock call or the
/// sub-pipeline fails, every key acquired since the last control message is
/// released before the error is returned.
///
/// Calls on one stage are serialized: the held-key set stays locked from
/// the lock call through the sub-pipeline and any rollback, so a failing
/// worker can never release a key another worker is still processing.
pub struct MetaKvStoreLock {
    id: String,
    prefix: String,
    source_key: String,
    ttl_key: String,
    ttl_offset: i64,
    locker: Arc<dyn Locker>,
    transforms: Vec<Arc<dyn Transform>>,
    held: Mutex<Vec<String>>,
}

/// Interpret `v` as a Unix timestamp in seconds, truncating any sub-second
/// precision (milliseconds, microseconds, nanoseconds).
fn truncate_ttl(v: &Value) -> i64 {
    if !v.exists() {
        return 0;
    }
    let digits = v.string().trim().len();
    let ts = v.int();
    if digits <= 10 {
        return ts;
    }
    let exp = u32::try_from(digits - 10).unwrap_or(u32::MAX);
    10i64.checked_pow(exp).map_or(0, |div| ts / div)
}

fn sha256_hex(b: &[u8]) -> String {
    hex::encode(Sha256::digest(b).as_slice())
}

impl MetaKvStoreLock {
    /// # Errors
    ///
    /// Returns an error if `kv_store` is missing or unknown, the store fails
    /// its setup, `ttl_offset` is malformed, or a sub-transform cannot be
    /// built.
    pub fn new(registry: &Registry, cfg: &Config) -> Result<Self> {
        let s: Settings = cfg.decode()?;
        let id = stage_id(&s.id, "meta_kv_store_lock");
        let build = || -> Result<Self> {
            if s.kv_store.type_name.is_empty() {
                return Err(Error::missing("kv_store"));
            }
            let offset = parse_duration(&s.ttl_offset)?;
            Ok(Self {
                id: id.clone(),
                prefix: s.prefix.clone(),
                source_key: s.object.source_key.clone(),
                ttl_key: s.object.ttl_key.clone(),
                ttl_offset: i64::try_from(offset.as_secs()).unwrap_or(i64::MAX),
                locker: registry.locker(&Context::background(), &s.kv_store)?,
                transforms: registry.new_transforms(&s.transforms)?,
                held: Mutex::new(Vec::new()),
            })
        };
        build().map_err(|e| Error::transform(&id, e))
    }

    fn lock_key(&self, data: &Data) -> String {
        let v = data.get_value(&self.source_key);
        let key = if !self.source_key.is_empty() && v.exists() {
            v.string()
        } else {
            sha256_hex(data.payload())
        };
        if self.prefix.is_empty() {
            key
        } else {
            format!("{}:{key}", self.prefix)
        }
    }

    fn ttl(&self, data: &Data) -> i64 {
        match (self.ttl_key.is_empty(), self.ttl_offset) {
            (false, offset) => truncate_ttl(&data.get_value(&self.ttl_key)) + offset,
            (true, 0) => 0,
            (true, offset) => unix_now() + offset,
        }
    }

    /// Release every key held since the last control message.
    fn rollback(&self, ctx: &Context, held: &mut Vec<String>) {
        let detached = ctx.without_cancel();
        let released = held.len();
        for key in held.drain(..) {
            if let Err(e) = self.locker.unlock(&detached, &key) {
                warn!(id = %self.id, key, error = %e, "Failed to release lock during rollback");
            }
        }
        if released > 0 {
            warn!(id = %self.id, released, "Rolled back held locks");
        }
    }

    fn run(&self, ctx: &Context, msg: Message) -> Result<Vec<Message>> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);

        let Message::Data(data) = msg else {
            let out = apply(ctx, &self.transforms, vec![Message::Control]);
            match out {
                Ok(_) => held.clear(),
                Err(_) => self.rollback(ctx, &mut held),
            }
            return out;
        };

        let key = self.lock_key(&data);
        let ttl = self.ttl(&data);
        match self.locker.lock(ctx, &key, ttl) {
            Ok(()) => {}
            Err(LockError::NoLock) => {
                debug!(id = %self.id, key, "Lock held elsewhere, passing message through");
                return Ok(vec![data.into()]);
            }
            Err(e) => {
                self.rollback(ctx, &mut held);
                return Err(e.into());
            }
        }

        debug!(id = %self.id, key, ttl, "Lock acquired");
        held.push(key);

        apply(ctx, &self.transforms, vec![data.into()])
            .inspect_err(|_| self.rollback(ctx, &mut held))
    }

    /// Keys acquired since the last control message.
    #[must_use]
    pub fn held_keys(&self) -> Vec<String> {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Transform for MetaKvStoreLock {
    fn transform(&self, ctx: &Context, msg: Message) -> Result<Vec<Message>> {
        self.run(ctx, msg).map_err(|e| Error::transform(&self.id, e))
    }

    fn close(&self, ctx: &Context) -> Result<()> {
        super::close_all(ctx, &self.transforms)
    }
}
