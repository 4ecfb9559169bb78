//! Lock stores used by the `meta_kv_store_lock` transform.
//!
//! A [`Locker`] grants exclusive ownership of a key until an expiry time.
//! Acquiring a key that is already held fails with [`LockError::NoLock`],
//! which callers treat as contention rather than failure.

use crate::context::Context;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// The key is held by another owner
    #[error("unable to acquire lock")]
    NoLock,

    /// The store itself failed
    #[error("lock store: {0}")]
    Store(String),

    #[error("lock store call cancelled")]
    Cancelled,
}

pub type LockResult<T> = std::result::Result<T, LockError>;

/// Exclusive key ownership with time-to-live expiry.
///
/// `ttl` is an absolute Unix timestamp in seconds; `0` means the lock never
/// expires on its own.
pub trait Locker: Send + Sync {
    /// Prepare the store for use. Called once per stage at construction.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Store`] if the store is unreachable.
    fn setup(&self, _ctx: &Context) -> LockResult<()> {
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`LockError::NoLock`] if `key` is held and unexpired.
    fn lock(&self, ctx: &Context, key: &str, ttl: i64) -> LockResult<()>;

    /// Release `key`. Releasing a key that is not held is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Store`] if the store fails.
    fn unlock(&self, ctx: &Context, key: &str) -> LockResult<()>;
}

/// Current Unix time in seconds.
#[must_use]
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

/// In-process lock store.
#[derive(Debug, Default)]
pub struct MemoryLocker {
    held: Mutex<HashMap<String, i64>>,
}

impl MemoryLocker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` is currently held.
    #[must_use]
    pub fn is_locked(&self, key: &str) -> bool {
        let held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.get(key).is_some_and(|&ttl| !expired(ttl))
    }
}

fn expired(ttl: i64) -> bool {
    ttl != 0 && ttl <= unix_now()
}

impl Locker for MemoryLocker {
    fn lock(&self, ctx: &Context, key: &str, ttl: i64) -> LockResult<()> {
        if ctx.check().is_err() {
            return Err(LockError::Cancelled);
        }

        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(&current) = held.get(key)
            && !expired(current)
        {
            return Err(LockError::NoLock);
        }
        held.insert(key.to_string(), ttl);
        trace!(key, ttl, "Lock acquired");
        Ok(())
    }

    fn unlock(&self, _ctx: &Context, key: &str) -> LockResult<()> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.remove(key);
        Ok(())
    }
}
