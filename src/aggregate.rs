//! Count, size and age bounded accumulation of raw items.
//!
//! An [`Aggregate`] maps a partition key to an ordered list of byte items.
//! The empty key is an ordinary partition that stages use when no
//! partitioning is configured.
//!
//! Each partition tracks its item count, cumulative byte size, and the time
//! its first item arrived. [`Aggregate::add`] checks all three bounds
//! *before* storing anything and returns `false` when the item does not fit,
//! which tells the caller to drain the partition and try again.
//!
//! # Concurrency
//!
//! Methods take `&mut self`. Owners keep the buffer behind a single
//! `Mutex` so that an `add` and the drain-and-retry that may follow it form
//! one critical section, including the creation of new partitions.
//!
//! # Example
//!
//! ```
//! use conduit::aggregate::{Aggregate, Bounds};
//!
//! let mut agg = Aggregate::new(Bounds { count: Some(2), ..Default::default() }).unwrap();
//! assert!(agg.add("", b"a".to_vec()));
//! assert!(agg.add("", b"b".to_vec()));
//! assert!(!agg.add("", b"c".to_vec()));
//!
//! let drained = agg.add_or_drain("", b"c".to_vec()).unwrap();
//! assert_eq!(drained, Some(vec![b"a".to_vec(), b"b".to_vec()]));
//! assert_eq!(agg.get(""), [b"c".to_vec()]);
//! ```

use crate::config::{BatchConfig, parse_duration};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::trace;

/// Bounds for every partition of an [`Aggregate`]. `None` is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bounds {
    pub count: Option<usize>,
    pub size: Option<usize>,
    pub age: Option<Duration>,
}

impl Bounds {
    /// Translate a [`BatchConfig`]; zero values become unbounded.
    ///
    /// # Errors
    ///
    /// Returns an error if the duration cannot be parsed.
    pub fn from_config(cfg: &BatchConfig) -> Result<Self> {
        let age = parse_duration(&cfg.duration)?;
        Ok(Self {
            count: (cfg.count > 0).then_some(cfg.count),
            size: (cfg.size > 0).then_some(cfg.size),
            age: (!age.is_zero()).then_some(age),
        })
    }
}

#[derive(Debug, Default)]
struct Partition {
    items: Vec<Vec<u8>>,
    size: usize,
    first_added: Option<Instant>,
}

impl Partition {
    fn age(&self) -> Duration {
        self.first_added.map_or(Duration::ZERO, |t| t.elapsed())
    }

}

#[derive(Debug)]
pub struct Aggregate {
    bounds: Bounds,
    partitions: BTreeMap<String, Partition>,
}

impl Aggregate {
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] when every dimension is unbounded,
    /// since such a buffer could never decide to flush.
    pub fn new(bounds: Bounds) -> Result<Self> {
        if bounds.count.is_none() && bounds.size.is_none() && bounds.age.is_none() {
            return Err(Error::invalid(
                "batch",
                "count, size and duration cannot all be unbounded",
            ));
        }
        Ok(Self {
            bounds,
            partitions: BTreeMap::new(),
        })
    }

    /// # Errors
    ///
    /// See [`Bounds::from_config`] and [`Aggregate::new`].
    pub fn from_config(cfg: &BatchConfig) -> Result<Self> {
        Self::new(Bounds::from_config(cfg)?)
    }

    #[must_use]
    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// Store `item` under `key` if every bound still holds afterwards.
    ///
    /// Returns `false` (and stores nothing) when the count or size bound
    /// would be exceeded, or when the partition is already older than the
    /// age bound.
    pub fn add(&mut self, key: &str, item: Vec<u8>) -> bool {
        if !self.accepts(key, item.len()) {
            return false;
        }

        let part = self.partitions.entry(key.to_string()).or_default();
        if part.items.is_empty() {
            part.first_added = Some(Instant::now());
        }
        part.size += item.len();
        part.items.push(item);
        true
    }

    fn accepts(&self, key: &str, len: usize) -> bool {
        let Some(part) = self.partitions.get(key) else {
            return self.fits(len);
        };

        if self.bounds.count.is_some_and(|max| part.items.len() + 1 > max) {
            return false;
        }
        if self.bounds.size.is_some_and(|max| part.size + len > max) {
            return false;
        }
        part.items.is_empty() || self.bounds.age.is_none_or(|max| part.age() <= max)
    }

    /// Items stored under `key`, oldest first. Does not clear them.
    #[must_use]
    pub fn get(&self, key: &str) -> &[Vec<u8>] {
        self.partitions
            .get(key)
            .map(|p| p.items.as_slice())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn count(&self, key: &str) -> usize {
        self.get(key).len()
    }

    #[must_use]
    pub fn size(&self, key: &str) -> usize {
        self.partitions.get(key).map_or(0, |p| p.size)
    }

    /// Clear `key` and forget the partition.
    pub fn reset(&mut self, key: &str) {
        self.partitions.remove(key);
    }

    /// Every partition in key order.
    pub fn get_all(&self) -> impl Iterator<Item = (&str, &[Vec<u8>])> {
        self.partitions
            .iter()
            .map(|(k, p)| (k.as_str(), p.items.as_slice()))
    }

    pub fn reset_all(&mut self) {
        self.partitions.clear();
    }

    /// Whether a single item of `len` bytes can ever be stored.
    #[must_use]
    pub fn fits(&self, len: usize) -> bool {
        self.bounds.size.is_none_or(|max| len <= max)
    }

    /// Add `item`, draining `key` first if it is full.
    ///
    /// Returns the drained items when a drain happened. After a drain the
    /// partition holds only `item`.
    ///
    /// # Errors
    ///
    /// - [`Error::SizeLimit`] if `item` alone exceeds the size bound.
    /// - [`Error::BatchMisconfigured`] if `item` is rejected by the freshly
    ///   reset partition.
    pub fn add_or_drain(&mut self, key: &str, item: Vec<u8>) -> Result<Option<Vec<Vec<u8>>>> {
        if let Some(limit) = self.bounds.size
            && item.len() > limit
        {
            return Err(Error::SizeLimit {
                size: item.len(),
                limit,
            });
        }

        if self.accepts(key, item.len()) {
            self.add(key, item);
            return Ok(None);
        }

        let drained = self.get(key).to_vec();
        trace!(key, items = drained.len(), bytes = self.size(key), "Partition full, draining");
        self.reset(key);

        if !self.add(key, item) {
            return Err(Error::BatchMisconfigured);
        }
        Ok(Some(drained))
    }

    /// Add `item`, first handing `key`'s items to `flush` if it is full.
    ///
    /// The partition is reset only after `flush` succeeds, so a failed
    /// flush leaves the buffer exactly as it was and `item` is not stored.
    /// Returns whether a flush happened.
    ///
    /// # Errors
    ///
    /// The errors of [`Aggregate::add_or_drain`], or the error from `flush`.
    pub fn add_or_flush<F>(&mut self, key: &str, item: Vec<u8>, flush: F) -> Result<bool>
    where
        F: FnOnce(&[Vec<u8>]) -> Result<()>,
    {
        if let Some(limit) = self.bounds.size
            && item.len() > limit
        {
            return Err(Error::SizeLimit {
                size: item.len(),
                limit,
            });
        }

        if self.accepts(key, item.len()) {
            self.add(key, item);
            return Ok(false);
        }

        flush(self.get(key))?;
        self.reset(key);
        if !self.add(key, item) {
            return Err(Error::BatchMisconfigured);
        }
        Ok(true)
    }

    /// Hand every non-empty partition to `flush` in key order, removing
    /// each one once it is flushed.
    ///
    /// # Errors
    ///
    /// Stops at the first error from `flush`; the failing partition and
    /// every later one stay buffered.
    pub fn flush_all<F>(&mut self, mut flush: F) -> Result<()>
    where
        F: FnMut(&str, &[Vec<u8>]) -> Result<()>,
    {
        let keys: Vec<String> = self.partitions.keys().cloned().collect();
        for key in keys {
            let items = self.get(&key);
            if !items.is_empty() {
                flush(&key, items)?;
            }
            self.partitions.remove(&key);
        }
        Ok(())
    }

    /// Drain every non-empty partition, in key order, and reset the buffer.
    pub fn drain_all(&mut self) -> Vec<(String, Vec<Vec<u8>>)> {
        let out: Vec<(String, Vec<Vec<u8>>)> = self
            .get_all()
            .filter(|(_, items)| !items.is_empty())
            .map(|(k, items)| (k.to_string(), items.to_vec()))
            .collect();
        self.reset_all();
        out
    }
}
