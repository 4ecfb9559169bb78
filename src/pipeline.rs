//! Top-level pipelines built from JSON configuration.
//!
//! A [`Pipeline`] owns an ordered list of stages built through a
//! [`Registry`] and runs batches of messages through them. Stages are shared
//! between workers, so one pipeline can serve many concurrent batches: run
//! them sequentially with [`Pipeline::apply`] or across a rayon pool with
//! [`Pipeline::apply_par`].
//!
//! ```
//! use conduit::{Context, Message, Pipeline, Registry};
//!
//! let pipeline = Pipeline::from_json(&Registry::default(), r#"{
//!     "transforms": [
//!         {"type": "aggregate_to_array", "settings": {"batch": {"count": 2}}}
//!     ]
//! }"#).unwrap();
//!
//! let out = pipeline.apply(&Context::background(), vec![
//!     Message::new(r#"{"a":"b"}"#),
//!     Message::new(r#"{"c":"d"}"#),
//!     Message::new(r#"{"e":"f"}"#),
//!     Message::control(),
//! ]).unwrap();
//!
//! assert_eq!(out[0].payload(), br#"[{"a":"b"},{"c":"d"}]"#);
//! assert_eq!(out[1].payload(), br#"[{"e":"f"}]"#);
//! assert!(out[2].is_control());
//! ```

use crate::config::Config;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::registry::Registry;
use crate::transform::{self, Transform};
use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Environment variable consulted when `concurrency` is zero.
pub const CONCURRENCY_ENV: &str = "CONDUIT_CONCURRENCY";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Worker threads for [`Pipeline::apply_par`]; `0` picks a default.
    pub concurrency: usize,
    pub transforms: Vec<Config>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecMode {
    Sequential,
    Parallel { threads: usize },
}

pub struct Pipeline {
    transforms: Vec<Arc<dyn Transform>>,
    concurrency: usize,
}

/// Resolve a configured concurrency: explicit value, then the environment,
/// then the number of CPUs.
#[must_use]
pub fn resolve_concurrency(configured: usize) -> usize {
    if configured > 0 {
        return configured;
    }
    std::env::var(CONCURRENCY_ENV)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or_else(|| num_cpus::get().max(1))
}

impl Pipeline {
    /// Build every stage in `cfg`.
    ///
    /// # Errors
    ///
    /// Returns the first construction error, annotated with the position and
    /// type of the failing stage.
    pub fn new(registry: &Registry, cfg: &PipelineConfig) -> anyhow::Result<Self> {
        let mut transforms = Vec::with_capacity(cfg.transforms.len());
        for (i, tf) in cfg.transforms.iter().enumerate() {
            let built = registry
                .new_transform(tf)
                .with_context(|| format!("building transform {i} ({})", tf.type_name))?;
            transforms.push(built);
        }

        let concurrency = resolve_concurrency(cfg.concurrency);
        info!(stages = transforms.len(), concurrency, "Pipeline ready");
        Ok(Self {
            transforms,
            concurrency,
        })
    }

    /// Parse a [`PipelineConfig`] from JSON and build it.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or any stage fails to build.
    pub fn from_json(registry: &Registry, json: &str) -> anyhow::Result<Self> {
        let cfg: PipelineConfig = serde_json::from_str(json).context("parsing pipeline config")?;
        Self::new(registry, &cfg)
    }

    /// Wrap stages that were built elsewhere.
    #[must_use]
    pub fn from_transforms(transforms: Vec<Arc<dyn Transform>>) -> Self {
        Self {
            transforms,
            concurrency: resolve_concurrency(0),
        }
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    #[must_use]
    pub fn transforms(&self) -> &[Arc<dyn Transform>] {
        &self.transforms
    }

    /// Run one batch through every stage.
    ///
    /// # Errors
    ///
    /// See [`transform::apply`].
    pub fn apply(&self, ctx: &Context, msgs: Vec<Message>) -> Result<Vec<Message>> {
        transform::apply(ctx, &self.transforms, msgs)
    }

    /// Run independent batches on a pool of `concurrency` threads.
    ///
    /// Results come back in batch order. The first failing batch fails the
    /// call; other batches may still have run.
    ///
    /// # Errors
    ///
    /// Returns the first batch error, or an error if the pool cannot start.
    #[cfg(feature = "parallel")]
    pub fn apply_par(&self, ctx: &Context, batches: Vec<Vec<Message>>) -> Result<Vec<Vec<Message>>> {
        use rayon::prelude::*;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.concurrency)
            .build()
            .map_err(|e| Error::Other(anyhow::Error::new(e)))?;
        pool.install(|| {
            batches
                .into_par_iter()
                .map(|batch| self.apply(ctx, batch))
                .collect()
        })
    }

    /// Run batches with the given mode.
    ///
    /// # Errors
    ///
    /// Returns the first batch error.
    pub fn run(&self, ctx: &Context, mode: ExecMode, batches: Vec<Vec<Message>>) -> Result<Vec<Vec<Message>>> {
        match mode {
            ExecMode::Sequential => batches.into_iter().map(|b| self.apply(ctx, b)).collect(),
            #[cfg(feature = "parallel")]
            ExecMode::Parallel { threads } => {
                if threads == 0 || threads == self.concurrency {
                    return self.apply_par(ctx, batches);
                }
                let scoped = Self {
                    transforms: self.transforms.clone(),
                    concurrency: threads,
                };
                scoped.apply_par(ctx, batches)
            }
            #[cfg(not(feature = "parallel"))]
            ExecMode::Parallel { .. } => batches.into_iter().map(|b| self.apply(ctx, b)).collect(),
        }
    }

    /// Close every stage.
    ///
    /// # Errors
    ///
    /// Returns the first close error after attempting all stages.
    pub fn close(&self, ctx: &Context) -> Result<()> {
        transform::close_all(ctx, &self.transforms)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.transforms.len())
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

impl TryFrom<&str> for PipelineConfig {
    type Error = Error;

    fn try_from(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
