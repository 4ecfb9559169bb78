//! Metric reporting for pipeline stages.
//!
//! Stages that measure something (`meta_metric_duration`,
//! `utility_metric_count`, `utility_metric_bytes`) hand a [`MetricData`]
//! point to a [`Generator`], the destination configured under
//! `metric.destination`.
//!
//! # Overview
//!
//! - [`Generator`] is the destination contract
//! - [`MetricsCollector`] keeps every point in memory (destination `memory`)
//! - [`TracingGenerator`] writes points as `tracing` events (destination `tracing`)
//! - [`Reporter`] binds a configured name and attribute set to a destination
//!
//! # Example
//!
//! ```
//! use conduit::context::Context;
//! use conduit::metrics::{Generator, MetricData, MetricsCollector};
//!
//! let metrics = MetricsCollector::new();
//! metrics
//!     .generate(&Context::background(), MetricData::new("bytes", 42))
//!     .unwrap();
//! assert_eq!(metrics.snapshot()["bytes"], 42);
//! ```

use crate::config::MetricConfig;
use crate::context::Context;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

/// A single measured value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricData {
    pub name: String,
    pub value: Value,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl MetricData {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            attributes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_attributes(mut self, attributes: BTreeMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }
}

/// Destination for metric data points.
pub trait Generator: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the destination cannot record the point.
    fn generate(&self, ctx: &Context, data: MetricData) -> Result<()>;
}

/// Thread-safe in-memory metric destination.
///
/// Clones share the same storage, so a collector handed to a registry can
/// be inspected after the pipeline ran.
#[derive(Clone, Default)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsCollectorInner>>,
}

#[derive(Default)]
struct MetricsCollectorInner {
    points: Vec<MetricData>,
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every point recorded so far, in arrival order.
    #[must_use]
    pub fn points(&self) -> Vec<MetricData> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.points.clone()
    }

    /// Points recorded under `name`, in arrival order.
    #[must_use]
    pub fn history(&self, name: &str) -> Vec<MetricData> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner
            .points
            .iter()
            .filter(|p| p.name == name)
            .cloned()
            .collect()
    }

    /// Latest value of every metric name.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, Value> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner
            .points
            .iter()
            .map(|p| (p.name.clone(), p.value.clone()))
            .collect()
    }

    /// Sum of every numeric value recorded under `name`.
    #[must_use]
    pub fn total(&self, name: &str) -> u64 {
        self.history(name)
            .iter()
            .filter_map(|p| p.value.as_u64())
            .sum()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.points.clear();
    }
}

impl Generator for MetricsCollector {
    fn generate(&self, _ctx: &Context, data: MetricData) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.points.push(data);
        Ok(())
    }
}

/// Writes each point as an `info!` event on the `conduit::metrics` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingGenerator;

impl Generator for TracingGenerator {
    fn generate(&self, _ctx: &Context, data: MetricData) -> Result<()> {
        let attributes = serde_json::to_string(&data.attributes)?;
        info!(
            target: "conduit::metrics",
            name = %data.name,
            value = %data.value,
            attributes = %attributes,
            "metric"
        );
        Ok(())
    }
}

/// A metric name and attribute set bound to a destination.
#[derive(Clone)]
pub struct Reporter {
    name: String,
    attributes: BTreeMap<String, String>,
    destination: Arc<dyn Generator>,
}

impl Reporter {
    pub fn new(cfg: &MetricConfig, destination: Arc<dyn Generator>) -> Self {
        Self {
            name: cfg.name.clone(),
            attributes: cfg.attributes.clone(),
            destination,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// # Errors
    ///
    /// Propagates the destination's error.
    pub fn report(&self, ctx: &Context, value: impl Into<Value>) -> Result<()> {
        let data = MetricData::new(self.name.clone(), value).with_attributes(self.attributes.clone());
        self.destination.generate(ctx, data)
    }
}
