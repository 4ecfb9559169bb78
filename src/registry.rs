//! String-keyed factories for every configurable component.
//!
//! A [`Registry`] maps a `type` name to a constructor for four kinds of
//! component: transforms, inspectors, lock stores and metric destinations.
//! [`Registry::default`] comes populated with everything this crate ships;
//! applications add their own stages with [`Registry::register_transform`]
//! and friends before building a pipeline.
//!
//! ```
//! use conduit::{Config, Context, Message, Registry, Result, Transform};
//!
//! struct Upper;
//!
//! impl Transform for Upper {
//!     fn transform(&self, _ctx: &Context, msg: Message) -> Result<Vec<Message>> {
//!         let payload = String::from_utf8_lossy(msg.payload()).to_uppercase();
//!         Ok(vec![if msg.is_control() { msg } else { Message::new(payload) }])
//!     }
//! }
//!
//! let mut registry = Registry::default();
//! registry.register_transform("upper", |_, _| Ok(Upper));
//!
//! let tf = registry.new_transform(&Config::new("upper", serde_json::Value::Null)).unwrap();
//! let out = tf.transform(&Context::background(), Message::new("abc")).unwrap();
//! assert_eq!(out[0].payload(), b"ABC");
//! ```
//!
//! Lock stores are shared: two stages whose `kv_store` configs are
//! identical receive the same store instance, so they contend on the same
//! keys.

use crate::condition::{
    Condition, ConditionConfig, FormatJson, Inspector, MetaNegate, NumberCompare,
    NumberInspector, StringCompare, StringInspector, StringMatch,
};
use crate::config::Config;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::kv::{Locker, MemoryLocker};
use crate::message::Message;
use crate::metrics::{Generator, MetricsCollector, TracingGenerator};
use crate::transform::{
    self, AggregateFromArray, AggregateToArray, AggregateToString, MetaErr, MetaForEach,
    MetaKvStoreLock, MetaMetricDuration, MetaPipeline, MetaRetry, MetaSwitch, ObjectCopy,
    ObjectDelete, ObjectInsert, SendFile, Transform, UtilityControl, UtilityDelay, UtilityDrop,
    UtilityErr, UtilityMetricBytes, UtilityMetricCount,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

type TransformFactory = Arc<dyn Fn(&Registry, &Config) -> Result<Arc<dyn Transform>> + Send + Sync>;
type InspectorFactory = Arc<dyn Fn(&Registry, &Config) -> Result<Arc<dyn Inspector>> + Send + Sync>;
type LockerFactory = Arc<dyn Fn(&Config) -> Result<Arc<dyn Locker>> + Send + Sync>;
type GeneratorFactory = Arc<dyn Fn(&Registry, &Config) -> Result<Arc<dyn Generator>> + Send + Sync>;

pub struct Registry {
    transforms: HashMap<String, TransformFactory>,
    inspectors: HashMap<String, InspectorFactory>,
    lockers: HashMap<String, LockerFactory>,
    generators: HashMap<String, GeneratorFactory>,
    locker_cache: Mutex<HashMap<String, Arc<dyn Locker>>>,
    metrics: MetricsCollector,
}

impl Registry {
    /// A registry with no factories at all.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            transforms: HashMap::new(),
            inspectors: HashMap::new(),
            lockers: HashMap::new(),
            generators: HashMap::new(),
            locker_cache: Mutex::new(HashMap::new()),
            metrics: MetricsCollector::new(),
        }
    }

    /// Replace the collector that backs the `memory` metric destination.
    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    /// The collector that backs the `memory` metric destination.
    #[must_use]
    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn register_transform<F, T>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Registry, &Config) -> Result<T> + Send + Sync + 'static,
        T: Transform + 'static,
    {
        self.transforms.insert(
            name.into(),
            Arc::new(move |r: &Registry, c: &Config| -> Result<Arc<dyn Transform>> {
                Ok(Arc::new(factory(r, c)?))
            }),
        );
        self
    }

    pub fn register_inspector<F, I>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Registry, &Config) -> Result<I> + Send + Sync + 'static,
        I: Inspector + 'static,
    {
        self.inspectors.insert(
            name.into(),
            Arc::new(move |r: &Registry, c: &Config| -> Result<Arc<dyn Inspector>> {
                Ok(Arc::new(factory(r, c)?))
            }),
        );
        self
    }

    pub fn register_locker<F, L>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Config) -> Result<L> + Send + Sync + 'static,
        L: Locker + 'static,
    {
        self.lockers.insert(
            name.into(),
            Arc::new(move |c: &Config| -> Result<Arc<dyn Locker>> { Ok(Arc::new(factory(c)?)) }),
        );
        self
    }

    pub fn register_generator<F, G>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Registry, &Config) -> Result<G> + Send + Sync + 'static,
        G: Generator + 'static,
    {
        self.generators.insert(
            name.into(),
            Arc::new(move |r: &Registry, c: &Config| -> Result<Arc<dyn Generator>> {
                Ok(Arc::new(factory(r, c)?))
            }),
        );
        self
    }

    /// Whether a transform type is registered.
    #[must_use]
    pub fn has_transform(&self, name: &str) -> bool {
        self.transforms.contains_key(name)
    }

    /// # Errors
    ///
    /// Returns [`Error::UnknownType`] for an unregistered type, otherwise
    /// whatever the factory returns.
    pub fn new_transform(&self, cfg: &Config) -> Result<Arc<dyn Transform>> {
        let factory = self
            .transforms
            .get(&cfg.type_name)
            .ok_or_else(|| Error::UnknownType {
                kind: "transform",
                name: cfg.type_name.clone(),
            })?;
        factory(self, cfg)
    }

    /// Build a list of transforms, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// See [`Registry::new_transform`].
    pub fn new_transforms(&self, cfgs: &[Config]) -> Result<Vec<Arc<dyn Transform>>> {
        cfgs.iter().map(|c| self.new_transform(c)).collect()
    }

    /// # Errors
    ///
    /// Returns [`Error::UnknownType`] for an unregistered type.
    pub fn new_inspector(&self, cfg: &Config) -> Result<Arc<dyn Inspector>> {
        let factory = self
            .inspectors
            .get(&cfg.type_name)
            .ok_or_else(|| Error::UnknownType {
                kind: "inspector",
                name: cfg.type_name.clone(),
            })?;
        factory(self, cfg)
    }

    /// # Errors
    ///
    /// See [`Condition::new`].
    pub fn new_condition(&self, cfg: &ConditionConfig) -> Result<Condition> {
        Condition::new(self, cfg)
    }

    /// The lock store for `cfg`, shared with every other caller passing an
    /// identical config. `setup` runs once, when the store is first built.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownType`] for an unregistered type, or the
    /// store's setup error.
    pub fn locker(&self, ctx: &Context, cfg: &Config) -> Result<Arc<dyn Locker>> {
        let sig = cfg.signature();
        let mut cache = self
            .locker_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = cache.get(&sig) {
            return Ok(Arc::clone(existing));
        }

        let factory = self
            .lockers
            .get(&cfg.type_name)
            .ok_or_else(|| Error::UnknownType {
                kind: "kv_store",
                name: cfg.type_name.clone(),
            })?;
        let locker = factory(cfg)?;
        locker.setup(ctx)?;
        debug!(store = %cfg.type_name, "Lock store ready");
        cache.insert(sig, Arc::clone(&locker));
        Ok(locker)
    }

    /// The metric destination for `cfg`. An empty type selects `tracing`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownType`] for an unregistered type.
    pub fn generator(&self, cfg: &Config) -> Result<Arc<dyn Generator>> {
        let name = if cfg.type_name.is_empty() {
            "tracing"
        } else {
            cfg.type_name.as_str()
        };
        let factory = self
            .generators
            .get(name)
            .ok_or_else(|| Error::UnknownType {
                kind: "metric destination",
                name: name.to_string(),
            })?;
        factory(self, cfg)
    }

    fn register_builtins(&mut self) {
        self.register_transform("aggregate_to_array", AggregateToArray::new)
            .register_transform("aggregate_to_string", AggregateToString::new)
            .register_transform("aggregate_from_array", AggregateFromArray::new)
            .register_transform("meta_err", MetaErr::new)
            .register_transform("meta_for_each", MetaForEach::new)
            .register_transform("meta_kv_store_lock", MetaKvStoreLock::new)
            .register_transform("meta_metric_duration", MetaMetricDuration::new)
            .register_transform("meta_pipeline", MetaPipeline::new)
            .register_transform("meta_retry", MetaRetry::new)
            .register_transform("meta_switch", MetaSwitch::new)
            .register_transform("object_copy", ObjectCopy::new)
            .register_transform("object_insert", ObjectInsert::new)
            .register_transform("object_delete", ObjectDelete::new)
            .register_transform("send_file", SendFile::new)
            .register_transform("utility_control", UtilityControl::new)
            .register_transform("utility_delay", UtilityDelay::new)
            .register_transform("utility_drop", UtilityDrop::new)
            .register_transform("utility_err", UtilityErr::new)
            .register_transform("utility_metric_bytes", UtilityMetricBytes::new)
            .register_transform("utility_metric_count", UtilityMetricCount::new);

        let strings = [
            ("string_equal_to", StringCompare::EqualTo),
            ("string_contains", StringCompare::Contains),
            ("string_starts_with", StringCompare::StartsWith),
            ("string_ends_with", StringCompare::EndsWith),
        ];
        for (name, cmp) in strings {
            self.register_inspector(name, move |_, c| StringInspector::from_config(c, cmp));
        }
        let numbers = [
            ("number_equal_to", NumberCompare::EqualTo),
            ("number_greater_than", NumberCompare::GreaterThan),
            ("number_less_than", NumberCompare::LessThan),
        ];
        for (name, cmp) in numbers {
            self.register_inspector(name, move |_, c| NumberInspector::from_config(c, cmp));
        }
        self.register_inspector("string_match", |_, c| StringMatch::from_config(c))
            .register_inspector("format_json", |_, c| FormatJson::from_config(c))
            .register_inspector("meta_negate", MetaNegate::from_config);

        self.register_locker("memory", |_| Ok(MemoryLocker::new()));

        self.register_generator("memory", |r, _| Ok(r.metrics().clone()))
            .register_generator("tracing", |_, _| Ok(TracingGenerator));

        debug!(transforms = self.transforms.len(), "Registered built-in components");
    }
}

impl Default for Registry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register_builtins();
        registry
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.transforms.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("Registry").field("transforms", &names).finish_non_exhaustive()
    }
}

/// Build and apply a transform list in one call, mostly useful in tests.
///
/// # Errors
///
/// Returns construction or execution errors.
pub fn run(
    registry: &Registry,
    ctx: &Context,
    cfgs: &[Config],
    msgs: Vec<Message>,
) -> Result<Vec<Message>> {
    let tfs = registry.new_transforms(cfgs)?;
    transform::apply(ctx, &tfs, msgs)
}
