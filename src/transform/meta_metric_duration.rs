use super::{Transform, apply, stage_id};
use crate::config::{Config, MetricConfig};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::metrics::Reporter;
use crate::registry::Registry;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Settings {
    id: String,
    metric: MetricConfig,
    transforms: Vec<Config>,
}

/// `meta_metric_duration`: time a sub-pipeline.
///
/// Nanoseconds spent in the sub-pipeline accumulate across data messages.
/// Each control message reports the total to `metric.destination` and
/// starts a new window before the sub-pipeline sees the control message.
pub struct MetaMetricDuration {
    id: String,
    reporter: Reporter,
    transforms: Vec<Arc<dyn Transform>>,
    nanos: AtomicU64,
}

impl MetaMetricDuration {
    /// # Errors
    ///
    /// Returns an error if `metric.name` is missing, the destination is
    /// unknown, or a sub-transform cannot be built.
    pub fn new(registry: &Registry, cfg: &Config) -> Result<Self> {
        let s: Settings = cfg.decode()?;
        let id = stage_id(&s.id, "meta_metric_duration");
        let build = || -> Result<Self> {
            if s.metric.name.is_empty() {
                return Err(Error::missing("metric.name"));
            }
            Ok(Self {
                id: id.clone(),
                reporter: Reporter::new(&s.metric, registry.generator(&s.metric.destination)?),
                transforms: registry.new_transforms(&s.transforms)?,
                nanos: AtomicU64::new(0),
            })
        };
        build().map_err(|e| Error::transform(&id, e))
    }

    fn run(&self, ctx: &Context, msg: Message) -> Result<Vec<Message>> {
        if msg.is_control() {
            let total = self.nanos.swap(0, Ordering::Relaxed);
            self.reporter.report(ctx, total)?;
            return apply(ctx, &self.transforms, vec![msg]);
        }

        let start = Instant::now();
        let res = apply(ctx, &self.transforms, vec![msg]);
        let elapsed = u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.nanos.fetch_add(elapsed, Ordering::Relaxed);
        res
    }
}

impl Transform for MetaMetricDuration {
    fn transform(&self, ctx: &Context, msg: Message) -> Result<Vec<Message>> {
        self.run(ctx, msg).map_err(|e| Error::transform(&self.id, e))
    }

    fn close(&self, ctx: &Context) -> Result<()> {
        super::close_all(ctx, &self.transforms)
    }
}
