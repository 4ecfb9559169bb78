//! Small stages for flow control, testing and measurement.

use super::{Transform, stage_id};
use crate::aggregate::Aggregate;
use crate::config::{BatchConfig, Config, MetricConfig, parse_duration};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::metrics::Reporter;
use crate::registry::Registry;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::trace;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Settings {
    id: String,
    batch: BatchConfig,
    metric: MetricConfig,
    message: String,
    duration: String,
}

/// `utility_control`: insert a control message whenever a batch boundary
/// is reached.
///
/// Data messages are counted against the `batch` bounds. When a message
/// does not fit, the stage emits a control message followed by that
/// message, which starts the next batch.
pub struct UtilityControl {
    id: String,
    buffer: Mutex<Aggregate>,
}

impl UtilityControl {
    /// # Errors
    ///
    /// Returns an error if the batch bounds are invalid.
    pub fn new(_registry: &Registry, cfg: &Config) -> Result<Self> {
        let s: Settings = cfg.decode()?;
        let id = stage_id(&s.id, "utility_control");
        let buffer = Aggregate::from_config(&s.batch).map_err(|e| Error::transform(&id, e))?;
        Ok(Self {
            id,
            buffer: Mutex::new(buffer),
        })
    }
}

impl Transform for UtilityControl {
    fn transform(&self, _ctx: &Context, msg: Message) -> Result<Vec<Message>> {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        if msg.is_control() {
            buffer.reset_all();
            return Ok(vec![msg]);
        }

        let boundary = buffer
            .add_or_drain("", msg.payload().to_vec())
            .map_err(|e| Error::transform(&self.id, e))?;
        match boundary {
            Some(prev) => {
                trace!(id = %self.id, items = prev.len(), "Batch boundary reached");
                Ok(vec![Message::Control, msg])
            }
            None => Ok(vec![msg]),
        }
    }
}

/// `utility_drop`: discard every data message.
#[derive(Debug, Default)]
pub struct UtilityDrop;

impl UtilityDrop {
    /// # Errors
    ///
    /// Never fails; the signature matches the other factories.
    pub fn new(_registry: &Registry, _cfg: &Config) -> Result<Self> {
        Ok(Self)
    }
}

impl Transform for UtilityDrop {
    fn transform(&self, _ctx: &Context, msg: Message) -> Result<Vec<Message>> {
        if msg.is_control() {
            return Ok(vec![msg]);
        }
        Ok(Vec::new())
    }
}

/// `utility_err`: fail every data message with `message`.
#[derive(Debug)]
pub struct UtilityErr {
    id: String,
    message: String,
}

impl UtilityErr {
    /// # Errors
    ///
    /// Returns an error if the settings are malformed.
    pub fn new(_registry: &Registry, cfg: &Config) -> Result<Self> {
        let s: Settings = cfg.decode()?;
        Ok(Self {
            id: stage_id(&s.id, "utility_err"),
            message: if s.message.is_empty() {
                "error".to_string()
            } else {
                s.message
            },
        })
    }
}

impl Transform for UtilityErr {
    fn transform(&self, _ctx: &Context, msg: Message) -> Result<Vec<Message>> {
        if msg.is_control() {
            return Ok(vec![msg]);
        }
        Err(Error::transform(
            &self.id,
            Error::Other(anyhow::anyhow!("{}", self.message)),
        ))
    }
}

/// `utility_delay`: sleep for `duration` before passing each data message on.
#[derive(Debug)]
pub struct UtilityDelay {
    id: String,
    delay: Duration,
}

impl UtilityDelay {
    /// # Errors
    ///
    /// Returns an error if `duration` is missing or malformed.
    pub fn new(_registry: &Registry, cfg: &Config) -> Result<Self> {
        let s: Settings = cfg.decode()?;
        let id = stage_id(&s.id, "utility_delay");
        if s.duration.is_empty() {
            return Err(Error::transform(&id, Error::missing("duration")));
        }
        let delay = parse_duration(&s.duration).map_err(|e| Error::transform(&id, e))?;
        Ok(Self { id, delay })
    }
}

impl Transform for UtilityDelay {
    fn transform(&self, ctx: &Context, msg: Message) -> Result<Vec<Message>> {
        if !msg.is_control() {
            ctx.sleep(self.delay)
                .map_err(|e| Error::transform(&self.id, e))?;
        }
        Ok(vec![msg])
    }
}

/// Counter shared by the metric stages: accumulate on data, report and
/// reset on control.
struct Counter {
    id: String,
    reporter: Reporter,
    value: AtomicU64,
}

impl Counter {
    fn new(registry: &Registry, cfg: &Config, type_name: &str) -> Result<Self> {
        let s: Settings = cfg.decode()?;
        let id = stage_id(&s.id, type_name);
        if s.metric.name.is_empty() {
            return Err(Error::transform(&id, Error::missing("metric.name")));
        }
        let destination = registry
            .generator(&s.metric.destination)
            .map_err(|e| Error::transform(&id, e))?;
        Ok(Self {
            id,
            reporter: Reporter::new(&s.metric, destination),
            value: AtomicU64::new(0),
        })
    }

    fn observe(&self, ctx: &Context, msg: Message, amount: impl Fn(&Message) -> u64) -> Result<Vec<Message>> {
        if msg.is_control() {
            let total = self.value.swap(0, Ordering::Relaxed);
            self.reporter
                .report(ctx, total)
                .map_err(|e| Error::transform(&self.id, e))?;
        } else {
            self.value.fetch_add(amount(&msg), Ordering::Relaxed);
        }
        Ok(vec![msg])
    }
}

/// `utility_metric_count`: report the number of data messages seen since
/// the previous control message.
pub struct UtilityMetricCount(Counter);

impl UtilityMetricCount {
    /// # Errors
    ///
    /// Returns an error if `metric.name` is missing or the destination is
    /// unknown.
    pub fn new(registry: &Registry, cfg: &Config) -> Result<Self> {
        Counter::new(registry, cfg, "utility_metric_count").map(Self)
    }
}

impl Transform for UtilityMetricCount {
    fn transform(&self, ctx: &Context, msg: Message) -> Result<Vec<Message>> {
        self.0.observe(ctx, msg, |_| 1)
    }
}

/// `utility_metric_bytes`: report payload bytes seen since the previous
/// control message.
pub struct UtilityMetricBytes(Counter);

impl UtilityMetricBytes {
    /// # Errors
    ///
    /// Returns an error if `metric.name` is missing or the destination is
    /// unknown.
    pub fn new(registry: &Registry, cfg: &Config) -> Result<Self> {
        Counter::new(registry, cfg, "utility_metric_bytes").map(Self)
    }
}

impl Transform for UtilityMetricBytes {
    fn transform(&self, ctx: &Context, msg: Message) -> Result<Vec<Message>> {
        self.0
            .observe(ctx, msg, |m| u64::try_from(m.payload().len()).unwrap_or(u64::MAX))
    }
}
