//! Stages that combine many messages into one, and the reverse.

use super::{Transform, stage_id};
use crate::aggregate::Aggregate;
use crate::config::{BatchConfig, Config, ObjectConfig};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::message::{Data, Message};
use crate::registry::Registry;
use crate::value;
use serde::Deserialize;
use serde_json::Value as Json;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AggregateSettings {
    id: String,
    object: ObjectConfig,
    batch: BatchConfig,
    separator: Option<String>,
}

/// Shared buffering logic for the `aggregate_to_*` stages.
struct Buffered {
    id: String,
    batch_key: String,
    buffer: Mutex<Aggregate>,
}

impl Buffered {
    fn new(id: String, object: &ObjectConfig, batch: &BatchConfig) -> Result<Self> {
        let buffer = Aggregate::from_config(batch).map_err(|e| Error::transform(&id, e))?;
        Ok(Self {
            id,
            batch_key: object.batch_key.clone(),
            buffer: Mutex::new(buffer),
        })
    }

    /// Buffer `msg`, or on a control message drain everything.
    ///
    /// `emit` builds one output message from a drained partition.
    fn process<F>(&self, msg: Message, emit: F) -> Result<Vec<Message>>
    where
        F: Fn(Vec<Vec<u8>>) -> Result<Message>,
    {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);

        let Message::Data(data) = msg else {
            let drained = buffer.drain_all();
            debug!(id = %self.id, partitions = drained.len(), "Flushing on control message");
            let mut out = drained
                .into_iter()
                .map(|(_, items)| emit(items))
                .collect::<Result<Vec<_>>>()
                .map_err(|e| Error::transform(&self.id, e))?;
            out.push(Message::Control);
            return Ok(out);
        };

        let key = if self.batch_key.is_empty() {
            String::new()
        } else {
            data.get_value(&self.batch_key).string()
        };

        match buffer
            .add_or_drain(&key, data.into_payload())
            .map_err(|e| Error::transform(&self.id, e))?
        {
            Some(items) => Ok(vec![emit(items).map_err(|e| Error::transform(&self.id, e))?]),
            None => Ok(Vec::new()),
        }
    }
}

/// `aggregate_to_array`: buffer payloads and emit them as a JSON array.
///
/// Settings: `object.batch_key` partitions the buffer, `object.target_key`
/// nests the array inside an object, `batch` sets the bounds.
pub struct AggregateToArray {
    target_key: String,
    inner: Buffered,
}

impl AggregateToArray {
    /// # Errors
    ///
    /// Returns an error if the batch bounds are invalid.
    pub fn new(_registry: &Registry, cfg: &Config) -> Result<Self> {
        let s: AggregateSettings = cfg.decode()?;
        let id = stage_id(&s.id, "aggregate_to_array");
        Ok(Self {
            target_key: s.object.target_key.clone(),
            inner: Buffered::new(id, &s.object, &s.batch)?,
        })
    }

    fn emit(&self, items: Vec<Vec<u8>>) -> Result<Message> {
        let arr = Json::Array(items.iter().map(|i| value::infer_json(i)).collect());
        let mut out = Data::default();
        if self.target_key.is_empty() {
            out.set_payload(serde_json::to_vec(&arr)?);
        } else {
            out.set_value(&self.target_key, arr)?;
        }
        Ok(out.into())
    }
}

impl Transform for AggregateToArray {
    fn transform(&self, _ctx: &Context, msg: Message) -> Result<Vec<Message>> {
        self.inner.process(msg, |items| self.emit(items))
    }
}

/// `aggregate_to_string`: buffer payloads and join them with `separator`
/// (a newline by default).
pub struct AggregateToString {
    separator: Vec<u8>,
    inner: Buffered,
}

impl AggregateToString {
    /// # Errors
    ///
    /// Returns an error if the batch bounds are invalid.
    pub fn new(_registry: &Registry, cfg: &Config) -> Result<Self> {
        let s: AggregateSettings = cfg.decode()?;
        let id = stage_id(&s.id, "aggregate_to_string");
        Ok(Self {
            separator: s.separator.unwrap_or_else(|| "\n".to_string()).into_bytes(),
            inner: Buffered::new(id, &s.object, &s.batch)?,
        })
    }
}

impl Transform for AggregateToString {
    fn transform(&self, _ctx: &Context, msg: Message) -> Result<Vec<Message>> {
        self.inner
            .process(msg, |items| Ok(Message::new(items.join(self.separator.as_slice()))))
    }
}

/// `aggregate_from_array`: split an array into one message per element.
///
/// Without `object.source_key` the payload itself is the array. With it,
/// the array is removed from the message and every output is a copy of the
/// remaining object, with object elements merged in and other elements
/// written back under the source key. `object.target_key` overrides where
/// each element is written.
pub struct AggregateFromArray {
    id: String,
    source_key: String,
    target_key: String,
}

impl AggregateFromArray {
    /// # Errors
    ///
    /// Returns an error if the settings are malformed.
    pub fn new(_registry: &Registry, cfg: &Config) -> Result<Self> {
        let s: AggregateSettings = cfg.decode()?;
        Ok(Self {
            id: stage_id(&s.id, "aggregate_from_array"),
            source_key: s.object.source_key,
            target_key: s.object.target_key,
        })
    }

    fn split(&self, mut data: Data) -> Result<Vec<Message>> {
        if self.source_key.is_empty() {
            let elements = data.get_value("").array();
            let mut out = Vec::with_capacity(elements.len());
            for el in elements {
                let mut m = Data::default().with_metadata(data.metadata().to_vec());
                match el.into_json() {
                    Some(json) if !self.target_key.is_empty() => m.set_value(&self.target_key, json)?,
                    Some(json) => m.set_payload(value::json_to_bytes(&json)),
                    None => {}
                }
                out.push(m.into());
            }
            return Ok(out);
        }

        let elements = data.get_value(&self.source_key).array();
        data.delete_value(&self.source_key)?;

        let mut out = Vec::with_capacity(elements.len());
        for el in elements {
            let Some(json) = el.into_json() else { continue };
            let mut m = data.clone();
            match json {
                json if !self.target_key.is_empty() => m.set_value(&self.target_key, json)?,
                Json::Object(fields) => {
                    for (k, v) in fields {
                        m.set_value(&k.replace('.', "\\."), v)?;
                    }
                }
                other => m.set_value(&self.source_key, other)?,
            }
            out.push(m.into());
        }
        Ok(out)
    }
}

impl Transform for AggregateFromArray {
    fn transform(&self, _ctx: &Context, msg: Message) -> Result<Vec<Message>> {
        match msg {
            Message::Control => Ok(vec![Message::Control]),
            Message::Data(data) => self.split(data).map_err(|e| Error::transform(&self.id, e)),
        }
    }
}
