//! Stateless object edits.

use super::{Transform, stage_id};
use crate::config::{Config, ObjectConfig};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::registry::Registry;
use crate::value;
use serde::Deserialize;
use serde_json::Value as Json;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Settings {
    id: String,
    object: ObjectConfig,
    value: Json,
}

/// `object_copy`: copy the value at `object.source_key` to
/// `object.target_key`.
///
/// An empty source copies the whole payload into the target; an empty
/// target replaces the payload with the source value. With neither key set
/// the stage is the identity.
#[derive(Debug, Default)]
pub struct ObjectCopy {
    id: String,
    source_key: String,
    target_key: String,
}

impl ObjectCopy {
    /// # Errors
    ///
    /// Returns an error if the settings are malformed.
    pub fn new(_registry: &Registry, cfg: &Config) -> Result<Self> {
        let s: Settings = cfg.decode()?;
        Ok(Self {
            id: stage_id(&s.id, "object_copy"),
            source_key: s.object.source_key,
            target_key: s.object.target_key,
        })
    }

    /// A copy stage with no keys, which returns every message unchanged.
    #[must_use]
    pub fn identity() -> Self {
        Self {
            id: "object_copy".to_string(),
            ..Self::default()
        }
    }

    fn copy(&self, mut msg: Message) -> Result<Vec<Message>> {
        if self.source_key.is_empty() && self.target_key.is_empty() {
            return Ok(vec![msg]);
        }
        if self.source_key.is_empty() {
            let payload = msg.payload().to_vec();
            msg.set_bytes(&self.target_key, &payload)?;
            return Ok(vec![msg]);
        }

        let v = msg.get_value(&self.source_key);
        let Some(json) = v.into_json() else {
            return Ok(vec![msg]);
        };
        if self.target_key.is_empty() {
            if let Some(d) = msg.as_data_mut() {
                d.set_payload(value::json_to_bytes(&json));
            }
        } else {
            msg.set_value(&self.target_key, json)?;
        }
        Ok(vec![msg])
    }
}

impl Transform for ObjectCopy {
    fn transform(&self, _ctx: &Context, msg: Message) -> Result<Vec<Message>> {
        if msg.is_control() {
            return Ok(vec![msg]);
        }
        self.copy(msg).map_err(|e| Error::transform(&self.id, e))
    }
}

/// `object_insert`: write `value` at `object.target_key`.
#[derive(Debug)]
pub struct ObjectInsert {
    id: String,
    target_key: String,
    value: Json,
}

impl ObjectInsert {
    /// # Errors
    ///
    /// Returns an error if `object.target_key` is missing.
    pub fn new(_registry: &Registry, cfg: &Config) -> Result<Self> {
        let s: Settings = cfg.decode()?;
        let id = stage_id(&s.id, "object_insert");
        if s.object.target_key.is_empty() {
            return Err(Error::transform(&id, Error::missing("object.target_key")));
        }
        Ok(Self {
            id,
            target_key: s.object.target_key,
            value: s.value,
        })
    }
}

impl Transform for ObjectInsert {
    fn transform(&self, _ctx: &Context, mut msg: Message) -> Result<Vec<Message>> {
        msg.set_value(&self.target_key, self.value.clone())
            .map_err(|e| Error::transform(&self.id, e))?;
        Ok(vec![msg])
    }
}

/// `object_delete`: remove the value at `object.source_key`.
#[derive(Debug)]
pub struct ObjectDelete {
    id: String,
    source_key: String,
}

impl ObjectDelete {
    /// # Errors
    ///
    /// Returns an error if `object.source_key` is missing.
    pub fn new(_registry: &Registry, cfg: &Config) -> Result<Self> {
        let s: Settings = cfg.decode()?;
        let id = stage_id(&s.id, "object_delete");
        if s.object.source_key.is_empty() {
            return Err(Error::transform(&id, Error::missing("object.source_key")));
        }
        Ok(Self {
            id,
            source_key: s.object.source_key,
        })
    }
}

impl Transform for ObjectDelete {
    fn transform(&self, _ctx: &Context, mut msg: Message) -> Result<Vec<Message>> {
        msg.delete_value(&self.source_key)
            .map_err(|e| Error::transform(&self.id, e))?;
        Ok(vec![msg])
    }
}
