use super::{Transform, apply, stage_id};
use crate::config::{Config, ObjectConfig};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::message::{Data, Message};
use crate::registry::Registry;
use crate::value;
use serde::Deserialize;
use serde_json::Value as Json;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Settings {
    id: String,
    object: ObjectConfig,
    transforms: Vec<Config>,
}

/// `meta_for_each`: run a sub-pipeline over every element of an array.
///
/// Each element at `object.source_key` becomes the payload of its own
/// scratch message. The payloads of all results, in element order, are
/// collected into an array written to `object.target_key`. A missing or
/// non-array source value passes the message through.
pub struct MetaForEach {
    id: String,
    source_key: String,
    target_key: String,
    transforms: Vec<Arc<dyn Transform>>,
}

impl MetaForEach {
    /// # Errors
    ///
    /// Returns an error if a key is missing or a sub-transform cannot be
    /// built.
    pub fn new(registry: &Registry, cfg: &Config) -> Result<Self> {
        let s: Settings = cfg.decode()?;
        let id = stage_id(&s.id, "meta_for_each");
        if s.object.source_key.is_empty() {
            return Err(Error::transform(&id, Error::missing("object.source_key")));
        }
        if s.object.target_key.is_empty() {
            return Err(Error::transform(&id, Error::missing("object.target_key")));
        }
        let transforms = registry
            .new_transforms(&s.transforms)
            .map_err(|e| Error::transform(&id, e))?;
        Ok(Self {
            id,
            source_key: s.object.source_key,
            target_key: s.object.target_key,
            transforms,
        })
    }

    fn run(&self, ctx: &Context, msg: Message) -> Result<Vec<Message>> {
        let Message::Data(mut data) = msg else {
            return apply(ctx, &self.transforms, vec![Message::Control]);
        };

        let v = data.get_value(&self.source_key);
        if !v.is_array() {
            return Ok(vec![data.into()]);
        }

        let mut collected = Vec::new();
        for el in v.array() {
            let Some(json) = el.into_json() else { continue };
            let scratch = Data::new(value::json_to_bytes(&json));
            for res in apply(ctx, &self.transforms, vec![scratch.into()])? {
                if let Message::Data(res) = res {
                    collected.push(value::infer_json(res.payload()));
                }
            }
        }

        data.set_value(&self.target_key, Json::Array(collected))?;
        Ok(vec![data.into()])
    }
}

impl Transform for MetaForEach {
    fn transform(&self, ctx: &Context, msg: Message) -> Result<Vec<Message>> {
        self.run(ctx, msg).map_err(|e| Error::transform(&self.id, e))
    }

    fn close(&self, ctx: &Context) -> Result<()> {
        super::close_all(ctx, &self.transforms)
    }
}
