use super::{Transform, apply, stage_id};
use crate::config::{Config, ObjectConfig};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::message::{Data, Message};
use crate::registry::Registry;
use crate::value;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Settings {
    id: String,
    object: ObjectConfig,
    transforms: Vec<Config>,
}

/// `meta_pipeline`: run a sub-pipeline over the message or one of its values.
///
/// With `object.source_key` set, the value at that key becomes the payload
/// of a scratch message that runs through the sub-pipeline; each result is
/// written to `object.target_key` of a copy of the original message. A
/// missing source value passes the message through untouched. Array values
/// are rejected, use `meta_for_each` for those.
pub struct MetaPipeline {
    id: String,
    source_key: String,
    target_key: String,
    transforms: Vec<Arc<dyn Transform>>,
}

impl MetaPipeline {
    /// # Errors
    ///
    /// Returns an error if a sub-transform cannot be built, or if only one of
    /// `source_key` and `target_key` is set.
    pub fn new(registry: &Registry, cfg: &Config) -> Result<Self> {
        let s: Settings = cfg.decode()?;
        let id = stage_id(&s.id, "meta_pipeline");
        if s.object.source_key.is_empty() != s.object.target_key.is_empty() {
            return Err(Error::transform(
                &id,
                Error::invalid("object", "source_key and target_key must be set together"),
            ));
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
        let Message::Data(data) = msg else {
            return apply(ctx, &self.transforms, vec![Message::Control]);
        };
        if self.source_key.is_empty() {
            return apply(ctx, &self.transforms, vec![data.into()]);
        }

        let v = data.get_value(&self.source_key);
        let Some(json) = v.json() else {
            return Ok(vec![data.into()]);
        };
        if v.is_array() {
            return Err(Error::ArrayInput(self.source_key.clone()));
        }

        let scratch = Data::new(value::json_to_bytes(json)).with_metadata(data.metadata().to_vec());
        let results = apply(ctx, &self.transforms, vec![scratch.into()])?;

        let mut out = Vec::with_capacity(results.len());
        for res in results {
            let Message::Data(res) = res else {
                out.push(Message::Control);
                continue;
            };
            let mut m = data.clone();
            m.set_bytes(&self.target_key, res.payload())?;
            out.push(m.into());
        }
        Ok(out)
    }
}

impl Transform for MetaPipeline {
    fn transform(&self, ctx: &Context, msg: Message) -> Result<Vec<Message>> {
        self.run(ctx, msg).map_err(|e| Error::transform(&self.id, e))
    }

    fn close(&self, ctx: &Context) -> Result<()> {
        super::close_all(ctx, &self.transforms)
    }
}
