use super::{Transform, stage_id};
use crate::aggregate::Aggregate;
use crate::config::{BatchConfig, Config, ObjectConfig};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::registry::Registry;
use serde::Deserialize;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// Placeholder in `file_path` replaced by the partition key.
pub const KEY_PLACEHOLDER: &str = "{key}";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Settings {
    id: String,
    file_path: String,
    object: ObjectConfig,
    batch: BatchConfig,
}

/// `send_file`: batch payloads and append them to a file, one per line.
///
/// `object.batch_key` partitions the buffer; each partition is written to
/// `file_path` with `{key}` replaced by the partition key. A key that
/// would leave the configured directory is rejected before buffering.
/// A batch is written when it is full, on every control message, and on
/// `close`. Items leave the buffer only once they are written. Messages
/// pass through unchanged.
pub struct SendFile {
    id: String,
    file_path: String,
    batch_key: String,
    buffer: Mutex<Aggregate>,
}

impl SendFile {
    /// # Errors
    ///
    /// Returns an error if `file_path` is missing or the batch bounds are
    /// invalid.
    pub fn new(_registry: &Registry, cfg: &Config) -> Result<Self> {
        let s: Settings = cfg.decode()?;
        let id = stage_id(&s.id, "send_file");
        if s.file_path.is_empty() {
            return Err(Error::transform(&id, Error::missing("file_path")));
        }
        let buffer = Aggregate::from_config(&s.batch).map_err(|e| Error::transform(&id, e))?;
        Ok(Self {
            id,
            file_path: s.file_path,
            batch_key: s.object.batch_key,
            buffer: Mutex::new(buffer),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        PathBuf::from(self.file_path.replace(KEY_PLACEHOLDER, key))
    }

    /// Reject partition keys that cannot be used as a single file name.
    fn check_key(&self, key: &str) -> Result<()> {
        if !self.file_path.contains(KEY_PLACEHOLDER) {
            return Ok(());
        }
        let unsafe_key = key == "."
            || key == ".."
            || key.contains(['/', '\\', '\0']);
        if unsafe_key {
            return Err(Error::InvalidPath {
                path: key.to_string(),
                reason: "partition key is not a plain file name".into(),
            });
        }
        Ok(())
    }

    fn write(&self, ctx: &Context, key: &str, items: &[Vec<u8>]) -> Result<()> {
        ctx.check()?;
        let path = self.path_for(key);
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut w = BufWriter::new(file);
        for item in items {
            w.write_all(item)?;
            w.write_all(b"\n")?;
        }
        w.flush()?;
        debug!(id = %self.id, path = %path.display(), items = items.len(), "Wrote batch");
        Ok(())
    }

    fn flush_all(&self, ctx: &Context) -> Result<()> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush_all(|key, items| self.write(ctx, key, items))
    }

    fn send(&self, ctx: &Context, msg: Message) -> Result<Vec<Message>> {
        let Some(data) = msg.as_data() else {
            self.flush_all(ctx)?;
            return Ok(vec![msg]);
        };

        let key = if self.batch_key.is_empty() {
            String::new()
        } else {
            data.get_value(&self.batch_key).string()
        };

        self.check_key(&key)?;

        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add_or_flush(&key, data.payload().to_vec(), |items| {
                self.write(ctx, &key, items)
            })?;
        Ok(vec![msg])
    }
}

impl Transform for SendFile {
    fn transform(&self, ctx: &Context, msg: Message) -> Result<Vec<Message>> {
        self.send(ctx, msg).map_err(|e| Error::transform(&self.id, e))
    }

    fn close(&self, ctx: &Context) -> Result<()> {
        self.flush_all(&ctx.without_cancel())
            .map_err(|e| Error::transform(&self.id, e))
    }
}
