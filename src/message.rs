//! The unit of data flowing through a pipeline.
//!
//! A [`Message`] is either a [`Data`] record (payload plus metadata) or a
//! `Control` signal. Control messages carry nothing; they tell every stage
//! that buffers state to flush it, and every stage must pass them on (or
//! regenerate them) so that stages further downstream flush too.
//!
//! # Value access
//!
//! JSON payloads are read and written by path through [`Data::get_value`],
//! [`Data::set_value`] and [`Data::delete_value`]. A key that starts with
//! `"meta "` addresses the metadata document instead of the payload:
//!
//! ```
//! use conduit::Message;
//!
//! let mut msg = Message::new(r#"{"a":{"b":1}}"#);
//! assert_eq!(msg.get_value("a.b").int(), 1);
//!
//! msg.set_value("meta source", "sensor-7").unwrap();
//! assert_eq!(msg.get_value("meta source").string(), "sensor-7");
//! assert_eq!(msg.payload(), br#"{"a":{"b":1}}"#);
//! ```

use crate::error::{Error, Result};
use crate::value::{self, Value};
use serde_json::{Map, Value as Json};
use std::fmt;

/// Key prefix that routes an accessor call to the metadata document.
pub const META_PREFIX: &str = "meta ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Data(Data),
    Control,
}

/// Payload and metadata of a data message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Data {
    payload: Vec<u8>,
    metadata: Vec<u8>,
}

enum Field {
    Payload,
    Metadata,
}

fn route(key: &str) -> (Field, &str) {
    match key.strip_prefix(META_PREFIX) {
        Some(rest) => (Field::Metadata, rest.trim()),
        None => (Field::Payload, key.trim()),
    }
}

fn read(buf: &[u8], path: &str) -> Value {
    let segs = value::parse_path(path);
    match serde_json::from_slice::<Json>(buf) {
        Ok(root) => value::lookup(&root, &segs),
        Err(_) if segs.is_empty() && !buf.is_empty() => {
            Value::from(Json::String(String::from_utf8_lossy(buf).into_owned()))
        }
        Err(_) => Value::missing(),
    }
}

fn write(buf: &mut Vec<u8>, path: &str, val: Json) -> Result<()> {
    let segs = value::parse_path(path);
    if segs.is_empty() {
        *buf = value::json_to_bytes(&val);
        return Ok(());
    }

    let mut root = if buf.is_empty() {
        Json::Object(Map::new())
    } else {
        serde_json::from_slice::<Json>(buf).map_err(|_| Error::InvalidObject)?
    };
    value::insert(&mut root, &segs, val)?;
    *buf = serde_json::to_vec(&root)?;
    Ok(())
}

fn erase(buf: &mut Vec<u8>, path: &str) -> Result<()> {
    let segs = value::parse_path(path);
    if segs.is_empty() {
        buf.clear();
        return Ok(());
    }
    if buf.is_empty() {
        return Ok(());
    }

    let mut root = serde_json::from_slice::<Json>(buf).map_err(|_| Error::InvalidObject)?;
    value::remove(&mut root, &segs);
    *buf = serde_json::to_vec(&root)?;
    Ok(())
}

impl Data {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            metadata: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: impl Into<Vec<u8>>) -> Self {
        self.metadata = metadata.into();
        self
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[must_use]
    pub fn metadata(&self) -> &[u8] {
        &self.metadata
    }

    pub fn set_payload(&mut self, payload: impl Into<Vec<u8>>) {
        self.payload = payload.into();
    }

    pub fn set_metadata(&mut self, metadata: impl Into<Vec<u8>>) {
        self.metadata = metadata.into();
    }

    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    #[must_use]
    pub fn get_value(&self, key: &str) -> Value {
        match route(key) {
            (Field::Payload, path) => read(&self.payload, path),
            (Field::Metadata, path) => read(&self.metadata, path),
        }
    }

    /// Write a JSON value at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidObject`] if the target document is not JSON.
    pub fn set_value(&mut self, key: &str, val: impl Into<Json>) -> Result<()> {
        match route(key) {
            (Field::Payload, path) => write(&mut self.payload, path, val.into()),
            (Field::Metadata, path) => write(&mut self.metadata, path, val.into()),
        }
    }

    /// Write raw bytes at `key`; see [`value::bytes_to_json`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidObject`] if the target document is not JSON.
    pub fn set_bytes(&mut self, key: &str, bytes: &[u8]) -> Result<()> {
        self.set_value(key, value::bytes_to_json(bytes))
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidObject`] if the target document is not JSON.
    pub fn delete_value(&mut self, key: &str) -> Result<()> {
        match route(key) {
            (Field::Payload, path) => erase(&mut self.payload, path),
            (Field::Metadata, path) => erase(&mut self.metadata, path),
        }
    }
}

impl Message {
    /// A data message with the given payload and empty metadata.
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Message::Data(Data::new(payload))
    }

    #[must_use]
    pub fn control() -> Self {
        Message::Control
    }

    #[must_use]
    pub fn is_control(&self) -> bool {
        matches!(self, Message::Control)
    }

    #[must_use]
    pub fn with_metadata(self, metadata: impl Into<Vec<u8>>) -> Self {
        match self {
            Message::Data(d) => Message::Data(d.with_metadata(metadata)),
            Message::Control => Message::Control,
        }
    }

    #[must_use]
    pub fn as_data(&self) -> Option<&Data> {
        match self {
            Message::Data(d) => Some(d),
            Message::Control => None,
        }
    }

    pub fn as_data_mut(&mut self) -> Option<&mut Data> {
        match self {
            Message::Data(d) => Some(d),
            Message::Control => None,
        }
    }

    /// Payload bytes; empty for control messages.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        self.as_data().map(Data::payload).unwrap_or_default()
    }

    #[must_use]
    pub fn metadata(&self) -> &[u8] {
        self.as_data().map(Data::metadata).unwrap_or_default()
    }

    /// Read a value. Control messages never resolve any path.
    #[must_use]
    pub fn get_value(&self, key: &str) -> Value {
        self.as_data()
            .map(|d| d.get_value(key))
            .unwrap_or_default()
    }

    /// Write a value. A no-op on control messages.
    ///
    /// # Errors
    ///
    /// See [`Data::set_value`].
    pub fn set_value(&mut self, key: &str, val: impl Into<Json>) -> Result<()> {
        match self {
            Message::Data(d) => d.set_value(key, val),
            Message::Control => Ok(()),
        }
    }

    /// # Errors
    ///
    /// See [`Data::set_bytes`].
    pub fn set_bytes(&mut self, key: &str, bytes: &[u8]) -> Result<()> {
        match self {
            Message::Data(d) => d.set_bytes(key, bytes),
            Message::Control => Ok(()),
        }
    }

    /// # Errors
    ///
    /// See [`Data::delete_value`].
    pub fn delete_value(&mut self, key: &str) -> Result<()> {
        match self {
            Message::Data(d) => d.delete_value(key),
            Message::Control => Ok(()),
        }
    }
}

impl From<Data> for Message {
    fn from(d: Data) -> Self {
        Message::Data(d)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Data(d) => write!(f, "{}", String::from_utf8_lossy(&d.payload)),
            Message::Control => write!(f, "<control>"),
        }
    }
}
