//! Stages for tests.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::registry::Registry;
use crate::transform::Transform;
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Passes every message through and keeps a copy.
///
/// Clones share the same record, so a clone registered in a [`Registry`]
/// can be inspected by the test that registered it.
#[derive(Clone, Default)]
pub struct RecordingTransform {
    seen: Arc<Mutex<Vec<Message>>>,
    calls: Arc<AtomicUsize>,
}

impl RecordingTransform {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message seen so far, including control messages.
    #[must_use]
    pub fn seen(&self) -> Vec<Message> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of data messages seen.
    #[must_use]
    pub fn data_count(&self) -> usize {
        self.seen().iter().filter(|m| !m.is_control()).count()
    }

    /// Number of `transform` calls.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transform for RecordingTransform {
    fn transform(&self, _ctx: &Context, msg: Message) -> Result<Vec<Message>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(msg.clone());
        Ok(vec![msg])
    }
}

/// Fails the first `failures` data messages with `message`, then passes
/// messages through. Control messages always pass.
#[derive(Clone)]
pub struct FlakyTransform {
    failures: usize,
    message: String,
    attempts: Arc<AtomicUsize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FlakySettings {
    failures: usize,
    message: String,
}

impl FlakyTransform {
    pub fn new(failures: usize, message: impl Into<String>) -> Self {
        Self {
            failures,
            message: message.into(),
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Data messages seen so far, failed or not.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Transform for FlakyTransform {
    fn transform(&self, _ctx: &Context, msg: Message) -> Result<Vec<Message>> {
        if msg.is_control() {
            return Ok(vec![msg]);
        }
        let n = self.attempts.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(Error::Other(anyhow::anyhow!("{}", self.message)));
        }
        Ok(vec![msg])
    }
}

/// Register `recorder` under `test_record` and a `test_flaky` factory
/// whose settings are `{failures, message}`.
///
/// Every `test_record` stage built from the registry shares `recorder`.
pub fn register_fixtures(registry: &mut Registry, recorder: &RecordingTransform) {
    let recorder = recorder.clone();
    registry
        .register_transform("test_record", move |_, _| Ok(recorder.clone()))
        .register_transform("test_flaky", |_, cfg| {
            let s: FlakySettings = cfg.decode()?;
            Ok(FlakyTransform::new(s.failures, s.message))
        });
}
