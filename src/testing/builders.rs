//! Builders for batches of test messages.

use crate::message::Message;

/// A fluent builder for message batches.
///
/// # Example
///
/// ```
/// use conduit::testing::MessageBuilder;
///
/// let batch = MessageBuilder::new()
///     .json(r#"{"a":1}"#)
///     .repeat("x", 3)
///     .control()
///     .build();
///
/// assert_eq!(batch.len(), 5);
/// assert!(batch[4].is_control());
/// ```
#[derive(Debug, Default)]
pub struct MessageBuilder {
    msgs: Vec<Message>,
}

impl MessageBuilder {
    #[must_use]
    pub const fn new() -> Self {
        Self { msgs: Vec::new() }
    }

    /// Add a data message with the given JSON (or any text) payload.
    #[must_use]
    pub fn json(mut self, payload: &str) -> Self {
        self.msgs.push(Message::new(payload));
        self
    }

    /// Add a data message with raw bytes.
    #[must_use]
    pub fn bytes(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.msgs.push(Message::new(payload));
        self
    }

    /// Add a data message with payload and metadata.
    #[must_use]
    pub fn with_metadata(mut self, payload: &str, metadata: &str) -> Self {
        self.msgs.push(Message::new(payload).with_metadata(metadata));
        self
    }

    #[must_use]
    pub fn repeat(mut self, payload: &str, count: usize) -> Self {
        for _ in 0..count {
            self.msgs.push(Message::new(payload));
        }
        self
    }

    /// Add `count` objects `{"<key>": i}` for `i` in `0..count`.
    #[must_use]
    pub fn numbered(mut self, key: &str, count: usize) -> Self {
        for i in 0..count {
            self.msgs
                .push(Message::new(serde_json::json!({ key: i }).to_string()));
        }
        self
    }

    #[must_use]
    pub fn control(mut self) -> Self {
        self.msgs.push(Message::control());
        self
    }

    #[must_use]
    pub fn build(self) -> Vec<Message> {
        self.msgs
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.msgs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.msgs.is_empty()
    }
}

/// Data messages for each payload, followed by one control message.
#[must_use]
pub fn batch_with_control(payloads: &[&str]) -> Vec<Message> {
    let mut out: Vec<Message> = payloads.iter().map(|p| Message::new(*p)).collect();
    out.push(Message::control());
    out
}
