//! Assertion functions for testing pipeline outputs.

use crate::message::Message;
use serde_json::Value;

fn describe(msgs: &[Message]) -> Vec<String> {
    msgs.iter().map(ToString::to_string).collect()
}

/// Assert that the data messages in `actual` carry exactly `expected`
/// payloads, in order. Control messages are ignored.
///
/// # Panics
///
/// Panics if the payloads differ in length or content.
///
/// # Example
///
/// ```
/// use conduit::Message;
/// use conduit::testing::assert_payloads;
///
/// let out = vec![Message::new("a"), Message::control(), Message::new("b")];
/// assert_payloads(&out, &["a", "b"]);
/// ```
pub fn assert_payloads(actual: &[Message], expected: &[&str]) {
    let data: Vec<&Message> = actual.iter().filter(|m| !m.is_control()).collect();
    assert_eq!(
        data.len(),
        expected.len(),
        "Payload count mismatch:\n  Expected: {expected:?}\n  Actual: {:?}",
        describe(actual)
    );

    for (i, (m, e)) in data.iter().zip(expected).enumerate() {
        let got = String::from_utf8_lossy(m.payload());
        assert_eq!(
            got, *e,
            "Payload mismatch at index {i}:\n  Expected: {e}\n  Actual: {got}\n  Full actual: {:?}",
            describe(actual)
        );
    }
}

/// Like [`assert_payloads`] but compares parsed JSON, so key order and
/// whitespace do not matter.
///
/// # Panics
///
/// Panics if a payload is not JSON or the documents differ.
pub fn assert_json_payloads(actual: &[Message], expected: &[Value]) {
    let data: Vec<&Message> = actual.iter().filter(|m| !m.is_control()).collect();
    assert_eq!(
        data.len(),
        expected.len(),
        "Payload count mismatch:\n  Expected: {expected:?}\n  Actual: {:?}",
        describe(actual)
    );

    for (i, (m, e)) in data.iter().zip(expected).enumerate() {
        let got: Value = serde_json::from_slice(m.payload())
            .unwrap_or_else(|err| panic!("Payload at index {i} is not JSON ({err}): {m}"));
        assert_eq!(&got, e, "JSON mismatch at index {i}");
    }
}

/// Assert the number of control messages in `actual`.
///
/// # Panics
///
/// Panics if the count differs.
pub fn assert_control_count(actual: &[Message], expected: usize) {
    let n = actual.iter().filter(|m| m.is_control()).count();
    assert_eq!(
        n,
        expected,
        "Control message count mismatch: expected {expected}, got {n} in {:?}",
        describe(actual)
    );
}

/// Assert that the last message is a control message.
///
/// # Panics
///
/// Panics if `actual` is empty or ends with a data message.
pub fn assert_ends_with_control(actual: &[Message]) {
    assert!(
        actual.last().is_some_and(Message::is_control),
        "Expected output to end with a control message, got {:?}",
        describe(actual)
    );
}
