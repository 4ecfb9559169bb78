//! End-to-end pipeline behavior.

use anyhow::Result;
use conduit::testing::*;
use conduit::{Context, Message, Pipeline, Registry};
use serde_json::json;

fn pipeline(json: &str) -> Result<Pipeline> {
    Pipeline::from_json(&Registry::default(), json)
}

#[test]
fn aggregate_to_array_emits_on_overflow_and_control() -> Result<()> {
    let p = pipeline(
        r#"{"transforms": [{"type": "aggregate_to_array", "settings": {"batch": {"count": 2}}}]}"#,
    )?;
    let ctx = Context::background();

    let out = p.apply(&ctx, vec![Message::new(r#"{"a":"b"}"#), Message::new(r#"{"c":"d"}"#)])?;
    assert!(out.is_empty());

    let out = p.apply(&ctx, vec![Message::new(r#"{"e":"f"}"#)])?;
    assert_payloads(&out, &[r#"[{"a":"b"},{"c":"d"}]"#]);

    let out = p.apply(&ctx, vec![Message::control()])?;
    assert_eq!(out.len(), 2);
    assert_payloads(&out, &[r#"[{"e":"f"}]"#]);
    assert_ends_with_control(&out);
    Ok(())
}

#[test]
fn control_flush_on_empty_buffer_emits_only_control() -> Result<()> {
    let p = pipeline(
        r#"{"transforms": [
            {"type": "aggregate_to_array", "settings": {"batch": {"count": 5}}},
            {"type": "aggregate_to_string", "settings": {"batch": {"count": 5}}}
        ]}"#,
    )?;
    let ctx = Context::background();

    let out = p.apply(&ctx, batch_with_control(&["1", "2"]))?;
    assert_payloads(&out, &["[1,2]"]);

    let out = p.apply(&ctx, vec![Message::control()])?;
    assert_eq!(out.len(), 1);
    assert!(out[0].is_control());
    Ok(())
}

#[test]
fn aggregate_to_array_partitions_by_batch_key() -> Result<()> {
    let p = pipeline(
        r#"{"transforms": [{"type": "aggregate_to_array", "settings": {
            "object": {"batch_key": "k", "target_key": "items"},
            "batch": {"count": 10}
        }}]}"#,
    )?;

    let batch = MessageBuilder::new()
        .json(r#"{"k":"b","n":1}"#)
        .json(r#"{"k":"a","n":2}"#)
        .json(r#"{"k":"b","n":3}"#)
        .control()
        .build();
    let out = p.apply(&Context::background(), batch)?;

    assert_json_payloads(
        &out,
        &[
            json!({"items": [{"k": "a", "n": 2}]}),
            json!({"items": [{"k": "b", "n": 1}, {"k": "b", "n": 3}]}),
        ],
    );
    assert_control_count(&out, 1);
    Ok(())
}

#[test]
fn aggregate_to_string_joins_with_separator() -> Result<()> {
    let p = pipeline(
        r#"{"transforms": [
            {"type": "aggregate_to_string", "settings": {"batch": {"count": 3}}},
            {"type": "aggregate_to_string", "settings": {"separator": "|", "batch": {"count": 10}}}
        ]}"#,
    )?;

    let batch = MessageBuilder::new().repeat("x", 4).control().build();
    let out = p.apply(&Context::background(), batch)?;
    assert_payloads(&out, &["x\nx\nx|x"]);
    assert_ends_with_control(&out);
    Ok(())
}

#[test]
fn oversized_item_fails_the_batch() -> Result<()> {
    let p = pipeline(
        r#"{"transforms": [{"type": "aggregate_to_string", "settings": {"batch": {"size": 4}}}]}"#,
    )?;
    let err = p
        .apply(&Context::background(), vec![Message::new("too large")])
        .unwrap_err();
    assert!(matches!(err.root(), conduit::Error::SizeLimit { .. }));
    assert!(err.to_string().starts_with("transform aggregate_to_string:"));
    Ok(())
}

#[test]
fn aggregate_from_array_splits_payload() -> Result<()> {
    let p = pipeline(r#"{"transforms": [{"type": "aggregate_from_array"}]}"#)?;
    let out = p.apply(
        &Context::background(),
        batch_with_control(&[r#"[{"a":1},"b",3]"#]),
    )?;
    assert_payloads(&out, &[r#"{"a":1}"#, "b", "3"]);
    assert_ends_with_control(&out);
    Ok(())
}

#[test]
fn aggregate_from_array_merges_objects_from_source_key() -> Result<()> {
    let p = pipeline(
        r#"{"transforms": [{"type": "aggregate_from_array", "settings": {"object": {"source_key": "items"}}}]}"#,
    )?;
    let out = p.apply(
        &Context::background(),
        vec![Message::new(r#"{"id":7,"items":[{"x":1},{"x":2},"raw"]}"#)],
    )?;
    assert_json_payloads(
        &out,
        &[
            json!({"id": 7, "x": 1}),
            json!({"id": 7, "x": 2}),
            json!({"id": 7, "items": "raw"}),
        ],
    );
    Ok(())
}

#[test]
fn array_round_trip_through_aggregation() -> Result<()> {
    let p = pipeline(
        r#"{"transforms": [
            {"type": "aggregate_to_array", "settings": {"batch": {"count": 100}}},
            {"type": "aggregate_from_array"}
        ]}"#,
    )?;
    let batch = MessageBuilder::new().numbered("n", 5).control().build();
    let out = p.apply(&Context::background(), batch.clone())?;
    assert_eq!(out, batch);
    Ok(())
}

#[test]
fn utility_control_inserts_batch_boundaries() -> Result<()> {
    let p = pipeline(
        r#"{"transforms": [
            {"type": "utility_control", "settings": {"batch": {"count": 2}}},
            {"type": "aggregate_to_string", "settings": {"separator": ",", "batch": {"count": 100}}}
        ]}"#,
    )?;

    let batch = MessageBuilder::new()
        .json("a")
        .json("b")
        .json("c")
        .json("d")
        .json("e")
        .control()
        .build();
    let out = p.apply(&Context::background(), batch)?;
    assert_payloads(&out, &["a,b", "c,d", "e"]);
    assert_control_count(&out, 3);
    Ok(())
}

#[test]
fn object_stages_edit_payloads() -> Result<()> {
    let p = pipeline(
        r#"{"transforms": [
            {"type": "object_copy", "settings": {"object": {"source_key": "a", "target_key": "b.c"}}},
            {"type": "object_insert", "settings": {"object": {"target_key": "meta seen"}, "value": true}},
            {"type": "object_delete", "settings": {"object": {"source_key": "a"}}}
        ]}"#,
    )?;
    let out = p.apply(&Context::background(), vec![Message::new(r#"{"a":1}"#)])?;
    assert_payloads(&out, &[r#"{"b":{"c":1}}"#]);
    assert_eq!(out[0].metadata(), br#"{"seen":true}"#);
    Ok(())
}

#[test]
fn utility_drop_keeps_control() -> Result<()> {
    let p = pipeline(r#"{"transforms": [{"type": "utility_drop"}]}"#)?;
    let out = p.apply(&Context::background(), batch_with_control(&["a", "b"]))?;
    assert_eq!(out, vec![Message::control()]);
    Ok(())
}

#[test]
fn utility_delay_requires_duration() {
    let err = pipeline(r#"{"transforms": [{"type": "utility_delay"}]}"#).unwrap_err();
    assert!(format!("{err:#}").contains("duration: missing required option"));
}
