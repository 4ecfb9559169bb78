//! Tests for the `send_file` sink.

use anyhow::Result;
use conduit::testing::*;
use conduit::{Context, Message, Pipeline, Registry};
use serde_json::json;
use std::fs;
use std::path::Path;

fn sink(path: &Path, settings: serde_json::Value) -> Result<Pipeline> {
    let mut settings = settings;
    settings["file_path"] = json!(path.to_string_lossy());
    let cfg = json!({"transforms": [{"type": "send_file", "settings": settings}]});
    Pipeline::from_json(&Registry::default(), &cfg.to_string())
}

#[test]
fn full_batches_are_written_and_messages_pass_through() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("out.txt");
    let p = sink(&path, json!({"batch": {"count": 2}}))?;

    let out = p.apply(&Context::background(), batch_with_control(&["a", "b", "c"]))?;
    assert_payloads(&out, &["a", "b", "c"]);
    assert_ends_with_control(&out);
    assert_eq!(fs::read_to_string(&path)?, "a\nb\nc\n");
    Ok(())
}

#[test]
fn nothing_is_written_before_a_boundary() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("out.txt");
    let p = sink(&path, json!({"batch": {"count": 3}}))?;

    p.apply(&Context::background(), vec![Message::new("a"), Message::new("b")])?;
    assert!(!path.exists());

    p.apply(&Context::background(), vec![Message::new("c"), Message::new("d")])?;
    assert_eq!(fs::read_to_string(&path)?, "a\nb\nc\n");
    Ok(())
}

#[test]
fn batch_key_selects_the_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let p = sink(
        &dir.path().join("nested/{key}.jsonl"),
        json!({"object": {"batch_key": "region"}, "batch": {"count": 10}}),
    )?;

    let batch = MessageBuilder::new()
        .json(r#"{"region":"eu","n":1}"#)
        .json(r#"{"region":"us","n":2}"#)
        .json(r#"{"region":"eu","n":3}"#)
        .control()
        .build();
    p.apply(&Context::background(), batch)?;

    let eu = fs::read_to_string(dir.path().join("nested/eu.jsonl"))?;
    let us = fs::read_to_string(dir.path().join("nested/us.jsonl"))?;
    assert_eq!(eu, "{\"region\":\"eu\",\"n\":1}\n{\"region\":\"eu\",\"n\":3}\n");
    assert_eq!(us, "{\"region\":\"us\",\"n\":2}\n");
    Ok(())
}

#[test]
fn repeated_flushes_append() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("log.txt");
    let p = sink(&path, json!({}))?;
    let ctx = Context::background();

    p.apply(&ctx, batch_with_control(&["one"]))?;
    p.apply(&ctx, batch_with_control(&["two"]))?;
    p.apply(&ctx, vec![Message::control()])?;
    p.close(&ctx)?;
    assert_eq!(fs::read_to_string(&path)?, "one\ntwo\n");
    Ok(())
}

#[test]
fn failed_writes_keep_the_batch() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let blocker = dir.path().join("blocked");
    fs::write(&blocker, "")?;
    let path = blocker.join("out.txt");
    let p = sink(&path, json!({"batch": {"count": 2}}))?;
    let ctx = Context::background();

    p.apply(&ctx, vec![Message::new("a"), Message::new("b")])?;
    assert!(p.apply(&ctx, vec![Message::new("c")]).is_err());
    assert!(p.apply(&ctx, vec![Message::control()]).is_err());

    fs::remove_file(&blocker)?;
    p.apply(&ctx, vec![Message::new("c")])?;
    assert_eq!(fs::read_to_string(&path)?, "a\nb\n");
    p.apply(&ctx, vec![Message::control()])?;
    assert_eq!(fs::read_to_string(&path)?, "a\nb\nc\n");
    Ok(())
}

#[test]
fn failed_partition_does_not_lose_later_partitions() -> Result<()> {
    let dir = tempfile::tempdir()?;
    fs::write(dir.path().join("a"), "")?;
    let p = sink(
        &dir.path().join("{key}/out.txt"),
        json!({"object": {"batch_key": "k"}, "batch": {"count": 10}}),
    )?;
    let ctx = Context::background();

    let batch = MessageBuilder::new()
        .json(r#"{"k":"a"}"#)
        .json(r#"{"k":"b"}"#)
        .build();
    p.apply(&ctx, batch)?;
    assert!(p.close(&ctx).is_err());
    assert!(!dir.path().join("b/out.txt").exists());

    fs::remove_file(dir.path().join("a"))?;
    p.close(&ctx)?;
    assert_eq!(fs::read_to_string(dir.path().join("a/out.txt"))?, "{\"k\":\"a\"}\n");
    assert_eq!(fs::read_to_string(dir.path().join("b/out.txt"))?, "{\"k\":\"b\"}\n");
    Ok(())
}

#[test]
fn partition_keys_cannot_escape_the_directory() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let nested = dir.path().join("out");
    let p = sink(
        &nested.join("{key}.txt"),
        json!({"object": {"batch_key": "k"}, "batch": {"count": 10}}),
    )?;
    let ctx = Context::background();

    for key in ["../escaped", "..", "a/b", r"a\b"] {
        let msg = Message::new(json!({"k": key}).to_string());
        let err = p.apply(&ctx, vec![msg]).unwrap_err();
        assert!(err.to_string().contains("not a plain file name"), "{err}");
    }

    p.apply(&ctx, batch_with_control(&[r#"{"k":"ok..name"}"#]))?;
    assert!(nested.join("ok..name.txt").exists());
    assert!(!dir.path().join("escaped.txt").exists());
    Ok(())
}

#[test]
fn file_path_is_required() {
    let err = Pipeline::from_json(
        &Registry::default(),
        r#"{"transforms": [{"type": "send_file"}]}"#,
    )
    .unwrap_err();
    assert!(format!("{err:#}").contains("file_path: missing required option"));
}
