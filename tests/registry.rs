//! Tests for the factory registry.

use anyhow::Result;
use conduit::registry::run;
use conduit::testing::*;
use conduit::{Config, Context, Error, Message, Registry, Transform};
use serde::Deserialize;
use serde_json::json;

const BUILTINS: &[&str] = &[
    "aggregate_from_array",
    "aggregate_to_array",
    "aggregate_to_string",
    "meta_err",
    "meta_for_each",
    "meta_kv_store_lock",
    "meta_metric_duration",
    "meta_pipeline",
    "meta_retry",
    "meta_switch",
    "object_copy",
    "object_delete",
    "object_insert",
    "send_file",
    "utility_control",
    "utility_delay",
    "utility_drop",
    "utility_err",
    "utility_metric_bytes",
    "utility_metric_count",
];

#[test]
fn default_registry_has_every_builtin() {
    let registry = Registry::default();
    for name in BUILTINS {
        assert!(registry.has_transform(name), "missing {name}");
    }
    assert!(!Registry::empty().has_transform("object_copy"));
}

#[test]
fn unknown_type_is_a_config_error() {
    let err = Registry::default()
        .new_transform(&Config::new("send_carrier_pigeon", json!({})))
        .err();
    let err = err.as_ref();
    assert!(err.is_some_and(Error::is_config));
    assert_eq!(
        err.map(ToString::to_string).as_deref(),
        Some("transform send_carrier_pigeon: invalid factory input")
    );
}

#[test]
fn malformed_settings_name_the_type() {
    let err = Registry::default()
        .new_transform(&Config::new("aggregate_to_array", json!({"batch": {"count": "ten"}})))
        .err();
    let text = err.map(|e| e.to_string()).unwrap_or_default();
    assert!(text.starts_with("settings (aggregate_to_array): invalid option"), "{text}");
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SuffixSettings {
    suffix: String,
}

struct Suffix(String);

impl Transform for Suffix {
    fn transform(&self, _ctx: &Context, msg: Message) -> conduit::Result<Vec<Message>> {
        if msg.is_control() {
            return Ok(vec![msg]);
        }
        let mut payload = msg.payload().to_vec();
        payload.extend_from_slice(self.0.as_bytes());
        Ok(vec![Message::new(payload)])
    }
}

#[test]
fn custom_transforms_compose_with_builtins() -> Result<()> {
    let mut registry = Registry::default();
    registry.register_transform("suffix", |_, cfg| {
        let s: SuffixSettings = cfg.decode()?;
        Ok(Suffix(s.suffix))
    });

    let cfgs: Vec<Config> = serde_json::from_value(json!([
        {"type": "meta_for_each", "settings": {
            "object": {"source_key": "names", "target_key": "greeted"},
            "transforms": [{"type": "suffix", "settings": {"suffix": "!"}}]
        }}
    ]))?;
    let out = run(
        &registry,
        &Context::background(),
        &cfgs,
        vec![Message::new(r#"{"names":["ada","bob"]}"#)],
    )?;
    assert_json_payloads(&out, &[json!({"names": ["ada", "bob"], "greeted": ["ada!", "bob!"]})]);
    Ok(())
}

#[test]
fn registering_a_name_again_replaces_it() -> Result<()> {
    let mut registry = Registry::default();
    registry.register_transform("utility_drop", |_, _| Ok(Suffix("?".into())));
    let out = run(
        &registry,
        &Context::background(),
        &[Config::new("utility_drop", serde_json::Value::Null)],
        vec![Message::new("kept")],
    )?;
    assert_payloads(&out, &["kept?"]);
    Ok(())
}

#[test]
fn fixtures_register_under_test_names() -> Result<()> {
    let mut registry = Registry::default();
    let recorder = RecordingTransform::new();
    register_fixtures(&mut registry, &recorder);

    let flaky = registry.new_transform(&Config::new(
        "test_flaky",
        json!({"failures": 1, "message": "first call fails"}),
    ))?;
    let ctx = Context::background();
    assert!(flaky.transform(&ctx, Message::new("x")).is_err());
    assert!(flaky.transform(&ctx, Message::new("x")).is_ok());

    let rec = registry.new_transform(&Config::new("test_record", serde_json::Value::Null))?;
    rec.transform(&ctx, Message::new("y"))?;
    assert_eq!(recorder.data_count(), 1);
    Ok(())
}

#[test]
fn debug_lists_transform_names() {
    let text = format!("{:?}", Registry::default());
    assert!(text.contains("meta_switch"));
}
