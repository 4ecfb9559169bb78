//! Tests for metric stages and destinations.

use anyhow::Result;
use conduit::metrics::{Generator, MetricData, MetricsCollector};
use conduit::testing::*;
use conduit::{Config, Context, Message, Pipeline, Registry};
use serde_json::json;
use std::sync::{Arc, Mutex};

#[test]
fn count_and_bytes_report_on_control() -> Result<()> {
    let registry = Registry::default();
    let p = Pipeline::from_json(
        &registry,
        r#"{"transforms": [
            {"type": "utility_metric_count", "settings": {"metric": {
                "name": "records", "attributes": {"stage": "in"}, "destination": {"type": "memory"}
            }}},
            {"type": "utility_metric_bytes", "settings": {"metric": {
                "name": "bytes", "destination": {"type": "memory"}
            }}}
        ]}"#,
    )?;
    let ctx = Context::background();

    p.apply(&ctx, batch_with_control(&["ab", "cde", "f"]))?;
    let snapshot = registry.metrics().snapshot();
    assert_eq!(snapshot["records"], json!(3));
    assert_eq!(snapshot["bytes"], json!(6));

    let records = registry.metrics().history("records");
    assert_eq!(records[0].attributes.get("stage").map(String::as_str), Some("in"));

    p.apply(&ctx, batch_with_control(&["g"]))?;
    assert_eq!(registry.metrics().history("records").len(), 2);
    assert_eq!(registry.metrics().snapshot()["records"], json!(1));
    assert_eq!(registry.metrics().total("records"), 4);
    Ok(())
}

#[test]
fn counters_reset_after_each_report() -> Result<()> {
    let registry = Registry::default();
    let p = Pipeline::from_json(
        &registry,
        r#"{"transforms": [{"type": "utility_metric_count", "settings": {"metric": {
            "name": "n", "destination": {"type": "memory"}
        }}}]}"#,
    )?;
    let ctx = Context::background();

    p.apply(&ctx, vec![Message::new("a"), Message::control(), Message::control()])?;
    let values: Vec<_> = registry.metrics().history("n").into_iter().map(|p| p.value).collect();
    assert_eq!(values, vec![json!(1), json!(0)]);
    Ok(())
}

#[mark_flaky_tests::flaky]
#[test]
fn duration_accumulates_sub_pipeline_time() -> Result<()> {
    let registry = Registry::default();
    let p = Pipeline::from_json(
        &registry,
        r#"{"transforms": [{"type": "meta_metric_duration", "settings": {
            "metric": {"name": "delay_ns", "destination": {"type": "memory"}},
            "transforms": [{"type": "utility_delay", "settings": {"duration": "15ms"}}]
        }}]}"#,
    )?;

    let out = p.apply(&Context::background(), batch_with_control(&["a", "b"]))?;
    assert_payloads(&out, &["a", "b"]);
    assert_ends_with_control(&out);

    let total = registry.metrics().total("delay_ns");
    assert!(total >= 30_000_000, "measured {total}ns");
    Ok(())
}

#[test]
fn metric_name_is_required() {
    let err = Pipeline::from_json(
        &Registry::default(),
        r#"{"transforms": [{"type": "meta_metric_duration", "settings": {"metric": {}}}]}"#,
    )
    .unwrap_err();
    assert!(format!("{err:#}").contains("metric.name: missing required option"));
}

#[test]
fn tracing_destination_is_the_default() -> Result<()> {
    let registry = Registry::default();
    let p = Pipeline::from_json(
        &registry,
        r#"{"transforms": [{"type": "utility_metric_count", "settings": {"metric": {"name": "n"}}}]}"#,
    )?;
    p.apply(&Context::background(), batch_with_control(&["a"]))?;
    assert!(registry.metrics().points().is_empty());
    Ok(())
}

#[test]
fn shared_collector_can_be_injected() -> Result<()> {
    let collector = MetricsCollector::new();
    let registry = Registry::default().with_metrics(collector.clone());
    let p = Pipeline::from_json(
        &registry,
        r#"{"transforms": [{"type": "utility_metric_bytes", "settings": {"metric": {
            "name": "b", "destination": {"type": "memory"}
        }}}]}"#,
    )?;
    p.apply(&Context::background(), batch_with_control(&["1234"]))?;
    assert_eq!(collector.total("b"), 4);

    collector.clear();
    assert!(registry.metrics().points().is_empty());
    Ok(())
}

/// Keeps names only.
#[derive(Clone, Default)]
struct NameSink(Arc<Mutex<Vec<String>>>);

impl Generator for NameSink {
    fn generate(&self, _ctx: &Context, data: MetricData) -> conduit::Result<()> {
        self.0.lock().map_err(|e| anyhow::anyhow!("{e}"))?.push(data.name);
        Ok(())
    }
}

#[test]
fn custom_destination_can_be_registered() -> Result<()> {
    let sink = NameSink::default();
    let mut registry = Registry::default();
    let handle = sink.clone();
    registry.register_generator("names", move |_, _| Ok(handle.clone()));

    let tf = registry.new_transform(&Config::new(
        "utility_metric_count",
        json!({"metric": {"name": "custom", "destination": {"type": "names"}}}),
    ))?;
    tf.transform(&Context::background(), Message::control())?;

    let names = sink.0.lock().map_err(|e| anyhow::anyhow!("{e}"))?.clone();
    assert_eq!(names, vec!["custom".to_string()]);
    Ok(())
}
