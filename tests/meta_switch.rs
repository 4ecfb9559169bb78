//! Tests for `meta_switch` and conditions.

use anyhow::Result;
use conduit::condition::{Condition, ConditionConfig, Operator};
use conduit::testing::*;
use conduit::{Context, Message, Pipeline, Registry};
use serde_json::json;

fn pipeline(json: &str) -> Result<Pipeline> {
    Pipeline::from_json(&Registry::default(), json)
}

fn condition(json: &str) -> Result<Condition> {
    let cfg: ConditionConfig = serde_json::from_str(json)?;
    Ok(Condition::new(&Registry::default(), &cfg)?)
}

#[test]
fn first_matching_case_wins() -> Result<()> {
    let p = pipeline(
        r#"{"transforms": [{"type": "meta_switch", "settings": {"cases": [
            {"transforms": [{"type": "object_insert", "settings": {"object": {"target_key": "case"}, "value": 1}}]},
            {"transforms": [{"type": "object_insert", "settings": {"object": {"target_key": "case"}, "value": 2}}]}
        ]}}]}"#,
    )?;
    let out = p.apply(&Context::background(), vec![Message::new("{}")])?;
    assert_payloads(&out, &[r#"{"case":1}"#]);
    Ok(())
}

#[test]
fn routes_by_condition_with_else_branch() -> Result<()> {
    let p = pipeline(
        r#"{"transforms": [{"type": "meta_switch", "settings": {"cases": [
            {
                "condition": {"operator": "any", "inspectors": [
                    {"type": "string_equal_to", "settings": {"object": {"source_key": "kind"}, "value": "a"}},
                    {"type": "string_starts_with", "settings": {"object": {"source_key": "kind"}, "value": "al"}}
                ]},
                "transforms": [{"type": "object_insert", "settings": {"object": {"target_key": "route"}, "value": "first"}}]
            },
            {
                "transforms": [{"type": "object_insert", "settings": {"object": {"target_key": "route"}, "value": "else"}}]
            }
        ]}}]}"#,
    )?;

    let batch = MessageBuilder::new()
        .json(r#"{"kind":"a"}"#)
        .json(r#"{"kind":"alpha"}"#)
        .json(r#"{"kind":"b"}"#)
        .build();
    let out = p.apply(&Context::background(), batch)?;
    assert_json_payloads(
        &out,
        &[
            json!({"kind": "a", "route": "first"}),
            json!({"kind": "alpha", "route": "first"}),
            json!({"kind": "b", "route": "else"}),
        ],
    );
    Ok(())
}

#[test]
fn unmatched_messages_pass_through() -> Result<()> {
    let p = pipeline(
        r#"{"transforms": [{"type": "meta_switch", "settings": {"cases": [
            {
                "condition": {"operator": "all", "inspectors": [
                    {"type": "number_greater_than", "settings": {"object": {"source_key": "n"}, "value": 10}}
                ]},
                "transforms": [{"type": "utility_drop"}]
            }
        ]}}]}"#,
    )?;
    let out = p.apply(
        &Context::background(),
        batch_with_control(&[r#"{"n":1}"#, r#"{"n":11}"#, r#"{"n":3}"#]),
    )?;
    assert_payloads(&out, &[r#"{"n":1}"#, r#"{"n":3}"#]);
    assert_control_count(&out, 1);
    Ok(())
}

#[test]
fn control_flushes_every_case_once() -> Result<()> {
    let p = pipeline(
        r#"{"transforms": [{"type": "meta_switch", "settings": {"cases": [
            {
                "condition": {"operator": "all", "inspectors": [
                    {"type": "string_equal_to", "settings": {"object": {"source_key": "k"}, "value": "x"}}
                ]},
                "transforms": [{"type": "aggregate_to_string", "settings": {"separator": ",", "batch": {"count": 10}}}]
            },
            {
                "transforms": [{"type": "aggregate_to_array", "settings": {"batch": {"count": 10}}}]
            }
        ]}}]}"#,
    )?;

    let batch = MessageBuilder::new()
        .json(r#"{"k":"x"}"#)
        .json(r#"{"k":"y"}"#)
        .json(r#"{"k":"x"}"#)
        .control()
        .build();
    let out = p.apply(&Context::background(), batch)?;

    assert_payloads(&out, &[r#"{"k":"x"},{"k":"x"}"#, r#"[{"k":"y"}]"#]);
    assert_control_count(&out, 1);
    assert_ends_with_control(&out);
    Ok(())
}

#[test]
fn switch_without_cases_is_rejected() {
    let err = pipeline(r#"{"transforms": [{"type": "meta_switch"}]}"#).unwrap_err();
    assert!(format!("{err:#}").contains("cases: missing required option"));
}

#[test]
fn unknown_operator_is_rejected() {
    let err = condition(r#"{"operator": "most", "inspectors": []}"#).err();
    let text = err.map(|e| e.to_string()).unwrap_or_default();
    assert!(text.contains("operator most"), "{text}");
}

#[test]
fn none_operator_inverts_any() -> Result<()> {
    let cond = condition(
        r#"{"operator": "none", "inspectors": [
            {"type": "string_contains", "settings": {"value": "err"}},
            {"type": "string_ends_with", "settings": {"value": "!"}}
        ]}"#,
    )?;
    let ctx = Context::background();
    assert!(cond.operate(&ctx, &Message::new("all good"))?);
    assert!(!cond.operate(&ctx, &Message::new("an error"))?);
    assert!(!cond.operate(&ctx, &Message::new("stop!"))?);
    assert!(!cond.operate(&ctx, &Message::control())?);
    Ok(())
}

#[test]
fn regex_format_and_negation_inspectors() -> Result<()> {
    let cond = condition(
        r#"{"operator": "all", "inspectors": [
            {"type": "string_match", "settings": {"object": {"source_key": "id"}, "pattern": "^[a-f0-9]{4}$"}},
            {"type": "format_json", "settings": {"object": {"source_key": "body"}}},
            {"type": "meta_negate", "settings": {"inspector":
                {"type": "number_equal_to", "settings": {"object": {"source_key": "n"}, "value": 0}}
            }}
        ]}"#,
    )?;
    let ctx = Context::background();
    assert!(cond.operate(&ctx, &Message::new(r#"{"id":"be3f","body":{},"n":2}"#))?);
    assert!(!cond.operate(&ctx, &Message::new(r#"{"id":"zzzz","body":{},"n":2}"#))?);
    assert!(!cond.operate(&ctx, &Message::new(r#"{"id":"be3f","body":"s","n":2}"#))?);
    assert!(!cond.operate(&ctx, &Message::new(r#"{"id":"be3f","body":[],"n":0}"#))?);
    Ok(())
}

#[test]
fn operator_without_inspectors_fails_evaluation() -> Result<()> {
    let cond = condition(r#"{"operator": "all"}"#)?;
    assert!(cond.operate(&Context::background(), &Message::new("x")).is_err());
    Ok(())
}

#[test]
fn unknown_inspector_is_a_config_error() {
    let err = condition(
        r#"{"operator": "all", "inspectors": [{"type": "string_rhymes_with"}]}"#,
    )
    .err();
    let inner = err
        .as_ref()
        .and_then(|e| e.downcast_ref::<conduit::Error>())
        .map(conduit::Error::is_config);
    assert_eq!(inner, Some(true));
}
