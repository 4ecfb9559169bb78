//! Tests for the stage driver.

use anyhow::Result;
use conduit::testing::*;
use conduit::transform::{apply, close_all};
use conduit::{Context, Error, Message, Transform};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Emits `n` copies of each data message, tagged with their index.
struct FanOut(usize);

impl Transform for FanOut {
    fn transform(&self, _ctx: &Context, msg: Message) -> conduit::Result<Vec<Message>> {
        if msg.is_control() {
            return Ok(vec![msg]);
        }
        let base = String::from_utf8_lossy(msg.payload()).into_owned();
        Ok((0..self.0).map(|i| Message::new(format!("{base}{i}"))).collect())
    }
}

/// Fails on one payload.
struct FailOn(&'static str);

impl Transform for FailOn {
    fn transform(&self, _ctx: &Context, msg: Message) -> conduit::Result<Vec<Message>> {
        if msg.payload() == self.0.as_bytes() {
            return Err(Error::transform("fail_on", Error::InvalidObject));
        }
        Ok(vec![msg])
    }
}

#[derive(Default)]
struct CloseCounter {
    closed: AtomicUsize,
}

impl Transform for CloseCounter {
    fn transform(&self, _ctx: &Context, msg: Message) -> conduit::Result<Vec<Message>> {
        Ok(vec![msg])
    }

    fn close(&self, _ctx: &Context) -> conduit::Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Err(Error::missing("close"))
    }
}

#[test]
fn fan_out_is_concatenated_in_order() -> Result<()> {
    let stages: Vec<Arc<dyn Transform>> = vec![Arc::new(FanOut(2)), Arc::new(FanOut(2))];
    let out = apply(&Context::background(), &stages, batch_with_control(&["a", "b"]))?;
    assert_payloads(
        &out,
        &["a00", "a01", "a10", "a11", "b00", "b01", "b10", "b11"],
    );
    assert_ends_with_control(&out);
    Ok(())
}

#[test]
fn each_stage_sees_all_previous_output() -> Result<()> {
    let recorder = RecordingTransform::new();
    let stages: Vec<Arc<dyn Transform>> = vec![Arc::new(FanOut(3)), Arc::new(recorder.clone())];
    apply(&Context::background(), &stages, vec![Message::new("x"), Message::control()])?;
    assert_eq!(recorder.data_count(), 3);
    assert_eq!(recorder.calls(), 4);
    Ok(())
}

#[test]
fn first_error_aborts_the_call() -> Result<()> {
    let recorder = RecordingTransform::new();
    let stages: Vec<Arc<dyn Transform>> = vec![Arc::new(FailOn("b")), Arc::new(recorder.clone())];
    let err = apply(
        &Context::background(),
        &stages,
        batch_with_control(&["a", "b", "c"]),
    )
    .unwrap_err();

    assert!(matches!(err.root(), Error::InvalidObject));
    assert_eq!(recorder.calls(), 0);
    Ok(())
}

#[test]
fn empty_stage_list_returns_input() -> Result<()> {
    let input = batch_with_control(&["a"]);
    let out = apply(&Context::background(), &[], input.clone())?;
    assert_eq!(out, input);
    Ok(())
}

#[test]
fn cancelled_context_stops_the_driver() -> Result<()> {
    let (ctx, cancel) = Context::background().with_cancel();
    cancel.cancel();
    let stages: Vec<Arc<dyn Transform>> = vec![Arc::new(FanOut(1))];
    let err = apply(&ctx, &stages, vec![Message::new("a")]).unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    Ok(())
}

#[test]
fn expired_deadline_stops_the_driver() -> Result<()> {
    let ctx = Context::background().with_timeout(Duration::ZERO);
    let stages: Vec<Arc<dyn Transform>> = vec![Arc::new(FanOut(1))];
    let err = apply(&ctx, &stages, vec![Message::new("a")]).unwrap_err();
    assert!(matches!(err, Error::DeadlineExceeded));
    Ok(())
}

#[test]
fn child_cancellation_does_not_reach_parent() -> Result<()> {
    let parent = Context::background();
    let (child, cancel) = parent.with_cancel();
    cancel.cancel();
    assert!(child.check().is_err());
    assert!(parent.check().is_ok());
    assert!(child.without_cancel().check().is_ok());
    Ok(())
}

#[test]
fn cancelling_an_ancestor_wakes_a_sleeper() -> Result<()> {
    let (parent, cancel) = Context::background().with_cancel();
    let child = parent.with_timeout(Duration::from_secs(3600));

    let start = Instant::now();
    let sleeper = thread::spawn(move || child.sleep(Duration::from_secs(3600)));
    thread::sleep(Duration::from_millis(30));
    cancel.cancel();

    let out = sleeper.join().map_err(|_| anyhow::anyhow!("sleeper panicked"))?;
    assert!(matches!(out, Err(Error::Cancelled)));
    assert!(start.elapsed() < Duration::from_secs(60));
    Ok(())
}

#[test]
fn oversized_durations_do_not_overflow() -> Result<()> {
    let ctx = Context::background().with_timeout(Duration::MAX);
    assert!(ctx.check().is_ok());
    assert!(ctx.deadline().is_none());

    let short = ctx.with_timeout(Duration::from_millis(20));
    let err = short.sleep(Duration::MAX).unwrap_err();
    assert!(matches!(err, Error::DeadlineExceeded));
    Ok(())
}

#[test]
fn sleep_without_interruption_completes() -> Result<()> {
    let start = Instant::now();
    Context::background().sleep(Duration::from_millis(15))?;
    assert!(start.elapsed() >= Duration::from_millis(15));
    Ok(())
}

#[test]
fn close_all_attempts_every_stage() -> Result<()> {
    let a = Arc::new(CloseCounter::default());
    let b = Arc::new(CloseCounter::default());
    let stages: Vec<Arc<dyn Transform>> = vec![a.clone() as Arc<dyn Transform>, b.clone()];
    assert!(close_all(&Context::background(), &stages).is_err());
    assert_eq!(a.closed.load(Ordering::SeqCst), 1);
    assert_eq!(b.closed.load(Ordering::SeqCst), 1);
    Ok(())
}
