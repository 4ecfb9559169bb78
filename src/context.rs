//! Cancellation and deadline propagation.
//!
//! A [`Context`] is passed to every [`Transform`](crate::transform::Transform)
//! call. It carries an optional deadline and a cancellation flag. Children
//! created with [`Context::with_timeout`] or [`Context::with_cancel`] observe
//! their parent's cancellation, but cancelling a child never affects the parent.
//!
//! Blocking collaborators (lock stores, sinks, delays) are expected to check
//! [`Context::check`] before doing work. Rollback paths that must run even
//! after cancellation use [`Context::without_cancel`].

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Clone, Debug, Default)]
pub struct Context {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
    parent: Option<Context>,
    sleepers: Mutex<Vec<Arc<Waker>>>,
}

/// Wakes one blocked [`Context::sleep`] call.
#[derive(Debug, Default)]
struct Waker {
    lock: Mutex<()>,
    cv: Condvar,
}

impl Waker {
    fn wake(&self) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.cv.notify_all();
    }
}

/// Cancels the context it was created with, and every child of that context.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    ctx: Context,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let inner = &self.ctx.inner;
        inner.cancelled.store(true, Ordering::SeqCst);
        let sleepers = inner
            .sleepers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for waker in sleepers {
            waker.wake();
        }
    }
}

impl Context {
    /// A root context that is never cancelled and has no deadline.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    fn child(&self, deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                deadline,
                parent: Some(self.clone()),
                sleepers: Mutex::default(),
            }),
        }
    }

    /// Child context whose deadline is at most `timeout` from now.
    ///
    /// A timeout too large to represent adds no deadline of its own.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.child(Instant::now().checked_add(timeout))
    }

    /// Child context plus a handle that cancels it.
    #[must_use]
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let ctx = self.child(None);
        let handle = CancelHandle { ctx: ctx.clone() };
        (ctx, handle)
    }

    /// Fresh root context, detached from any cancellation or deadline.
    ///
    /// Used for cleanup calls (lock rollback) that must be attempted even
    /// when the surrounding work was cancelled.
    #[must_use]
    pub fn without_cancel(&self) -> Self {
        Self::background()
    }

    /// The earliest deadline in this context's chain.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        let parent = self.inner.parent.as_ref().and_then(Context::deadline);
        match (self.inner.deadline, parent) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Time left before the deadline, if there is one.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline()
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
            || self.inner.parent.as_ref().is_some_and(Context::is_cancelled)
    }

    /// `Ok` while work may continue.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] or [`Error::DeadlineExceeded`].
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if self.deadline().is_some_and(|d| Instant::now() >= d) {
            return Err(Error::DeadlineExceeded);
        }
        Ok(())
    }

    fn chain(&self) -> impl Iterator<Item = &Context> {
        std::iter::successors(Some(self), |c| c.inner.parent.as_ref())
    }

    /// Sleep for `dur`, waking early if the context is cancelled or expires.
    ///
    /// The sleeper registers with every context in the chain, so cancelling
    /// any ancestor wakes it immediately.
    ///
    /// # Errors
    ///
    /// Returns the context error if the sleep was interrupted.
    pub fn sleep(&self, dur: Duration) -> Result<()> {
        let waker = Arc::new(Waker::default());
        for ctx in self.chain() {
            ctx.inner
                .sleepers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(Arc::clone(&waker));
        }

        let out = self.park(&waker, Instant::now().checked_add(dur));

        for ctx in self.chain() {
            ctx.inner
                .sleepers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|w| !Arc::ptr_eq(w, &waker));
        }
        out
    }

    /// Block on `waker` until `end`, the deadline, or cancellation. `None`
    /// waits for cancellation only.
    fn park(&self, waker: &Waker, end: Option<Instant>) -> Result<()> {
        let mut guard = waker.lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            self.check()?;
            let now = Instant::now();
            if end.is_some_and(|e| now >= e) {
                return Ok(());
            }
            let until = match (end, self.deadline()) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            guard = match until {
                Some(t) => {
                    waker
                        .cv
                        .wait_timeout(guard, t.saturating_duration_since(now))
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => waker.cv.wait(guard).unwrap_or_else(PoisonError::into_inner),
            };
        }
    }
}
