// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Single-completion futures fed by native callbacks.
//
// A `Promise` is handed to the backend, which settles it from whichever
// thread its SDK calls back on. The paired `OperationFuture` is what callers
// poll, wait on, attach callbacks to, or `.await`.
//
// Delivery model: every notification (progress or terminal) is appended to
// a per-operation queue under the operation's lock, and the queue is drained
// by one thread at a time with the lock released while user code runs. This
// keeps notifications in issue order, puts the terminal notification last,
// and never calls user code while holding an internal lock.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use keel_core::types::{ErrorCode, OperationError};
use tracing::{debug, trace};

/// Terminal value of an operation.
pub type Outcome<T> = std::result::Result<T, OperationError>;

/// Observable state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    Succeeded,
    Failed,
}

type CompletionCallback<T> = Box<dyn FnOnce(&Outcome<T>) + Send>;
type ProgressCallback<P> = Arc<dyn Fn(&P) + Send + Sync>;

enum Notification<P> {
    Progress(P),
    Terminal,
}

struct Inner<T, P> {
    /// Set exactly once, by the first `complete`/`fail`.
    outcome: Option<Outcome<T>>,
    /// Set once the terminal notification has been drained. Observers go by
    /// this flag so that they never see completion before earlier progress.
    delivered: bool,
    queue: VecDeque<Notification<P>>,
    draining: bool,
    progress_callbacks: Vec<ProgressCallback<P>>,
    completion_callbacks: Vec<CompletionCallback<T>>,
    wakers: Vec<Waker>,
}

/// Shared state of one in-flight asynchronous call.
pub(crate) struct PendingOperation<T, P> {
    inner: Mutex<Inner<T, P>>,
    settled: Condvar,
}

impl<T, P> PendingOperation<T, P>
where
    T: Clone + Send + 'static,
    P: Send + 'static,
{
    fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                outcome: None,
                delivered: false,
                queue: VecDeque::new(),
                draining: false,
                progress_callbacks: Vec::new(),
                completion_callbacks: Vec::new(),
                wakers: Vec::new(),
            }),
            settled: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T, P>> {
        // User code never runs under this lock and `drain` clears `draining`
        // when a callback unwinds, so a poisoned guard still holds consistent
        // state.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// First call wins; returns whether this call settled the operation.
    pub(crate) fn settle(&self, outcome: Outcome<T>) -> bool {
        let mut inner = self.lock();
        if inner.outcome.is_some() {
            debug!("ignoring duplicate completion of a settled operation");
            return false;
        }
        inner.outcome = Some(outcome);
        inner.queue.push_back(Notification::Terminal);
        self.drain(inner);
        true
    }

    fn progress(&self, value: P) -> bool {
        let mut inner = self.lock();
        if inner.outcome.is_some() {
            trace!("dropping progress notification after completion");
            return false;
        }
        inner.queue.push_back(Notification::Progress(value));
        self.drain(inner);
        true
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.lock().outcome.is_some()
    }

    fn drain<'a>(&'a self, mut guard: MutexGuard<'a, Inner<T, P>>) {
        if guard.draining {
            // Whoever is draining will pick up what we just queued.
            return;
        }
        guard.draining = true;
        // Declared before `inner` so an unwind releases the lock first.
        let mut reset = DrainReset {
            inner: &self.inner,
            armed: true,
        };
        let mut inner = guard;

        while let Some(notification) = inner.queue.pop_front() {
            match notification {
                Notification::Progress(value) => {
                    let callbacks = inner.progress_callbacks.clone();
                    drop(inner);
                    for callback in &callbacks {
                        callback(&value);
                    }
                    inner = self.lock();
                }
                Notification::Terminal => {
                    inner.delivered = true;
                    let callbacks = std::mem::take(&mut inner.completion_callbacks);
                    let wakers = std::mem::take(&mut inner.wakers);
                    let outcome = inner.outcome.clone();
                    drop(inner);

                    self.settled.notify_all();
                    for waker in wakers {
                        waker.wake();
                    }
                    if let Some(outcome) = outcome {
                        for callback in callbacks {
                            callback(&outcome);
                        }
                    }
                    inner = self.lock();
                }
            }
        }

        inner.draining = false;
        reset.armed = false;
    }

    fn delivered_outcome(&self) -> Option<Outcome<T>> {
        let inner = self.lock();
        if inner.delivered {
            inner.outcome.clone()
        } else {
            None
        }
    }
}

/// Clears the draining flag if a user callback panics mid-drain, so later
/// notifications are still delivered.
struct DrainReset<'a, T, P> {
    inner: &'a Mutex<Inner<T, P>>,
    armed: bool,
}

impl<T, P> Drop for DrainReset<'_, T, P> {
    fn drop(&mut self) {
        if self.armed {
            self.inner
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .draining = false;
        }
    }
}

/// Type-erased view used by the operation bridge to settle whatever is still
/// pending when its client goes away.
pub(crate) trait Abandon: Send + Sync {
    fn abandon(&self, error: OperationError) -> bool;
    fn is_settled(&self) -> bool;
}

impl<T, P> Abandon for PendingOperation<T, P>
where
    T: Clone + Send + 'static,
    P: Send + 'static,
{
    fn abandon(&self, error: OperationError) -> bool {
        self.settle(Err(error))
    }

    fn is_settled(&self) -> bool {
        PendingOperation::is_settled(self)
    }
}

/// Create a connected promise/future pair.
pub fn channel<T, P>() -> (Promise<T, P>, OperationFuture<T, P>)
where
    T: Clone + Send + 'static,
    P: Send + 'static,
{
    let op = Arc::new(PendingOperation::new());
    let promise = Promise {
        core: Arc::new(PromiseCore { op: op.clone() }),
    };
    (promise, OperationFuture { op })
}

struct PromiseCore<T, P>
where
    T: Clone + Send + 'static,
    P: Send + 'static,
{
    op: Arc<PendingOperation<T, P>>,
}

impl<T, P> Drop for PromiseCore<T, P>
where
    T: Clone + Send + 'static,
    P: Send + 'static,
{
    fn drop(&mut self) {
        if !self.op.is_settled() {
            debug!("promise dropped without completion");
            self.op.settle(Err(OperationError::new(
                ErrorCode::Cancelled,
                "the backend dropped the operation without completing it",
            )));
        }
    }
}

/// Producer side of an operation, handed to the backend.
///
/// Cloneable so a backend can complete from whichever callback fires; only
/// the first completion has any effect. If every clone is dropped while the
/// operation is pending, it fails with `Cancelled`.
pub struct Promise<T, P = ()>
where
    T: Clone + Send + 'static,
    P: Send + 'static,
{
    core: Arc<PromiseCore<T, P>>,
}

impl<T, P> Clone for Promise<T, P>
where
    T: Clone + Send + 'static,
    P: Send + 'static,
{
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<T, P> std::fmt::Debug for Promise<T, P>
where
    T: Clone + Send + 'static,
    P: Send + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("settled", &self.core.op.is_settled())
            .finish()
    }
}

impl<T, P> Promise<T, P>
where
    T: Clone + Send + 'static,
    P: Send + 'static,
{
    /// Settle successfully. Returns `false` if already settled.
    pub fn complete(&self, value: T) -> bool {
        self.core.op.settle(Ok(value))
    }

    /// Settle with an error. Returns `false` if already settled.
    pub fn fail(&self, error: OperationError) -> bool {
        self.core.op.settle(Err(error))
    }

    /// Settle from a backend result.
    pub fn settle(&self, outcome: Outcome<T>) -> bool {
        self.core.op.settle(outcome)
    }

    /// Report intermediate progress. Dropped (returns `false`) once settled.
    pub fn progress(&self, value: P) -> bool {
        self.core.op.progress(value)
    }

    pub fn is_settled(&self) -> bool {
        self.core.op.is_settled()
    }

    pub(crate) fn abandon_handle(&self) -> std::sync::Weak<dyn Abandon> {
        let op: Arc<dyn Abandon> = self.core.op.clone();
        Arc::downgrade(&op)
    }
}

/// Consumer side of an operation.
///
/// Cheap to clone; all clones observe the same single terminal transition.
pub struct OperationFuture<T, P = ()>
where
    T: Clone + Send + 'static,
    P: Send + 'static,
{
    op: Arc<PendingOperation<T, P>>,
}

impl<T, P> Clone for OperationFuture<T, P>
where
    T: Clone + Send + 'static,
    P: Send + 'static,
{
    fn clone(&self) -> Self {
        Self {
            op: self.op.clone(),
        }
    }
}

impl<T, P> std::fmt::Debug for OperationFuture<T, P>
where
    T: Clone + Send + 'static,
    P: Send + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationFuture")
            .field("status", &self.status())
            .finish()
    }
}

impl<T, P> OperationFuture<T, P>
where
    T: Clone + Send + 'static,
    P: Send + 'static,
{
    /// A future that is already in the Failed state.
    pub fn failed(error: OperationError) -> Self {
        let (promise, future) = channel();
        promise.fail(error);
        future
    }

    /// A future that is already in the Succeeded state.
    pub fn succeeded(value: T) -> Self {
        let (promise, future) = channel();
        promise.complete(value);
        future
    }

    pub fn status(&self) -> OperationStatus {
        match self.op.delivered_outcome() {
            None => OperationStatus::Pending,
            Some(Ok(_)) => OperationStatus::Succeeded,
            Some(Err(_)) => OperationStatus::Failed,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status() != OperationStatus::Pending
    }

    /// The terminal value, once observable.
    pub fn result(&self) -> Option<Outcome<T>> {
        self.op.delivered_outcome()
    }

    /// The error, if the operation failed.
    pub fn error(&self) -> Option<OperationError> {
        self.result().and_then(Result::err)
    }

    /// Run `callback` once the operation settles. If it already has, the
    /// callback runs immediately on the calling thread.
    pub fn on_completion<F>(&self, callback: F)
    where
        F: FnOnce(&Outcome<T>) + Send + 'static,
    {
        let mut inner = self.op.lock();
        if inner.delivered {
            let outcome = inner.outcome.clone();
            drop(inner);
            if let Some(outcome) = outcome {
                callback(&outcome);
            }
            return;
        }
        inner.completion_callbacks.push(Box::new(callback));
    }

    /// Run `callback` for every progress notification issued from now on.
    pub fn on_progress<F>(&self, callback: F)
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        self.op.lock().progress_callbacks.push(Arc::new(callback));
    }

    /// Block until the operation settles.
    pub fn wait(&self) -> Outcome<T> {
        let mut inner = self.op.lock();
        loop {
            if inner.delivered {
                if let Some(outcome) = inner.outcome.clone() {
                    return outcome;
                }
            }
            inner = self
                .op
                .settled
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until the operation settles or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Outcome<T>> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.op.lock();
        loop {
            if inner.delivered {
                return inner.outcome.clone();
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            inner = self
                .op
                .settled
                .wait_timeout(inner, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl<T, P> std::future::Future for OperationFuture<T, P>
where
    T: Clone + Send + 'static,
    P: Send + 'static,
{
    type Output = Outcome<T>;

    fn poll(self: std::pin::Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.op.lock();
        if inner.delivered {
            if let Some(outcome) = inner.outcome.clone() {
                return Poll::Ready(outcome);
            }
        }
        if !inner.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            inner.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    use crate::thread::ThreadHandle;

    const BOUND: Duration = Duration::from_secs(5);

    #[test]
    fn completes_once() {
        let (promise, future) = channel::<u32, ()>();
        assert_eq!(future.status(), OperationStatus::Pending);

        assert!(promise.complete(1));
        assert!(!promise.complete(2));
        assert!(!promise.fail(OperationError::new(ErrorCode::Internal, "late")));

        assert_eq!(future.status(), OperationStatus::Succeeded);
        assert_eq!(future.result(), Some(Ok(1)));
    }

    #[test]
    fn failure_then_success_keeps_failure() {
        let (promise, future) = channel::<u32, ()>();
        promise.fail(OperationError::new(ErrorCode::Unavailable, "offline"));
        promise.complete(7);

        assert_eq!(future.status(), OperationStatus::Failed);
        assert_eq!(future.error().map(|e| e.code), Some(ErrorCode::Unavailable));
    }

    #[test]
    fn completion_callback_fires_exactly_once() {
        let (promise, future) = channel::<&'static str, ()>();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        future.on_completion(move |outcome| {
            assert_eq!(outcome, &Ok("done"));
            counter.fetch_add(1, Ordering::SeqCst);
        });

        promise.complete("done");
        promise.complete("again");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callback_added_after_completion_runs_immediately() {
        let future = OperationFuture::<u8>::succeeded(3);
        let (tx, rx) = mpsc::channel();
        future.on_completion(move |outcome| tx.send(outcome.clone()).unwrap());
        assert_eq!(rx.try_recv().unwrap(), Ok(3));
    }

    #[test]
    fn already_failed_future() {
        let future = OperationFuture::<()>::failed(OperationError::instance_destroyed());
        assert_eq!(future.status(), OperationStatus::Failed);
        assert_eq!(
            future.wait().unwrap_err().code,
            ErrorCode::FailedPrecondition
        );
    }

    #[test]
    fn progress_is_ordered_and_precedes_completion() {
        let (promise, future) = channel::<u32, u32>();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let progress_log = seen.clone();
        future.on_progress(move |p| progress_log.lock().unwrap().push(format!("p{p}")));
        let done_log = seen.clone();
        future.on_completion(move |outcome| {
            done_log
                .lock()
                .unwrap()
                .push(format!("done{}", outcome.as_ref().unwrap()));
        });

        let mut worker = ThreadHandle::spawn(move || {
            for step in 1..=3 {
                assert!(promise.progress(step));
            }
            promise.complete(99);
            assert!(!promise.progress(4));
        });
        assert_eq!(future.wait_timeout(BOUND), Some(Ok(99)));
        worker.join();

        assert_eq!(*seen.lock().unwrap(), vec!["p1", "p2", "p3", "done99"]);
    }

    #[test]
    fn progress_from_a_callback_is_queued_not_reentered() {
        let (promise, future) = channel::<(), u32>();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = seen.clone();
        let inner_promise = promise.clone();
        future.on_progress(move |p| {
            log.lock().unwrap().push(*p);
            if *p == 1 {
                inner_promise.progress(2);
            }
        });

        promise.progress(1);
        promise.progress(3);
        promise.complete(());
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn panicking_progress_callback_does_not_wedge_completion() {
        let (promise, future) = channel::<u32, u32>();
        future.on_progress(|_| panic!("progress callback failed"));

        let unwound =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| promise.progress(1)));
        assert!(unwound.is_err());

        assert!(promise.complete(5));
        assert_eq!(future.wait_timeout(BOUND), Some(Ok(5)));
        assert_eq!(future.status(), OperationStatus::Succeeded);
    }

    #[test]
    fn concurrent_double_delivery_settles_once() {
        for _ in 0..50 {
            let (promise, future) = channel::<usize, ()>();
            let wins = Arc::new(AtomicUsize::new(0));
            let mut workers: Vec<ThreadHandle> = (0..4)
                .map(|i| {
                    let promise = promise.clone();
                    let wins = wins.clone();
                    ThreadHandle::spawn(move || {
                        if promise.complete(i) {
                            wins.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect();
            for worker in &mut workers {
                worker.join();
            }
            assert_eq!(wins.load(Ordering::SeqCst), 1);
            assert!(future.result().unwrap().is_ok());
        }
    }

    #[test]
    fn dropping_every_promise_cancels() {
        let (promise, future) = channel::<u8, ()>();
        let clone = promise.clone();
        drop(promise);
        assert_eq!(future.status(), OperationStatus::Pending);
        drop(clone);
        assert_eq!(future.error().map(|e| e.code), Some(ErrorCode::Cancelled));
    }

    #[test]
    fn wait_timeout_expires_while_pending() {
        let (_promise, future) = channel::<u8, ()>();
        assert_eq!(future.wait_timeout(Duration::from_millis(10)), None);
    }

    #[tokio::test]
    async fn can_be_awaited() {
        let (promise, future) = channel::<String, ()>();
        let mut worker = ThreadHandle::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            promise.complete("from backend thread".to_string());
        });
        let value = tokio::time::timeout(BOUND, future).await.unwrap().unwrap();
        assert_eq!(value, "from backend thread");
        worker.join();
    }
}
