// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Operation bridge: issues backend calls and hands back futures.
//
// One bridge lives inside each client's internal state. Once the client is
// torn down the bridge is shut down: operations still in flight are failed
// so nobody waits forever, and new invocations fail synchronously without
// reaching the backend.

use std::fmt::Debug;
use std::sync::{Mutex, MutexGuard, PoisonError, Weak};

use keel_core::types::OperationError;
use tracing::{debug, info};

use crate::future::{Abandon, OperationFuture, Promise, channel};

struct Tracked<K> {
    kind: K,
    op: Weak<dyn Abandon>,
}

struct BridgeState<K> {
    shut_down: bool,
    pending: Vec<Tracked<K>>,
}

/// Issues asynchronous backend calls keyed by an operation-kind enum.
pub struct OperationBridge<K> {
    name: &'static str,
    state: Mutex<BridgeState<K>>,
}

impl<K> OperationBridge<K>
where
    K: Copy + Debug + PartialEq + Send + 'static,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(BridgeState {
                shut_down: false,
                pending: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BridgeState<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start an operation.
    ///
    /// `call` receives the promise and must arrange for it to be settled,
    /// typically from a backend callback thread. It runs on the calling
    /// thread; the future is returned as soon as `call` returns. After
    /// [`shut_down`](Self::shut_down) the call is skipped and the returned
    /// future has already failed.
    pub fn invoke<T, P, F>(&self, kind: K, call: F) -> OperationFuture<T, P>
    where
        T: Clone + Send + 'static,
        P: Send + 'static,
        F: FnOnce(Promise<T, P>),
    {
        self.start(kind, |_| {}, call)
    }

    /// Like [`invoke`](Self::invoke), with `on_progress` attached before the
    /// backend sees the promise so no early progress is missed.
    pub fn invoke_with_progress<T, P, G, F>(
        &self,
        kind: K,
        on_progress: G,
        call: F,
    ) -> OperationFuture<T, P>
    where
        T: Clone + Send + 'static,
        P: Send + 'static,
        G: Fn(&P) + Send + Sync + 'static,
        F: FnOnce(Promise<T, P>),
    {
        self.start(kind, move |future| future.on_progress(on_progress), call)
    }

    fn start<T, P, O, F>(&self, kind: K, observe: O, call: F) -> OperationFuture<T, P>
    where
        T: Clone + Send + 'static,
        P: Send + 'static,
        O: FnOnce(&OperationFuture<T, P>),
        F: FnOnce(Promise<T, P>),
    {
        let (promise, future) = {
            let mut state = self.lock();
            if state.shut_down {
                debug!(bridge = self.name, operation = ?kind, "invoke after shutdown");
                return OperationFuture::failed(OperationError::instance_destroyed());
            }
            state.pending.retain(|t| t.op.upgrade().is_some_and(|op| !op.is_settled()));
            let (promise, future) = channel::<T, P>();
            state.pending.push(Tracked {
                kind,
                op: promise.abandon_handle(),
            });
            (promise, future)
        };

        observe(&future);
        debug!(bridge = self.name, operation = ?kind, "issuing backend call");
        call(promise);
        future
    }

    /// Whether [`shut_down`](Self::shut_down) has run.
    pub fn is_shut_down(&self) -> bool {
        self.lock().shut_down
    }

    /// Number of operations issued and not yet settled.
    pub fn pending_count(&self) -> usize {
        self.lock()
            .pending
            .iter()
            .filter(|t| t.op.upgrade().is_some_and(|op| !op.is_settled()))
            .count()
    }

    /// Number of unsettled operations of one kind.
    pub fn pending_of(&self, kind: K) -> usize {
        self.lock()
            .pending
            .iter()
            .filter(|t| t.kind == kind)
            .filter(|t| t.op.upgrade().is_some_and(|op| !op.is_settled()))
            .count()
    }

    /// Refuse further calls and fail whatever is still in flight.
    ///
    /// Returns how many operations were abandoned. Idempotent.
    pub fn shut_down(&self) -> usize {
        let pending = {
            let mut state = self.lock();
            if state.shut_down {
                return 0;
            }
            state.shut_down = true;
            std::mem::take(&mut state.pending)
        };

        // Settle outside the bridge lock: settling runs completion callbacks.
        let abandoned = pending
            .into_iter()
            .filter_map(|t| t.op.upgrade())
            .filter(|op| op.abandon(OperationError::abandoned()))
            .count();
        if abandoned > 0 {
            info!(bridge = self.name, abandoned, "failed in-flight operations on shutdown");
        }
        abandoned
    }
}
