// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Listener sets for backend-originated events.
//
// The set has its own lock, separate from any cleanup notifier lock, and
// that lock is never held while user callbacks run. Each listener sits in a
// slot with a per-slot lock held for the duration of its invocation, so
// `clear` can wait out invocations already in flight on other threads. After
// `clear` returns no callback is running and none will run again.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::debug;

/// Identifies one registered listener. Unique across all sets in the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerToken(u64);

impl ListenerToken {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

type Callback<E> = Box<dyn Fn(&E) + Send + Sync>;

thread_local! {
    /// Tokens whose callbacks are running on this thread.
    static DISPATCHING: RefCell<Vec<ListenerToken>> = const { RefCell::new(Vec::new()) };
}

fn is_dispatching(token: ListenerToken) -> bool {
    DISPATCHING.with(|d| d.borrow().contains(&token))
}

struct DispatchGuard(ListenerToken);

impl DispatchGuard {
    fn enter(token: ListenerToken) -> Self {
        DISPATCHING.with(|d| d.borrow_mut().push(token));
        Self(token)
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        DISPATCHING.with(|d| {
            let mut active = d.borrow_mut();
            if let Some(pos) = active.iter().rposition(|t| *t == self.0) {
                active.remove(pos);
            }
        });
    }
}

struct Slot<E> {
    token: ListenerToken,
    active: AtomicBool,
    callback: Mutex<Option<Callback<E>>>,
}

impl<E> Slot<E> {
    fn lock(&self) -> MutexGuard<'_, Option<Callback<E>>> {
        self.callback.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn invoke(&self, event: &E) -> bool {
        if !self.active.load(Ordering::Acquire) || is_dispatching(self.token) {
            return false;
        }
        let guard = self.lock();
        // Muted while we waited for the slot.
        if !self.active.load(Ordering::Acquire) {
            return false;
        }
        let Some(callback) = guard.as_ref() else {
            return false;
        };
        let _dispatch = DispatchGuard::enter(self.token);
        callback(event);
        true
    }

    /// Stop future invocations and wait for one in flight on another thread.
    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
        if is_dispatching(self.token) {
            // Deactivated from inside its own callback; the flag is enough.
            return;
        }
        let callback = self.lock().take();
        drop(callback);
    }
}

struct SetState<E> {
    slots: Vec<Arc<Slot<E>>>,
    muted: bool,
}

/// Token → callback registry for one client's events.
pub struct ListenerSet<E> {
    state: Mutex<SetState<E>>,
}

impl<E: 'static> ListenerSet<E> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SetState {
                slots: Vec::new(),
                muted: false,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SetState<E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `callback`. On a cleared set the registration is inert.
    pub fn add<F>(self: &Arc<Self>, callback: F) -> ListenerRegistration<E>
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let token = ListenerToken::next();
        let mut state = self.lock();
        if state.muted {
            debug!(?token, "listener added to a cleared set; ignoring");
            return ListenerRegistration {
                token,
                set: Weak::new(),
            };
        }
        state.slots.push(Arc::new(Slot {
            token,
            active: AtomicBool::new(true),
            callback: Mutex::new(Some(Box::new(callback))),
        }));
        ListenerRegistration {
            token,
            set: Arc::downgrade(self),
        }
    }

    /// Unregister one listener. Returns whether it was registered.
    pub fn remove(&self, token: ListenerToken) -> bool {
        let slot = {
            let mut state = self.lock();
            let Some(pos) = state.slots.iter().position(|s| s.token == token) else {
                return false;
            };
            state.slots.remove(pos)
        };
        slot.deactivate();
        true
    }

    /// Deliver `event` to every active listener. Returns how many ran.
    pub fn notify(&self, event: &E) -> usize {
        let slots = {
            let state = self.lock();
            if state.muted {
                return 0;
            }
            state.slots.clone()
        };
        slots.iter().filter(|slot| slot.invoke(event)).count()
    }

    /// Mute the set and drop every listener.
    ///
    /// Blocks until invocations running on other threads have returned.
    pub fn clear(&self) {
        let slots = {
            let mut state = self.lock();
            state.muted = true;
            std::mem::take(&mut state.slots)
        };
        let count = slots.len();
        for slot in slots {
            slot.deactivate();
        }
        debug!(count, "listener set cleared");
    }

    pub fn is_muted(&self) -> bool {
        self.lock().muted
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle returned from [`ListenerSet::add`].
///
/// Dropping it does not unregister; call [`remove`](Self::remove).
pub struct ListenerRegistration<E> {
    token: ListenerToken,
    set: Weak<ListenerSet<E>>,
}

impl<E> std::fmt::Debug for ListenerRegistration<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("token", &self.token)
            .finish()
    }
}

impl<E: 'static> ListenerRegistration<E> {
    /// A registration attached to nothing.
    pub fn inert() -> Self {
        Self {
            token: ListenerToken::next(),
            set: Weak::new(),
        }
    }

    pub fn token(&self) -> ListenerToken {
        self.token
    }

    /// Whether the listener can still be invoked.
    pub fn is_active(&self) -> bool {
        self.set.upgrade().is_some_and(|set| {
            set.lock().slots.iter().any(|s| s.token == self.token)
        })
    }

    /// Unregister. Safe to call repeatedly and after the set is gone.
    pub fn remove(&self) {
        if let Some(set) = self.set.upgrade() {
            set.remove(self.token);
        }
    }
}
