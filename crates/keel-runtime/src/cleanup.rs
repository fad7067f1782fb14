// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Cleanup notifications.
//
// An owner (an app) keeps one notifier and tells it to run when the owner is
// destroyed; every object scoped to that owner registers a callback. Client
// internals keep a second notifier for sub-objects that must be released
// before the backend. Callbacks run last-registered-first, with the notifier
// lock released.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

/// Key an object registers under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CleanupKey(u64);

impl CleanupKey {
    /// A fresh key, unique within the process.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

type CleanupCallback = Box<dyn FnOnce() + Send>;

struct Entry {
    key: CleanupKey,
    callback: CleanupCallback,
}

/// Ordered set of cleanup callbacks.
pub struct CleanupNotifier {
    label: &'static str,
    entries: Mutex<Vec<Entry>>,
}

impl std::fmt::Debug for CleanupNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupNotifier")
            .field("label", &self.label)
            .field("registered", &self.len())
            .finish()
    }
}

impl CleanupNotifier {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            entries: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `callback` to run on [`cleanup_all`](Self::cleanup_all).
    ///
    /// Returns `false` and keeps the existing callback if `key` is already
    /// registered.
    pub fn register_object<F>(&self, key: CleanupKey, callback: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut entries = self.lock();
        if entries.iter().any(|e| e.key == key) {
            warn!(notifier = self.label, ?key, "object already registered for cleanup");
            return false;
        }
        entries.push(Entry {
            key,
            callback: Box::new(callback),
        });
        true
    }

    /// Drop the callback registered under `key` without running it.
    pub fn unregister_object(&self, key: CleanupKey) -> bool {
        let removed = {
            let mut entries = self.lock();
            entries
                .iter()
                .position(|e| e.key == key)
                .map(|pos| entries.remove(pos))
        };
        // The callback may own user state; drop it outside the lock.
        removed.is_some()
    }

    pub fn is_registered(&self, key: CleanupKey) -> bool {
        self.lock().iter().any(|e| e.key == key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every registered callback, most recent first.
    ///
    /// Objects registered by a callback while this runs are cleaned up too.
    /// Returns how many callbacks ran.
    pub fn cleanup_all(&self) -> usize {
        let mut ran = 0;
        loop {
            let batch = std::mem::take(&mut *self.lock());
            if batch.is_empty() {
                break;
            }
            for entry in batch.into_iter().rev() {
                (entry.callback)();
                ran += 1;
            }
        }
        if ran > 0 {
            debug!(notifier = self.label, ran, "cleanup complete");
        }
        ran
    }
}
