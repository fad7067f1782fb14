// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Platform-agnostic trait definitions for native backends.
//
// A backend is whatever actually talks to the native SDK. Keel treats it as a
// black box: it reports whether setup succeeded, settles the promises it is
// handed (from any thread), pushes events into the sink it was built with,
// and releases its resources when asked.

use std::sync::Arc;

use keel_core::config::DatabaseSettings;
use keel_core::types::{
    AdParent, AdRequest, AdResult, LoadBundleProgress, NamedQuery, OperationError,
};
use keel_runtime::{ListenerSet, Promise};
use serde_json::Value;

/// Where a backend delivers its events.
pub type EventSink<E> = Arc<ListenerSet<E>>;

/// Behaviour shared by every native backend.
pub trait Backend: Send + Sync {
    /// Human-readable platform name (e.g. "Android", "in-process").
    fn platform_name(&self) -> &str;

    /// True once backend-specific setup succeeded.
    fn initialized(&self) -> bool;

    /// Release native resources. Must be idempotent; calls issued afterwards
    /// fail their promises instead of touching released state.
    fn release_all(&self);
}

/// Read/write view handed to a transaction body.
pub trait TransactionContext {
    fn get(&mut self, path: &str) -> Option<Value>;
    fn set(&mut self, path: &str, data: Value);
    fn delete(&mut self, path: &str);
}

/// Transaction body. May run more than once if the backend retries.
pub type TransactionFn =
    Box<dyn FnMut(&mut dyn TransactionContext) -> Result<(), OperationError> + Send>;

/// Document database client.
pub trait DatabaseBackend: Backend {
    fn settings(&self) -> DatabaseSettings;
    fn set_settings(&self, settings: DatabaseSettings);

    /// Resolve with the document data, or `None` if it does not exist.
    fn get_document(&self, path: String, promise: Promise<Option<Value>>);
    fn set_document(&self, path: String, data: Value, promise: Promise<()>);
    fn delete_document(&self, path: String, promise: Promise<()>);
    fn run_transaction(&self, update: TransactionFn, promise: Promise<()>);

    fn disable_network(&self, promise: Promise<()>);
    fn enable_network(&self, promise: Promise<()>);
    fn terminate(&self, promise: Promise<()>);
    fn wait_for_pending_writes(&self, promise: Promise<()>);
    fn clear_persistence(&self, promise: Promise<()>);

    /// Load a bundle, reporting progress along the way and resolving with the
    /// final progress snapshot.
    fn load_bundle(
        &self,
        bundle: String,
        promise: Promise<LoadBundleProgress, LoadBundleProgress>,
    );
    fn named_query(&self, name: String, promise: Promise<NamedQuery>);
}

/// Rewarded-ad SDK client.
pub trait AdBackend: Backend {
    fn initialize(&self, parent: AdParent, promise: Promise<()>);
    fn load_ad(&self, ad_unit_id: String, request: AdRequest, promise: Promise<AdResult>);
    /// Present the loaded ad; reward and dismissal arrive as events.
    fn show(&self, promise: Promise<()>);
}
