// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Stub backend for targets where no native SDK is linked in.
//
// It never reports itself initialised, so client creation fails with
// `MissingDependency`; any call that reaches it anyway fails with
// `Unavailable`.

use std::sync::{Mutex, PoisonError};

use keel_core::config::DatabaseSettings;
use keel_core::types::{
    AdParent, AdRequest, AdResult, ErrorCode, LoadBundleProgress, NamedQuery, OperationError,
};
use keel_runtime::Promise;
use serde_json::Value;

use crate::traits::*;

fn unavailable<T: Clone + Send + 'static, P: Send + 'static>(
    call: &str,
    promise: Promise<T, P>,
) {
    tracing::warn!(call, "backend call on stub backend");
    promise.fail(OperationError::new(
        ErrorCode::Unavailable,
        format!("{call} is not available on this platform"),
    ));
}

/// Backend returned when the native SDK is unavailable.
#[derive(Debug, Default)]
pub struct UnavailableBackend {
    settings: Mutex<DatabaseSettings>,
}

impl UnavailableBackend {
    pub fn new(settings: DatabaseSettings) -> Self {
        Self {
            settings: Mutex::new(settings),
        }
    }
}

impl Backend for UnavailableBackend {
    fn platform_name(&self) -> &str {
        "unavailable (stub)"
    }

    fn initialized(&self) -> bool {
        false
    }

    fn release_all(&self) {}
}

impl DatabaseBackend for UnavailableBackend {
    fn settings(&self) -> DatabaseSettings {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_settings(&self, settings: DatabaseSettings) {
        *self.settings.lock().unwrap_or_else(PoisonError::into_inner) = settings;
    }

    fn get_document(&self, _path: String, promise: Promise<Option<Value>>) {
        unavailable("get_document", promise);
    }

    fn set_document(&self, _path: String, _data: Value, promise: Promise<()>) {
        unavailable("set_document", promise);
    }

    fn delete_document(&self, _path: String, promise: Promise<()>) {
        unavailable("delete_document", promise);
    }

    fn run_transaction(&self, _update: TransactionFn, promise: Promise<()>) {
        unavailable("run_transaction", promise);
    }

    fn disable_network(&self, promise: Promise<()>) {
        unavailable("disable_network", promise);
    }

    fn enable_network(&self, promise: Promise<()>) {
        unavailable("enable_network", promise);
    }

    fn terminate(&self, promise: Promise<()>) {
        unavailable("terminate", promise);
    }

    fn wait_for_pending_writes(&self, promise: Promise<()>) {
        unavailable("wait_for_pending_writes", promise);
    }

    fn clear_persistence(&self, promise: Promise<()>) {
        unavailable("clear_persistence", promise);
    }

    fn load_bundle(
        &self,
        _bundle: String,
        promise: Promise<LoadBundleProgress, LoadBundleProgress>,
    ) {
        unavailable("load_bundle", promise);
    }

    fn named_query(&self, _name: String, promise: Promise<NamedQuery>) {
        unavailable("named_query", promise);
    }
}

impl AdBackend for UnavailableBackend {
    fn initialize(&self, _parent: AdParent, promise: Promise<()>) {
        unavailable("initialize", promise);
    }

    fn load_ad(&self, _ad_unit_id: String, _request: AdRequest, promise: Promise<AdResult>) {
        unavailable("load_ad", promise);
    }

    fn show(&self, promise: Promise<()>) {
        unavailable("show", promise);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_runtime::channel;

    #[test]
    fn never_initialised() {
        let stub = UnavailableBackend::default();
        assert!(!stub.initialized());
        stub.release_all();
    }

    #[test]
    fn calls_fail_synchronously() {
        let stub = UnavailableBackend::default();
        let (promise, future) = channel::<(), ()>();
        stub.show(promise);
        assert_eq!(future.error().map(|e| e.code), Some(ErrorCode::Unavailable));
    }
}
