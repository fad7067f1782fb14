// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Document database client.
//
// One live `Database` exists per app. It is created on first use, cached in
// the process-wide registry, and torn down either explicitly or when its app
// is destroyed. Every call after teardown fails fast without reaching the
// backend.

use std::sync::{Arc, Weak};

use keel_bridge::traits::{DatabaseBackend, EventSink, TransactionContext};
use keel_core::config::DatabaseSettings;
use keel_core::error::{KeelError, Result};
use keel_core::types::{
    DatabaseEvent, InstanceId, LoadBundleProgress, NamedQuery, OperationError, OwnerId,
};
use keel_runtime::{
    CleanupKey, CleanupNotifier, ListenerRegistration, ListenerSet, OperationBridge,
    OperationFuture, Promise,
};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::app::App;
use crate::lifecycle::{LifecycleCoordinator, TeardownSteps, TeardownTrigger};
use crate::registry::{InstanceRegistry, RegisteredInstance};

static REGISTRY: InstanceRegistry<Database> = InstanceRegistry::new("database");

/// Backend calls a database issues, for bookkeeping and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseOp {
    GetDocument,
    SetDocument,
    DeleteDocument,
    RunTransaction,
    DisableNetwork,
    EnableNetwork,
    Terminate,
    WaitForPendingWrites,
    ClearPersistence,
    LoadBundle,
    NamedQuery,
}

/// Everything the client owns besides its identity.
struct Internal {
    backend: Box<dyn DatabaseBackend>,
    listeners: EventSink<DatabaseEvent>,
    /// Sub-objects (listener registrations) released before the backend.
    cleanup: CleanupNotifier,
    bridge: OperationBridge<DatabaseOp>,
}

/// Handle to an app's document database.
pub struct Database {
    id: InstanceId,
    owner: OwnerId,
    app_id: String,
    owner_cleanup: Weak<CleanupNotifier>,
    owner_key: CleanupKey,
    lifecycle: LifecycleCoordinator,
    internal: Internal,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("state", &self.lifecycle.state())
            .finish()
    }
}

fn validate_document_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(KeelError::InvalidArgument("document path must not be empty".into()));
    }
    let segments: Vec<&str> = path.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(KeelError::InvalidArgument(format!(
            "document path '{path}' contains an empty segment"
        )));
    }
    if segments.len() % 2 != 0 {
        return Err(KeelError::InvalidArgument(format!(
            "document path '{path}' must have an even number of segments"
        )));
    }
    Ok(())
}

impl Database {
    /// The database for `app`, created on first use.
    pub fn get_instance(app: &App) -> Result<Arc<Self>> {
        Self::get_instance_with(app, |events| {
            keel_bridge::database_backend(app.options(), events)
        })
    }

    /// Like [`get_instance`](Self::get_instance), building the backend with
    /// `make_backend` if no instance exists yet.
    pub fn get_instance_with<F>(app: &App, make_backend: F) -> Result<Arc<Self>>
    where
        F: FnOnce(EventSink<DatabaseEvent>) -> Result<Box<dyn DatabaseBackend>>,
    {
        REGISTRY.get_or_create(app.id(), || Self::build(app, make_backend))
    }

    /// Register a new database for `app` around a caller-supplied backend.
    ///
    /// Aborts the process if `app` already has a live database.
    pub fn create_with_backend<F>(app: &App, make_backend: F) -> Result<Arc<Self>>
    where
        F: FnOnce(EventSink<DatabaseEvent>) -> Result<Box<dyn DatabaseBackend>>,
    {
        REGISTRY.create_new(app.id(), || Self::build(app, make_backend))
    }

    /// Whether `owner` currently has a registered database.
    pub fn is_registered(owner: OwnerId) -> bool {
        REGISTRY.contains(owner)
    }

    fn build<F>(app: &App, make_backend: F) -> Result<Arc<Self>>
    where
        F: FnOnce(EventSink<DatabaseEvent>) -> Result<Box<dyn DatabaseBackend>>,
    {
        let listeners = ListenerSet::new();
        let backend = make_backend(listeners.clone())?;
        let initialized = backend.initialized();
        let id = InstanceId::new();

        let db = Arc::new(Self {
            id,
            owner: app.id(),
            app_id: app.options().app_id.clone(),
            owner_cleanup: app.cleanup_handle(),
            owner_key: CleanupKey::next(),
            lifecycle: LifecycleCoordinator::new("database", id, app.id()),
            internal: Internal {
                backend,
                listeners,
                cleanup: CleanupNotifier::new("database-internal"),
                bridge: OperationBridge::new("database"),
            },
        });

        if initialized {
            let weak = Arc::downgrade(&db);
            app.cleanup().register_object(db.owner_key, move || {
                if let Some(db) = weak.upgrade() {
                    db.lifecycle.teardown(db.as_ref(), TeardownTrigger::OwnerDestroyed);
                }
            });
        }
        Ok(db)
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn platform_name(&self) -> &str {
        self.internal.backend.platform_name()
    }

    /// False once teardown has started.
    pub fn is_live(&self) -> bool {
        self.lifecycle.is_live()
    }

    /// Operations issued and not yet settled.
    pub fn pending_operations(&self) -> usize {
        self.internal.bridge.pending_count()
    }

    /// Tear the client down now. Idempotent.
    pub fn destroy(&self) {
        self.lifecycle.teardown(self, TeardownTrigger::Explicit);
    }

    fn invoke<T, P, F>(&self, op: DatabaseOp, call: F) -> OperationFuture<T, P>
    where
        T: Clone + Send + 'static,
        P: Send + 'static,
        F: FnOnce(&dyn DatabaseBackend, Promise<T, P>),
    {
        if !self.lifecycle.is_live() {
            return OperationFuture::failed(OperationError::instance_destroyed());
        }
        let backend = self.internal.backend.as_ref();
        self.internal.bridge.invoke(op, |promise| call(backend, promise))
    }

    // -- Settings --

    /// Current settings, or the defaults once torn down.
    pub fn settings(&self) -> DatabaseSettings {
        if !self.lifecycle.is_live() {
            return DatabaseSettings::default();
        }
        self.internal.backend.settings()
    }

    pub fn set_settings(&self, settings: DatabaseSettings) -> Result<()> {
        settings
            .validate()
            .map_err(|e| KeelError::InvalidArgument(e.to_string()))?;
        if !self.lifecycle.is_live() {
            debug!(instance = %self.id, "set_settings on a destroyed database ignored");
            return Ok(());
        }
        self.internal.backend.set_settings(settings);
        Ok(())
    }

    // -- Documents --

    pub fn get_document(&self, path: &str) -> Result<OperationFuture<Option<Value>>> {
        validate_document_path(path)?;
        let path = path.to_owned();
        Ok(self.invoke(DatabaseOp::GetDocument, |backend, promise| {
            backend.get_document(path, promise)
        }))
    }

    pub fn set_document(&self, path: &str, data: Value) -> Result<OperationFuture<()>> {
        validate_document_path(path)?;
        let path = path.to_owned();
        Ok(self.invoke(DatabaseOp::SetDocument, |backend, promise| {
            backend.set_document(path, data, promise)
        }))
    }

    pub fn delete_document(&self, path: &str) -> Result<OperationFuture<()>> {
        validate_document_path(path)?;
        let path = path.to_owned();
        Ok(self.invoke(DatabaseOp::DeleteDocument, |backend, promise| {
            backend.delete_document(path, promise)
        }))
    }

    /// Run `update` atomically. It may run more than once.
    pub fn run_transaction<F>(&self, update: F) -> OperationFuture<()>
    where
        F: FnMut(&mut dyn TransactionContext) -> std::result::Result<(), OperationError>
            + Send
            + 'static,
    {
        self.invoke(DatabaseOp::RunTransaction, |backend, promise| {
            backend.run_transaction(Box::new(update), promise)
        })
    }

    // -- Network and persistence --

    pub fn disable_network(&self) -> OperationFuture<()> {
        self.invoke(DatabaseOp::DisableNetwork, |backend, promise| {
            backend.disable_network(promise)
        })
    }

    pub fn enable_network(&self) -> OperationFuture<()> {
        self.invoke(DatabaseOp::EnableNetwork, |backend, promise| {
            backend.enable_network(promise)
        })
    }

    /// Unregister this instance and shut the backend down.
    ///
    /// The next [`get_instance`](Self::get_instance) for the same app builds
    /// a fresh database. This one stays usable for
    /// [`clear_persistence`](Self::clear_persistence).
    pub fn terminate(&self) -> OperationFuture<()> {
        if !self.lifecycle.is_live() {
            return OperationFuture::failed(OperationError::instance_destroyed());
        }
        REGISTRY.remove(self.owner, self.id);
        self.invoke(DatabaseOp::Terminate, |backend, promise| backend.terminate(promise))
    }

    pub fn wait_for_pending_writes(&self) -> OperationFuture<()> {
        self.invoke(DatabaseOp::WaitForPendingWrites, |backend, promise| {
            backend.wait_for_pending_writes(promise)
        })
    }

    pub fn clear_persistence(&self) -> OperationFuture<()> {
        self.invoke(DatabaseOp::ClearPersistence, |backend, promise| {
            backend.clear_persistence(promise)
        })
    }

    // -- Bundles --

    pub fn load_bundle(
        &self,
        bundle: impl Into<String>,
    ) -> Result<OperationFuture<LoadBundleProgress, LoadBundleProgress>> {
        let bundle = Self::check_bundle(bundle.into())?;
        Ok(self.invoke(DatabaseOp::LoadBundle, |backend, promise| {
            backend.load_bundle(bundle, promise)
        }))
    }

    /// Load a bundle, calling `on_progress` for every progress snapshot.
    #[instrument(skip_all, fields(instance = %self.id))]
    pub fn load_bundle_with_progress<F>(
        &self,
        bundle: impl Into<String>,
        on_progress: F,
    ) -> Result<OperationFuture<LoadBundleProgress, LoadBundleProgress>>
    where
        F: Fn(&LoadBundleProgress) + Send + Sync + 'static,
    {
        let bundle = Self::check_bundle(bundle.into())?;
        if !self.lifecycle.is_live() {
            return Ok(OperationFuture::failed(OperationError::instance_destroyed()));
        }
        let backend = self.internal.backend.as_ref();
        Ok(self.internal.bridge.invoke_with_progress(
            DatabaseOp::LoadBundle,
            on_progress,
            |promise| backend.load_bundle(bundle, promise),
        ))
    }

    fn check_bundle(bundle: String) -> Result<String> {
        if bundle.trim().is_empty() {
            return Err(KeelError::InvalidArgument("bundle must not be empty".into()));
        }
        Ok(bundle)
    }

    pub fn named_query(&self, name: &str) -> Result<OperationFuture<NamedQuery>> {
        if name.is_empty() {
            return Err(KeelError::InvalidArgument("query name must not be empty".into()));
        }
        let name = name.to_owned();
        Ok(self.invoke(DatabaseOp::NamedQuery, |backend, promise| {
            backend.named_query(name, promise)
        }))
    }

    // -- Listeners --

    /// Call `callback` whenever all snapshot listeners are in sync.
    ///
    /// On a destroyed database the registration is inert.
    pub fn add_snapshots_in_sync_listener<F>(
        &self,
        callback: F,
    ) -> ListenerRegistration<DatabaseEvent>
    where
        F: Fn() + Send + Sync + 'static,
    {
        if !self.lifecycle.is_live() {
            return ListenerRegistration::inert();
        }
        let registration = self.internal.listeners.add(move |event| match event {
            DatabaseEvent::SnapshotsInSync => callback(),
        });

        let set = Arc::downgrade(&self.internal.listeners);
        let token = registration.token();
        self.internal
            .cleanup
            .register_object(CleanupKey::next(), move || {
                if let Some(set) = set.upgrade() {
                    set.remove(token);
                }
            });
        registration
    }
}

impl RegisteredInstance for Database {
    fn instance_id(&self) -> InstanceId {
        self.id
    }

    fn is_initialized(&self) -> bool {
        self.internal.backend.initialized()
    }

    fn is_tearing_down(&self) -> bool {
        !self.lifecycle.is_live()
    }
}

impl TeardownSteps for Database {
    fn unregister_from_owner(&self) {
        if let Some(owner) = self.owner_cleanup.upgrade() {
            owner.unregister_object(self.owner_key);
        }
    }

    fn clear_listeners(&self) {
        self.internal.listeners.clear();
    }

    fn run_internal_cleanup(&self) {
        self.internal.cleanup.cleanup_all();
        self.internal.bridge.shut_down();
    }

    fn release_backend(&self) {
        self.internal.backend.release_all();
    }

    fn remove_from_registry(&self) {
        REGISTRY.remove(self.owner, self.id);
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.lifecycle.teardown(&*self, TeardownTrigger::Explicit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Barrier, Mutex, mpsc};
    use std::time::Duration;

    use keel_bridge::stub::UnavailableBackend;
    use keel_bridge::traits::{Backend, TransactionFn};
    use keel_core::config::AppOptions;
    use keel_core::types::{ErrorCode, LoadBundleState};
    use keel_runtime::{OperationStatus, ThreadHandle};
    use serde_json::json;

    const BOUND: Duration = Duration::from_secs(5);

    fn app() -> App {
        App::create(AppOptions::default()).unwrap()
    }

    /// Backend that records calls and never answers.
    #[derive(Default)]
    struct HoldingBackend {
        calls: Arc<AtomicUsize>,
        released: Arc<AtomicBool>,
        held: Mutex<Vec<Box<dyn Any + Send>>>,
    }

    impl HoldingBackend {
        fn hold<T: Any + Send>(&self, promise: T) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.held.lock().unwrap().push(Box::new(promise));
        }
    }

    impl Backend for HoldingBackend {
        fn platform_name(&self) -> &str {
            "holding"
        }
        fn initialized(&self) -> bool {
            !self.released.load(Ordering::SeqCst)
        }
        fn release_all(&self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    impl DatabaseBackend for HoldingBackend {
        fn settings(&self) -> DatabaseSettings {
            DatabaseSettings::default()
        }
        fn set_settings(&self, _settings: DatabaseSettings) {}
        fn get_document(&self, _path: String, promise: Promise<Option<Value>>) {
            self.hold(promise);
        }
        fn set_document(&self, _path: String, _data: Value, promise: Promise<()>) {
            self.hold(promise);
        }
        fn delete_document(&self, _path: String, promise: Promise<()>) {
            self.hold(promise);
        }
        fn run_transaction(&self, _update: TransactionFn, promise: Promise<()>) {
            self.hold(promise);
        }
        fn disable_network(&self, promise: Promise<()>) {
            self.hold(promise);
        }
        fn enable_network(&self, promise: Promise<()>) {
            self.hold(promise);
        }
        fn terminate(&self, promise: Promise<()>) {
            self.hold(promise);
        }
        fn wait_for_pending_writes(&self, promise: Promise<()>) {
            self.hold(promise);
        }
        fn clear_persistence(&self, promise: Promise<()>) {
            self.hold(promise);
        }
        fn load_bundle(
            &self,
            _bundle: String,
            promise: Promise<LoadBundleProgress, LoadBundleProgress>,
        ) {
            self.hold(promise);
        }
        fn named_query(&self, _name: String, promise: Promise<NamedQuery>) {
            self.hold(promise);
        }
    }

    #[test]
    fn get_instance_is_cached_per_app() {
        let app = app();
        let first = Database::get_instance(&app).unwrap();
        let second = Database::get_instance(&app).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Database::is_registered(app.id()));
        assert_eq!(first.platform_name(), "in-process");

        let other = app_other();
        let third = Database::get_instance(&other).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    fn app_other() -> App {
        App::create_named("other", AppOptions::default()).unwrap()
    }

    #[test]
    fn two_threads_share_one_backend() {
        let app = Arc::new(app());
        let constructed = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(2));
        let (tx, rx) = mpsc::channel();

        let mut threads: Vec<_> = (0..2)
            .map(|_| {
                let app = app.clone();
                let constructed = constructed.clone();
                let barrier = barrier.clone();
                let tx = tx.clone();
                ThreadHandle::spawn(move || {
                    barrier.wait();
                    let db = Database::get_instance_with(&app, |_events| {
                        constructed.fetch_add(1, Ordering::SeqCst);
                        Ok(Box::new(HoldingBackend::default()) as Box<dyn DatabaseBackend>)
                    })
                    .unwrap();
                    tx.send(db.id()).unwrap();
                })
            })
            .collect();
        for thread in &mut threads {
            thread.join();
        }

        let a = rx.recv_timeout(BOUND).unwrap();
        let b = rx.recv_timeout(BOUND).unwrap();
        assert_eq!(a, b);
        assert_eq!(constructed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn uninitialised_backend_is_missing_dependency() {
        let app = app();
        let result = Database::get_instance_with(&app, |_events| {
            Ok(Box::new(UnavailableBackend::default()) as Box<dyn DatabaseBackend>)
        });
        assert!(matches!(result, Err(KeelError::MissingDependency(_))));
        assert!(!Database::is_registered(app.id()));
        assert_eq!(app.registered_objects(), 0);
    }

    #[tokio::test]
    async fn documents_round_trip() {
        let app = app();
        let db = Database::get_instance(&app).unwrap();
        db.set_document("users/ada", json!({"born": 1815}))
            .unwrap()
            .await
            .unwrap();
        let doc = db.get_document("users/ada").unwrap().await.unwrap();
        assert_eq!(doc, Some(json!({"born": 1815})));

        db.delete_document("users/ada").unwrap().await.unwrap();
        assert_eq!(db.get_document("users/ada").unwrap().await.unwrap(), None);
    }

    #[tokio::test]
    async fn transaction_updates_atomically() {
        let app = app();
        let db = Database::get_instance(&app).unwrap();
        db.set_document("counters/visits", json!(1)).unwrap().await.unwrap();

        db.run_transaction(|tx| {
            let current = tx.get("counters/visits").and_then(|v| v.as_i64()).unwrap_or(0);
            tx.set("counters/visits", json!(current + 1));
            Ok(())
        })
        .await
        .unwrap();

        let value = db.get_document("counters/visits").unwrap().await.unwrap();
        assert_eq!(value, Some(json!(2)));
    }

    #[test]
    fn invalid_arguments_never_reach_the_backend() {
        let app = app();
        let backend = HoldingBackend::default();
        let calls = backend.calls.clone();
        let db = Database::get_instance_with(&app, move |_events| {
            Ok(Box::new(backend) as Box<dyn DatabaseBackend>)
        })
        .unwrap();

        for path in ["", "users", "users//ada", "/users/ada"] {
            assert!(matches!(
                db.get_document(path),
                Err(KeelError::InvalidArgument(_))
            ));
        }
        assert!(matches!(db.named_query(""), Err(KeelError::InvalidArgument(_))));
        assert!(matches!(db.load_bundle("  "), Err(KeelError::InvalidArgument(_))));
        let bad = DatabaseSettings {
            cache_size_bytes: Some(1),
            ..DatabaseSettings::default()
        };
        assert!(matches!(db.set_settings(bad), Err(KeelError::InvalidArgument(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn calls_after_destroy_fail_without_reaching_the_backend() {
        let app = app();
        let backend = HoldingBackend::default();
        let calls = backend.calls.clone();
        let released = backend.released.clone();
        let db = Database::get_instance_with(&app, move |_events| {
            Ok(Box::new(backend) as Box<dyn DatabaseBackend>)
        })
        .unwrap();

        db.destroy();
        db.destroy();
        assert!(!db.is_live());
        assert!(released.load(Ordering::SeqCst));
        assert!(!Database::is_registered(app.id()));
        assert_eq!(app.registered_objects(), 0);

        let future = db.enable_network();
        assert_eq!(future.status(), OperationStatus::Failed);
        assert_eq!(future.error(), Some(OperationError::instance_destroyed()));
        assert_eq!(
            db.get_document("a/b").unwrap().error(),
            Some(OperationError::instance_destroyed())
        );
        assert_eq!(db.settings(), DatabaseSettings::default());
        assert!(!db.add_snapshots_in_sync_listener(|| {}).is_active());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn teardown_fails_pending_operations() {
        let app = app();
        let backend = HoldingBackend::default();
        let db = Database::get_instance_with(&app, move |_events| {
            Ok(Box::new(backend) as Box<dyn DatabaseBackend>)
        })
        .unwrap();

        let pending = db.wait_for_pending_writes();
        assert_eq!(db.pending_operations(), 1);
        db.destroy();

        let err = pending.wait_timeout(BOUND).unwrap().unwrap_err();
        assert_eq!(err.code, ErrorCode::FailedPrecondition);
        assert_eq!(db.pending_operations(), 0);
    }

    #[test]
    fn owner_destruction_tears_the_database_down() {
        let app = app();
        let owner = app.id();
        let db = Database::get_instance(&app).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let registration = db.add_snapshots_in_sync_listener(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(registration.is_active());

        drop(app);

        assert!(!db.is_live());
        assert!(!Database::is_registered(owner));
        assert!(!registration.is_active());
        registration.remove();
        assert_eq!(
            db.disable_network().error(),
            Some(OperationError::instance_destroyed())
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn teardown_waits_for_a_running_listener_without_deadlock() {
        let app = app();
        let db = Database::get_instance(&app).unwrap();
        let (entered_tx, entered_rx) = mpsc::channel();
        let entered_tx = Mutex::new(entered_tx);
        let finished = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicUsize::new(0));

        let done = finished.clone();
        let counter = calls.clone();
        db.add_snapshots_in_sync_listener(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = entered_tx.lock().unwrap().send(());
            std::thread::sleep(Duration::from_millis(100));
            done.store(true, Ordering::SeqCst);
        });

        let write = db.set_document("a/b", json!(1)).unwrap();
        entered_rx.recv_timeout(BOUND).unwrap();

        let remote = db.clone();
        let mut destroyer = ThreadHandle::spawn(move || remote.destroy());
        destroyer.join();

        // `clear` returned only after the running callback did.
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(write.wait_timeout(BOUND), Some(Ok(())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(db.set_document("a/c", json!(2)).unwrap().is_complete());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn destroy_from_a_pending_writes_callback_completes() {
        let app = app();
        let db = Database::get_instance(&app).unwrap();
        db.disable_network().wait_timeout(BOUND).unwrap().unwrap();
        db.set_document("a/b", json!(1))
            .unwrap()
            .wait_timeout(BOUND)
            .unwrap()
            .unwrap();

        let (tx, rx) = mpsc::channel();
        let remote = db.clone();
        let waiting = db.wait_for_pending_writes();
        waiting.on_completion(move |_| {
            remote.destroy();
            let _ = tx.send(());
        });
        let _ = db.enable_network();

        rx.recv_timeout(BOUND)
            .expect("destroy from a completion callback returns");
        assert_eq!(waiting.wait_timeout(BOUND), Some(Ok(())));
        assert!(!db.is_live());
        assert!(!Database::is_registered(app.id()));
    }

    #[tokio::test]
    async fn terminate_makes_room_for_a_fresh_instance() {
        let app = app();
        let old = Database::get_instance(&app).unwrap();
        old.set_document("a/b", json!(1)).unwrap().await.unwrap();

        old.terminate().await.unwrap();
        assert!(!Database::is_registered(app.id()));
        old.clear_persistence().await.unwrap();

        let fresh = Database::get_instance(&app).unwrap();
        assert_ne!(fresh.id(), old.id());
        assert_eq!(fresh.get_document("a/b").unwrap().await.unwrap(), None);

        // Tearing the old instance down leaves the new entry alone.
        old.destroy();
        assert!(Database::is_registered(app.id()));
    }

    #[test]
    fn bundle_progress_reaches_the_callback() {
        let app = app();
        let db = Database::get_instance(&app).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let bundle = json!({
            "documents": { "c/1": {"n": 1}, "c/2": {"n": 2}, "c/3": {"n": 3} },
            "named_queries": { "all-c": "c" }
        })
        .to_string();

        let future = db
            .load_bundle_with_progress(bundle, move |p| log.lock().unwrap().push(p.state))
            .unwrap();
        let last = future.wait_timeout(BOUND).unwrap().unwrap();
        assert_eq!(last.state, LoadBundleState::Success);
        assert_eq!(last.documents_loaded, 3);
        assert_eq!(seen.lock().unwrap().len(), 4);

        let query = db.named_query("all-c").unwrap().wait().unwrap();
        assert_eq!(query.collection, "c");
        assert_eq!(
            db.named_query("missing").unwrap().wait().unwrap_err().code,
            ErrorCode::NotFound
        );
    }

    #[test]
    fn create_with_backend_registers_a_new_instance() {
        let app = app();
        let db = Database::create_with_backend(&app, |_events| {
            Ok(Box::new(HoldingBackend::default()) as Box<dyn DatabaseBackend>)
        })
        .unwrap();
        assert!(Database::is_registered(app.id()));
        assert_eq!(db.platform_name(), "holding");
        assert!(Arc::ptr_eq(&db, &Database::get_instance(&app).unwrap()));
    }

    #[test]
    fn settings_pass_through() {
        let app = app();
        let db = Database::get_instance(&app).unwrap();
        let settings = DatabaseSettings {
            persistence_enabled: false,
            ..DatabaseSettings::default()
        };
        db.set_settings(settings.clone()).unwrap();
        assert_eq!(db.settings(), settings);
        assert_eq!(db.app_id(), AppOptions::default().app_id);
    }
}
