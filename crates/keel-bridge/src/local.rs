// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-process backends for desktop and CI builds.
//
// They behave like the native SDKs as far as Keel can tell: every call is
// answered asynchronously from a dedicated callback thread, events arrive on
// that same thread, and release tears the thread down.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use keel_core::config::DatabaseSettings;
use keel_core::error::Result;
use keel_core::types::{
    AdEvent, AdParent, AdRequest, AdResult, DatabaseEvent, ErrorCode, LoadBundleProgress,
    LoadBundleState, NamedQuery, OperationError, RewardItem,
};
use keel_runtime::{Outcome, Promise};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::traits::*;
use crate::worker::BackendWorker;

fn released_error() -> OperationError {
    OperationError::new(ErrorCode::Unavailable, "backend resources were released")
}

fn terminated_error() -> OperationError {
    OperationError::new(ErrorCode::FailedPrecondition, "the database has been terminated")
}

/// Callback thread shared by a backend's calls, with release bookkeeping.
struct Dispatcher {
    worker: BackendWorker,
    released: AtomicBool,
    latency: Duration,
}

impl Dispatcher {
    fn start(name: &str, latency: Duration) -> Result<Self> {
        Ok(Self {
            worker: BackendWorker::start(name)?,
            released: AtomicBool::new(false),
            latency,
        })
    }

    /// Run `job` on the callback thread, or fail `promise` if released.
    fn dispatch<T, P, F>(&self, promise: Promise<T, P>, job: F)
    where
        T: Clone + Send + 'static,
        P: Send + 'static,
        F: FnOnce(&Promise<T, P>) + Send + 'static,
    {
        if self.released.load(Ordering::Acquire) {
            promise.fail(released_error());
            return;
        }
        let latency = self.latency;
        let submitted = self.worker.submit(move || {
            if !latency.is_zero() {
                std::thread::sleep(latency);
            }
            job(&promise);
        });
        if !submitted {
            // The job (and its promise) was dropped, which cancels it.
            debug!("backend call submitted after release");
        }
    }

    fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.worker.shutdown();
        true
    }

    fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Document database
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Store {
    documents: BTreeMap<String, Value>,
    named_queries: BTreeMap<String, String>,
    network_enabled: bool,
    terminated: bool,
    pending_writes: usize,
    write_waiters: Vec<Promise<()>>,
}

impl Store {
    fn record_write(&mut self) {
        if !self.network_enabled {
            self.pending_writes += 1;
        }
    }
}

/// Bundle layout understood by the in-process database.
#[derive(Debug, Deserialize)]
struct Bundle {
    #[serde(default)]
    documents: BTreeMap<String, Value>,
    #[serde(default)]
    named_queries: BTreeMap<String, String>,
}

struct StoreTransaction<'a> {
    store: &'a mut Store,
}

impl TransactionContext for StoreTransaction<'_> {
    fn get(&mut self, path: &str) -> Option<Value> {
        self.store.documents.get(path).cloned()
    }

    fn set(&mut self, path: &str, data: Value) {
        self.store.documents.insert(path.to_owned(), data);
    }

    fn delete(&mut self, path: &str) {
        self.store.documents.remove(path);
    }
}

/// In-memory document database answering on its own callback thread.
pub struct LocalDatabase {
    dispatcher: Dispatcher,
    store: Arc<Mutex<Store>>,
    settings: Mutex<DatabaseSettings>,
    events: EventSink<DatabaseEvent>,
}

fn lock_store(store: &Mutex<Store>) -> MutexGuard<'_, Store> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LocalDatabase {
    pub fn new(settings: DatabaseSettings, events: EventSink<DatabaseEvent>) -> Result<Self> {
        Self::with_latency(settings, events, Duration::ZERO)
    }

    /// Like [`new`](Self::new), delaying every answer by `latency`.
    pub fn with_latency(
        settings: DatabaseSettings,
        events: EventSink<DatabaseEvent>,
        latency: Duration,
    ) -> Result<Self> {
        info!(host = %settings.host, "starting in-process database backend");
        Ok(Self {
            dispatcher: Dispatcher::start("keel-database", latency)?,
            store: Arc::new(Mutex::new(Store {
                network_enabled: true,
                ..Store::default()
            })),
            settings: Mutex::new(settings),
            events,
        })
    }

    /// Run `op` against the store on the callback thread, settle `promise`
    /// with its result and, for writes, announce that snapshots are in sync.
    fn run<T, F>(&self, write: bool, promise: Promise<T>, op: F)
    where
        T: Clone + Send + 'static,
        F: FnOnce(&mut Store) -> Outcome<T> + Send + 'static,
    {
        let store = self.store.clone();
        let events = self.events.clone();
        self.dispatcher.dispatch(promise, move |promise| {
            let outcome = {
                let mut store = lock_store(&store);
                if store.terminated {
                    Err(terminated_error())
                } else {
                    op(&mut store)
                }
            };
            let succeeded = outcome.is_ok();
            promise.settle(outcome);
            if write && succeeded {
                events.notify(&DatabaseEvent::SnapshotsInSync);
            }
        });
    }
}

impl Backend for LocalDatabase {
    fn platform_name(&self) -> &str {
        "in-process"
    }

    fn initialized(&self) -> bool {
        !self.dispatcher.is_released()
    }

    fn release_all(&self) {
        if self.dispatcher.release() {
            let waiters = std::mem::take(&mut lock_store(&self.store).write_waiters);
            for waiter in waiters {
                waiter.fail(released_error());
            }
            info!("in-process database backend released");
        }
    }
}

impl DatabaseBackend for LocalDatabase {
    fn settings(&self) -> DatabaseSettings {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_settings(&self, settings: DatabaseSettings) {
        *self.settings.lock().unwrap_or_else(PoisonError::into_inner) = settings;
    }

    fn get_document(&self, path: String, promise: Promise<Option<Value>>) {
        self.run(false, promise, move |store| {
            Ok(store.documents.get(&path).cloned())
        });
    }

    fn set_document(&self, path: String, data: Value, promise: Promise<()>) {
        self.run(true, promise, move |store| {
            store.documents.insert(path, data);
            store.record_write();
            Ok(())
        });
    }

    fn delete_document(&self, path: String, promise: Promise<()>) {
        self.run(true, promise, move |store| {
            store.documents.remove(&path);
            store.record_write();
            Ok(())
        });
    }

    fn run_transaction(&self, mut update: TransactionFn, promise: Promise<()>) {
        self.run(true, promise, move |store| {
            if !store.network_enabled {
                return Err(OperationError::new(
                    ErrorCode::Unavailable,
                    "transactions require network access",
                ));
            }
            // Apply against a scratch copy so a failing body leaves no trace.
            let mut scratch = Store {
                documents: store.documents.clone(),
                ..Store::default()
            };
            update(&mut StoreTransaction {
                store: &mut scratch,
            })?;
            store.documents = scratch.documents;
            Ok(())
        });
    }

    fn disable_network(&self, promise: Promise<()>) {
        self.run(false, promise, |store| {
            store.network_enabled = false;
            Ok(())
        });
    }

    fn enable_network(&self, promise: Promise<()>) {
        let store = self.store.clone();
        self.dispatcher.dispatch(promise, move |promise| {
            let waiters = {
                let mut store = lock_store(&store);
                if store.terminated {
                    drop(store);
                    promise.fail(terminated_error());
                    return;
                }
                store.network_enabled = true;
                store.pending_writes = 0;
                std::mem::take(&mut store.write_waiters)
            };
            // Waiter callbacks may tear the database down, which locks the store.
            for waiter in waiters {
                waiter.complete(());
            }
            promise.complete(());
        });
    }

    fn terminate(&self, promise: Promise<()>) {
        let store = self.store.clone();
        self.dispatcher.dispatch(promise, move |promise| {
            let waiters = {
                let mut store = lock_store(&store);
                store.terminated = true;
                std::mem::take(&mut store.write_waiters)
            };
            for waiter in waiters {
                waiter.fail(terminated_error());
            }
            promise.complete(());
        });
    }

    fn wait_for_pending_writes(&self, promise: Promise<()>) {
        let store = self.store.clone();
        self.dispatcher.dispatch(promise, move |promise| {
            let mut store = lock_store(&store);
            if store.terminated {
                drop(store);
                promise.fail(terminated_error());
            } else if store.pending_writes == 0 {
                drop(store);
                promise.complete(());
            } else {
                // Settled by the next `enable_network`.
                store.write_waiters.push(promise.clone());
            }
        });
    }

    fn clear_persistence(&self, promise: Promise<()>) {
        let store = self.store.clone();
        self.dispatcher.dispatch(promise, move |promise| {
            let mut store = lock_store(&store);
            if !store.terminated {
                drop(store);
                promise.fail(OperationError::new(
                    ErrorCode::FailedPrecondition,
                    "persistence can only be cleared after the database is terminated",
                ));
                return;
            }
            store.documents.clear();
            store.named_queries.clear();
            store.pending_writes = 0;
            drop(store);
            promise.complete(());
        });
    }

    #[instrument(skip_all, fields(bytes = bundle.len()))]
    fn load_bundle(
        &self,
        bundle: String,
        promise: Promise<LoadBundleProgress, LoadBundleProgress>,
    ) {
        let store = self.store.clone();
        self.dispatcher.dispatch(promise, move |promise| {
            let parsed: Bundle = match serde_json::from_str(&bundle) {
                Ok(parsed) => parsed,
                Err(e) => {
                    promise.fail(OperationError::new(
                        ErrorCode::InvalidArgument,
                        format!("malformed bundle: {e}"),
                    ));
                    return;
                }
            };

            let total_documents = u32::try_from(parsed.documents.len()).unwrap_or(u32::MAX);
            let total_bytes = bundle.len() as u64;
            let mut progress = LoadBundleProgress {
                documents_loaded: 0,
                total_documents,
                bytes_loaded: 0,
                total_bytes,
                state: LoadBundleState::InProgress,
            };
            promise.progress(progress.clone());

            for (path, data) in parsed.documents {
                let mut guard = lock_store(&store);
                if guard.terminated {
                    drop(guard);
                    promise.fail(terminated_error());
                    return;
                }
                guard.documents.insert(path, data);
                drop(guard);

                progress.documents_loaded += 1;
                progress.bytes_loaded =
                    total_bytes * u64::from(progress.documents_loaded) / u64::from(total_documents);
                promise.progress(progress.clone());
            }

            lock_store(&store).named_queries.extend(parsed.named_queries);
            progress.bytes_loaded = total_bytes;
            progress.state = LoadBundleState::Success;
            promise.complete(progress);
        });
    }

    fn named_query(&self, name: String, promise: Promise<NamedQuery>) {
        self.run(false, promise, move |store| {
            store
                .named_queries
                .get(&name)
                .map(|collection| NamedQuery {
                    name: name.clone(),
                    collection: collection.clone(),
                })
                .ok_or_else(|| {
                    OperationError::new(ErrorCode::NotFound, format!("no named query '{name}'"))
                })
        });
    }
}

// ---------------------------------------------------------------------------
// Rewarded ads
// ---------------------------------------------------------------------------

#[derive(Default)]
struct AdState {
    parent: Option<AdParent>,
    loaded: Option<AdResult>,
}

/// In-process rewarded-ad SDK that always fills (except for unit ids
/// starting with `no-fill`).
pub struct LocalAds {
    dispatcher: Dispatcher,
    state: Arc<Mutex<AdState>>,
    events: EventSink<AdEvent>,
    next_response: AtomicU64,
}

/// Unit id prefix that makes [`LocalAds`] report no fill.
pub const NO_FILL_PREFIX: &str = "no-fill";

/// Reward granted by [`LocalAds`] after a show.
pub fn local_reward() -> RewardItem {
    RewardItem {
        reward_type: "coins".into(),
        amount: 10,
    }
}

impl LocalAds {
    pub fn new(events: EventSink<AdEvent>) -> Result<Self> {
        Ok(Self {
            dispatcher: Dispatcher::start("keel-ads", Duration::ZERO)?,
            state: Arc::new(Mutex::new(AdState::default())),
            events,
            next_response: AtomicU64::new(1),
        })
    }
}

fn lock_ads(state: &Mutex<AdState>) -> MutexGuard<'_, AdState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Backend for LocalAds {
    fn platform_name(&self) -> &str {
        "in-process"
    }

    fn initialized(&self) -> bool {
        !self.dispatcher.is_released()
    }

    fn release_all(&self) {
        if self.dispatcher.release() {
            info!("in-process ad backend released");
        }
    }
}

impl AdBackend for LocalAds {
    fn initialize(&self, parent: AdParent, promise: Promise<()>) {
        let state = self.state.clone();
        self.dispatcher.dispatch(promise, move |promise| {
            lock_ads(&state).parent = Some(parent);
            promise.complete(());
        });
    }

    fn load_ad(&self, ad_unit_id: String, _request: AdRequest, promise: Promise<AdResult>) {
        let state = self.state.clone();
        let response = self.next_response.fetch_add(1, Ordering::Relaxed);
        self.dispatcher.dispatch(promise, move |promise| {
            if ad_unit_id.starts_with(NO_FILL_PREFIX) {
                promise.fail(OperationError::new(ErrorCode::NotFound, "no fill"));
                return;
            }
            let result = AdResult {
                ad_unit_id,
                response_id: format!("local-{response}"),
                adapter: "in-process".into(),
            };
            lock_ads(&state).loaded = Some(result.clone());
            promise.complete(result);
        });
    }

    fn show(&self, promise: Promise<()>) {
        let state = self.state.clone();
        let events = self.events.clone();
        self.dispatcher.dispatch(promise, move |promise| {
            let loaded = lock_ads(&state).loaded.take();
            if loaded.is_none() {
                let err = OperationError::new(ErrorCode::FailedPrecondition, "no ad is loaded");
                events.notify(&AdEvent::FailedToShow(err.clone()));
                promise.fail(err);
                return;
            }
            events.notify(&AdEvent::UserEarnedReward(local_reward()));
            events.notify(&AdEvent::Dismissed);
            promise.complete(());
        });
    }
}
