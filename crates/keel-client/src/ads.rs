// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Rewarded ad client.
//
// Unlike the database, rewarded ads are not cached per app: every
// `RewardedAd` is its own instance, scoped to the app it was created for.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use keel_bridge::traits::{AdBackend, EventSink};
use keel_core::error::{KeelError, Result};
use keel_core::types::{
    AdEvent, AdParent, AdRequest, AdResult, ErrorCode, InstanceId, OperationError, OwnerId,
};
use keel_runtime::{
    CleanupKey, CleanupNotifier, ListenerRegistration, ListenerSet, OperationBridge,
    OperationFuture, Outcome, Promise, channel,
};
use tracing::info;

use crate::app::App;
use crate::lifecycle::{LifecycleCoordinator, TeardownSteps, TeardownTrigger};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdOp {
    Initialize,
    LoadAd,
    Show,
}

#[derive(Debug, Default)]
struct AdState {
    initialize_called: bool,
    loaded: Option<AdResult>,
}

type SharedState = Arc<Mutex<AdState>>;

fn lock_state(state: &Mutex<AdState>) -> MutexGuard<'_, AdState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Hand the backend a promise whose outcome passes through `observe` before
/// it settles `promise`, so callers see the ad state already updated.
fn relay<T, F>(promise: Promise<T>, observe: F) -> Promise<T>
where
    T: Clone + Send + 'static,
    F: FnOnce(&Outcome<T>) + Send + 'static,
{
    let (inner, future) = channel::<T, ()>();
    future.on_completion(move |outcome| {
        observe(outcome);
        promise.settle(outcome.clone());
    });
    inner
}

struct Internal {
    backend: Box<dyn AdBackend>,
    listeners: EventSink<AdEvent>,
    cleanup: CleanupNotifier,
    bridge: OperationBridge<AdOp>,
    state: SharedState,
}

/// A full-screen ad that grants the user a reward once watched.
pub struct RewardedAd {
    id: InstanceId,
    owner: OwnerId,
    owner_cleanup: Weak<CleanupNotifier>,
    owner_key: CleanupKey,
    lifecycle: LifecycleCoordinator,
    internal: Internal,
}

impl std::fmt::Debug for RewardedAd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RewardedAd")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("state", &self.lifecycle.state())
            .finish()
    }
}

impl RewardedAd {
    pub fn new(app: &App) -> Result<Arc<Self>> {
        Self::with_backend(app, keel_bridge::ad_backend)
    }

    pub fn with_backend<F>(app: &App, make_backend: F) -> Result<Arc<Self>>
    where
        F: FnOnce(EventSink<AdEvent>) -> Result<Box<dyn AdBackend>>,
    {
        let listeners = ListenerSet::new();
        let backend = make_backend(listeners.clone())?;
        let id = InstanceId::new();
        let initialized = backend.initialized();

        let state = SharedState::default();
        let cleanup = CleanupNotifier::new("rewarded-ad-internal");
        let loaded = state.clone();
        cleanup.register_object(CleanupKey::next(), move || {
            lock_state(&loaded).loaded = None;
        });

        let ad = Arc::new(Self {
            id,
            owner: app.id(),
            owner_cleanup: app.cleanup_handle(),
            owner_key: CleanupKey::next(),
            lifecycle: LifecycleCoordinator::new("rewarded-ad", id, app.id()),
            internal: Internal {
                backend,
                listeners,
                cleanup,
                bridge: OperationBridge::new("rewarded-ad"),
                state,
            },
        });

        if !initialized {
            // Dropping `ad` runs its teardown.
            return Err(KeelError::MissingDependency(
                "rewarded ad backend could not be initialised".into(),
            ));
        }

        let weak = Arc::downgrade(&ad);
        app.cleanup().register_object(ad.owner_key, move || {
            if let Some(ad) = weak.upgrade() {
                ad.lifecycle.teardown(ad.as_ref(), TeardownTrigger::OwnerDestroyed);
            }
        });
        info!(instance = %id, owner = %app.id(), "rewarded ad created");
        Ok(ad)
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn is_live(&self) -> bool {
        self.lifecycle.is_live()
    }

    pub fn pending_operations(&self) -> usize {
        self.internal.bridge.pending_count()
    }

    /// The most recently loaded ad that has not been shown yet.
    pub fn loaded_ad(&self) -> Option<AdResult> {
        lock_state(&self.internal.state).loaded.clone()
    }

    pub fn destroy(&self) {
        self.lifecycle.teardown(self, TeardownTrigger::Explicit);
    }

    fn invoke<T, F>(&self, op: AdOp, call: F) -> OperationFuture<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce(&dyn AdBackend, Promise<T>),
    {
        if !self.lifecycle.is_live() {
            return OperationFuture::failed(OperationError::instance_destroyed());
        }
        let backend = self.internal.backend.as_ref();
        self.internal.bridge.invoke(op, |promise| call(backend, promise))
    }

    fn not_initialized(&self) -> Option<OperationError> {
        if lock_state(&self.internal.state).initialize_called {
            return None;
        }
        Some(OperationError::new(
            ErrorCode::FailedPrecondition,
            "initialize must be called first",
        ))
    }

    /// Attach the ad to `parent`. Only the first call reaches the backend.
    pub fn initialize(&self, parent: AdParent) -> OperationFuture<()> {
        if !self.lifecycle.is_live() {
            return OperationFuture::failed(OperationError::instance_destroyed());
        }
        {
            let mut state = lock_state(&self.internal.state);
            if state.initialize_called {
                return OperationFuture::failed(OperationError::new(
                    ErrorCode::AlreadyExists,
                    "initialize was already called",
                ));
            }
            state.initialize_called = true;
        }
        self.invoke(AdOp::Initialize, |backend, promise| {
            backend.initialize(parent, promise)
        })
    }

    pub fn load_ad(
        &self,
        ad_unit_id: &str,
        request: AdRequest,
    ) -> Result<OperationFuture<AdResult>> {
        if ad_unit_id.is_empty() {
            return Err(KeelError::InvalidArgument("ad unit id must not be empty".into()));
        }
        if let Some(err) = self.not_initialized() {
            return Ok(OperationFuture::failed(err));
        }
        let ad_unit_id = ad_unit_id.to_owned();
        let state = Arc::downgrade(&self.internal.state);
        Ok(self.invoke(AdOp::LoadAd, |backend, promise: Promise<AdResult>| {
            let promise = relay(promise, move |outcome| {
                if let (Ok(result), Some(state)) = (outcome, state.upgrade()) {
                    lock_state(&state).loaded = Some(result.clone());
                }
            });
            backend.load_ad(ad_unit_id, request, promise)
        }))
    }

    /// Present the loaded ad. Reward and dismissal arrive through listeners.
    pub fn show(&self) -> OperationFuture<()> {
        if let Some(err) = self.not_initialized() {
            return OperationFuture::failed(err);
        }
        let state = Arc::downgrade(&self.internal.state);
        self.invoke(AdOp::Show, |backend, promise| {
            let promise = relay(promise, move |outcome| {
                if let (Ok(()), Some(state)) = (outcome, state.upgrade()) {
                    lock_state(&state).loaded = None;
                }
            });
            backend.show(promise)
        })
    }

    /// Listen for reward, dismissal and show-failure events.
    pub fn add_listener<F>(&self, callback: F) -> ListenerRegistration<AdEvent>
    where
        F: Fn(&AdEvent) + Send + Sync + 'static,
    {
        if !self.lifecycle.is_live() {
            return ListenerRegistration::inert();
        }
        self.internal.listeners.add(callback)
    }
}

impl TeardownSteps for RewardedAd {
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

    // Rewarded ads are not registry-managed.
    fn remove_from_registry(&self) {}
}

impl Drop for RewardedAd {
    fn drop(&mut self) {
        self.lifecycle.teardown(&*self, TeardownTrigger::Explicit);
    }
}
