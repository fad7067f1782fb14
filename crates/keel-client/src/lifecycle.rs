// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Client teardown ordering.
//
// A client goes away either because its user destroys it or because its
// owning app is destroyed first. Both paths run the same five steps in the
// same order, exactly once:
//
//   1. unregister from the owner's cleanup notifier
//   2. clear listeners (waits for callbacks already running elsewhere)
//   3. run internal cleanup and fail pending operations
//   4. release the native backend
//   5. remove the registry entry

use std::sync::atomic::{AtomicU8, Ordering};

use keel_core::types::{InstanceId, OwnerId};
use tracing::{debug, info, warn};

/// The individual teardown steps of one client.
pub trait TeardownSteps {
    fn unregister_from_owner(&self);
    fn clear_listeners(&self);
    fn run_internal_cleanup(&self);
    fn release_backend(&self);
    fn remove_from_registry(&self);
}

/// Why a client is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownTrigger {
    /// The user destroyed or dropped the client.
    Explicit,
    /// The owning app was destroyed while the client was still alive.
    OwnerDestroyed,
}

/// Lifecycle phase of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Live,
    TearingDown,
    TornDown,
}

const LIVE: u8 = 0;
const TEARING_DOWN: u8 = 1;
const TORN_DOWN: u8 = 2;

/// Runs a client's teardown once, in order.
#[derive(Debug)]
pub struct LifecycleCoordinator {
    kind: &'static str,
    instance: InstanceId,
    owner: OwnerId,
    state: AtomicU8,
}

impl LifecycleCoordinator {
    pub fn new(kind: &'static str, instance: InstanceId, owner: OwnerId) -> Self {
        Self {
            kind,
            instance,
            owner,
            state: AtomicU8::new(LIVE),
        }
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn state(&self) -> LifecycleState {
        match self.state.load(Ordering::Acquire) {
            LIVE => LifecycleState::Live,
            TEARING_DOWN => LifecycleState::TearingDown,
            _ => LifecycleState::TornDown,
        }
    }

    pub fn is_live(&self) -> bool {
        self.state() == LifecycleState::Live
    }

    /// Run the teardown steps. Only the first call does anything; it returns
    /// `true`.
    pub fn teardown(&self, steps: &dyn TeardownSteps, trigger: TeardownTrigger) -> bool {
        if self
            .state
            .compare_exchange(LIVE, TEARING_DOWN, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(kind = self.kind, instance = %self.instance, "teardown already started");
            return false;
        }

        if trigger == TeardownTrigger::OwnerDestroyed {
            warn!(
                kind = self.kind,
                instance = %self.instance,
                owner = %self.owner,
                "owner destroyed before the client; tearing the client down now"
            );
        }

        steps.unregister_from_owner();
        steps.clear_listeners();
        steps.run_internal_cleanup();
        steps.release_backend();
        steps.remove_from_registry();

        self.state.store(TORN_DOWN, Ordering::Release);
        info!(kind = self.kind, instance = %self.instance, ?trigger, "client torn down");
        true
    }
}
