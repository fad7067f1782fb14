// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Process-wide owner → instance registry, one per client kind.
//
// Storage is created on first insert and released again when the last entry
// goes. Instances rejected or displaced under the lock are only dropped after
// it is released, since dropping one may run its teardown, which calls back
// into `remove`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use keel_core::error::{KeelError, Result};
use keel_core::fatal;
use keel_core::types::{InstanceId, OwnerId};
use tracing::{debug, info};

/// What the registry needs to know about the instances it holds.
pub trait RegisteredInstance: Send + Sync {
    fn instance_id(&self) -> InstanceId;

    /// False when the backend never finished setting up.
    fn is_initialized(&self) -> bool;

    /// True once teardown has started. Such entries count as absent.
    fn is_tearing_down(&self) -> bool;
}

type Entries<C> = Option<HashMap<OwnerId, Arc<C>>>;

/// Maps each owner to its single live instance of `C`.
pub struct InstanceRegistry<C> {
    kind: &'static str,
    entries: Mutex<Entries<C>>,
}

impl<C: RegisteredInstance> InstanceRegistry<C> {
    pub const fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Entries<C>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn live(entries: &Entries<C>, owner: OwnerId) -> Option<Arc<C>> {
        entries
            .as_ref()
            .and_then(|map| map.get(&owner))
            .filter(|instance| !instance.is_tearing_down())
            .cloned()
    }

    /// Return the live instance for `owner`, or build one with `factory`.
    ///
    /// Lookup, construction and insertion happen under one lock, so racing
    /// callers for the same owner all get the same instance and the factory
    /// runs once. `factory` must not use this registry.
    pub fn get_or_create<F>(&self, owner: OwnerId, factory: F) -> Result<Arc<C>>
    where
        F: FnOnce() -> Result<Arc<C>>,
    {
        let entries = self.lock();
        if let Some(existing) = Self::live(&entries, owner) {
            debug!(kind = self.kind, owner = %owner, "returning cached instance");
            return Ok(existing);
        }
        self.build_and_insert(entries, owner, factory)
    }

    /// Register a freshly built instance for `owner`.
    ///
    /// A live entry for `owner` is a programming error and aborts the
    /// process; see [`check_double_registration`](Self::check_double_registration).
    pub fn create_new<F>(&self, owner: OwnerId, factory: F) -> Result<Arc<C>>
    where
        F: FnOnce() -> Result<Arc<C>>,
    {
        let entries = self.lock();
        if Self::live(&entries, owner).is_some() {
            drop(entries);
            fatal::abort_on(&KeelError::DoubleRegistration { owner });
        }
        self.build_and_insert(entries, owner, factory)
    }

    /// `Err(DoubleRegistration)` if `owner` already has a live instance.
    pub fn check_double_registration(&self, owner: OwnerId) -> Result<()> {
        if Self::live(&self.lock(), owner).is_some() {
            return Err(KeelError::DoubleRegistration { owner });
        }
        Ok(())
    }

    fn build_and_insert<F>(
        &self,
        mut entries: MutexGuard<'_, Entries<C>>,
        owner: OwnerId,
        factory: F,
    ) -> Result<Arc<C>>
    where
        F: FnOnce() -> Result<Arc<C>>,
    {
        let instance = factory()?;
        if !instance.is_initialized() {
            drop(entries);
            info!(kind = self.kind, owner = %owner, "backend failed to initialise");
            drop(instance);
            return Err(KeelError::MissingDependency(format!(
                "{} backend could not be initialised for owner {owner}",
                self.kind
            )));
        }

        let displaced = entries
            .get_or_insert_with(HashMap::new)
            .insert(owner, instance.clone());
        drop(entries);
        // A displaced entry was already tearing down; let it finish elsewhere.
        drop(displaced);

        info!(
            kind = self.kind,
            owner = %owner,
            instance = %instance.instance_id(),
            "instance registered"
        );
        Ok(instance)
    }

    /// Erase `owner`'s entry if it is `instance`. Returns whether it was.
    pub fn remove(&self, owner: OwnerId, instance: InstanceId) -> bool {
        let removed = {
            let mut entries = self.lock();
            let Some(map) = entries.as_mut() else {
                return false;
            };
            let matches = map
                .get(&owner)
                .is_some_and(|current| current.instance_id() == instance);
            let removed = if matches { map.remove(&owner) } else { None };
            if map.is_empty() {
                *entries = None;
            }
            removed
        };
        if removed.is_some() {
            debug!(kind = self.kind, owner = %owner, instance = %instance, "instance unregistered");
        }
        removed.is_some()
    }

    /// The registered instance for `owner`, live or not.
    pub fn get(&self, owner: OwnerId) -> Option<Arc<C>> {
        self.lock().as_ref().and_then(|map| map.get(&owner)).cloned()
    }

    pub fn contains(&self, owner: OwnerId) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|map| map.contains_key(&owner))
    }

    pub fn len(&self) -> usize {
        self.lock().as_ref().map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether backing storage is currently allocated.
    pub fn has_storage(&self) -> bool {
        self.lock().is_some()
    }
}
