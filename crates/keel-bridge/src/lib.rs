// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Keel — native backend abstractions and platform dispatch.
//
// Clients never talk to an SDK directly: they ask this crate for a backend
// trait object and hand it promises. Desktop and CI builds get in-process
// backends running on their own callback thread; mobile targets without a
// linked SDK get the stub.

pub mod traits;
pub mod worker;

#[cfg(not(any(target_os = "ios", target_os = "android")))]
pub mod local;

pub mod stub;

use keel_core::config::AppOptions;
use keel_core::error::Result;
use keel_core::types::{AdEvent, DatabaseEvent};

use crate::traits::{AdBackend, DatabaseBackend, EventSink};

/// Build the database backend for the target platform.
///
/// Events (snapshots-in-sync) are pushed into `events`.
pub fn database_backend(
    options: &AppOptions,
    events: EventSink<DatabaseEvent>,
) -> Result<Box<dyn DatabaseBackend>> {
    #[cfg(not(any(target_os = "ios", target_os = "android")))]
    {
        Ok(Box::new(local::LocalDatabase::new(
            options.database.clone(),
            events,
        )?))
    }
    #[cfg(any(target_os = "ios", target_os = "android"))]
    {
        let _ = events;
        Ok(Box::new(stub::UnavailableBackend::new(
            options.database.clone(),
        )))
    }
}

/// Build the rewarded-ad backend for the target platform.
pub fn ad_backend(events: EventSink<AdEvent>) -> Result<Box<dyn AdBackend>> {
    #[cfg(not(any(target_os = "ios", target_os = "android")))]
    {
        Ok(Box::new(local::LocalAds::new(events)?))
    }
    #[cfg(any(target_os = "ios", target_os = "android"))]
    {
        let _ = events;
        Ok(Box::new(stub::UnavailableBackend::default()))
    }
}
