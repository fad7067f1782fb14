// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Keel — client instances and their lifecycle.
//
// * `app`: the owning context clients are scoped to
// * `registry`: one live instance per owner and client kind
// * `lifecycle`: ordered, run-once teardown
// * `database`: document database client
// * `ads`: rewarded ad client

pub mod ads;
pub mod app;
pub mod database;
pub mod lifecycle;
pub mod registry;

pub use ads::RewardedAd;
pub use app::App;
pub use database::Database;
pub use lifecycle::{LifecycleCoordinator, LifecycleState, TeardownSteps, TeardownTrigger};
pub use registry::{InstanceRegistry, RegisteredInstance};

/// Platform token reported in client metadata.
fn platform() -> &'static str {
    if cfg!(target_os = "android") {
        "android"
    } else if cfg!(target_os = "ios") {
        "ios"
    } else if cfg!(target_os = "macos") {
        "macos"
    } else if cfg!(target_os = "windows") {
        "windows"
    } else if cfg!(target_os = "linux") {
        "linux"
    } else {
        "unknown"
    }
}

/// Identifies this library to backends, e.g. `keel-rust/0.3.0 linux`.
pub fn client_language() -> String {
    format!("keel-rust/{} {}", env!("CARGO_PKG_VERSION"), platform())
}
