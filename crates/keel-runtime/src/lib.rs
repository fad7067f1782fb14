// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Keel — concurrency primitives the client lifecycle is built on.
//
// * `thread`: strict join/detach thread handle
// * `future`: single-completion promise/future pair
// * `operation`: bridge turning backend calls into futures
// * `listener`: listener sets that can be muted safely
// * `cleanup`: owner and internal cleanup notifiers

pub mod cleanup;
pub mod future;
pub mod listener;
pub mod operation;
pub mod thread;

pub use cleanup::{CleanupKey, CleanupNotifier};
pub use future::{Outcome, OperationFuture, OperationStatus, Promise, channel};
pub use listener::{ListenerRegistration, ListenerSet, ListenerToken};
pub use operation::OperationBridge;
pub use thread::{ThreadHandle, ThreadId};
