// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Fail-fast handling for contract violations.
//
// Misuse of lifecycle primitives is detected by explicit precondition checks
// that produce a `KeelError`; callers on the fatal path hand that error here.

use crate::error::KeelError;

/// Log a fatal contract violation and terminate the process.
///
/// Never returns. Recoverable errors must not be routed through here.
pub fn abort_on(err: &KeelError) -> ! {
    tracing::error!(error = %err, "fatal contract violation, aborting");
    eprintln!("keel: fatal contract violation: {err}");
    std::process::abort()
}
