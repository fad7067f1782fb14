// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Strict, move-only thread handle.
//
// Every started thread must be explicitly joined or detached before its
// handle goes away. Misuse is detected by precondition checks that produce
// `KeelError::InvalidOperation`; the non-`try_` entry points, `Drop` and
// move-assignment treat that as fatal and abort.

use std::thread::{self, JoinHandle};

use keel_core::error::{KeelError, Result};
use keel_core::fatal;
use tracing::{debug, error};

/// Identity of an execution context, with value semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(thread::ThreadId);

#[derive(Debug, Default)]
enum State {
    #[default]
    Empty,
    Joinable(JoinHandle<()>),
    Detached,
    Joined,
}

impl State {
    fn describe(&self) -> &'static str {
        match self {
            Self::Empty => "an empty thread handle",
            Self::Joinable(_) => "a running thread",
            Self::Detached => "a detached thread",
            Self::Joined => "a thread that was already joined",
        }
    }
}

/// Owning handle to a unit of concurrent execution.
///
/// States: Empty → (spawn) → Joinable → Joined | Detached. The handle is
/// move-only; `std::mem::take` leaves the source Empty.
#[derive(Debug, Default)]
pub struct ThreadHandle {
    state: State,
    id: Option<ThreadId>,
}

impl ThreadHandle {
    /// A handle with no thread attached.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Start `work` on a new thread. The returned handle is joinable.
    pub fn spawn<F>(work: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::from_join_handle(thread::spawn(work))
    }

    /// Start `work` on a new named thread.
    pub fn spawn_named<F>(name: impl Into<String>, work: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        let handle = thread::Builder::new().name(name.clone()).spawn(work)?;
        debug!(thread = %name, "spawned named thread");
        Ok(Self::from_join_handle(handle))
    }

    fn from_join_handle(handle: JoinHandle<()>) -> Self {
        let id = ThreadId(handle.thread().id());
        Self {
            state: State::Joinable(handle),
            id: Some(id),
        }
    }

    /// True only while a started thread has been neither joined nor detached.
    pub fn joinable(&self) -> bool {
        matches!(self.state, State::Joinable(_))
    }

    /// Id of the thread this handle was started with, if any.
    pub fn id(&self) -> Option<ThreadId> {
        self.id
    }

    /// Wait for the thread to finish.
    ///
    /// Fails with `InvalidOperation` on an empty, joined or detached handle,
    /// and when a thread tries to join itself. A panic in the thread is
    /// re-raised here.
    pub fn try_join(&mut self) -> Result<()> {
        if let (State::Joinable(_), Some(id)) = (&self.state, self.id) {
            if Self::is_current_thread(id) {
                return Err(KeelError::InvalidOperation(
                    "a thread cannot join itself".into(),
                ));
            }
        }

        let handle = match std::mem::take(&mut self.state) {
            State::Joinable(handle) => handle,
            other => {
                let err = KeelError::InvalidOperation(format!(
                    "join called on {}",
                    other.describe()
                ));
                self.state = other;
                return Err(err);
            }
        };

        self.state = State::Joined;
        if let Err(payload) = handle.join() {
            error!("joined thread panicked");
            std::panic::resume_unwind(payload);
        }
        Ok(())
    }

    /// Let the thread run to completion on its own.
    ///
    /// Fails with `InvalidOperation` on an empty, joined or already detached
    /// handle.
    pub fn try_detach(&mut self) -> Result<()> {
        match std::mem::take(&mut self.state) {
            State::Joinable(handle) => {
                // Dropping a std JoinHandle detaches the thread.
                drop(handle);
                self.state = State::Detached;
                Ok(())
            }
            other => {
                let err = KeelError::InvalidOperation(format!(
                    "detach called on {}",
                    other.describe()
                ));
                self.state = other;
                Err(err)
            }
        }
    }

    /// [`try_join`](Self::try_join), aborting the process on misuse.
    pub fn join(&mut self) {
        if let Err(err) = self.try_join() {
            fatal::abort_on(&err);
        }
    }

    /// [`try_detach`](Self::try_detach), aborting the process on misuse.
    pub fn detach(&mut self) {
        if let Err(err) = self.try_detach() {
            fatal::abort_on(&err);
        }
    }

    /// Move-assign `other` into this handle.
    ///
    /// Overwriting a joinable handle would orphan its thread, so that aborts.
    pub fn assign(&mut self, other: ThreadHandle) {
        if let Err(err) = self.check_assignable() {
            fatal::abort_on(&err);
        }
        *self = other;
    }

    /// Precondition of [`assign`](Self::assign).
    pub fn check_assignable(&self) -> Result<()> {
        if self.joinable() {
            return Err(KeelError::InvalidOperation(
                "move-assigning over a running thread handle".into(),
            ));
        }
        Ok(())
    }

    /// Id of the calling execution context.
    pub fn current_id() -> ThreadId {
        ThreadId(thread::current().id())
    }

    pub fn is_current_thread(id: ThreadId) -> bool {
        Self::current_id() == id
    }
}

impl Drop for ThreadHandle {
    fn drop(&mut self) {
        if !self.joinable() {
            return;
        }
        if thread::panicking() {
            // Already unwinding; aborting here would hide the original panic.
            error!("thread handle dropped while joinable during a panic; detaching");
            self.state = State::Detached;
            return;
        }
        fatal::abort_on(&KeelError::InvalidOperation(
            "thread handle dropped while still joinable".into(),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    const DEATH_TEST_ENV: &str = "KEEL_THREAD_DEATH_TEST";

    /// Re-run a single test of this binary in a child process with the death
    /// test switch set, and report whether it aborted.
    fn child_aborts(test_name: &str) -> bool {
        let exe = std::env::current_exe().expect("test binary path");
        let output = std::process::Command::new(exe)
            .args([test_name, "--exact", "--nocapture", "--test-threads=1"])
            .env(DEATH_TEST_ENV, "1")
            .output()
            .expect("spawn child test");
        let stderr = String::from_utf8_lossy(&output.stderr);
        !output.status.success() && stderr.contains("fatal contract violation")
    }

    fn in_death_child() -> bool {
        std::env::var_os(DEATH_TEST_ENV).is_some()
    }

    fn invalid_operation(result: Result<()>) -> bool {
        matches!(result, Err(KeelError::InvalidOperation(_)))
    }

    #[test]
    fn join_waits_for_the_work() {
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        let mut thread = ThreadHandle::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            flag.store(true, Ordering::SeqCst);
        });
        thread.join();
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn not_joinable_after_join() {
        let mut thread = ThreadHandle::spawn(|| {});
        assert!(thread.joinable());
        thread.join();
        assert!(!thread.joinable());
    }

    #[test]
    fn not_joinable_after_detach() {
        let mut thread = ThreadHandle::spawn(|| {});
        assert!(thread.joinable());
        thread.detach();
        assert!(!thread.joinable());
    }

    #[test]
    fn empty_handle_is_not_joinable() {
        assert!(!ThreadHandle::empty().joinable());
        assert!(ThreadHandle::default().id().is_none());
    }

    #[test]
    fn move_assignment_transfers_the_thread() {
        let mut source = ThreadHandle::spawn(|| {});
        let mut target = ThreadHandle::empty();
        assert!(source.joinable());

        target.assign(std::mem::take(&mut source));
        assert!(!source.joinable());
        assert!(target.joinable());
        target.join();
    }

    #[test]
    fn move_construction_transfers_the_thread() {
        let mut source = ThreadHandle::spawn(|| {});
        let mut target = std::mem::take(&mut source);
        assert!(!source.joinable());
        assert!(target.joinable());
        target.join();
    }

    #[test]
    fn assigning_over_a_finished_handle_is_allowed() {
        let mut target = ThreadHandle::spawn(|| {});
        target.join();
        target.assign(ThreadHandle::spawn(|| {}));
        assert!(target.joinable());
        target.join();
    }

    #[test]
    fn join_empty_handle_fails() {
        let mut thread = ThreadHandle::empty();
        assert!(invalid_operation(thread.try_join()));
    }

    #[test]
    fn join_twice_fails() {
        let mut thread = ThreadHandle::spawn(|| {});
        thread.try_join().unwrap();
        assert!(invalid_operation(thread.try_join()));
    }

    #[test]
    fn join_after_detach_fails() {
        let mut thread = ThreadHandle::spawn(|| {});
        thread.try_detach().unwrap();
        assert!(invalid_operation(thread.try_join()));
    }

    #[test]
    fn detach_after_join_fails() {
        let mut thread = ThreadHandle::spawn(|| {});
        thread.try_join().unwrap();
        assert!(invalid_operation(thread.try_detach()));
    }

    #[test]
    fn detach_empty_handle_fails() {
        let mut thread = ThreadHandle::empty();
        assert!(invalid_operation(thread.try_detach()));
    }

    #[test]
    fn detach_twice_fails() {
        let mut thread = ThreadHandle::spawn(|| {});
        thread.try_detach().unwrap();
        assert!(invalid_operation(thread.try_detach()));
        assert!(!thread.joinable());
    }

    #[test]
    fn failed_join_keeps_the_state() {
        let mut thread = ThreadHandle::spawn(|| {});
        thread.try_detach().unwrap();
        let err = thread.try_join().unwrap_err();
        assert!(err.to_string().contains("detached"));
        assert!(invalid_operation(thread.try_detach()));
    }

    #[test]
    fn assign_precondition_reports_running_target() {
        let mut thread = ThreadHandle::spawn(|| {});
        assert!(invalid_operation(thread.check_assignable()));
        thread.join();
        assert!(thread.check_assignable().is_ok());
    }

    #[test]
    fn spawn_named_sets_the_name() {
        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        let mut thread = ThreadHandle::spawn_named("keel-worker", move || {
            *slot.lock().unwrap() = std::thread::current().name().map(str::to_owned);
        })
        .unwrap();
        thread.join();
        assert_eq!(seen.lock().unwrap().as_deref(), Some("keel-worker"));
    }

    #[test]
    fn thread_is_equal_to_itself() {
        let id = ThreadHandle::current_id();
        assert_eq!(id, ThreadHandle::current_id());
        assert!(ThreadHandle::is_current_thread(id));
    }

    #[test]
    fn thread_is_not_equal_to_a_different_thread() {
        let seen = Arc::new(Mutex::new(ThreadHandle::current_id()));
        let slot = seen.clone();
        let mut thread = ThreadHandle::spawn(move || {
            *slot.lock().unwrap() = ThreadHandle::current_id();
        });
        let spawned_id = thread.id().unwrap();
        thread.join();

        let observed = *seen.lock().unwrap();
        assert_eq!(observed, spawned_id);
        assert!(!ThreadHandle::is_current_thread(observed));
    }

    // -- Fatal paths: each body only runs inside the re-executed child. --

    #[test]
    fn drop_joinable_child() {
        if !in_death_child() {
            return;
        }
        let _thread = ThreadHandle::spawn(|| {});
    }

    #[test]
    fn dropping_a_joinable_handle_aborts() {
        assert!(child_aborts("thread::tests::drop_joinable_child"));
    }

    #[test]
    fn assign_over_running_child() {
        if !in_death_child() {
            return;
        }
        let mut thread = ThreadHandle::spawn(|| {});
        thread.assign(ThreadHandle::empty());
    }

    #[test]
    fn moving_into_a_running_handle_aborts() {
        assert!(child_aborts("thread::tests::assign_over_running_child"));
    }

    #[test]
    fn join_twice_child() {
        if !in_death_child() {
            return;
        }
        let mut thread = ThreadHandle::spawn(|| {});
        thread.join();
        thread.join();
    }

    #[test]
    fn fatal_join_aborts() {
        assert!(child_aborts("thread::tests::join_twice_child"));
    }
}
