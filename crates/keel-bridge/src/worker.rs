// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Single background thread standing in for a native SDK's callback thread.

use std::sync::mpsc::{self, Sender};
use std::sync::{Mutex, MutexGuard, PoisonError};

use keel_core::error::Result;
use keel_runtime::ThreadHandle;
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send>;

struct WorkerState {
    sender: Option<Sender<Job>>,
    thread: ThreadHandle,
}

/// Runs submitted jobs in order on one dedicated thread.
pub struct BackendWorker {
    name: String,
    state: Mutex<WorkerState>,
}

impl BackendWorker {
    pub fn start(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (sender, receiver) = mpsc::channel::<Job>();
        let thread = ThreadHandle::spawn_named(name.clone(), move || {
            while let Ok(job) = receiver.recv() {
                job();
            }
        })?;
        Ok(Self {
            name,
            state: Mutex::new(WorkerState {
                sender: Some(sender),
                thread,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `job`. Returns `false` (dropping the job) once shut down.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let state = self.lock();
        match &state.sender {
            Some(sender) => sender.send(Box::new(job)).is_ok(),
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock().sender.is_some()
    }

    /// Stop accepting jobs, let queued ones finish, and retire the thread.
    ///
    /// Joins the thread, except when called from the worker itself, where it
    /// detaches instead. Idempotent.
    pub fn shutdown(&self) {
        let mut thread = {
            let mut state = self.lock();
            if state.sender.take().is_none() {
                return;
            }
            std::mem::take(&mut state.thread)
        };

        let on_worker = thread.id().is_some_and(ThreadHandle::is_current_thread);
        if on_worker {
            warn!(worker = %self.name, "worker shut down from its own thread; detaching");
            thread.detach();
        } else {
            thread.join();
        }
        debug!(worker = %self.name, "worker stopped");
    }
}

impl Drop for BackendWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn runs_jobs_in_order() {
        let worker = BackendWorker::start("keel-test-worker").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..10 {
            let seen = seen.clone();
            assert!(worker.submit(move || seen.lock().unwrap().push(i)));
        }
        worker.shutdown();
        assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn submit_after_shutdown_is_refused() {
        let worker = BackendWorker::start("keel-test-worker").unwrap();
        worker.shutdown();
        worker.shutdown();
        assert!(!worker.is_running());
        assert!(!worker.submit(|| panic!("must not run")));
    }

    #[test]
    fn shutdown_from_inside_a_job() {
        let worker = Arc::new(BackendWorker::start("keel-test-worker").unwrap());
        let (tx, rx) = mpsc::channel();
        let inner = worker.clone();
        worker.submit(move || {
            inner.shutdown();
            tx.send(()).unwrap();
        });
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(!worker.is_running());
    }
}
