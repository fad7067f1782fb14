// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Owning context for clients.

use std::sync::{Arc, Weak};

use keel_core::config::AppOptions;
use keel_core::error::Result;
use keel_core::types::OwnerId;
use keel_runtime::CleanupNotifier;
use tracing::info;

/// Name given to an app created without one.
pub const DEFAULT_APP_NAME: &str = "[DEFAULT]";

/// An app: the owner every client instance is scoped to.
///
/// Dropping the app runs its cleanup notifier, which tears down every client
/// still alive for it.
#[derive(Debug)]
pub struct App {
    id: OwnerId,
    name: String,
    options: AppOptions,
    cleanup: Arc<CleanupNotifier>,
}

impl App {
    /// Create the default app.
    pub fn create(options: AppOptions) -> Result<Self> {
        Self::create_named(DEFAULT_APP_NAME, options)
    }

    pub fn create_named(name: impl Into<String>, options: AppOptions) -> Result<Self> {
        options.validate()?;
        let app = Self {
            id: OwnerId::new(),
            name: name.into(),
            options,
            cleanup: Arc::new(CleanupNotifier::new("app")),
        };
        info!(owner = %app.id, name = %app.name, project = %app.options.project_id, "app created");
        Ok(app)
    }

    pub fn id(&self) -> OwnerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &AppOptions {
        &self.options
    }

    /// Weak handle clients use to (un)register their cleanup callbacks.
    pub(crate) fn cleanup_handle(&self) -> Weak<CleanupNotifier> {
        Arc::downgrade(&self.cleanup)
    }

    pub(crate) fn cleanup(&self) -> &CleanupNotifier {
        &self.cleanup
    }

    /// Number of objects that will be cleaned up when the app goes away.
    pub fn registered_objects(&self) -> usize {
        self.cleanup.len()
    }
}

impl Drop for App {
    fn drop(&mut self) {
        let ran = self.cleanup.cleanup_all();
        info!(owner = %self.id, name = %self.name, cleaned_up = ran, "app destroyed");
    }
}
