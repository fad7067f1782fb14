// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// App options and database settings.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{KeelError, Result};

/// Options identifying the backend project an app talks to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppOptions {
    /// Backend project identifier.
    pub project_id: String,
    /// Platform app identifier (bundle id / package name derived).
    pub app_id: String,
    /// API key used by native SDKs.
    pub api_key: String,
    /// Optional database endpoint override.
    pub database_url: Option<String>,
    /// Settings applied to every database instance created for this app.
    pub database: DatabaseSettings,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            project_id: "keel-local".into(),
            app_id: "1:000000000000:desktop:keel".into(),
            api_key: String::new(),
            database_url: None,
            database: DatabaseSettings::default(),
        }
    }
}

impl AppOptions {
    /// Load options from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)?;
        let options: Self = serde_json::from_str(&data)?;
        options.validate()?;
        debug!(path = %path.display(), project = %options.project_id, "app options loaded");
        Ok(options)
    }

    /// Persist options as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.project_id.trim().is_empty() {
            return Err(KeelError::Config("project_id must not be empty".into()));
        }
        if self.app_id.trim().is_empty() {
            return Err(KeelError::Config("app_id must not be empty".into()));
        }
        self.database.validate()
    }
}

/// Per-instance database settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Backend host name.
    pub host: String,
    /// Whether to talk TLS to the host.
    pub ssl_enabled: bool,
    /// Keep a local on-disk cache.
    pub persistence_enabled: bool,
    /// Upper bound for the local cache. `None` disables garbage collection.
    pub cache_size_bytes: Option<u64>,
}

/// Smallest cache size native SDKs accept.
pub const MIN_CACHE_SIZE_BYTES: u64 = 1024 * 1024;

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            host: "firestore.googleapis.com".into(),
            ssl_enabled: true,
            persistence_enabled: true,
            cache_size_bytes: Some(100 * 1024 * 1024),
        }
    }
}

impl DatabaseSettings {
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(KeelError::Config("database host must not be empty".into()));
        }
        if let Some(size) = self.cache_size_bytes {
            if size < MIN_CACHE_SIZE_BYTES {
                return Err(KeelError::Config(format!(
                    "cache size must be at least {MIN_CACHE_SIZE_BYTES} bytes, got {size}"
                )));
            }
        }
        Ok(())
    }
}
