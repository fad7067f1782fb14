// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Keel.

use thiserror::Error;

use crate::types::{OperationError, OwnerId};

/// Top-level error type for all Keel operations.
#[derive(Debug, Error)]
pub enum KeelError {
    // -- Instance creation --
    /// The instance was built but its backend never finished initialising
    /// (e.g. the owning app is unusable on this platform).
    #[error("missing dependency: {0}")]
    MissingDependency(String),

    /// A second registry entry was requested for an owner that already has one.
    #[error("an instance is already registered for owner {owner}")]
    DoubleRegistration { owner: OwnerId },

    // -- Call-site validation --
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Contract violation on a lifecycle primitive (thread handle misuse).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    // -- Asynchronous backend calls --
    #[error("operation failed: {0}")]
    OperationFailed(OperationError),

    // -- Configuration / persistence --
    #[error("configuration error: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl KeelError {
    /// Whether this error is a programming error that must terminate the
    /// process rather than be handed back to the caller.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidOperation(_) | Self::DoubleRegistration { .. }
        )
    }
}

impl From<OperationError> for KeelError {
    fn from(err: OperationError) -> Self {
        Self::OperationFailed(err)
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, KeelError>;
