// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core identifiers and payload types shared by the runtime, bridge and
// client crates.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of an owning context (an app).
///
/// Two owners are the same only if they share this id; every owner minted by
/// [`OwnerId::new`] is distinct, which gives the reference-equality semantics
/// the registry keys on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub Uuid);

impl OwnerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a single client instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub Uuid);

impl InstanceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status codes reported by native backends when an asynchronous call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    /// The operation was rejected because the system is not in a state
    /// required for it (e.g. the client has been torn down).
    FailedPrecondition,
    Aborted,
    Unimplemented,
    Internal,
    Unavailable,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
            Self::InvalidArgument => "invalid-argument",
            Self::DeadlineExceeded => "deadline-exceeded",
            Self::NotFound => "not-found",
            Self::AlreadyExists => "already-exists",
            Self::PermissionDenied => "permission-denied",
            Self::ResourceExhausted => "resource-exhausted",
            Self::FailedPrecondition => "failed-precondition",
            Self::Aborted => "aborted",
            Self::Unimplemented => "unimplemented",
            Self::Internal => "internal",
            Self::Unavailable => "unavailable",
        };
        f.write_str(name)
    }
}

/// Failure payload carried by a failed future.
///
/// Cloneable so that every observer of a future sees the same error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationError {
    pub code: ErrorCode,
    pub message: String,
}

impl OperationError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Error returned synchronously for calls made on a torn-down client.
    pub fn instance_destroyed() -> Self {
        Self::new(
            ErrorCode::FailedPrecondition,
            "the client instance has already been destroyed",
        )
    }

    /// Error used to settle operations still pending when their client is
    /// torn down.
    pub fn abandoned() -> Self {
        Self::new(
            ErrorCode::FailedPrecondition,
            "the client instance was destroyed before the operation completed",
        )
    }
}

impl std::fmt::Display for OperationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for OperationError {}

// ---------------------------------------------------------------------------
// Document database payloads
// ---------------------------------------------------------------------------

/// Phase of a bundle load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadBundleState {
    InProgress,
    Success,
    Error,
}

/// Progress snapshot emitted while a bundle is being loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBundleProgress {
    pub documents_loaded: u32,
    pub total_documents: u32,
    pub bytes_loaded: u64,
    pub total_bytes: u64,
    pub state: LoadBundleState,
}

/// A query saved inside a loaded bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedQuery {
    pub name: String,
    /// Collection the query reads from.
    pub collection: String,
}

/// Events pushed by a database backend to its listener set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseEvent {
    /// All active snapshot listeners have observed a consistent state.
    SnapshotsInSync,
}

// ---------------------------------------------------------------------------
// Ad SDK payloads
// ---------------------------------------------------------------------------

/// Opaque native view/activity an ad is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AdParent(pub usize);

/// Targeting data attached to an ad load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdRequest {
    pub keywords: Vec<String>,
    pub content_url: Option<String>,
}

/// Successful ad load description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdResult {
    pub ad_unit_id: String,
    pub response_id: String,
    pub adapter: String,
}

/// Reward granted after a rewarded ad was watched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardItem {
    pub reward_type: String,
    pub amount: u32,
}

/// Events pushed by an ad backend to its listener set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdEvent {
    UserEarnedReward(RewardItem),
    Dismissed,
    FailedToShow(OperationError),
}
