//! Error types for the sync layer.

use nestling_storage::StorageError;
use nestling_types::ProfileId;
use thiserror::Error;

/// Result type for relay calls.
pub type RelayResult<T> = Result<T, RelayError>;

/// Result type for sharing and reconciliation operations.
pub type SharingResult<T> = Result<T, SharingError>;

/// Failure categories reported by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// The record does not exist.
    #[error("record not found: {0}")]
    NotFound(String),

    /// The zone does not exist or is not visible to this account.
    #[error("zone not found: {0}")]
    ZoneNotFound(String),

    /// The zone already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The record changed on the server since it was fetched.
    #[error("record changed on server: {0}")]
    Conflict(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("storage quota exceeded")]
    QuotaExceeded,

    /// Network or service failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The request was malformed (unrooted share, oversize batch).
    #[error("request rejected: {0}")]
    Rejected(String),

    /// Some records of a non-atomic write were not saved.
    #[error("partial failure: {saved} saved, {} failed", failed.len())]
    PartialFailure {
        saved: usize,
        failed: Vec<(String, String)>,
    },
}

impl RelayError {
    /// True for the "nothing there" family, which callers handle as an
    /// expected branch rather than a failure.
    pub fn is_absence(&self) -> bool {
        matches!(self, RelayError::NotFound(_) | RelayError::ZoneNotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        match self {
            RelayError::Conflict(_) => true,
            RelayError::PartialFailure { failed, .. } => {
                failed.iter().any(|(_, reason)| reason.contains("changed on server"))
            }
            _ => false,
        }
    }
}

/// Errors raised by a record decode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("record type {found} cannot be decoded onto a {expected}")]
    KindMismatch { expected: String, found: String },

    #[error("record {record} does not belong to entity {entity}")]
    IdentityMismatch { record: String, entity: String },

    #[error("record name is not an identifier: {0}")]
    MalformedIdentity(String),
}

/// The typed sharing failure surfaced to callers.
#[derive(Debug, Error)]
pub enum SharingError {
    #[error("profile not found: {0}")]
    ProfileNotFound(ProfileId),

    #[error("profile {0} is not shared")]
    NotShared(ProfileId),

    #[error("shared zone for profile {0} is not visible to this account")]
    ZoneUnavailable(ProfileId),

    #[error("only the owner can {0}")]
    NotOwner(&'static str),

    #[error("participant not found: {0}")]
    ParticipantNotFound(String),

    #[error("invalid record: {0}")]
    InvalidRecord(#[from] CodecError),

    #[error("relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl SharingError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, SharingError::Relay(e) if e.is_conflict())
    }
}
