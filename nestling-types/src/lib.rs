//! Core type definitions for Nestling.
//!
//! This crate defines the identifier types shared by the model, the local
//! store and the sync engine:
//! - Profile identifiers (the root of a shareable group)
//! - Entry identifiers (activities, growth measurements, health records)
//!
//! Both are UUID v7 so that they sort by creation time and stay globally
//! unique across devices. An identifier is reused verbatim as the cloud
//! record name, which is what keeps repeated pulls from duplicating rows.

mod ids;

pub use ids::{EntryId, ProfileId};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),
}
