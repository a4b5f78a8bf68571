//! Sharing and replication engine for Nestling.
//!
//! Keeps a profile and its entries consistent across accounts through a
//! relay that only offers record storage in zones plus a share primitive.
//!
//! # Architecture
//!
//! ## Components
//!
//! - **Codec**: maps local entities to flat cloud records and back
//! - **Relay**: the storage service, behind the [`Relay`] trait
//! - **Sharing**: provisions zones and shares, manages participants
//! - **Engine**: pulls zones into the local store and pushes local state out
//! - **Orchestrator**: runs single-flight passes over every shared profile
//!
//! ## Data flow
//!
//! 1. A local edit triggers a pass, which pushes the profile's records
//! 2. A remote change (notification or foreground) triggers a pass, which
//!    pulls the zone and merges records by identity
//! 3. Merge is last-write-wins per record; nothing is merged field by field
//!
//! # Example
//!
//! ```
//! use nestling_storage::MemoryStore;
//! use nestling_sync::relay::memory::RelayBackend;
//! use nestling_sync::{ShareManager, SyncConfig, SyncEngine, UserIdentity};
//! use std::sync::Arc;
//!
//! let backend = RelayBackend::new();
//! let relay = backend.register(UserIdentity::new("alice", "Alice"));
//! let engine = SyncEngine::new(
//!     Arc::new(relay),
//!     Arc::new(MemoryStore::new()),
//!     SyncConfig::default(),
//! );
//! let shares = ShareManager::new(Arc::new(engine));
//! ```

pub mod codec;
mod config;
mod engine;
mod error;
mod orchestrator;
pub mod record;
pub mod relay;
mod share;
mod sharing;
pub mod state;
mod status;
pub mod zone;

pub use config::{SyncConfig, MAX_BATCH_SIZE};
pub use engine::{AcceptReport, PullReport, PushReport, SyncEngine};
pub use error::{CodecError, RelayError, RelayResult, SharingError, SharingResult};
pub use orchestrator::{
    OrchestratorHandle, PassOutcome, PassReport, SyncEvent, SyncOrchestrator, SyncTrigger,
};
pub use record::{Asset, CloudRecord, FieldValue, RecordId, SavePolicy, ZoneId};
pub use relay::{Relay, SaveBatch, SavedBatch};
pub use share::{
    AcceptanceStatus, Participant, ParticipantRole, Permission, Share, ShareMetadata,
    UserIdentity, SHARE_RECORD_PREFIX,
};
pub use sharing::ShareManager;
pub use state::{SyncState, UnitSyncState};
pub use status::{SharingState, SharingStatus};
pub use zone::{zone_for, zone_name_for, ZONE_PREFIX};
