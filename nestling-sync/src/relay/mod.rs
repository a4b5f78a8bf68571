//! Relay collaborator.
//!
//! The relay is a third-party service offering record storage in
//! owner-scoped zones, share objects, and invitation redemption. It has no
//! notion of application-level sync; everything above record storage is
//! this crate's job.

pub mod memory;

use crate::error::{RelayError, RelayResult};
use crate::record::{CloudRecord, RecordId, SavePolicy, ZoneId};
use crate::share::{Share, ShareMetadata, UserIdentity};
use async_trait::async_trait;
use nestling_model::EntityKind;
use tracing::debug;

/// A multi-object write.
#[derive(Debug, Clone)]
pub struct SaveBatch {
    pub records: Vec<CloudRecord>,
    pub shares: Vec<Share>,
    pub policy: SavePolicy,
    /// All-or-nothing when set. A share can only be saved atomically with,
    /// or after, its root record.
    pub atomic: bool,
}

impl SaveBatch {
    pub fn records(records: Vec<CloudRecord>, policy: SavePolicy) -> Self {
        Self {
            records,
            shares: Vec::new(),
            policy,
            atomic: false,
        }
    }

    pub fn share_only(share: Share) -> Self {
        Self {
            records: Vec::new(),
            shares: vec![share],
            policy: SavePolicy::IfUnmodified,
            atomic: true,
        }
    }

    /// A root record and the share rooted on it, committed together.
    pub fn rooted_share(root: CloudRecord, share: Share) -> Self {
        Self {
            records: vec![root],
            shares: vec![share],
            policy: SavePolicy::IfUnmodified,
            atomic: true,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len() + self.shares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The server's view of what a [`SaveBatch`] committed.
#[derive(Debug, Clone, Default)]
pub struct SavedBatch {
    pub records: Vec<CloudRecord>,
    pub shares: Vec<Share>,
}

/// Abstract relay interface.
#[async_trait]
pub trait Relay: Send + Sync {
    /// The account this client is signed in as.
    fn current_user(&self) -> &UserIdentity;

    /// Creates a zone in the caller's database.
    /// Fails with `AlreadyExists` if it is already there.
    async fn create_zone(&self, zone: &ZoneId) -> RelayResult<()>;

    /// Deletes a zone together with every record and share in it.
    async fn delete_zone(&self, zone: &ZoneId) -> RelayResult<()>;

    /// Zones in the caller's own database.
    async fn list_owned_zones(&self) -> RelayResult<Vec<ZoneId>>;

    /// Zones owned by others that the caller has accepted a share into.
    async fn list_shared_zones(&self) -> RelayResult<Vec<ZoneId>>;

    async fn fetch_record(&self, id: &RecordId) -> RelayResult<CloudRecord>;

    /// All records of one type in a zone.
    async fn query_records(
        &self,
        zone: &ZoneId,
        record_type: EntityKind,
    ) -> RelayResult<Vec<CloudRecord>>;

    async fn save(&self, batch: SaveBatch) -> RelayResult<SavedBatch>;

    /// Deletes records. Missing records are ignored.
    async fn delete_records(&self, ids: &[RecordId]) -> RelayResult<()>;

    async fn fetch_share(&self, id: &RecordId) -> RelayResult<Share>;

    /// Redeems an invitation token, making the share's zone visible.
    async fn accept_share(&self, token: &str) -> RelayResult<ShareMetadata>;

    /// Resolves a contact identifier (email) to a relay account.
    async fn lookup_identity(&self, email: &str) -> RelayResult<UserIdentity>;
}

/// Writes records in relay-sized chunks, non-atomically.
///
/// Stops at the first failing chunk; chunks already written stay written.
pub async fn save_in_batches(
    relay: &dyn Relay,
    records: Vec<CloudRecord>,
    batch_size: usize,
    policy: SavePolicy,
) -> RelayResult<Vec<CloudRecord>> {
    let batch_size = batch_size.max(1);
    let total = records.len();
    let mut saved = Vec::with_capacity(total);

    let mut remaining = records.into_iter().peekable();
    let mut seq = 0;
    while remaining.peek().is_some() {
        let chunk: Vec<CloudRecord> = remaining.by_ref().take(batch_size).collect();
        debug!("Saving batch {} ({} records)", seq, chunk.len());
        let result = relay.save(SaveBatch::records(chunk, policy)).await?;
        saved.extend(result.records);
        seq += 1;
    }

    if saved.len() != total {
        return Err(RelayError::PartialFailure {
            saved: saved.len(),
            failed: Vec::new(),
        });
    }
    Ok(saved)
}
