//! Reconciliation engine.
//!
//! Pulls every record of a shared profile's zone and merges it into the
//! local store by identity, and pushes local state back to the zone with an
//! overwrite policy. The merge is keyed by the record name, which is the
//! entity's UUID, so repeated pulls or share acceptances never create a
//! second local row for the same record.
//!
//! Merge is last-write-wins at whole-record granularity: a remote record
//! replaces the local entity unless the local copy carries a strictly newer
//! `updated_at`, in which case the next push wins instead.

use crate::codec;
use crate::config::SyncConfig;
use crate::error::{CodecError, RelayError, RelayResult, SharingError, SharingResult};
use crate::record::{CloudRecord, RecordId, SavePolicy, ZoneId};
use crate::relay::{save_in_batches, Relay};
use crate::state::SyncState;
use crate::zone::{zone_for, zone_name_for};
use chrono::Utc;
use futures::future::join_all;
use nestling_model::{Entity, EntityKey, EntityKind, Profile};
use nestling_storage::{LocalStore, LocalStoreExt};
use nestling_types::ProfileId;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What a merge did to the local store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullReport {
    /// Records that had no local row and were materialized.
    pub inserted: usize,
    /// Existing rows the remote record changed.
    pub updated: usize,
    /// Existing rows already equal to the remote record.
    pub unchanged: usize,
    /// Rows kept because the local copy is newer.
    pub kept_local: usize,
    /// Records that could not be decoded or belong to another profile.
    pub skipped: usize,
}

impl PullReport {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.unchanged + self.kept_local + self.skipped
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushReport {
    pub records: usize,
    pub batches: usize,
}

/// Outcome of redeeming an invitation.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptReport {
    pub profile_id: ProfileId,
    pub owner_display_name: String,
    pub merge: PullReport,
}

/// The reconciliation engine.
pub struct SyncEngine {
    relay: Arc<dyn Relay>,
    store: Arc<dyn LocalStore>,
    config: SyncConfig,
    state: Arc<RwLock<SyncState>>,
}

impl SyncEngine {
    pub fn new(relay: Arc<dyn Relay>, store: Arc<dyn LocalStore>, config: SyncConfig) -> Self {
        Self::with_state(relay, store, config, SyncState::new())
    }

    /// Creates an engine resuming from a persisted registry.
    pub fn with_state(
        relay: Arc<dyn Relay>,
        store: Arc<dyn LocalStore>,
        config: SyncConfig,
        state: SyncState,
    ) -> Self {
        Self {
            relay,
            store,
            config,
            state: Arc::new(RwLock::new(state)),
        }
    }

    pub fn relay(&self) -> &Arc<dyn Relay> {
        &self.relay
    }

    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The shared-profile registry.
    pub fn state(&self) -> &Arc<RwLock<SyncState>> {
        &self.state
    }

    /// A copy of the registry, for the host to persist.
    pub async fn snapshot(&self) -> SyncState {
        self.state.read().await.clone()
    }

    pub(crate) fn load_profile(&self, profile_id: ProfileId) -> SharingResult<Profile> {
        self.store
            .profile(profile_id)?
            .ok_or(SharingError::ProfileNotFound(profile_id))
    }

    /// Commits staged local changes. Failures are logged, not surfaced.
    pub(crate) fn persist(&self) {
        if let Err(e) = self.store.save() {
            warn!("Local save failed, changes stay staged: {}", e);
        }
    }

    // ── Zone resolution ──────────────────────────────────────────

    /// The zone holding a profile's records, as seen by this account.
    ///
    /// The owner's zone is derived from the profile ID; a participant finds
    /// it by name among the zones shared with them.
    pub async fn resolve_zone(&self, profile: &Profile) -> SharingResult<ZoneId> {
        let me = &self.relay.current_user().user_id;
        if profile.is_owned_locally() {
            return Ok(zone_for(profile.id, me));
        }

        let name = zone_name_for(profile.id);
        self.relay
            .list_shared_zones()
            .await?
            .into_iter()
            .find(|z| z.name == name)
            .ok_or(SharingError::ZoneUnavailable(profile.id))
    }

    /// Every record in a zone, all kinds fetched concurrently.
    pub(crate) async fn fetch_zone(&self, zone: &ZoneId) -> RelayResult<Vec<CloudRecord>> {
        let queries = EntityKind::ALL
            .into_iter()
            .map(|kind| self.relay.query_records(zone, kind));

        let mut records = Vec::new();
        for result in join_all(queries).await {
            records.extend(result?);
        }
        debug!("Fetched {} records from {}", records.len(), zone);
        Ok(records)
    }

    // ── Pull ─────────────────────────────────────────────────────

    /// Fetches a profile's zone and merges it into the local store.
    ///
    /// If the zone is gone, or a participant can no longer see it, the
    /// profile's sharing state is reset and `NotShared` is returned. A
    /// participant's copy keeps its data and its owner's name.
    pub async fn pull(&self, profile_id: ProfileId) -> SharingResult<PullReport> {
        let profile = self.load_profile(profile_id)?;
        let zone = match self.resolve_zone(&profile).await {
            Ok(zone) => zone,
            Err(SharingError::ZoneUnavailable(_)) => {
                warn!(%profile_id, "Shared zone is no longer visible; resetting sharing state");
                self.reset_sharing(profile).await?;
                return Err(SharingError::NotShared(profile_id));
            }
            Err(e) => return Err(e),
        };

        let records = match self.fetch_zone(&zone).await {
            Ok(records) => records,
            Err(RelayError::ZoneNotFound(_)) => {
                warn!(%profile_id, "Zone {} is gone; resetting sharing state", zone);
                self.reset_sharing(profile).await?;
                return Err(SharingError::NotShared(profile_id));
            }
            Err(e) => return Err(e.into()),
        };

        let report = self.merge(profile_id, &records)?;
        self.persist();
        self.state.write().await.record_pull(profile_id, Utc::now());

        info!(
            %profile_id,
            inserted = report.inserted,
            updated = report.updated,
            "Pulled {}",
            zone
        );
        Ok(report)
    }

    /// Merges records into the local store, keyed by identity.
    fn merge(&self, profile_id: ProfileId, records: &[CloudRecord]) -> SharingResult<PullReport> {
        let mut report = PullReport::default();

        for record in records {
            let key = match codec::identity_of(record) {
                Ok(key) => key,
                Err(e) => {
                    warn!("Skipping record {}: {}", record.id, e);
                    report.skipped += 1;
                    continue;
                }
            };
            if !belongs_to(record, key, profile_id) {
                debug!("Skipping record {} of another profile", record.id);
                report.skipped += 1;
                continue;
            }

            match self.store.get(key)? {
                Some(mut local) => {
                    let remote_updated = codec::updated_at_of(record);
                    if remote_updated.is_some_and(|remote| local.updated_at() > remote) {
                        report.kept_local += 1;
                        continue;
                    }
                    let before = local.clone();
                    if let Err(e) = codec::decode(record, &mut local) {
                        warn!("Skipping record {}: {}", record.id, e);
                        report.skipped += 1;
                        continue;
                    }
                    if local == before {
                        report.unchanged += 1;
                    } else {
                        self.store.insert(local)?;
                        report.updated += 1;
                    }
                }
                None => match codec::materialize(record, profile_id) {
                    Ok(entity) => {
                        self.store.insert(entity)?;
                        report.inserted += 1;
                    }
                    Err(e) => {
                        warn!("Skipping record {}: {}", record.id, e);
                        report.skipped += 1;
                    }
                },
            }
        }

        Ok(report)
    }

    // ── Push ─────────────────────────────────────────────────────

    /// Writes a profile and all of its entries to its zone.
    pub async fn push(&self, profile_id: ProfileId) -> SharingResult<PushReport> {
        let profile = self.load_profile(profile_id)?;
        if !profile.is_shared {
            return Err(SharingError::NotShared(profile_id));
        }
        let zone = self.resolve_zone(&profile).await?;

        let mut entities = vec![Entity::Profile(profile)];
        entities.extend(self.store.dependents_of(profile_id)?);

        let report = self.write_records(&zone, entities).await?;
        self.state.write().await.record_push(profile_id, Utc::now());
        info!(%profile_id, records = report.records, "Pushed to {}", zone);
        Ok(report)
    }

    /// Encodes entities and saves them in relay-sized batches with the
    /// overwrite policy, then refreshes their local change tags.
    ///
    /// A failing batch aborts the write; earlier batches stay committed.
    pub(crate) async fn write_records(
        &self,
        zone: &ZoneId,
        entities: Vec<Entity>,
    ) -> SharingResult<PushReport> {
        if entities.is_empty() {
            return Ok(PushReport::default());
        }
        let batch_size = self.config.effective_batch_size();
        let records: Vec<CloudRecord> = entities.iter().map(|e| codec::encode(e, zone)).collect();
        let report = PushReport {
            records: records.len(),
            batches: records.len().div_ceil(batch_size),
        };

        let saved =
            save_in_batches(self.relay.as_ref(), records, batch_size, SavePolicy::Overwrite)
                .await?;
        self.apply_saved(&saved)?;
        self.persist();
        Ok(report)
    }

    /// Refreshes the change tags of freshly saved records on their local
    /// rows. The rows may have been edited while the save was in flight, so
    /// their content is not touched.
    fn apply_saved(&self, saved: &[CloudRecord]) -> SharingResult<()> {
        for record in saved {
            let key = codec::identity_of(record)?;
            if let Some(mut local) = self.store.get(key)? {
                codec::refresh_bookkeeping(record, &mut local)?;
                self.store.insert(local)?;
            }
        }
        Ok(())
    }

    // ── Acceptance ───────────────────────────────────────────────

    /// Redeems an invitation and merges the shared zone into the local store.
    ///
    /// Safe to run more than once for the same invitation: the second run
    /// finds every record already present and updates it in place.
    pub async fn accept_share(&self, token: &str) -> SharingResult<AcceptReport> {
        let metadata = self.relay.accept_share(token).await?;
        let root_id = metadata.root_record_id.clone();
        let profile_id = Uuid::parse_str(&root_id.name)
            .map(ProfileId::from_uuid)
            .map_err(|_| CodecError::MalformedIdentity(root_id.name.clone()))?;

        let records = self.fetch_zone(&root_id.zone).await?;
        let (roots, dependents): (Vec<CloudRecord>, Vec<CloudRecord>) =
            records.into_iter().partition(|r| r.id == root_id);
        let root = roots
            .first()
            .ok_or_else(|| RelayError::NotFound(root_id.to_string()))?;

        let existing = self.store.profile(profile_id)?;
        let root_existed = existing.is_some();
        let mut entity = match existing {
            Some(existing) => {
                let mut entity = Entity::Profile(existing);
                codec::decode(root, &mut entity)?;
                entity
            }
            None => codec::materialize(root, profile_id)?,
        };

        let me = &self.relay.current_user().user_id;
        if let Entity::Profile(profile) = &mut entity {
            if metadata.owner.user_id != *me {
                profile.owner_display_name = Some(metadata.owner.display_name.clone());
            }
            profile.is_shared = true;
        }
        self.store.insert(entity)?;

        let mut merge = self.merge(profile_id, &dependents)?;
        if root_existed {
            merge.updated += 1;
        } else {
            merge.inserted += 1;
        }
        self.persist();

        let mut state = self.state.write().await;
        state.add_shared(profile_id);
        state.record_pull(profile_id, Utc::now());
        drop(state);

        info!(
            %profile_id,
            owner = %metadata.owner.display_name,
            inserted = merge.inserted,
            "Accepted share"
        );
        Ok(AcceptReport {
            profile_id,
            owner_display_name: metadata.owner.display_name,
            merge,
        })
    }

    // ── Removal ──────────────────────────────────────────────────

    /// Removes one entry from the profile's zone after a local delete.
    /// An entry that is already gone remotely is not an error.
    pub async fn delete_remote(&self, profile_id: ProfileId, key: EntityKey) -> SharingResult<()> {
        let profile = self.load_profile(profile_id)?;
        let zone = self.resolve_zone(&profile).await?;
        let id: RecordId = codec::record_id_for(&zone, key);

        match self.relay.delete_records(std::slice::from_ref(&id)).await {
            Ok(()) => {
                debug!(%profile_id, "Deleted remote record {}", id);
                Ok(())
            }
            Err(e) if e.is_absence() => {
                debug!(%profile_id, "Remote record {} already gone", id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drops a participant's local copy of someone else's profile.
    pub async fn leave_share(&self, profile_id: ProfileId) -> SharingResult<()> {
        let profile = self.load_profile(profile_id)?;
        if profile.is_owned_locally() {
            return Err(SharingError::NotShared(profile_id));
        }
        self.store
            .delete(EntityKey::new(EntityKind::Profile, profile_id.as_uuid()))?;
        self.persist();
        self.state.write().await.remove_shared(profile_id);
        info!(%profile_id, "Left share");
        Ok(())
    }

    /// Clears a profile's sharing flags and drops it from the registry.
    pub(crate) async fn reset_sharing(&self, mut profile: Profile) -> SharingResult<()> {
        let profile_id = profile.id;
        profile.clear_sharing();
        self.store.insert(Entity::Profile(profile))?;
        self.persist();
        self.state.write().await.remove_shared(profile_id);
        Ok(())
    }
}

/// Whether a record is part of `profile_id`'s unit.
fn belongs_to(record: &CloudRecord, key: EntityKey, profile_id: ProfileId) -> bool {
    match key.kind {
        EntityKind::Profile => key.id == profile_id.as_uuid(),
        _ => codec::parent_profile_of(record).is_none_or(|parent| parent == profile_id),
    }
}
