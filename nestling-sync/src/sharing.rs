//! Zone and share lifecycle.
//!
//! Each shared profile lives in its own zone, `Shared-<profile id>`, in the
//! owner's database. The share object is rooted at the profile's record and
//! is never cached: every operation starts by fetching it again, and any
//! local claim of being shared that the relay cannot back up is reset.
//!
//! Zone and record absence is an expected branch here, handled by falling
//! back to fresh creation. Everything else is returned as a
//! [`SharingError`] and reflected in the published [`SharingState`].

use crate::codec;
use crate::engine::SyncEngine;
use crate::error::{RelayError, SharingError, SharingResult};
use crate::record::{RecordId, ZoneId};
use crate::relay::SaveBatch;
use crate::share::{Participant, Share};
use crate::status::SharingState;
use crate::zone::{profile_id_for_zone, zone_for};
use nestling_model::{Entity, Profile};
use nestling_storage::LocalStoreExt;
use nestling_types::ProfileId;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

/// Manages zones, shares and participants for shared profiles.
pub struct ShareManager {
    engine: Arc<SyncEngine>,
    status: watch::Sender<SharingState>,
    /// Serializes get-or-create per profile.
    unit_locks: Mutex<HashMap<ProfileId, Arc<AsyncMutex<()>>>>,
}

impl ShareManager {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        let (status, _) = watch::channel(SharingState::default());
        Self {
            engine,
            status,
            unit_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// The most recently published sharing state.
    pub fn state(&self) -> SharingState {
        self.status.borrow().clone()
    }

    /// Observes every published sharing state.
    pub fn subscribe(&self) -> watch::Receiver<SharingState> {
        self.status.subscribe()
    }

    fn publish(&self, state: SharingState) {
        self.status.send_replace(state);
    }

    fn unit_lock(&self, profile_id: ProfileId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.unit_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(profile_id).or_default())
    }

    /// Drops a profile's lock entry unless another call is holding or
    /// waiting on it.
    fn release_unit_lock(&self, profile_id: ProfileId) {
        let mut locks = self.unit_locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&profile_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&profile_id);
        }
    }

    /// Number of profiles with a lifecycle lock entry.
    pub fn tracked_units(&self) -> usize {
        self.unit_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn own_zone(&self, profile_id: ProfileId) -> ZoneId {
        zone_for(profile_id, &self.engine.relay().current_user().user_id)
    }

    fn owned_profile(&self, profile_id: ProfileId, action: &'static str) -> SharingResult<Profile> {
        let profile = self.engine.load_profile(profile_id)?;
        if !profile.is_owned_locally() {
            return Err(SharingError::NotOwner(action));
        }
        Ok(profile)
    }

    /// Publishes the outcome of a lifecycle operation and passes it through.
    fn settle(
        &self,
        profile_id: ProfileId,
        result: SharingResult<SharingState>,
    ) -> SharingResult<SharingState> {
        match &result {
            Ok(state) => self.publish(state.clone()),
            Err(e) => self.publish(SharingState::failed(profile_id, e)),
        }
        result
    }

    // ── Zones ────────────────────────────────────────────────────

    /// Creates the profile's zone. An existing zone counts as success.
    pub async fn ensure_zone(&self, profile_id: ProfileId) -> SharingResult<ZoneId> {
        let zone = self.own_zone(profile_id);
        match self.engine.relay().create_zone(&zone).await {
            Ok(()) => Ok(zone),
            Err(RelayError::AlreadyExists(_)) => {
                debug!(%profile_id, "Zone {} already exists", zone);
                Ok(zone)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes owned `Shared-*` zones whose profile no longer exists locally.
    pub async fn cleanup_orphaned_zones(&self) -> SharingResult<Vec<ZoneId>> {
        let zones = self.engine.relay().list_owned_zones().await?;
        let local: HashSet<ProfileId> = self
            .engine
            .store()
            .profiles()?
            .into_iter()
            .map(|p| p.id)
            .collect();

        let mut removed = Vec::new();
        for zone in zones {
            let Some(profile_id) = profile_id_for_zone(&zone.name) else {
                continue;
            };
            if local.contains(&profile_id) {
                continue;
            }
            match self.engine.relay().delete_zone(&zone).await {
                Ok(()) => {
                    info!(%profile_id, "Deleted orphaned zone {}", zone);
                    removed.push(zone);
                }
                Err(e) if e.is_absence() => {}
                Err(e) => warn!("Failed to delete orphaned zone {}: {}", zone, e),
            }
        }
        Ok(removed)
    }

    // ── Shares ───────────────────────────────────────────────────

    /// Returns the profile's share, creating zone, root record and share if
    /// none can be found.
    pub async fn get_or_create_share(&self, profile_id: ProfileId) -> SharingResult<SharingState> {
        let lock = self.unit_lock(profile_id);
        let _guard = lock.lock().await;

        self.publish(SharingState::preparing(profile_id));
        let result = self.get_or_create_locked(profile_id).await;
        self.settle(profile_id, result)
    }

    async fn get_or_create_locked(&self, profile_id: ProfileId) -> SharingResult<SharingState> {
        let mut profile = self.owned_profile(profile_id, "share a profile")?;

        if let Some(share) = self.find_share(&profile).await? {
            if !profile.is_shared {
                info!(%profile_id, "Found existing share; marking profile shared");
                profile.is_shared = true;
                self.engine.store().insert(Entity::Profile(profile))?;
                self.engine.persist();
            }
            self.engine.state().write().await.add_shared(profile_id);
            return Ok(SharingState::active(profile_id, share.participants, share.url));
        }

        if profile.is_shared || profile.remote_record_name.is_some() {
            info!(%profile_id, "Local sharing state is stale; resetting");
            profile.clear_sharing();
            self.engine.store().insert(Entity::Profile(profile.clone()))?;
            self.engine.persist();
            self.engine.state().write().await.remove_shared(profile_id);
        }

        self.create_fresh_share(profile).await
    }

    /// Follows the profile's root record to its share. `None` when the
    /// zone, the root record, or the share is missing.
    async fn find_share(&self, profile: &Profile) -> SharingResult<Option<Share>> {
        let zone = self.own_zone(profile.id);
        let root_id = match &profile.remote_record_name {
            Some(name) => RecordId::new(zone, name.clone()),
            None => codec::root_record_id(&zone, profile.id),
        };

        let root = match self.engine.relay().fetch_record(&root_id).await {
            Ok(root) => root,
            Err(e) if e.is_absence() => {
                debug!(profile_id = %profile.id, "No root record: {}", e);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let Some(share_id) = root.share else {
            debug!(profile_id = %profile.id, "Root record has no share");
            return Ok(None);
        };

        match self.engine.relay().fetch_share(&share_id).await {
            Ok(share) => Ok(Some(share)),
            Err(e) if e.is_absence() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn require_share(&self, profile: &Profile) -> SharingResult<Share> {
        self.find_share(profile)
            .await?
            .ok_or(SharingError::NotShared(profile.id))
    }

    /// Recreates the zone from scratch and commits root and share together.
    /// Entries follow in separate, non-atomic batches.
    async fn create_fresh_share(&self, profile: Profile) -> SharingResult<SharingState> {
        let profile_id = profile.id;
        let zone = self.own_zone(profile_id);
        let relay = self.engine.relay();

        match relay.delete_zone(&zone).await {
            Ok(()) => debug!(%profile_id, "Deleted stale zone {}", zone),
            Err(e) if e.is_absence() => {}
            Err(e) => return Err(e.into()),
        }
        self.ensure_zone(profile_id).await?;

        let mut root = codec::encode(&Entity::Profile(profile.clone()), &zone);
        root.change_tag = None;
        let share = Share::rooted_at(&root, relay.current_user().clone())
            .with_title(profile.name.clone());

        let saved = relay.save(SaveBatch::rooted_share(root, share)).await?;
        let share = saved
            .shares
            .into_iter()
            .next()
            .ok_or_else(|| RelayError::Rejected("relay returned no share".into()))?;

        let mut entity = Entity::Profile(profile);
        if let Some(root) = saved.records.first() {
            codec::decode(root, &mut entity)?;
        }
        if let Entity::Profile(profile) = &mut entity {
            profile.is_shared = true;
            profile.remote_record_name = Some(share.root.name.clone());
        }
        self.engine.store().insert(entity)?;
        self.engine.persist();
        self.engine.state().write().await.add_shared(profile_id);
        info!(%profile_id, "Created share {}", share.id);

        let dependents = self.engine.store().dependents_of(profile_id)?;
        let pushed = self.engine.write_records(&zone, dependents).await?;
        debug!(%profile_id, records = pushed.records, "Pushed entries to new share");

        Ok(SharingState::active(profile_id, share.participants, share.url))
    }

    // ── Participants ─────────────────────────────────────────────

    /// Invites the account registered under `email`. Only the share object
    /// is re-saved; the root record is left alone.
    pub async fn add_participant(
        &self,
        email: &str,
        profile_id: ProfileId,
    ) -> SharingResult<SharingState> {
        let result = self.add_participant_inner(email, profile_id).await;
        self.settle(profile_id, result)
    }

    async fn add_participant_inner(
        &self,
        email: &str,
        profile_id: ProfileId,
    ) -> SharingResult<SharingState> {
        let profile = self.owned_profile(profile_id, "invite participants")?;
        let mut share = self.require_share(&profile).await?;

        let identity = match self.engine.relay().lookup_identity(email).await {
            Ok(identity) => identity,
            Err(e) if e.is_absence() => {
                return Err(SharingError::ParticipantNotFound(email.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        info!(%profile_id, user = %identity.user_id, "Adding participant");
        share.add_participant(Participant::invited(
            identity,
            self.engine.config().participant_permission,
        ));

        let share = self.save_share(share).await?;
        Ok(SharingState::active(profile_id, share.participants, share.url))
    }

    /// Removes a participant, then reports the share as the relay returned it.
    pub async fn remove_participant(
        &self,
        user_id: &str,
        profile_id: ProfileId,
    ) -> SharingResult<SharingState> {
        let result = self.remove_participant_inner(user_id, profile_id).await;
        self.settle(profile_id, result)
    }

    async fn remove_participant_inner(
        &self,
        user_id: &str,
        profile_id: ProfileId,
    ) -> SharingResult<SharingState> {
        let profile = self.owned_profile(profile_id, "remove participants")?;
        let mut share = self.require_share(&profile).await?;
        if !share.remove_participant(user_id) {
            return Err(SharingError::ParticipantNotFound(user_id.to_string()));
        }
        info!(%profile_id, user = %user_id, "Removing participant");

        let share = self.save_share(share).await?;
        Ok(SharingState::active(profile_id, share.participants, share.url))
    }

    async fn save_share(&self, share: Share) -> SharingResult<Share> {
        let saved = self.engine.relay().save(SaveBatch::share_only(share)).await?;
        saved
            .shares
            .into_iter()
            .next()
            .ok_or_else(|| RelayError::Rejected("relay returned no share".into()).into())
    }

    /// Re-fetches the share and refreshes the published participant list.
    pub async fn fetch_participants(
        &self,
        profile_id: ProfileId,
    ) -> SharingResult<Vec<Participant>> {
        let profile = self.engine.load_profile(profile_id)?;
        let share = if profile.is_owned_locally() {
            self.require_share(&profile).await?
        } else {
            let zone = self.engine.resolve_zone(&profile).await?;
            let root_id = codec::root_record_id(&zone, profile_id);
            let root = self.engine.relay().fetch_record(&root_id).await?;
            let share_id = root.share.ok_or(SharingError::NotShared(profile_id))?;
            self.engine.relay().fetch_share(&share_id).await?
        };

        self.publish(SharingState::active(
            profile_id,
            share.participants.clone(),
            share.url,
        ));
        Ok(share.participants)
    }

    // ── Teardown ─────────────────────────────────────────────────

    /// Deletes the profile's zone, with its records and share.
    ///
    /// Local sharing state is cleared whatever the relay says. A delete that
    /// failed for a reason other than absence is still returned afterwards.
    pub async fn stop_sharing(&self, profile_id: ProfileId) -> SharingResult<()> {
        let lock = self.unit_lock(profile_id);
        let result = {
            let _guard = lock.lock().await;
            self.stop_sharing_locked(profile_id).await
        };
        drop(lock);
        self.release_unit_lock(profile_id);
        result
    }

    async fn stop_sharing_locked(&self, profile_id: ProfileId) -> SharingResult<()> {
        let profile = match self.engine.load_profile(profile_id) {
            Ok(profile) => Some(profile),
            Err(SharingError::ProfileNotFound(_)) => None,
            Err(e) => return Err(e),
        };
        if profile.as_ref().is_some_and(|p| !p.is_owned_locally()) {
            return Err(SharingError::NotOwner("stop sharing"));
        }

        let zone = self.own_zone(profile_id);
        let outcome = self.engine.relay().delete_zone(&zone).await;

        match profile {
            Some(profile) => self.engine.reset_sharing(profile).await?,
            None => {
                self.engine.state().write().await.remove_shared(profile_id);
            }
        }
        self.publish(SharingState::stopped(profile_id));

        match outcome {
            Ok(()) => {
                info!(%profile_id, "Stopped sharing; deleted {}", zone);
                Ok(())
            }
            Err(e) if e.is_absence() => {
                debug!(%profile_id, "Zone {} was already gone", zone);
                Ok(())
            }
            Err(e) => {
                warn!(%profile_id, "Zone delete failed after local reset: {}", e);
                Err(e.into())
            }
        }
    }
}
