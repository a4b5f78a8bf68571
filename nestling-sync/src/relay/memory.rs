//! In-memory relay for tests and offline demos.
//!
//! One [`RelayBackend`] plays the service; each signed-in account gets its
//! own [`MemoryRelay`] client from [`RelayBackend::register`]. The backend
//! enforces the rules the engine relies on: zone ownership, share
//! visibility, change-tag conflicts, atomic root+share commits, rejection of
//! unrooted shares and the per-request record limit. Faults can be injected
//! to exercise failure paths.

use super::{Relay, SaveBatch, SavedBatch};
use crate::config::MAX_BATCH_SIZE;
use crate::error::{RelayError, RelayResult};
use crate::record::{CloudRecord, FieldValue, RecordId, SavePolicy, ZoneId};
use crate::share::{
    AcceptanceStatus, Participant, ParticipantRole, Permission, Share, ShareMetadata, UserIdentity,
};
use async_trait::async_trait;
use nestling_model::EntityKind;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Prefix of every invitation URL handed out by this relay.
pub const INVITATION_URL_BASE: &str = "https://relay.nestling.invalid/share/";

/// Extracts the invitation token from a URL issued by this relay.
pub fn invitation_token(url: &str) -> Option<&str> {
    url.strip_prefix(INVITATION_URL_BASE)
        .filter(|token| !token.is_empty())
}

/// Operation counters, for asserting on traffic in tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub zone_creates: usize,
    pub zone_deletes: usize,
    pub saves: usize,
    pub records_written: usize,
    pub queries: usize,
}

#[derive(Debug, Default)]
struct Faults {
    offline: bool,
    fail_next_share_save: bool,
    fail_zone_deletes: bool,
    record_batches_before_failure: Option<usize>,
}

#[derive(Debug, Default)]
struct ZoneState {
    records: BTreeMap<String, CloudRecord>,
    shares: BTreeMap<String, Share>,
}

#[derive(Debug, Default)]
struct BackendState {
    users: BTreeMap<String, UserIdentity>,
    zones: BTreeMap<ZoneId, ZoneState>,
    assets: HashMap<String, Vec<u8>>,
    invitations: HashMap<String, RecordId>,
    next_tag: u64,
    faults: Faults,
    stats: RelayStats,
}

impl BackendState {
    fn check_online(&self) -> RelayResult<()> {
        if self.faults.offline {
            return Err(RelayError::Transport("relay unreachable".into()));
        }
        Ok(())
    }

    fn next_tag(&mut self) -> String {
        self.next_tag += 1;
        format!("t{}", self.next_tag)
    }

    fn accepted_participant<'a>(&'a self, zone: &ZoneId, user_id: &str) -> Option<&'a Participant> {
        self.zones.get(zone)?.shares.values().find_map(|s| {
            s.participant(user_id)
                .filter(|p| p.acceptance == AcceptanceStatus::Accepted)
        })
    }

    /// A zone the user can see. Zones the user cannot read look absent.
    fn readable(&self, zone: &ZoneId, user_id: &str) -> RelayResult<&ZoneState> {
        let state = self
            .zones
            .get(zone)
            .ok_or_else(|| RelayError::ZoneNotFound(zone.to_string()))?;
        if zone.owner == user_id || self.accepted_participant(zone, user_id).is_some() {
            Ok(state)
        } else {
            Err(RelayError::ZoneNotFound(zone.to_string()))
        }
    }

    fn check_writable(&self, zone: &ZoneId, user_id: &str) -> RelayResult<()> {
        self.readable(zone, user_id)?;
        if zone.owner == user_id {
            return Ok(());
        }
        match self.accepted_participant(zone, user_id) {
            Some(p) if p.permission == Permission::ReadWrite => Ok(()),
            _ => Err(RelayError::Permission(format!("{user_id} cannot write to {zone}"))),
        }
    }

    fn materialize(&self, record: &CloudRecord) -> CloudRecord {
        let mut out = record.clone();
        for value in out.fields.values_mut() {
            if let FieldValue::Asset(asset) = value {
                asset.data = self.assets.get(&asset.digest).cloned();
            }
        }
        out
    }

    fn record_conflicts(&self, record: &CloudRecord, policy: SavePolicy) -> bool {
        if policy != SavePolicy::IfUnmodified {
            return false;
        }
        self.zones
            .get(&record.id.zone)
            .and_then(|z| z.records.get(&record.id.name))
            .is_some_and(|stored| stored.change_tag != record.change_tag)
    }

    fn share_conflicts(&self, share: &Share, policy: SavePolicy) -> bool {
        if policy != SavePolicy::IfUnmodified {
            return false;
        }
        self.zones
            .get(&share.id.zone)
            .and_then(|z| z.shares.get(&share.id.name))
            .is_some_and(|stored| stored.change_tag != share.change_tag)
    }

    fn root_exists(&self, share: &Share, batch: &SaveBatch) -> bool {
        batch.records.iter().any(|r| r.id == share.root)
            || self
                .zones
                .get(&share.root.zone)
                .is_some_and(|z| z.records.contains_key(&share.root.name))
    }

    fn commit_record(&mut self, record: &CloudRecord) -> RecordId {
        let tag = self.next_tag();
        let mut stored = record.clone();
        for value in stored.fields.values_mut() {
            if let FieldValue::Asset(asset) = value {
                if let Some(data) = asset.data.take() {
                    self.assets.insert(asset.digest.clone(), data);
                }
            }
        }
        stored.change_tag = Some(tag);

        let zone = self.zones.entry(record.id.zone.clone()).or_default();
        // The share link is server-managed; clients cannot set or clear it.
        stored.share = zone
            .records
            .get(&record.id.name)
            .and_then(|existing| existing.share.clone());
        zone.records.insert(record.id.name.clone(), stored);
        self.stats.records_written += 1;
        record.id.clone()
    }

    fn commit_share(&mut self, share: &Share) -> RecordId {
        let tag = self.next_tag();
        let existing = self
            .zones
            .get(&share.id.zone)
            .and_then(|z| z.shares.get(&share.id.name))
            .cloned();

        let mut stored = share.clone();
        // Acceptance is decided here, never by the client.
        for p in stored.participants.iter_mut() {
            match existing.as_ref().and_then(|e| e.participant(&p.identity.user_id)) {
                Some(prev) => p.acceptance = prev.acceptance,
                None if p.is_owner() => p.acceptance = AcceptanceStatus::Accepted,
                None => p.acceptance = AcceptanceStatus::Pending,
            }
        }

        stored.url = match existing.and_then(|e| e.url) {
            Some(url) => Some(url),
            None => {
                let token = uuid::Uuid::new_v4().simple().to_string();
                self.invitations.insert(token.clone(), share.id.clone());
                Some(format!("{INVITATION_URL_BASE}{token}"))
            }
        };
        stored.change_tag = Some(tag);

        let zone = self.zones.entry(share.id.zone.clone()).or_default();
        if let Some(root) = zone.records.get_mut(&share.root.name) {
            root.share = Some(share.id.clone());
        }
        zone.shares.insert(share.id.name.clone(), stored);
        share.id.clone()
    }

    fn stored_record(&self, id: &RecordId) -> Option<CloudRecord> {
        self.zones
            .get(&id.zone)
            .and_then(|z| z.records.get(&id.name))
            .map(|r| self.materialize(r))
    }

    fn stored_share(&self, id: &RecordId) -> Option<Share> {
        self.zones
            .get(&id.zone)
            .and_then(|z| z.shares.get(&id.name))
            .cloned()
    }
}

/// The shared service state behind every [`MemoryRelay`] client.
#[derive(Debug, Default)]
pub struct RelayBackend {
    state: Mutex<BackendState>,
}

impl RelayBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Signs an account in, returning a client bound to it.
    pub fn register(self: &Arc<Self>, identity: UserIdentity) -> MemoryRelay {
        if let Ok(mut state) = self.state.lock() {
            state.users.insert(identity.user_id.clone(), identity.clone());
        }
        MemoryRelay {
            backend: Arc::clone(self),
            user: identity,
        }
    }

    fn lock(&self) -> RelayResult<MutexGuard<'_, BackendState>> {
        self.state
            .lock()
            .map_err(|_| RelayError::Transport("relay state poisoned".into()))
    }

    fn with_faults(&self, f: impl FnOnce(&mut Faults)) {
        if let Ok(mut state) = self.state.lock() {
            f(&mut state.faults);
        }
    }

    // ── Fault injection ──────────────────────────────────────────

    /// Every call fails with a transport error while offline.
    pub fn set_offline(&self, offline: bool) {
        self.with_faults(|f| f.offline = offline);
    }

    /// The next save containing a share fails after validation, before
    /// anything in its batch is committed.
    pub fn fail_next_share_save(&self) {
        self.with_faults(|f| f.fail_next_share_save = true);
    }

    pub fn fail_zone_deletes(&self, fail: bool) {
        self.with_faults(|f| f.fail_zone_deletes = fail);
    }

    /// Lets `n` more non-atomic record batches through, then fails the rest.
    pub fn fail_record_batches_after(&self, n: usize) {
        self.with_faults(|f| f.record_batches_before_failure = Some(n));
    }

    pub fn clear_faults(&self) {
        self.with_faults(|f| *f = Faults::default());
    }

    // ── Inspection ───────────────────────────────────────────────

    pub fn stats(&self) -> RelayStats {
        self.state.lock().map(|s| s.stats).unwrap_or_default()
    }

    pub fn zone_exists(&self, zone: &ZoneId) -> bool {
        self.state
            .lock()
            .map(|s| s.zones.contains_key(zone))
            .unwrap_or(false)
    }

    /// Every record in a zone, with assets materialized.
    pub fn records_in(&self, zone: &ZoneId) -> Vec<CloudRecord> {
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };
        state
            .zones
            .get(zone)
            .map(|z| z.records.values().map(|r| state.materialize(r)).collect())
            .unwrap_or_default()
    }

    pub fn share_in(&self, zone: &ZoneId) -> Option<Share> {
        let state = self.state.lock().ok()?;
        state.zones.get(zone)?.shares.values().next().cloned()
    }
}

/// A relay client signed in as one account.
#[derive(Debug, Clone)]
pub struct MemoryRelay {
    backend: Arc<RelayBackend>,
    user: UserIdentity,
}

impl MemoryRelay {
    pub fn backend(&self) -> &Arc<RelayBackend> {
        &self.backend
    }

    fn user_id(&self) -> &str {
        &self.user.user_id
    }
}

#[async_trait]
impl Relay for MemoryRelay {
    fn current_user(&self) -> &UserIdentity {
        &self.user
    }

    async fn create_zone(&self, zone: &ZoneId) -> RelayResult<()> {
        let mut state = self.backend.lock()?;
        state.check_online()?;
        if zone.owner != self.user_id() {
            return Err(RelayError::Permission(format!(
                "cannot create zone in {}'s database",
                zone.owner
            )));
        }
        if state.zones.contains_key(zone) {
            return Err(RelayError::AlreadyExists(zone.to_string()));
        }
        state.zones.insert(zone.clone(), ZoneState::default());
        state.stats.zone_creates += 1;
        info!("Created zone {}", zone);
        Ok(())
    }

    async fn delete_zone(&self, zone: &ZoneId) -> RelayResult<()> {
        let mut state = self.backend.lock()?;
        state.check_online()?;
        if zone.owner != self.user_id() {
            return Err(RelayError::Permission(format!(
                "cannot delete zone in {}'s database",
                zone.owner
            )));
        }
        if state.faults.fail_zone_deletes {
            return Err(RelayError::Transport("injected zone delete failure".into()));
        }
        if state.zones.remove(zone).is_none() {
            return Err(RelayError::ZoneNotFound(zone.to_string()));
        }
        state.invitations.retain(|_, share_id| &share_id.zone != zone);
        state.stats.zone_deletes += 1;
        info!("Deleted zone {}", zone);
        Ok(())
    }

    async fn list_owned_zones(&self) -> RelayResult<Vec<ZoneId>> {
        let state = self.backend.lock()?;
        state.check_online()?;
        Ok(state
            .zones
            .keys()
            .filter(|z| z.owner == self.user_id())
            .cloned()
            .collect())
    }

    async fn list_shared_zones(&self) -> RelayResult<Vec<ZoneId>> {
        let state = self.backend.lock()?;
        state.check_online()?;
        Ok(state
            .zones
            .keys()
            .filter(|z| {
                z.owner != self.user_id()
                    && state.accepted_participant(z, self.user_id()).is_some()
            })
            .cloned()
            .collect())
    }

    async fn fetch_record(&self, id: &RecordId) -> RelayResult<CloudRecord> {
        let state = self.backend.lock()?;
        state.check_online()?;
        let zone = state.readable(&id.zone, self.user_id())?;
        let record = zone
            .records
            .get(&id.name)
            .ok_or_else(|| RelayError::NotFound(id.to_string()))?;
        Ok(state.materialize(record))
    }

    async fn query_records(
        &self,
        zone: &ZoneId,
        record_type: EntityKind,
    ) -> RelayResult<Vec<CloudRecord>> {
        let mut state = self.backend.lock()?;
        state.check_online()?;
        state.stats.queries += 1;
        let zone_state = state.readable(zone, self.user_id())?;
        Ok(zone_state
            .records
            .values()
            .filter(|r| r.record_type == record_type)
            .map(|r| state.materialize(r))
            .collect())
    }

    async fn save(&self, batch: SaveBatch) -> RelayResult<SavedBatch> {
        let mut state = self.backend.lock()?;
        state.check_online()?;
        state.stats.saves += 1;

        if batch.len() > MAX_BATCH_SIZE {
            return Err(RelayError::Rejected(format!(
                "batch of {} exceeds the limit of {MAX_BATCH_SIZE}",
                batch.len()
            )));
        }
        for zone in batch
            .records
            .iter()
            .map(|r| &r.id.zone)
            .chain(batch.shares.iter().map(|s| &s.id.zone))
        {
            state.check_writable(zone, self.user_id())?;
        }
        for share in &batch.shares {
            if !state.root_exists(share, &batch) {
                return Err(RelayError::Rejected(format!(
                    "share {} has no saved root record {}",
                    share.id, share.root
                )));
            }
        }

        let mut saved_ids = Vec::new();
        let mut saved_shares = Vec::new();

        if batch.atomic {
            if let Some(r) = batch
                .records
                .iter()
                .find(|r| state.record_conflicts(r, batch.policy))
            {
                return Err(RelayError::Conflict(r.id.to_string()));
            }
            if let Some(s) = batch
                .shares
                .iter()
                .find(|s| state.share_conflicts(s, batch.policy))
            {
                return Err(RelayError::Conflict(s.id.to_string()));
            }
            if !batch.shares.is_empty() && state.faults.fail_next_share_save {
                state.faults.fail_next_share_save = false;
                return Err(RelayError::Transport("injected share save failure".into()));
            }

            for record in &batch.records {
                saved_ids.push(state.commit_record(record));
            }
            for share in &batch.shares {
                saved_shares.push(state.commit_share(share));
            }
            debug!("Committed atomic batch of {}", batch.len());
        } else {
            if let Some(remaining) = state.faults.record_batches_before_failure.as_mut() {
                if *remaining == 0 {
                    return Err(RelayError::Transport("injected batch failure".into()));
                }
                *remaining -= 1;
            }

            let mut failed = Vec::new();
            for record in &batch.records {
                if state.record_conflicts(record, batch.policy) {
                    failed.push((record.id.to_string(), "record changed on server".to_string()));
                } else {
                    saved_ids.push(state.commit_record(record));
                }
            }
            for share in &batch.shares {
                if state.share_conflicts(share, batch.policy) {
                    failed.push((share.id.to_string(), "record changed on server".to_string()));
                } else {
                    saved_shares.push(state.commit_share(share));
                }
            }
            if !failed.is_empty() {
                return Err(RelayError::PartialFailure {
                    saved: saved_ids.len() + saved_shares.len(),
                    failed,
                });
            }
        }

        Ok(SavedBatch {
            records: saved_ids
                .iter()
                .filter_map(|id| state.stored_record(id))
                .collect(),
            shares: saved_shares
                .iter()
                .filter_map(|id| state.stored_share(id))
                .collect(),
        })
    }

    async fn delete_records(&self, ids: &[RecordId]) -> RelayResult<()> {
        let mut state = self.backend.lock()?;
        state.check_online()?;
        for id in ids {
            state.check_writable(&id.zone, self.user_id())?;
        }
        for id in ids {
            if let Some(zone) = state.zones.get_mut(&id.zone) {
                zone.records.remove(&id.name);
            }
        }
        Ok(())
    }

    async fn fetch_share(&self, id: &RecordId) -> RelayResult<Share> {
        let state = self.backend.lock()?;
        state.check_online()?;
        state
            .readable(&id.zone, self.user_id())?
            .shares
            .get(&id.name)
            .cloned()
            .ok_or_else(|| RelayError::NotFound(id.to_string()))
    }

    async fn accept_share(&self, token: &str) -> RelayResult<ShareMetadata> {
        let mut guard = self.backend.lock()?;
        let state = &mut *guard;
        state.check_online()?;

        let share_id = state
            .invitations
            .get(token)
            .cloned()
            .ok_or_else(|| RelayError::NotFound(format!("invitation {token}")))?;
        let tag = state.next_tag();
        let me = self.user.clone();
        let owner_id = share_id.zone.owner.clone();

        let share = state
            .zones
            .get_mut(&share_id.zone)
            .and_then(|z| z.shares.get_mut(&share_id.name))
            .ok_or_else(|| RelayError::NotFound(share_id.to_string()))?;

        if me.user_id != owner_id {
            let public_permission = share.public_permission;
            match share.participant_mut(&me.user_id) {
                Some(p) if p.acceptance == AcceptanceStatus::Removed => {
                    return Err(RelayError::Permission("participant was removed".into()));
                }
                Some(p) => p.acceptance = AcceptanceStatus::Accepted,
                None if public_permission != Permission::None => {
                    share.participants.push(Participant {
                        identity: me.clone(),
                        role: ParticipantRole::Participant,
                        acceptance: AcceptanceStatus::Accepted,
                        permission: public_permission,
                    });
                }
                None => {
                    return Err(RelayError::Permission(format!(
                        "{} was not invited",
                        me.user_id
                    )));
                }
            }
            share.change_tag = Some(tag);
        }

        let share = share.clone();
        let owner = share
            .owner()
            .map(|p| p.identity.clone())
            .or_else(|| state.users.get(&owner_id).cloned())
            .unwrap_or_else(|| UserIdentity::new(owner_id.clone(), owner_id.clone()));

        info!("{} accepted share {}", me.user_id, share.id);
        Ok(ShareMetadata {
            root_record_id: share.root.clone(),
            share,
            owner,
        })
    }

    async fn lookup_identity(&self, email: &str) -> RelayResult<UserIdentity> {
        let state = self.backend.lock()?;
        state.check_online()?;
        state
            .users
            .values()
            .find(|u| {
                u.email
                    .as_deref()
                    .is_some_and(|e| e.eq_ignore_ascii_case(email))
            })
            .cloned()
            .ok_or_else(|| RelayError::NotFound(format!("no account for {email}")))
    }
}
