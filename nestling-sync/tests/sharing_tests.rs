//! Tests for sharing.rs: zone provisioning, share lifecycle, participants.

use chrono::Utc;
use nestling_model::{Activity, ActivityKind, Entity, GrowthMeasurement, HealthRecord, HealthRecordKind, Profile};
use nestling_storage::{LocalStore, LocalStoreExt, MemoryStore};
use nestling_sync::relay::memory::{MemoryRelay, RelayBackend};
use nestling_sync::{
    codec, zone_for, AcceptanceStatus, Relay, SharingError, SharingStatus, ShareManager,
    SyncConfig, SyncEngine, UserIdentity,
};
use nestling_types::ProfileId;
use std::sync::Arc;

struct Device {
    relay: MemoryRelay,
    store: Arc<MemoryStore>,
    shares: ShareManager,
}

impl Device {
    fn new(backend: &Arc<RelayBackend>, identity: UserIdentity) -> Self {
        Self::with_config(backend, identity, SyncConfig::default())
    }

    fn with_config(backend: &Arc<RelayBackend>, identity: UserIdentity, config: SyncConfig) -> Self {
        let relay = backend.register(identity);
        let store = Arc::new(MemoryStore::new());
        let engine = SyncEngine::new(Arc::new(relay.clone()), store.clone(), config);
        Self {
            relay,
            store,
            shares: ShareManager::new(Arc::new(engine)),
        }
    }

    fn profile(&self, id: ProfileId) -> Profile {
        self.store.profile(id).unwrap().unwrap()
    }
}

fn owner_identity() -> UserIdentity {
    UserIdentity::new("owner", "Olivia").with_email("olivia@example.com")
}

fn guest_identity() -> UserIdentity {
    UserIdentity::new("guest", "Pat").with_email("pat@example.com")
}

/// A profile with one entry of each dependent kind.
fn seed_unit(store: &dyn LocalStore) -> Profile {
    let profile = Profile::new("Ada", Utc::now());
    store.insert(profile.clone().into()).unwrap();
    store
        .insert(Activity::new(profile.id, ActivityKind::BreastFeeding, Utc::now()).into())
        .unwrap();
    store
        .insert(GrowthMeasurement::new(profile.id, Utc::now()).with_weight_kg(3.9).into())
        .unwrap();
    store
        .insert(HealthRecord::new(profile.id, HealthRecordKind::Vaccination, Utc::now(), "BCG").into())
        .unwrap();
    store.save().unwrap();
    profile
}

// ── ensure_zone ──────────────────────────────────────────────────

#[tokio::test]
async fn ensure_zone_is_idempotent() {
    let backend = RelayBackend::new();
    let owner = Device::new(&backend, owner_identity());
    let id = ProfileId::new();

    let first = owner.shares.ensure_zone(id).await.unwrap();
    let second = owner.shares.ensure_zone(id).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.name, format!("Shared-{id}"));
    assert_eq!(backend.stats().zone_creates, 1);
}

// ── get_or_create_share ──────────────────────────────────────────

#[tokio::test]
async fn first_share_provisions_zone_root_share_and_entries() {
    let backend = RelayBackend::new();
    let owner = Device::new(&backend, owner_identity());
    let profile = seed_unit(owner.store.as_ref());

    let state = owner.shares.get_or_create_share(profile.id).await.unwrap();

    let zone = zone_for(profile.id, "owner");
    assert!(backend.zone_exists(&zone));
    assert_eq!(state.status, SharingStatus::Active);
    assert!(state.share_url.is_some());
    assert_eq!(state.participants.len(), 1);

    // Root and share in one atomic write, then the three entries in one batch.
    let stats = backend.stats();
    assert_eq!(stats.saves, 2);
    assert_eq!(stats.records_written, 4);
    assert_eq!(backend.records_in(&zone).len(), 4);
    let share = backend.share_in(&zone).unwrap();
    assert_eq!(share.root, codec::root_record_id(&zone, profile.id));

    let local = owner.profile(profile.id);
    assert!(local.is_shared);
    assert_eq!(local.remote_record_name, Some(profile.id.to_string()));
    assert!(local.remote_change_tag.is_some());
    assert!(owner.shares.engine().state().read().await.is_shared(profile.id));
}

#[tokio::test]
async fn second_call_returns_existing_share() {
    let backend = RelayBackend::new();
    let owner = Device::new(&backend, owner_identity());
    let profile = seed_unit(owner.store.as_ref());

    let first = owner.shares.get_or_create_share(profile.id).await.unwrap();
    let second = owner.shares.get_or_create_share(profile.id).await.unwrap();

    assert_eq!(first.share_url, second.share_url);
    assert_eq!(backend.stats().zone_creates, 1);
    assert_eq!(backend.stats().saves, 2);
}

#[tokio::test]
async fn existing_share_corrects_local_flag() {
    let backend = RelayBackend::new();
    let owner = Device::new(&backend, owner_identity());
    let profile = seed_unit(owner.store.as_ref());
    owner.shares.get_or_create_share(profile.id).await.unwrap();

    let mut local = owner.profile(profile.id);
    local.is_shared = false;
    owner.store.insert(local.into()).unwrap();

    owner.shares.get_or_create_share(profile.id).await.unwrap();
    assert!(owner.profile(profile.id).is_shared);
    assert_eq!(backend.stats().zone_creates, 1);
}

#[tokio::test]
async fn stale_shared_flag_is_reset_before_fresh_creation() {
    let backend = RelayBackend::new();
    let owner = Device::new(&backend, owner_identity());
    let profile = seed_unit(owner.store.as_ref());
    let mut stale = owner.profile(profile.id);
    stale.is_shared = true;
    stale.remote_record_name = Some("gone".into());
    stale.remote_change_tag = Some("t999".into());
    owner.store.insert(stale.into()).unwrap();

    let mut rx = owner.shares.subscribe();
    let state = owner.shares.get_or_create_share(profile.id).await.unwrap();
    assert_eq!(state.status, SharingStatus::Active);
    assert_eq!(rx.borrow_and_update().status, SharingStatus::Active);

    // The stale tag would have conflicted with a fresh root; it was cleared.
    let local = owner.profile(profile.id);
    assert!(local.is_shared);
    assert_eq!(local.remote_record_name, Some(profile.id.to_string()));
    assert_ne!(local.remote_change_tag.as_deref(), Some("t999"));
}

#[tokio::test]
async fn root_without_share_is_recreated_from_scratch() {
    let backend = RelayBackend::new();
    let owner = Device::new(&backend, owner_identity());
    let profile = seed_unit(owner.store.as_ref());
    let zone = owner.shares.ensure_zone(profile.id).await.unwrap();
    let root = codec::encode(&Entity::Profile(profile.clone()), &zone);
    owner
        .relay
        .save(nestling_sync::SaveBatch::records(vec![root], nestling_sync::SavePolicy::Overwrite))
        .await
        .unwrap();

    owner.shares.get_or_create_share(profile.id).await.unwrap();
    assert_eq!(backend.stats().zone_deletes, 1);
    assert!(backend.share_in(&zone).is_some());
}

#[tokio::test]
async fn failed_share_write_leaves_nothing_behind() {
    let backend = RelayBackend::new();
    let owner = Device::new(&backend, owner_identity());
    let profile = seed_unit(owner.store.as_ref());

    backend.fail_next_share_save();
    let err = owner.shares.get_or_create_share(profile.id).await.unwrap_err();
    assert!(matches!(err, SharingError::Relay(_)));

    let zone = zone_for(profile.id, "owner");
    assert!(backend.records_in(&zone).is_empty());
    assert!(backend.share_in(&zone).is_none());
    assert!(!owner.profile(profile.id).is_shared);
    assert!(matches!(owner.shares.state().status, SharingStatus::Error(_)));

    // The next attempt starts over cleanly.
    owner.shares.get_or_create_share(profile.id).await.unwrap();
    assert_eq!(backend.records_in(&zone).len(), 4);
}

#[tokio::test]
async fn failed_entry_batch_surfaces_but_keeps_share() {
    let backend = RelayBackend::new();
    let owner = Device::new(&backend, owner_identity());
    let profile = seed_unit(owner.store.as_ref());

    backend.fail_record_batches_after(0);
    let err = owner.shares.get_or_create_share(profile.id).await.unwrap_err();
    assert!(matches!(err, SharingError::Relay(_)));

    let zone = zone_for(profile.id, "owner");
    assert_eq!(backend.records_in(&zone).len(), 1);
    assert!(backend.share_in(&zone).is_some());
    assert!(owner.profile(profile.id).is_shared);
}

#[tokio::test]
async fn small_batch_size_splits_entry_writes() {
    let backend = RelayBackend::new();
    let config = SyncConfig {
        batch_size: 2,
        ..SyncConfig::default()
    };
    let owner = Device::with_config(&backend, owner_identity(), config);
    let profile = seed_unit(owner.store.as_ref());

    owner.shares.get_or_create_share(profile.id).await.unwrap();
    assert_eq!(backend.stats().saves, 3);
}

#[tokio::test]
async fn participant_cannot_create_share() {
    let backend = RelayBackend::new();
    let guest = Device::new(&backend, guest_identity());
    let mut profile = Profile::new("Ada", Utc::now());
    profile.owner_display_name = Some("Olivia".into());
    guest.store.insert(profile.clone().into()).unwrap();

    let err = guest.shares.get_or_create_share(profile.id).await.unwrap_err();
    assert!(matches!(err, SharingError::NotOwner(_)));
}

#[tokio::test]
async fn unknown_profile_is_reported() {
    let backend = RelayBackend::new();
    let owner = Device::new(&backend, owner_identity());
    let err = owner.shares.get_or_create_share(ProfileId::new()).await.unwrap_err();
    assert!(matches!(err, SharingError::ProfileNotFound(_)));
}

#[tokio::test]
async fn concurrent_get_or_create_builds_one_share() {
    let backend = RelayBackend::new();
    let owner = Device::new(&backend, owner_identity());
    let profile = seed_unit(owner.store.as_ref());

    let (a, b) = tokio::join!(
        owner.shares.get_or_create_share(profile.id),
        owner.shares.get_or_create_share(profile.id),
    );
    assert_eq!(a.unwrap().share_url, b.unwrap().share_url);
    assert_eq!(backend.stats().zone_creates, 1);
}

// ── Participants ─────────────────────────────────────────────────

#[tokio::test]
async fn add_participant_saves_only_the_share() {
    let backend = RelayBackend::new();
    let owner = Device::new(&backend, owner_identity());
    let _guest = Device::new(&backend, guest_identity());
    let profile = seed_unit(owner.store.as_ref());
    owner.shares.get_or_create_share(profile.id).await.unwrap();
    let written = backend.stats().records_written;

    let state = owner
        .shares
        .add_participant("pat@example.com", profile.id)
        .await
        .unwrap();

    assert_eq!(state.participants.len(), 2);
    let pat = state
        .participants
        .iter()
        .find(|p| p.identity.user_id == "guest")
        .unwrap();
    assert_eq!(pat.acceptance, AcceptanceStatus::Pending);
    assert_eq!(backend.stats().records_written, written);
}

#[tokio::test]
async fn add_unknown_participant_fails() {
    let backend = RelayBackend::new();
    let owner = Device::new(&backend, owner_identity());
    let profile = seed_unit(owner.store.as_ref());
    owner.shares.get_or_create_share(profile.id).await.unwrap();

    let err = owner
        .shares
        .add_participant("nobody@example.com", profile.id)
        .await
        .unwrap_err();
    assert!(matches!(err, SharingError::ParticipantNotFound(_)));
}

#[tokio::test]
async fn add_participant_requires_share() {
    let backend = RelayBackend::new();
    let owner = Device::new(&backend, owner_identity());
    let _guest = Device::new(&backend, guest_identity());
    let profile = seed_unit(owner.store.as_ref());

    let err = owner
        .shares
        .add_participant("pat@example.com", profile.id)
        .await
        .unwrap_err();
    assert!(matches!(err, SharingError::NotShared(_)));
}

#[tokio::test]
async fn remove_participant_reports_server_copy() {
    let backend = RelayBackend::new();
    let owner = Device::new(&backend, owner_identity());
    let guest = Device::new(&backend, guest_identity());
    let profile = seed_unit(owner.store.as_ref());
    owner.shares.get_or_create_share(profile.id).await.unwrap();
    let state = owner
        .shares
        .add_participant("pat@example.com", profile.id)
        .await
        .unwrap();
    let token = nestling_sync::relay::memory::invitation_token(state.share_url.as_deref().unwrap())
        .unwrap()
        .to_string();
    guest.shares.engine().accept_share(&token).await.unwrap();

    let participants = owner.shares.fetch_participants(profile.id).await.unwrap();
    let pat = participants.iter().find(|p| p.identity.user_id == "guest").unwrap();
    assert_eq!(pat.acceptance, AcceptanceStatus::Accepted);

    let state = owner.shares.remove_participant("guest", profile.id).await.unwrap();
    assert_eq!(state.participants.len(), 1);
    assert!(state.participants[0].is_owner());
    assert!(guest.relay.list_shared_zones().await.unwrap().is_empty());
}

#[tokio::test]
async fn removing_absent_participant_fails() {
    let backend = RelayBackend::new();
    let owner = Device::new(&backend, owner_identity());
    let profile = seed_unit(owner.store.as_ref());
    owner.shares.get_or_create_share(profile.id).await.unwrap();

    let err = owner
        .shares
        .remove_participant("guest", profile.id)
        .await
        .unwrap_err();
    assert!(matches!(err, SharingError::ParticipantNotFound(_)));
}

// ── stop_sharing ─────────────────────────────────────────────────

#[tokio::test]
async fn stop_sharing_deletes_zone_and_clears_local_state() {
    let backend = RelayBackend::new();
    let owner = Device::new(&backend, owner_identity());
    let profile = seed_unit(owner.store.as_ref());
    owner.shares.get_or_create_share(profile.id).await.unwrap();

    owner.shares.stop_sharing(profile.id).await.unwrap();

    assert!(!backend.zone_exists(&zone_for(profile.id, "owner")));
    let local = owner.profile(profile.id);
    assert!(!local.is_shared);
    assert_eq!(local.remote_record_name, None);
    assert!(!owner.shares.engine().state().read().await.is_shared(profile.id));
    let state = owner.shares.state();
    assert_eq!(state.status, SharingStatus::None);
    assert!(state.participants.is_empty());
}

#[tokio::test]
async fn stop_sharing_clears_local_state_when_zone_is_gone() {
    let backend = RelayBackend::new();
    let owner = Device::new(&backend, owner_identity());
    let profile = seed_unit(owner.store.as_ref());
    owner.shares.get_or_create_share(profile.id).await.unwrap();
    owner
        .relay
        .delete_zone(&zone_for(profile.id, "owner"))
        .await
        .unwrap();

    owner.shares.stop_sharing(profile.id).await.unwrap();
    assert!(!owner.profile(profile.id).is_shared);
}

#[tokio::test]
async fn stop_sharing_clears_local_state_even_when_delete_fails() {
    let backend = RelayBackend::new();
    let owner = Device::new(&backend, owner_identity());
    let profile = seed_unit(owner.store.as_ref());
    owner.shares.get_or_create_share(profile.id).await.unwrap();

    backend.fail_zone_deletes(true);
    let err = owner.shares.stop_sharing(profile.id).await.unwrap_err();
    assert!(matches!(err, SharingError::Relay(_)));

    let local = owner.profile(profile.id);
    assert!(!local.is_shared);
    assert_eq!(local.remote_record_name, None);
    assert_eq!(local.remote_change_tag, None);
}

#[tokio::test]
async fn stop_sharing_releases_the_profile_lock() {
    let backend = RelayBackend::new();
    let owner = Device::new(&backend, owner_identity());
    let profile = seed_unit(owner.store.as_ref());
    owner.shares.get_or_create_share(profile.id).await.unwrap();
    assert_eq!(owner.shares.tracked_units(), 1);

    owner.shares.stop_sharing(profile.id).await.unwrap();
    assert_eq!(owner.shares.tracked_units(), 0);

    // Sharing again starts from a fresh lock.
    owner.shares.get_or_create_share(profile.id).await.unwrap();
    assert_eq!(owner.shares.tracked_units(), 1);
    assert!(owner.profile(profile.id).is_shared);
}

// ── Orphans ──────────────────────────────────────────────────────

#[tokio::test]
async fn orphaned_zones_are_deleted() {
    let backend = RelayBackend::new();
    let owner = Device::new(&backend, owner_identity());
    let kept = seed_unit(owner.store.as_ref());
    owner.shares.get_or_create_share(kept.id).await.unwrap();

    let orphan = ProfileId::new();
    owner.shares.ensure_zone(orphan).await.unwrap();
    let unrelated = nestling_sync::ZoneId::new("Photos", "owner");
    owner.relay.create_zone(&unrelated).await.unwrap();

    let removed = owner.shares.cleanup_orphaned_zones().await.unwrap();
    assert_eq!(removed, vec![zone_for(orphan, "owner")]);
    assert!(backend.zone_exists(&zone_for(kept.id, "owner")));
    assert!(backend.zone_exists(&unrelated));
}
