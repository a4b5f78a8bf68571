use chrono::Utc;
use nestling_model::{Activity, ActivityKind, Entity, EntityKey, EntityKind, GrowthMeasurement, Profile};
use nestling_storage::{LocalStore, LocalStoreExt, MemoryStore, SqliteStore};
use std::sync::Arc;

fn seed(store: &dyn LocalStore) -> (Profile, Activity) {
    let profile = Profile::new("Ada", Utc::now());
    let activity = Activity::new(profile.id, ActivityKind::Diaper, Utc::now());
    store.insert(profile.clone().into()).unwrap();
    store.insert(activity.clone().into()).unwrap();
    store
        .insert(GrowthMeasurement::new(profile.id, Utc::now()).with_weight_kg(4.1).into())
        .unwrap();
    (profile, activity)
}

fn stores() -> Vec<(&'static str, Arc<dyn LocalStore>)> {
    vec![
        ("memory", Arc::new(MemoryStore::new())),
        ("sqlite", Arc::new(SqliteStore::open_in_memory().unwrap())),
    ]
}

// ── Shared contract ──────────────────────────────────────────────

#[test]
fn insert_then_get() {
    for (name, store) in stores() {
        let (profile, activity) = seed(store.as_ref());
        assert_eq!(store.profile(profile.id).unwrap(), Some(profile.clone()), "{name}");
        let found = store
            .get(EntityKey::new(EntityKind::Activity, activity.id.as_uuid()))
            .unwrap();
        assert_eq!(found, Some(Entity::Activity(activity)), "{name}");
    }
}

#[test]
fn insert_replaces_same_key() {
    for (name, store) in stores() {
        let (_, mut activity) = seed(store.as_ref());
        activity.notes = Some("blowout".into());
        store.insert(activity.clone().into()).unwrap();

        assert_eq!(store.count(EntityKind::Activity).unwrap(), 1, "{name}");
        let found = store.get(Entity::from(activity.clone()).key()).unwrap().unwrap();
        assert_eq!(found, Entity::Activity(activity), "{name}");
    }
}

#[test]
fn fetch_with_predicate() {
    for (name, store) in stores() {
        let (profile, _) = seed(store.as_ref());
        store
            .insert(Activity::new(profile.id, ActivityKind::Bath, Utc::now()).into())
            .unwrap();

        let baths = store
            .fetch(EntityKind::Activity, &|e: &Entity| {
                matches!(e, Entity::Activity(a) if a.kind == ActivityKind::Bath)
            })
            .unwrap();
        assert_eq!(baths.len(), 1, "{name}");
        assert_eq!(store.dependents_of(profile.id).unwrap().len(), 3, "{name}");
    }
}

#[test]
fn deleting_profile_cascades() {
    for (name, store) in stores() {
        let (profile, _) = seed(store.as_ref());
        let other = Profile::new("Grace", Utc::now());
        store.insert(other.clone().into()).unwrap();
        store
            .insert(Activity::new(other.id, ActivityKind::Sleep, Utc::now()).into())
            .unwrap();
        store.save().unwrap();

        store
            .delete(EntityKey::new(EntityKind::Profile, profile.id.as_uuid()))
            .unwrap();

        assert!(store.profile(profile.id).unwrap().is_none(), "{name}");
        assert!(store.dependents_of(profile.id).unwrap().is_empty(), "{name}");
        assert_eq!(store.dependents_of(other.id).unwrap().len(), 1, "{name}");
    }
}

#[test]
fn delete_missing_is_ok() {
    for (name, store) in stores() {
        let key = EntityKey::new(EntityKind::HealthRecord, uuid::Uuid::now_v7());
        assert!(store.delete(key).is_ok(), "{name}");
    }
}

#[test]
fn shared_profiles_filter() {
    for (name, store) in stores() {
        let (mut profile, _) = seed(store.as_ref());
        assert!(store.shared_profiles().unwrap().is_empty(), "{name}");
        profile.is_shared = true;
        store.insert(profile.into()).unwrap();
        assert_eq!(store.shared_profiles().unwrap().len(), 1, "{name}");
    }
}

// ── MemoryStore ──────────────────────────────────────────────────

#[test]
fn memory_store_injected_save_failure() {
    let store = MemoryStore::new();
    seed(&store);
    store.set_fail_saves(true);
    assert!(store.save().is_err());
    assert_eq!(store.unsaved_changes(), 3);

    store.set_fail_saves(false);
    store.save().unwrap();
    assert_eq!(store.save_count(), 1);
    assert_eq!(store.unsaved_changes(), 0);
}

// ── SqliteStore ──────────────────────────────────────────────────

#[test]
fn sqlite_changes_survive_reopen_only_after_save() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nestling.db");

    let profile_id = {
        let store = SqliteStore::open(&path).unwrap();
        let (profile, _) = seed(&store);
        assert_eq!(store.pending_changes(), 3);
        store.save().unwrap();
        assert_eq!(store.pending_changes(), 0);

        store
            .insert(Activity::new(profile.id, ActivityKind::Sleep, Utc::now()).into())
            .unwrap();
        profile.id
    };

    let reopened = SqliteStore::open(&path).unwrap();
    assert!(reopened.profile(profile_id).unwrap().is_some());
    assert_eq!(reopened.dependents_of(profile_id).unwrap().len(), 2);
}

#[test]
fn sqlite_cascade_covers_unsaved_entries() {
    let store = SqliteStore::open_in_memory().unwrap();
    let (profile, _) = seed(&store);
    store.save().unwrap();
    store
        .insert(Activity::new(profile.id, ActivityKind::Bath, Utc::now()).into())
        .unwrap();

    store
        .delete(EntityKey::new(EntityKind::Profile, profile.id.as_uuid()))
        .unwrap();
    store.save().unwrap();

    assert_eq!(store.count(EntityKind::Activity).unwrap(), 0);
    assert_eq!(store.count(EntityKind::GrowthMeasurement).unwrap(), 0);
}

#[test]
fn sqlite_keyed_get_sees_saved_and_staged_rows() {
    let store = SqliteStore::open_in_memory().unwrap();
    let (profile, activity) = seed(&store);
    store.save().unwrap();
    let key = EntityKey::new(EntityKind::Activity, activity.id.as_uuid());

    // Saved row, read straight from the table.
    assert_eq!(store.get(key).unwrap(), Some(Entity::Activity(activity.clone())));

    // A staged edit shadows the saved row.
    let edited = activity.clone().with_notes("blowout");
    store.insert(edited.clone().into()).unwrap();
    assert_eq!(store.get(key).unwrap(), Some(Entity::Activity(edited)));

    // So does a staged delete.
    store.delete(key).unwrap();
    assert_eq!(store.get(key).unwrap(), None);

    let missing = EntityKey::new(EntityKind::Activity, profile.id.as_uuid());
    assert_eq!(store.get(missing).unwrap(), None);
}
