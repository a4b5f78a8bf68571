use chrono::{Duration, TimeZone, Utc};
use nestling_model::{
    Activity, ActivityKind, Entity, EntityKind, Gender, GrowthMeasurement, HealthRecord,
    HealthRecordKind, Profile,
};
use nestling_types::{EntryId, ProfileId};
use pretty_assertions::assert_eq;

fn birth() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 14, 8, 30, 0).unwrap()
}

// ── Tagged enums ─────────────────────────────────────────────────

#[test]
fn activity_kind_tags_roundtrip() {
    for kind in [
        ActivityKind::BreastFeeding,
        ActivityKind::BottleFeeding,
        ActivityKind::Solids,
        ActivityKind::Pumping,
        ActivityKind::Sleep,
        ActivityKind::Diaper,
        ActivityKind::Bath,
        ActivityKind::TummyTime,
        ActivityKind::Other,
    ] {
        assert_eq!(ActivityKind::from_tag(kind.as_str()), kind);
    }
}

#[test]
fn unknown_tags_fall_back() {
    assert_eq!(ActivityKind::from_tag("skinToSkin"), ActivityKind::Other);
    assert_eq!(HealthRecordKind::from_tag(""), HealthRecordKind::Other);
    assert_eq!(Gender::from_tag("FEMALE"), Gender::Unspecified);
}

#[test]
fn duration_kinds() {
    assert!(ActivityKind::Sleep.has_duration());
    assert!(!ActivityKind::Diaper.has_duration());
}

#[test]
fn entity_kind_lookup_is_strict() {
    assert_eq!(EntityKind::from_name("Activity"), Some(EntityKind::Activity));
    assert_eq!(EntityKind::from_name("activity"), None);
    assert_eq!(EntityKind::DEPENDENTS.len(), 3);
    assert!(!EntityKind::DEPENDENTS.contains(&EntityKind::Profile));
}

// ── Profile ──────────────────────────────────────────────────────

#[test]
fn new_profile_is_owned_and_unshared() {
    let profile = Profile::new("Ada", birth()).with_gender(Gender::Female);
    assert!(profile.is_owned_locally());
    assert!(!profile.is_shared);
    assert!(profile.remote_record_name.is_none());
    assert_eq!(profile.gender, Gender::Female);
}

#[test]
fn clear_sharing_drops_cached_identifiers() {
    let mut profile = Profile::new("Ada", birth());
    profile.is_shared = true;
    profile.remote_record_name = Some(profile.id.to_string());
    profile.remote_change_tag = Some("t-3".into());

    profile.clear_sharing();

    assert!(!profile.is_shared);
    assert_eq!(profile.remote_record_name, None);
    assert_eq!(profile.remote_change_tag, None);
}

#[test]
fn participant_copy_is_not_owned() {
    let mut profile = Profile::new("Ada", birth());
    profile.owner_display_name = Some("Grace".into());
    assert!(!profile.is_owned_locally());
}

#[test]
fn placeholder_keeps_identity() {
    let id = ProfileId::new();
    assert_eq!(Profile::placeholder(id).id, id);
}

// ── Dependents ───────────────────────────────────────────────────

#[test]
fn activity_duration() {
    let pid = ProfileId::new();
    let start = birth();
    let activity = Activity::new(pid, ActivityKind::Sleep, start).with_end(start + Duration::minutes(95));
    assert_eq!(activity.duration_minutes(), Some(95));

    let open = Activity::new(pid, ActivityKind::Sleep, start);
    assert_eq!(open.duration_minutes(), None);
}

#[test]
fn entity_accessors() {
    let pid = ProfileId::new();
    let growth = GrowthMeasurement::new(pid, birth()).with_weight_kg(3.4);
    let id = growth.id;
    let entity = Entity::from(growth);

    assert_eq!(entity.kind(), EntityKind::GrowthMeasurement);
    assert_eq!(entity.id(), id.as_uuid());
    assert_eq!(entity.profile_id(), pid);
    assert!(entity.as_profile().is_none());
}

#[test]
fn profile_entity_belongs_to_itself() {
    let profile = Profile::new("Ada", birth());
    let id = profile.id;
    let entity = Entity::from(profile);
    assert_eq!(entity.profile_id(), id);
    assert_eq!(entity.into_profile().map(|p| p.id), Some(id));
}

#[test]
fn entity_json_is_tagged_by_kind() {
    let record = HealthRecord::new(
        ProfileId::new(),
        HealthRecordKind::Temperature,
        birth(),
        "Evening check",
    )
    .with_value(37.9);
    let entity = Entity::from(record.clone());

    let json = serde_json::to_value(&entity).unwrap();
    assert_eq!(json["kind"], "HealthRecord");
    assert_eq!(json["data"]["kind"], "temperature");

    let parsed: Entity = serde_json::from_value(json).unwrap();
    assert_eq!(parsed, Entity::HealthRecord(record));
}

#[test]
fn placeholder_entries_keep_identity() {
    let pid = ProfileId::new();
    let id = EntryId::new();
    assert_eq!(Activity::placeholder(id, pid).id, id);
    assert_eq!(GrowthMeasurement::placeholder(id, pid).profile_id, pid);
    assert_eq!(HealthRecord::placeholder(id, pid).kind, HealthRecordKind::Other);
}
