use nestling_types::{EntryId, ProfileId};
use proptest::prelude::*;
use std::collections::HashSet;
use std::str::FromStr;

// ── ProfileId ─────────────────────────────────────────────────────

#[test]
fn profile_id_new_is_unique() {
    let a = ProfileId::new();
    let b = ProfileId::new();
    assert_ne!(a, b);
}

#[test]
fn profile_id_from_uuid_roundtrip() {
    let uuid = uuid::Uuid::now_v7();
    let id = ProfileId::from_uuid(uuid);
    assert_eq!(id.as_uuid(), uuid);
}

#[test]
fn profile_id_display_and_parse() {
    let id = ProfileId::new();
    let parsed = ProfileId::parse(&id.to_string()).unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn profile_id_parse_invalid() {
    let err = ProfileId::parse("not-a-uuid").unwrap_err();
    assert!(err.to_string().starts_with("invalid UUID"));
}

#[test]
fn profile_id_serializes_as_plain_string() {
    let id = ProfileId::new();
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, format!("\"{id}\""));
}

#[test]
fn profile_ids_are_time_ordered() {
    let first = ProfileId::new();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let second = ProfileId::new();
    assert!(first < second);
}

#[test]
fn profile_id_text_form_matches_record_names() {
    let id = ProfileId::new();
    let text = id.to_string();
    assert_eq!(text, id.as_uuid().hyphenated().to_string());
    assert_eq!(text, text.to_lowercase());

    // A record name echoed back in upper case still names the same profile.
    assert_eq!(ProfileId::parse(&text.to_uppercase()).unwrap(), id);
}

// ── EntryId ───────────────────────────────────────────────────────

#[test]
fn entry_id_from_str() {
    let id = EntryId::new();
    let parsed = EntryId::from_str(&id.to_string()).unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn entry_id_from_str_invalid() {
    assert!(EntryId::from_str("garbage").is_err());
}

#[test]
fn entry_id_hash_and_eq() {
    let id = EntryId::new();
    let mut set = HashSet::new();
    set.insert(id);
    set.insert(id);
    assert_eq!(set.len(), 1);
}

#[test]
fn entry_id_default_is_unique() {
    assert_ne!(EntryId::default(), EntryId::default());
}

proptest! {
    #[test]
    fn entry_id_text_form_roundtrips(bytes in any::<[u8; 16]>()) {
        let id = EntryId::from_uuid(uuid::Uuid::from_bytes(bytes));
        prop_assert_eq!(EntryId::parse(&id.to_string()).unwrap(), id);
    }
}
