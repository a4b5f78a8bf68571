//! Bidirectional mapping between local entities and cloud records.
//!
//! Encoding projects every persisted field into a named primitive field.
//! Decoding is applied onto an existing entity (or a placeholder with the
//! right identity) and is idempotent: decoding the same record twice leaves
//! the entity in the same state, including the change-tag bookkeeping.
//!
//! Local-only state (sharing flags, the owner's display name on a
//! participant's copy, the profile link of an entry) is never touched by a
//! decode.

use crate::error::CodecError;
use crate::record::{Asset, CloudRecord, FieldValue, RecordId, ZoneId};
use nestling_model::{
    Activity, ActivityKind, Entity, EntityKey, EntityKind, Gender, GrowthMeasurement,
    HealthRecord, HealthRecordKind, Profile,
};
use nestling_types::{EntryId, ProfileId};
use uuid::Uuid;

mod field {
    pub const ID: &str = "id";
    pub const PROFILE: &str = "profile";
    pub const CREATED_AT: &str = "createdAt";
    pub const UPDATED_AT: &str = "updatedAt";
    pub const NOTES: &str = "notes";
    pub const KIND: &str = "kind";

    pub const NAME: &str = "name";
    pub const BIRTH_DATE: &str = "birthDate";
    pub const GENDER: &str = "gender";
    pub const IMAGE: &str = "image";

    pub const STARTED_AT: &str = "startedAt";
    pub const ENDED_AT: &str = "endedAt";
    pub const AMOUNT_ML: &str = "amountMl";

    pub const MEASURED_AT: &str = "measuredAt";
    pub const WEIGHT_KG: &str = "weightKg";
    pub const HEIGHT_CM: &str = "heightCm";
    pub const HEAD_CM: &str = "headCircumferenceCm";

    pub const RECORDED_AT: &str = "recordedAt";
    pub const TITLE: &str = "title";
    pub const VALUE: &str = "value";
}

/// The record ID an entity with `key` has in `zone`.
pub fn record_id_for(zone: &ZoneId, key: EntityKey) -> RecordId {
    RecordId::new(zone.clone(), key.id.to_string())
}

/// The record ID of a profile's root record in `zone`.
pub fn root_record_id(zone: &ZoneId, profile_id: ProfileId) -> RecordId {
    record_id_for(zone, EntityKey::new(EntityKind::Profile, profile_id.as_uuid()))
}

/// The local identity a record maps to.
pub fn identity_of(record: &CloudRecord) -> Result<EntityKey, CodecError> {
    let id = Uuid::parse_str(&record.id.name)
        .map_err(|_| CodecError::MalformedIdentity(record.id.name.clone()))?;
    Ok(EntityKey::new(record.record_type, id))
}

/// Encodes an entity as a record in `zone`.
///
/// Entries get a parent reference to their profile's root record so the
/// relay extends the profile's share to them.
pub fn encode(entity: &Entity, zone: &ZoneId) -> CloudRecord {
    let mut record = CloudRecord::new(record_id_for(zone, entity.key()), entity.kind());
    record.set(field::ID, FieldValue::String(entity.id().to_string()));

    match entity {
        Entity::Profile(p) => {
            record.change_tag = p.remote_change_tag.clone();
            record.set(field::NAME, FieldValue::String(p.name.clone()));
            record.set(field::BIRTH_DATE, FieldValue::Date(p.birth_date));
            record.set(field::GENDER, FieldValue::String(p.gender.as_str().into()));
            record.set_opt(
                field::IMAGE,
                p.image_data
                    .clone()
                    .map(|bytes| FieldValue::Asset(Asset::from_bytes(bytes))),
            );
            record.set(field::CREATED_AT, FieldValue::Date(p.created_at));
            record.set(field::UPDATED_AT, FieldValue::Date(p.updated_at));
        }
        Entity::Activity(a) => {
            record.change_tag = a.remote_change_tag.clone();
            record.set(field::KIND, FieldValue::String(a.kind.as_str().into()));
            record.set(field::STARTED_AT, FieldValue::Date(a.started_at));
            record.set_opt(field::ENDED_AT, a.ended_at.map(FieldValue::Date));
            record.set_opt(field::AMOUNT_ML, a.amount_ml.map(FieldValue::Double));
            record.set_opt(field::NOTES, a.notes.clone().map(FieldValue::String));
            record.set(field::CREATED_AT, FieldValue::Date(a.created_at));
            record.set(field::UPDATED_AT, FieldValue::Date(a.updated_at));
        }
        Entity::GrowthMeasurement(g) => {
            record.change_tag = g.remote_change_tag.clone();
            record.set(field::MEASURED_AT, FieldValue::Date(g.measured_at));
            record.set_opt(field::WEIGHT_KG, g.weight_kg.map(FieldValue::Double));
            record.set_opt(field::HEIGHT_CM, g.height_cm.map(FieldValue::Double));
            record.set_opt(field::HEAD_CM, g.head_circumference_cm.map(FieldValue::Double));
            record.set_opt(field::NOTES, g.notes.clone().map(FieldValue::String));
            record.set(field::CREATED_AT, FieldValue::Date(g.created_at));
            record.set(field::UPDATED_AT, FieldValue::Date(g.updated_at));
        }
        Entity::HealthRecord(h) => {
            record.change_tag = h.remote_change_tag.clone();
            record.set(field::KIND, FieldValue::String(h.kind.as_str().into()));
            record.set(field::RECORDED_AT, FieldValue::Date(h.recorded_at));
            record.set(field::TITLE, FieldValue::String(h.title.clone()));
            record.set_opt(field::VALUE, h.value.map(FieldValue::Double));
            record.set_opt(field::NOTES, h.notes.clone().map(FieldValue::String));
            record.set(field::CREATED_AT, FieldValue::Date(h.created_at));
            record.set(field::UPDATED_AT, FieldValue::Date(h.updated_at));
        }
    }

    if entity.kind() != EntityKind::Profile {
        let parent = root_record_id(zone, entity.profile_id());
        record.set(field::PROFILE, FieldValue::Reference(parent.clone()));
        record.parent = Some(parent);
    }

    record
}

/// Decodes `record` onto `target`.
///
/// Required fields missing from the record keep their current value;
/// optional fields missing from the record are cleared.
pub fn decode(record: &CloudRecord, target: &mut Entity) -> Result<(), CodecError> {
    check_identity(record, target)?;

    match target {
        Entity::Profile(p) => decode_profile(record, p),
        Entity::Activity(a) => {
            a.remote_change_tag = record.change_tag.clone();
            if let Some(kind) = record.string(field::KIND) {
                a.kind = ActivityKind::from_tag(kind);
            }
            if let Some(d) = record.date(field::STARTED_AT) {
                a.started_at = d;
            }
            a.ended_at = record.date(field::ENDED_AT);
            a.amount_ml = record.double(field::AMOUNT_ML);
            a.notes = record.string(field::NOTES).map(str::to_string);
            decode_timestamps(record, &mut a.created_at, &mut a.updated_at);
        }
        Entity::GrowthMeasurement(g) => {
            g.remote_change_tag = record.change_tag.clone();
            if let Some(d) = record.date(field::MEASURED_AT) {
                g.measured_at = d;
            }
            g.weight_kg = record.double(field::WEIGHT_KG);
            g.height_cm = record.double(field::HEIGHT_CM);
            g.head_circumference_cm = record.double(field::HEAD_CM);
            g.notes = record.string(field::NOTES).map(str::to_string);
            decode_timestamps(record, &mut g.created_at, &mut g.updated_at);
        }
        Entity::HealthRecord(h) => {
            h.remote_change_tag = record.change_tag.clone();
            if let Some(kind) = record.string(field::KIND) {
                h.kind = HealthRecordKind::from_tag(kind);
            }
            if let Some(d) = record.date(field::RECORDED_AT) {
                h.recorded_at = d;
            }
            if let Some(title) = record.string(field::TITLE) {
                h.title = title.to_string();
            }
            h.value = record.double(field::VALUE);
            h.notes = record.string(field::NOTES).map(str::to_string);
            decode_timestamps(record, &mut h.created_at, &mut h.updated_at);
        }
    }
    Ok(())
}

/// Copies only the relay's bookkeeping (change tag, record name) from a
/// freshly saved record onto `target`. Content fields are left alone, so an
/// edit made while the save was in flight survives.
pub fn refresh_bookkeeping(record: &CloudRecord, target: &mut Entity) -> Result<(), CodecError> {
    check_identity(record, target)?;

    let change_tag = record.change_tag.clone();
    match target {
        Entity::Profile(p) => {
            p.remote_record_name = Some(record.id.name.clone());
            p.remote_change_tag = change_tag;
        }
        Entity::Activity(a) => a.remote_change_tag = change_tag,
        Entity::GrowthMeasurement(g) => g.remote_change_tag = change_tag,
        Entity::HealthRecord(h) => h.remote_change_tag = change_tag,
    }
    Ok(())
}

fn check_identity(record: &CloudRecord, target: &Entity) -> Result<(), CodecError> {
    if record.record_type != target.kind() {
        return Err(CodecError::KindMismatch {
            expected: target.kind().to_string(),
            found: record.record_type.to_string(),
        });
    }
    let key = identity_of(record)?;
    if key.id != target.id() {
        return Err(CodecError::IdentityMismatch {
            record: record.id.to_string(),
            entity: target.key().to_string(),
        });
    }
    Ok(())
}

fn decode_profile(record: &CloudRecord, p: &mut Profile) {
    p.remote_record_name = Some(record.id.name.clone());
    p.remote_change_tag = record.change_tag.clone();
    if let Some(name) = record.string(field::NAME) {
        p.name = name.to_string();
    }
    if let Some(d) = record.date(field::BIRTH_DATE) {
        p.birth_date = d;
    }
    if let Some(gender) = record.string(field::GENDER) {
        p.gender = Gender::from_tag(gender);
    }
    match record.asset(field::IMAGE) {
        Some(Asset { data: Some(bytes), .. }) => p.image_data = Some(bytes.clone()),
        // Not materialized: keep what we have if it is the same content.
        Some(asset) => {
            let unchanged = p
                .image_data
                .as_deref()
                .is_some_and(|bytes| Asset::digest_of(bytes) == asset.digest);
            if !unchanged {
                p.image_data = None;
            }
        }
        None => p.image_data = None,
    }
    decode_timestamps(record, &mut p.created_at, &mut p.updated_at);
}

fn decode_timestamps(
    record: &CloudRecord,
    created_at: &mut chrono::DateTime<chrono::Utc>,
    updated_at: &mut chrono::DateTime<chrono::Utc>,
) {
    if let Some(d) = record.date(field::CREATED_AT) {
        *created_at = d;
    }
    if let Some(d) = record.date(field::UPDATED_AT) {
        *updated_at = d;
    }
}

/// Builds a new local entity from a record, linked to `profile_id`.
///
/// For a profile record, `profile_id` must be the record's own identity.
pub fn materialize(record: &CloudRecord, profile_id: ProfileId) -> Result<Entity, CodecError> {
    let key = identity_of(record)?;
    let mut entity = match key.kind {
        EntityKind::Profile => {
            Entity::Profile(Profile::placeholder(ProfileId::from_uuid(key.id)))
        }
        EntityKind::Activity => {
            Entity::Activity(Activity::placeholder(EntryId::from_uuid(key.id), profile_id))
        }
        EntityKind::GrowthMeasurement => Entity::GrowthMeasurement(
            GrowthMeasurement::placeholder(EntryId::from_uuid(key.id), profile_id),
        ),
        EntityKind::HealthRecord => Entity::HealthRecord(HealthRecord::placeholder(
            EntryId::from_uuid(key.id),
            profile_id,
        )),
    };
    decode(record, &mut entity)?;
    Ok(entity)
}

/// The profile an entry record points at, if it carries a reference.
pub fn parent_profile_of(record: &CloudRecord) -> Option<ProfileId> {
    record
        .parent
        .as_ref()
        .or_else(|| record.reference(field::PROFILE))
        .and_then(|r| Uuid::parse_str(&r.name).ok())
        .map(ProfileId::from_uuid)
}

/// The `updatedAt` the record was written with.
pub fn updated_at_of(record: &CloudRecord) -> Option<chrono::DateTime<chrono::Utc>> {
    record.date(field::UPDATED_AT)
}
