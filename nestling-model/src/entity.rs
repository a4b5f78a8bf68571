//! The closed set of entity kinds.
//!
//! The store and the sync engine never dispatch on a free-form type string:
//! every place that handles "some entity" matches on [`Entity`], so adding a
//! kind is a compile error everywhere it still needs handling.

use crate::{Activity, GrowthMeasurement, HealthRecord, Profile};
use chrono::{DateTime, Utc};
use nestling_types::ProfileId;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Profile,
    Activity,
    GrowthMeasurement,
    HealthRecord,
}

impl EntityKind {
    /// Every kind, root first.
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Profile,
        EntityKind::Activity,
        EntityKind::GrowthMeasurement,
        EntityKind::HealthRecord,
    ];

    /// The kinds owned by a profile.
    pub const DEPENDENTS: [EntityKind; 3] = [
        EntityKind::Activity,
        EntityKind::GrowthMeasurement,
        EntityKind::HealthRecord,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Profile => "Profile",
            EntityKind::Activity => "Activity",
            EntityKind::GrowthMeasurement => "GrowthMeasurement",
            EntityKind::HealthRecord => "HealthRecord",
        }
    }

    /// Strict lookup; unknown kinds are not silently coerced.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of an entity within the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: Uuid,
}

impl EntityKey {
    pub const fn new(kind: EntityKind, id: Uuid) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// Any locally stored entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum Entity {
    Profile(Profile),
    Activity(Activity),
    GrowthMeasurement(GrowthMeasurement),
    HealthRecord(HealthRecord),
}

impl Entity {
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Profile(_) => EntityKind::Profile,
            Entity::Activity(_) => EntityKind::Activity,
            Entity::GrowthMeasurement(_) => EntityKind::GrowthMeasurement,
            Entity::HealthRecord(_) => EntityKind::HealthRecord,
        }
    }

    /// The raw UUID of this entity.
    #[must_use]
    pub fn id(&self) -> Uuid {
        match self {
            Entity::Profile(p) => p.id.as_uuid(),
            Entity::Activity(a) => a.id.as_uuid(),
            Entity::GrowthMeasurement(g) => g.id.as_uuid(),
            Entity::HealthRecord(h) => h.id.as_uuid(),
        }
    }

    #[must_use]
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.kind(), self.id())
    }

    /// The profile this entity belongs to. A profile belongs to itself.
    #[must_use]
    pub fn profile_id(&self) -> ProfileId {
        match self {
            Entity::Profile(p) => p.id,
            Entity::Activity(a) => a.profile_id,
            Entity::GrowthMeasurement(g) => g.profile_id,
            Entity::HealthRecord(h) => h.profile_id,
        }
    }

    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        match self {
            Entity::Profile(p) => p.updated_at,
            Entity::Activity(a) => a.updated_at,
            Entity::GrowthMeasurement(g) => g.updated_at,
            Entity::HealthRecord(h) => h.updated_at,
        }
    }

    pub fn as_profile(&self) -> Option<&Profile> {
        match self {
            Entity::Profile(p) => Some(p),
            _ => None,
        }
    }

    pub fn into_profile(self) -> Option<Profile> {
        match self {
            Entity::Profile(p) => Some(p),
            _ => None,
        }
    }
}

impl From<Profile> for Entity {
    fn from(value: Profile) -> Self {
        Entity::Profile(value)
    }
}

impl From<Activity> for Entity {
    fn from(value: Activity) -> Self {
        Entity::Activity(value)
    }
}

impl From<GrowthMeasurement> for Entity {
    fn from(value: GrowthMeasurement) -> Self {
        Entity::GrowthMeasurement(value)
    }
}

impl From<HealthRecord> for Entity {
    fn from(value: HealthRecord) -> Self {
        Entity::HealthRecord(value)
    }
}
