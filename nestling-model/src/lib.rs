//! Local entity model for Nestling.
//!
//! The local store is the source of truth; cloud records are always derived
//! from these types and decoded back onto them.
//! - [`Profile`]: the root of a shareable group (one baby)
//! - [`Activity`], [`GrowthMeasurement`], [`HealthRecord`]: dependent entries,
//!   each owned by exactly one profile
//! - [`Entity`] / [`EntityKind`]: the closed set of kinds the store and the
//!   sync engine switch on
//!
//! Enumerations that cross the wire are encoded as string tags and decoded
//! with a fallback value, so data written by a newer app version never fails
//! to load.

mod activity;
mod entity;
mod growth;
mod health;
mod profile;

pub use activity::{Activity, ActivityKind};
pub use entity::{Entity, EntityKey, EntityKind};
pub use growth::GrowthMeasurement;
pub use health::{HealthRecord, HealthRecordKind};
pub use profile::{Gender, Profile};
