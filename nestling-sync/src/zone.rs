//! Zone naming.
//!
//! A profile's zone name is a pure function of its identifier. Nothing about
//! the zone is persisted locally; it is recomputed whenever it is needed.

use crate::record::ZoneId;
use nestling_types::ProfileId;

pub const ZONE_PREFIX: &str = "Shared-";

/// The zone name for a profile: `"Shared-" + id`.
pub fn zone_name_for(profile_id: ProfileId) -> String {
    format!("{ZONE_PREFIX}{profile_id}")
}

/// The zone for a profile in the given owner's database.
pub fn zone_for(profile_id: ProfileId, owner: &str) -> ZoneId {
    ZoneId::new(zone_name_for(profile_id), owner)
}

/// Recovers the profile a zone belongs to, if the name is one of ours.
pub fn profile_id_for_zone(name: &str) -> Option<ProfileId> {
    name.strip_prefix(ZONE_PREFIX)
        .and_then(|rest| ProfileId::parse(rest).ok())
}
