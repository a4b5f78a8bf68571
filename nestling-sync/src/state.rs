//! Sync registry.
//!
//! Tracks which profiles take part in sharing on this device, and when each
//! one last pulled, pushed, or failed. The orchestrator iterates this set;
//! the host may persist it across launches.

use chrono::{DateTime, Utc};
use nestling_types::ProfileId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Registry of shared profiles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    /// Profiles this device shares or participates in.
    shared_profile_ids: BTreeSet<ProfileId>,
    /// Per-profile sync bookkeeping.
    units: BTreeMap<ProfileId, UnitSyncState>,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a profile. Returns false if it was already registered.
    pub fn add_shared(&mut self, profile_id: ProfileId) -> bool {
        self.units.entry(profile_id).or_default();
        self.shared_profile_ids.insert(profile_id)
    }

    /// Drops a profile and its bookkeeping.
    pub fn remove_shared(&mut self, profile_id: ProfileId) -> bool {
        self.units.remove(&profile_id);
        self.shared_profile_ids.remove(&profile_id)
    }

    pub fn is_shared(&self, profile_id: ProfileId) -> bool {
        self.shared_profile_ids.contains(&profile_id)
    }

    /// Registered profiles, in a stable order.
    pub fn shared_profile_ids(&self) -> Vec<ProfileId> {
        self.shared_profile_ids.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.shared_profile_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared_profile_ids.is_empty()
    }

    pub fn unit(&self, profile_id: ProfileId) -> Option<&UnitSyncState> {
        self.units.get(&profile_id)
    }

    pub fn record_pull(&mut self, profile_id: ProfileId, at: DateTime<Utc>) {
        if let Some(unit) = self.units.get_mut(&profile_id) {
            unit.last_pull_at = Some(at);
            unit.clear_failure();
        }
    }

    pub fn record_push(&mut self, profile_id: ProfileId, at: DateTime<Utc>) {
        if let Some(unit) = self.units.get_mut(&profile_id) {
            unit.last_push_at = Some(at);
            unit.clear_failure();
        }
    }

    pub fn record_failure(&mut self, profile_id: ProfileId, error: impl Into<String>) {
        if let Some(unit) = self.units.get_mut(&profile_id) {
            unit.last_error = Some(error.into());
            unit.consecutive_failures += 1;
        }
    }
}

/// Sync bookkeeping for one shared profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSyncState {
    pub last_pull_at: Option<DateTime<Utc>>,
    pub last_push_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

impl UnitSyncState {
    fn clear_failure(&mut self) {
        self.last_error = None;
        self.consecutive_failures = 0;
    }
}
