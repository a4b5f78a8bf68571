use crate::share::Permission;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Maximum records the relay accepts in a single request.
pub const MAX_BATCH_SIZE: usize = 400;

/// Configuration for the sharing and reconciliation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Records per relay write. Clamped to `1..=MAX_BATCH_SIZE`.
    pub batch_size: usize,
    /// Period of the orchestrator's timer trigger, in seconds.
    pub poll_interval_secs: u64,
    /// Delete owned zones whose profile no longer exists locally.
    pub cleanup_orphaned_zones: bool,
    /// Permission granted to invited participants.
    pub participant_permission: Permission,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: MAX_BATCH_SIZE,
            poll_interval_secs: 300,
            cleanup_orphaned_zones: true,
            participant_permission: Permission::ReadWrite,
        }
    }
}

impl SyncConfig {
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.clamp(1, MAX_BATCH_SIZE)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}
