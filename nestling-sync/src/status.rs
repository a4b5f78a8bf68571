//! Observable sharing status.

use crate::share::Participant;
use nestling_types::ProfileId;
use serde::{Deserialize, Serialize};

/// Where a sharing operation stands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SharingStatus {
    #[default]
    None,
    /// A share is being created or looked up.
    Preparing,
    Active,
    Error(String),
}

/// Snapshot published to UI observers after each sharing operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SharingState {
    pub profile_id: Option<ProfileId>,
    pub status: SharingStatus,
    pub participants: Vec<Participant>,
    pub share_url: Option<String>,
}

impl SharingState {
    pub fn preparing(profile_id: ProfileId) -> Self {
        Self {
            profile_id: Some(profile_id),
            status: SharingStatus::Preparing,
            ..Self::default()
        }
    }

    pub fn active(
        profile_id: ProfileId,
        participants: Vec<Participant>,
        share_url: Option<String>,
    ) -> Self {
        Self {
            profile_id: Some(profile_id),
            status: SharingStatus::Active,
            participants,
            share_url,
        }
    }

    pub fn failed(profile_id: ProfileId, error: impl ToString) -> Self {
        Self {
            profile_id: Some(profile_id),
            status: SharingStatus::Error(error.to_string()),
            ..Self::default()
        }
    }

    pub fn stopped(profile_id: ProfileId) -> Self {
        Self {
            profile_id: Some(profile_id),
            ..Self::default()
        }
    }
}
