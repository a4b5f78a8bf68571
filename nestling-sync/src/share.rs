//! Share and participant model.
//!
//! A share is a relay-side object rooted at a profile's cloud record. It is
//! never persisted locally; every lookup starts by fetching it again.

use crate::record::{CloudRecord, RecordId};
use serde::{Deserialize, Serialize};

/// Record name prefix for share objects.
pub const SHARE_RECORD_PREFIX: &str = "share-";

/// An account on the relay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserIdentity {
    pub user_id: String,
    pub email: Option<String>,
    pub display_name: String,
}

impl UserIdentity {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
            display_name: display_name.into(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    None,
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticipantRole {
    Owner,
    Participant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AcceptanceStatus {
    Pending,
    Accepted,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub identity: UserIdentity,
    pub role: ParticipantRole,
    pub acceptance: AcceptanceStatus,
    pub permission: Permission,
}

impl Participant {
    pub fn owner(identity: UserIdentity) -> Self {
        Self {
            identity,
            role: ParticipantRole::Owner,
            acceptance: AcceptanceStatus::Accepted,
            permission: Permission::ReadWrite,
        }
    }

    /// A freshly invited participant; acceptance is pending until redeemed.
    pub fn invited(identity: UserIdentity, permission: Permission) -> Self {
        Self {
            identity,
            role: ParticipantRole::Participant,
            acceptance: AcceptanceStatus::Pending,
            permission,
        }
    }

    pub fn is_owner(&self) -> bool {
        self.role == ParticipantRole::Owner
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Share {
    pub id: RecordId,
    /// The root record this share grants access to.
    pub root: RecordId,
    pub title: Option<String>,
    /// Invitation URL, assigned by the relay on first save.
    pub url: Option<String>,
    pub public_permission: Permission,
    pub participants: Vec<Participant>,
    pub change_tag: Option<String>,
}

impl Share {
    /// Builds a new share rooted at `root`, with `owner` as its only participant.
    pub fn rooted_at(root: &CloudRecord, owner: UserIdentity) -> Self {
        Self {
            id: RecordId::new(
                root.id.zone.clone(),
                format!("{SHARE_RECORD_PREFIX}{}", root.id.name),
            ),
            root: root.id.clone(),
            title: None,
            url: None,
            public_permission: Permission::None,
            participants: vec![Participant::owner(owner)],
            change_tag: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn owner(&self) -> Option<&Participant> {
        self.participants.iter().find(|p| p.is_owner())
    }

    pub fn participant(&self, user_id: &str) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|p| p.identity.user_id == user_id)
    }

    pub fn participant_mut(&mut self, user_id: &str) -> Option<&mut Participant> {
        self.participants
            .iter_mut()
            .find(|p| p.identity.user_id == user_id)
    }

    /// Adds a participant, replacing an earlier entry for the same user.
    pub fn add_participant(&mut self, participant: Participant) {
        self.participants
            .retain(|p| p.identity.user_id != participant.identity.user_id);
        self.participants.push(participant);
    }

    /// Removes a non-owner participant. Returns whether one was removed.
    pub fn remove_participant(&mut self, user_id: &str) -> bool {
        let before = self.participants.len();
        self.participants
            .retain(|p| p.is_owner() || p.identity.user_id != user_id);
        self.participants.len() != before
    }
}

/// What the relay returns when an invitation is redeemed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareMetadata {
    pub share: Share,
    pub root_record_id: RecordId,
    pub owner: UserIdentity,
}
