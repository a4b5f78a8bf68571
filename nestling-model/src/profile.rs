use chrono::{DateTime, Utc};
use nestling_types::ProfileId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sex recorded for a profile. Used to select growth percentile curves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Gender {
    Female,
    Male,
    Other,
    #[default]
    Unspecified,
}

impl Gender {
    /// The wire tag for this value.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Gender::Female => "female",
            Gender::Male => "male",
            Gender::Other => "other",
            Gender::Unspecified => "unspecified",
        }
    }

    /// Looks up a value by wire tag, falling back to `Unspecified`.
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "female" => Gender::Female,
            "male" => Gender::Male,
            "other" => Gender::Other,
            _ => Gender::Unspecified,
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The root entity of a shareable group.
///
/// A profile is always created locally first. It becomes shared once a zone
/// and a share rooted at its cloud record exist; a participant's copy is
/// created when an invitation is accepted and carries the owner's name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    pub name: String,
    pub birth_date: DateTime<Utc>,
    pub gender: Gender,
    /// Photo bytes. Travels as a content-addressed asset, never inline.
    pub image_data: Option<Vec<u8>>,
    pub is_shared: bool,
    /// Cloud record name, cached after the first successful sync.
    pub remote_record_name: Option<String>,
    /// Relay change tag from the last decode or save.
    pub remote_change_tag: Option<String>,
    /// Set only on a participant's copy: the display name of the owner.
    pub owner_display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Creates a new, unshared profile owned by the local user.
    pub fn new(name: impl Into<String>, birth_date: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: ProfileId::new(),
            name: name.into(),
            birth_date,
            gender: Gender::Unspecified,
            image_data: None,
            is_shared: false,
            remote_record_name: None,
            remote_change_tag: None,
            owner_display_name: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates an empty shell with a known ID, to be filled by a decode.
    pub fn placeholder(id: ProfileId) -> Self {
        let mut profile = Self::new("", DateTime::<Utc>::UNIX_EPOCH);
        profile.id = id;
        profile
    }

    pub fn with_gender(mut self, gender: Gender) -> Self {
        self.gender = gender;
        self
    }

    pub fn with_image(mut self, data: Vec<u8>) -> Self {
        self.image_data = Some(data);
        self
    }

    /// True unless this is a participant's copy of someone else's profile.
    #[must_use]
    pub fn is_owned_locally(&self) -> bool {
        self.owner_display_name.is_none()
    }

    /// Clears every sharing flag and cached cloud identifier.
    pub fn clear_sharing(&mut self) {
        self.is_shared = false;
        self.remote_record_name = None;
        self.remote_change_tag = None;
    }

    /// Bumps `updated_at` after a local edit.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
