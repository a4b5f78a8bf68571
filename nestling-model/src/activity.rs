use chrono::{DateTime, Utc};
use nestling_types::{EntryId, ProfileId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of care activity an [`Activity`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivityKind {
    BreastFeeding,
    BottleFeeding,
    Solids,
    Pumping,
    Sleep,
    Diaper,
    Bath,
    TummyTime,
    Other,
}

impl ActivityKind {
    /// The wire tag for this value.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::BreastFeeding => "breastFeeding",
            ActivityKind::BottleFeeding => "bottleFeeding",
            ActivityKind::Solids => "solids",
            ActivityKind::Pumping => "pumping",
            ActivityKind::Sleep => "sleep",
            ActivityKind::Diaper => "diaper",
            ActivityKind::Bath => "bath",
            ActivityKind::TummyTime => "tummyTime",
            ActivityKind::Other => "other",
        }
    }

    /// Looks up a value by wire tag, falling back to `Other`.
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "breastFeeding" => ActivityKind::BreastFeeding,
            "bottleFeeding" => ActivityKind::BottleFeeding,
            "solids" => ActivityKind::Solids,
            "pumping" => ActivityKind::Pumping,
            "sleep" => ActivityKind::Sleep,
            "diaper" => ActivityKind::Diaper,
            "bath" => ActivityKind::Bath,
            "tummyTime" => ActivityKind::TummyTime,
            _ => ActivityKind::Other,
        }
    }

    /// Whether this kind is logged as a span rather than an instant.
    #[must_use]
    pub const fn has_duration(&self) -> bool {
        matches!(
            self,
            ActivityKind::BreastFeeding
                | ActivityKind::Pumping
                | ActivityKind::Sleep
                | ActivityKind::TummyTime
        )
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single logged care activity (feeding, sleep, diaper change, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: EntryId,
    pub profile_id: ProfileId,
    pub kind: ActivityKind,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Volume for bottle feeding and pumping.
    pub amount_ml: Option<f64>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub remote_change_tag: Option<String>,
}

impl Activity {
    pub fn new(profile_id: ProfileId, kind: ActivityKind, started_at: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: EntryId::new(),
            profile_id,
            kind,
            started_at,
            ended_at: None,
            amount_ml: None,
            notes: None,
            created_at: now,
            updated_at: now,
            remote_change_tag: None,
        }
    }

    /// Creates an empty shell with a known ID, to be filled by a decode.
    pub fn placeholder(id: EntryId, profile_id: ProfileId) -> Self {
        let mut activity = Self::new(profile_id, ActivityKind::Other, DateTime::<Utc>::UNIX_EPOCH);
        activity.id = id;
        activity
    }

    pub fn with_end(mut self, ended_at: DateTime<Utc>) -> Self {
        self.ended_at = Some(ended_at);
        self
    }

    pub fn with_amount_ml(mut self, amount_ml: f64) -> Self {
        self.amount_ml = Some(amount_ml);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Length of the activity in whole minutes, if it has ended.
    #[must_use]
    pub fn duration_minutes(&self) -> Option<i64> {
        self.ended_at
            .map(|end| (end - self.started_at).num_minutes().max(0))
    }
}
