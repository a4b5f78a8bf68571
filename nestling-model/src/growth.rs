use chrono::{DateTime, Utc};
use nestling_types::{EntryId, ProfileId};
use serde::{Deserialize, Serialize};

/// A growth measurement. Any subset of the three metrics may be present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthMeasurement {
    pub id: EntryId,
    pub profile_id: ProfileId,
    pub measured_at: DateTime<Utc>,
    pub weight_kg: Option<f64>,
    pub height_cm: Option<f64>,
    pub head_circumference_cm: Option<f64>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub remote_change_tag: Option<String>,
}

impl GrowthMeasurement {
    pub fn new(profile_id: ProfileId, measured_at: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: EntryId::new(),
            profile_id,
            measured_at,
            weight_kg: None,
            height_cm: None,
            head_circumference_cm: None,
            notes: None,
            created_at: now,
            updated_at: now,
            remote_change_tag: None,
        }
    }

    pub fn placeholder(id: EntryId, profile_id: ProfileId) -> Self {
        let mut measurement = Self::new(profile_id, DateTime::<Utc>::UNIX_EPOCH);
        measurement.id = id;
        measurement
    }

    pub fn with_weight_kg(mut self, weight_kg: f64) -> Self {
        self.weight_kg = Some(weight_kg);
        self
    }

    pub fn with_height_cm(mut self, height_cm: f64) -> Self {
        self.height_cm = Some(height_cm);
        self
    }

    pub fn with_head_circumference_cm(mut self, cm: f64) -> Self {
        self.head_circumference_cm = Some(cm);
        self
    }
}
