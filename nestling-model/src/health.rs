use chrono::{DateTime, Utc};
use nestling_types::{EntryId, ProfileId};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HealthRecordKind {
    Temperature,
    Medication,
    Vaccination,
    DoctorVisit,
    Symptom,
    Other,
}

impl HealthRecordKind {
    /// The wire tag for this value.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            HealthRecordKind::Temperature => "temperature",
            HealthRecordKind::Medication => "medication",
            HealthRecordKind::Vaccination => "vaccination",
            HealthRecordKind::DoctorVisit => "doctorVisit",
            HealthRecordKind::Symptom => "symptom",
            HealthRecordKind::Other => "other",
        }
    }

    /// Looks up a value by wire tag, falling back to `Other`.
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "temperature" => HealthRecordKind::Temperature,
            "medication" => HealthRecordKind::Medication,
            "vaccination" => HealthRecordKind::Vaccination,
            "doctorVisit" => HealthRecordKind::DoctorVisit,
            "symptom" => HealthRecordKind::Symptom,
            _ => HealthRecordKind::Other,
        }
    }
}

impl fmt::Display for HealthRecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A health event: temperature reading, dose, vaccination, visit, symptom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub id: EntryId,
    pub profile_id: ProfileId,
    pub kind: HealthRecordKind,
    pub recorded_at: DateTime<Utc>,
    pub title: String,
    /// Numeric reading where one applies (e.g. degrees Celsius, dose in ml).
    pub value: Option<f64>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub remote_change_tag: Option<String>,
}

impl HealthRecord {
    pub fn new(
        profile_id: ProfileId,
        kind: HealthRecordKind,
        recorded_at: DateTime<Utc>,
        title: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: EntryId::new(),
            profile_id,
            kind,
            recorded_at,
            title: title.into(),
            value: None,
            notes: None,
            created_at: now,
            updated_at: now,
            remote_change_tag: None,
        }
    }

    pub fn placeholder(id: EntryId, profile_id: ProfileId) -> Self {
        let mut record = Self::new(
            profile_id,
            HealthRecordKind::Other,
            DateTime::<Utc>::UNIX_EPOCH,
            "",
        );
        record.id = id;
        record
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}
