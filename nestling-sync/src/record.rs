//! Flat cloud record model.
//!
//! A cloud record is a typed bag of named primitive fields plus an optional
//! parent reference. The relay assigns a change tag on every save; records
//! saved with [`SavePolicy::IfUnmodified`] must carry the tag they were
//! fetched with.

use chrono::{DateTime, Utc};
use nestling_model::EntityKind;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// An owner-scoped storage partition on the relay.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ZoneId {
    pub name: String,
    /// Relay user ID of the zone's owner.
    pub owner: String,
}

impl ZoneId {
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
        }
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.owner, self.name)
    }
}

/// Identity of a record: its zone plus a name unique within the zone.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId {
    pub zone: ZoneId,
    pub name: String,
}

impl RecordId {
    pub fn new(zone: ZoneId, name: impl Into<String>) -> Self {
        Self {
            zone,
            name: name.into(),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.zone, self.name)
    }
}

/// A binary attachment stored out-of-band and addressed by its SHA-256.
///
/// `data` is present when the asset was created locally or materialized by
/// the relay on fetch; the relay itself only keeps the digest on the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub digest: String,
    pub data: Option<Vec<u8>>,
}

impl Asset {
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            digest: Self::digest_of(&data),
            data: Some(data),
        }
    }

    pub fn digest_of(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    /// Drops the payload, keeping only the content address.
    pub fn detached(&self) -> Self {
        Self {
            digest: self.digest.clone(),
            data: None,
        }
    }
}

/// A single field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    String(String),
    Date(DateTime<Utc>),
    Int(i64),
    Double(f64),
    Asset(Asset),
    Reference(RecordId),
}

/// How the relay treats an incoming record that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SavePolicy {
    /// Replace the stored record whatever its change tag.
    Overwrite,
    /// Reject with a conflict unless the change tags match.
    IfUnmodified,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudRecord {
    pub id: RecordId,
    pub record_type: EntityKind,
    pub fields: BTreeMap<String, FieldValue>,
    /// Parent link, used by the relay to extend a share to children.
    pub parent: Option<RecordId>,
    /// Set by the relay on a share's root record.
    pub share: Option<RecordId>,
    pub change_tag: Option<String>,
}

impl CloudRecord {
    pub fn new(id: RecordId, record_type: EntityKind) -> Self {
        Self {
            id,
            record_type,
            fields: BTreeMap::new(),
            parent: None,
            share: None,
            change_tag: None,
        }
    }

    pub fn set(&mut self, key: &str, value: FieldValue) {
        self.fields.insert(key.to_string(), value);
    }

    /// Sets the field when `value` is present, removes it otherwise.
    pub fn set_opt(&mut self, key: &str, value: Option<FieldValue>) {
        match value {
            Some(v) => self.set(key, v),
            None => {
                self.fields.remove(key);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(FieldValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn date(&self, key: &str) -> Option<DateTime<Utc>> {
        match self.get(key) {
            Some(FieldValue::Date(d)) => Some(*d),
            _ => None,
        }
    }

    /// Reads a numeric field, accepting either an integer or a double.
    pub fn double(&self, key: &str) -> Option<f64> {
        match self.get(key) {
            Some(FieldValue::Double(v)) => Some(*v),
            Some(FieldValue::Int(v)) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(FieldValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn asset(&self, key: &str) -> Option<&Asset> {
        match self.get(key) {
            Some(FieldValue::Asset(a)) => Some(a),
            _ => None,
        }
    }

    pub fn reference(&self, key: &str) -> Option<&RecordId> {
        match self.get(key) {
            Some(FieldValue::Reference(r)) => Some(r),
            _ => None,
        }
    }
}
