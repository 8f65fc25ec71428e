use std::fmt;

use blob_types::Generation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one physical record, independent of its key.
///
/// Two records may briefly share a key on a backend without a uniqueness
/// index; the id is how they are told apart.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Smallest possible id, useful as a range bound.
    pub const MIN: Self = Self(Uuid::nil());

    /// Generate a fresh, time-ordered id.
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata of a committed record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub key: String,
    /// Length of the content in bytes.
    pub size: u64,
    /// Logical owners of the content.
    pub ref_count: u64,
    /// Set at commit and refreshed on every new reference.
    pub last_referenced: DateTime<Utc>,
    /// GC generation current when the record was committed.
    pub generation: Generation,
}

/// Reference state a record is committed with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefState {
    pub ref_count: u64,
    pub last_referenced: DateTime<Utc>,
    pub generation: Generation,
}

impl RefState {
    /// A single fresh reference taken now.
    pub fn first_reference(generation: Generation) -> Self {
        Self {
            ref_count: 1,
            last_referenced: Utc::now(),
            generation,
        }
    }
}

/// Predicate on a single record, evaluated atomically with the operation
/// it gates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Condition {
    Always,
    RefCountEquals(u64),
    RefCountAtLeast(u64),
    ReferencedBefore(DateTime<Utc>),
    /// The physical record with this id, whatever its key shares with others.
    RecordIs(RecordId),
}

impl Condition {
    pub fn matches(&self, record: &Record) -> bool {
        match *self {
            Self::Always => true,
            Self::RefCountEquals(n) => record.ref_count == n,
            Self::RefCountAtLeast(n) => record.ref_count >= n,
            Self::ReferencedBefore(t) => record.last_referenced < t,
            Self::RecordIs(id) => record.id == id,
        }
    }
}

/// Selects the record under `key` that satisfies `condition`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selector {
    pub key: String,
    pub condition: Condition,
}

impl Selector {
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            condition: Condition::Always,
        }
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }
}

/// Change applied to a record's reference state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Mutation {
    /// Added to `ref_count`, saturating at zero.
    pub ref_delta: i64,
    /// New `last_referenced` value, if any.
    pub touch: Option<DateTime<Utc>>,
}

impl Mutation {
    /// Take one more reference and refresh the timestamp.
    pub fn add_reference() -> Self {
        Self {
            ref_delta: 1,
            touch: Some(Utc::now()),
        }
    }

    /// Drop one reference.
    pub fn drop_reference() -> Self {
        Self {
            ref_delta: -1,
            touch: None,
        }
    }

    /// Adjust the count by `delta` without touching the timestamp.
    pub fn adjust(delta: i64) -> Self {
        Self {
            ref_delta: delta,
            touch: None,
        }
    }

    /// Take every reference at once, leaving the count at zero.
    pub fn drain() -> Self {
        Self::adjust(i64::MIN)
    }

    pub fn apply(&self, record: &mut Record) {
        record.ref_count = record.ref_count.saturating_add_signed(self.ref_delta);
        if let Some(t) = self.touch {
            record.last_referenced = t;
        }
    }
}

/// Which version of the record `find_and_modify` returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReturnDocument {
    Before,
    After,
}

/// Predicate for enumeration and bulk deletion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Filter {
    KeyPrefix(String),
    KeyPrefixReferencedBefore(String, DateTime<Utc>),
}

impl Filter {
    /// Every matching record's key starts with this.
    pub fn key_prefix(&self) -> &str {
        match self {
            Self::KeyPrefix(p) | Self::KeyPrefixReferencedBefore(p, _) => p,
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::KeyPrefix(p) => record.key.starts_with(p.as_str()),
            Self::KeyPrefixReferencedBefore(p, t) => {
                record.key.starts_with(p.as_str()) && record.last_referenced < *t
            }
        }
    }
}
