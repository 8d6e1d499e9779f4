// Copyright the herald project contributors. All rights reserved.
//
// Use of this software is governed by the MIT License
// included in the LICENSE file.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use thiserror::Error;

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutboxRecordID(uuid::Uuid);

impl OutboxRecordID {
    pub fn new(id: uuid::Uuid) -> Self {
        Self(id)
    }

    pub fn new_random() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn into_inner(self) -> uuid::Uuid {
        self.0
    }
}

impl std::fmt::Display for OutboxRecordID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Pending,
    Sent,
    Dead,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Dead => "dead",
        }
    }
}

impl FromStr for RecordStatus {
    type Err = InvalidRecordStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "dead" => Ok(Self::Dead),
            _ => Err(InvalidRecordStatusError {
                value: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
#[error("Value '{value}' is not a valid outbox record status")]
pub struct InvalidRecordStatusError {
    pub value: String,
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// One emitted domain event, as persisted in the outbox table.
///
/// The payload is an opaque byte sequence; the relay never inspects it.
/// `(aggregate_type, aggregate_id, created_at)` determines per-aggregate
/// publish order, with ties broken by `id`. Once the status leaves
/// [`RecordStatus::Pending`] the record is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxRecord {
    pub id: OutboxRecordID,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub data: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub status: RecordStatus,
    pub attempts: i32,
    pub topic: String,
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// An outbox record as handed over by a producer, before the store assigns
/// the insertion-time attributes (`created_at`, `status`, `attempts`).
///
/// A caller-supplied `id` is honored, which allows idempotent inserts;
/// otherwise the store generates a random one.
#[derive(Debug, Clone)]
pub struct NewOutboxRecord {
    pub id: Option<OutboxRecordID>,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub data: Vec<u8>,
    pub topic: String,
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
