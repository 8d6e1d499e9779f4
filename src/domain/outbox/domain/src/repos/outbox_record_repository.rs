// Copyright the herald project contributors. All rights reserved.
//
// Use of this software is governed by the MIT License
// included in the LICENSE file.

use error_core::InternalError;
use thiserror::Error;

use crate::{OutboxRecord, OutboxRecordID};

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Storage operations the relay drains the outbox through.
///
/// Insertion is deliberately absent: producers insert through the concrete
/// backend so that the record shares the fate of their business transaction,
/// while the relay only ever needs the narrow read/transition surface below.
#[async_trait::async_trait]
pub trait OutboxRecordRepository: Send + Sync {
    /// Returns up to `limit` records that are ready to publish: for each
    /// `(aggregate_type, aggregate_id)` with at least one pending record,
    /// the single record with the earliest `created_at` (ties broken by
    /// `id`), the whole batch sorted by `created_at` ascending.
    ///
    /// Holding back every later record of an aggregate until its earliest
    /// pending record is terminal is what preserves per-aggregate order
    /// across retries.
    async fn fetch_next_ready(
        &self,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>, FetchNextReadyError>;

    /// Transitions `pending -> sent` and stamps `sent_at`.
    async fn mark_sent(&self, record_id: OutboxRecordID) -> Result<(), MarkSentError>;

    /// Bumps the attempt counter without touching the status. Repeated
    /// increments for the same failed publish are tolerated.
    async fn increment_attempt(
        &self,
        record_id: OutboxRecordID,
    ) -> Result<(), IncrementAttemptError>;

    /// Transitions `pending -> dead` and stamps `sent_at`. Dead records are
    /// kept forever; retention is an operator concern.
    async fn mark_dead(&self, record_id: OutboxRecordID) -> Result<(), MarkDeadError>;
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
// Errors
////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Error, Debug)]
#[error("Outbox record '{record_id}' not found in a pending state")]
pub struct RecordNotFoundError {
    pub record_id: OutboxRecordID,
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Error, Debug)]
pub enum FetchNextReadyError {
    #[error(transparent)]
    Internal(#[from] InternalError),
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Error, Debug)]
pub enum MarkSentError {
    #[error(transparent)]
    NotFound(RecordNotFoundError),

    #[error(transparent)]
    Internal(#[from] InternalError),
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Error, Debug)]
pub enum IncrementAttemptError {
    #[error(transparent)]
    Internal(#[from] InternalError),
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Error, Debug)]
pub enum MarkDeadError {
    #[error(transparent)]
    NotFound(RecordNotFoundError),

    #[error(transparent)]
    Internal(#[from] InternalError),
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Error, Debug)]
pub enum InsertRecordError {
    #[error(transparent)]
    EmptyTopic(EmptyRecordTopicError),

    #[error(transparent)]
    Internal(#[from] InternalError),
}

#[derive(Error, Debug)]
#[error("Outbox record for aggregate '{aggregate_type}/{aggregate_id}' has an empty topic")]
pub struct EmptyRecordTopicError {
    pub aggregate_type: String,
    pub aggregate_id: String,
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
