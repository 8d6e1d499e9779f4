// Copyright the herald project contributors. All rights reserved.
//
// Use of this software is governed by the MIT License
// included in the LICENSE file.

use error_core::{BoxedError, InternalError};
use thiserror::Error;

use crate::{OutboxRecord, OutboxRecordID};

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Performs a single synchronous send attempt of one record to the broker.
///
/// Implementations are stateless and hold no per-record memory, so the relay
/// may call them repeatedly with the same record; duplicates on the broker
/// are the accepted cost of at-least-once delivery.
#[async_trait::async_trait]
pub trait RecordPublisher: Send + Sync {
    async fn publish_record(&self, record: &OutboxRecord) -> Result<(), PublishRecordError>;
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
// Errors
////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Error, Debug)]
pub enum PublishRecordError {
    #[error(transparent)]
    MissingTopic(MissingRecordTopicError),

    #[error(transparent)]
    Transient(TransientPublishError),

    #[error(transparent)]
    Internal(#[from] InternalError),
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Error, Debug)]
#[error("Outbox record '{record_id}' has no topic to publish to")]
pub struct MissingRecordTopicError {
    pub record_id: OutboxRecordID,
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// A broker or network failure that a later attempt may not hit again.
#[derive(Error, Debug)]
#[error("Transient publish failure: {source}")]
pub struct TransientPublishError {
    #[source]
    source: BoxedError,
}

impl TransientPublishError {
    pub fn new<E: Into<BoxedError>>(e: E) -> Self {
        Self { source: e.into() }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
