// Copyright the herald project contributors. All rights reserved.
//
// Use of this software is governed by the MIT License
// included in the LICENSE file.

use async_nats::HeaderMap;
use dill::{component, interface};
use herald_outbox::*;

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Publishes outbox records to NATS: subject is the record's topic, payload
/// is the event data verbatim, and the aggregate routing triple travels in
/// headers so consumers can filter without parsing payloads.
pub struct NatsRecordPublisher {
    client: async_nats::Client,
}

#[component(pub)]
#[interface(dyn RecordPublisher)]
impl NatsRecordPublisher {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[async_trait::async_trait]
impl RecordPublisher for NatsRecordPublisher {
    #[tracing::instrument(level = "debug", skip_all, fields(record_id = %record.id))]
    async fn publish_record(&self, record: &OutboxRecord) -> Result<(), PublishRecordError> {
        if record.topic.is_empty() {
            return Err(PublishRecordError::MissingTopic(MissingRecordTopicError {
                record_id: record.id,
            }));
        }

        let mut headers = HeaderMap::new();
        headers.insert("event-type", record.event_type.as_str());
        headers.insert("aggregate-type", record.aggregate_type.as_str());
        headers.insert("aggregate-id", record.aggregate_id.as_str());

        self.client
            .publish_with_headers(record.topic.clone(), headers, record.data.clone().into())
            .await
            .map_err(|e| PublishRecordError::Transient(TransientPublishError::new(e)))?;

        // Publishes are buffered client-side; flush so a broken connection
        // surfaces on this attempt instead of a later one
        self.client
            .flush()
            .await
            .map_err(|e| PublishRecordError::Transient(TransientPublishError::new(e)))?;

        tracing::debug!(subject = %record.topic, "Published outbox record to NATS");

        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
