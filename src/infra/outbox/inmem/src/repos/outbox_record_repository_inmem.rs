// Copyright the herald project contributors. All rights reserved.
//
// Use of this software is governed by the MIT License
// included in the LICENSE file.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use dill::{component, interface, scope, Singleton};
use error_core::InternalError;
use herald_outbox::*;

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Store variant backed by process memory. Reproduces the selection and
/// transition semantics of the SQL store, which lets the relay be exercised
/// without a database.
pub struct InMemoryOutboxRecordRepository {
    time_source: Arc<dyn SystemTimeSource>,
    state: Arc<Mutex<State>>,
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Default)]
struct State {
    records: HashMap<OutboxRecordID, OutboxRecord>,
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[component(pub)]
#[scope(Singleton)]
#[interface(dyn OutboxRecordRepository)]
impl InMemoryOutboxRecordRepository {
    pub fn new(time_source: Arc<dyn SystemTimeSource>) -> Self {
        Self {
            time_source,
            state: Arc::new(Mutex::new(State::default())),
        }
    }
}

impl InMemoryOutboxRecordRepository {
    /// Appends a record in the pending state, stamped with the current time.
    /// A caller-supplied id is honored; inserting an id twice is rejected
    /// the way a primary key violation would be.
    pub async fn insert_record(
        &self,
        new_record: NewOutboxRecord,
    ) -> Result<OutboxRecordID, InsertRecordError> {
        if new_record.topic.is_empty() {
            return Err(InsertRecordError::EmptyTopic(EmptyRecordTopicError {
                aggregate_type: new_record.aggregate_type,
                aggregate_id: new_record.aggregate_id,
            }));
        }

        let record_id = new_record.id.unwrap_or_else(OutboxRecordID::new_random);
        let record = OutboxRecord {
            id: record_id,
            event_type: new_record.event_type,
            aggregate_type: new_record.aggregate_type,
            aggregate_id: new_record.aggregate_id,
            data: new_record.data,
            created_at: self.time_source.now(),
            sent_at: None,
            status: RecordStatus::Pending,
            attempts: 0,
            topic: new_record.topic,
        };

        let mut guard = self.state.lock().unwrap();
        if guard.records.contains_key(&record_id) {
            return Err(InternalError::new(format!(
                "duplicate outbox record id '{record_id}'"
            ))
            .into());
        }
        guard.records.insert(record_id, record);

        Ok(record_id)
    }

    pub fn get_record(&self, record_id: OutboxRecordID) -> Option<OutboxRecord> {
        self.state.lock().unwrap().records.get(&record_id).cloned()
    }

    pub fn count_records_in_status(&self, status: RecordStatus) -> usize {
        self.state
            .lock()
            .unwrap()
            .records
            .values()
            .filter(|r| r.status == status)
            .count()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[async_trait::async_trait]
impl OutboxRecordRepository for InMemoryOutboxRecordRepository {
    async fn fetch_next_ready(
        &self,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>, FetchNextReadyError> {
        let guard = self.state.lock().unwrap();

        // Earliest pending record of each aggregate, ties broken by id
        let mut next_per_aggregate: HashMap<(&str, &str), &OutboxRecord> = HashMap::new();
        for record in guard.records.values() {
            if record.status != RecordStatus::Pending {
                continue;
            }
            let key = (record.aggregate_type.as_str(), record.aggregate_id.as_str());
            match next_per_aggregate.entry(key) {
                Entry::Vacant(e) => {
                    e.insert(record);
                }
                Entry::Occupied(mut e) => {
                    let current = e.get();
                    if (record.created_at, record.id) < (current.created_at, current.id) {
                        e.insert(record);
                    }
                }
            }
        }

        let mut batch: Vec<OutboxRecord> =
            next_per_aggregate.into_values().cloned().collect();
        batch.sort_by_key(|r| (r.created_at, r.id));
        batch.truncate(limit);

        Ok(batch)
    }

    async fn mark_sent(&self, record_id: OutboxRecordID) -> Result<(), MarkSentError> {
        let sent_at = self.time_source.now();
        let mut guard = self.state.lock().unwrap();

        match guard.records.get_mut(&record_id) {
            Some(record) if record.status == RecordStatus::Pending => {
                record.status = RecordStatus::Sent;
                record.sent_at = Some(sent_at);
                Ok(())
            }
            _ => Err(MarkSentError::NotFound(RecordNotFoundError { record_id })),
        }
    }

    async fn increment_attempt(
        &self,
        record_id: OutboxRecordID,
    ) -> Result<(), IncrementAttemptError> {
        let mut guard = self.state.lock().unwrap();
        if let Some(record) = guard.records.get_mut(&record_id) {
            record.attempts += 1;
        }
        Ok(())
    }

    async fn mark_dead(&self, record_id: OutboxRecordID) -> Result<(), MarkDeadError> {
        let sent_at = self.time_source.now();
        let mut guard = self.state.lock().unwrap();

        match guard.records.get_mut(&record_id) {
            Some(record) if record.status == RecordStatus::Pending => {
                record.status = RecordStatus::Dead;
                record.sent_at = Some(sent_at);
                Ok(())
            }
            _ => Err(MarkDeadError::NotFound(RecordNotFoundError { record_id })),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
