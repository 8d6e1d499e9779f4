// Copyright the herald project contributors. All rights reserved.
//
// Use of this software is governed by the MIT License
// included in the LICENSE file.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use dill::{component, interface, scope, Singleton};

use crate::{
    MissingRecordTopicError,
    OutboxRecord,
    PublishRecordError,
    RecordPublisher,
    TransientPublishError,
};

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Scripted outcome of one publish attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Success,
    TransientFailure,
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Publisher double that records every attempt and replays a script of
/// outcomes, succeeding once the script runs dry
pub struct RecordPublisherStub {
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    script: VecDeque<PublishOutcome>,
    published: Vec<OutboxRecord>,
    attempts: usize,
}

#[component(pub)]
#[scope(Singleton)]
#[interface(dyn RecordPublisher)]
impl RecordPublisherStub {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    pub fn enqueue_outcome(&self, outcome: PublishOutcome) {
        self.state.lock().unwrap().script.push_back(outcome);
    }

    pub fn fail_next_attempts(&self, n: usize) {
        let mut guard = self.state.lock().unwrap();
        for _ in 0..n {
            guard.script.push_back(PublishOutcome::TransientFailure);
        }
    }

    /// Records handed to the broker successfully, in publish order
    pub fn published_records(&self) -> Vec<OutboxRecord> {
        self.state.lock().unwrap().published.clone()
    }

    pub fn publish_attempts(&self) -> usize {
        self.state.lock().unwrap().attempts
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[async_trait::async_trait]
impl RecordPublisher for RecordPublisherStub {
    async fn publish_record(&self, record: &OutboxRecord) -> Result<(), PublishRecordError> {
        if record.topic.is_empty() {
            return Err(PublishRecordError::MissingTopic(MissingRecordTopicError {
                record_id: record.id,
            }));
        }

        let mut guard = self.state.lock().unwrap();
        guard.attempts += 1;

        match guard.script.pop_front() {
            Some(PublishOutcome::TransientFailure) => Err(PublishRecordError::Transient(
                TransientPublishError::new("stubbed broker outage"),
            )),
            Some(PublishOutcome::Success) | None => {
                guard.published.push(record.clone());
                Ok(())
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
