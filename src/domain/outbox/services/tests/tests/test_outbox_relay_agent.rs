// Copyright the herald project contributors. All rights reserved.
//
// Use of this software is governed by the MIT License
// included in the LICENSE file.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use error_core::InternalError;
use herald_outbox::testing::{LeaderElectorStub, PublishOutcome, RecordPublisherStub};
use herald_outbox::*;
use herald_outbox_inmem::InMemoryOutboxRecordRepository;
use herald_outbox_services::{OutboxRelayAgent, RelayRunError};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[test_log::test(tokio::test)]
async fn test_happy_path_publishes_and_marks_sent() {
    let harness = RelayAgentHarness::new();

    let record_id = harness.insert_record_at(t(100), "User", "1", "users").await;
    harness.relay_agent.run_single_iteration_only().await;

    let published = harness.publisher_stub.published_records();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "users");
    assert_eq!(published[0].data, br#"{"id":1}"#.to_vec());
    assert_eq!(published[0].event_type, "UserCreated");

    let record = harness.record_repo.get_record(record_id).unwrap();
    assert_eq!(record.status, RecordStatus::Sent);
    assert!(record.sent_at.is_some());
    assert_eq!(record.attempts, 0);
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[test_log::test(tokio::test)]
async fn test_transient_failures_are_retried_until_success() {
    let harness = RelayAgentHarness::new();
    harness.publisher_stub.fail_next_attempts(2);

    let record_id = harness.insert_record_at(t(100), "User", "1", "users").await;

    harness.relay_agent.run_single_iteration_only().await;
    harness.relay_agent.run_single_iteration_only().await;
    assert_eq!(harness.publisher_stub.published_records().len(), 0);
    assert_eq!(
        harness.record_repo.get_record(record_id).unwrap().attempts,
        2
    );

    harness.relay_agent.run_single_iteration_only().await;

    assert_eq!(harness.publisher_stub.published_records().len(), 1);
    let record = harness.record_repo.get_record(record_id).unwrap();
    assert_eq!(record.status, RecordStatus::Sent);
    assert_eq!(record.attempts, 2);
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[test_log::test(tokio::test)]
async fn test_record_is_dead_lettered_after_exhausting_attempts() {
    let harness = RelayAgentHarness::new();
    for _ in 0..10 {
        harness
            .publisher_stub
            .enqueue_outcome(PublishOutcome::TransientFailure);
    }

    let record_id = harness.insert_record_at(t(100), "User", "1", "users").await;

    // max_attempts failing publishes, then one tick that observes the
    // exhausted budget and dead-letters without publishing again
    for _ in 0..3 {
        harness.relay_agent.run_single_iteration_only().await;
    }
    assert_eq!(harness.publisher_stub.publish_attempts(), 3);
    assert_eq!(
        harness.record_repo.get_record(record_id).unwrap().status,
        RecordStatus::Pending
    );

    harness.relay_agent.run_single_iteration_only().await;

    let record = harness.record_repo.get_record(record_id).unwrap();
    assert_eq!(record.status, RecordStatus::Dead);
    assert!(record.sent_at.is_some());
    assert_eq!(harness.publisher_stub.publish_attempts(), 3);
    assert_eq!(harness.publisher_stub.published_records().len(), 0);

    // Dead records are invisible to further ticks
    harness.relay_agent.run_single_iteration_only().await;
    assert_eq!(harness.publisher_stub.publish_attempts(), 3);
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[test_log::test(tokio::test)]
async fn test_per_aggregate_order_survives_failed_publish() {
    let harness = RelayAgentHarness::new();

    let first = harness.insert_record_at(t(100), "User", "1", "users").await;
    let second = harness.insert_record_at(t(200), "User", "1", "users").await;

    harness.publisher_stub.fail_next_attempts(1);

    // First tick attempts only the earliest record of the aggregate; its
    // failure must not let the successor overtake it
    harness.relay_agent.run_single_iteration_only().await;
    assert_eq!(harness.publisher_stub.publish_attempts(), 1);
    assert_eq!(harness.publisher_stub.published_records().len(), 0);

    harness.relay_agent.run_single_iteration_only().await;
    harness.relay_agent.run_single_iteration_only().await;

    assert_eq!(
        harness
            .publisher_stub
            .published_records()
            .iter()
            .map(|r| r.id)
            .collect::<Vec<_>>(),
        vec![first, second]
    );
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[test_log::test(tokio::test)]
async fn test_non_leader_touches_nothing() {
    let harness = RelayAgentHarness::new();
    harness.elector_stub.set_leader(false);

    for i in 0..10i64 {
        harness
            .insert_record_at(t(100 + i), "User", &i.to_string(), "users")
            .await;
    }

    for _ in 0..5 {
        harness.relay_agent.run_single_iteration_only().await;
    }

    assert_eq!(harness.publisher_stub.publish_attempts(), 0);
    assert_eq!(
        harness
            .record_repo
            .count_records_in_status(RecordStatus::Pending),
        10
    );
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[test_log::test(tokio::test)]
async fn test_elector_error_skips_tick_and_loop_recovers() {
    let harness = RelayAgentHarness::new();
    let record_id = harness.insert_record_at(t(100), "User", "1", "users").await;

    harness.elector_stub.fail_next_check();
    harness.relay_agent.run_single_iteration_only().await;
    assert_eq!(harness.publisher_stub.publish_attempts(), 0);

    harness.relay_agent.run_single_iteration_only().await;
    assert_eq!(
        harness.record_repo.get_record(record_id).unwrap().status,
        RecordStatus::Sent
    );
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[test_log::test(tokio::test)]
async fn test_fetch_error_skips_tick_and_loop_recovers() {
    let harness = RelayAgentHarness::new_flaky();
    let flaky_repo = harness.flaky_repo.as_ref().unwrap();

    let record_id = harness.insert_record_at(t(100), "User", "1", "users").await;

    flaky_repo.fail_next_fetch();
    harness.relay_agent.run_single_iteration_only().await;
    assert_eq!(harness.publisher_stub.publish_attempts(), 0);

    harness.relay_agent.run_single_iteration_only().await;
    assert_eq!(
        harness.record_repo.get_record(record_id).unwrap().status,
        RecordStatus::Sent
    );
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[test_log::test(tokio::test)]
async fn test_mark_sent_failure_leads_to_duplicate_publish() {
    let harness = RelayAgentHarness::new_flaky();
    let flaky_repo = harness.flaky_repo.as_ref().unwrap();

    let record_id = harness.insert_record_at(t(100), "User", "1", "users").await;

    flaky_repo.fail_next_mark_sent();
    harness.relay_agent.run_single_iteration_only().await;

    // Published, but still pending: the next tick publishes it again
    assert_eq!(harness.publisher_stub.published_records().len(), 1);
    assert_eq!(
        harness.record_repo.get_record(record_id).unwrap().status,
        RecordStatus::Pending
    );

    harness.relay_agent.run_single_iteration_only().await;

    assert_eq!(harness.publisher_stub.published_records().len(), 2);
    assert_eq!(
        harness.record_repo.get_record(record_id).unwrap().status,
        RecordStatus::Sent
    );
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[test_log::test(tokio::test)]
async fn test_leadership_failover_resumes_on_other_replica() {
    let time_source_stub = Arc::new(SystemTimeSourceStub::new());
    let record_repo = Arc::new(InMemoryOutboxRecordRepository::new(time_source_stub.clone()));
    let publisher_stub = Arc::new(RecordPublisherStub::new());

    let elector_a = Arc::new(LeaderElectorStub::new_leader(true));
    let elector_b = Arc::new(LeaderElectorStub::new_leader(false));

    let config = Arc::new(RelayConfig::for_tests());
    let replica_a = OutboxRelayAgent::new(
        record_repo.clone(),
        publisher_stub.clone(),
        elector_a.clone(),
        config.clone(),
    );
    let replica_b = OutboxRelayAgent::new(
        record_repo.clone(),
        publisher_stub.clone(),
        elector_b.clone(),
        config.clone(),
    );

    time_source_stub.set(t(100));
    let first = record_repo
        .insert_record(new_record("User", "1", "users"))
        .await
        .unwrap();

    replica_a.run_single_iteration_only().await;
    replica_b.run_single_iteration_only().await;
    assert_eq!(
        publisher_stub
            .published_records()
            .iter()
            .map(|r| r.id)
            .collect::<Vec<_>>(),
        vec![first]
    );

    // Replica A's session dies; B takes the lock over
    elector_a.set_leader(false);
    elector_b.set_leader(true);

    time_source_stub.set(t(200));
    let second = record_repo
        .insert_record(new_record("User", "1", "users"))
        .await
        .unwrap();

    replica_a.run_single_iteration_only().await;
    replica_b.run_single_iteration_only().await;

    assert_eq!(
        publisher_stub
            .published_records()
            .iter()
            .map(|r| r.id)
            .collect::<Vec<_>>(),
        vec![first, second]
    );
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[test_log::test(tokio::test)]
async fn test_shutdown_stops_run_cleanly() {
    let harness = RelayAgentHarness::new();
    let agent = harness.relay_agent.clone();

    let run_handle = tokio::spawn({
        let agent = agent.clone();
        async move { agent.run(CancellationToken::new()).await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    agent.shutdown();
    // Double shutdown is tolerated
    agent.shutdown();

    let res = tokio::time::timeout(Duration::from_secs(5), run_handle)
        .await
        .unwrap()
        .unwrap();
    assert!(res.is_ok());
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[test_log::test(tokio::test)]
async fn test_cancellation_stops_run_with_cancelled_error() {
    let harness = RelayAgentHarness::new();
    let agent = harness.relay_agent.clone();

    let cancellation_token = CancellationToken::new();
    let run_handle = tokio::spawn({
        let agent = agent.clone();
        let token = cancellation_token.clone();
        async move { agent.run(token).await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancellation_token.cancel();

    let res = tokio::time::timeout(Duration::from_secs(5), run_handle)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(res, Err(RelayRunError::Cancelled)));
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[test_log::test(tokio::test)]
async fn test_run_keeps_polling_and_publishes_over_time() {
    let harness = RelayAgentHarness::new();
    let agent = harness.relay_agent.clone();

    let record_id = harness.insert_record_at(t(100), "User", "1", "users").await;

    let run_handle = tokio::spawn({
        let agent = agent.clone();
        async move { agent.run(CancellationToken::new()).await }
    });

    // Generous budget for a couple of 10ms poll intervals
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if harness.record_repo.get_record(record_id).unwrap().status == RecordStatus::Sent {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "record was not published in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    agent.shutdown();
    tokio::time::timeout(Duration::from_secs(5), run_handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
// Harness
////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

struct RelayAgentHarness {
    record_repo: Arc<InMemoryOutboxRecordRepository>,
    flaky_repo: Option<Arc<FlakyOutboxRecordRepository>>,
    publisher_stub: Arc<RecordPublisherStub>,
    elector_stub: Arc<LeaderElectorStub>,
    time_source_stub: Arc<SystemTimeSourceStub>,
    relay_agent: Arc<OutboxRelayAgent>,
}

impl RelayAgentHarness {
    fn new() -> Self {
        let catalog = {
            let mut b = dill::CatalogBuilder::new();
            b.add::<SystemTimeSourceStub>();
            b.add::<InMemoryOutboxRecordRepository>();
            b.add::<RecordPublisherStub>();
            b.add::<LeaderElectorStub>();
            b.add_value(RelayConfig::for_tests());
            b.add::<OutboxRelayAgent>();
            b.build()
        };

        Self {
            record_repo: catalog.get_one().unwrap(),
            flaky_repo: None,
            publisher_stub: catalog.get_one().unwrap(),
            elector_stub: catalog.get_one().unwrap(),
            time_source_stub: catalog.get_one().unwrap(),
            relay_agent: catalog.get_one().unwrap(),
        }
    }

    /// Variant whose agent sees the store through a wrapper with injectable
    /// failures
    fn new_flaky() -> Self {
        let time_source_stub = Arc::new(SystemTimeSourceStub::new());
        let record_repo = Arc::new(InMemoryOutboxRecordRepository::new(time_source_stub.clone()));
        let flaky_repo = Arc::new(FlakyOutboxRecordRepository::new(record_repo.clone()));
        let publisher_stub = Arc::new(RecordPublisherStub::new());
        let elector_stub = Arc::new(LeaderElectorStub::new());

        let relay_agent = Arc::new(OutboxRelayAgent::new(
            flaky_repo.clone(),
            publisher_stub.clone(),
            elector_stub.clone(),
            Arc::new(RelayConfig::for_tests()),
        ));

        Self {
            record_repo,
            flaky_repo: Some(flaky_repo),
            publisher_stub,
            elector_stub,
            time_source_stub,
            relay_agent,
        }
    }

    async fn insert_record_at(
        &self,
        created_at: DateTime<Utc>,
        aggregate_type: &str,
        aggregate_id: &str,
        topic: &str,
    ) -> OutboxRecordID {
        self.time_source_stub.set(created_at);
        self.record_repo
            .insert_record(new_record(aggregate_type, aggregate_id, topic))
            .await
            .unwrap()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Store wrapper that injects one-shot failures into individual operations
struct FlakyOutboxRecordRepository {
    inner: Arc<InMemoryOutboxRecordRepository>,
    fail_next_fetch: AtomicBool,
    fail_next_mark_sent: AtomicBool,
}

impl FlakyOutboxRecordRepository {
    fn new(inner: Arc<InMemoryOutboxRecordRepository>) -> Self {
        Self {
            inner,
            fail_next_fetch: AtomicBool::new(false),
            fail_next_mark_sent: AtomicBool::new(false),
        }
    }

    fn fail_next_fetch(&self) {
        self.fail_next_fetch.store(true, Ordering::SeqCst);
    }

    fn fail_next_mark_sent(&self) {
        self.fail_next_mark_sent.store(true, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl OutboxRecordRepository for FlakyOutboxRecordRepository {
    async fn fetch_next_ready(
        &self,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>, FetchNextReadyError> {
        if self.fail_next_fetch.swap(false, Ordering::SeqCst) {
            return Err(InternalError::new("stubbed fetch failure").into());
        }
        self.inner.fetch_next_ready(limit).await
    }

    async fn mark_sent(&self, record_id: OutboxRecordID) -> Result<(), MarkSentError> {
        if self.fail_next_mark_sent.swap(false, Ordering::SeqCst) {
            return Err(InternalError::new("stubbed mark-sent failure").into());
        }
        self.inner.mark_sent(record_id).await
    }

    async fn increment_attempt(
        &self,
        record_id: OutboxRecordID,
    ) -> Result<(), IncrementAttemptError> {
        self.inner.increment_attempt(record_id).await
    }

    async fn mark_dead(&self, record_id: OutboxRecordID) -> Result<(), MarkDeadError> {
        self.inner.mark_dead(record_id).await
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

fn new_record(aggregate_type: &str, aggregate_id: &str, topic: &str) -> NewOutboxRecord {
    NewOutboxRecord {
        id: None,
        event_type: "UserCreated".to_string(),
        aggregate_type: aggregate_type.to_string(),
        aggregate_id: aggregate_id.to_string(),
        data: br#"{"id":1}"#.to_vec(),
        topic: topic.to_string(),
    }
}

fn t(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(seconds, 0).unwrap()
}
