// Copyright the herald project contributors. All rights reserved.
//
// Use of this software is governed by the MIT License
// included in the LICENSE file.

use std::sync::Arc;

use dill::component;
use error_core::InternalError;
use herald_outbox::*;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Periodically drains the outbox on the leader replica.
///
/// Each tick: consult the elector, fetch a batch of ready records, and walk
/// it sequentially, publishing and recording the outcome per record. Failures
/// inside the loop are logged and absorbed; only the caller's cancellation
/// token or [`OutboxRelayAgent::shutdown`] stop it.
pub struct OutboxRelayAgent {
    record_repo: Arc<dyn OutboxRecordRepository>,
    record_publisher: Arc<dyn RecordPublisher>,
    leader_elector: Arc<dyn LeaderElector>,
    config: Arc<RelayConfig>,
    shutdown_token: CancellationToken,
}

#[component(pub)]
impl OutboxRelayAgent {
    pub fn new(
        record_repo: Arc<dyn OutboxRecordRepository>,
        record_publisher: Arc<dyn RecordPublisher>,
        leader_elector: Arc<dyn LeaderElector>,
        config: Arc<RelayConfig>,
    ) -> Self {
        Self {
            record_repo,
            record_publisher,
            leader_elector,
            config,
            shutdown_token: CancellationToken::new(),
        }
    }
}

impl OutboxRelayAgent {
    /// Runs the polling loop until the caller's token is cancelled
    /// (returns [`RelayRunError::Cancelled`]) or [`OutboxRelayAgent::shutdown`]
    /// is signalled (returns `Ok`). Exit is honored at record boundaries, so
    /// stopping latency is bounded by one publish attempt.
    pub async fn run(&self, cancellation_token: CancellationToken) -> Result<(), RelayRunError> {
        let poll_interval = self
            .config
            .poll_interval
            .to_std()
            .map_err(InternalError::new)?;

        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + poll_interval,
            poll_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            poll_interval_ms = poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            max_attempts = self.config.max_attempts,
            "Outbox relay started"
        );

        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    tracing::info!("Outbox relay cancelled, stopping");
                    return Err(RelayRunError::Cancelled);
                }
                _ = self.shutdown_token.cancelled() => {
                    tracing::info!("Outbox relay received shutdown signal, stopping");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    self.run_iteration(&cancellation_token).await;
                }
            }
        }
    }

    /// Signals the polling loop to exit at the next record boundary.
    /// Signalling more than once is tolerated.
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }

    /// Executes exactly one tick. Test entry point for deterministic
    /// scenarios that drive time by hand.
    pub async fn run_single_iteration_only(&self) {
        self.run_iteration(&CancellationToken::new()).await;
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn run_iteration(&self, cancellation_token: &CancellationToken) {
        let is_leader = match self.leader_elector.is_leader().await {
            Ok(is_leader) => is_leader,
            Err(e) => {
                tracing::error!(error = ?e, "Leadership check failed, skipping tick");
                return;
            }
        };

        if !is_leader {
            tracing::debug!("Not the current leader, skipping tick");
            return;
        }

        self.process_ready_records(cancellation_token).await;
    }

    async fn process_ready_records(&self, cancellation_token: &CancellationToken) {
        let records = match self.record_repo.fetch_next_ready(self.config.batch_size).await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(error = ?e, "Failed to fetch ready outbox records, skipping tick");
                return;
            }
        };

        if records.is_empty() {
            tracing::debug!("No outbox records ready");
            return;
        }

        tracing::debug!(batch_len = records.len(), "Processing ready outbox records");

        for record in records {
            self.process_record(record).await;

            if cancellation_token.is_cancelled() || self.shutdown_token.is_cancelled() {
                tracing::debug!("Stop requested, abandoning the remainder of the batch");
                break;
            }
        }
    }

    async fn process_record(&self, record: OutboxRecord) {
        // Records that burned through their attempt budget are dead-lettered
        // before another publish is tried
        if record.attempts >= self.config.max_attempts {
            tracing::warn!(
                record_id = %record.id,
                attempts = record.attempts,
                "Outbox record exceeded max publish attempts, dead-lettering"
            );

            if let Err(e) = self.record_repo.mark_dead(record.id).await {
                tracing::error!(record_id = %record.id, error = ?e, "Failed to dead-letter outbox record");
            }

            return;
        }

        if let Err(e) = self.record_publisher.publish_record(&record).await {
            tracing::error!(
                record_id = %record.id,
                subject = %record.topic,
                error = ?e,
                "Failed to publish outbox record"
            );

            // Later records may belong to other aggregates; keep going. This
            // aggregate's record simply reappears next tick.
            if let Err(inc_err) = self.record_repo.increment_attempt(record.id).await {
                tracing::error!(record_id = %record.id, error = ?inc_err, "Failed to increment record attempts");
            }

            return;
        }

        if let Err(e) = self.record_repo.mark_sent(record.id).await {
            // The record will be fetched and published again next tick; the
            // duplicate on the broker is within the at-least-once contract
            tracing::error!(record_id = %record.id, error = ?e, "Failed to mark outbox record as sent");
            return;
        }

        tracing::debug!(record_id = %record.id, subject = %record.topic, "Outbox record published");
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
// Errors
////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Error, Debug)]
pub enum RelayRunError {
    #[error("Outbox relay was cancelled")]
    Cancelled,

    #[error(transparent)]
    Internal(#[from] InternalError),
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
