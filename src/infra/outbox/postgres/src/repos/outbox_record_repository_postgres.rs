// Copyright the herald project contributors. All rights reserved.
//
// Use of this software is governed by the MIT License
// included in the LICENSE file.

use chrono::{DateTime, Utc};
use dill::{component, interface};
use error_core::{ErrorIntoInternal, InternalError, ResultIntoInternal};
use herald_outbox::*;
use sqlx::{PgPool, Postgres, Transaction};

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

pub struct PostgresOutboxRecordRepository {
    pool: PgPool,
}

#[component(pub)]
#[interface(dyn OutboxRecordRepository)]
impl PostgresOutboxRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl PostgresOutboxRecordRepository {
    /// Idempotently creates the outbox table and the index backing the
    /// per-aggregate ordering selection. Safe to race between replicas;
    /// a failure is retryable.
    pub async fn init_schema(&self) -> Result<(), InternalError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS outbox (
                id             UUID PRIMARY KEY,
                event_type     TEXT NOT NULL,
                aggregate_type TEXT NOT NULL,
                aggregate_id   TEXT NOT NULL,
                data           BYTEA NOT NULL,
                created_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
                sent_at        TIMESTAMPTZ,
                status         TEXT NOT NULL,
                attempts       INT NOT NULL DEFAULT 0,
                topic          TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .int_err()?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_outbox_aggregate_type_id
                ON outbox (aggregate_type, aggregate_id)
            "#,
        )
        .execute(&self.pool)
        .await
        .int_err()?;

        Ok(())
    }

    /// Inserts a pending record inside the caller's transaction, so that it
    /// exists if and only if the enclosing business transaction commits.
    /// A caller-supplied id is honored to allow idempotent inserts.
    pub async fn insert_record(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        new_record: NewOutboxRecord,
    ) -> Result<OutboxRecordID, InsertRecordError> {
        if new_record.topic.is_empty() {
            return Err(InsertRecordError::EmptyTopic(EmptyRecordTopicError {
                aggregate_type: new_record.aggregate_type,
                aggregate_id: new_record.aggregate_id,
            }));
        }

        let record_id = new_record.id.unwrap_or_else(OutboxRecordID::new_random);

        sqlx::query(
            r#"
            INSERT INTO outbox (id, event_type, aggregate_type, aggregate_id, data, topic, created_at, status, attempts)
                VALUES ($1, $2, $3, $4, $5, $6, now(), $7, 0)
            "#,
        )
        .bind(record_id.into_inner())
        .bind(&new_record.event_type)
        .bind(&new_record.aggregate_type)
        .bind(&new_record.aggregate_id)
        .bind(&new_record.data)
        .bind(&new_record.topic)
        .bind(RecordStatus::Pending.as_str())
        .execute(&mut **tx)
        .await
        .int_err()?;

        Ok(record_id)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[async_trait::async_trait]
impl OutboxRecordRepository for PostgresOutboxRecordRepository {
    async fn fetch_next_ready(
        &self,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>, FetchNextReadyError> {
        // For every aggregate with pending records: its earliest record only.
        // A later record never surfaces while an earlier one is pending, so a
        // failing aggregate cannot be overtaken by its own successors.
        let rows: Vec<OutboxRecordRow> = sqlx::query_as(
            r#"
            WITH next_per_aggregate AS (
                SELECT DISTINCT ON (aggregate_type, aggregate_id)
                    id, event_type, aggregate_type, aggregate_id, data,
                    created_at, sent_at, status, attempts, topic
                FROM outbox
                WHERE status = $1
                ORDER BY aggregate_type, aggregate_id, created_at ASC, id ASC
            )
            SELECT id, event_type, aggregate_type, aggregate_id, data,
                   created_at, sent_at, status, attempts, topic
            FROM next_per_aggregate
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            "#,
        )
        .bind(RecordStatus::Pending.as_str())
        .bind(i64::try_from(limit).unwrap())
        .fetch_all(&self.pool)
        .await
        .int_err()?;

        rows.into_iter()
            .map(|row| row.try_into().map_err(FetchNextReadyError::Internal))
            .collect()
    }

    async fn mark_sent(&self, record_id: OutboxRecordID) -> Result<(), MarkSentError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox
                SET status = $1, sent_at = now()
                WHERE id = $2 AND status = $3
            "#,
        )
        .bind(RecordStatus::Sent.as_str())
        .bind(record_id.into_inner())
        .bind(RecordStatus::Pending.as_str())
        .execute(&self.pool)
        .await
        .int_err()?;

        if result.rows_affected() == 0 {
            return Err(MarkSentError::NotFound(RecordNotFoundError { record_id }));
        }

        Ok(())
    }

    async fn increment_attempt(
        &self,
        record_id: OutboxRecordID,
    ) -> Result<(), IncrementAttemptError> {
        sqlx::query(
            r#"
            UPDATE outbox
                SET attempts = attempts + 1
                WHERE id = $1
            "#,
        )
        .bind(record_id.into_inner())
        .execute(&self.pool)
        .await
        .int_err()?;

        Ok(())
    }

    async fn mark_dead(&self, record_id: OutboxRecordID) -> Result<(), MarkDeadError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox
                SET status = $1, sent_at = now()
                WHERE id = $2 AND status = $3
            "#,
        )
        .bind(RecordStatus::Dead.as_str())
        .bind(record_id.into_inner())
        .bind(RecordStatus::Pending.as_str())
        .execute(&self.pool)
        .await
        .int_err()?;

        if result.rows_affected() == 0 {
            return Err(MarkDeadError::NotFound(RecordNotFoundError { record_id }));
        }

        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(sqlx::FromRow)]
struct OutboxRecordRow {
    id: uuid::Uuid,
    event_type: String,
    aggregate_type: String,
    aggregate_id: String,
    data: Vec<u8>,
    created_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
    status: String,
    attempts: i32,
    topic: String,
}

impl TryFrom<OutboxRecordRow> for OutboxRecord {
    type Error = InternalError;

    fn try_from(row: OutboxRecordRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: OutboxRecordID::new(row.id),
            event_type: row.event_type,
            aggregate_type: row.aggregate_type,
            aggregate_id: row.aggregate_id,
            data: row.data,
            created_at: row.created_at,
            sent_at: row.sent_at,
            status: row.status.parse().map_err(ErrorIntoInternal::int_err)?,
            attempts: row.attempts,
            topic: row.topic,
        })
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
