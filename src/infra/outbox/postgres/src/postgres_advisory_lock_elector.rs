// Copyright the herald project contributors. All rights reserved.
//
// Use of this software is governed by the MIT License
// included in the LICENSE file.

use dill::{component, interface};
use error_core::{ErrorIntoInternal, ResultIntoInternal};
use herald_outbox::{AdvisoryLockKey, LeaderCheckError, LeaderElector};
use sqlx::postgres::PgConnection;
use sqlx::PgPool;
use tokio::sync::Mutex;

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Leader election on a session-scoped Postgres advisory lock.
///
/// The elector keeps one dedicated connection detached from the pool: an
/// advisory lock belongs to the session that took it, and a pooled connection
/// handed back on drop would silently release leadership. When the database
/// becomes unreachable the connection is discarded, so the server ends the
/// session and frees the lock for another replica — a dead leader cannot
/// retain leadership.
pub struct PostgresAdvisoryLockElector {
    pool: PgPool,
    lock_key: AdvisoryLockKey,
    session: Mutex<Option<PgConnection>>,
}

#[component(pub)]
#[interface(dyn LeaderElector)]
impl PostgresAdvisoryLockElector {
    pub fn new(pool: PgPool, lock_key: AdvisoryLockKey) -> Self {
        Self {
            pool,
            lock_key,
            session: Mutex::new(None),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[async_trait::async_trait]
impl LeaderElector for PostgresAdvisoryLockElector {
    #[tracing::instrument(level = "debug", skip_all)]
    async fn is_leader(&self) -> Result<bool, LeaderCheckError> {
        let mut guard = self.session.lock().await;

        let mut connection = match guard.take() {
            Some(connection) => connection,
            None => self.pool.acquire().await.int_err()?.detach(),
        };

        // Re-acquiring within the same session succeeds trivially, so a
        // standing leader keeps answering true
        let acquired = sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1)")
            .bind(self.lock_key.into_inner())
            .fetch_one(&mut connection)
            .await;

        match acquired {
            Ok(acquired) => {
                *guard = Some(connection);

                if acquired {
                    tracing::debug!(lock_key = self.lock_key.into_inner(), "Holding leadership");
                } else {
                    tracing::debug!(
                        lock_key = self.lock_key.into_inner(),
                        "Leadership held by another replica"
                    );
                }

                Ok(acquired)
            }
            Err(e) => {
                // The dropped connection takes the session, and with it any
                // previously held lock
                tracing::error!(error = ?e, "Advisory lock check failed, discarding session");
                Err(e.int_err().into())
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
