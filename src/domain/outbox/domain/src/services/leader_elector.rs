// Copyright the herald project contributors. All rights reserved.
//
// Use of this software is governed by the MIT License
// included in the LICENSE file.

use error_core::InternalError;
use thiserror::Error;

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Decides whether this replica is currently allowed to drain the outbox.
///
/// At most one replica cluster-wide answers `true` per lock identity, for as
/// long as its underlying session stays alive. The answer is re-evaluated on
/// every call; leadership is never cached by the relay.
#[async_trait::async_trait]
pub trait LeaderElector: Send + Sync {
    async fn is_leader(&self) -> Result<bool, LeaderCheckError>;
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Identity of the advisory lock the election runs on. Replicas configured
/// with different keys elect independent leaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvisoryLockKey(i64);

impl AdvisoryLockKey {
    pub fn new(key: i64) -> Self {
        Self(key)
    }

    pub fn into_inner(self) -> i64 {
        self.0
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
// Errors
////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Error, Debug)]
pub enum LeaderCheckError {
    #[error(transparent)]
    Internal(#[from] InternalError),
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
