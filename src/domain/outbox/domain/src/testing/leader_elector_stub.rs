// Copyright the herald project contributors. All rights reserved.
//
// Use of this software is governed by the MIT License
// included in the LICENSE file.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dill::{component, interface, scope, Singleton};
use error_core::InternalError;

use crate::{LeaderCheckError, LeaderElector};

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Elector double with an externally switchable answer, plus a one-shot
/// failure trigger for exercising the skip-tick policy
pub struct LeaderElectorStub {
    is_leader: Arc<AtomicBool>,
    fail_next_check: Arc<AtomicBool>,
}

#[component(pub)]
#[scope(Singleton)]
#[interface(dyn LeaderElector)]
impl LeaderElectorStub {
    pub fn new() -> Self {
        Self::new_leader(true)
    }

    pub fn new_leader(is_leader: bool) -> Self {
        Self {
            is_leader: Arc::new(AtomicBool::new(is_leader)),
            fail_next_check: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_leader(&self, is_leader: bool) {
        self.is_leader.store(is_leader, Ordering::SeqCst);
    }

    pub fn fail_next_check(&self) {
        self.fail_next_check.store(true, Ordering::SeqCst);
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[async_trait::async_trait]
impl LeaderElector for LeaderElectorStub {
    async fn is_leader(&self) -> Result<bool, LeaderCheckError> {
        if self.fail_next_check.swap(false, Ordering::SeqCst) {
            return Err(LeaderCheckError::Internal(InternalError::new(
                "stubbed leadership check failure",
            )));
        }

        Ok(self.is_leader.load(Ordering::SeqCst))
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
