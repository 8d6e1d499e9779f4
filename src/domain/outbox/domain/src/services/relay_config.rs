// Copyright the herald project contributors. All rights reserved.
//
// Use of this software is governed by the MIT License
// included in the LICENSE file.

use chrono::Duration;

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Timer period between polling ticks
    pub poll_interval: Duration,
    /// Maximum number of records fetched per tick
    pub batch_size: usize,
    /// Publish attempt ceiling before a record is dead-lettered
    pub max_attempts: i32,
}

impl RelayConfig {
    pub fn new(poll_interval: Duration, batch_size: usize, max_attempts: i32) -> Self {
        Self {
            poll_interval,
            batch_size,
            max_attempts,
        }
    }

    pub fn for_tests() -> Self {
        Self {
            poll_interval: Duration::milliseconds(10),
            batch_size: 100,
            max_attempts: 3,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::milliseconds(1000),
            batch_size: 100,
            max_attempts: 3,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
