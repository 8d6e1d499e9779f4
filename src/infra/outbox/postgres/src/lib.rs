// Copyright the herald project contributors. All rights reserved.
//
// Use of this software is governed by the MIT License
// included in the LICENSE file.

mod postgres_advisory_lock_elector;
mod repos;

pub use postgres_advisory_lock_elector::*;
pub use repos::*;
