// Copyright the herald project contributors. All rights reserved.
//
// Use of this software is governed by the MIT License
// included in the LICENSE file.

mod outbox_record_repository_postgres;

pub use outbox_record_repository_postgres::*;
