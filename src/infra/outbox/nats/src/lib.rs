// Copyright the herald project contributors. All rights reserved.
//
// Use of this software is governed by the MIT License
// included in the LICENSE file.

mod nats_record_publisher;

pub use nats_record_publisher::*;
