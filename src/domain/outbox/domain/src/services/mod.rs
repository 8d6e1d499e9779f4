// Copyright the herald project contributors. All rights reserved.
//
// Use of this software is governed by the MIT License
// included in the LICENSE file.

mod leader_elector;
mod record_publisher;
mod relay_config;
mod system_time_source;

pub use leader_elector::*;
pub use record_publisher::*;
pub use relay_config::*;
pub use system_time_source::*;
