// Copyright the herald project contributors. All rights reserved.
//
// Use of this software is governed by the MIT License
// included in the LICENSE file.

mod app;
mod config;

use config::RelayAppConfig;

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[tokio::main]
async fn main() {
    // Logging is not up yet, so config problems go to stderr directly
    let config = match RelayAppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    app::init_logging(&config);

    if let Err(e) = app::run(config).await {
        tracing::error!(error = ?e, error_msg = %e.reason(), "Outbox relay terminated with error");
        std::process::exit(1);
    }
}
