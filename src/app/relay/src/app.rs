// Copyright the herald project contributors. All rights reserved.
//
// Use of this software is governed by the MIT License
// included in the LICENSE file.

use error_core::{InternalError, ResultIntoInternal};
use herald_outbox::{AdvisoryLockKey, RelayConfig};
use herald_outbox_nats::NatsRecordPublisher;
use herald_outbox_postgres::{PostgresAdvisoryLockElector, PostgresOutboxRecordRepository};
use herald_outbox_services::{OutboxRelayAgent, RelayRunError};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use crate::config::{LogFormat, RelayAppConfig};

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

pub fn init_logging(config: &RelayAppConfig) {
    use tracing_subscriber::EnvFilter;

    // RUST_LOG wins over the configured level for ad-hoc debugging
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));

    match config.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init(),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

pub async fn run(config: RelayAppConfig) -> Result<(), InternalError> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        nats_url = %config.nats_url,
        "Starting outbox relay"
    );

    let pg_pool = PgPoolOptions::new()
        .connect(&config.database_dsn)
        .await
        .int_err()?;

    let nats_client = async_nats::connect(config.nats_url.as_str()).await.int_err()?;

    let relay_config = RelayConfig::new(
        chrono::Duration::from_std(config.relay.poll_interval).int_err()?,
        config.relay.batch_size,
        config.relay.max_attempts,
    );

    let catalog = build_catalog(&config, relay_config, pg_pool, nats_client);

    // Schema bootstrap failures are startup-fatal, unlike anything that
    // happens inside the polling loop later
    let record_repo = catalog
        .get_one::<PostgresOutboxRecordRepository>()
        .int_err()?;
    record_repo.init_schema().await?;

    let relay_agent = catalog.get_one::<OutboxRelayAgent>().int_err()?;

    let cancellation_token = CancellationToken::new();
    tokio::spawn({
        let cancellation_token = cancellation_token.clone();
        async move {
            wait_for_shutdown_signal().await;
            tracing::info!("Shutdown signal received");
            cancellation_token.cancel();
        }
    });

    match relay_agent.run(cancellation_token).await {
        Ok(()) | Err(RelayRunError::Cancelled) => {
            tracing::info!("Outbox relay stopped");
            Ok(())
        }
        Err(RelayRunError::Internal(e)) => Err(e),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

fn build_catalog(
    config: &RelayAppConfig,
    relay_config: RelayConfig,
    pg_pool: PgPool,
    nats_client: async_nats::Client,
) -> dill::Catalog {
    let mut b = dill::CatalogBuilder::new();

    b.add_value(pg_pool);
    b.add_value(nats_client);
    b.add_value(AdvisoryLockKey::new(config.advisory_lock));
    b.add_value(relay_config);

    b.add::<PostgresOutboxRecordRepository>();
    b.add::<PostgresAdvisoryLockElector>();
    b.add::<NatsRecordPublisher>();
    b.add::<OutboxRelayAgent>();

    b.build()
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = ?e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = ?e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
