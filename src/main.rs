use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use calendar_server::config::Config;
use calendar_server::context::AppContext;
use calendar_server::cron::{self, PurgeSchedule};
use calendar_server::db;
use calendar_server::kafka::{EventProducer, ObservationConsumer};
use calendar_server::relay::Relay;
use calendar_server::repo::TransactionalWriter;
use calendar_server::routes;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.rust_log.clone()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting calendar service");

    let pool = db::create_pool(&config).await?;
    tracing::info!("connected to database");

    db::run_migrations(&pool).await?;
    tracing::info!("database migrations applied");

    let producer = Arc::new(EventProducer::new(&config.kafka)?);
    let consumer = ObservationConsumer::new(&config.kafka)?;
    let writer = TransactionalWriter::new(pool.clone());

    let cancel = CancellationToken::new();

    // Cron runs on its own token so shutdown can stop it before the rest.
    let cron_cancel = CancellationToken::new();
    let schedule = PurgeSchedule::from_config(&config.cron)?;
    let cron_handle = tokio::spawn(cron::run_purge_job(
        pool.clone(),
        config.cron.clone(),
        schedule,
        cron_cancel.clone(),
    ));

    let relay = Arc::new(Relay::new(
        Arc::new(writer.clone()),
        Arc::clone(&producer),
        config.relay.clone(),
    ));
    let relay_handle = tokio::spawn(relay.run(cancel.clone()));

    let consumer_handle = tokio::spawn(consumer.run(cancel.clone()));

    let app_context = Arc::new(AppContext {
        config: Arc::new(config.clone()),
        pool: pool.clone(),
        writer,
        producer: Arc::clone(&producer),
    });
    let app = routes::create_router(app_context);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(port = config.port, "http server listening");

    let http_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { http_cancel.cancelled().await })
            .await
    });

    shutdown_signal().await;
    tracing::info!("shutdown signal received");

    // Deterministic order: cron, then root cancellation (relay, workers,
    // consumer, HTTP), then flush the producer and close the pool.
    cron_cancel.cancel();
    let _ = cron_handle.await;

    cancel.cancel();
    let _ = relay_handle.await;
    let _ = consumer_handle.await;
    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::error!(error = %err, "http server error"),
        Err(err) => tracing::error!(error = %err, "http server task failed"),
    }

    if let Err(err) = producer.flush(Duration::from_secs(5)) {
        tracing::warn!(error = %err, "kafka producer flush failed");
    }

    pool.close().await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("got SIGINT"),
                    _ = sigterm.recv() => tracing::info!("got SIGTERM"),
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
