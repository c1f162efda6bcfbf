//! xSushi ratio tracker entry point
//!
//! Wires the stores, the tick pipeline, the Telegram command loop, and the
//! query API together, then waits for Ctrl+C.

use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use xsushi_tracker::api::{self, ApiState};
use xsushi_tracker::config::{init_logging, AppConfig};
use xsushi_tracker::detector::ChangeDetector;
use xsushi_tracker::notify::{telegram, DispatchPolicy, Dispatcher, TelegramClient};
use xsushi_tracker::persistence::{RatioStore, SubscriberRegistry};
use xsushi_tracker::sampler::Sampler;
use xsushi_tracker::scheduler::{Scheduler, TickPipeline};
use xsushi_tracker::source::SushiBarSource;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_logging();
    info!(config = %config.digest(), "xSushi tracker starting");

    // Stores reload their state from the data directory
    let store = Arc::new(RatioStore::new(&config.storage.data_dir)?);
    let registry = Arc::new(SubscriberRegistry::load(&config.storage.data_dir)?);

    let source = Arc::new(SushiBarSource::new(
        &config.source.graphql_url,
        config.source.timeout_secs,
    )?);

    let telegram_client = match &config.telegram.bot_token {
        Some(token) => Some(Arc::new(TelegramClient::new(
            &config.telegram.api_url,
            token,
            config.telegram.poll_timeout_secs,
        )?)),
        None => {
            warn!("No bot token configured; running without notifications");
            None
        }
    };

    let dispatcher = telegram_client.as_ref().map(|client| {
        Dispatcher::new(
            client.clone(),
            registry.clone(),
            DispatchPolicy::new(config.notify.suppression_threshold_percent),
            config.notify.fanout_concurrency,
        )
    });

    let pipeline = TickPipeline::new(
        Sampler::new(source, store.clone()),
        ChangeDetector::new(store.clone()),
        dispatcher,
    );
    let scheduler = Arc::new(Scheduler::new(pipeline, config.scheduler.interval_secs));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let scheduler_task = {
        let scheduler = scheduler.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move { scheduler.run(shutdown_rx).await })
    };

    let command_task = telegram_client.map(|client| {
        let registry = registry.clone();
        let store = store.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            telegram::run_command_loop(client, registry, store, shutdown_rx).await
        })
    });

    let api_task = {
        let state = Arc::new(ApiState {
            store: store.clone(),
            registry: registry.clone(),
            balance_url: config.api.balance_url.clone(),
            client: reqwest::Client::new(),
        });
        let bind = config.api.bind.clone();
        let static_dir = config.api.static_dir.clone();
        let port = config.api.port;
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = api::start_server(state, &bind, port, &static_dir, shutdown_rx).await
            {
                error!(error = %e, "Query API stopped");
            }
        })
    };

    signal::ctrl_c().await?;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());

    scheduler_task.await?;
    api_task.await?;
    if let Some(task) = command_task {
        task.await?;
    }

    info!("Clean exit");
    Ok(())
}
