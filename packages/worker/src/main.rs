use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};

use common::WorkloadClass;
use jobs::{
    Cache, CancellationService, Dispatcher, DlqHandler, EventPublisher, JobStore, ProgressService,
};
use mq::publisher::Publisher;
use worker::handlers::{EchoHandler, HandlerRegistry};
use worker::harness::{self, WorkerServices};
use worker::WorkerAppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let config = WorkerAppConfig::load().context("Failed to load config")?;
    info!("Worker starting: {}", config.worker.id);

    let db = jobs::database::init_db(&config.database)
        .await
        .context("Failed to initialize database")?;

    let cache = Arc::new(if config.cache.enabled {
        Cache::new(&config.cache.url)
    } else {
        Cache::disabled()
    });

    let connection = mq::connect(&config.broker.url, config.broker.connect_attempts)
        .await
        .context("Failed to connect to broker")?;
    let topology_channel = connection
        .create_channel()
        .await
        .context("Failed to open channel")?;
    mq::declare_topology(&topology_channel)
        .await
        .context("Failed to declare topology")?;

    let publisher = Arc::new(
        Publisher::connect(config.broker.url.clone())
            .await
            .context("Failed to open publisher")?,
    );

    let store = Arc::new(JobStore::new(db.clone()));
    let events = Arc::new(EventPublisher::new(publisher.clone(), cache.clone()));
    let progress = Arc::new(ProgressService::new(store.clone(), cache.clone(), events));
    let cancel = Arc::new(CancellationService::new(
        store.clone(),
        cache.clone(),
        progress.clone(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        progress.clone(),
        publisher.clone(),
    ));
    let dlq = Arc::new(DlqHandler::new(
        progress.clone(),
        cancel.clone(),
        publisher.clone(),
        db.clone(),
    ));

    let mut registry = HandlerRegistry::new();
    for class in WorkloadClass::ALL {
        registry.register(*class, Arc::new(EchoHandler));
    }

    let services = Arc::new(WorkerServices {
        progress,
        cancel,
        dispatcher,
        dlq,
        handlers: Arc::new(registry),
        worker_id: config.worker.id.clone(),
    });

    let mut consumers = Vec::new();
    for name in &config.worker.queues {
        let class: WorkloadClass = name.parse().map_err(anyhow::Error::new)?;
        let channel = connection
            .create_channel()
            .await
            .context("Failed to open consumer channel")?;
        let services = services.clone();
        let prefetch = config.broker.prefetch;
        consumers.push(tokio::spawn(async move {
            if let Err(e) = harness::run_consumer(services, channel, class, prefetch).await {
                error!(%class, error = %e, "Consumer stopped unexpectedly");
            }
        }));
    }

    info!(queues = ?config.worker.queues, "Worker consuming");

    for consumer in consumers {
        let _ = consumer.await;
    }

    Ok(())
}
