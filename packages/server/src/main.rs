mod config;
mod error;
mod handlers;
mod models;
mod monitor;
mod ratelimit;
mod routes;
mod state;
mod stuck;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::CorsLayer;
use tracing::{Level, info};

use jobs::{
    Cache, CancellationService, Dispatcher, DlqHandler, EventPublisher, JobStore, ProgressService,
};
use mq::publisher::Publisher;

use crate::config::AppConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let app_config = AppConfig::load().context("Failed to load configuration")?;

    let db = jobs::database::init_db(&app_config.database)
        .await
        .context("Failed to initialize database")?;

    let cache = Arc::new(if app_config.cache.enabled {
        Cache::new(&app_config.cache.url)
    } else {
        Cache::disabled()
    });

    let connection = mq::connect(&app_config.broker.url, app_config.broker.connect_attempts)
        .await
        .context("Failed to connect to broker")?;
    let topology_channel = connection
        .create_channel()
        .await
        .context("Failed to open channel")?;
    mq::declare_topology(&topology_channel)
        .await
        .context("Failed to declare broker topology")?;
    let connection = Arc::new(connection);

    let publisher = Arc::new(
        Publisher::connect(app_config.broker.url.clone())
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

    tokio::spawn(stuck::run_stuck_job_detector(
        db.clone(),
        progress.clone(),
        app_config.stuck.clone(),
    ));
    tokio::spawn(monitor::run_queue_monitor(
        connection.clone(),
        db.clone(),
        app_config.monitor.interval_secs,
    ));

    let state = AppState {
        db,
        store,
        dispatcher,
        cancel,
        progress,
        dlq,
        config: app_config.clone(),
    };

    let mut allow_origins = Vec::new();
    for origin in &app_config.server.cors.allow_origins {
        allow_origins.push(
            origin
                .parse::<HeaderValue>()
                .with_context(|| format!("Invalid CORS origin: {}", origin))?,
        );
    }

    let app = Router::new()
        .nest("/api", routes::api_routes())
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(allow_origins)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([HeaderName::from_static("content-type")])
                .max_age(Duration::from_secs(app_config.server.cors.max_age)),
        );

    let addr_str = format!(
        "{}:{}",
        app_config.server.host, app_config.server.port
    );
    let addr: SocketAddr = addr_str
        .parse()
        .with_context(|| format!("Invalid server address: {}", addr_str))?;

    info!("Server running at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    axum::serve(listener, app)
        .await
        .context("Server runtime error")?;

    Ok(())
}
