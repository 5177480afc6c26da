use anyhow::Result;
use commerce::{
    AckPolicy, DispatcherSettings, EventDispatcher, FulfillmentWorker, OrderPipeline,
    ProductCoordinator,
};
use common::config::AppConfig;
use common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};
use futures_util::stream::StreamExt;
use messaging::KafkaQueueConsumer;
use signal_hook::consts::signal::*;
use signal_hook_tokio::Signals;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

mod error;
mod handlers;
mod routes;
mod state;

use state::{AppState, Backends};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    let config = AppConfig::from_env();

    let telemetry_config = TelemetryConfig::from_env("commerce-service", &config.log_level);
    init_telemetry(&telemetry_config).map_err(|e| anyhow::anyhow!(e))?;

    info!("Starting commerce service");

    let backends = Backends::connect(&config).await?;
    let shutdown = CancellationToken::new();

    let (dispatcher, dispatcher_task) = EventDispatcher::spawn(
        backends.broker.clone(),
        DispatcherSettings::from_config(&config.dispatcher, &config.broker),
        shutdown.clone(),
    );

    let worker_task = if config.worker.enabled {
        let consumer = KafkaQueueConsumer::new(
            &config.broker.brokers,
            &config.broker.consumer_group,
            &config.broker.order_queue,
        )?;
        let worker = FulfillmentWorker::new(
            backends.order_repository.clone(),
            Arc::new(consumer),
            backends.broker.clone(),
            AckPolicy::from_config(&config.worker, &config.broker),
            Duration::from_millis(config.worker.retry_delay_ms),
        );
        let token = shutdown.clone();
        Some(tokio::spawn(async move { worker.run(token).await }))
    } else {
        info!("Fulfillment worker disabled");
        None
    };

    let state = AppState::new(
        ProductCoordinator::new(
            backends.product_repository.clone(),
            backends.cache.clone(),
            backends.search.clone(),
            config.cache.ttl(),
        ),
        OrderPipeline::new(backends.order_repository.clone(), dispatcher),
    );

    // Setup signal handling
    let signals = Signals::new(&[SIGTERM, SIGINT])?;
    let handle = signals.handle();
    let signal_token = shutdown.clone();
    let signal_task = tokio::spawn(async move {
        let mut signals = signals;
        if let Some(signal) = signals.next().await {
            info!("Received signal {}, shutting down", signal);
            signal_token.cancel();
        }
    });

    // Build router with tracing layer
    let app = routes::build_router(state).layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Commerce service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server_token = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_token.cancelled().await })
        .await;

    // Stop the background tasks even if the server exited with an error
    shutdown.cancel();
    if let Err(e) = &served {
        error!("Server error: {}", e);
    }

    if let Some(worker_task) = worker_task {
        if let Err(e) = worker_task.await {
            error!("Worker task failed: {}", e);
        }
    }
    if let Err(e) = dispatcher_task.await {
        error!("Dispatcher task failed: {}", e);
    }

    handle.close();
    signal_task.abort();
    backends.pool.close().await;

    info!("Commerce service stopped");
    shutdown_telemetry();

    served?;
    Ok(())
}
