use std::time::Duration;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::interval;
use log::{info, warn, error};
use tower_http::cors::CorsLayer;

use stock_sync::api::{create_api_router, ApiState};
use stock_sync::config::{Config, STATS_INTERVAL_SECS};
use stock_sync::data::{
    BroadcastHub, PriceGenerator, Scheduler, SchedulerConfig, WatchlistService, WatchlistStore,
};
use stock_sync::websocket::{self, WS_PATH};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(&config.log_level));

    config.log_config();

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        return Err(e.into());
    }

    // Shared state
    let store = Arc::new(WatchlistStore::new(PriceGenerator::new()));
    let hub = Arc::new(BroadcastHub::new(config.subscriber_buffer_size));
    let service = WatchlistService::new(store, hub);

    for symbol in &config.seed_symbols {
        if let Err(e) = service.add_stock(None, symbol) {
            warn!("Skipping seed symbol {}: {}", symbol, e);
        }
    }
    info!("📊 Watchlist seeded with {} stocks", service.store().len());

    let scheduler = Arc::new(Scheduler::new(
        service.clone(),
        SchedulerConfig::from_config(&config),
    ));
    scheduler.start()?;

    start_stats_task(service.clone());

    // Start API server
    let api_state = ApiState {
        service: service.clone(),
        scheduler: scheduler.clone(),
    };
    let api_router = create_api_router(api_state)
        .layer(CorsLayer::permissive());

    let api_listener = TcpListener::bind(&config.api_bind_address).await?;
    info!("🌐 HTTP API server running at http://{}/api", config.api_bind_address);
    let api_server = axum::serve(api_listener, api_router);

    // Start WebSocket server
    let ws_listener = TcpListener::bind(&config.bind_address).await?;
    info!("🚀 WebSocket server running at ws://{}{}", config.bind_address, WS_PATH);
    let websocket_server = websocket::serve(ws_listener, service.clone());

    info!("🎯 Starting WebSocket and HTTP API servers...");
    tokio::select! {
        result = api_server => {
            error!("API server stopped: {:?}", result);
        }
        _ = websocket_server => {
            error!("WebSocket server stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    if let Err(e) = scheduler.stop() {
        warn!("{}", e);
    }

    Ok(())
}

fn start_stats_task(service: WatchlistService) {
    tokio::spawn(async move {
        let mut interval_timer = interval(Duration::from_secs(STATS_INTERVAL_SECS));

        loop {
            interval_timer.tick().await;
            info!(
                "Stats - Stocks: {}, Clients: {}",
                service.store().len(),
                service.client_count()
            );
        }
    });

    info!("📈 Started stats monitoring task (every {} seconds)", STATS_INTERVAL_SECS);
}
