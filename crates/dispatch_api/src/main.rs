use std::sync::Arc;

use anyhow::Context;
use dispatch_core::config::DispatchConfig;
use dispatch_core::dispatch::DispatchEngine;
use dispatch_core::events::EventBus;
use dispatch_core::geo::RegionTable;
use dispatch_core::proximity::ProximityIndex;
use dispatch_core::surge::SurgeEngine;
use tracing::info;

use dispatch_api::{build_router, sweeper, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    let config = DispatchConfig::from_env();
    let bus = Arc::new(EventBus::default());
    let proximity = Arc::new(ProximityIndex::new(
        RegionTable::default(),
        config.presence_ttl,
        Arc::clone(&bus),
    ));
    let surge = Arc::new(SurgeEngine::new(
        config.clone(),
        Arc::clone(&proximity),
        Arc::clone(&bus),
    ));
    let engine = Arc::new(DispatchEngine::new(
        config,
        Arc::clone(&proximity),
        Arc::clone(&surge),
        Arc::clone(&bus),
    ));

    // Keep a receiver on the bus so publishes are observable in the logs.
    let mut events = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    tracing::debug!(
                        event_type = %event.event_type,
                        key = %event.key,
                        "event published"
                    );
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event log receiver lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    tokio::spawn(sweeper::run_offer_timeout_sweeper(Arc::clone(&engine)));

    let bind = std::env::var("DISPATCH_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    info!(%bind, "dispatch api listening");

    let app = build_router(AppState::new(engine));
    axum::serve(listener, app).await.context("serve")?;
    Ok(())
}
