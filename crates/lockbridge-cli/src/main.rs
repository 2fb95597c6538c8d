//! Lock bridge simulator.
//!
//! Runs the reconciliation engine against a simulated lock account seeded
//! from `LOCKBRIDGE_SIMULATED_LOCKS`, logs every notification the hub would
//! receive, and stops cleanly on Ctrl-C.

mod config;

use std::sync::Arc;

use anyhow::Context;
use lockbridge_cloud::AnyCloudClient;
use lockbridge_cloud::mock::MockCloud;
use lockbridge_engine::{Bridge, HubBus, HubEvent};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "lockbridge=info,lockbridge_engine=info,lockbridge_cloud=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = AppConfig::from_env().context("Failed to load configuration")?;
    tracing::info!(
        bridge = %config.bridge.name,
        port = config.bridge.port,
        locks = config.simulated_locks.len(),
        "Loaded configuration"
    );

    // --- Cloud session ---
    let (cloud, account) = MockCloud::connect(&config.credentials)
        .await
        .context("Failed to open cloud session")?;
    for lock in &config.simulated_locks {
        account.add_lock(lock.id.clone(), lock.name.clone(), false).await;
    }
    tracing::info!(
        username = %config.credentials.username,
        "Simulated cloud session opened"
    );

    // --- Bridge ---
    let hub = HubBus::new();
    let events = tokio::spawn(log_hub_events(hub.subscribe()));

    let bridge = Bridge::start(
        Arc::new(AnyCloudClient::Mock(cloud)),
        config.bridge.clone(),
        hub,
    )
    .await
    .context("Failed to start bridge")?;
    for accessory in bridge.accessories().await {
        tracing::info!(
            device = %accessory.id,
            name = %accessory.info.name,
            model = %accessory.info.model,
            "Accessory published"
        );
    }

    bridge.start_poller().await;

    // --- Run until interrupted ---
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    bridge.shutdown().await;
    events.abort();
    Ok(())
}

async fn log_hub_events(mut rx: broadcast::Receiver<HubEvent>) {
    loop {
        match rx.recv().await {
            Ok(HubEvent::TargetStateChanged { device, state }) => {
                tracing::info!(device = %device, state = %state, "Target state");
            }
            Ok(HubEvent::CurrentStateChanged { device, state }) => {
                tracing::info!(device = %device, state = %state, "Current state");
            }
            Ok(HubEvent::BatteryChanged {
                device,
                level,
                low_battery,
            }) => {
                tracing::info!(device = %device, level = %level, low_battery, "Battery");
            }
            Ok(event) => tracing::debug!(?event, "Hub event"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Hub event log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
