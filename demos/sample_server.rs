//! Runs a broker with a few in-memory devices
//!
//! ```text
//! RUST_LOG=device_broker=debug cargo run --example sample_server
//! ```
//!
//! A device with GUID 99 is hot-plugged after five seconds and removed after
//! thirty.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use device_broker::device::sample::SELECTOR_MANUFACTURER;
use device_broker::{Broker, BrokerConfig, BrokerServer, Guid, PropertyAddress, SampleDevice, Scope, ServerConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("device_broker=info")),
        )
        .init();

    let broker = Arc::new(Broker::with_config(
        BrokerConfig::default()
            .max_sessions(32)
            .backend_timeout(Duration::from_secs(2)),
    ));

    broker
        .add_device(Arc::new(
            SampleDevice::new(Guid(42), "Studio Camera")
                .with_stream(Scope::Input, 0)
                .with_control(1, "Gain", 16, 0, 64)
                .with_control(2, "Exposure", 100, 1, 1000),
        ))
        .await?;
    broker
        .add_device(Arc::new(
            SampleDevice::new(Guid(43), "Tape Deck")
                .with_stream(Scope::Output, 0)
                .with_property(
                    PropertyAddress::global(SELECTOR_MANUFACTURER),
                    Bytes::from_static(b"Example Corp"),
                ),
        ))
        .await?;

    let hotplug = {
        let broker = Arc::clone(&broker);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            let device = SampleDevice::new(Guid(99), "Hot-plugged Camera").with_stream(Scope::Input, 0);
            if let Err(e) = broker.add_device(Arc::new(device)).await {
                tracing::warn!(error = %e, "Hot-plug failed");
                return;
            }

            tokio::time::sleep(Duration::from_secs(25)).await;
            if let Err(e) = broker.remove_device(Guid(99)).await {
                tracing::warn!(error = %e, "Unplug failed");
            }
        })
    };

    let server = BrokerServer::new(ServerConfig::default(), Arc::clone(&broker));
    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    hotplug.abort();
    let stats = broker.stats().await;
    tracing::info!(
        published = stats.notifications_published,
        dropped = stats.notifications_dropped,
        uptime_secs = stats.uptime.as_secs(),
        "Final stats"
    );
    Ok(())
}
