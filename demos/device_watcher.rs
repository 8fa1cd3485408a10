//! Lists devices on a running broker and prints notifications
//!
//! ```text
//! cargo run --example device_watcher -- 127.0.0.1:7422
//! ```

use device_broker::{BrokerClient, DeviceStatus, PropertyAddress};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:7422".to_string());

    let (client, mut notifications) = BrokerClient::connect(addr.as_str(), std::process::id()).await?;
    tracing::info!(client = %client.handle(), addr = %addr, "Connected");

    for state in client.get_device_states(true).await? {
        if state.status != DeviceStatus::Present {
            tracing::info!(guid = %state.guid, "Removed device");
            continue;
        }

        let properties = client
            .get_properties(state.guid, PropertyAddress::wildcard(), true)
            .await?;
        let controls = client.get_control_list(state.guid).await?;
        client.get_controls(state.guid, true).await?;

        tracing::info!(
            guid = %state.guid,
            properties = properties.len(),
            controls = controls.len(),
            "Device present"
        );
        for control in controls {
            tracing::info!(
                guid = %state.guid,
                id = control.id,
                name = %control.name,
                value = control.value,
                "  control"
            );
        }
    }

    loop {
        tokio::select! {
            notification = notifications.recv() => match notification {
                Some(notification) => tracing::info!(?notification, "Notification"),
                None => {
                    tracing::info!("Broker closed the connection");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                client.disconnect().await?;
                break;
            }
        }
    }

    Ok(())
}
