//! Listen for announcements and remember the devices seen.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use sync_engine::{DiscoveryService, DiscoveryStatus, SystemClock, UdpAnnouncer};
use sync_types::DeviceInfo;

use crate::config::Workspace;

/// Run the discover command.
pub async fn run(workspace: &Workspace, seconds: u64) -> Result<()> {
    let identity = workspace.identity().await?;
    let announcer = UdpAnnouncer::bind(workspace.config.discovery.port)
        .await
        .context("Failed to open the discovery socket")?;
    let service = DiscoveryService::new(
        Arc::new(announcer),
        identity.info().clone(),
        workspace.config.discovery.clone(),
        Arc::new(SystemClock),
    );

    println!("Listening for devices for {}s...", seconds);
    let devices = collect(&service, Duration::from_secs(seconds)).await?;

    let mut peers = workspace.peers().await?;
    for device in &devices {
        peers.remember(device.clone());
    }
    workspace.save_peers(&peers).await?;

    if devices.is_empty() {
        println!("No devices found.");
        return Ok(());
    }
    println!();
    for device in &devices {
        println!(
            "  {}  {:<20} {:?}  {}",
            device.device_id,
            device.device_name,
            device.device_type,
            device.socket_addr()
        );
    }
    println!();
    println!("Pair with: shelf-sync pair <device-id> --pin <PIN>");
    Ok(())
}

/// Run discovery for `window` and return what was seen.
pub async fn collect(service: &DiscoveryService, window: Duration) -> Result<Vec<DeviceInfo>> {
    service.start_discovery().await;
    tokio::time::sleep(window).await;
    service.stop_discovery().await;

    if let DiscoveryStatus::Failed(error) = &*service.status().borrow() {
        anyhow::bail!("Discovery failed: {}", error);
    }
    let devices = service.devices().borrow().clone();
    Ok(devices)
}
