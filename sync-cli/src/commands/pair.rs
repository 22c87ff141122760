//! Pair with a discovered device.

use anyhow::Result;
use std::sync::Arc;
use sync_engine::{short_fingerprint, PairingCoordinator, TcpTransport};

use crate::config::Workspace;

/// Run the pair command.
///
/// `device` is a device id, or a unique prefix of one, from `peers.json`.
pub async fn run(workspace: &Workspace, device: &str, pin: &str) -> Result<()> {
    let identity = workspace.identity().await?;
    let peer = workspace.peer(device).await?;
    let trust = workspace.trust().await?;
    let coordinator = PairingCoordinator::new(identity, trust, workspace.config.pairing.clone());

    println!("Pairing with {} at {}...", peer.device_name, peer.socket_addr());
    let transport = TcpTransport::new();
    let paired = coordinator
        .initiate_pairing(&peer, pin, &transport)
        .await
        .map_err(super::explain)?;

    println!();
    println!("Paired.");
    println!("  Device:      {} ({})", paired.device.device_name, paired.device.device_id);
    println!("  Certificate: {}", short_fingerprint(&paired.certificate));
    println!();
    println!("Sync with: shelf-sync sync {}", paired.device.device_id);
    Ok(())
}
