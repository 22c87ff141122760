//! Serve command: accept pairing and sync requests from other devices.

use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use sync_core::{Pin, DEFAULT_PIN_LENGTH};
use sync_engine::{
    DeviceIdentity, DiscoveryService, PairingCoordinator, PeerResponder, ServeSummary,
    SystemClock, TransportListener, UdpAnnouncer,
};
use tracing::{info, warn};

use crate::config::Workspace;
use crate::library::JsonLibrary;

/// Run the serve command until Ctrl-C.
///
/// The PIN comes from `--pin`, then `pairing.pin` in the config, and is
/// generated otherwise.
pub async fn run(workspace: &Workspace, pin: Option<String>, announce: bool) -> Result<()> {
    let identity = workspace.identity().await?;
    let trust = workspace.trust().await?;
    let library = Arc::new(JsonLibrary::open(&workspace.library_path()).await?);

    let pin = match pin.or_else(|| workspace.config.pairing.pin.clone()) {
        Some(pin) => Pin::parse(&pin).context("Invalid PIN")?,
        None => Pin::generate(DEFAULT_PIN_LENGTH),
    };
    let mut pairing = workspace.config.pairing.clone();
    pairing.pin = Some(pin.as_str().to_string());

    let coordinator = PairingCoordinator::new(identity.clone(), trust.clone(), pairing);
    let responder = PeerResponder::new(identity.clone(), trust, library)
        .with_pairing(Arc::new(coordinator));

    let address = format!("0.0.0.0:{}", workspace.config.discovery.sync_port);
    let listener = TransportListener::bind(&address)
        .await
        .with_context(|| format!("Failed to listen on {}", address))?;

    let discovery = if announce {
        Some(start_announcing(workspace, &identity).await?)
    } else {
        None
    };

    println!("Serving {} on {}", identity.info().device_name, address);
    println!();
    println!("  Device ID: {}", identity.device_id());
    println!("  PIN:       {}", pin.as_str());
    println!();
    println!("Press Ctrl-C to stop.");

    let served = serve_until(listener, Arc::new(responder), async move {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    if let Some(discovery) = discovery {
        discovery.stop_discovery().await;
    }
    println!();
    println!("Stopped after {} connection(s).", served);
    Ok(())
}

async fn start_announcing(
    workspace: &Workspace,
    identity: &DeviceIdentity,
) -> Result<DiscoveryService> {
    let announcer = UdpAnnouncer::bind(workspace.config.discovery.port)
        .await
        .context("Failed to open the discovery socket")?;
    let discovery = DiscoveryService::new(
        Arc::new(announcer),
        identity.info().clone(),
        workspace.config.discovery.clone(),
        Arc::new(SystemClock),
    );
    discovery.start_discovery().await;
    Ok(discovery)
}

/// Accept connections until `shutdown` resolves, serving each on its own
/// task. Returns how many connections were accepted.
pub async fn serve_until<F>(
    listener: TransportListener,
    responder: Arc<PeerResponder>,
    shutdown: F,
) -> Result<u32>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut served = 0;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => {
                let (conn, addr) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                served += 1;
                let responder = responder.clone();
                tokio::spawn(async move {
                    match responder.serve(&conn).await {
                        Ok(summary) => report(addr, &summary),
                        Err(e) => warn!(%addr, error = %e, "connection ended with an error"),
                    }
                });
            }
        }
    }

    Ok(served)
}

fn report(addr: SocketAddr, summary: &ServeSummary) {
    info!(
        %addr,
        paired = summary.paired,
        received = summary.items_received,
        sent = summary.items_sent,
        batches = summary.batches,
        "connection closed"
    );
    if summary.paired {
        println!("Paired with a device at {}", addr);
    }
    match (&summary.peer, &summary.refused) {
        (_, Some(reason)) => println!("Refused sync from {}: {}", addr, reason),
        (Some(peer), None) => println!(
            "Synced with {}: {} received, {} sent",
            peer, summary.items_received, summary.items_sent
        ),
        (None, None) => {}
    }
}
