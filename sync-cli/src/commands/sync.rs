//! Sync the local library with a paired device.

use anyhow::Result;
use std::sync::Arc;
use sync_engine::{SyncEngine, TcpTransport};
use sync_types::{SyncSession, SyncStatus};

use crate::config::Workspace;
use crate::library::JsonLibrary;

/// Run the sync command.
pub async fn run(workspace: &Workspace, device: &str) -> Result<()> {
    let identity = workspace.identity().await?;
    let peer = workspace.peer(device).await?;
    let trust = workspace.trust().await?;
    let library = Arc::new(JsonLibrary::open(&workspace.library_path()).await?);

    let engine = SyncEngine::new(identity, workspace.config.transfer.clone(), trust, library);

    let mut progress = engine.observe_progress(&peer.device_id);
    let printer = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let snapshot = progress.borrow_and_update().clone();
            if let Some(item) = &snapshot.current_item {
                println!(
                    "  [{:>3}%] {}/{} {}",
                    snapshot.progress_percentage,
                    snapshot.completed_items,
                    snapshot.total_items,
                    item
                );
            }
            if snapshot.status.is_terminal() {
                break;
            }
        }
    });

    println!("Syncing with {} at {}...", peer.device_name, peer.socket_addr());
    let result = engine
        .sync_with_device(&peer, &TcpTransport::new())
        .await;
    printer.abort();

    let session = result.map_err(super::explain)?;
    print_summary(&session);
    Ok(())
}

fn print_summary(session: &SyncSession) {
    println!();
    match session.status {
        SyncStatus::Completed => println!("Sync complete."),
        SyncStatus::CompletedWithErrors => println!("Sync finished with errors."),
        other => println!("Sync ended: {:?}", other),
    }
    println!("  Sent:      {}", session.items_to_send.len());
    println!("  Received:  {}", session.items_to_receive.len());
    println!("  Completed: {}/{}", session.completed_items, session.total_items);
    if session.failed_items > 0 {
        println!("  Failed:    {}", session.failed_items);
    }
    if session.retry_count > 0 {
        println!("  Retries:   {}", session.retry_count);
    }
    if let Some(from) = session.resumed_from_item {
        println!("  Resumed from item {}", from);
    }
    println!("  Encrypted: {}", if session.was_encrypted { "yes" } else { "no" });
    for conflict in &session.conflicts {
        println!(
            "  Conflict:  {} (local {}, remote {})",
            conflict.item_id,
            conflict.local_version.last_modified,
            conflict.remote_version.last_modified
        );
    }
    if let Some(error) = &session.error {
        println!("  Error:     {}", error.message);
    }
}
