//! Initialize device identity.

use anyhow::Result;
use std::net::{IpAddr, Ipv4Addr};
use sync_engine::DeviceIdentity;
use sync_types::DeviceType;

use crate::config::{StoredIdentity, Workspace};

/// Run the init command.
pub async fn run(workspace: &Workspace, name: &str) -> Result<()> {
    let path = workspace.identity_path();
    if path.exists() {
        anyhow::bail!(
            "Device already initialized. Delete {} to reinitialize.",
            path.display()
        );
    }

    let identity = DeviceIdentity::generate(
        name,
        DeviceType::Desktop,
        env!("CARGO_PKG_VERSION"),
        IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        workspace.config.discovery.sync_port,
    );
    workspace
        .save_identity(&StoredIdentity::from_identity(&identity, super::now_ms()))
        .await?;

    println!("Device initialized.");
    println!();
    println!("  Device ID:   {}", identity.device_id());
    println!("  Name:        {}", name);
    println!("  Certificate: {}", sync_engine::short_fingerprint(identity.fingerprint()));
    println!("  Data dir:    {}", workspace.data_dir.display());
    println!();
    println!("Next steps:");
    println!("  1. Accept peers:    shelf-sync serve --pin <PIN>");
    println!("  2. Or find a peer:  shelf-sync discover");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn init_writes_a_loadable_identity() {
        let dir = tempdir().unwrap();
        let workspace = Workspace::open(dir.path().to_path_buf(), None).unwrap();
        run(&workspace, "Study Laptop").await.unwrap();

        let identity = workspace.identity().await.unwrap();
        assert_eq!(identity.info().device_name, "Study Laptop");
        assert_eq!(identity.info().port, 8963);
    }

    #[tokio::test]
    async fn init_refuses_to_overwrite() {
        let dir = tempdir().unwrap();
        let workspace = Workspace::open(dir.path().to_path_buf(), None).unwrap();
        run(&workspace, "First").await.unwrap();
        let before = workspace.identity().await.unwrap();

        assert!(run(&workspace, "Second").await.is_err());
        let after = workspace.identity().await.unwrap();
        assert_eq!(before.device_id(), after.device_id());
    }
}
