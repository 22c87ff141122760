//! Inspect and revoke pinned devices.

use anyhow::{Context, Result};
use sync_engine::{short_fingerprint, TrustStore};
use sync_types::{DeviceId, TrustRecord};

use crate::config::Workspace;

/// List live trust records with the time of the last finished sync.
pub async fn list(workspace: &Workspace) -> Result<()> {
    let trust = workspace.trust().await?;
    let records = trust.list().await?;
    if records.is_empty() {
        println!("No paired devices.");
        return Ok(());
    }
    let peers = workspace.peers().await?;
    for record in &records {
        let name = peers
            .devices
            .get(record.device_id.as_str())
            .map(|d| d.device_name.as_str())
            .unwrap_or("?");
        let last_sync = trust.last_sync(&record.device_id).await?;
        println!("  {}", describe(record, name, last_sync));
    }
    Ok(())
}

/// Forget a paired device. The next sync with it is refused until the two
/// devices pair again.
pub async fn revoke(workspace: &Workspace, device: &str) -> Result<()> {
    // Revoking must work for devices never seen by discover.
    let device_id = match workspace.peers().await?.find(device) {
        Some(info) => info.device_id.clone(),
        None => DeviceId::new(device),
    };
    let removed = workspace
        .trust()
        .await?
        .revoke(&device_id)
        .await
        .context("Failed to revoke trust")?;
    if removed {
        println!("Revoked {}.", device_id);
    } else {
        println!("{} was not paired.", device_id);
    }
    Ok(())
}

fn describe(record: &TrustRecord, name: &str, last_sync: Option<u64>) -> String {
    let expiry = match record.expires_at {
        Some(at) => format!("expires {}", at),
        None => "no expiry".to_string(),
    };
    let synced = match last_sync {
        Some(at) => format!("last sync {}", at),
        None => "never synced".to_string(),
    };
    format!(
        "{}  {:<20} {}  {}  {}",
        record.device_id,
        name,
        short_fingerprint(&record.certificate_fingerprint),
        expiry,
        synced
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_types::Fingerprint;
    use tempfile::tempdir;

    #[tokio::test]
    async fn revoke_removes_the_record() {
        let dir = tempdir().unwrap();
        let workspace = Workspace::open(dir.path().to_path_buf(), None).unwrap();
        let id = DeviceId::new("tablet-1");
        let trust = workspace.trust().await.unwrap();
        trust
            .record_trust(&id, &Fingerprint::from_certificate(&[7u8; 32]), None, None)
            .await
            .unwrap();
        drop(trust);

        revoke(&workspace, "tablet-1").await.unwrap();
        let trust = workspace.trust().await.unwrap();
        assert!(!trust.is_trusted(&id).await.unwrap());
        assert!(trust.list().await.unwrap().is_empty());
    }

    #[test]
    fn description_shows_expiry() {
        let record = TrustRecord {
            device_id: DeviceId::new("tablet-1"),
            certificate_fingerprint: Fingerprint::from_certificate(&[7u8; 32]),
            established_at: 0,
            expires_at: Some(5000),
            secret: None,
        };
        let line = describe(&record, "Tablet", None);
        assert!(line.starts_with("tablet-1"));
        assert!(line.contains("Tablet"));
        assert!(line.contains("expires 5000"));
        assert!(line.contains("never synced"));

        let line = describe(&record, "Tablet", Some(1_700_000_000_000));
        assert!(line.contains("last sync 1700000000000"));
    }

    #[tokio::test]
    async fn sync_time_survives_reopening_the_workspace() {
        let dir = tempdir().unwrap();
        let workspace = Workspace::open(dir.path().to_path_buf(), None).unwrap();
        let id = DeviceId::new("tablet-1");
        {
            let trust = workspace.trust().await.unwrap();
            trust
                .record_trust(&id, &Fingerprint::from_certificate(&[7u8; 32]), None, None)
                .await
                .unwrap();
            trust.record_sync(&id, 42).await.unwrap();
        }

        let reopened = Workspace::open(dir.path().to_path_buf(), None).unwrap();
        let trust = reopened.trust().await.unwrap();
        assert_eq!(trust.last_sync(&id).await.unwrap(), Some(42));
        list(&reopened).await.unwrap();
    }
}
