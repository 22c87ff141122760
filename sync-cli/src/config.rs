//! Files kept in the data directory.
//!
//! - `identity.json`: this device's id, name and certificate seed (0600)
//! - `peers.json`: devices seen by `discover`, keyed by device id
//! - `library.json`: the local library (see [`crate::library`])
//! - `trust.db`: pinned certificates (unless `storage.trust_database` says
//!   otherwise)
//! - `config.toml`: optional [`EngineConfig`] overrides

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sync_engine::{DeviceIdentity, EngineConfig, SqliteTrustStore};
use sync_types::{DeviceId, DeviceInfo, DeviceType};

const IDENTITY_FILE: &str = "identity.json";
const PEERS_FILE: &str = "peers.json";
const LIBRARY_FILE: &str = "library.json";
const CONFIG_FILE: &str = "config.toml";
const TRUST_FILE: &str = "trust.db";

/// This device as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredIdentity {
    /// Device id.
    pub device_id: String,
    /// Human-readable device name.
    pub device_name: String,
    /// Base64 certificate seed.
    pub certificate_seed: String,
    /// When the device was initialized (epoch ms).
    pub created_at: u64,
}

impl StoredIdentity {
    /// Capture a freshly generated identity.
    pub fn from_identity(identity: &DeviceIdentity, created_at: u64) -> Self {
        Self {
            device_id: identity.device_id().to_string(),
            device_name: identity.info().device_name.clone(),
            certificate_seed: STANDARD.encode(identity.certificate_seed()),
            created_at,
        }
    }

    /// Rebuild the identity, reachable on `port`.
    pub fn to_identity(&self, port: u16) -> Result<DeviceIdentity> {
        let seed = STANDARD
            .decode(&self.certificate_seed)
            .context("certificate seed is not valid base64")?;
        let seed: [u8; 32] = seed
            .try_into()
            .map_err(|_| anyhow::anyhow!("certificate seed must be 32 bytes"))?;
        let info = DeviceInfo {
            device_id: DeviceId::new(self.device_id.clone()),
            device_name: self.device_name.clone(),
            device_type: DeviceType::Desktop,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            ip_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port,
            last_seen: 0,
        };
        Ok(DeviceIdentity::from_parts(info, seed))
    }
}

/// A data directory plus the engine configuration that applies to it.
#[derive(Debug, Clone)]
pub struct Workspace {
    /// Data directory.
    pub data_dir: PathBuf,
    /// Engine configuration.
    pub config: EngineConfig,
}

impl Workspace {
    /// Open `data_dir`, reading `config_path` (or `config.toml` in the data
    /// directory, when present).
    pub fn open(data_dir: PathBuf, config_path: Option<&Path>) -> Result<Self> {
        let default_path = data_dir.join(CONFIG_FILE);
        let config = match config_path {
            Some(path) => EngineConfig::from_file(path)?,
            None if default_path.exists() => EngineConfig::from_file(&default_path)?,
            None => EngineConfig::default(),
        };
        Ok(Self { data_dir, config })
    }

    /// Path of the identity file.
    pub fn identity_path(&self) -> PathBuf {
        self.data_dir.join(IDENTITY_FILE)
    }

    /// Path of the library file.
    pub fn library_path(&self) -> PathBuf {
        self.data_dir.join(LIBRARY_FILE)
    }

    /// Load this device's identity.
    pub async fn identity(&self) -> Result<DeviceIdentity> {
        let contents = tokio::fs::read_to_string(self.identity_path())
            .await
            .context("Device not initialized. Run 'shelf-sync init' first.")?;
        let stored: StoredIdentity =
            serde_json::from_str(&contents).context("Invalid identity file")?;
        stored.to_identity(self.config.discovery.sync_port)
    }

    /// Persist a new identity (owner-only permissions).
    pub async fn save_identity(&self, identity: &StoredIdentity) -> Result<()> {
        write_private(&self.identity_path(), &serde_json::to_string_pretty(identity)?).await
    }

    /// Open the trust database.
    pub async fn trust(&self) -> Result<Arc<SqliteTrustStore>> {
        let path = self
            .config
            .storage
            .trust_database
            .clone()
            .unwrap_or_else(|| self.data_dir.join(TRUST_FILE));
        let store = SqliteTrustStore::new(&path)
            .await
            .with_context(|| format!("Failed to open trust database {}", path.display()))?;
        Ok(Arc::new(store))
    }

    /// Devices remembered from discovery.
    pub async fn peers(&self) -> Result<PeerBook> {
        let path = self.data_dir.join(PEERS_FILE);
        if !path.exists() {
            return Ok(PeerBook::default());
        }
        let contents = tokio::fs::read_to_string(&path).await?;
        serde_json::from_str(&contents).context("Invalid peers file")
    }

    /// Remember `peers`.
    pub async fn save_peers(&self, peers: &PeerBook) -> Result<()> {
        let path = self.data_dir.join(PEERS_FILE);
        tokio::fs::write(&path, serde_json::to_string_pretty(peers)?)
            .await
            .context("Failed to save peers")
    }

    /// Resolve a device id (or unique prefix) from the peer book.
    pub async fn peer(&self, id_or_prefix: &str) -> Result<DeviceInfo> {
        self.peers()
            .await?
            .find(id_or_prefix)
            .cloned()
            .with_context(|| {
                format!(
                    "Unknown device '{}'. Run 'shelf-sync discover' first.",
                    id_or_prefix
                )
            })
    }
}

/// Devices seen on the LAN.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerBook {
    /// Latest announcement per device id.
    pub devices: BTreeMap<String, DeviceInfo>,
}

impl PeerBook {
    /// Add or refresh a device.
    pub fn remember(&mut self, device: DeviceInfo) {
        self.devices.insert(device.device_id.to_string(), device);
    }

    /// Exact id match first, then a unique prefix.
    pub fn find(&self, id_or_prefix: &str) -> Option<&DeviceInfo> {
        if let Some(device) = self.devices.get(id_or_prefix) {
            return Some(device);
        }
        let mut matches = self
            .devices
            .iter()
            .filter(|(id, _)| id.starts_with(id_or_prefix))
            .map(|(_, device)| device);
        match (matches.next(), matches.next()) {
            (Some(device), None) => Some(device),
            _ => None,
        }
    }
}

/// Write a file readable only by its owner on Unix.
pub async fn write_private(path: &Path, contents: &str) -> Result<()> {
    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .context("Failed to set file permissions")?;
    }
    Ok(())
}
