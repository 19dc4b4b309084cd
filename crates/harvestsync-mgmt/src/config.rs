use harvestsync_sync::{
    AuditTrail, CatalogRepository, FileAuditStore, SyncContext, SyncSettings, XmlMetadataRenderer,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Config file used when neither `--config` nor `HARVESTSYNC_CONFIG` is set.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/harvestsync/harvestsync.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MgmtConfig {
    pub bind_addr: SocketAddr,
    pub audit_log: PathBuf,
    pub catalog_path: PathBuf,
    pub content_dir: Option<PathBuf>,
    pub sync: SyncSettings,
}

impl Default for MgmtConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            audit_log: PathBuf::from("/var/lib/harvestsync/audit.log"),
            catalog_path: PathBuf::from("/var/lib/harvestsync/catalog.json"),
            content_dir: None,
            sync: SyncSettings::default(),
        }
    }
}

impl MgmtConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: MgmtConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: MgmtConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }

    /// Read and validate the config at `path`, falling back to defaults if
    /// the file does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config = if path.exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found, using defaults: {}", path.display());
            Self::default()
        };
        config.sync.validate()?;
        Ok(config)
    }

    /// Wire the repository catalog, durable audit log and renderer together.
    pub fn context(&self) -> anyhow::Result<SyncContext> {
        let repository = if self.catalog_path.exists() {
            CatalogRepository::from_file(&self.catalog_path, self.content_dir.clone())?
        } else {
            tracing::warn!(
                "Catalog not found, starting with an empty repository: {}",
                self.catalog_path.display()
            );
            CatalogRepository::with_content_dir(self.content_dir.clone())
        };
        tracing::info!(items = repository.len(), "repository catalog loaded");
        let store = FileAuditStore::open(&self.audit_log)?;

        Ok(SyncContext::new(
            Arc::new(repository),
            Arc::new(XmlMetadataRenderer::new()),
            AuditTrail::new(Arc::new(store)),
            self.sync.clone(),
        ))
    }
}
