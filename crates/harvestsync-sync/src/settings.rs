//! Synchronization settings.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::model::{MetadataFormat, Scope};
use crate::naming::LocationManager;

/// What to publish, where, and under which URLs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Root output directory.
    pub output_dir: PathBuf,
    /// Public URL under which `output_dir` is served.
    pub base_url: String,
    /// Public prefix of the metadata crosswalk endpoint.
    pub resource_url_prefix: String,
    /// Public prefix for bitstream content.
    pub bitstream_url_prefix: String,
    /// Public prefix for collection and community landing pages.
    pub handle_url_prefix: String,
    /// Scopes to publish.
    pub scopes: Vec<Scope>,
    /// Bundle names whose bitstreams are synchronized.
    pub exposed_bundles: Vec<String>,
    /// Metadata exports advertised for every item.
    pub metadata_formats: Vec<MetadataFormat>,
    /// Advertise metadata exports only, never bitstreams.
    pub metadata_only: bool,
    /// Produce resource dumps and change dumps.
    pub resource_dumps: bool,
    /// Optional `describedby` link on capability lists.
    pub described_by: Option<String>,
    /// Items fetched per repository page during baseline traversal.
    pub page_size: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("/var/lib/harvestsync/rs"),
            base_url: String::from("http://localhost:8080/rs"),
            resource_url_prefix: String::from("http://localhost:8080/resource"),
            bitstream_url_prefix: String::from("http://localhost:8080/bitstream"),
            handle_url_prefix: String::from("http://localhost:8080/handle"),
            scopes: vec![Scope::Site],
            exposed_bundles: vec![String::from("ORIGINAL")],
            metadata_formats: vec![MetadataFormat::oai_dc()],
            metadata_only: false,
            resource_dumps: false,
            described_by: None,
            page_size: 100,
        }
    }
}

impl SyncSettings {
    /// Reject settings that cannot produce valid documents.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.scopes.is_empty() {
            return Err(config_error("at least one scope must be configured"));
        }
        // scopes share one output tree and one delivery URL space
        let mut segments = HashSet::new();
        for scope in &self.scopes {
            if !segments.insert(scope.url_segment()) {
                return Err(config_error(&format!(
                    "scope {} maps to the same directory as another configured scope",
                    scope
                )));
            }
        }
        if self.metadata_formats.is_empty() {
            return Err(config_error("at least one metadata format must be configured"));
        }
        let mut prefixes = HashSet::new();
        for format in &self.metadata_formats {
            if format.prefix.is_empty() {
                return Err(config_error("metadata format prefix must not be empty"));
            }
            if !prefixes.insert(format.prefix.as_str()) {
                return Err(config_error(&format!(
                    "duplicate metadata format prefix: {}",
                    format.prefix
                )));
            }
        }
        for (name, url) in [
            ("base_url", &self.base_url),
            ("resource_url_prefix", &self.resource_url_prefix),
            ("bitstream_url_prefix", &self.bitstream_url_prefix),
            ("handle_url_prefix", &self.handle_url_prefix),
        ] {
            if url.trim().is_empty() {
                return Err(config_error(&format!("{} must not be empty", name)));
            }
        }
        if self.page_size == 0 {
            return Err(config_error("page_size must be greater than zero"));
        }
        Ok(())
    }

    /// Look a configured metadata format up by prefix.
    pub fn format(&self, prefix: &str) -> Result<&MetadataFormat, SyncError> {
        self.metadata_formats
            .iter()
            .find(|f| f.prefix == prefix)
            .ok_or_else(|| SyncError::UnknownFormat {
                prefix: prefix.to_string(),
            })
    }

    /// Find a configured scope by its URL segment (`site` or directory name).
    pub fn scope_by_segment(&self, segment: &str) -> Option<&Scope> {
        self.scopes.iter().find(|s| s.url_segment() == segment)
    }

    /// Locations derived from these settings.
    pub fn locations(&self) -> LocationManager {
        LocationManager::new(
            self.output_dir.clone(),
            &self.base_url,
            &self.resource_url_prefix,
            &self.bitstream_url_prefix,
            &self.handle_url_prefix,
        )
    }
}

fn config_error(msg: &str) -> SyncError {
    SyncError::Config {
        msg: msg.to_string(),
    }
}
