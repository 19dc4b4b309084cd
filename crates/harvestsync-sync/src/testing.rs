//! Shared fixtures for unit tests.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tempfile::TempDir;

use crate::audit::{AuditTrail, MemoryAuditStore};
use crate::context::SyncContext;
use crate::model::{Bitstream, Bundle, Item, MetadataFormat, MetadataValue, Scope};
use crate::render::XmlMetadataRenderer;
use crate::repository::CatalogRepository;
use crate::settings::SyncSettings;

pub const FIXTURE_COMMUNITY: &str = "123456789/1";
pub const FIXTURE_COLLECTION: &str = "123456789/2";
pub const BASE_URL: &str = "http://repo.test/rs";

pub fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}

pub fn bitstream(id: &str, sequence: u32, name: &str) -> Bitstream {
    Bitstream {
        id: id.to_string(),
        sequence,
        name: name.to_string(),
        mime_type: "application/pdf".to_string(),
        size: 9,
        checksum: format!("md5-{}", id),
        checksum_algorithm: "MD5".to_string(),
    }
}

/// An item in the fixture collection with the given ORIGINAL bitstreams
/// (sequence numbers start at 1) and one LICENSE bitstream that is never exposed.
pub fn item(id: &str, handle: &str, bitstreams: &[(&str, &str)]) -> Item {
    let original = bitstreams
        .iter()
        .enumerate()
        .map(|(i, (bs_id, name))| bitstream(bs_id, i as u32 + 1, name))
        .collect();
    Item {
        id: id.to_string(),
        handle: handle.to_string(),
        last_modified: ts(1_000),
        withdrawn: false,
        collections: vec![FIXTURE_COLLECTION.to_string()],
        communities: vec![FIXTURE_COMMUNITY.to_string()],
        bundles: vec![
            Bundle {
                name: "ORIGINAL".to_string(),
                bitstreams: original,
            },
            Bundle {
                name: "LICENSE".to_string(),
                bitstreams: vec![bitstream(&format!("{}-license", id), 99, "license.txt")],
            },
        ],
        metadata: vec![MetadataValue::new("dc.title", format!("Item {}", id))],
    }
}

pub fn settings(output_dir: &std::path::Path) -> SyncSettings {
    SyncSettings {
        output_dir: output_dir.to_path_buf(),
        base_url: BASE_URL.to_string(),
        resource_url_prefix: "http://repo.test/resource".to_string(),
        bitstream_url_prefix: "http://repo.test/bitstream".to_string(),
        handle_url_prefix: "http://repo.test/handle".to_string(),
        scopes: vec![
            Scope::Site,
            Scope::container(FIXTURE_COLLECTION),
        ],
        metadata_formats: vec![
            MetadataFormat::oai_dc(),
            MetadataFormat::new("dim", "http://www.dspace.org/xmlns/dspace/dim", "text/xml"),
        ],
        ..SyncSettings::default()
    }
}

/// A ready context over a temp output directory, a catalog with two items
/// (`123456789/10` with two PDFs, `123456789/11` without files) and an
/// in-memory audit store.
pub struct Fixture {
    pub dir: TempDir,
    pub repo: Arc<CatalogRepository>,
    pub store: Arc<MemoryAuditStore>,
    pub ctx: SyncContext,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_settings(|_| {})
    }

    pub fn with_settings(adjust: impl FnOnce(&mut SyncSettings)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let repo = Arc::new(CatalogRepository::new());
        repo.upsert_item(item(
            "i10",
            "123456789/10",
            &[("b1", "paper.pdf"), ("b2", "data.pdf")],
        ))
        .unwrap();
        repo.upsert_item(item("i11", "123456789/11", &[])).unwrap();
        repo.put_content("b1", b"paper pdf".to_vec()).unwrap();
        repo.put_content("b2", b"data  pdf".to_vec()).unwrap();

        let store = Arc::new(MemoryAuditStore::new());
        let mut settings = settings(&dir.path().join("out"));
        adjust(&mut settings);
        let ctx = SyncContext::new(
            repo.clone(),
            Arc::new(XmlMetadataRenderer::new()),
            AuditTrail::new(store.clone()),
            settings,
        );
        Self {
            dir,
            repo,
            store,
            ctx,
        }
    }

    pub fn out(&self) -> std::path::PathBuf {
        self.ctx.settings.output_dir.clone()
    }
}
