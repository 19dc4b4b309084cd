//! File naming and URL construction.
//!
//! Dated artifacts embed their timestamp in the filename
//! (`changelist_2024-05-01-100000.xml`). That embedded timestamp is the only
//! source of truth for "latest"; file modification times are never consulted.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::SyncError;
use crate::model::{escape_handle, Bitstream, Scope};

/// Timestamp layout used in filenames and in the `from` delivery parameter.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H%M%S";

/// Name of the manifest entry inside dump archives.
pub const MANIFEST_NAME: &str = "manifest.xml";

/// Top-level directory of resource bytes inside dump archives.
pub const DUMP_RESOURCES_DIR: &str = "resources";

/// Every document kind the orchestrator writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    /// Source description.
    Description,
    /// Capability list.
    CapabilityList,
    /// Baseline resource list.
    ResourceList,
    /// Baseline dump archive.
    ResourceDump,
    /// Dated change list.
    ChangeList,
    /// Dated change dump archive.
    ChangeDump,
    /// Site-level change-list archive index.
    ChangeListArchive,
}

impl DocumentKind {
    /// Filename of fixed-name documents.
    pub fn fixed_name(&self) -> Option<&'static str> {
        match self {
            DocumentKind::Description => Some("description.xml"),
            DocumentKind::CapabilityList => Some("capabilitylist.xml"),
            DocumentKind::ResourceList => Some("resourcelist.xml"),
            DocumentKind::ResourceDump => Some("resourcedump.zip"),
            DocumentKind::ChangeListArchive => Some("changelistarchive.xml"),
            DocumentKind::ChangeList | DocumentKind::ChangeDump => None,
        }
    }

    /// Prefix and extension of dated documents.
    fn dated_parts(&self) -> Option<(&'static str, &'static str)> {
        match self {
            DocumentKind::ChangeList => Some(("changelist_", ".xml")),
            DocumentKind::ChangeDump => Some(("changedump_", ".zip")),
            _ => None,
        }
    }

    /// True for kinds whose filename embeds a timestamp.
    pub fn is_dated(&self) -> bool {
        self.dated_parts().is_some()
    }

    /// Filename of this kind; `at` is required for dated kinds and ignored otherwise.
    pub fn filename(&self, at: Option<DateTime<Utc>>) -> Result<String, SyncError> {
        if let Some(name) = self.fixed_name() {
            return Ok(name.to_string());
        }
        match (self.dated_parts(), at) {
            (Some((prefix, ext)), Some(at)) => {
                Ok(format!("{}{}{}", prefix, format_timestamp(at), ext))
            }
            _ => Err(SyncError::Config {
                msg: format!("{:?} needs a timestamp", self),
            }),
        }
    }

    /// Timestamp embedded in `filename` if it is a dated file of this kind.
    pub fn parse_filename(&self, filename: &str) -> Option<DateTime<Utc>> {
        let (prefix, ext) = self.dated_parts()?;
        let stamp = filename.strip_prefix(prefix)?.strip_suffix(ext)?;
        parse_timestamp(stamp).ok()
    }
}

/// Render a timestamp in [`TIMESTAMP_FORMAT`].
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a timestamp in [`TIMESTAMP_FORMAT`] as UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, SyncError> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| SyncError::InvalidTimestamp {
            value: value.to_string(),
        })
}

/// The dated file of `kind` with the greatest embedded timestamp in `dir`.
pub fn latest_dated(
    dir: &Path,
    kind: DocumentKind,
) -> Result<Option<(String, DateTime<Utc>)>, SyncError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut latest: Option<(String, DateTime<Utc>)> = None;
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(at) = kind.parse_filename(&name) {
            if latest.as_ref().map_or(true, |(_, best)| at > *best) {
                latest = Some((name, at));
            }
        }
    }
    Ok(latest)
}

/// Path of a bitstream inside a dump archive.
pub fn dump_bitstream_path(handle: &str, bitstream: &Bitstream) -> String {
    format!(
        "{}/{}/{}_{}",
        DUMP_RESOURCES_DIR,
        escape_handle(handle),
        bitstream.sequence,
        bitstream.name
    )
}

/// Path of a rendered metadata export inside a dump archive.
pub fn dump_metadata_path(handle: &str, prefix: &str) -> String {
    format!("{}/{}/{}", DUMP_RESOURCES_DIR, escape_handle(handle), prefix)
}

fn trim_slash(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// Canonical on-disk locations and public URLs.
#[derive(Debug, Clone)]
pub struct LocationManager {
    output_dir: PathBuf,
    base_url: String,
    resource_url_prefix: String,
    bitstream_url_prefix: String,
    handle_url_prefix: String,
}

impl LocationManager {
    /// Create a manager; trailing slashes on URL prefixes are ignored.
    pub fn new(
        output_dir: impl Into<PathBuf>,
        base_url: &str,
        resource_url_prefix: &str,
        bitstream_url_prefix: &str,
        handle_url_prefix: &str,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            base_url: trim_slash(base_url),
            resource_url_prefix: trim_slash(resource_url_prefix),
            bitstream_url_prefix: trim_slash(bitstream_url_prefix),
            handle_url_prefix: trim_slash(handle_url_prefix),
        }
    }

    /// Root output directory.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Directory holding a scope's documents.
    pub fn scope_dir(&self, scope: &Scope) -> PathBuf {
        match scope.dir_name() {
            Some(name) => self.output_dir.join(name),
            None => self.output_dir.clone(),
        }
    }

    /// Path of a document of `kind` for `scope`.
    pub fn document_path(
        &self,
        scope: &Scope,
        kind: DocumentKind,
        at: Option<DateTime<Utc>>,
    ) -> Result<PathBuf, SyncError> {
        let dir = if kind == DocumentKind::ChangeListArchive {
            self.output_dir.clone()
        } else {
            self.scope_dir(scope)
        };
        Ok(dir.join(kind.filename(at)?))
    }

    /// Public URL of a file in a scope's directory.
    pub fn file_url(&self, scope: &Scope, filename: &str) -> String {
        match scope.dir_name() {
            Some(dir) => format!("{}/{}/{}", self.base_url, dir, filename),
            None => format!("{}/{}", self.base_url, filename),
        }
    }

    /// Public URL of a document of `kind` for `scope`.
    pub fn document_url(
        &self,
        scope: &Scope,
        kind: DocumentKind,
        at: Option<DateTime<Utc>>,
    ) -> Result<String, SyncError> {
        let filename = kind.filename(at)?;
        if kind == DocumentKind::ChangeListArchive {
            return Ok(self.file_url(&Scope::Site, &filename));
        }
        Ok(self.file_url(scope, &filename))
    }

    /// Public URL of a scope's capability list.
    pub fn capability_list_url(&self, scope: &Scope) -> String {
        self.fixed_url(scope, DocumentKind::CapabilityList)
    }

    /// Public URL of a scope's description document.
    pub fn description_url(&self, scope: &Scope) -> String {
        self.fixed_url(scope, DocumentKind::Description)
    }

    /// Public URL of a fixed-name document.
    pub fn fixed_url(&self, scope: &Scope, kind: DocumentKind) -> String {
        let name = kind.fixed_name().unwrap_or_default();
        if kind == DocumentKind::ChangeListArchive {
            return self.file_url(&Scope::Site, name);
        }
        self.file_url(scope, name)
    }

    /// Public URL of the site-level change-list archive index.
    pub fn archive_url(&self) -> String {
        self.fixed_url(&Scope::Site, DocumentKind::ChangeListArchive)
    }

    /// Public URL of a bitstream's content.
    pub fn bitstream_url(&self, handle: &str, bitstream: &Bitstream) -> String {
        self.bitstream_url_parts(handle, bitstream.sequence, &bitstream.name)
    }

    /// Public URL of bitstream content from its parts.
    pub fn bitstream_url_parts(&self, handle: &str, sequence: u32, name: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.bitstream_url_prefix,
            handle,
            sequence,
            urlencoding::encode(name)
        )
    }

    /// Public URL of an item's metadata export in one format.
    pub fn metadata_url(&self, handle: &str, prefix: &str) -> String {
        format!("{}/{}/{}", self.resource_url_prefix, handle, prefix)
    }

    /// Public landing URL of a collection or community.
    pub fn container_url(&self, handle: &str) -> String {
        format!("{}/{}", self.handle_url_prefix, handle)
    }
}
