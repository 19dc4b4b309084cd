//! Zip dumps: a manifest plus the bytes of every resource it lists.
//!
//! One builder serves both delivery modes; only the [`DumpDestination`]
//! differs. A [`FileDestination`] materializes the dump on disk and stages the
//! manifest in a temp file next to it. A [`StreamDestination`] writes into a
//! caller-owned stream, keeps the manifest in memory, and admits one writer at
//! a time.

use std::collections::HashSet;
use std::fs;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::info;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::builder::{DocumentBuilder, EntrySink};
use crate::context::SyncContext;
use crate::document::{ChangeList, ResourceList, UrlEntry};
use crate::error::SyncError;
use crate::model::{Bitstream, Item, MetadataFormat, Scope};
use crate::naming::{dump_bitstream_path, dump_metadata_path, MANIFEST_NAME};

/// A seekable byte sink a zip archive can be written into.
pub trait WriteSeek: Write + Seek {}

impl<T: Write + Seek> WriteSeek for T {}

/// Where the manifest is held until it is copied into the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestStaging {
    /// A temp file in this directory, discarded once the archive is closed.
    TempFile(PathBuf),
    /// An in-memory buffer.
    InMemory,
}

/// Target of a dump.
pub trait DumpDestination {
    /// How the manifest is staged.
    fn staging(&self) -> ManifestStaging;

    /// Run `write` against the destination's byte sink.
    fn with_writer(
        &self,
        write: &mut dyn FnMut(&mut dyn WriteSeek) -> Result<(), SyncError>,
    ) -> Result<(), SyncError>;
}

/// Materialized dump at a fixed path.
///
/// The archive is assembled in a temp file in the same directory and renamed
/// into place, so readers never see a partial zip.
#[derive(Debug, Clone)]
pub struct FileDestination {
    path: PathBuf,
}

impl FileDestination {
    /// Destination writing to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Final path of the archive.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn dir(&self) -> PathBuf {
        self.path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

impl DumpDestination for FileDestination {
    fn staging(&self) -> ManifestStaging {
        ManifestStaging::TempFile(self.dir())
    }

    fn with_writer(
        &self,
        write: &mut dyn FnMut(&mut dyn WriteSeek) -> Result<(), SyncError>,
    ) -> Result<(), SyncError> {
        let dir = self.dir();
        fs::create_dir_all(&dir)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        write(tmp.as_file_mut())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

/// Dump into a caller-owned stream. Concurrent dumps into the same
/// destination are serialized; the stream is never closed here.
#[derive(Debug)]
pub struct StreamDestination<W> {
    inner: Mutex<W>,
}

impl<W: Write + Seek + Send> StreamDestination<W> {
    /// Wrap a stream.
    pub fn new(inner: W) -> Self {
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Hand the stream back to the caller.
    pub fn into_inner(self) -> Result<W, SyncError> {
        self.inner.into_inner().map_err(|e| poisoned(&e))
    }
}

fn poisoned<T>(err: &std::sync::PoisonError<T>) -> SyncError {
    SyncError::Io(io::Error::new(io::ErrorKind::Other, err.to_string()))
}

impl<W: Write + Seek + Send> DumpDestination for StreamDestination<W> {
    fn staging(&self) -> ManifestStaging {
        ManifestStaging::InMemory
    }

    fn with_writer(
        &self,
        write: &mut dyn FnMut(&mut dyn WriteSeek) -> Result<(), SyncError>,
    ) -> Result<(), SyncError> {
        let mut guard = self.inner.lock().map_err(|e| poisoned(&e))?;
        write(&mut *guard)
    }
}

/// Outcome of one dump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpSummary {
    /// Entries in the manifest.
    pub entries: usize,
    /// Resource files stored in the archive, manifest excluded.
    pub files: usize,
    /// Audit events consumed; zero for resource dumps.
    pub events: usize,
}

/// Writes each locator's bytes into the archive and records the path.
struct ZipSink<'a, 'z, W: Write + Seek> {
    ctx: &'a SyncContext,
    zip: &'z mut ZipWriter<W>,
    written: HashSet<String>,
    entries: Vec<UrlEntry>,
}

impl<'a, 'z, W: Write + Seek> ZipSink<'a, 'z, W> {
    fn new(ctx: &'a SyncContext, zip: &'z mut ZipWriter<W>) -> Self {
        Self {
            ctx,
            zip,
            written: HashSet::new(),
            entries: Vec::new(),
        }
    }

    /// Start a zip entry unless it is already in the archive.
    fn start(&mut self, path: &str) -> Result<bool, SyncError> {
        if !self.written.insert(path.to_string()) {
            return Ok(false);
        }
        self.zip.start_file(path, file_options())?;
        Ok(true)
    }
}

impl<W: Write + Seek> EntrySink for ZipSink<'_, '_, W> {
    fn bitstream(
        &mut self,
        item: &Item,
        bitstream: &Bitstream,
        mut entry: UrlEntry,
    ) -> Result<(), SyncError> {
        let path = dump_bitstream_path(&item.handle, bitstream);
        if self.start(&path)? {
            let mut content = self.ctx.repository.open_bitstream(bitstream)?;
            io::copy(&mut content, self.zip)?;
        }
        entry.path = Some(path);
        self.entries.push(entry);
        Ok(())
    }

    fn metadata(
        &mut self,
        item: &Item,
        format: &MetadataFormat,
        mut entry: UrlEntry,
    ) -> Result<(), SyncError> {
        let bytes = self.ctx.renderer.render_to_vec(item, format)?;
        let path = dump_metadata_path(&item.handle, &format.prefix);
        if self.start(&path)? {
            self.zip.write_all(&bytes)?;
        }
        entry.length = Some(bytes.len() as u64);
        entry.hash = Some(format!("sha-256:{}", hex::encode(Sha256::digest(&bytes))));
        entry.path = Some(path);
        self.entries.push(entry);
        Ok(())
    }

    fn deleted(&mut self, entry: UrlEntry) -> Result<(), SyncError> {
        self.entries.push(entry);
        Ok(())
    }
}

fn file_options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}

/// Builds resource dumps and change dumps.
pub struct DumpBuilder<'a> {
    ctx: &'a SyncContext,
}

impl<'a> DumpBuilder<'a> {
    /// Create a builder over a context.
    pub fn new(ctx: &'a SyncContext) -> Self {
        Self { ctx }
    }

    /// Full dump of a scope's current content.
    pub fn resource_dump(
        &self,
        scope: &Scope,
        destination: &dyn DumpDestination,
    ) -> Result<DumpSummary, SyncError> {
        let builder = DocumentBuilder::new(self.ctx);
        let up = self.ctx.locations.capability_list_url(scope);
        let summary = self.write(
            destination,
            &mut |sink: &mut dyn EntrySink| builder.baseline(scope, sink).map(|_| ()),
            &|entries: Vec<UrlEntry>| ResourceList::manifest(Some(up.clone()), entries).to_xml(),
        )?;
        info!(scope = %scope, entries = summary.entries, files = summary.files, "built resource dump");
        Ok(summary)
    }

    /// Dump of the resources changed in `[from, until]`.
    pub fn change_dump(
        &self,
        scope: &Scope,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
        destination: &dyn DumpDestination,
    ) -> Result<DumpSummary, SyncError> {
        let events = self.ctx.audit.query(Some(from), Some(until), scope)?;
        let builder = DocumentBuilder::new(self.ctx);
        let up = self.ctx.locations.capability_list_url(scope);
        let mut summary = self.write(
            destination,
            &mut |sink: &mut dyn EntrySink| builder.changes(&events, sink),
            &|entries: Vec<UrlEntry>| ChangeList::manifest(up.clone(), from, until, entries).to_xml(),
        )?;
        summary.events = events.len();
        info!(
            scope = %scope,
            events = summary.events,
            entries = summary.entries,
            files = summary.files,
            "built change dump"
        );
        Ok(summary)
    }

    fn write(
        &self,
        destination: &dyn DumpDestination,
        populate: &mut dyn FnMut(&mut dyn EntrySink) -> Result<(), SyncError>,
        manifest: &dyn Fn(Vec<UrlEntry>) -> String,
    ) -> Result<DumpSummary, SyncError> {
        let staging = destination.staging();
        let mut summary = DumpSummary::default();
        destination.with_writer(&mut |out: &mut dyn WriteSeek| {
            let mut zip = ZipWriter::new(out);
            let (entries, files) = {
                let mut sink = ZipSink::new(self.ctx, &mut zip);
                populate(&mut sink)?;
                (sink.entries, sink.written.len())
            };
            summary.entries = entries.len();
            summary.files = files;
            let xml = manifest(entries);

            // Resources go first; the manifest is always the last entry.
            let staged = match &staging {
                ManifestStaging::TempFile(dir) => {
                    let mut tmp = NamedTempFile::new_in(dir)?;
                    tmp.write_all(xml.as_bytes())?;
                    tmp.flush()?;
                    tmp.seek(SeekFrom::Start(0))?;
                    zip.start_file(MANIFEST_NAME, file_options())?;
                    io::copy(tmp.as_file_mut(), &mut zip)?;
                    Some(tmp)
                }
                ManifestStaging::InMemory => {
                    zip.start_file(MANIFEST_NAME, file_options())?;
                    zip.write_all(xml.as_bytes())?;
                    None
                }
            };
            zip.finish()?;
            drop(staged);
            Ok(())
        })?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditEvent, AuditStore};
    use crate::model::{ChangeType, ResourceType};
    use crate::testing::{ts, Fixture};
    use std::io::{Cursor, Read};
    use std::sync::Arc;
    use zip::ZipArchive;

    fn names<R: io::Read + Seek>(archive: &mut ZipArchive<R>) -> Vec<String> {
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    fn read_entry<R: io::Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> String {
        let mut out = String::new();
        archive
            .by_name(name)
            .unwrap()
            .read_to_string(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn materialized_dump_paths_agree_with_manifest() {
        let fx = Fixture::new();
        let path = fx.dir.path().join("dump/resourcedump.zip");
        let summary = DumpBuilder::new(&fx.ctx)
            .resource_dump(&Scope::Site, &FileDestination::new(&path))
            .unwrap();
        assert_eq!(summary.entries, 6);
        assert_eq!(summary.files, 6);

        let mut archive = ZipArchive::new(fs::File::open(&path).unwrap()).unwrap();
        let entries = names(&mut archive);
        assert_eq!(entries.last().map(String::as_str), Some(MANIFEST_NAME));
        assert!(entries.contains(&"resources/123456789_10/1_paper.pdf".to_string()));
        assert!(entries.contains(&"resources/123456789_10/oai_dc".to_string()));

        let manifest = read_entry(&mut archive, MANIFEST_NAME);
        assert!(manifest.contains("capability=\"resourcedump-manifest\""));
        for name in entries.iter().filter(|n| n.as_str() != MANIFEST_NAME) {
            assert!(manifest.contains(&format!("path=\"{}\"", name)), "{}", name);
        }
        assert_eq!(
            read_entry(&mut archive, "resources/123456789_10/1_paper.pdf"),
            "paper pdf"
        );
    }

    #[test]
    fn materialized_dump_leaves_no_temp_files() {
        let fx = Fixture::new();
        let dir = fx.dir.path().join("dump");
        DumpBuilder::new(&fx.ctx)
            .resource_dump(&Scope::Site, &FileDestination::new(dir.join("resourcedump.zip")))
            .unwrap();
        let files: Vec<_> = fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(files, vec!["resourcedump.zip"]);
    }

    #[test]
    fn rendered_metadata_carries_length_and_sha256() {
        let fx = Fixture::new();
        let dest = StreamDestination::new(Cursor::new(Vec::new()));
        DumpBuilder::new(&fx.ctx)
            .resource_dump(&Scope::Site, &dest)
            .unwrap();
        let bytes = dest.into_inner().unwrap().into_inner();
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let rendered = read_entry(&mut archive, "resources/123456789_11/oai_dc");
        let manifest = read_entry(&mut archive, MANIFEST_NAME);
        let hash = format!(
            "hash=\"sha-256:{}\" length=\"{}\"",
            hex::encode(Sha256::digest(rendered.as_bytes())),
            rendered.len()
        );
        assert!(manifest.contains(&hash));
    }

    #[test]
    fn change_dump_includes_changed_resources_only() {
        let fx = Fixture::new();
        fx.store
            .append(&AuditEvent::new(
                "b1",
                ResourceType::Bitstream,
                ChangeType::Update,
                ts(20),
                [Scope::Site],
            ))
            .unwrap();
        let mut removed = AuditEvent::new(
            "old",
            ResourceType::Item,
            ChangeType::Remove,
            ts(30),
            [Scope::Site],
        );
        removed.handle = Some("123456789/50".to_string());
        fx.store.append(&removed).unwrap();

        let dest = StreamDestination::new(Cursor::new(Vec::new()));
        let summary = DumpBuilder::new(&fx.ctx)
            .change_dump(&Scope::Site, ts(0), ts(100), &dest)
            .unwrap();
        assert_eq!(summary.events, 2);
        assert_eq!(summary.entries, 3);
        assert_eq!(summary.files, 1);

        let bytes = dest.into_inner().unwrap().into_inner();
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(
            names(&mut archive),
            vec!["resources/123456789_10/1_paper.pdf", MANIFEST_NAME]
        );
        let manifest = read_entry(&mut archive, MANIFEST_NAME);
        assert!(manifest.contains("capability=\"changedump-manifest\""));
        assert!(manifest.contains("change=\"deleted\""));
    }

    #[test]
    fn repeated_resources_are_stored_once() {
        let fx = Fixture::new();
        for at in [10, 11] {
            fx.store
                .append(&AuditEvent::new(
                    "i11",
                    ResourceType::Item,
                    ChangeType::Update,
                    ts(at),
                    [Scope::Site],
                ))
                .unwrap();
        }
        let dest = StreamDestination::new(Cursor::new(Vec::new()));
        let summary = DumpBuilder::new(&fx.ctx)
            .change_dump(&Scope::Site, ts(0), ts(100), &dest)
            .unwrap();
        assert_eq!(summary.entries, 4);
        assert_eq!(summary.files, 2);
    }

    #[test]
    fn stream_destination_serializes_writers() {
        let fx = Arc::new(Fixture::new());
        let dest = Arc::new(StreamDestination::new(Cursor::new(Vec::new())));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let fx = fx.clone();
                let dest = dest.clone();
                std::thread::spawn(move || {
                    DumpBuilder::new(&fx.ctx)
                        .resource_dump(&Scope::Site, dest.as_ref())
                        .unwrap()
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap().entries, 6);
        }
        let dest = Arc::try_unwrap(dest).ok().unwrap();
        let cursor = dest.into_inner().unwrap();
        assert!(!cursor.get_ref().is_empty());
    }

    #[test]
    fn missing_content_aborts_the_dump() {
        let fx = Fixture::new();
        fx.repo
            .upsert_item(crate::testing::item("i30", "123456789/30", &[("b30", "x.pdf")]))
            .unwrap();
        let path = fx.dir.path().join("broken.zip");
        let err = DumpBuilder::new(&fx.ctx)
            .resource_dump(&Scope::Site, &FileDestination::new(&path))
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(!path.exists());
    }
}
