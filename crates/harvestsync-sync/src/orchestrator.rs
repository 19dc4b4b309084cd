//! The `init`, `update` and `rebase` batch operations.
//!
//! The orchestrator is the only writer of the output directory. Each
//! operation holds [`OutputLock`] for its whole run and processes the
//! configured scopes in order; a failure aborts the run and leaves scopes
//! already processed as written.
//!
//! Per scope the on-disk state moves from uninitialized to baseline (`init`,
//! `rebase`) and from baseline to updated (`update`). The dated change lists
//! of a scope chain without gaps: every new list starts at the timestamp
//! embedded in the previous list's filename.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SubsecRound, Utc};
use fs2::FileExt;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::builder::DocumentBuilder;
use crate::context::SyncContext;
use crate::document::{Capability, CapabilityList, ChangeList, ChangeListArchive, SourceDescription};
use crate::dump::{DumpBuilder, FileDestination};
use crate::error::SyncError;
use crate::model::Scope;
use crate::naming::{latest_dated, DocumentKind};

/// Lock file name inside the output directory.
pub const LOCK_FILE: &str = ".harvestsync.lock";

/// Exclusive advisory lock on an output directory.
///
/// The lock file itself stays in place; the OS releases the lock when the
/// handle is closed, including when the process dies mid-run.
#[derive(Debug)]
pub struct OutputLock {
    path: PathBuf,
    file: File,
}

impl OutputLock {
    /// Lock `dir`; fails with [`SyncError::Locked`] if another run holds it.
    pub fn acquire(dir: &Path) -> Result<Self, SyncError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(LOCK_FILE);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        if let Err(e) = file.try_lock_exclusive() {
            if e.kind() == fs2::lock_contended_error().kind() {
                return Err(SyncError::Locked {
                    path: path.display().to_string(),
                });
            }
            return Err(e.into());
        }
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        debug!(path = %path.display(), "acquired output lock");
        Ok(Self { path, file })
    }
}

impl Drop for OutputLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "failed to release output lock");
        }
    }
}

/// Orchestrator operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Fresh baseline.
    Init,
    /// Incremental change lists.
    Update,
    /// Fresh baseline that keeps history.
    Rebase,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Init => write!(f, "init"),
            Operation::Update => write!(f, "update"),
            Operation::Rebase => write!(f, "rebase"),
        }
    }
}

/// What one scope produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeReport {
    /// The scope.
    pub scope: Scope,
    /// Files written, in order.
    pub documents: Vec<PathBuf>,
    /// Audit events consumed.
    pub events: usize,
}

impl ScopeReport {
    fn new(scope: &Scope) -> Self {
        Self {
            scope: scope.clone(),
            documents: Vec::new(),
            events: 0,
        }
    }
}

/// Result of an orchestrator run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    /// Which operation ran.
    pub operation: Operation,
    /// Run timestamp; embedded in every dated file written.
    pub at: DateTime<Utc>,
    /// Per-scope results, in configuration order.
    pub scopes: Vec<ScopeReport>,
    /// Entries in the change-list archive after the run.
    pub archived: usize,
}

impl SyncReport {
    /// Total number of documents written.
    pub fn documents(&self) -> usize {
        self.scopes.iter().map(|s| s.documents.len()).sum()
    }
}

/// Sequences builders per scope and owns every on-disk mutation.
pub struct SyncOrchestrator {
    ctx: SyncContext,
}

impl SyncOrchestrator {
    /// Create an orchestrator.
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    /// The context this orchestrator runs with.
    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    /// Wipe the output directory and write a fresh baseline for every scope.
    pub fn init(&self) -> Result<SyncReport, SyncError> {
        self.init_at(Utc::now())
    }

    /// [`init`](Self::init) at a fixed time.
    pub fn init_at(&self, now: DateTime<Utc>) -> Result<SyncReport, SyncError> {
        let now = now.trunc_subsecs(0);
        let out = self.ctx.locations.output_dir().to_path_buf();
        let _lock = OutputLock::acquire(&out)?;
        wipe(&out, &|name: &str| name == LOCK_FILE)?;

        let mut scopes = Vec::with_capacity(self.ctx.settings.scopes.len());
        for scope in &self.ctx.settings.scopes {
            let mut report = ScopeReport::new(scope);
            self.baseline(scope, now, false, &mut report)?;
            scopes.push(report);
        }
        info!(scopes = scopes.len(), at = %now, "init complete");
        Ok(SyncReport {
            operation: Operation::Init,
            at: now,
            scopes,
            archived: 0,
        })
    }

    /// Write a dated change list (and change dump) per scope covering events
    /// since the scope's latest change list, or since `from` if given.
    pub fn update(&self, from: Option<DateTime<Utc>>) -> Result<SyncReport, SyncError> {
        self.update_at(from, Utc::now())
    }

    /// [`update`](Self::update) at a fixed time.
    pub fn update_at(
        &self,
        from: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<SyncReport, SyncError> {
        let now = now.trunc_subsecs(0);
        let out = self.ctx.locations.output_dir().to_path_buf();
        let _lock = OutputLock::acquire(&out)?;
        let builder = DocumentBuilder::new(&self.ctx);
        let mut archive = builder.load_archive()?;

        let mut scopes = Vec::with_capacity(self.ctx.settings.scopes.len());
        for scope in &self.ctx.settings.scopes {
            let mut report = ScopeReport::new(scope);
            let from = match from {
                Some(from) => from,
                None => self
                    .latest_change_list(scope)?
                    .ok_or_else(|| SyncError::NotInitialized {
                        scope: scope.to_string(),
                    })?,
            };
            let url = self.write_change_list(scope, from, now, &mut report)?;
            if self.ctx.settings.resource_dumps {
                let path =
                    self.ctx
                        .locations
                        .document_path(scope, DocumentKind::ChangeDump, Some(now))?;
                DumpBuilder::new(&self.ctx).change_dump(
                    scope,
                    from,
                    now,
                    &FileDestination::new(&path),
                )?;
                report.documents.push(path);
            }
            let caps = self.capability_list(scope, true, true)?;
            report
                .documents
                .push(self.write_fixed(scope, DocumentKind::CapabilityList, &caps.to_xml())?);

            archive.insert(url, now);
            self.write_archive(&archive, &mut report)?;
            info!(scope = %scope, from = %from, until = %now, events = report.events, "scope updated");
            scopes.push(report);
        }
        Ok(SyncReport {
            operation: Operation::Update,
            at: now,
            scopes,
            archived: archive.len(),
        })
    }

    /// Fresh baseline that folds history into the archive.
    ///
    /// Dated change lists and the archive survive the wipe. Every scope with
    /// history gets a final change list from its latest change list up to the
    /// rebase point; it sits at the same location the new baseline's
    /// placeholder would, so the next `update` continues from there. The
    /// final lists are archived.
    pub fn rebase(&self) -> Result<SyncReport, SyncError> {
        self.rebase_at(Utc::now())
    }

    /// [`rebase`](Self::rebase) at a fixed time.
    pub fn rebase_at(&self, now: DateTime<Utc>) -> Result<SyncReport, SyncError> {
        let now = now.trunc_subsecs(0);
        let out = self.ctx.locations.output_dir().to_path_buf();
        let _lock = OutputLock::acquire(&out)?;
        let builder = DocumentBuilder::new(&self.ctx);
        let mut archive = builder.load_archive()?;

        let mut history = Vec::with_capacity(self.ctx.settings.scopes.len());
        for scope in &self.ctx.settings.scopes {
            history.push(self.latest_change_list(scope)?);
        }
        let publish_archive = !archive.is_empty() || history.iter().any(Option::is_some);

        let archive_name = DocumentKind::ChangeListArchive
            .fixed_name()
            .unwrap_or_default();
        wipe(&out, &|name: &str| {
            name == LOCK_FILE
                || name == archive_name
                || DocumentKind::ChangeList.parse_filename(name).is_some()
        })?;

        let mut scopes = Vec::with_capacity(self.ctx.settings.scopes.len());
        for (scope, latest) in self.ctx.settings.scopes.iter().zip(history) {
            let mut report = ScopeReport::new(scope);
            self.baseline(scope, now, publish_archive, &mut report)?;
            if let Some(from) = latest {
                let url = self.write_change_list(scope, from, now, &mut report)?;
                archive.insert(url, now);
            }
            if publish_archive {
                self.write_archive(&archive, &mut report)?;
            }
            scopes.push(report);
        }
        info!(scopes = scopes.len(), archived = archive.len(), at = %now, "rebase complete");
        Ok(SyncReport {
            operation: Operation::Rebase,
            at: now,
            scopes,
            archived: archive.len(),
        })
    }

    /// Resource list, description, optional dump, capability list and the
    /// empty placeholder change list for one scope.
    fn baseline(
        &self,
        scope: &Scope,
        now: DateTime<Utc>,
        publish_archive: bool,
        report: &mut ScopeReport,
    ) -> Result<(), SyncError> {
        let locations = &self.ctx.locations;
        let builder = DocumentBuilder::new(&self.ctx);

        let list = builder.resource_list(scope)?;
        report
            .documents
            .push(self.write_fixed(scope, DocumentKind::ResourceList, &list.to_xml())?);

        let description = SourceDescription {
            described_by: self.ctx.settings.described_by.clone(),
            capability_list: locations.capability_list_url(scope),
            at: now,
        };
        report
            .documents
            .push(self.write_fixed(scope, DocumentKind::Description, &description.to_xml())?);

        if self.ctx.settings.resource_dumps {
            let path = locations.document_path(scope, DocumentKind::ResourceDump, None)?;
            DumpBuilder::new(&self.ctx).resource_dump(scope, &FileDestination::new(&path))?;
            report.documents.push(path);
        }

        let caps = self.capability_list(scope, false, publish_archive)?;
        report
            .documents
            .push(self.write_fixed(scope, DocumentKind::CapabilityList, &caps.to_xml())?);

        let placeholder = ChangeList::new(locations.capability_list_url(scope), now, now, Vec::new());
        let path = locations.document_path(scope, DocumentKind::ChangeList, Some(now))?;
        write_atomic(&path, placeholder.to_xml().as_bytes())?;
        report.documents.push(path);
        info!(scope = %scope, entries = list.entries.len(), "baseline written");
        Ok(())
    }

    /// Build and write `changelist_<until>.xml`; returns its public URL.
    fn write_change_list(
        &self,
        scope: &Scope,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
        report: &mut ScopeReport,
    ) -> Result<String, SyncError> {
        let (list, events) = DocumentBuilder::new(&self.ctx).change_list(scope, from, until)?;
        let locations = &self.ctx.locations;
        let path = locations.document_path(scope, DocumentKind::ChangeList, Some(until))?;
        write_atomic(&path, list.to_xml().as_bytes())?;
        report.documents.push(path);
        report.events += events;
        locations.document_url(scope, DocumentKind::ChangeList, Some(until))
    }

    /// Capability list reflecting what is on disk. Change lists and change
    /// dumps are resolved by their embedded timestamp, never by mtime.
    fn capability_list(
        &self,
        scope: &Scope,
        with_changes: bool,
        with_archive: bool,
    ) -> Result<CapabilityList, SyncError> {
        let locations = &self.ctx.locations;
        let mut caps = CapabilityList::new(
            Some(locations.description_url(scope)),
            self.ctx.settings.described_by.clone(),
        );
        caps.set(
            Capability::ResourceList,
            locations.fixed_url(scope, DocumentKind::ResourceList),
        );
        if self.ctx.settings.resource_dumps {
            caps.set(
                Capability::ResourceDump,
                locations.fixed_url(scope, DocumentKind::ResourceDump),
            );
        }
        if with_changes {
            let dir = locations.scope_dir(scope);
            if let Some((name, _)) = latest_dated(&dir, DocumentKind::ChangeList)? {
                caps.set(Capability::ChangeList, locations.file_url(scope, &name));
            }
            if self.ctx.settings.resource_dumps {
                if let Some((name, _)) = latest_dated(&dir, DocumentKind::ChangeDump)? {
                    caps.set(Capability::ChangeDump, locations.file_url(scope, &name));
                }
            }
        }
        if with_archive && scope.is_site() {
            caps.set(Capability::ChangeListArchive, locations.archive_url());
        }
        Ok(caps)
    }

    fn latest_change_list(&self, scope: &Scope) -> Result<Option<DateTime<Utc>>, SyncError> {
        let dir = self.ctx.locations.scope_dir(scope);
        Ok(latest_dated(&dir, DocumentKind::ChangeList)?.map(|(_, at)| at))
    }

    fn write_fixed(&self, scope: &Scope, kind: DocumentKind, xml: &str) -> Result<PathBuf, SyncError> {
        let path = self.ctx.locations.document_path(scope, kind, None)?;
        write_atomic(&path, xml.as_bytes())?;
        Ok(path)
    }

    fn write_archive(
        &self,
        archive: &ChangeListArchive,
        report: &mut ScopeReport,
    ) -> Result<(), SyncError> {
        let path =
            self.ctx
                .locations
                .document_path(&Scope::Site, DocumentKind::ChangeListArchive, None)?;
        write_atomic(&path, archive.to_xml().as_bytes())?;
        if !report.documents.contains(&path) {
            report.documents.push(path);
        }
        Ok(())
    }
}

/// Write a file through a temp file in the same directory and rename it into
/// place, so the delivery side never serves a half-written document.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), SyncError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Remove everything under `dir` whose file name `keep` rejects. Directories
/// left empty are removed too.
fn wipe(dir: &Path, keep: &dyn Fn(&str) -> bool) -> Result<(), SyncError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            wipe(&path, keep)?;
            if fs::read_dir(&path)?.next().is_none() {
                fs::remove_dir(&path)?;
            }
        } else {
            let name = entry.file_name();
            if !keep(name.to_string_lossy().as_ref()) {
                fs::remove_file(&path)?;
            }
        }
    }
    Ok(())
}
