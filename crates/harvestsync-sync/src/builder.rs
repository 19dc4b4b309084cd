//! Resource list and change list builders.
//!
//! Both builders share the per-item logic: every exposed bitstream becomes a
//! locator linked to the item's metadata exports and owning collections, and
//! every advertised metadata format becomes a locator linked back to the
//! bitstreams, the format profile and the alternate formats. Entries are
//! handed to an [`EntrySink`] so that dump builders can attach bytes to the
//! very same locators.

use std::fs;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::audit::AuditEvent;
use crate::context::SyncContext;
use crate::document::{
    ChangeList, ChangeListArchive, Link, ResourceList, UrlEntry, REL_ALTERNATE, REL_COLLECTION,
    REL_DESCRIBED_BY, REL_DESCRIBES, REL_PROFILE,
};
use crate::error::SyncError;
use crate::model::{Bitstream, ChangeType, Item, MetadataFormat, ResourceType, Scope};
use crate::naming::DocumentKind;

/// Receives locators as builders produce them.
pub trait EntrySink {
    /// A locator for a bitstream's content.
    fn bitstream(
        &mut self,
        item: &Item,
        bitstream: &Bitstream,
        entry: UrlEntry,
    ) -> Result<(), SyncError>;

    /// A locator for an item's metadata export.
    fn metadata(
        &mut self,
        item: &Item,
        format: &MetadataFormat,
        entry: UrlEntry,
    ) -> Result<(), SyncError>;

    /// A locator for something that no longer exists; it has no bytes.
    fn deleted(&mut self, entry: UrlEntry) -> Result<(), SyncError>;
}

impl EntrySink for Vec<UrlEntry> {
    fn bitstream(&mut self, _: &Item, _: &Bitstream, entry: UrlEntry) -> Result<(), SyncError> {
        self.push(entry);
        Ok(())
    }

    fn metadata(&mut self, _: &Item, _: &MetadataFormat, entry: UrlEntry) -> Result<(), SyncError> {
        self.push(entry);
        Ok(())
    }

    fn deleted(&mut self, entry: UrlEntry) -> Result<(), SyncError> {
        self.push(entry);
        Ok(())
    }
}

/// Builds resource lists, change lists and the change-list archive.
pub struct DocumentBuilder<'a> {
    ctx: &'a SyncContext,
}

impl<'a> DocumentBuilder<'a> {
    /// Create a builder over a context.
    pub fn new(ctx: &'a SyncContext) -> Self {
        Self { ctx }
    }

    /// Baseline resource list of a scope.
    pub fn resource_list(&self, scope: &Scope) -> Result<ResourceList, SyncError> {
        let mut entries = Vec::new();
        let items = self.baseline(scope, &mut entries)?;
        info!(scope = %scope, items, entries = entries.len(), "built resource list");
        Ok(ResourceList::new(
            Some(self.ctx.locations.capability_list_url(scope)),
            entries,
        ))
    }

    /// Change list of a scope for `[from, until]`, plus the number of events consumed.
    pub fn change_list(
        &self,
        scope: &Scope,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<(ChangeList, usize), SyncError> {
        let events = self.ctx.audit.query(Some(from), Some(until), scope)?;
        let mut entries = Vec::new();
        self.changes(&events, &mut entries)?;
        info!(
            scope = %scope,
            events = events.len(),
            entries = entries.len(),
            "built change list"
        );
        let list = ChangeList::new(
            self.ctx.locations.capability_list_url(scope),
            from,
            until,
            entries,
        );
        Ok((list, events.len()))
    }

    /// Walk every item reachable under `scope` page by page. Returns the
    /// number of items emitted.
    pub fn baseline(&self, scope: &Scope, sink: &mut dyn EntrySink) -> Result<usize, SyncError> {
        let page_size = self.ctx.settings.page_size;
        let mut offset = 0;
        let mut emitted = 0;
        loop {
            let page = self
                .ctx
                .repository
                .items_page(scope, offset, page_size)?;
            let fetched = page.len();
            for item in &page {
                if item.withdrawn {
                    debug!(handle = %item.handle, "skipping withdrawn item");
                    continue;
                }
                self.item_entries(item, None, sink)?;
                emitted += 1;
            }
            if fetched < page_size {
                break;
            }
            offset += fetched;
        }
        Ok(emitted)
    }

    /// Turn audit events into locators, in event order.
    pub fn changes(&self, events: &[AuditEvent], sink: &mut dyn EntrySink) -> Result<(), SyncError> {
        for event in events {
            match (event.resource_type, event.change_type) {
                (ResourceType::Bitstream, ChangeType::Remove) => {
                    self.removed_bitstream(event, sink)?
                }
                (ResourceType::Item, ChangeType::Remove) => self.removed_item(event, sink)?,
                (ResourceType::Item, change) => self.changed_item(event, change, sink)?,
                (ResourceType::Bitstream, change) => self.changed_bitstream(event, change, sink)?,
                (other, _) => {
                    debug!(resource = %event.resource_id, kind = ?other, "ignoring container event")
                }
            }
        }
        Ok(())
    }

    /// Read the site archive back, or start an empty one. The `up` link is
    /// always the site capability list.
    pub fn load_archive(&self) -> Result<ChangeListArchive, SyncError> {
        let up = self.ctx.locations.capability_list_url(&Scope::Site);
        let path =
            self.ctx
                .locations
                .document_path(&Scope::Site, DocumentKind::ChangeListArchive, None)?;
        match fs::read_to_string(&path) {
            Ok(xml) => ChangeListArchive::from_xml(&xml, up),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ChangeListArchive::new(up)),
            Err(e) => Err(e.into()),
        }
    }

    fn removed_item(&self, event: &AuditEvent, sink: &mut dyn EntrySink) -> Result<(), SyncError> {
        let Some(handle) = &event.handle else {
            warn!(resource = %event.resource_id, "removed item has no handle, skipping");
            return Ok(());
        };
        for format in &self.ctx.settings.metadata_formats {
            sink.deleted(UrlEntry {
                lastmod: Some(event.timestamp),
                change: Some(ChangeType::Remove),
                ..UrlEntry::new(self.ctx.locations.metadata_url(handle, &format.prefix))
            })?;
        }
        Ok(())
    }

    fn removed_bitstream(
        &self,
        event: &AuditEvent,
        sink: &mut dyn EntrySink,
    ) -> Result<(), SyncError> {
        if self.ctx.settings.metadata_only {
            return Ok(());
        }
        let (Some(handle), Some(sequence), Some(name)) = (
            event.handle.as_deref(),
            event.bitstream_sequence(),
            event.bitstream_name(),
        ) else {
            warn!(resource = %event.resource_id, "removed bitstream cannot be located, skipping");
            return Ok(());
        };
        sink.deleted(UrlEntry {
            lastmod: Some(event.timestamp),
            change: Some(ChangeType::Remove),
            ..UrlEntry::new(self.ctx.locations.bitstream_url_parts(handle, sequence, name))
        })
    }

    fn changed_item(
        &self,
        event: &AuditEvent,
        change: ChangeType,
        sink: &mut dyn EntrySink,
    ) -> Result<(), SyncError> {
        match self.ctx.repository.item(&event.resource_id)? {
            Some(item) => {
                let change = if item.withdrawn {
                    ChangeType::Remove
                } else {
                    change
                };
                self.item_entries(&item, Some(change), sink)
            }
            None => {
                debug!(resource = %event.resource_id, "item no longer exists, skipping");
                Ok(())
            }
        }
    }

    fn changed_bitstream(
        &self,
        event: &AuditEvent,
        change: ChangeType,
        sink: &mut dyn EntrySink,
    ) -> Result<(), SyncError> {
        if self.ctx.settings.metadata_only {
            return Ok(());
        }
        let Some((item, bitstream)) = self.ctx.repository.bitstream(&event.resource_id)? else {
            debug!(resource = %event.resource_id, "bitstream no longer exists, skipping");
            return Ok(());
        };
        let exposed = item
            .exposed_bitstreams(&self.ctx.settings.exposed_bundles)
            .any(|b| b.id == bitstream.id);
        if !exposed {
            debug!(resource = %event.resource_id, "bitstream is not in an exposed bundle");
            return Ok(());
        }
        let change = if item.withdrawn {
            ChangeType::Remove
        } else {
            change
        };
        let entry = self.bitstream_entry(&item, &bitstream, Some(change));
        if change == ChangeType::Remove {
            sink.deleted(entry)
        } else {
            sink.bitstream(&item, &bitstream, entry)
        }
    }

    /// Locators for one item. Entries whose change is a removal go to
    /// [`EntrySink::deleted`].
    fn item_entries(
        &self,
        item: &Item,
        change: Option<ChangeType>,
        sink: &mut dyn EntrySink,
    ) -> Result<(), SyncError> {
        let settings = &self.ctx.settings;
        let bitstreams: Vec<&Bitstream> = if settings.metadata_only {
            Vec::new()
        } else {
            item.exposed_bitstreams(&settings.exposed_bundles).collect()
        };
        let removed = change == Some(ChangeType::Remove);

        for bitstream in &bitstreams {
            let entry = self.bitstream_entry(item, bitstream, change);
            if removed {
                sink.deleted(entry)?;
            } else {
                sink.bitstream(item, bitstream, entry)?;
            }
        }

        for format in &settings.metadata_formats {
            let entry = self.metadata_entry(item, format, &bitstreams, change);
            if removed {
                sink.deleted(entry)?;
            } else {
                sink.metadata(item, format, entry)?;
            }
        }
        Ok(())
    }

    fn bitstream_entry(
        &self,
        item: &Item,
        bitstream: &Bitstream,
        change: Option<ChangeType>,
    ) -> UrlEntry {
        let loc = &self.ctx.locations;
        let mut links: Vec<Link> = self
            .ctx
            .settings
            .metadata_formats
            .iter()
            .map(|f| {
                Link::typed(
                    REL_DESCRIBED_BY,
                    loc.metadata_url(&item.handle, &f.prefix),
                    f.mime_type.clone(),
                )
            })
            .collect();
        links.extend(
            item.collections
                .iter()
                .map(|c| Link::new(REL_COLLECTION, loc.container_url(c))),
        );
        UrlEntry {
            lastmod: Some(item.last_modified),
            mime_type: Some(bitstream.mime_type.clone()),
            length: Some(bitstream.size),
            hash: Some(bitstream.hash_attribute()),
            change,
            links,
            ..UrlEntry::new(loc.bitstream_url(&item.handle, bitstream))
        }
    }

    fn metadata_entry(
        &self,
        item: &Item,
        format: &MetadataFormat,
        bitstreams: &[&Bitstream],
        change: Option<ChangeType>,
    ) -> UrlEntry {
        let loc = &self.ctx.locations;
        let mut links: Vec<Link> = bitstreams
            .iter()
            .map(|b| {
                Link::typed(
                    REL_DESCRIBES,
                    loc.bitstream_url(&item.handle, b),
                    b.mime_type.clone(),
                )
            })
            .collect();
        links.push(Link::new(REL_PROFILE, format.namespace.clone()));
        links.extend(
            self.ctx
                .settings
                .metadata_formats
                .iter()
                .filter(|other| other.prefix != format.prefix)
                .map(|other| {
                    Link::typed(
                        REL_ALTERNATE,
                        loc.metadata_url(&item.handle, &other.prefix),
                        other.mime_type.clone(),
                    )
                }),
        );
        UrlEntry {
            lastmod: Some(item.last_modified),
            mime_type: Some(format.mime_type.clone()),
            change,
            links,
            ..UrlEntry::new(loc.metadata_url(&item.handle, &format.prefix))
        }
    }
}
