//! Maps repository lifecycle notifications onto audit events.
//!
//! | notification                     | event(s)                           | scopes                           |
//! |----------------------------------|------------------------------------|----------------------------------|
//! | item installed                   | CREATE item                        | site                             |
//! | item metadata modified           | UPDATE item                        | collections, communities, site   |
//! | bitstreams added (exposed)       | CREATE bitstream, one per file     | collections, communities, site   |
//! | bitstreams removed (exposed)     | REMOVE bitstream, one per file     | collections, communities, site   |
//! | item deleted                     | REMOVE item                        | site                             |
//! | bitstream deleted                | REMOVE bitstream                   | site                             |
//! | item added to/removed from coll. | CREATE/REMOVE item                 | that collection, its communities |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::audit::{AuditEvent, AuditTrail};
use crate::model::{is_exposed, Bitstream, ChangeType, Collection, Item, ResourceType, Scope};

/// A repository lifecycle notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// An item finished the submission workflow and entered the archive.
    ItemInstalled {
        /// The installed item.
        item: Item,
    },
    /// An item's metadata changed.
    ItemModified {
        /// The item after the change.
        item: Item,
    },
    /// Bitstreams were added to a bundle of an item.
    BitstreamsAdded {
        /// The owning item.
        item: Item,
        /// Name of the bundle.
        bundle: String,
        /// The added bitstreams.
        bitstreams: Vec<Bitstream>,
    },
    /// Bitstreams were removed from a bundle of an item.
    BitstreamsRemoved {
        /// The owning item.
        item: Item,
        /// Name of the bundle.
        bundle: String,
        /// The removed bitstreams.
        bitstreams: Vec<Bitstream>,
    },
    /// An item was deleted.
    ItemDeleted {
        /// Identifier of the deleted item.
        item_id: String,
        /// Its handle, if it had one.
        handle: Option<String>,
    },
    /// A bitstream was deleted outside of a bundle operation.
    BitstreamDeleted {
        /// The deleted bitstream.
        bitstream: Bitstream,
        /// Handle of the item that owned it, if known.
        item_handle: Option<String>,
    },
    /// An item was mapped into a collection.
    CollectionItemAdded {
        /// The item.
        item: Item,
        /// The collection.
        collection: Collection,
    },
    /// An item was unmapped from a collection.
    CollectionItemRemoved {
        /// The item.
        item: Item,
        /// The collection.
        collection: Collection,
    },
    /// Any other subject type; logged and dropped.
    Other {
        /// Subject type as reported by the repository.
        subject_type: String,
    },
}

/// `kind` tags of the notifications [`Notification`] models.
const HANDLED_KINDS: &[&str] = &[
    "item_installed",
    "item_modified",
    "bitstreams_added",
    "bitstreams_removed",
    "item_deleted",
    "bitstream_deleted",
    "collection_item_added",
    "collection_item_removed",
    "other",
];

impl Notification {
    /// Parse one JSON notification. A `kind` outside the handled set becomes
    /// [`Notification::Other`] carrying that kind; malformed input is an error.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let kind = match value.get("kind").and_then(|k| k.as_str()) {
            Some(kind) => kind.to_string(),
            None => return Err(serde::de::Error::missing_field("kind")),
        };
        if HANDLED_KINDS.contains(&kind.as_str()) {
            serde_json::from_value(value)
        } else {
            Ok(Notification::Other { subject_type: kind })
        }
    }
}

/// Turns lifecycle notifications into audit trail entries.
pub struct EventTranslator {
    trail: AuditTrail,
    exposed_bundles: Vec<String>,
}

impl EventTranslator {
    /// Create a translator recording into `trail`.
    pub fn new(trail: AuditTrail, exposed_bundles: Vec<String>) -> Self {
        Self {
            trail,
            exposed_bundles,
        }
    }

    /// Translate and record a notification; returns how many events were recorded.
    ///
    /// Never fails: recording errors are swallowed by the trail.
    pub fn handle(&self, notification: &Notification) -> usize {
        let events = self.translate(notification, Utc::now());
        let count = events.len();
        for event in events {
            self.trail.record(event);
        }
        count
    }

    /// The audit events a notification produces at time `at`.
    pub fn translate(&self, notification: &Notification, at: DateTime<Utc>) -> Vec<AuditEvent> {
        match notification {
            Notification::ItemInstalled { item } => {
                vec![item_event(item, ChangeType::Create, at, vec![Scope::Site])]
            }
            Notification::ItemModified { item } => {
                vec![item_event(item, ChangeType::Update, at, full_scopes(item))]
            }
            Notification::BitstreamsAdded {
                item,
                bundle,
                bitstreams,
            } => self.bundle_events(item, bundle, bitstreams, ChangeType::Create, at),
            Notification::BitstreamsRemoved {
                item,
                bundle,
                bitstreams,
            } => self.bundle_events(item, bundle, bitstreams, ChangeType::Remove, at),
            Notification::ItemDeleted { item_id, handle } => {
                let mut event = AuditEvent::new(
                    item_id.clone(),
                    ResourceType::Item,
                    ChangeType::Remove,
                    at,
                    vec![Scope::Site],
                );
                event.handle = handle.clone();
                vec![event]
            }
            Notification::BitstreamDeleted {
                bitstream,
                item_handle,
            } => {
                let mut event = bitstream_event(bitstream, ChangeType::Remove, at, vec![Scope::Site]);
                event.handle = item_handle.clone();
                vec![event]
            }
            Notification::CollectionItemAdded { item, collection } => {
                vec![membership_event(item, collection, ChangeType::Create, at)]
            }
            Notification::CollectionItemRemoved { item, collection } => {
                vec![membership_event(item, collection, ChangeType::Remove, at)]
            }
            Notification::Other { subject_type } => {
                info!(subject_type = %subject_type, "dropping notification for unhandled subject type");
                Vec::new()
            }
        }
    }

    fn bundle_events(
        &self,
        item: &Item,
        bundle: &str,
        bitstreams: &[Bitstream],
        change: ChangeType,
        at: DateTime<Utc>,
    ) -> Vec<AuditEvent> {
        if !is_exposed(&self.exposed_bundles, bundle) {
            debug!(item = %item.handle, bundle = %bundle, "ignoring change in unexposed bundle");
            return Vec::new();
        }
        bitstreams
            .iter()
            .map(|bs| {
                let mut event = bitstream_event(bs, change, at, full_scopes(item));
                event.container_id = Some(item.id.clone());
                event.handle = Some(item.handle.clone());
                event
            })
            .collect()
    }
}

fn full_scopes(item: &Item) -> Vec<Scope> {
    let mut scopes = item.container_scopes();
    scopes.push(Scope::Site);
    scopes
}

fn item_event(item: &Item, change: ChangeType, at: DateTime<Utc>, scopes: Vec<Scope>) -> AuditEvent {
    let mut event = AuditEvent::new(item.id.clone(), ResourceType::Item, change, at, scopes);
    event.handle = Some(item.handle.clone());
    event
}

fn bitstream_event(
    bitstream: &Bitstream,
    change: ChangeType,
    at: DateTime<Utc>,
    scopes: Vec<Scope>,
) -> AuditEvent {
    let mut event = AuditEvent::new(
        bitstream.id.clone(),
        ResourceType::Bitstream,
        change,
        at,
        scopes,
    );
    event.extra_identifiers = vec![bitstream.sequence.to_string(), bitstream.name.clone()];
    event
}

fn membership_event(
    item: &Item,
    collection: &Collection,
    change: ChangeType,
    at: DateTime<Utc>,
) -> AuditEvent {
    let scopes = std::iter::once(&collection.handle)
        .chain(collection.communities.iter())
        .map(|h| Scope::container(h.clone()));
    let mut event = AuditEvent::new(item.id.clone(), ResourceType::Item, change, at, scopes);
    event.container_id = Some(collection.handle.clone());
    event.handle = Some(item.handle.clone());
    event
}
