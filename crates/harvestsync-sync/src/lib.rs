#![warn(missing_docs)]

//! harvestsync synchronization subsystem: audit trail, ResourceSync documents, dumps, orchestration
//!
//! Repository lifecycle notifications flow through the [`EventTranslator`]
//! into the [`AuditTrail`]. The [`SyncOrchestrator`] turns repository content
//! and audit events into capability lists, resource lists, dated change
//! lists, zip dumps and the change-list archive, one output directory per
//! configured scope.

pub mod audit;
pub mod builder;
pub mod context;
pub mod document;
pub mod dump;
pub mod error;
pub mod model;
pub mod naming;
pub mod orchestrator;
pub mod render;
pub mod repository;
pub mod settings;
pub mod translator;
pub mod xml;

#[cfg(test)]
mod testing;

pub use audit::{AuditEvent, AuditStore, AuditTrail, FileAuditStore, MemoryAuditStore};
pub use builder::{DocumentBuilder, EntrySink};
pub use context::SyncContext;
pub use document::{
    Capability, CapabilityList, ChangeList, ChangeListArchive, Link, ResourceList,
    SourceDescription, UrlEntry,
};
pub use dump::{DumpBuilder, DumpDestination, DumpSummary, FileDestination, StreamDestination};
pub use error::SyncError;
pub use model::{
    Bitstream, Bundle, ChangeType, Collection, Item, MetadataFormat, MetadataValue, ResourceType,
    Scope,
};
pub use naming::{format_timestamp, parse_timestamp, DocumentKind, LocationManager};
pub use orchestrator::{Operation, OutputLock, ScopeReport, SyncOrchestrator, SyncReport};
pub use render::{MetadataRenderer, XmlMetadataRenderer};
pub use repository::{CatalogRepository, Repository};
pub use settings::SyncSettings;
pub use translator::{EventTranslator, Notification};
