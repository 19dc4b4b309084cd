//! Collaborators shared by builders and the orchestrator.

use std::sync::Arc;

use crate::audit::AuditTrail;
use crate::naming::LocationManager;
use crate::render::MetadataRenderer;
use crate::repository::Repository;
use crate::settings::SyncSettings;

/// Injected collaborators plus settings for one deployment.
#[derive(Clone)]
pub struct SyncContext {
    /// Repository content.
    pub repository: Arc<dyn Repository>,
    /// Metadata crosswalk.
    pub renderer: Arc<dyn MetadataRenderer>,
    /// Audit trail.
    pub audit: AuditTrail,
    /// Settings.
    pub settings: SyncSettings,
    /// Naming and URLs derived from `settings`.
    pub locations: LocationManager,
}

impl SyncContext {
    /// Assemble a context; locations are derived from `settings`.
    pub fn new(
        repository: Arc<dyn Repository>,
        renderer: Arc<dyn MetadataRenderer>,
        audit: AuditTrail,
        settings: SyncSettings,
    ) -> Self {
        let locations = settings.locations();
        Self {
            repository,
            renderer,
            audit,
            settings,
            locations,
        }
    }
}
