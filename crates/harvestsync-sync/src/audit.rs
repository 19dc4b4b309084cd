//! Durable audit trail of content-change events.
//!
//! Events are immutable once written and are never deleted. Readers query a
//! time window for one scope and get the matching events in timestamp order.
//! Recording is best-effort: a failing store is logged and otherwise ignored
//! so that content mutations are never blocked by the audit trail.

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::model::{ChangeType, ResourceType, Scope};

/// One content-change event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Identifier of the changed resource.
    pub resource_id: String,
    /// Kind of the changed resource.
    pub resource_type: ResourceType,
    /// What happened to it.
    pub change_type: ChangeType,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// Scopes the change is visible in.
    pub scopes: BTreeSet<Scope>,
    /// Owning container (item for bitstreams, collection for membership changes).
    pub container_id: Option<String>,
    /// Handle of the item the resource belongs to, kept so removals can be
    /// published after the resource is gone.
    pub handle: Option<String>,
    /// Additional identifiers; for bitstreams `[sequence, filename]`.
    pub extra_identifiers: Vec<String>,
}

impl AuditEvent {
    /// Create an event with no container, handle or extra identifiers.
    pub fn new(
        resource_id: impl Into<String>,
        resource_type: ResourceType,
        change_type: ChangeType,
        timestamp: DateTime<Utc>,
        scopes: impl IntoIterator<Item = Scope>,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            resource_type,
            change_type,
            timestamp,
            scopes: scopes.into_iter().collect(),
            container_id: None,
            handle: None,
            extra_identifiers: Vec::new(),
        }
    }

    /// True if the event belongs to `scope` and falls inside `[from, to]`.
    pub fn matches(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        scope: &Scope,
    ) -> bool {
        if !self.scopes.contains(scope) {
            return false;
        }
        if let Some(from) = from {
            if self.timestamp < from {
                return false;
            }
        }
        if let Some(to) = to {
            if self.timestamp > to {
                return false;
            }
        }
        true
    }

    /// Bitstream sequence number recorded in the extra identifiers.
    pub fn bitstream_sequence(&self) -> Option<u32> {
        self.extra_identifiers.first().and_then(|s| s.parse().ok())
    }

    /// Bitstream file name recorded in the extra identifiers.
    pub fn bitstream_name(&self) -> Option<&str> {
        self.extra_identifiers.get(1).map(|s| s.as_str())
    }
}

/// Append-only, time-range-queryable event storage.
pub trait AuditStore: Send + Sync {
    /// Persist one event.
    fn append(&self, event: &AuditEvent) -> Result<(), SyncError>;

    /// Events whose scopes contain `scope` within the inclusive window
    /// `[from, to]`, ascending by timestamp. `None` leaves a side open.
    fn query(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        scope: &Scope,
    ) -> Result<Vec<AuditEvent>, SyncError>;
}

fn sorted(mut events: Vec<AuditEvent>) -> Vec<AuditEvent> {
    // stable: events with equal timestamps keep their append order
    events.sort_by_key(|e| e.timestamp);
    events
}

/// Volatile store for tests and throwaway deployments.
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored events.
    pub fn event_count(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }
}

impl AuditStore for MemoryAuditStore {
    fn append(&self, event: &AuditEvent) -> Result<(), SyncError> {
        self.events
            .lock()
            .map_err(|e| SyncError::Audit { msg: e.to_string() })?
            .push(event.clone());
        Ok(())
    }

    fn query(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        scope: &Scope,
    ) -> Result<Vec<AuditEvent>, SyncError> {
        let events = self
            .events
            .lock()
            .map_err(|e| SyncError::Audit { msg: e.to_string() })?;
        Ok(sorted(
            events
                .iter()
                .filter(|e| e.matches(from, to, scope))
                .cloned()
                .collect(),
        ))
    }
}

/// Largest record the log accepts; a length prefix above this marks corruption.
const MAX_RECORD_LEN: usize = 1024 * 1024;

/// Durable store: a file of length-prefixed bincode records.
///
/// Every append is synced before returning. A torn trailing record, left by a
/// crash in the middle of an append, is cut off when the log is opened so the
/// next append starts on a record boundary.
pub struct FileAuditStore {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileAuditStore {
    /// Open or create the log file at `path`, truncating a torn tail.
    pub fn open(path: &Path) -> Result<Self, SyncError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;

        let (records, valid_len) = read_records(&mut file)?;
        let file_len = file.metadata()?.len();
        if valid_len < file_len {
            warn!(
                path = %path.display(),
                records = records.len(),
                dropped_bytes = file_len - valid_len,
                "truncating torn audit record at end of log"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Vec<AuditEvent>, SyncError> {
        let mut file = File::open(&self.path)?;
        let (records, _) = read_records(&mut file)?;
        records
            .iter()
            .map(|record| bincode::deserialize(record).map_err(SyncError::from))
            .collect()
    }
}

/// Complete records from the start of `file`, and the offset where the last
/// one ends. Reading stops at the first short or oversized record.
fn read_records(file: &mut File) -> Result<(Vec<Vec<u8>>, u64), SyncError> {
    file.seek(SeekFrom::Start(0))?;
    let mut reader = BufReader::new(file);
    let mut records = Vec::new();
    let mut valid_len = 0u64;
    loop {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(SyncError::Io(e)),
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_RECORD_LEN {
            break;
        }
        let mut record = vec![0u8; len];
        match reader.read_exact(&mut record) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(SyncError::Io(e)),
        }
        valid_len += 4 + len as u64;
        records.push(record);
    }
    Ok((records, valid_len))
}

impl AuditStore for FileAuditStore {
    fn append(&self, event: &AuditEvent) -> Result<(), SyncError> {
        let encoded = bincode::serialize(event)?;
        if encoded.len() > MAX_RECORD_LEN {
            return Err(SyncError::Audit {
                msg: format!("event record of {} bytes exceeds the log limit", encoded.len()),
            });
        }
        let len_bytes = (encoded.len() as u32).to_le_bytes();
        let mut file = self
            .file
            .lock()
            .map_err(|e| SyncError::Audit { msg: e.to_string() })?;
        file.write_all(&len_bytes)?;
        file.write_all(&encoded)?;
        file.sync_all()?;
        Ok(())
    }

    fn query(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        scope: &Scope,
    ) -> Result<Vec<AuditEvent>, SyncError> {
        // hold the writer lock so no append is half-visible
        let _guard = self
            .file
            .lock()
            .map_err(|e| SyncError::Audit { msg: e.to_string() })?;
        let events = self.read_all()?;
        Ok(sorted(
            events
                .into_iter()
                .filter(|e| e.matches(from, to, scope))
                .collect(),
        ))
    }
}

/// Front door to an [`AuditStore`] with the recording policy applied.
#[derive(Clone)]
pub struct AuditTrail {
    store: Arc<dyn AuditStore>,
}

impl AuditTrail {
    /// Wrap a store.
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Record an event. Failures are logged and swallowed.
    pub fn record(&self, event: AuditEvent) {
        match self.store.append(&event) {
            Ok(()) => debug!(
                resource = %event.resource_id,
                change = ?event.change_type,
                scopes = event.scopes.len(),
                "audit event recorded"
            ),
            Err(e) => warn!(
                resource = %event.resource_id,
                change = ?event.change_type,
                error = %e,
                "failed to record audit event"
            ),
        }
    }

    /// Events for `scope` in `[from, to]`; `to = None` means now.
    pub fn query(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        scope: &Scope,
    ) -> Result<Vec<AuditEvent>, SyncError> {
        let to = to.unwrap_or_else(Utc::now);
        self.store.query(from, Some(to), scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ts;

    fn event(id: &str, secs: i64, scopes: Vec<Scope>) -> AuditEvent {
        AuditEvent::new(id, ResourceType::Item, ChangeType::Update, ts(secs), scopes)
    }

    struct FailingStore;

    impl AuditStore for FailingStore {
        fn append(&self, _event: &AuditEvent) -> Result<(), SyncError> {
            Err(SyncError::Audit {
                msg: "index offline".to_string(),
            })
        }

        fn query(
            &self,
            _from: Option<DateTime<Utc>>,
            _to: Option<DateTime<Utc>>,
            _scope: &Scope,
        ) -> Result<Vec<AuditEvent>, SyncError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn query_filters_by_scope() {
        let store = MemoryAuditStore::new();
        store.append(&event("a", 10, vec![Scope::Site])).unwrap();
        store
            .append(&event("b", 11, vec![Scope::container("1/2")]))
            .unwrap();
        store
            .append(&event("c", 12, vec![Scope::Site, Scope::container("1/2")]))
            .unwrap();

        let site = store.query(None, None, &Scope::Site).unwrap();
        let coll = store.query(None, None, &Scope::container("1/2")).unwrap();
        assert_eq!(
            site.iter().map(|e| e.resource_id.as_str()).collect::<Vec<_>>(),
            vec!["a", "c"]
        );
        assert_eq!(
            coll.iter().map(|e| e.resource_id.as_str()).collect::<Vec<_>>(),
            vec!["b", "c"]
        );
    }

    #[test]
    fn query_bounds_are_inclusive() {
        let store = MemoryAuditStore::new();
        for (id, secs) in [("a", 10), ("b", 20), ("c", 30)] {
            store.append(&event(id, secs, vec![Scope::Site])).unwrap();
        }
        let hits = store
            .query(Some(ts(10)), Some(ts(20)), &Scope::Site)
            .unwrap();
        assert_eq!(hits.len(), 2);
        let open_start = store.query(None, Some(ts(10)), &Scope::Site).unwrap();
        assert_eq!(open_start.len(), 1);
    }

    #[test]
    fn query_orders_by_timestamp_keeping_append_order_for_ties() {
        let store = MemoryAuditStore::new();
        store.append(&event("late", 30, vec![Scope::Site])).unwrap();
        store.append(&event("tie1", 20, vec![Scope::Site])).unwrap();
        store.append(&event("tie2", 20, vec![Scope::Site])).unwrap();
        store.append(&event("early", 10, vec![Scope::Site])).unwrap();

        let ids: Vec<_> = store
            .query(None, None, &Scope::Site)
            .unwrap()
            .into_iter()
            .map(|e| e.resource_id)
            .collect();
        assert_eq!(ids, vec!["early", "tie1", "tie2", "late"]);
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit").join("events.log");
        {
            let store = FileAuditStore::open(&path).unwrap();
            let mut ev = event("a", 10, vec![Scope::Site, Scope::container("1/2")]);
            ev.handle = Some("1/9".to_string());
            ev.extra_identifiers = vec!["3".to_string(), "paper.pdf".to_string()];
            store.append(&ev).unwrap();
            store.append(&event("b", 5, vec![Scope::Site])).unwrap();
        }

        let store = FileAuditStore::open(&path).unwrap();
        let events = store.query(None, None, &Scope::Site).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].resource_id, "b");
        assert_eq!(events[1].bitstream_sequence(), Some(3));
        assert_eq!(events[1].bitstream_name(), Some("paper.pdf"));
        assert_eq!(events[1].handle.as_deref(), Some("1/9"));
        assert!(events[1].scopes.contains(&Scope::container("1/2")));
    }

    #[test]
    fn file_store_skips_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");
        {
            let store = FileAuditStore::open(&path).unwrap();
            store.append(&event("a", 10, vec![Scope::Site])).unwrap();
        }
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&100u32.to_le_bytes()).unwrap();
            file.write_all(&[1, 2, 3]).unwrap();
        }

        let store = FileAuditStore::open(&path).unwrap();
        let events = store.query(None, None, &Scope::Site).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn append_after_torn_tail_is_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");
        {
            let store = FileAuditStore::open(&path).unwrap();
            store.append(&event("a", 10, vec![Scope::Site])).unwrap();
        }
        let intact_len = fs::metadata(&path).unwrap().len();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&100u32.to_le_bytes()).unwrap();
            file.write_all(&[1, 2, 3]).unwrap();
        }

        let store = FileAuditStore::open(&path).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), intact_len);
        store.append(&event("b", 20, vec![Scope::Site])).unwrap();
        drop(store);

        let store = FileAuditStore::open(&path).unwrap();
        let ids: Vec<_> = store
            .query(None, None, &Scope::Site)
            .unwrap()
            .into_iter()
            .map(|e| e.resource_id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn oversized_length_prefix_is_treated_as_torn() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");
        {
            let store = FileAuditStore::open(&path).unwrap();
            store.append(&event("a", 10, vec![Scope::Site])).unwrap();
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&u32::MAX.to_le_bytes()).unwrap();
            file.write_all(&[0; 16]).unwrap();
        }

        let store = FileAuditStore::open(&path).unwrap();
        store.append(&event("b", 20, vec![Scope::Site])).unwrap();
        assert_eq!(store.query(None, None, &Scope::Site).unwrap().len(), 2);
    }

    #[test]
    fn trail_swallows_store_failures() {
        let trail = AuditTrail::new(Arc::new(FailingStore));
        trail.record(event("a", 10, vec![Scope::Site]));
        assert!(trail.query(None, None, &Scope::Site).unwrap().is_empty());
    }

    #[test]
    fn trail_open_end_means_now() {
        let store = Arc::new(MemoryAuditStore::new());
        let trail = AuditTrail::new(store.clone());
        trail.record(event("past", 10, vec![Scope::Site]));
        trail.record(AuditEvent::new(
            "future",
            ResourceType::Item,
            ChangeType::Create,
            Utc::now() + chrono::Duration::days(1),
            vec![Scope::Site],
        ));
        assert_eq!(store.event_count(), 2);
        let events = trail.query(None, None, &Scope::Site).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].resource_id, "past");
    }
}
