use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::db::{self, DbError, DbPool, Row, Snapshot, TableDescriptor, TableName};
use crate::editor::persist::{persist, PersistOutcome};
use crate::editor::reconcile::{has_changes, reconcile, ChangeSet};
use crate::errors::{EditorError, EditorResult};

/// Editing state of one table: what the store held at load time, what the
/// user has sent since, and whether the two differ.
#[derive(Debug, Clone)]
pub struct TableSession {
    descriptor: TableDescriptor,
    last_snapshot: Option<Snapshot>,
    pending_edits: Option<Vec<Row>>,
    dirty: bool,
}

impl TableSession {
    pub fn new(descriptor: TableDescriptor) -> Self {
        Self {
            descriptor,
            last_snapshot: None,
            pending_edits: None,
            dirty: false,
        }
    }

    pub fn descriptor(&self) -> &TableDescriptor {
        &self.descriptor
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.last_snapshot.as_ref()
    }

    pub fn pending_edits(&self) -> Option<&[Row]> {
        self.pending_edits.as_deref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Starts a new edit cycle from `snapshot`; pending edits are dropped.
    pub fn replace_snapshot(&mut self, snapshot: Snapshot) {
        self.last_snapshot = Some(snapshot);
        self.pending_edits = None;
        self.dirty = false;
    }

    /// Records the user's current rows and returns the new dirty flag.
    pub fn set_edits(&mut self, rows: Vec<Row>) -> EditorResult<bool> {
        let snapshot = self.last_snapshot.as_ref().ok_or_else(|| {
            EditorError::Rejected(format!(
                "table {} must be loaded before it can be edited",
                self.descriptor.name.table
            ))
        })?;
        self.dirty = has_changes(&snapshot.rows, &rows);
        self.pending_edits = Some(rows);
        Ok(self.dirty)
    }

    /// Converts JSON rows from the client into typed rows for this table.
    pub fn rows_from_json(&self, rows: &[serde_json::Value]) -> EditorResult<Vec<Row>> {
        rows.iter()
            .map(|object| {
                db::row_from_json(&self.descriptor, object).map_err(|e| match e {
                    DbError::Decode(msg) => EditorError::Rejected(msg),
                    other => EditorError::persistence(&self.descriptor.name, other),
                })
            })
            .collect()
    }

    /// Computes the change set for a save. Fails, without touching any
    /// state, if the table is read-only or nothing changed.
    pub fn prepare_save(&self) -> EditorResult<ChangeSet> {
        let table = &self.descriptor;
        if !table.is_editable() {
            return Err(EditorError::Metadata(table.name.table.clone()));
        }
        let (Some(snapshot), Some(edited)) = (&self.last_snapshot, &self.pending_edits) else {
            return Err(EditorError::NoChanges(table.name.table.clone()));
        };
        if !self.dirty {
            return Err(EditorError::NoChanges(table.name.table.clone()));
        }

        let changes = reconcile(&snapshot.rows, edited, &table.primary_keys);
        changes
            .validate_keys(&table.primary_keys)
            .map_err(EditorError::Rejected)?;
        Ok(changes)
    }

    pub async fn reload(&mut self, db: DbPool<'_>) -> EditorResult<&Snapshot> {
        let snapshot = db::load_snapshot(db, &self.descriptor)
            .await
            .map_err(|e| EditorError::load(&self.descriptor.name.table, e))?;
        tracing::info!(table = %self.descriptor.name, rows = snapshot.len(), "table loaded");
        self.pending_edits = None;
        self.dirty = false;
        Ok(self.last_snapshot.insert(snapshot))
    }

    /// Reconciles pending edits against the snapshot and persists them.
    /// On failure the pending edits stay in place so the user can retry.
    pub async fn save(&mut self, db: DbPool<'_>) -> EditorResult<PersistOutcome> {
        let changes = self.prepare_save()?;

        let outcome = match persist(db, &self.descriptor, &changes).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(table = %self.descriptor.name, "{}", err);
                return Err(err);
            }
        };

        self.last_snapshot = None;
        self.pending_edits = None;
        self.dirty = false;
        if let Err(err) = self.reload(db).await {
            tracing::warn!(table = %self.descriptor.name, "reload after save failed: {}", err);
        }
        Ok(outcome)
    }
}

/// All tables one user has open, keyed by table name.
#[derive(Debug, Default)]
pub struct EditorSession {
    tables: HashMap<String, TableSession>,
}

impl EditorSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, name: &str) -> Option<&TableSession> {
        self.tables.get(name)
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut TableSession> {
        self.tables.get_mut(name)
    }

    /// Opens `descriptor` for editing. A table already open keeps its
    /// state unless its shape changed underneath it.
    pub fn open(&mut self, descriptor: TableDescriptor) -> &mut TableSession {
        let key = descriptor.name.table.clone();
        let table = self
            .tables
            .entry(key)
            .or_insert_with(|| TableSession::new(descriptor.clone()));
        let same_shape = table.descriptor.primary_keys == descriptor.primary_keys
            && table.descriptor.column_names().eq(descriptor.column_names());
        if !same_shape {
            *table = TableSession::new(descriptor);
        }
        table
    }

    pub fn open_tables(&self) -> impl Iterator<Item = &TableName> {
        self.tables.values().map(|t| &t.descriptor.name)
    }
}

struct SessionEntry {
    session: Arc<tokio::sync::Mutex<EditorSession>>,
    last_seen: Instant,
}

/// Editor sessions by browser session id.
pub struct SessionStore {
    entries: Mutex<HashMap<Uuid, SessionEntry>>,
    max_idle: Duration,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.entries.lock().len())
            .field("max_idle", &self.max_idle)
            .finish()
    }
}

impl SessionStore {
    pub fn new(max_idle: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_idle,
        }
    }

    /// Returns the session for `id`, creating it if needed. Sessions idle
    /// longer than `max_idle` are dropped on the way.
    pub fn get_or_create(&self, id: Uuid) -> Arc<tokio::sync::Mutex<EditorSession>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let max_idle = self.max_idle;
        entries.retain(|key, entry| *key == id || now.duration_since(entry.last_seen) < max_idle);

        let entry = entries.entry(id).or_insert_with(|| SessionEntry {
            session: Arc::new(tokio::sync::Mutex::new(EditorSession::new())),
            last_seen: now,
        });
        entry.last_seen = now;
        entry.session.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
