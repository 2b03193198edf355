//! Durable undo log
//!
//! Three record sets mirror the persisted layout: `undo_managers`,
//! `undo_actions` and `undo_records`. [`UndoLog`] applies every write to a
//! copy of the tables, hands the copy to its [`LogBackend`] and swaps it in
//! only once the backend has accepted it, so a write is committed whole or
//! not at all.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::UndoConfig;
use crate::entity::EntityId;
use crate::error::UndoRedoError;
use crate::record::Record;

/// Row of `undo_managers`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerRow {
    /// Manager id
    pub id: u64,
    /// Cursor; -1 when nothing can be undone
    pub current_action_index: i64,
}

/// Row of `undo_actions`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRow {
    /// Action id
    pub id: u64,
    /// Owning manager
    pub undo_manager_id: u64,
    /// Label given to the change
    pub description: String,
    /// Position in the manager's action list
    pub ordinal: usize,
}

type RevisionKey = (String, EntityId);

/// The three record sets plus id counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogTables {
    undo_managers: BTreeMap<u64, ManagerRow>,
    undo_actions: BTreeMap<u64, ActionRow>,
    undo_records: BTreeMap<u64, Record>,
    next_manager_id: u64,
    next_action_id: u64,
    next_record_id: u64,
    /// (type, id) -> revision -> record id; rebuilt after loading
    #[serde(skip)]
    revisions: BTreeMap<RevisionKey, BTreeMap<u64, u64>>,
}

impl LogTables {
    fn rebuild_index(&mut self) {
        self.revisions.clear();
        for record in self.undo_records.values() {
            self.revisions
                .entry((record.entity_type.clone(), record.entity_id))
                .or_default()
                .insert(record.revision, record.id);
        }
    }

    /// New manager with an empty history
    pub fn insert_manager(&mut self) -> ManagerRow {
        self.next_manager_id += 1;
        let row = ManagerRow {
            id: self.next_manager_id,
            current_action_index: -1,
        };
        self.undo_managers.insert(row.id, row.clone());
        row
    }

    /// Manager row by id
    pub fn manager(&self, id: u64) -> Option<&ManagerRow> {
        self.undo_managers.get(&id)
    }

    /// Move a manager's cursor; -1 means nothing to undo
    pub fn set_cursor(&mut self, manager_id: u64, current_action_index: i64) -> Result<(), UndoRedoError> {
        let row = self
            .undo_managers
            .get_mut(&manager_id)
            .ok_or(UndoRedoError::ManagerNotFound(manager_id))?;
        row.current_action_index = current_action_index;
        Ok(())
    }

    /// Delete a manager with all of its actions and their records
    pub fn delete_manager(&mut self, manager_id: u64) -> Result<(), UndoRedoError> {
        self.undo_managers
            .remove(&manager_id)
            .ok_or(UndoRedoError::ManagerNotFound(manager_id))?;
        let owned: Vec<u64> = self.actions_of(manager_id).iter().map(|a| a.id).collect();
        for action_id in owned {
            self.delete_action(action_id);
        }
        Ok(())
    }

    /// Actions of a manager ordered by ordinal
    pub fn actions_of(&self, manager_id: u64) -> Vec<&ActionRow> {
        let mut actions: Vec<&ActionRow> = self
            .undo_actions
            .values()
            .filter(|a| a.undo_manager_id == manager_id)
            .collect();
        actions.sort_by_key(|a| a.ordinal);
        actions
    }

    /// Append an empty action row
    pub fn insert_action(&mut self, manager_id: u64, description: String, ordinal: usize) -> ActionRow {
        self.next_action_id += 1;
        let row = ActionRow {
            id: self.next_action_id,
            undo_manager_id: manager_id,
            description,
            ordinal,
        };
        self.undo_actions.insert(row.id, row.clone());
        row
    }

    /// Delete an action and its records
    pub fn delete_action(&mut self, action_id: u64) {
        self.undo_actions.remove(&action_id);
        let owned: Vec<u64> = self
            .undo_records
            .values()
            .filter(|r| r.undo_action_id == action_id)
            .map(|r| r.id)
            .collect();
        for record_id in owned {
            self.delete_record(record_id);
        }
    }

    /// Records of an action in the order they were appended
    pub fn records_of(&self, action_id: u64) -> Vec<&Record> {
        self.undo_records
            .values()
            .filter(|r| r.undo_action_id == action_id)
            .collect()
    }

    /// Insert a record, assigning its id.
    ///
    /// Enforces uniqueness of (type, id, revision).
    pub fn insert_record(&mut self, mut record: Record) -> Result<Record, UndoRedoError> {
        let key = (record.entity_type.clone(), record.entity_id);
        if self
            .revisions
            .get(&key)
            .is_some_and(|chain| chain.contains_key(&record.revision))
        {
            return Err(UndoRedoError::DuplicateRevision {
                entity_type: record.entity_type,
                entity_id: record.entity_id,
                revision: record.revision,
            });
        }
        self.next_record_id += 1;
        record.id = self.next_record_id;
        self.revisions
            .entry(key)
            .or_default()
            .insert(record.revision, record.id);
        self.undo_records.insert(record.id, record.clone());
        Ok(record)
    }

    fn delete_record(&mut self, record_id: u64) {
        if let Some(record) = self.undo_records.remove(&record_id) {
            let key = (record.entity_type, record.entity_id);
            if let Some(chain) = self.revisions.get_mut(&key) {
                chain.remove(&record.revision);
                if chain.is_empty() {
                    self.revisions.remove(&key);
                }
            }
        }
    }

    /// Highest revision currently recorded for an entity
    pub fn max_revision(&self, entity_type: &str, entity_id: EntityId) -> Option<u64> {
        self.revisions
            .get(&(entity_type.to_string(), entity_id))
            .and_then(|chain| chain.keys().next_back().copied())
    }

    /// Exact revision lookup
    pub fn record_at_revision(&self, entity_type: &str, entity_id: EntityId, revision: u64) -> Option<&Record> {
        self.revisions
            .get(&(entity_type.to_string(), entity_id))
            .and_then(|chain| chain.get(&revision))
            .and_then(|record_id| self.undo_records.get(record_id))
    }

    /// All records of an entity, oldest revision first
    pub fn revisions_of(&self, entity_type: &str, entity_id: EntityId) -> Vec<&Record> {
        self.revisions
            .get(&(entity_type.to_string(), entity_id))
            .map(|chain| {
                chain
                    .values()
                    .filter_map(|record_id| self.undo_records.get(record_id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Delete every record of an entity with revision <= `through`
    pub fn delete_revisions_through(&mut self, entity_type: &str, entity_id: EntityId, through: u64) -> usize {
        let doomed: Vec<u64> = self
            .revisions
            .get(&(entity_type.to_string(), entity_id))
            .map(|chain| chain.range(..=through).map(|(_, &record_id)| record_id).collect())
            .unwrap_or_default();
        for &record_id in &doomed {
            self.delete_record(record_id);
        }
        doomed.len()
    }

    /// Total number of stored records
    pub fn record_count(&self) -> usize {
        self.undo_records.len()
    }
}

/// Where committed tables are kept
pub trait LogBackend: Send + Sync {
    /// Tables committed so far
    fn load(&self) -> Result<LogTables, UndoRedoError>;
    /// Durably store the next committed state
    fn persist(&self, tables: &LogTables) -> Result<(), UndoRedoError>;
}

/// No durability; the log lives as long as the process
#[derive(Debug, Default)]
pub struct MemoryBackend;

impl LogBackend for MemoryBackend {
    fn load(&self) -> Result<LogTables, UndoRedoError> {
        Ok(LogTables::default())
    }

    fn persist(&self, _tables: &LogTables) -> Result<(), UndoRedoError> {
        Ok(())
    }
}

/// Single JSON document replaced atomically on every commit
#[derive(Debug)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    /// Backend for the file at `path`, created on first save
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogBackend for JsonFileBackend {
    fn load(&self) -> Result<LogTables, UndoRedoError> {
        Ok(rewind_common::load_json_or_default(&self.path)?)
    }

    fn persist(&self, tables: &LogTables) -> Result<(), UndoRedoError> {
        rewind_common::save_json_atomic(&self.path, tables)?;
        Ok(())
    }
}

/// Shared, transactional undo log
pub struct UndoLog {
    tables: RwLock<LogTables>,
    backend: Box<dyn LogBackend>,
}

impl UndoLog {
    /// Log without durability
    pub fn in_memory() -> Self {
        Self {
            tables: RwLock::new(LogTables::default()),
            backend: Box::new(MemoryBackend),
        }
    }

    /// Log kept in a JSON file, loading whatever was committed before
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, UndoRedoError> {
        Self::with_backend(Box::new(JsonFileBackend::new(path)))
    }

    /// Log over any backend
    pub fn with_backend(backend: Box<dyn LogBackend>) -> Result<Self, UndoRedoError> {
        let mut tables = backend.load()?;
        tables.rebuild_index();
        debug!(records = tables.record_count(), "undo log loaded");
        Ok(Self {
            tables: RwLock::new(tables),
            backend,
        })
    }

    /// Log as described by `config.log_path`
    pub fn from_config(config: &UndoConfig) -> Result<Self, UndoRedoError> {
        match &config.log_path {
            Some(path) => Self::open(path.clone()),
            None => Ok(Self::in_memory()),
        }
    }

    /// Run `f` against the committed tables
    pub fn read<R>(&self, f: impl FnOnce(&LogTables) -> R) -> R {
        f(&self.tables.read())
    }

    /// Run `f` against a draft and commit the draft only if `f` and the
    /// backend both succeed.
    ///
    /// `f` must not call back into this log.
    pub fn write<R>(&self, f: impl FnOnce(&mut LogTables) -> Result<R, UndoRedoError>) -> Result<R, UndoRedoError> {
        let mut committed = self.tables.write();
        let mut draft = committed.clone();
        let out = f(&mut draft)?;
        self.backend.persist(&draft)?;
        *committed = draft;
        Ok(out)
    }
}

impl Default for UndoLog {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Operation;
    use chrono::Utc;
    use tempfile::tempdir;

    fn record(action_id: u64, entity_id: EntityId, revision: u64) -> Record {
        Record {
            id: 0,
            undo_action_id: action_id,
            operation: Operation::Update,
            entity_type: "Person".into(),
            entity_id,
            revision,
            data: vec![1, 2, 3],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_uniqueness_constraint() {
        let mut tables = LogTables::default();
        tables.insert_record(record(1, 1, 1)).unwrap();
        tables.insert_record(record(1, 2, 1)).unwrap();
        let err = tables.insert_record(record(2, 1, 1)).unwrap_err();
        assert!(matches!(err, UndoRedoError::DuplicateRevision { revision: 1, .. }));
        assert_eq!(tables.max_revision("Person", 1), Some(1));
        assert_eq!(tables.max_revision("Person", 3), None);
    }

    #[test]
    fn test_delete_manager_cascades() {
        let mut tables = LogTables::default();
        let manager = tables.insert_manager();
        let other = tables.insert_manager();
        let a = tables.insert_action(manager.id, "a".into(), 0);
        let b = tables.insert_action(other.id, "b".into(), 0);
        tables.insert_record(record(a.id, 1, 1)).unwrap();
        tables.insert_record(record(b.id, 1, 2)).unwrap();

        tables.delete_manager(manager.id).unwrap();
        assert!(tables.manager(manager.id).is_none());
        assert!(tables.actions_of(manager.id).is_empty());
        assert_eq!(tables.record_count(), 1);
        assert_eq!(tables.max_revision("Person", 1), Some(2));
    }

    #[test]
    fn test_failed_write_leaves_log_untouched() {
        let log = UndoLog::in_memory();
        let result: Result<(), UndoRedoError> = log.write(|tables| {
            tables.insert_manager();
            Err(UndoRedoError::validation_error("boom"))
        });
        assert!(result.is_err());
        assert!(log.read(|t| t.manager(1).is_none()));
    }

    struct RejectingBackend;

    impl LogBackend for RejectingBackend {
        fn load(&self) -> Result<LogTables, UndoRedoError> {
            Ok(LogTables::default())
        }
        fn persist(&self, _tables: &LogTables) -> Result<(), UndoRedoError> {
            Err(UndoRedoError::IoError(std::io::Error::new(std::io::ErrorKind::Other, "disk full")))
        }
    }

    #[test]
    fn test_failed_persist_leaves_log_untouched() {
        let log = UndoLog::with_backend(Box::new(RejectingBackend)).unwrap();
        assert!(log.write(|tables| Ok(tables.insert_manager())).is_err());
        assert!(log.read(|t| t.manager(1).is_none()));
    }

    #[test]
    fn test_file_log_reloads_with_index() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("undo-log.json");
        {
            let log = UndoLog::open(&path).unwrap();
            log.write(|tables| {
                let manager = tables.insert_manager();
                let action = tables.insert_action(manager.id, "create".into(), 0);
                tables.set_cursor(manager.id, 0)?;
                tables.insert_record(record(action.id, 5, 1))?;
                tables.insert_record(record(action.id, 5, 2))?;
                Ok(())
            })
            .unwrap();
        }

        let reopened = UndoLog::open(&path).unwrap();
        reopened.read(|tables| {
            assert_eq!(tables.manager(1).unwrap().current_action_index, 0);
            assert_eq!(tables.max_revision("Person", 5), Some(2));
            let rev = tables.record_at_revision("Person", 5, 1).unwrap();
            assert_eq!(rev.data, vec![1, 2, 3]);
        });
    }

    #[test]
    fn test_delete_revisions_through() {
        let mut tables = LogTables::default();
        for revision in 1..=4 {
            tables.insert_record(record(1, 1, revision)).unwrap();
        }
        assert_eq!(tables.delete_revisions_through("Person", 1, 2), 2);
        let left: Vec<u64> = tables.revisions_of("Person", 1).iter().map(|r| r.revision).collect();
        assert_eq!(left, vec![3, 4]);
    }
}
