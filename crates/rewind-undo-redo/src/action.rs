//! Actions: the records produced by one change scope

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::blob::BlobOptions;
use crate::error::{FieldError, UndoRedoError};
use crate::log::{ActionRow, LogTables, UndoLog};
use crate::record::{PendingMutation, Record};
use crate::store::EntityStore;

/// One undo/redo unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Log-assigned id
    pub id: u64,
    /// Label given to the change
    pub description: String,
    /// Index in the owning manager's action list
    pub ordinal: usize,
    /// Records in the order their mutations happened
    pub records: Vec<Record>,
}

impl Action {
    fn from_row(row: &ActionRow, records: Vec<Record>) -> Self {
        Self {
            id: row.id,
            description: row.description.clone(),
            ordinal: row.ordinal,
            records,
        }
    }

    /// Load an action with its records
    pub fn load(tables: &LogTables, row: &ActionRow) -> Self {
        let records = tables.records_of(row.id).into_iter().cloned().collect();
        Self::from_row(row, records)
    }

    /// Insert the action row and one record per pending mutation, in order
    pub(crate) fn record_mutations(
        tables: &mut LogTables,
        manager_id: u64,
        description: String,
        ordinal: usize,
        pending: &[PendingMutation],
        options: BlobOptions,
    ) -> Result<Self, UndoRedoError> {
        let row = tables.insert_action(manager_id, description, ordinal);
        let mut records = Vec::with_capacity(pending.len());
        for mutation in pending {
            let record = Record::build(tables, row.id, mutation, options)?;
            records.push(tables.insert_record(record)?);
        }
        Ok(Self::from_row(&row, records))
    }

    /// Undo every record, latest mutation first
    pub fn undo(&self, store: &dyn EntityStore, log: &UndoLog) -> Result<Vec<FieldError>, UndoRedoError> {
        debug!(action_id = self.id, records = self.records.len(), "undo action");
        let mut field_errors = Vec::new();
        for record in self.records.iter().rev() {
            field_errors.extend(record.undo(store, log)?);
        }
        Ok(field_errors)
    }

    /// Redo every record in the order the mutations first happened
    pub fn redo(&self, store: &dyn EntityStore) -> Result<Vec<FieldError>, UndoRedoError> {
        debug!(action_id = self.id, records = self.records.len(), "redo action");
        let mut field_errors = Vec::new();
        for record in &self.records {
            field_errors.extend(record.redo(store)?);
        }
        Ok(field_errors)
    }
}
