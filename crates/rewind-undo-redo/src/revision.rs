//! Per-entity revision chain: point lookup and retention

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::entity::EntityId;
use crate::error::UndoRedoError;
use crate::log::UndoLog;
use crate::record::Record;

/// Retention options for [`UndoLog::truncate_revisions`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TruncateOptions {
    /// Number of newest revisions to keep
    pub limit: Option<usize>,
    /// Only revisions at least this old are eligible
    pub minimum_age: Option<Duration>,
}

impl TruncateOptions {
    /// Keep the `limit` newest revisions
    pub fn keep(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            minimum_age: None,
        }
    }

    /// Drop every revision at least `minimum_age` old
    pub fn older_than(minimum_age: Duration) -> Self {
        Self {
            limit: None,
            minimum_age: Some(minimum_age),
        }
    }

    /// Restrict to revisions at least `minimum_age` old
    pub fn with_minimum_age(mut self, minimum_age: Duration) -> Self {
        self.minimum_age = Some(minimum_age);
        self
    }

    fn is_empty(&self) -> bool {
        self.limit.is_none() && self.minimum_age.is_none()
    }
}

impl UndoLog {
    /// Exact revision lookup
    pub fn find_revision(
        &self,
        entity_type: &str,
        entity_id: EntityId,
        revision: u64,
    ) -> Result<Record, UndoRedoError> {
        self.read(|tables| tables.record_at_revision(entity_type, entity_id, revision).cloned())
            .ok_or_else(|| UndoRedoError::revision_not_found(entity_type, entity_id, revision))
    }

    /// Every stored revision of an entity, oldest first
    pub fn revisions(&self, entity_type: &str, entity_id: EntityId) -> Vec<Record> {
        self.read(|tables| {
            tables
                .revisions_of(entity_type, entity_id)
                .into_iter()
                .cloned()
                .collect()
        })
    }

    /// Delete old revisions of one entity; returns how many were deleted
    pub fn truncate_revisions(
        &self,
        entity_type: &str,
        entity_id: EntityId,
        options: TruncateOptions,
    ) -> Result<usize, UndoRedoError> {
        self.truncate_revisions_at(entity_type, entity_id, options, Utc::now())
    }

    /// [`truncate_revisions`](Self::truncate_revisions) with an explicit clock.
    ///
    /// Eligible revisions (all of them, or those created at or before
    /// `now - minimum_age`) are ordered newest first; the one at offset
    /// `limit` (0 without a limit) is the cutoff and every revision up to and
    /// including it is deleted. Nothing happens when there is no such offset.
    pub fn truncate_revisions_at(
        &self,
        entity_type: &str,
        entity_id: EntityId,
        options: TruncateOptions,
        now: DateTime<Utc>,
    ) -> Result<usize, UndoRedoError> {
        if options.is_empty() {
            return Ok(0);
        }
        let threshold = match options.minimum_age {
            Some(age) => match now.checked_sub_signed(age) {
                Some(threshold) => Some(threshold),
                None => {
                    debug!(entity_type, entity_id, "minimum age reaches past the earliest time");
                    return Ok(0);
                }
            },
            None => None,
        };

        self.write(|tables| {
            let mut eligible: Vec<u64> = tables
                .revisions_of(entity_type, entity_id)
                .into_iter()
                .filter(|r| threshold.map_or(true, |t| r.created_at <= t))
                .map(|r| r.revision)
                .collect();
            eligible.reverse();

            let Some(&cutoff) = eligible.get(options.limit.unwrap_or(0)) else {
                debug!(entity_type, entity_id, eligible = eligible.len(), "nothing to truncate");
                return Ok(0);
            };
            let deleted = tables.delete_revisions_through(entity_type, entity_id, cutoff);
            warn!(entity_type, entity_id, cutoff, deleted, "truncated revisions");
            Ok(deleted)
        })
    }
}
