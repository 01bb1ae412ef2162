//! Durable state store
//!
//! Persists the one record the engine must not lose across restarts:
//! the current open goal, plus the per-job last-completed marks the
//! startup catch-up policy reads. Conceptually a single-row store,
//! not a log.
//!
//! Crash safety: every mutation serializes the full record to a
//! sibling `.tmp` file and atomically renames it over the live file.
//! A crash mid-write leaves either the old record or the new one on
//! disk, never a torn mix. A present-but-unparseable file is reported
//! as corruption and aborts startup instead of silently becoming
//! "no goal".

use crate::errors::EngineError;
use crate::schedule::JobKind;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Free-text intention captured at the end of a daily session and
/// surfaced at the start of the next day's session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    /// The date the goal applies to (the day after it was captured).
    pub for_date: NaiveDate,
    pub text: String,
}

/// Local dates of the most recently completed session per job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CompletionMarks {
    daily: Option<NaiveDate>,
    weekly: Option<NaiveDate>,
}

/// The full persisted record, replaced atomically on each update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StateRecord {
    current_goal: Option<Goal>,
    #[serde(default)]
    last_completed: CompletionMarks,
}

/// Owner of the persisted record. Held exclusively by the
/// orchestrator; within-process reads and writes are serialized by
/// its mailbox, and this type never exposes partial state.
pub struct StateStore {
    path: PathBuf,
    record: StateRecord,
}

impl StateStore {
    /// Open the store at `path`, loading the existing record if one
    /// is present.
    ///
    /// A file that exists but cannot be parsed is corruption — fatal,
    /// surfaced to the operator rather than papered over.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let path = path.into();
        let record = if path.exists() {
            let contents = fs::read_to_string(&path)
                .map_err(|e| EngineError::Store(format!("failed to read {:?}: {}", path, e)))?;
            serde_json::from_str(&contents).map_err(|e| EngineError::PersistenceCorruption {
                path: path.clone(),
                reason: e.to_string(),
            })?
        } else {
            info!(path = ?path, "no state file yet, starting with empty record");
            StateRecord::default()
        };

        Ok(Self { path, record })
    }

    /// The goal applying to `date`, if the current goal matches it.
    pub fn goal_for(&self, date: NaiveDate) -> Option<&Goal> {
        self.record
            .current_goal
            .as_ref()
            .filter(|goal| goal.for_date == date)
    }

    /// The current goal regardless of date (status reporting).
    pub fn current_goal(&self) -> Option<&Goal> {
        self.record.current_goal.as_ref()
    }

    /// Replace the current goal. A new goal supersedes any goal stored
    /// for the same or an earlier date; there is never more than one
    /// live goal.
    pub fn set_goal(&mut self, goal: Goal) -> Result<(), EngineError> {
        debug!(for_date = %goal.for_date, "storing next goal");
        self.record.current_goal = Some(goal);
        self.flush()
    }

    /// Record that a session for `kind` completed on local date `date`.
    pub fn mark_completed(&mut self, kind: JobKind, date: NaiveDate) -> Result<(), EngineError> {
        match kind {
            JobKind::Daily => self.record.last_completed.daily = Some(date),
            JobKind::Weekly => self.record.last_completed.weekly = Some(date),
        }
        self.flush()
    }

    /// The local date of the most recently completed session for `kind`.
    pub fn last_completed(&self, kind: JobKind) -> Option<NaiveDate> {
        match kind {
            JobKind::Daily => self.record.last_completed.daily,
            JobKind::Weekly => self.record.last_completed.weekly,
        }
    }

    /// Write the full record to `<path>.tmp`, then atomically rename
    /// it over the live file.
    fn flush(&self) -> Result<(), EngineError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    EngineError::Store(format!("failed to create {:?}: {}", parent, e))
                })?;
            }
        }

        let tmp = tmp_path(&self.path);
        let payload = serde_json::to_vec_pretty(&self.record)
            .map_err(|e| EngineError::Store(format!("failed to serialize state: {}", e)))?;

        fs::write(&tmp, payload)
            .map_err(|e| EngineError::Store(format!("failed to write {:?}: {}", tmp, e)))?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            EngineError::Store(format!("failed to replace {:?}: {}", self.path, e))
        })?;

        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}
