//! Shared, append-only run result.
//!
//! A [`RunResult`] is written by exactly one supervising task and read by any
//! number of viewers. Records are only ever appended, in strictly increasing
//! sequence order, and the result is sealed once it reaches a terminal
//! status. Clones share the same underlying state.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use navigator_core::types::now;
use navigator_core::{EventRecord, RunId, RunStatus};
use tracing::{debug, warn};

use crate::launcher::ExitStatus;

#[derive(Debug)]
struct RunState {
    run_id: RunId,
    records: Vec<EventRecord>,
    status: RunStatus,
    exit: Option<ExitStatus>,
    cancel_requested: bool,
    sealed: bool,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

/// Records and status of one run, live or replayed.
#[derive(Debug, Clone)]
pub struct RunResult {
    inner: Arc<RwLock<RunState>>,
}

impl RunResult {
    /// Create an empty, running result.
    pub fn new(run_id: impl Into<RunId>) -> Self {
        Self::from_state(RunState {
            run_id: run_id.into(),
            records: Vec::new(),
            status: RunStatus::Running,
            exit: None,
            cancel_requested: false,
            sealed: false,
            started_at: now(),
            finished_at: None,
        })
    }

    /// Create a sealed result from existing records, such as a replay.
    pub fn from_records(
        run_id: impl Into<RunId>,
        records: Vec<EventRecord>,
        status: RunStatus,
        exit: Option<ExitStatus>,
    ) -> Self {
        let started_at = records.first().map(|r| r.timestamp).unwrap_or_else(now);
        let finished_at = records.last().map(|r| r.timestamp);
        Self::from_state(RunState {
            run_id: run_id.into(),
            records,
            status,
            exit,
            cancel_requested: false,
            sealed: true,
            started_at,
            finished_at,
        })
    }

    fn from_state(state: RunState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RunState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RunState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn run_id(&self) -> RunId {
        self.read().run_id.clone()
    }

    pub fn status(&self) -> RunStatus {
        self.read().status
    }

    /// Exit status of the child, when it was reaped.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.read().exit
    }

    /// Returns true once no further records can be appended.
    pub fn is_sealed(&self) -> bool {
        self.read().sealed
    }

    pub fn cancel_requested(&self) -> bool {
        self.read().cancel_requested
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.read().started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.read().finished_at
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().records.is_empty()
    }

    /// Records at positions `cursor..`, in sequence order.
    pub fn records_since(&self, cursor: usize) -> Vec<EventRecord> {
        let state = self.read();
        state.records.get(cursor..).map(<[_]>::to_vec).unwrap_or_default()
    }

    /// Copy of every record.
    pub fn snapshot(&self) -> Vec<EventRecord> {
        self.read().records.clone()
    }

    /// Run `f` over the records without copying them.
    pub fn with_records<R>(&self, f: impl FnOnce(&[EventRecord]) -> R) -> R {
        f(&self.read().records)
    }

    /// Append a record. Returns false if it was rejected.
    ///
    /// Records are rejected once the result is sealed or cancellation was
    /// requested, and when their sequence number does not increase.
    pub(crate) fn append(&self, record: EventRecord) -> bool {
        let mut state = self.write();
        if state.sealed || state.cancel_requested {
            return false;
        }
        if let Some(last) = state.records.last() {
            if record.seq <= last.seq {
                warn!(
                    run_id = %state.run_id,
                    seq = record.seq,
                    last = last.seq,
                    "Dropping out-of-order record"
                );
                return false;
            }
        }
        state.records.push(record);
        true
    }

    /// Mark cancellation. Returns true the first time on a live result.
    pub(crate) fn request_cancel(&self) -> bool {
        let mut state = self.write();
        if state.sealed || state.cancel_requested {
            return false;
        }
        state.cancel_requested = true;
        true
    }

    /// Seal the result with a terminal status.
    ///
    /// Cancellation takes precedence over `status`. A result that is already
    /// sealed keeps its status. Returns the final status.
    pub(crate) fn finish(&self, status: RunStatus, exit: Option<ExitStatus>) -> RunStatus {
        let mut state = self.write();
        if state.sealed {
            return state.status;
        }

        state.status = if state.cancel_requested {
            RunStatus::Canceled
        } else if status.is_terminal() {
            status
        } else {
            RunStatus::Failed
        };
        state.exit = exit;
        state.sealed = true;
        state.finished_at = Some(now());
        debug!(run_id = %state.run_id, status = %state.status, records = state.records.len(), "Run sealed");
        state.status
    }
}
