//! Transactional persistence seam.
//!
//! Every mutation follows the same shape: begin a [`Transaction`] holding
//! row locks, validate against the locked snapshot, act on the working copy,
//! then [`Store::commit`]. Dropping a transaction without committing rolls
//! it back, so a failure at any step leaves the committed state untouched.
//!
//! # Conflict model
//!
//! Row locks are taken up front, in sorted [`RowKey`] order, for the rows a
//! caller must serialize on (a job, a cutter, a setting). Everything else a
//! transaction reads or writes is tracked, and commit fails with
//! [`BoardError::TransientStore`] if any of those rows was changed by a
//! transaction that committed after this one's snapshot. Callers wrap the
//! whole unit in [`with_retry`].

pub mod memory;
pub mod retry;

pub use memory::MemoryStore;
pub use retry::with_retry;

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::{BoardError, Result};
use crate::scheduler::{DeviceId, JobId, JobRecord, KanbanEntry, LaneKey};

/// Lockable / versioned unit of state.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RowKey {
    Setting(String),
    Job(JobId),
    Device(DeviceId),
    Lane(LaneKey),
    /// Every job row; read by full scans.
    AllJobs,
    /// Every lane; read by full scans.
    Board,
}

/// Everything the board persists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardState {
    pub jobs: BTreeMap<JobId, JobRecord>,
    /// Kanban entries keyed by job: a job holds at most one entry.
    pub entries: BTreeMap<JobId, KanbanEntry>,
    pub settings: BTreeMap<String, String>,
}

impl BoardState {
    pub fn lane_entries(&self, lane: &LaneKey) -> Vec<&KanbanEntry> {
        let mut entries: Vec<&KanbanEntry> =
            self.entries.values().filter(|e| &e.lane == lane).collect();
        entries.sort_by_key(|e| e.position);
        entries
    }

    pub fn lane_keys(&self) -> BTreeSet<LaneKey> {
        self.entries.values().map(|e| e.lane.clone()).collect()
    }
}

/// Working copy of the state plus the locks and the read/write footprint
/// needed to commit it.
pub struct Transaction {
    state: BoardState,
    snapshot_seq: u64,
    reads: BTreeSet<RowKey>,
    writes: BTreeSet<RowKey>,
    guards: Vec<Box<dyn Any + Send>>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("snapshot_seq", &self.snapshot_seq)
            .field("reads", &self.reads)
            .field("writes", &self.writes)
            .finish_non_exhaustive()
    }
}

impl Transaction {
    /// Build a transaction over a snapshot taken at `snapshot_seq`. `guards`
    /// are the store's lock handles and are released when the transaction
    /// is committed or dropped.
    pub fn new(state: BoardState, snapshot_seq: u64, guards: Vec<Box<dyn Any + Send>>) -> Self {
        Self {
            state,
            snapshot_seq,
            reads: BTreeSet::new(),
            writes: BTreeSet::new(),
            guards,
        }
    }

    pub fn snapshot_seq(&self) -> u64 {
        self.snapshot_seq
    }

    /// Read-only view of the working copy. Not tracked for conflicts.
    pub fn state(&self) -> &BoardState {
        &self.state
    }

    pub fn has_writes(&self) -> bool {
        !self.writes.is_empty()
    }

    /// Split into what a store needs to apply the commit. The lock guards
    /// are handed back so they can be held until the write is visible.
    pub fn into_parts(self) -> CommitSet {
        let touched = self.reads.union(&self.writes).cloned().collect();
        CommitSet {
            state: self.state,
            snapshot_seq: self.snapshot_seq,
            touched,
            writes: self.writes,
            guards: self.guards,
        }
    }

    fn read(&mut self, key: RowKey) {
        self.reads.insert(key);
    }

    fn write(&mut self, key: RowKey) {
        self.writes.insert(key);
    }

    pub fn job(&mut self, id: JobId) -> Result<&JobRecord> {
        self.read(RowKey::Job(id));
        self.state
            .jobs
            .get(&id)
            .ok_or_else(|| BoardError::NotFound(format!("job {}", id)))
    }

    pub fn job_mut(&mut self, id: JobId) -> Result<&mut JobRecord> {
        self.write(RowKey::Job(id));
        self.state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| BoardError::NotFound(format!("job {}", id)))
    }

    pub fn insert_job(&mut self, record: JobRecord) {
        self.write(RowKey::Job(record.id()));
        self.state.jobs.insert(record.id(), record);
    }

    pub fn jobs(&mut self) -> impl Iterator<Item = &JobRecord> + '_ {
        self.read(RowKey::AllJobs);
        self.state.jobs.values()
    }

    pub fn entry(&mut self, job_id: JobId) -> Option<KanbanEntry> {
        self.read(RowKey::Job(job_id));
        let entry = self.state.entries.get(&job_id).cloned();
        if let Some(entry) = &entry {
            self.read(RowKey::Lane(entry.lane.clone()));
        }
        entry
    }

    /// Entries of one lane in position order.
    pub fn lane(&mut self, lane: &LaneKey) -> Vec<KanbanEntry> {
        self.read(RowKey::Lane(lane.clone()));
        self.state
            .lane_entries(lane)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn lane_keys(&mut self) -> BTreeSet<LaneKey> {
        self.read(RowKey::Board);
        self.state.lane_keys()
    }

    /// Insert or replace the entry of `entry.job_id`, wherever it was.
    pub fn put_entry(&mut self, entry: KanbanEntry) {
        if let Some(previous) = self.state.entries.get(&entry.job_id) {
            if previous.lane != entry.lane {
                let lane = previous.lane.clone();
                self.write(RowKey::Lane(lane));
            }
        }
        self.write(RowKey::Lane(entry.lane.clone()));
        self.state.entries.insert(entry.job_id, entry);
    }

    pub fn delete_entry(&mut self, job_id: JobId) -> Option<KanbanEntry> {
        let removed = self.state.entries.remove(&job_id);
        if let Some(entry) = &removed {
            self.write(RowKey::Lane(entry.lane.clone()));
        }
        removed
    }

    pub fn setting(&mut self, key: &str) -> Option<String> {
        self.read(RowKey::Setting(key.to_string()));
        self.state.settings.get(key).cloned()
    }

    pub fn set_setting(&mut self, key: &str, value: impl Into<String>) {
        self.write(RowKey::Setting(key.to_string()));
        self.state.settings.insert(key.to_string(), value.into());
    }
}

/// A consumed [`Transaction`].
pub struct CommitSet {
    pub state: BoardState,
    pub snapshot_seq: u64,
    /// Rows read or written.
    pub touched: BTreeSet<RowKey>,
    pub writes: BTreeSet<RowKey>,
    pub guards: Vec<Box<dyn Any + Send>>,
}

/// A transactional store for board state. Implementations must make
/// `commit` all-or-nothing and must reject commits whose footprint overlaps
/// a transaction committed after their snapshot.
pub trait Store: Send + Sync + 'static {
    /// Lock `locks` (in any order; implementations sort them) and snapshot
    /// the committed state.
    fn begin(&self, locks: Vec<RowKey>) -> impl Future<Output = Result<Transaction>> + Send;

    fn commit(&self, txn: Transaction) -> impl Future<Output = Result<()>> + Send;

    /// Consistent read-only copy of the committed state.
    fn snapshot(&self) -> impl Future<Output = BoardState> + Send;
}
