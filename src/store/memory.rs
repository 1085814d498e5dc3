use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as RowMutex, RwLock};

use crate::error::{BoardError, Result};
use crate::store::{BoardState, CommitSet, RowKey, Store, Transaction};

#[derive(Debug, Default)]
struct Committed {
    state: BoardState,
    /// Sequence number of the last commit.
    seq: u64,
    /// Commit sequence that last wrote each row.
    versions: HashMap<RowKey, u64>,
}

impl Committed {
    fn version(&self, key: &RowKey) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }
}

/// In-process [`Store`]: first-committer-wins over tracked row versions,
/// with per-row async mutexes for explicit locks.
#[derive(Debug, Default)]
pub struct MemoryStore {
    committed: RwLock<Committed>,
    row_locks: Mutex<HashMap<RowKey, Arc<RowMutex<()>>>>,
    injected_failures: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing state, e.g. one restored from a backup.
    pub fn from_state(state: BoardState) -> Self {
        Self {
            committed: RwLock::new(Committed {
                state,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Make the next `count` writing commits fail with a transient error,
    /// as a deadlock victim would.
    pub fn fail_next_commits(&self, count: u32) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    pub async fn commit_seq(&self) -> u64 {
        self.committed.read().await.seq
    }

    fn row_lock(&self, key: &RowKey) -> Result<Arc<RowMutex<()>>> {
        let mut locks = self
            .row_locks
            .lock()
            .map_err(|_| BoardError::Internal("row lock table poisoned".to_string()))?;
        Ok(locks.entry(key.clone()).or_default().clone())
    }

    fn take_injected_failure(&self) -> bool {
        self.injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Store for MemoryStore {
    async fn begin(&self, locks: Vec<RowKey>) -> Result<Transaction> {
        let ordered: BTreeSet<RowKey> = locks.into_iter().collect();
        let mut guards: Vec<Box<dyn Any + Send>> = Vec::with_capacity(ordered.len());
        for key in &ordered {
            let lock = self.row_lock(key)?;
            guards.push(Box::new(lock.lock_owned().await));
        }

        let committed = self.committed.read().await;
        Ok(Transaction::new(
            committed.state.clone(),
            committed.seq,
            guards,
        ))
    }

    async fn commit(&self, txn: Transaction) -> Result<()> {
        let CommitSet {
            state,
            snapshot_seq,
            touched,
            writes,
            guards,
        } = txn.into_parts();

        if writes.is_empty() {
            return Ok(());
        }
        if self.take_injected_failure() {
            return Err(BoardError::TransientStore(
                "injected serialization failure".to_string(),
            ));
        }

        let mut committed = self.committed.write().await;
        if let Some(key) = touched
            .iter()
            .find(|key| committed.version(key) > snapshot_seq)
        {
            tracing::debug!(?key, snapshot_seq, "Serialization conflict at commit");
            return Err(BoardError::TransientStore(format!(
                "serialization conflict on {:?}",
                key
            )));
        }

        committed.seq += 1;
        let seq = committed.seq;
        let mut lanes_written = false;
        let mut jobs_written = false;

        for key in &writes {
            match key {
                RowKey::Job(id) => {
                    jobs_written = true;
                    match state.jobs.get(id) {
                        Some(record) => {
                            committed.state.jobs.insert(*id, record.clone());
                        }
                        None => {
                            committed.state.jobs.remove(id);
                        }
                    }
                }
                RowKey::Lane(lane) => {
                    lanes_written = true;
                    committed.state.entries.retain(|_, e| &e.lane != lane);
                    for entry in state.entries.values().filter(|e| &e.lane == lane) {
                        committed.state.entries.insert(entry.job_id, entry.clone());
                    }
                }
                RowKey::Setting(name) => match state.settings.get(name) {
                    Some(value) => {
                        committed.state.settings.insert(name.clone(), value.clone());
                    }
                    None => {
                        committed.state.settings.remove(name);
                    }
                },
                RowKey::Device(_) | RowKey::AllJobs | RowKey::Board => {}
            }
            committed.versions.insert(key.clone(), seq);
        }
        if lanes_written {
            committed.versions.insert(RowKey::Board, seq);
        }
        if jobs_written {
            committed.versions.insert(RowKey::AllJobs, seq);
        }

        drop(committed);
        drop(guards);
        Ok(())
    }

    async fn snapshot(&self) -> BoardState {
        self.committed.read().await.state.clone()
    }
}
