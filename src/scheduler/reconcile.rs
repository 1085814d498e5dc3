//! Orphan reconciler. Repairs drift between kanban entries and job phases
//! left behind by partial failures upstream. Only ever run on request.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::scheduler::phase::PhaseRecord;
use crate::scheduler::{lanes, DeviceRegistry, JobId, KanbanEntry};
use crate::store::Transaction;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepOutcome {
    pub orphans_removed: usize,
    pub positions_reset: usize,
}

/// Why an entry has no business being on the board, if it doesn't.
fn orphan_reason(
    entry: &KanbanEntry,
    phases: &BTreeMap<JobId, Option<PhaseRecord>>,
    devices: &DeviceRegistry,
) -> Option<String> {
    match phases.get(&entry.job_id) {
        None => Some("job is unknown".to_string()),
        Some(None) => Some("job has no active phase".to_string()),
        Some(Some(record)) => {
            if record
                .device
                .as_deref()
                .is_some_and(|d| devices.is_unassigned(d))
            {
                Some("job is unassigned".to_string())
            } else if !record.phase.is_kanban_relevant() {
                Some(format!("job is {}", record.phase))
            } else {
                None
            }
        }
    }
}

pub fn sweep(txn: &mut Transaction, devices: &DeviceRegistry) -> Result<SweepOutcome> {
    let phases: BTreeMap<JobId, Option<PhaseRecord>> =
        txn.jobs().map(|r| (r.id(), r.current.clone())).collect();
    // Registers the whole board in the read set.
    txn.lane_keys();
    let entries: Vec<KanbanEntry> = txn.state().entries.values().cloned().collect();

    let mut outcome = SweepOutcome::default();
    for entry in &entries {
        if let Some(reason) = orphan_reason(entry, &phases, devices) {
            txn.delete_entry(entry.job_id);
            outcome.orphans_removed += 1;
            tracing::info!(job_id = entry.job_id, lane = %entry.lane, reason = %reason, "Orphaned entry removed");
        }
    }

    for lane in txn.lane_keys() {
        let ordered = txn.lane(&lane);
        outcome.positions_reset += lanes::renumber(txn, &lane, ordered)?;
    }

    tracing::info!(
        orphans_removed = outcome.orphans_removed,
        positions_reset = outcome.positions_reset,
        "Board sweep finished"
    );
    Ok(outcome)
}
