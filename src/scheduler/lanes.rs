//! Kanban lane manager.
//!
//! A lane is a (day, shift) bucket holding an ordered queue of jobs. Within a
//! lane positions are always exactly `1..=n`; every mutation here re-checks
//! that and fails the surrounding transaction if it does not hold, so a bug
//! can never commit a gap or a duplicate.

use serde::{Deserialize, Serialize};

use crate::error::{BoardError, Result};
use crate::scheduler::{DeviceId, JobId};
use crate::store::Transaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LaneDay {
    Today,
    Tomorrow,
}

impl std::fmt::Display for LaneDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LaneDay::Today => write!(f, "today"),
            LaneDay::Tomorrow => write!(f, "tomorrow"),
        }
    }
}

/// Lane identity. The manual-station lane has no shift.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LaneKey {
    pub day: LaneDay,
    pub shift: Option<String>,
}

impl LaneKey {
    pub fn shift(day: LaneDay, shift: impl Into<String>) -> Self {
        Self {
            day,
            shift: Some(shift.into()),
        }
    }

    pub fn manual(day: LaneDay) -> Self {
        Self { day, shift: None }
    }

    /// Same shift, other day.
    pub fn on(&self, day: LaneDay) -> Self {
        Self {
            day,
            shift: self.shift.clone(),
        }
    }
}

impl std::fmt::Display for LaneKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.shift {
            Some(shift) => write!(f, "{}/{}", self.day, shift),
            None => write!(f, "{}/manual", self.day),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KanbanEntry {
    pub job_id: JobId,
    pub lane: LaneKey,
    pub position: u32,
    pub device: Option<DeviceId>,
}

/// True when `positions`, in any order, are exactly `1..=len`.
pub fn is_dense(positions: impl IntoIterator<Item = u32>) -> bool {
    let mut positions: Vec<u32> = positions.into_iter().collect();
    positions.sort_unstable();
    positions
        .iter()
        .enumerate()
        .all(|(i, &p)| p as usize == i + 1)
}

pub(crate) fn verify_dense(txn: &Transaction, lane: &LaneKey) -> Result<()> {
    let positions: Vec<u32> = txn
        .state()
        .lane_entries(lane)
        .iter()
        .map(|e| e.position)
        .collect();
    if is_dense(positions.iter().copied()) {
        Ok(())
    } else {
        Err(BoardError::Internal(format!(
            "lane {} lost its ordering: {:?}",
            lane, positions
        )))
    }
}

fn ensure_off_board(txn: &mut Transaction, job_id: JobId) -> Result<()> {
    match txn.entry(job_id) {
        Some(entry) => Err(BoardError::Internal(format!(
            "job {} already sits in lane {}",
            job_id, entry.lane
        ))),
        None => Ok(()),
    }
}

/// Place a job at the end of `lane`: max(position) + 1.
pub fn append(
    txn: &mut Transaction,
    job_id: JobId,
    lane: LaneKey,
    device: Option<DeviceId>,
) -> Result<u32> {
    ensure_off_board(txn, job_id)?;
    let position = txn
        .lane(&lane)
        .iter()
        .map(|e| e.position)
        .max()
        .unwrap_or(0)
        + 1;
    txn.put_entry(KanbanEntry {
        job_id,
        lane: lane.clone(),
        position,
        device,
    });
    verify_dense(txn, &lane)?;
    tracing::debug!(job_id, lane = %lane, position, "Entry appended");
    Ok(position)
}

/// Place a job at `position`, shifting everything at or after it down by
/// one. Positions past the end append.
pub fn insert_at(
    txn: &mut Transaction,
    job_id: JobId,
    lane: LaneKey,
    position: u32,
    device: Option<DeviceId>,
) -> Result<u32> {
    if position == 0 {
        return Err(BoardError::Validation(
            "lane positions start at 1".to_string(),
        ));
    }
    ensure_off_board(txn, job_id)?;

    let entries = txn.lane(&lane);
    let position = position.min(entries.len() as u32 + 1);
    for entry in entries.into_iter().filter(|e| e.position >= position) {
        let shifted = entry.position + 1;
        txn.put_entry(KanbanEntry {
            position: shifted,
            ..entry
        });
    }
    txn.put_entry(KanbanEntry {
        job_id,
        lane: lane.clone(),
        position,
        device,
    });
    verify_dense(txn, &lane)?;
    tracing::debug!(job_id, lane = %lane, position, "Entry inserted");
    Ok(position)
}

/// Take a job off the board, closing the gap it leaves.
pub fn remove(txn: &mut Transaction, job_id: JobId) -> Result<Option<KanbanEntry>> {
    let Some(removed) = txn.entry(job_id) else {
        return Ok(None);
    };
    txn.delete_entry(job_id);

    let behind: Vec<KanbanEntry> = txn
        .lane(&removed.lane)
        .into_iter()
        .filter(|e| e.position > removed.position)
        .collect();
    for entry in behind {
        let closed = entry.position - 1;
        txn.put_entry(KanbanEntry {
            position: closed,
            ..entry
        });
    }
    verify_dense(txn, &removed.lane)?;
    tracing::debug!(job_id, lane = %removed.lane, position = removed.position, "Entry removed");
    Ok(Some(removed))
}

/// Move a job that is already on the board. Within a lane the job lands
/// at `new_position` (or stays put when none is given); across lanes it is
/// removed from the old lane and inserted, or appended, in the new one.
/// Returns the final position.
pub fn move_entry(
    txn: &mut Transaction,
    job_id: JobId,
    new_lane: LaneKey,
    new_position: Option<u32>,
    device: Option<DeviceId>,
) -> Result<u32> {
    if new_position == Some(0) {
        return Err(BoardError::Validation(
            "lane positions start at 1".to_string(),
        ));
    }
    let entry = txn
        .entry(job_id)
        .ok_or_else(|| BoardError::NotFound(format!("kanban entry for job {}", job_id)))?;

    if entry.lane == new_lane {
        let target = new_position.unwrap_or(entry.position);
        return reposition(txn, entry, target, device);
    }

    remove(txn, job_id)?;
    match new_position {
        Some(position) => insert_at(txn, job_id, new_lane, position, device),
        None => append(txn, job_id, new_lane, device),
    }
}

/// Same-lane move. The other entries are taken in position order with the
/// position each would have once the moving entry is gone; the moving entry
/// goes in front of the first one whose adjusted position reaches the
/// target, or last. The lane is then renumbered from 1 in one pass, so no
/// intermediate state ever holds duplicate positions.
fn reposition(
    txn: &mut Transaction,
    moving: KanbanEntry,
    target: u32,
    device: Option<DeviceId>,
) -> Result<u32> {
    let lane = moving.lane.clone();
    let others: Vec<KanbanEntry> = txn
        .lane(&lane)
        .into_iter()
        .filter(|e| e.job_id != moving.job_id)
        .collect();

    let origin = moving.position;
    let job_id = moving.job_id;
    let mut ordered = Vec::with_capacity(others.len() + 1);
    let mut pending = Some(KanbanEntry { device, ..moving });
    for other in others {
        let adjusted = if other.position > origin {
            other.position - 1
        } else {
            other.position
        };
        if adjusted >= target {
            if let Some(moving) = pending.take() {
                ordered.push(moving);
            }
        }
        ordered.push(other);
    }
    if let Some(moving) = pending.take() {
        ordered.push(moving);
    }

    renumber(txn, &lane, ordered)?;
    let position = txn
        .state()
        .entries
        .get(&job_id)
        .map(|e| e.position)
        .ok_or_else(|| BoardError::Internal(format!("job {} vanished from lane {}", job_id, lane)))?;
    tracing::debug!(job_id, lane = %lane, position, "Entry repositioned");
    Ok(position)
}

/// Write `ordered` back as positions `1..=n`, touching only entries that
/// actually change. Returns how many entries were rewritten.
pub fn renumber(txn: &mut Transaction, lane: &LaneKey, ordered: Vec<KanbanEntry>) -> Result<usize> {
    let mut changed = 0;
    for (i, entry) in ordered.into_iter().enumerate() {
        let entry = KanbanEntry {
            lane: lane.clone(),
            position: i as u32 + 1,
            ..entry
        };
        if txn.state().entries.get(&entry.job_id) != Some(&entry) {
            txn.put_entry(entry);
            changed += 1;
        }
    }
    verify_dense(txn, lane)?;
    Ok(changed)
}
