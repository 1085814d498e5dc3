use serde::{Deserialize, Serialize};

use crate::scheduler::{DeviceId, JobId, LaneDay, LaneKey, Phase, SpreadingMethod};
use crate::store::BoardState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardCard {
    pub job_id: JobId,
    pub reference: String,
    pub spreading_method: SpreadingMethod,
    pub position: u32,
    pub device: Option<DeviceId>,
    pub phase: Option<Phase>,
    /// `"<rank> - <NAME>"`, for display only.
    pub phase_label: Option<String>,
    /// Overlay-aware status shown to operators.
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneView {
    pub day: LaneDay,
    pub shift: Option<String>,
    pub cards: Vec<BoardCard>,
}

impl LaneView {
    pub fn job_ids(&self) -> Vec<JobId> {
        self.cards.iter().map(|c| c.job_id).collect()
    }
}

/// Read-only projection of the board, lanes ordered by day then shift with
/// the manual lane first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardView {
    pub lanes: Vec<LaneView>,
}

impl BoardView {
    pub fn lane(&self, key: &LaneKey) -> Option<&LaneView> {
        self.lanes
            .iter()
            .find(|l| l.day == key.day && l.shift == key.shift)
    }

    pub fn card_count(&self) -> usize {
        self.lanes.iter().map(|l| l.cards.len()).sum()
    }
}

pub fn project(state: &BoardState, day_filter: Option<LaneDay>) -> BoardView {
    let lanes = state
        .lane_keys()
        .into_iter()
        .filter(|lane| day_filter.map_or(true, |day| lane.day == day))
        .map(|lane| {
            let cards = state
                .lane_entries(&lane)
                .into_iter()
                .filter_map(|entry| {
                    let Some(record) = state.jobs.get(&entry.job_id) else {
                        tracing::debug!(job_id = entry.job_id, "Board entry without a job, skipped");
                        return None;
                    };
                    let phase = record.phase();
                    Some(BoardCard {
                        job_id: entry.job_id,
                        reference: record.job.reference.clone(),
                        spreading_method: record.job.spreading_method,
                        position: entry.position,
                        device: entry.device.clone(),
                        phase,
                        phase_label: phase.map(Phase::label),
                        status: record.display_status(),
                    })
                })
                .collect();
            LaneView {
                day: lane.day,
                shift: lane.shift,
                cards,
            }
        })
        .collect();

    BoardView { lanes }
}
