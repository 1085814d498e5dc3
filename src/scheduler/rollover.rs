//! Day rollover: once per calendar day, everything queued for TOMORROW is
//! appended to the matching TODAY lane.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::scheduler::lanes::{self, KanbanEntry, LaneDay, LaneKey};
use crate::store::{RowKey, Transaction};

/// Setting holding the ISO date of the last completed rollover.
pub const LAST_DAY_TRANSITION: &str = "last_day_transition";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloverOutcome {
    pub moved_count: usize,
    pub already_done: bool,
}

/// The marker row is locked so concurrent callers queue up behind the
/// first one and then observe its marker.
pub fn lock_keys() -> Vec<RowKey> {
    vec![RowKey::Setting(LAST_DAY_TRANSITION.to_string())]
}

pub fn check_and_transition(txn: &mut Transaction, today: NaiveDate) -> Result<RolloverOutcome> {
    let marker = today.format("%Y-%m-%d").to_string();
    if txn.setting(LAST_DAY_TRANSITION).as_deref() == Some(marker.as_str()) {
        tracing::debug!(today = %marker, "Day rollover already done");
        return Ok(RolloverOutcome {
            moved_count: 0,
            already_done: true,
        });
    }

    let sources: Vec<LaneKey> = txn
        .lane_keys()
        .into_iter()
        .filter(|lane| lane.day == LaneDay::Tomorrow)
        .collect();

    let mut moved_count = 0;
    for source in sources {
        let target = source.on(LaneDay::Today);
        let mut running_max = txn
            .lane(&target)
            .iter()
            .map(|e| e.position)
            .max()
            .unwrap_or(0);

        for entry in txn.lane(&source) {
            running_max += 1;
            txn.put_entry(KanbanEntry {
                lane: target.clone(),
                position: running_max,
                ..entry
            });
            moved_count += 1;
        }
        lanes::verify_dense(txn, &target)?;
        tracing::debug!(from = %source, to = %target, last_position = running_max, "Lane rolled over");
    }

    txn.set_setting(LAST_DAY_TRANSITION, marker.clone());
    tracing::info!(today = %marker, moved_count, "Day rollover completed");
    Ok(RolloverOutcome {
        moved_count,
        already_done: false,
    })
}
