//! Orphan reconciler: repairing board drift left by partial failures.

mod test_harness;

use std::sync::Arc;

use cutboard::scheduler::{
    Job, JobId, JobRecord, KanbanEntry, LaneDay, LaneKey, Phase, PhaseRecord, SpreadingMethod,
};
use cutboard::store::{BoardState, MemoryStore};
use test_harness::*;

fn record(id: JobId, phase: Option<Phase>, device: Option<&str>) -> JobRecord {
    let mut record = JobRecord::new(Job::new(id, format!("MAT-{id}"), SpreadingMethod::Automatic));
    record.current = phase.map(|p| PhaseRecord::new(p, device.map(str::to_string), None));
    record
}

fn entry(job_id: JobId, lane: &LaneKey, position: u32) -> KanbanEntry {
    KanbanEntry {
        job_id,
        lane: lane.clone(),
        position,
        device: None,
    }
}

/// today/1 holds one healthy job and one of each kind of orphan, with a
/// gap in the numbering.
fn drifted_state() -> BoardState {
    let lane = today_lane("1");
    let mut state = BoardState::default();
    for record in [
        record(1, Some(Phase::ToLoad), None),
        record(2, Some(Phase::OnCut), Some("CT1")),
        record(3, None, None),
        record(4, Some(Phase::ToLoad), Some("SP0")),
        record(5, Some(Phase::ToCut), Some("SP1")),
    ] {
        state.jobs.insert(record.id(), record);
    }
    for e in [
        entry(1, &lane, 2),
        entry(2, &lane, 3),
        entry(3, &lane, 5),
        entry(4, &lane, 6),
        entry(5, &lane, 9),
        // No job row at all.
        entry(99, &lane, 11),
    ] {
        state.entries.insert(e.job_id, e);
    }
    state
}

#[tokio::test]
async fn test_cleanup_removes_orphans_and_renumbers() {
    let service = service_over(Arc::new(MemoryStore::from_state(drifted_state())));

    let outcome = service.cleanup().await.unwrap();
    assert_eq!(outcome.orphans_removed, 4);
    assert_eq!(outcome.positions_reset, 2);

    assert_eq!(lane_order(&service, &today_lane("1")).await, vec![1, 5]);
    assert_eq!(lane_positions(&service, &today_lane("1")).await, vec![1, 2]);

    // Job rows are left alone; only board entries are repaired.
    assert_eq!(phase_of(&service, 2).await, Some(Phase::OnCut));
    assert_eq!(phase_of(&service, 3).await, None);
}

#[tokio::test]
async fn test_cleanup_is_idempotent() {
    let service = service_over(Arc::new(MemoryStore::from_state(drifted_state())));
    service.cleanup().await.unwrap();
    let board = service.get_board(None).await;

    let second = service.cleanup().await.unwrap();
    assert_eq!(second.orphans_removed, 0);
    assert_eq!(second.positions_reset, 0);
    assert_eq!(service.get_board(None).await, board);
}

#[tokio::test]
async fn test_cleanup_leaves_healthy_board_untouched() {
    let service = test_service();
    approved(&service, 1, SpreadingMethod::Automatic).await;
    approved(&service, 2, SpreadingMethod::Manual).await;
    let board = service.get_board(None).await;
    let seq = service.store().commit_seq().await;

    let outcome = service.cleanup().await.unwrap();
    assert_eq!(outcome.orphans_removed, 0);
    assert_eq!(outcome.positions_reset, 0);
    assert_eq!(service.get_board(None).await, board);
    assert_eq!(service.store().commit_seq().await, seq);
}

#[tokio::test]
async fn test_cleanup_compacts_gaps_in_every_lane() {
    let manual = LaneKey::manual(LaneDay::Tomorrow);
    let mut state = BoardState::default();
    for id in 1..=3 {
        let record = record(id, Some(Phase::ToLoad), None);
        state.jobs.insert(id, record);
    }
    state.entries.insert(1, entry(1, &manual, 4));
    state.entries.insert(2, entry(2, &manual, 7));
    state.entries.insert(3, entry(3, &today_lane("2"), 3));

    let service = service_over(Arc::new(MemoryStore::from_state(state)));
    let outcome = service.cleanup().await.unwrap();
    assert_eq!(outcome.orphans_removed, 0);
    assert_eq!(outcome.positions_reset, 3);
    assert_eq!(lane_positions(&service, &manual).await, vec![1, 2]);
    assert_eq!(lane_positions(&service, &today_lane("2")).await, vec![1]);
}
