//! Shared fixtures for board integration tests.
//!
//! Builds services over a fresh in-memory store with the default cutting
//! room layout (SP0 unassigned, SP1-SP3 spreaders, MS manual station,
//! CT1/CT2 cutters) and a fast retry policy.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::NaiveDate;

use cutboard::config::{BoardConfig, RetryPolicy};
use cutboard::scheduler::{Job, JobId, LaneDay, LaneKey, Phase, PhaseRecord, SpreadingMethod};
use cutboard::service::{BoardService, MoveRequest, StatusUpdate};
use cutboard::store::MemoryStore;

pub type TestService = BoardService<MemoryStore>;

/// Retries fast and often, so contention tests never run out of attempts.
pub fn test_retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 50,
        initial_backoff_ms: 1,
        max_backoff_ms: 20,
        multiplier: 2.0,
    }
}

pub fn test_config() -> BoardConfig {
    BoardConfig::default().with_retry(test_retry_policy())
}

pub fn test_service() -> Arc<TestService> {
    service_over(Arc::new(MemoryStore::new()))
}

pub fn service_over(store: Arc<MemoryStore>) -> Arc<TestService> {
    Arc::new(BoardService::new(store, test_config()).unwrap())
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn today_lane(shift: &str) -> LaneKey {
    LaneKey::shift(LaneDay::Today, shift)
}

pub fn tomorrow_lane(shift: &str) -> LaneKey {
    LaneKey::shift(LaneDay::Tomorrow, shift)
}

pub async fn register(service: &TestService, id: JobId, method: SpreadingMethod) {
    service
        .register_job(Job::new(id, format!("MAT-{id}"), method))
        .await
        .unwrap();
}

/// Register and approve: the job ends up TO_LOAD in its default lane.
pub async fn approved(service: &TestService, id: JobId, method: SpreadingMethod) {
    register(service, id, method).await;
    let outcome = service.approve(&[id], Some("planner")).await.unwrap();
    assert_eq!(outcome.activated_count, 1);
}

pub fn move_to(
    job_id: JobId,
    device: &str,
    day: LaneDay,
    shift: Option<&str>,
    position: Option<u32>,
) -> MoveRequest {
    MoveRequest {
        job_id,
        target_device: device.to_string(),
        lane_day: day,
        lane_shift: shift.map(str::to_string),
        position,
        operator: Some("planner".to_string()),
    }
}

pub fn status(job_id: JobId, new_phase: Phase, device: Option<&str>) -> StatusUpdate {
    StatusUpdate {
        job_id,
        new_phase,
        operator: Some("operator".to_string()),
        device: device.map(str::to_string),
        expected_current_phase: None,
    }
}

/// Drive an approved job from TO_LOAD to TO_CUT on spreader `spreader`.
pub async fn ready_to_cut(service: &TestService, job_id: JobId, spreader: &str) -> PhaseRecord {
    service
        .update_status(&status(job_id, Phase::OnSpread, Some(spreader)))
        .await
        .unwrap();
    service
        .update_status(&status(job_id, Phase::ToCut, None))
        .await
        .unwrap()
}

pub async fn lane_order(service: &TestService, lane: &LaneKey) -> Vec<JobId> {
    service
        .get_board(None)
        .await
        .lane(lane)
        .map(|l| l.job_ids())
        .unwrap_or_default()
}

pub async fn lane_positions(service: &TestService, lane: &LaneKey) -> Vec<u32> {
    service
        .get_board(None)
        .await
        .lane(lane)
        .map(|l| l.cards.iter().map(|c| c.position).collect())
        .unwrap_or_default()
}

pub async fn phase_of(service: &TestService, job_id: JobId) -> Option<Phase> {
    service
        .job_status(job_id)
        .await
        .unwrap()
        .current
        .map(|c| c.phase)
}
