//! Transactional behaviour of board operations: retries on transient store
//! failures, rollback when retries run out, and lane writes under
//! contention.

mod test_harness;

use std::sync::Arc;

use cutboard::config::RetryPolicy;
use cutboard::error::BoardError;
use cutboard::scheduler::{Job, LaneDay, Phase, SpreadingMethod};
use cutboard::service::BoardService;
use cutboard::store::{MemoryStore, Store};
use test_harness::*;

#[tokio::test]
async fn test_operation_retries_through_transient_failures() {
    let store = Arc::new(MemoryStore::new());
    let service = service_over(store.clone());
    register(&service, 1, SpreadingMethod::Automatic).await;

    store.fail_next_commits(3);
    let outcome = service.approve(&[1], None).await.unwrap();
    assert_eq!(outcome.activated_count, 1);
    assert_eq!(phase_of(&service, 1).await, Some(Phase::ToLoad));
    assert_eq!(lane_order(&service, &today_lane("1")).await, vec![1]);
}

#[tokio::test]
async fn test_exhausted_retries_roll_back_everything() {
    let store = Arc::new(MemoryStore::new());
    let config = test_config().with_retry(RetryPolicy {
        max_attempts: 2,
        initial_backoff_ms: 1,
        max_backoff_ms: 1,
        multiplier: 1.0,
    });
    let service = BoardService::new(store.clone(), config).unwrap();
    service
        .register_job(Job::new(1, "MAT-1", SpreadingMethod::Automatic))
        .await
        .unwrap();
    let before = store.snapshot().await;

    store.fail_next_commits(2);
    let err = service.approve(&[1], None).await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(store.snapshot().await, before);

    // The store is healthy again afterwards.
    service.approve(&[1], None).await.unwrap();
    assert_eq!(store.snapshot().await.entries.len(), 1);
}

#[tokio::test]
async fn test_non_transient_errors_are_not_retried() {
    let store = Arc::new(MemoryStore::new());
    let service = service_over(store.clone());
    approved(&service, 1, SpreadingMethod::Manual).await;
    let seq = store.commit_seq().await;

    store.fail_next_commits(1);
    let err = service
        .move_job(&move_to(1, "SP1", LaneDay::Today, Some("1"), None))
        .await
        .unwrap_err();
    assert!(matches!(err, BoardError::IncompatibleDevice { .. }));
    assert_eq!(store.commit_seq().await, seq);

    // The injected failure is still pending and is absorbed by the next
    // write's retry.
    register(&service, 2, SpreadingMethod::Automatic).await;
    assert_eq!(store.commit_seq().await, seq + 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_approvals_keep_lane_dense() {
    let service = test_service();
    for id in 1..=16 {
        register(&service, id, SpreadingMethod::Automatic).await;
    }

    let handles: Vec<_> = (1..=16u64)
        .map(|id| {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.approve(&[id], Some("planner")).await })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().activated_count, 1);
    }

    let mut order = lane_order(&service, &today_lane("1")).await;
    assert_eq!(
        lane_positions(&service, &today_lane("1")).await,
        (1..=16).collect::<Vec<u32>>()
    );
    order.sort_unstable();
    assert_eq!(order, (1..=16).collect::<Vec<u64>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_moves_into_one_lane() {
    let service = test_service();
    for id in 1..=8 {
        approved(&service, id, SpreadingMethod::Automatic).await;
    }

    let handles: Vec<_> = (1..=8u64)
        .map(|id| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .move_job(&move_to(id, "SP2", LaneDay::Tomorrow, Some("2"), Some(1)))
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert!(lane_order(&service, &today_lane("1")).await.is_empty());
    assert_eq!(
        lane_positions(&service, &tomorrow_lane("2")).await,
        (1..=8).collect::<Vec<u32>>()
    );
}
