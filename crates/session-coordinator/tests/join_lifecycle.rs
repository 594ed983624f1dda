//! Integration tests for join/leave sequencing and session fencing.
//!
//! Joins are held in flight with gated mock transport joins so overlapping
//! calls can be issued deterministically.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::types::RoomId;
use sc_test_utils::{host_membership, CoordinatorHarness, MockDevices, MockTransport};
use session_coordinator::actors::{
    ConnectionPhase, IgnoreReason, PublishOutcome, PublishRejection, TeardownOutcome,
};
use session_coordinator::errors::TransportError;
use session_coordinator::transport::{ClientRole, ConnectionState, Transport};

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_second_join_while_pending_is_rejected() {
    let h = CoordinatorHarness::start();
    let gate = h.transport.push_gated_join();

    let first = h.spawn_join(host_membership("room1"));
    h.wait_for(|s| s.joining).await;

    let second = h
        .handle
        .join("room1", None, Some(42), Some(ClientRole::Host))
        .await
        .unwrap();
    assert_eq!(second, None);

    gate.succeed();
    let session = first.await.unwrap().expect("first join should succeed");
    assert_eq!(session.get(), 1);

    let snapshot = h.handle.snapshot();
    assert!(snapshot.joined);
    assert!(!snapshot.joining);
    assert_eq!(snapshot.current_room, Some(RoomId::from("room1")));
    assert_eq!(snapshot.active_session, Some(session));
    assert_eq!(h.transport.join_calls(), 1);
}

#[tokio::test]
async fn test_failed_join_resets_state_and_allows_retry() {
    let h = CoordinatorHarness::start();
    h.transport
        .push_join_result(Err(TransportError::Rejected("invalid credential".into())));

    let result = h
        .handle
        .join("room1", Some("bad"), Some(42), Some(ClientRole::Host))
        .await
        .unwrap();
    assert_eq!(result, None);

    let snapshot = h.handle.snapshot();
    assert!(!snapshot.joined);
    assert!(!snapshot.joining);
    assert_eq!(snapshot.current_room, None);
    assert_eq!(snapshot.phase, ConnectionPhase::Idle);

    let retry = h
        .handle
        .join("room1", None, Some(42), Some(ClientRole::Host))
        .await
        .unwrap();
    assert_eq!(retry.map(|id| id.get()), Some(2));
    assert!(h.handle.snapshot().joined);
}

// ============================================================================
// Fencing properties
// ============================================================================

#[tokio::test]
async fn test_latest_successful_session_wins() {
    let h = CoordinatorHarness::start();
    let gates = [
        h.transport.push_gated_join(),
        h.transport.push_gated_join(),
        h.transport.push_gated_join(),
    ];

    let mut joins = Vec::new();
    for (n, room) in ["room1", "room2", "room3"].into_iter().enumerate() {
        joins.push(h.spawn_switch(host_membership(room)));
        h.transport.wait_for_join_calls(n + 1).await;
    }

    let [first, second, third] = gates;
    third.succeed();
    let third_result = joins.pop().unwrap().await.unwrap();
    first.succeed();
    second.fail(TransportError::Network("timeout".into()));

    let second_result = joins.pop().unwrap().await.unwrap();
    let first_result = joins.pop().unwrap().await.unwrap();

    assert_eq!(third_result.map(|id| id.get()), Some(3));
    assert_eq!(second_result, None);
    assert_eq!(first_result, None);

    let snapshot = h.handle.snapshot();
    assert!(snapshot.joined);
    assert!(!snapshot.joining);
    assert_eq!(snapshot.active_session, third_result);
    assert_eq!(snapshot.current_room, Some(RoomId::from("room3")));
}

#[tokio::test]
async fn test_latest_session_failing_leaves_nothing_joined() {
    let h = CoordinatorHarness::start();
    let first_gate = h.transport.push_gated_join();
    let second_gate = h.transport.push_gated_join();

    let first = h.spawn_switch(host_membership("room1"));
    h.transport.wait_for_join_calls(1).await;
    let second = h.spawn_switch(host_membership("room2"));
    h.transport.wait_for_join_calls(2).await;

    first_gate.succeed();
    assert_eq!(first.await.unwrap(), None);
    second_gate.fail(TransportError::Rejected("room closed".into()));
    assert_eq!(second.await.unwrap(), None);

    let snapshot = h.handle.snapshot();
    assert!(!snapshot.joined);
    assert!(!snapshot.joining);
    assert_eq!(snapshot.current_room, None);
}

#[tokio::test]
async fn test_stale_join_success_is_discarded_with_courtesy_leave() {
    let h = CoordinatorHarness::start();
    let gate_a = h.transport.push_gated_join();
    let gate_b = h.transport.push_gated_join();

    let join_a = h.spawn_join(host_membership("room-a"));
    h.transport.wait_for_join_calls(1).await;
    let join_b = h.spawn_switch(host_membership("room-b"));
    h.transport.wait_for_join_calls(2).await;

    // B forced the in-flight connection down before its own join.
    assert_eq!(h.transport.leave_calls(), 1);

    gate_b.succeed();
    let session_b = join_b.await.unwrap().expect("B should join");
    let before = h.handle.snapshot();

    gate_a.succeed();
    assert_eq!(join_a.await.unwrap(), None);
    assert_eq!(h.transport.leave_calls(), 2);

    let after = h.handle.snapshot();
    assert_eq!(after.active_session, Some(session_b));
    assert_eq!(after.current_room, Some(RoomId::from("room-b")));
    assert!(after.joined);
    assert_eq!(after.phase, before.phase);
    assert_eq!(after.remote_peers, before.remote_peers);
}

#[tokio::test]
async fn test_join_going_stale_while_settling_leaves_once() {
    let h = CoordinatorHarness::start();
    let gate = h.transport.push_gated_join();

    let first = h.spawn_join(host_membership("room1"));
    h.transport.wait_for_join_calls(1).await;
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }

    // The switch request is queued ahead of the first join's settle
    // message, so the first join passes its own checks and goes stale
    // only once the actor settles it.
    let switch = h.spawn_switch(host_membership("room2"));
    gate.succeed();

    assert_eq!(first.await.unwrap(), None);
    let session = switch.await.unwrap().expect("switch should join");
    assert_eq!(session.get(), 2);

    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    assert_eq!(h.transport.leave_calls(), 1);
    assert_eq!(h.transport.connection_state(), ConnectionState::Connected);

    let snapshot = h.handle.snapshot();
    assert!(snapshot.joined);
    assert_eq!(snapshot.active_session, Some(session));
    assert_eq!(snapshot.current_room, Some(RoomId::from("room2")));
}

#[tokio::test]
async fn test_leave_on_idle_is_idempotent() {
    let h = CoordinatorHarness::start();
    let initial = h.handle.snapshot();

    let first = h.handle.leave(None).await.unwrap();
    let after_first = h.handle.snapshot();
    let second = h.handle.leave(None).await.unwrap();
    let after_second = h.handle.snapshot();

    assert!(matches!(first, TeardownOutcome::Completed(ref r) if r.is_clean()));
    assert_eq!(first, second);
    assert_eq!(after_first, after_second);
    assert_eq!(after_first, initial);
    assert_eq!(h.transport.leave_calls(), 0);
}

#[tokio::test]
async fn test_double_leave_after_join() {
    let h = CoordinatorHarness::start();
    h.join(host_membership("room1")).await;

    assert!(h.handle.leave(None).await.unwrap().is_completed());
    let after_first = h.handle.snapshot();
    assert!(h.handle.leave(None).await.unwrap().is_completed());

    assert_eq!(h.handle.snapshot(), after_first);
    assert_eq!(h.transport.leave_calls(), 1);
    assert_eq!(after_first.active_session, None);
}

#[tokio::test]
async fn test_leave_during_join_is_ignored_until_settled() {
    let h = CoordinatorHarness::start();
    let gate = h.transport.push_gated_join();

    let join = h.spawn_join(host_membership("room1"));
    let joining = h.wait_for(|s| s.joining).await;

    let outcome = h.handle.leave(None).await.unwrap();
    assert_eq!(outcome, TeardownOutcome::Ignored(IgnoreReason::JoinInFlight));
    let snapshot = h.handle.snapshot();
    assert!(snapshot.joining);
    assert!(!snapshot.joined);
    assert_eq!(snapshot.phase, ConnectionPhase::Joining);
    assert_eq!(snapshot.active_session, joining.active_session);
    assert_eq!(h.transport.leave_calls(), 0);

    gate.succeed();
    assert!(join.await.unwrap().is_some());

    assert!(h.handle.leave(None).await.unwrap().is_completed());
    let snapshot = h.handle.snapshot();
    assert!(!snapshot.joined);
    assert_eq!(snapshot.phase, ConnectionPhase::Idle);
    assert_eq!(h.transport.leave_calls(), 1);
}

// ============================================================================
// Join details
// ============================================================================

#[tokio::test]
async fn test_join_same_room_returns_active_session() {
    let h = CoordinatorHarness::start();
    let session = h.join(host_membership("room1")).await;

    let again = h.handle.join_membership(host_membership("room1")).await.unwrap();
    assert_eq!(again, Some(session));
    assert_eq!(h.transport.join_calls(), 1);
}

#[tokio::test]
async fn test_stale_connection_is_left_before_join() {
    let transport = MockTransport::new();
    transport.force_state(ConnectionState::Connected);
    let h = CoordinatorHarness::start_with(transport, MockDevices::new());

    h.join(host_membership("room1")).await;

    assert_eq!(h.transport.leave_calls(), 1);
    assert_eq!(h.transport.join_calls(), 1);
    assert_eq!(h.transport.roles(), vec![ClientRole::Host]);
}

#[tokio::test]
async fn test_default_role_comes_from_config() {
    let h = CoordinatorHarness::start();
    h.handle.join("room1", None, None, None).await.unwrap();
    assert_eq!(h.transport.roles(), vec![ClientRole::Audience]);
}

#[tokio::test]
async fn test_stale_session_ids_are_ignored() {
    let h = CoordinatorHarness::start();
    let old = h.join(host_membership("room1")).await;
    h.handle.leave(Some(old)).await.unwrap();
    let current = h.join(host_membership("room2")).await;

    let leave = h.handle.leave(Some(old)).await.unwrap();
    assert_eq!(
        leave,
        TeardownOutcome::Ignored(IgnoreReason::Stale {
            requested: old,
            active: Some(current),
        })
    );
    assert!(!h.handle.unpublish(Some(old)).await.unwrap().is_completed());
    assert_eq!(
        h.handle.publish(Some(old), None).await.unwrap(),
        PublishOutcome::Rejected(PublishRejection::Stale)
    );

    let snapshot = h.handle.snapshot();
    assert!(snapshot.joined);
    assert_eq!(snapshot.active_session, Some(current));
    assert_eq!(h.transport.leave_calls(), 1);
}

#[tokio::test]
async fn test_joining_another_room_takes_over_previous_session() {
    let h = CoordinatorHarness::start();
    h.join(host_membership("room1")).await;
    h.handle.publish(None, None).await.unwrap();

    let session = h.join(host_membership("room2")).await;

    assert_eq!(session.get(), 2);
    assert!(h.devices.all_closed());
    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.current_room, Some(RoomId::from("room2")));
    assert_eq!(snapshot.local_capture, None);
    assert_eq!(snapshot.phase, ConnectionPhase::JoinedNotPublishing);
    assert_eq!(h.transport.leave_calls(), 1);
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_cancellation_tears_down_session() {
    let h = CoordinatorHarness::start();
    h.join(host_membership("room1")).await;
    h.handle.publish(None, None).await.unwrap();

    let handle = h.handle.clone();
    let transport = h.transport.clone();
    let devices = h.devices.clone();
    h.shutdown().await;

    assert!(devices.all_closed());
    assert_eq!(transport.leave_calls(), 1);
    assert!(handle.is_cancelled());
    assert!(handle.leave(None).await.is_err());
}

#[tokio::test]
async fn test_cancellation_during_join_leaves_late_connection() {
    let h = CoordinatorHarness::start();
    let gate = h.transport.push_gated_join();

    let join = h.spawn_join(host_membership("room1"));
    h.wait_for(|s| s.joining).await;

    let CoordinatorHarness {
        transport,
        cancel_token,
        task,
        ..
    } = h;
    cancel_token.cancel();
    task.await.unwrap();
    assert_eq!(transport.leave_calls(), 0);

    gate.succeed();
    assert_eq!(join.await.unwrap(), None);

    assert_eq!(transport.join_calls(), 1);
    assert_eq!(transport.leave_calls(), 1);
    assert_eq!(transport.connection_state(), ConnectionState::Disconnected);
}
