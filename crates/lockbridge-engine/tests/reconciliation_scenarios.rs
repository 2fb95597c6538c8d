//! Reconciliation cycle scenarios against the simulated account.
//!
//! All tests run on a paused clock, so poll delays and timeouts elapse
//! instantly and deterministically.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use lockbridge_cloud::mock::{ActuationResponse, MockCloud, MockCloudHandle, MockLockHandle};
use lockbridge_cloud::{CloudClient, CloudError, DeviceSummary};
use lockbridge_core::{DeviceId, LockState, TargetState};
use lockbridge_engine::{
    Bridge, BridgeConfig, CycleOutcome, EngineError, HubBus, HubEvent, ReconcilerConfig,
    SyncResult,
};
use rstest::rstest;
use tokio::sync::broadcast;
use tokio::time::Instant;

fn a1() -> DeviceId {
    DeviceId::new("A1").unwrap()
}

async fn start(
    locked: bool,
    poll_interval: Duration,
    poll_timeout: Duration,
) -> (Bridge<MockCloud>, MockCloudHandle) {
    let (cloud, handle) = MockCloud::new();
    handle.add_lock(a1(), "Front Door", locked).await;

    let config = BridgeConfig::default().with_reconciler(
        ReconcilerConfig::default()
            .with_poll_interval(poll_interval)
            .with_poll_timeout(poll_timeout),
    );
    let bridge = Bridge::start(Arc::new(cloud), config, HubBus::new())
        .await
        .unwrap();
    (bridge, handle)
}

/// Account whose device reads hang once the first few have been served.
#[derive(Debug)]
struct StallingCloud {
    inner: MockCloud,
    fetches: AtomicUsize,
    fast_fetches: usize,
    stall: Duration,
}

impl CloudClient for StallingCloud {
    type Handle = MockLockHandle;

    async fn list_devices(&self) -> lockbridge_cloud::Result<Vec<DeviceSummary>> {
        self.inner.list_devices().await
    }

    async fn get_device(&self, id: &DeviceId) -> lockbridge_cloud::Result<MockLockHandle> {
        if self.fetches.fetch_add(1, Ordering::SeqCst) >= self.fast_fetches {
            tokio::time::sleep(self.stall).await;
        }
        self.inner.get_device(id).await
    }
}

fn drain(rx: &mut broadcast::Receiver<HubEvent>) -> Vec<HubEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn test_confirmed_after_two_polls() {
    let (bridge, handle) = start(false, Duration::from_secs(2), Duration::from_secs(8)).await;
    handle
        .set_response(&a1(), ActuationResponse::AfterFetches(2))
        .await
        .unwrap();

    let started = Instant::now();
    let outcome = bridge.set_target(&a1(), TargetState::Secured).await.unwrap();

    assert_eq!(
        outcome,
        CycleOutcome::Confirmed {
            state: LockState::Secured
        }
    );
    assert!(outcome.is_success());
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3));
    assert_eq!(bridge.current_state(&a1()).await.unwrap(), LockState::Secured);
    assert_eq!(bridge.target_state(&a1()).await.unwrap(), TargetState::Secured);
    assert_eq!(handle.lock_calls(&a1()).await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_jam_on_first_poll() {
    let (bridge, handle) = start(false, Duration::from_secs(2), Duration::from_secs(8)).await;
    handle
        .set_response(&a1(), ActuationResponse::Jam)
        .await
        .unwrap();
    let mut rx = bridge.hub().subscribe();

    let started = Instant::now();
    let outcome = bridge.set_target(&a1(), TargetState::Secured).await.unwrap();

    assert_eq!(outcome, CycleOutcome::Jammed);
    assert!(!outcome.is_success());
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(bridge.current_state(&a1()).await.unwrap(), LockState::Jammed);
    assert_eq!(bridge.target_state(&a1()).await.unwrap(), TargetState::Secured);
    assert_eq!(handle.actuation_calls(&a1()).await, 1);

    assert_eq!(
        drain(&mut rx),
        vec![
            HubEvent::TargetStateChanged {
                device: a1(),
                state: TargetState::Secured
            },
            HubEvent::CurrentStateChanged {
                device: a1(),
                state: LockState::Jammed
            },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_jam_wins_regardless_of_direction() {
    let (bridge, handle) = start(true, Duration::from_secs(2), Duration::from_secs(8)).await;
    handle
        .set_response(&a1(), ActuationResponse::Jam)
        .await
        .unwrap();

    let outcome = bridge
        .set_target(&a1(), TargetState::Unsecured)
        .await
        .unwrap();
    assert_eq!(outcome, CycleOutcome::Jammed);
    assert_eq!(bridge.current_state(&a1()).await.unwrap(), LockState::Jammed);
    assert_eq!(handle.unlock_calls(&a1()).await, 1);
    assert_eq!(handle.lock_calls(&a1()).await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_forces_requested_state() {
    let (bridge, handle) = start(false, Duration::from_secs(2), Duration::from_secs(5)).await;
    handle
        .set_response(&a1(), ActuationResponse::Never)
        .await
        .unwrap();

    let started = Instant::now();
    let outcome = bridge.set_target(&a1(), TargetState::Secured).await.unwrap();

    assert_eq!(
        outcome,
        CycleOutcome::Unconfirmed {
            forced: LockState::Secured,
            last_observed: LockState::Unsecured,
        }
    );
    assert!(!outcome.is_success());
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_secs(6));
    assert_eq!(bridge.current_state(&a1()).await.unwrap(), LockState::Secured);
    assert_eq!(handle.lock_calls(&a1()).await, 1);
    assert_eq!(
        handle.physical_state(&a1()).await,
        Some(LockState::Unsecured)
    );
}

#[rstest]
#[case(false, TargetState::Secured)]
#[case(true, TargetState::Unsecured)]
#[case(true, TargetState::Secured)]
#[tokio::test(start_paused = true)]
async fn test_success_leaves_record_settled(#[case] locked: bool, #[case] desired: TargetState) {
    let (bridge, _handle) = start(locked, Duration::from_secs(1), Duration::from_secs(5)).await;

    let outcome = bridge.set_target(&a1(), desired).await.unwrap();
    assert!(outcome.is_success());

    let record = bridge.record(&a1()).await.unwrap();
    assert_eq!(record.current_state, LockState::from(record.target_state));
}

#[tokio::test(start_paused = true)]
async fn test_actuation_failure_leaves_current_state() {
    let (bridge, handle) = start(false, Duration::from_secs(2), Duration::from_secs(8)).await;
    handle
        .set_response(&a1(), ActuationResponse::Fail("offline".to_string()))
        .await
        .unwrap();
    let mut rx = bridge.hub().subscribe();

    let err = bridge
        .set_target(&a1(), TargetState::Secured)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ActuationFailed { ref device, .. } if device == &a1()));

    assert_eq!(bridge.current_state(&a1()).await.unwrap(), LockState::Unsecured);
    assert_eq!(bridge.target_state(&a1()).await.unwrap(), TargetState::Secured);
    assert_eq!(
        drain(&mut rx),
        vec![HubEvent::TargetStateChanged {
            device: a1(),
            state: TargetState::Secured
        }]
    );

    // The device is free for the next request
    handle
        .set_response(&a1(), ActuationResponse::Immediate)
        .await
        .unwrap();
    let outcome = bridge.set_target(&a1(), TargetState::Secured).await.unwrap();
    assert!(outcome.is_success());
}

#[tokio::test(start_paused = true)]
async fn test_observation_failure_ends_cycle() {
    let (bridge, handle) = start(false, Duration::from_secs(2), Duration::from_secs(10)).await;
    handle
        .set_response(&a1(), ActuationResponse::AfterFetches(5))
        .await
        .unwrap();

    let request = bridge.spawn_target_request(a1(), TargetState::Secured);
    tokio::time::sleep(Duration::from_secs(1)).await;
    handle
        .set_fetch_failure(&a1(), Some("502 bad gateway".to_string()))
        .await
        .unwrap();

    let err = request.await.unwrap().unwrap_err();
    assert!(matches!(err, EngineError::ObservationFailed { .. }));
    assert_eq!(bridge.current_state(&a1()).await.unwrap(), LockState::Unsecured);
    assert_eq!(handle.lock_calls(&a1()).await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_device_mutates_nothing() {
    let (bridge, handle) = start(false, Duration::from_secs(2), Duration::from_secs(8)).await;
    let before = bridge.record(&a1()).await.unwrap();
    let mut rx = bridge.hub().subscribe();
    let z9 = DeviceId::new("Z9").unwrap();

    let err = bridge
        .set_target(&z9, TargetState::Secured)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DeviceNotFound(ref id) if id == &z9));

    let err = bridge.reconciler().registry().lookup(&z9).await.unwrap_err();
    assert!(matches!(err, EngineError::DeviceNotFound(_)));

    assert_eq!(bridge.record(&a1()).await.unwrap(), before);
    assert_eq!(handle.actuation_calls(&a1()).await, 0);
    assert!(drain(&mut rx).is_empty());
}

#[rstest]
#[case(2)]
#[case(3)]
#[case(255)]
#[tokio::test(start_paused = true)]
async fn test_raw_target_outside_requestable_range(#[case] raw: u8) {
    let (bridge, handle) = start(false, Duration::from_secs(2), Duration::from_secs(8)).await;

    let err = bridge.set_target_state(&a1(), raw).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidTarget(value) if value == raw));
    assert_eq!(handle.actuation_calls(&a1()).await, 0);
    assert_eq!(bridge.target_state(&a1()).await.unwrap(), TargetState::Unsecured);
}

#[tokio::test(start_paused = true)]
async fn test_raw_target_accepted() {
    let (bridge, _handle) = start(false, Duration::from_secs(2), Duration::from_secs(8)).await;

    let outcome = bridge.set_target_state(&a1(), 1).await.unwrap();
    assert!(outcome.is_success());
    assert_eq!(bridge.current_state(&a1()).await.unwrap().to_u8(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_newer_request_supersedes_running_cycle() {
    let (bridge, handle) = start(false, Duration::from_secs(2), Duration::from_secs(10)).await;
    handle
        .set_response(&a1(), ActuationResponse::Never)
        .await
        .unwrap();

    let first = bridge.spawn_target_request(a1(), TargetState::Secured);
    tokio::time::sleep(Duration::from_secs(1)).await;

    let started = Instant::now();
    let second = bridge
        .set_target(&a1(), TargetState::Unsecured)
        .await
        .unwrap();

    assert_eq!(first.await.unwrap().unwrap(), CycleOutcome::Superseded);
    assert_eq!(
        second,
        CycleOutcome::Confirmed {
            state: LockState::Unsecured
        }
    );
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(handle.lock_calls(&a1()).await, 1);
    assert_eq!(handle.unlock_calls(&a1()).await, 1);

    let record = bridge.record(&a1()).await.unwrap();
    assert_eq!(record.target_state, TargetState::Unsecured);
    assert_eq!(record.current_state, LockState::Unsecured);
}

#[tokio::test(start_paused = true)]
async fn test_sync_skipped_during_cycle() {
    let (bridge, handle) = start(false, Duration::from_secs(2), Duration::from_secs(6)).await;
    handle
        .set_response(&a1(), ActuationResponse::Never)
        .await
        .unwrap();

    let request = bridge.spawn_target_request(a1(), TargetState::Secured);
    tokio::time::sleep(Duration::from_secs(1)).await;

    handle.set_jammed(&a1(), true).await.unwrap();
    let fetches = handle.fetch_count(&a1()).await;
    let result = bridge.reconciler().sync_physical(&a1()).await.unwrap();
    assert_eq!(result, SyncResult::Skipped);
    assert_eq!(handle.fetch_count(&a1()).await, fetches);

    // The cycle itself sees the jam on its next poll
    assert_eq!(request.await.unwrap().unwrap(), CycleOutcome::Jammed);
}

#[tokio::test(start_paused = true)]
async fn test_devices_reconcile_independently() {
    let (cloud, handle) = MockCloud::new();
    let b2 = DeviceId::new("B2").unwrap();
    handle.add_lock(a1(), "Front Door", false).await;
    handle.add_lock(b2.clone(), "Back Door", false).await;
    handle
        .set_response(&a1(), ActuationResponse::Never)
        .await
        .unwrap();

    let config = BridgeConfig::default().with_reconciler(
        ReconcilerConfig::default()
            .with_poll_interval(Duration::from_secs(1))
            .with_poll_timeout(Duration::from_secs(10)),
    );
    let bridge = Bridge::start(Arc::new(cloud), config, HubBus::new())
        .await
        .unwrap();

    let slow = bridge.spawn_target_request(a1(), TargetState::Secured);
    tokio::time::sleep(Duration::from_millis(500)).await;

    let started = Instant::now();
    let outcome = bridge.set_target(&b2, TargetState::Secured).await.unwrap();
    assert!(outcome.is_success());
    assert_eq!(started.elapsed(), Duration::ZERO);

    assert!(matches!(
        slow.await.unwrap().unwrap(),
        CycleOutcome::Unconfirmed { .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_stalled_poll_read_ends_at_deadline() {
    let (inner, handle) = MockCloud::new();
    handle.add_lock(a1(), "Front Door", false).await;
    // Startup read and pre-actuation lookup answer, every poll hangs
    let cloud = StallingCloud {
        inner,
        fetches: AtomicUsize::new(0),
        fast_fetches: 2,
        stall: Duration::from_secs(60),
    };
    let config = BridgeConfig::default().with_reconciler(
        ReconcilerConfig::default()
            .with_poll_interval(Duration::from_secs(2))
            .with_poll_timeout(Duration::from_secs(5)),
    );
    let bridge = Bridge::start(Arc::new(cloud), config, HubBus::new())
        .await
        .unwrap();
    let mut rx = bridge.hub().subscribe();

    let started = Instant::now();
    let outcome = bridge.set_target(&a1(), TargetState::Secured).await.unwrap();

    assert_eq!(
        outcome,
        CycleOutcome::Unconfirmed {
            forced: LockState::Secured,
            last_observed: LockState::Unsecured
        }
    );
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_secs(6));
    assert_eq!(bridge.current_state(&a1()).await.unwrap(), LockState::Secured);
    assert_eq!(
        drain(&mut rx),
        vec![
            HubEvent::TargetStateChanged {
                device: a1(),
                state: TargetState::Secured
            },
            HubEvent::CurrentStateChanged {
                device: a1(),
                state: LockState::Secured
            },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_newer_request_supersedes_slow_actuation() {
    let (bridge, handle) = start(false, Duration::from_secs(2), Duration::from_secs(10)).await;
    handle
        .set_actuation_delay(&a1(), Duration::from_secs(600))
        .await
        .unwrap();

    let first = bridge.spawn_target_request(a1(), TargetState::Secured);
    tokio::time::sleep(Duration::from_secs(1)).await;
    handle
        .set_actuation_delay(&a1(), Duration::ZERO)
        .await
        .unwrap();

    let started = Instant::now();
    let second = bridge
        .set_target(&a1(), TargetState::Unsecured)
        .await
        .unwrap();

    assert_eq!(first.await.unwrap().unwrap(), CycleOutcome::Superseded);
    assert_eq!(
        second,
        CycleOutcome::Confirmed {
            state: LockState::Unsecured
        }
    );
    assert!(started.elapsed() < Duration::from_secs(1));
    // The abandoned lock() never reached the lock
    assert_eq!(handle.lock_calls(&a1()).await, 0);
    assert_eq!(handle.unlock_calls(&a1()).await, 1);

    let record = bridge.record(&a1()).await.unwrap();
    assert_eq!(record.target_state, TargetState::Unsecured);
    assert_eq!(record.current_state, LockState::Unsecured);
}

#[tokio::test(start_paused = true)]
async fn test_actuation_request_timeout() {
    let (bridge, handle) = start(false, Duration::from_secs(2), Duration::from_secs(10)).await;
    handle
        .set_actuation_delay(&a1(), Duration::from_secs(600))
        .await
        .unwrap();

    let started = Instant::now();
    let err = bridge
        .set_target(&a1(), TargetState::Secured)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::ActuationFailed {
            source: CloudError::Timeout { duration_ms: 5000 },
            ..
        }
    ));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_secs(6));
    assert_eq!(handle.lock_calls(&a1()).await, 0);
    assert_eq!(bridge.current_state(&a1()).await.unwrap(), LockState::Unsecured);
}
