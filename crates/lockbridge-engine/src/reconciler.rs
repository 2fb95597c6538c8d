//! Target-state reconciliation.
//!
//! [`Reconciler::set_target`] drives one lock toward a requested position
//! and reports how the attempt ended. [`Reconciler::sync_physical`] folds an
//! out-of-band observation (manual key turn, another app) into the record.
//!
//! # Cycle
//!
//! ```text
//!   Idle ──set_target──► Actuating ──lock()/unlock() ok──► Polling
//!    ▲                      │                                 │
//!    │                      │ request failed                  │ jam / confirmed /
//!    │                      ▼                                 ▼ timeout / superseded
//!    └──────────────────── Resolved ◄─────────────────────────┘
//! ```
//!
//! Each poll re-fetches the lock and checks, in order: jam, match, deadline.
//! A jam ends the cycle at once and nothing is re-sent. When the deadline
//! passes without confirmation the record is forced to the requested
//! position and the outcome is [`CycleOutcome::Unconfirmed`]. A poll read
//! still in flight at the deadline is abandoned.
//!
//! The lookup and the `lock()`/`unlock()` request that precede polling are
//! each bounded by [`ReconcilerConfig::request_timeout`].
//!
//! # Concurrency
//!
//! Each device's cycle mutex is held for the whole cycle, so at most one
//! cycle runs per device and the periodic poller (which only `try_lock`s)
//! stays away from a device under reconciliation. A newer request cancels
//! the running cycle's token first; the old cycle stops at its next await
//! point and discards whatever it observed.

use std::sync::Arc;
use std::time::Duration;

use lockbridge_cloud::{CloudClient, CloudError, LockHandle};
use lockbridge_core::constants::{
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_POLL_TIMEOUT_MS, DEFAULT_REQUEST_TIMEOUT_MS,
};
use lockbridge_core::{BatteryLevel, DeviceId, LockState, TargetState};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, trace, warn};
use uuid::Uuid;

use crate::cycle::{CyclePhase, CycleTracker};
use crate::error::{EngineError, Result};
use crate::hub::{HubBus, HubEvent};
use crate::record::{DeviceSlot, LockRecord, StateStore};
use crate::registry::DeviceRegistry;

/// Timing of a reconciliation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Delay between two polls.
    pub poll_interval: Duration,

    /// How long to wait for confirmation before forcing the state.
    pub poll_timeout: Duration,

    /// Limit on a single cloud request outside the polling window.
    pub request_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            poll_timeout: Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }
}

impl ReconcilerConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// How a reconciliation cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// The lock reported the requested position.
    Confirmed { state: LockState },

    /// The lock reported a jam.
    Jammed,

    /// The deadline passed without confirmation; the record was forced.
    Unconfirmed {
        forced: LockState,
        last_observed: LockState,
    },

    /// A newer request for the same device took over.
    Superseded,
}

impl CycleOutcome {
    /// Returns `true` only for a confirmed cycle.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Confirmed { .. })
    }

    /// State written to the record, if the cycle wrote one.
    pub fn final_state(&self) -> Option<LockState> {
        match self {
            Self::Confirmed { state } => Some(*state),
            Self::Jammed => Some(LockState::Jammed),
            Self::Unconfirmed { forced, .. } => Some(*forced),
            Self::Superseded => None,
        }
    }
}

/// Result of one out-of-band observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncResult {
    /// A reconciliation cycle owns the device right now.
    Skipped,

    /// The observation matched the stored state.
    Unchanged(LockState),

    /// The stored state was replaced by the observation.
    Changed { from: LockState, to: LockState },
}

/// Reconciliation engine shared by the hub setter, the poller and the bridge.
///
/// Cloning is cheap; all clones operate on the same registry and records.
#[derive(Debug)]
pub struct Reconciler<C> {
    registry: Arc<DeviceRegistry<C>>,
    store: Arc<StateStore>,
    hub: HubBus,
    config: ReconcilerConfig,
}

impl<C> Clone for Reconciler<C> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            store: Arc::clone(&self.store),
            hub: self.hub.clone(),
            config: self.config,
        }
    }
}

impl<C: CloudClient> Reconciler<C> {
    pub fn new(
        registry: Arc<DeviceRegistry<C>>,
        store: Arc<StateStore>,
        hub: HubBus,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            registry,
            store,
            hub,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry<C>> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn hub(&self) -> &HubBus {
        &self.hub
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Identifiers of every device with a record.
    pub async fn device_ids(&self) -> Vec<DeviceId> {
        self.store.ids().await
    }

    /// Copy of a device's record.
    pub async fn record(&self, id: &DeviceId) -> Option<LockRecord> {
        match self.store.get(id).await {
            Some(slot) => Some(slot.record().await),
            None => None,
        }
    }

    /// Drive a lock toward `desired` and wait for the outcome.
    ///
    /// Any cycle already running on the device is superseded.
    ///
    /// # Errors
    ///
    /// - `EngineError::DeviceNotFound` if the device is unknown; nothing is
    ///   written
    /// - `EngineError::ActuationFailed` if the lock could not be reached,
    ///   refused the request or did not answer within the request timeout;
    ///   `current_state` is left unchanged
    /// - `EngineError::ObservationFailed` if a poll could not read the lock
    pub async fn set_target(&self, id: &DeviceId, desired: TargetState) -> Result<CycleOutcome> {
        let slot = self
            .store
            .get(id)
            .await
            .ok_or_else(|| EngineError::DeviceNotFound(id.clone()))?;

        let token = slot.supersede().await;
        let mut tracker = slot.cycle_lock().lock().await;
        if token.is_cancelled() {
            debug!(device = %id, desired = %desired, "Request superseded while queued");
            return Ok(CycleOutcome::Superseded);
        }

        let cycle_id = Uuid::new_v4();
        let span = info_span!("reconcile", device = %id, desired = %desired, cycle = %cycle_id);
        let result = self
            .run_cycle(&slot, &mut tracker, desired, &token, cycle_id)
            .instrument(span)
            .await;
        tracker.finish();
        result
    }

    async fn run_cycle(
        &self,
        slot: &DeviceSlot,
        tracker: &mut CycleTracker,
        desired: TargetState,
        token: &CancellationToken,
        cycle_id: Uuid,
    ) -> Result<CycleOutcome> {
        let id = slot.id();
        let limit = self.config.request_timeout;

        let handle = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(self.superseded()),
            result = self.registry.lookup_within(id, limit) => result.map_err(|error| match error {
                EngineError::Cloud(source) => EngineError::ActuationFailed {
                    device: id.clone(),
                    source,
                },
                other => other,
            })?,
        };

        tracker.begin(cycle_id)?;
        slot.record_lock().write().await.update_target(desired);
        self.hub.publish(HubEvent::TargetStateChanged {
            device: id.clone(),
            state: desired,
        });

        let request = async {
            match desired {
                TargetState::Secured => handle.lock().await,
                TargetState::Unsecured => handle.unlock().await,
            }
        };
        let delivered = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(self.superseded()),
            result = tokio::time::timeout(limit, request) => result
                .unwrap_or_else(|_| Err(CloudError::timeout(limit.as_millis() as u64))),
        };
        if let Err(source) = delivered {
            error!(error = %source, "Actuation request failed");
            return Err(EngineError::ActuationFailed {
                device: id.clone(),
                source,
            });
        }

        tracker.transition_to(CyclePhase::Polling)?;
        let deadline = tracker.set_timeout(self.config.poll_timeout);
        debug!(timeout_ms = self.config.poll_timeout.as_millis() as u64, "Polling for confirmation");

        let mut last_observed = slot.record().await.current_state;
        loop {
            // A read that is ready at the deadline still counts
            let observed = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(self.superseded()),
                result = self.registry.lookup(id) => Some(result.map_err(|error| match error {
                    EngineError::Cloud(source) => EngineError::ObservationFailed {
                        device: id.clone(),
                        source,
                    },
                    other => other,
                })?),
                _ = tokio::time::sleep_until(deadline) => None,
            };

            let state = match &observed {
                Some(handle) => {
                    let state = handle.observed_state();
                    trace!(observed = %state, "Poll");
                    state
                }
                None => {
                    debug!("Poll still in flight at deadline, abandoned");
                    last_observed
                }
            };
            last_observed = state;

            let resolution = if observed.is_none() {
                Some(unconfirmed(desired, state))
            } else if state.is_jammed() {
                Some((LockState::Jammed, CycleOutcome::Jammed))
            } else if desired.is_satisfied_by(state) {
                Some((state, CycleOutcome::Confirmed { state }))
            } else if tracker.has_timed_out() {
                Some(unconfirmed(desired, state))
            } else {
                None
            };

            let mut events = Vec::with_capacity(2);
            {
                let mut record = slot.record_lock().write().await;
                if token.is_cancelled() {
                    return Ok(self.superseded());
                }
                if let Some(handle) = &observed
                    && let Some(event) = battery_event(id, &mut record, handle.battery_level())
                {
                    events.push(event);
                }
                if let Some((current, _)) = &resolution {
                    record.update_current(*current);
                    events.push(HubEvent::CurrentStateChanged {
                        device: id.clone(),
                        state: *current,
                    });
                }
            }
            for event in events {
                self.hub.publish(event);
            }

            if let Some((_, outcome)) = resolution {
                tracker.transition_to(CyclePhase::Resolved)?;
                match outcome {
                    CycleOutcome::Confirmed { state } => {
                        info!(state = %state, "Lock state confirmed")
                    }
                    CycleOutcome::Jammed => warn!("Lock jammed"),
                    CycleOutcome::Unconfirmed { forced, last_observed } => warn!(
                        forced = %forced,
                        last_observed = %last_observed,
                        "Lock state not confirmed before timeout, assuming requested state"
                    ),
                    CycleOutcome::Superseded => {}
                }
                return Ok(outcome);
            }

            let delay = tracker
                .time_remaining()
                .map_or(Duration::ZERO, |remaining| remaining.min(self.config.poll_interval));
            tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(self.superseded()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn superseded(&self) -> CycleOutcome {
        debug!("Cycle superseded by a newer request");
        CycleOutcome::Superseded
    }

    /// Observe a lock outside of any cycle and adopt what it reports.
    ///
    /// If the physical state differs from the stored one, both target and
    /// current are replaced and the hub is told about both. A jam only
    /// replaces the current state. Devices inside a reconciliation cycle
    /// are skipped, and a hub request arriving mid-read wins over the read.
    ///
    /// # Errors
    ///
    /// `EngineError::DeviceNotFound` for unknown devices, `EngineError::Cloud`
    /// when the lock cannot be read within the request timeout.
    pub async fn sync_physical(&self, id: &DeviceId) -> Result<SyncResult> {
        let slot = self
            .store
            .get(id)
            .await
            .ok_or_else(|| EngineError::DeviceNotFound(id.clone()))?;

        let Ok(_cycle) = slot.cycle_lock().try_lock() else {
            trace!(device = %id, "Reconciliation in progress, skipping sync");
            return Ok(SyncResult::Skipped);
        };

        let token = slot.token().await;
        let handle = tokio::select! {
            biased;
            _ = token.cancelled() => {
                trace!(device = %id, "Hub request arrived, sync abandoned");
                return Ok(SyncResult::Skipped);
            }
            result = self.registry.lookup_within(id, self.config.request_timeout) => result?,
        };
        let observed = handle.observed_state();

        let mut events = Vec::with_capacity(3);
        let result = {
            let mut record = slot.record_lock().write().await;
            if let Some(event) = battery_event(id, &mut record, handle.battery_level()) {
                events.push(event);
            }

            let previous = record.current_state;
            if record.update_current(observed) {
                if let Some(target) = observed.as_target() {
                    record.update_target(target);
                    events.push(HubEvent::TargetStateChanged {
                        device: id.clone(),
                        state: target,
                    });
                }
                events.push(HubEvent::CurrentStateChanged {
                    device: id.clone(),
                    state: observed,
                });
                SyncResult::Changed {
                    from: previous,
                    to: observed,
                }
            } else {
                SyncResult::Unchanged(observed)
            }
        };

        if let SyncResult::Changed { from, to } = result {
            info!(device = %id, from = %from, to = %to, "Physical state changed outside the hub");
        }
        for event in events {
            self.hub.publish(event);
        }
        Ok(result)
    }
}

fn unconfirmed(desired: TargetState, last_observed: LockState) -> (LockState, CycleOutcome) {
    let forced = LockState::from(desired);
    (
        forced,
        CycleOutcome::Unconfirmed {
            forced,
            last_observed,
        },
    )
}

fn battery_event(id: &DeviceId, record: &mut LockRecord, level: BatteryLevel) -> Option<HubEvent> {
    if !record.update_battery(level) {
        return None;
    }
    let low_battery = record.low_battery();
    if low_battery {
        warn!(device = %id, level = %level, "Battery low");
    }
    Some(HubEvent::BatteryChanged {
        device: id.clone(),
        level,
        low_battery,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockbridge_cloud::mock::{ActuationResponse, MockCloud, MockCloudHandle};

    async fn setup(locked: bool) -> (Reconciler<MockCloud>, MockCloudHandle, DeviceId) {
        let (cloud, handle) = MockCloud::new();
        let id = DeviceId::new("A1").unwrap();
        handle.add_lock(id.clone(), "Front Door", locked).await;

        let registry = Arc::new(DeviceRegistry::new(Arc::new(cloud)));
        registry.refresh().await.unwrap();
        let store = Arc::new(StateStore::new());
        let probe = registry.lookup(&id).await.unwrap();
        store
            .insert(id.clone(), LockRecord::from_probe(&probe, 25))
            .await;

        let reconciler = Reconciler::new(
            registry,
            store,
            HubBus::new(),
            ReconcilerConfig::default(),
        );
        (reconciler, handle, id)
    }

    #[test]
    fn test_outcome_helpers() {
        let confirmed = CycleOutcome::Confirmed {
            state: LockState::Secured,
        };
        assert!(confirmed.is_success());
        assert_eq!(confirmed.final_state(), Some(LockState::Secured));

        let unconfirmed = CycleOutcome::Unconfirmed {
            forced: LockState::Secured,
            last_observed: LockState::Unsecured,
        };
        assert!(!unconfirmed.is_success());
        assert_eq!(unconfirmed.final_state(), Some(LockState::Secured));

        assert!(!CycleOutcome::Jammed.is_success());
        assert_eq!(CycleOutcome::Jammed.final_state(), Some(LockState::Jammed));
        assert_eq!(CycleOutcome::Superseded.final_state(), None);
    }

    #[test]
    fn test_config_builders() {
        let config = ReconcilerConfig::default()
            .with_poll_interval(Duration::from_secs(1))
            .with_poll_timeout(Duration::from_secs(8))
            .with_request_timeout(Duration::from_secs(3));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.poll_timeout, Duration::from_secs(8));
        assert_eq!(config.request_timeout, Duration::from_secs(3));
        assert_eq!(
            ReconcilerConfig::default().request_timeout,
            Duration::from_secs(5)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_confirmation() {
        let (reconciler, handle, id) = setup(false).await;

        let outcome = reconciler.set_target(&id, TargetState::Secured).await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Confirmed {
                state: LockState::Secured
            }
        );
        assert_eq!(handle.lock_calls(&id).await, 1);

        let record = reconciler.record(&id).await.unwrap();
        assert_eq!(record.current_state, LockState::Secured);
        assert!(record.is_settled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_history_recorded() {
        let (reconciler, _handle, id) = setup(true).await;
        reconciler
            .set_target(&id, TargetState::Unsecured)
            .await
            .unwrap();

        let slot = reconciler.store().get(&id).await.unwrap();
        let tracker = slot.cycle_lock().lock().await;
        let phases: Vec<_> = tracker.history().iter().map(|t| t.to).collect();
        assert_eq!(
            phases,
            vec![
                CyclePhase::Actuating,
                CyclePhase::Polling,
                CyclePhase::Resolved,
                CyclePhase::Idle
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_physical_unchanged() {
        let (reconciler, _handle, id) = setup(false).await;
        let result = reconciler.sync_physical(&id).await.unwrap();
        assert_eq!(result, SyncResult::Unchanged(LockState::Unsecured));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_physical_jam_keeps_target() {
        let (reconciler, handle, id) = setup(true).await;
        handle.set_jammed(&id, true).await.unwrap();

        let result = reconciler.sync_physical(&id).await.unwrap();
        assert_eq!(
            result,
            SyncResult::Changed {
                from: LockState::Secured,
                to: LockState::Jammed
            }
        );
        let record = reconciler.record(&id).await.unwrap();
        assert_eq!(record.target_state, TargetState::Secured);
        assert_eq!(record.current_state, LockState::Jammed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_battery_change_published() {
        let (reconciler, handle, id) = setup(false).await;
        let mut rx = reconciler.hub().subscribe();
        handle.set_battery(&id, 10).await.unwrap();

        reconciler.sync_physical(&id).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            HubEvent::BatteryChanged {
                device: id.clone(),
                level: BatteryLevel::new(10).unwrap(),
                low_battery: true,
            }
        );
        assert!(reconciler.record(&id).await.unwrap().low_battery());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_transport_error_before_actuation() {
        let (reconciler, handle, id) = setup(false).await;
        handle
            .set_fetch_failure(&id, Some("503".to_string()))
            .await
            .unwrap();

        let err = reconciler
            .set_target(&id, TargetState::Secured)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ActuationFailed { .. }));
        assert_eq!(handle.lock_calls(&id).await, 0);

        // Nothing written: the request never reached the lock
        let record = reconciler.record(&id).await.unwrap();
        assert_eq!(record.target_state, TargetState::Unsecured);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_physical_read_is_bounded() {
        let (reconciler, handle, id) = setup(false).await;
        handle
            .set_fetch_delay(&id, Duration::from_secs(60))
            .await
            .unwrap();

        let started = tokio::time::Instant::now();
        let err = reconciler.sync_physical(&id).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Cloud(CloudError::Timeout { duration_ms: 5000 })
        ));
        assert!(started.elapsed() < Duration::from_secs(6));
        assert!(!reconciler.store().get(&id).await.unwrap().is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hub_request_wins_over_slow_sync() {
        let (reconciler, handle, id) = setup(false).await;
        handle
            .set_fetch_delay(&id, Duration::from_secs(3))
            .await
            .unwrap();

        let sync = {
            let reconciler = reconciler.clone();
            let id = id.clone();
            tokio::spawn(async move { reconciler.sync_physical(&id).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;

        let slot = reconciler.store().get(&id).await.unwrap();
        assert!(slot.is_busy());
        slot.supersede().await;

        assert_eq!(sync.await.unwrap().unwrap(), SyncResult::Skipped);
        assert!(!slot.is_busy());
    }
}
