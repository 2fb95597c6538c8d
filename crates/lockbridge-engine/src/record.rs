//! Per-device state model.
//!
//! A [`LockRecord`] holds what the hub sees for one lock. It lives inside a
//! [`DeviceSlot`] together with the device's cycle tracker and the token
//! used to supersede an in-flight request. Slots are kept in a
//! [`StateStore`], one slot per device, so work on one lock never waits for
//! another.
//!
//! `current_state` is only ever written from a physical observation (or the
//! forced value after an unconfirmed cycle). `target_state` may run ahead of
//! it while a request is in flight.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lockbridge_cloud::LockHandle;
use lockbridge_core::{BatteryLevel, DeviceId, LockState, TargetState};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::cycle::CycleTracker;

/// Hub-facing state of one lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Last requested position, from the hub or inferred from a physical change.
    pub target_state: TargetState,

    /// Last observed position.
    pub current_state: LockState,

    /// Last battery reading.
    pub battery_level: BatteryLevel,

    /// Level below which the battery is reported low.
    pub low_battery_threshold: u8,

    /// When any field last changed.
    pub updated_at: DateTime<Utc>,
}

impl LockRecord {
    /// Seed a record from a physical probe.
    ///
    /// A jammed lock has no requestable position, so its target is taken
    /// from the bolt sensor alone.
    pub fn from_probe<H: LockHandle>(handle: &H, low_battery_threshold: u8) -> Self {
        Self {
            target_state: if handle.is_locked() {
                TargetState::Secured
            } else {
                TargetState::Unsecured
            },
            current_state: handle.observed_state(),
            battery_level: handle.battery_level(),
            low_battery_threshold,
            updated_at: handle.fetched_at(),
        }
    }

    /// Derived low-battery flag.
    pub fn low_battery(&self) -> bool {
        self.battery_level.is_low(self.low_battery_threshold)
    }

    /// Returns `true` when the last observation matches the last request.
    pub fn is_settled(&self) -> bool {
        self.target_state.is_satisfied_by(self.current_state)
    }

    /// Store a battery reading. Returns `true` if the level changed.
    pub fn update_battery(&mut self, level: BatteryLevel) -> bool {
        if self.battery_level == level {
            return false;
        }
        self.battery_level = level;
        self.touch();
        true
    }

    /// Store a requested position. Returns `true` if it changed.
    pub fn update_target(&mut self, target: TargetState) -> bool {
        if self.target_state == target {
            return false;
        }
        self.target_state = target;
        self.touch();
        true
    }

    /// Store an observed position. Returns `true` if it changed.
    pub fn update_current(&mut self, current: LockState) -> bool {
        if self.current_state == current {
            return false;
        }
        self.current_state = current;
        self.touch();
        true
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Everything the engine keeps for one device.
///
/// # Locking
///
/// - `record` is read by hub getters and written briefly by the engine.
/// - `cycle` is held for the entire duration of a reconciliation cycle.
///   The periodic poller uses `try_lock` on it and skips the device when
///   it is taken.
/// - `preempt` holds the cancellation token of the newest request.
#[derive(Debug)]
pub struct DeviceSlot {
    id: DeviceId,
    record: RwLock<LockRecord>,
    cycle: Mutex<CycleTracker>,
    preempt: Mutex<CancellationToken>,
}

impl DeviceSlot {
    pub fn new(id: DeviceId, record: LockRecord) -> Self {
        Self {
            id,
            record: RwLock::new(record),
            cycle: Mutex::new(CycleTracker::new()),
            preempt: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    /// Copy of the current record.
    pub async fn record(&self) -> LockRecord {
        self.record.read().await.clone()
    }

    pub(crate) fn record_lock(&self) -> &RwLock<LockRecord> {
        &self.record
    }

    pub(crate) fn cycle_lock(&self) -> &Mutex<CycleTracker> {
        &self.cycle
    }

    /// Returns `true` while a reconciliation cycle holds the device.
    pub fn is_busy(&self) -> bool {
        self.cycle.try_lock().is_err()
    }

    /// Cancel the in-flight request, if any, and issue a token for a new one.
    pub async fn supersede(&self) -> CancellationToken {
        let mut current = self.preempt.lock().await;
        current.cancel();
        *current = CancellationToken::new();
        current.clone()
    }

    /// Token of the newest request. Cancelled as soon as a newer one arrives.
    pub async fn token(&self) -> CancellationToken {
        self.preempt.lock().await.clone()
    }

    /// Cancel the in-flight request without starting a new one.
    pub async fn cancel(&self) {
        let mut current = self.preempt.lock().await;
        current.cancel();
        *current = CancellationToken::new();
    }
}

/// All device slots, keyed by identifier.
#[derive(Debug, Default)]
pub struct StateStore {
    slots: RwLock<HashMap<DeviceId, Arc<DeviceSlot>>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device, replacing any previous slot.
    pub async fn insert(&self, id: DeviceId, record: LockRecord) -> Arc<DeviceSlot> {
        let slot = Arc::new(DeviceSlot::new(id.clone(), record));
        self.slots.write().await.insert(id, Arc::clone(&slot));
        slot
    }

    /// Unregister a device. Any cycle still running on it is cancelled.
    pub async fn remove(&self, id: &DeviceId) -> Option<Arc<DeviceSlot>> {
        let slot = self.slots.write().await.remove(id)?;
        slot.cancel().await;
        Some(slot)
    }

    pub async fn get(&self, id: &DeviceId) -> Option<Arc<DeviceSlot>> {
        self.slots.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &DeviceId) -> bool {
        self.slots.read().await.contains_key(id)
    }

    /// Registered identifiers, sorted.
    pub async fn ids(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self.slots.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
