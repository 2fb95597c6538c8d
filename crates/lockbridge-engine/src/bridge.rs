//! Bridge and accessory registrar.
//!
//! [`Bridge::start`] lists the account, probes every lock once and exposes
//! one accessory per lock that answered. A lock whose probe fails is left
//! out rather than shown with a made-up state; the next
//! [`Bridge::refresh_devices`] call picks it up again.
//!
//! The methods on [`Bridge`] are the hub-facing surface: getters that read
//! the cached record, a target setter that runs a reconciliation cycle, and
//! a realtime probe.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use lockbridge_cloud::mock::MockCloud;
//! use lockbridge_core::{DeviceId, TargetState};
//! use lockbridge_engine::bridge::{Bridge, BridgeConfig};
//! use lockbridge_engine::hub::HubBus;
//!
//! # async fn example() -> lockbridge_engine::Result<()> {
//! let (cloud, handle) = MockCloud::new();
//! let id = DeviceId::new("A1")?;
//! handle.add_lock(id.clone(), "Front Door", false).await;
//!
//! let bridge = Bridge::start(Arc::new(cloud), BridgeConfig::default(), HubBus::new()).await?;
//! bridge.start_poller().await;
//!
//! let outcome = bridge.set_target(&id, TargetState::Secured).await?;
//! println!("{:?}, current={}", outcome, bridge.current_state(&id).await?);
//!
//! bridge.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use lockbridge_cloud::{CloudClient, DeviceSummary};
use lockbridge_core::constants::{
    DEFAULT_BRIDGE_NAME, DEFAULT_HUB_PORT, DEFAULT_LOW_BATTERY_THRESHOLD, DEFAULT_MANUFACTURER,
    DEFAULT_MODEL, MAX_BATTERY_LEVEL,
};
use lockbridge_core::{BatteryLevel, DeviceId, LockState, TargetState};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{EngineError, Result};
use crate::hub::{HubBus, PairingTracker};
use crate::poller::{PhysicalPoller, PollerConfig, PollerHandle};
use crate::reconciler::{CycleOutcome, Reconciler, ReconcilerConfig};
use crate::record::{LockRecord, StateStore};
use crate::registry::{DeviceRegistry, RegistryChanges};

/// Bridge configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Display name of the bridge accessory.
    pub name: String,

    /// Port the hub transport listens on.
    pub port: u16,

    /// Manufacturer reported for every lock.
    pub manufacturer: String,

    /// Model reported when the account does not provide one.
    pub model: String,

    /// Battery level below which a lock reports low battery.
    pub low_battery_threshold: u8,

    pub reconciler: ReconcilerConfig,

    pub poller: PollerConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_BRIDGE_NAME.to_string(),
            port: DEFAULT_HUB_PORT,
            manufacturer: DEFAULT_MANUFACTURER.to_string(),
            model: DEFAULT_MODEL.to_string(),
            low_battery_threshold: DEFAULT_LOW_BATTERY_THRESHOLD,
            reconciler: ReconcilerConfig::default(),
            poller: PollerConfig::default(),
        }
    }
}

impl BridgeConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_low_battery_threshold(mut self, threshold: u8) -> Self {
        self.low_battery_threshold = threshold;
        self
    }

    pub fn with_reconciler(mut self, reconciler: ReconcilerConfig) -> Self {
        self.reconciler = reconciler;
        self
    }

    pub fn with_poller(mut self, poller: PollerConfig) -> Self {
        self.poller = poller;
        self
    }

    /// Check the configuration for values the engine cannot work with.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first invalid value.
    pub fn validate(&self) -> lockbridge_core::Result<()> {
        let invalid = |message: String| Err(lockbridge_core::Error::Config(message));

        if self.name.trim().is_empty() {
            return invalid("bridge name must not be empty".to_string());
        }
        if self.reconciler.poll_interval.is_zero() {
            return invalid("poll interval must be greater than zero".to_string());
        }
        if self.reconciler.poll_timeout.is_zero() {
            return invalid("poll timeout must be greater than zero".to_string());
        }
        if self.reconciler.poll_interval > self.reconciler.poll_timeout {
            return invalid(format!(
                "poll interval ({:?}) must not exceed poll timeout ({:?})",
                self.reconciler.poll_interval, self.reconciler.poll_timeout
            ));
        }
        if self.reconciler.request_timeout.is_zero() {
            return invalid("request timeout must be greater than zero".to_string());
        }
        if self.poller.interval.is_zero() {
            return invalid("sync interval must be greater than zero".to_string());
        }
        if self.low_battery_threshold > MAX_BATTERY_LEVEL {
            return invalid(format!(
                "low battery threshold {} exceeds {}",
                self.low_battery_threshold, MAX_BATTERY_LEVEL
            ));
        }
        Ok(())
    }
}

/// Accessory category advertised to the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessoryCategory {
    Bridge,
    DoorLock,
}

/// Identification shown by the hub for an accessory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessoryInfo {
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub firmware_version: Option<String>,
    pub category: AccessoryCategory,
}

/// One lock exposed to the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accessory {
    pub id: DeviceId,
    pub info: AccessoryInfo,
}

impl Accessory {
    fn from_summary(summary: &DeviceSummary, config: &BridgeConfig) -> Self {
        Self {
            id: summary.id.clone(),
            info: AccessoryInfo {
                name: summary.name.clone(),
                manufacturer: config.manufacturer.clone(),
                model: summary.model.clone().unwrap_or_else(|| config.model.clone()),
                serial_number: summary.id.to_string(),
                firmware_version: summary.firmware_version.clone(),
                category: AccessoryCategory::DoorLock,
            },
        }
    }
}

/// The running bridge: one accessory per lock plus the background tasks.
pub struct Bridge<C> {
    config: BridgeConfig,
    reconciler: Reconciler<C>,
    accessories: RwLock<BTreeMap<DeviceId, Accessory>>,
    pairing: PairingTracker,
    pairing_task: Mutex<Option<JoinHandle<()>>>,
    poller: Mutex<Option<PollerHandle<C>>>,
}

impl<C: CloudClient> Bridge<C> {
    /// List the account, probe every lock and expose the ones that answered.
    ///
    /// # Errors
    ///
    /// - `EngineError::Core` if the configuration is invalid
    /// - `EngineError::Registry` if the account listing fails
    pub async fn start(client: Arc<C>, config: BridgeConfig, hub: HubBus) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(DeviceRegistry::new(client));
        let changes = registry.refresh().await?;

        let reconciler = Reconciler::new(
            registry,
            Arc::new(StateStore::new()),
            hub.clone(),
            config.reconciler,
        );

        let pairing = PairingTracker::new();
        let pairing_task = tokio::spawn(pairing.clone().run(hub.subscribe_pairing()));

        let bridge = Self {
            config,
            reconciler,
            accessories: RwLock::new(BTreeMap::new()),
            pairing,
            pairing_task: Mutex::new(Some(pairing_task)),
            poller: Mutex::new(None),
        };

        let registered = bridge.register(changes.added).await;
        info!(
            bridge = %bridge.config.name,
            port = bridge.config.port,
            accessories = registered.len(),
            "Bridge started"
        );
        Ok(bridge)
    }

    /// Probe the given devices concurrently and expose those that answer
    /// within the request timeout.
    async fn register(&self, summaries: Vec<DeviceSummary>) -> Vec<DeviceId> {
        let registry = self.reconciler.registry();
        let limit = self.reconciler.config().request_timeout;
        let probes = join_all(
            summaries
                .iter()
                .map(|summary| registry.lookup_within(&summary.id, limit)),
        )
        .await;

        let mut registered = Vec::with_capacity(summaries.len());
        for (summary, probe) in summaries.iter().zip(probes) {
            let handle = match probe {
                Ok(handle) => handle,
                Err(error) => {
                    warn!(device = %summary.id, error = %error, "Initial probe failed, lock not exposed");
                    continue;
                }
            };

            let record = LockRecord::from_probe(&handle, self.config.low_battery_threshold);
            info!(
                device = %summary.id,
                name = %summary.name,
                state = %record.current_state,
                battery = %record.battery_level,
                "Lock registered"
            );
            self.reconciler
                .store()
                .insert(summary.id.clone(), record)
                .await;
            self.accessories
                .write()
                .await
                .insert(summary.id.clone(), Accessory::from_summary(summary, &self.config));
            registered.push(summary.id.clone());
        }
        registered
    }

    async fn unregister(&self, id: &DeviceId) {
        self.reconciler.store().remove(id).await;
        self.accessories.write().await.remove(id);
        info!(device = %id, "Lock unregistered");
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn reconciler(&self) -> &Reconciler<C> {
        &self.reconciler
    }

    pub fn hub(&self) -> &HubBus {
        self.reconciler.hub()
    }

    /// Identification of the bridge itself.
    pub fn bridge_info(&self) -> AccessoryInfo {
        AccessoryInfo {
            name: self.config.name.clone(),
            manufacturer: self.config.manufacturer.clone(),
            model: self.config.model.clone(),
            serial_number: format!("{}:{}", self.config.name, self.config.port),
            firmware_version: Some(lockbridge_core::VERSION.to_string()),
            category: AccessoryCategory::Bridge,
        }
    }

    /// Exposed accessories, ordered by device id.
    pub async fn accessories(&self) -> Vec<Accessory> {
        self.accessories.read().await.values().cloned().collect()
    }

    pub async fn accessory(&self, id: &DeviceId) -> Option<Accessory> {
        self.accessories.read().await.get(id).cloned()
    }

    /// Full record of an exposed lock.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::DeviceNotFound` for locks that are not exposed.
    pub async fn record(&self, id: &DeviceId) -> Result<LockRecord> {
        self.reconciler
            .record(id)
            .await
            .ok_or_else(|| EngineError::DeviceNotFound(id.clone()))
    }

    /// Cached current state.
    pub async fn current_state(&self, id: &DeviceId) -> Result<LockState> {
        Ok(self.record(id).await?.current_state)
    }

    /// Cached target state.
    pub async fn target_state(&self, id: &DeviceId) -> Result<TargetState> {
        Ok(self.record(id).await?.target_state)
    }

    pub async fn battery_level(&self, id: &DeviceId) -> Result<BatteryLevel> {
        Ok(self.record(id).await?.battery_level)
    }

    pub async fn low_battery(&self, id: &DeviceId) -> Result<bool> {
        Ok(self.record(id).await?.low_battery())
    }

    /// Read the lock now and return its current state.
    ///
    /// Goes through the same path as the periodic poller, so a difference
    /// from the cached record is adopted and published. While a cycle owns
    /// the device the cached value is returned.
    ///
    /// # Errors
    ///
    /// `EngineError::DeviceNotFound` for unknown locks, `EngineError::Cloud`
    /// when the lock cannot be read.
    pub async fn refresh_current_state(&self, id: &DeviceId) -> Result<LockState> {
        self.reconciler.sync_physical(id).await?;
        self.current_state(id).await
    }

    /// Run a reconciliation cycle and wait for its outcome.
    pub async fn set_target(&self, id: &DeviceId, desired: TargetState) -> Result<CycleOutcome> {
        self.reconciler.set_target(id, desired).await
    }

    /// Hub setter taking the raw characteristic value.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidTarget` for values other than 0 and 1,
    /// plus every error of [`set_target`](Self::set_target).
    pub async fn set_target_state(&self, id: &DeviceId, raw: u8) -> Result<CycleOutcome> {
        let desired = TargetState::from_u8(raw).map_err(|_| EngineError::InvalidTarget(raw))?;
        self.set_target(id, desired).await
    }

    /// Start a reconciliation cycle in the background.
    ///
    /// The hub expects its write to be acknowledged at once; the outcome
    /// reaches it through [`HubBus`] notifications.
    pub fn spawn_target_request(
        &self,
        id: DeviceId,
        desired: TargetState,
    ) -> JoinHandle<Result<CycleOutcome>> {
        let reconciler = self.reconciler.clone();
        tokio::spawn(async move {
            let outcome = reconciler.set_target(&id, desired).await;
            if let Err(error) = &outcome {
                warn!(device = %id, error = %error, "Target request failed");
            }
            outcome
        })
    }

    /// Re-list the account, expose new locks and drop vanished ones.
    ///
    /// Existing records are left untouched.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Registry` if the listing fails.
    pub async fn refresh_devices(&self) -> Result<RegistryChanges> {
        let mut changes = self.reconciler.registry().refresh().await?;

        // Locks whose startup probe failed are listed but have no record yet
        let snapshot = self.reconciler.registry().snapshot().await;
        for summary in snapshot.values() {
            let known = self.reconciler.store().contains(&summary.id).await;
            if !known && !changes.added.iter().any(|added| added.id == summary.id) {
                changes.added.push(summary.clone());
            }
        }

        let mut poller = self.poller.lock().await;
        for id in &changes.removed {
            self.unregister(id).await;
            if let Some(poller) = poller.as_mut() {
                poller.unwatch(id);
            }
        }

        let registered = self.register(changes.added.clone()).await;
        if let Some(poller) = poller.as_mut() {
            for id in registered {
                poller.watch(id);
            }
        }
        Ok(changes)
    }

    /// Start the periodic physical-change poller. Does nothing if running.
    pub async fn start_poller(&self) {
        let mut poller = self.poller.lock().await;
        if poller.is_none() {
            let handle = PhysicalPoller::new(self.reconciler.clone(), self.config.poller)
                .start()
                .await;
            *poller = Some(handle);
        }
    }

    /// Number of live polling tasks.
    pub async fn polling_tasks(&self) -> usize {
        self.poller
            .lock()
            .await
            .as_ref()
            .map_or(0, PollerHandle::active_tasks)
    }

    /// Controllers currently paired with the hub.
    pub async fn paired_clients(&self) -> Vec<String> {
        self.pairing.paired_clients().await
    }

    /// Stop background work and cancel in-flight cycles.
    pub async fn shutdown(&self) {
        if let Some(poller) = self.poller.lock().await.take() {
            poller.shutdown().await;
        }
        if let Some(task) = self.pairing_task.lock().await.take() {
            task.abort();
        }
        for id in self.reconciler.device_ids().await {
            if let Some(slot) = self.reconciler.store().get(&id).await {
                slot.cancel().await;
            }
        }
        info!(bridge = %self.config.name, "Bridge stopped");
    }
}
