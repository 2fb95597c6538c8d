//! Hub adapter boundary.
//!
//! The home-automation library owns pairing and transport. The engine talks
//! to it through two broadcast channels carried by [`HubBus`]:
//!
//! ```text
//! ┌────────────┐  HubEvent (target/current/battery)  ┌─────────────┐
//! │   Engine   │ ──────────────────────────────────► │ Hub Adapter │
//! │            │ ◄────────────────────────────────── │             │
//! └────────────┘  PairingEvent (paired/unpaired)     └─────────────┘
//! ```
//!
//! Publishing never blocks and never fails: with no subscriber attached the
//! notification is simply dropped, and a lagging subscriber loses the
//! oldest notifications rather than stalling reconciliation.

use std::collections::BTreeSet;
use std::sync::Arc;

use lockbridge_core::constants::{HUB_EVENT_CAPACITY, PAIRING_EVENT_CAPACITY};
use lockbridge_core::{BatteryLevel, DeviceId, LockState, TargetState};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};

/// Notification pushed from the engine to the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum HubEvent {
    /// The target state characteristic changed.
    TargetStateChanged { device: DeviceId, state: TargetState },

    /// The current state characteristic changed.
    CurrentStateChanged { device: DeviceId, state: LockState },

    /// A new battery reading was stored.
    BatteryChanged {
        device: DeviceId,
        level: BatteryLevel,
        low_battery: bool,
    },
}

impl HubEvent {
    /// Device the notification refers to.
    pub fn device(&self) -> &DeviceId {
        match self {
            Self::TargetStateChanged { device, .. }
            | Self::CurrentStateChanged { device, .. }
            | Self::BatteryChanged { device, .. } => device,
        }
    }
}

/// Pairing lifecycle notification from the hub adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PairingEvent {
    /// A controller completed pairing.
    Paired { client_id: String },

    /// A controller was removed.
    Unpaired { client_id: String },
}

/// Two-way notification bus between the engine and the hub adapter.
///
/// Cheap to clone; every clone publishes into the same channels.
///
/// # Examples
///
/// ```
/// use lockbridge_core::{DeviceId, TargetState};
/// use lockbridge_engine::hub::{HubBus, HubEvent};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let bus = HubBus::new();
/// let mut rx = bus.subscribe();
///
/// let device = DeviceId::new("A1").unwrap();
/// bus.publish(HubEvent::TargetStateChanged { device, state: TargetState::Secured });
///
/// assert!(matches!(rx.recv().await, Ok(HubEvent::TargetStateChanged { .. })));
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HubBus {
    events: broadcast::Sender<HubEvent>,
    pairing: broadcast::Sender<PairingEvent>,
}

impl HubBus {
    /// Create a bus with the default channel capacities.
    pub fn new() -> Self {
        Self::with_capacity(HUB_EVENT_CAPACITY, PAIRING_EVENT_CAPACITY)
    }

    /// Create a bus with explicit channel capacities.
    pub fn with_capacity(events: usize, pairing: usize) -> Self {
        let (events, _) = broadcast::channel(events.max(1));
        let (pairing, _) = broadcast::channel(pairing.max(1));
        Self { events, pairing }
    }

    /// Push a state notification to the hub.
    pub fn publish(&self, event: HubEvent) {
        if self.events.send(event).is_err() {
            debug!("No hub subscriber attached, notification dropped");
        }
    }

    /// Subscribe to state notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }

    /// Report a pairing change (called by the hub adapter).
    pub fn publish_pairing(&self, event: PairingEvent) {
        if self.pairing.send(event).is_err() {
            debug!("No pairing subscriber attached, event dropped");
        }
    }

    /// Subscribe to pairing changes.
    pub fn subscribe_pairing(&self) -> broadcast::Receiver<PairingEvent> {
        self.pairing.subscribe()
    }
}

impl Default for HubBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps the set of paired controllers in sync with pairing events.
#[derive(Debug, Clone, Default)]
pub struct PairingTracker {
    clients: Arc<RwLock<BTreeSet<String>>>,
}

impl PairingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event. Returns `true` if the paired set changed.
    pub async fn apply(&self, event: &PairingEvent) -> bool {
        let mut clients = self.clients.write().await;
        match event {
            PairingEvent::Paired { client_id } => clients.insert(client_id.clone()),
            PairingEvent::Unpaired { client_id } => clients.remove(client_id),
        }
    }

    /// Consume pairing events until the bus is dropped.
    pub async fn run(self, mut rx: broadcast::Receiver<PairingEvent>) {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if self.apply(&event).await {
                        let paired = self.clients.read().await.len();
                        match &event {
                            PairingEvent::Paired { client_id } => {
                                info!(client = %client_id, paired, "Controller paired")
                            }
                            PairingEvent::Unpaired { client_id } => {
                                info!(client = %client_id, paired, "Controller unpaired")
                            }
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Pairing events dropped, paired set may be stale");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Identifiers of the currently paired controllers, sorted.
    pub async fn paired_clients(&self) -> Vec<String> {
        self.clients.read().await.iter().cloned().collect()
    }

    /// Returns `true` if at least one controller is paired.
    pub async fn is_paired(&self) -> bool {
        !self.clients.read().await.is_empty()
    }
}
