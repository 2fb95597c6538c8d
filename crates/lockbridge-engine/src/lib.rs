//! Target-state reconciliation engine for cloud-connected door locks.
//!
//! The hub asks for a lock position; the only way to move the bolt is an
//! account-level cloud API with unpredictable latency. This crate accepts
//! the request, sends the remote actuation, polls the lock until it reports
//! the requested position, a jam, or the deadline passes, and pushes the
//! final state back to the hub.
//!
//! # Components
//!
//! - [`registry`]: identifier → lock mapping, refreshed from the account
//!   listing and swapped atomically
//! - [`record`]: per-device hub-facing state (target, current, battery)
//! - [`cycle`]: the `Idle → Actuating → Polling → Resolved` phase machine
//! - [`reconciler`]: the cycle driver and out-of-band sync
//! - [`poller`]: periodic physical-change detection, one task per lock
//! - [`bridge`]: startup registration and the hub-facing surface
//! - [`hub`]: notification and pairing channels shared with the hub adapter
//!
//! # Data Flow
//!
//! ```text
//! Hub ──set_target_state──► Bridge ──► Reconciler ──lock()/unlock()──► Cloud
//!  ▲                                       │  ▲                          │
//!  │                                       │  └──── fresh lookup ◄───────┘
//!  └────────────── HubEvent ◄── HubBus ◄───┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lockbridge_cloud::mock::MockCloud;
//! use lockbridge_core::{DeviceId, TargetState};
//! use lockbridge_engine::{Bridge, BridgeConfig, CycleOutcome, HubBus};
//!
//! # async fn example() -> lockbridge_engine::Result<()> {
//! let (cloud, accounts) = MockCloud::new();
//! let id = DeviceId::new("A1")?;
//! accounts.add_lock(id.clone(), "Front Door", false).await;
//!
//! let bridge = Bridge::start(Arc::new(cloud), BridgeConfig::default(), HubBus::new()).await?;
//! match bridge.set_target(&id, TargetState::Secured).await? {
//!     CycleOutcome::Confirmed { state } => println!("now {state}"),
//!     CycleOutcome::Jammed => println!("jammed"),
//!     other => println!("{other:?}"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod cycle;
pub mod error;
pub mod hub;
pub mod poller;
pub mod reconciler;
pub mod record;
pub mod registry;

// Re-export commonly used types for convenience
pub use bridge::{Accessory, AccessoryCategory, AccessoryInfo, Bridge, BridgeConfig};
pub use cycle::{CyclePhase, CycleTracker, CycleTransition};
pub use error::{EngineError, Result};
pub use hub::{HubBus, HubEvent, PairingEvent, PairingTracker};
pub use poller::{PhysicalPoller, PollerConfig, PollerHandle};
pub use reconciler::{CycleOutcome, Reconciler, ReconcilerConfig, SyncResult};
pub use record::{DeviceSlot, LockRecord, StateStore};
pub use registry::{DeviceRegistry, RegistryChanges};
