//! Default tuning values for the lock bridge.
//!
//! All durations are expressed in milliseconds so they can be fed directly
//! into `Duration::from_millis` and overridden from the environment.
//!
//! # Usage
//!
//! ```
//! use lockbridge_core::constants::*;
//! use std::time::Duration;
//!
//! let timeout = Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS);
//! let delay = Duration::from_millis(DEFAULT_POLL_INTERVAL_MS);
//! assert!(delay < timeout);
//! ```

// ============================================================================
// Reconciliation
// ============================================================================

/// Delay between two physical-state reads inside one reconciliation cycle.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

/// How long a cycle waits for the bolt to finish moving before it gives up
/// and reports an unconfirmed outcome.
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 10_000;

/// Upper bound on a single cloud request (fetch or actuation) made outside
/// the polling window.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

/// Interval of the out-of-band change detector (manual key turn, other app).
pub const DEFAULT_SYNC_INTERVAL_MS: u64 = 5_000;

/// Maximum number of cycle phase transitions kept per device.
///
/// A complete cycle produces four transitions, so this keeps the last
/// dozen or so cycles for diagnostics.
pub const MAX_CYCLE_HISTORY: usize = 50;

// ============================================================================
// Battery
// ============================================================================

/// Highest valid battery percentage.
pub const MAX_BATTERY_LEVEL: u8 = 100;

/// Battery percentage below which the hub is told the battery is low.
pub const DEFAULT_LOW_BATTERY_THRESHOLD: u8 = 25;

// ============================================================================
// Hub presentation
// ============================================================================

/// Default port the hub transport listens on.
pub const DEFAULT_HUB_PORT: u16 = 51826;

/// Display name of the bridge accessory.
pub const DEFAULT_BRIDGE_NAME: &str = "Lock Bridge";

/// Manufacturer reported in accessory information.
pub const DEFAULT_MANUFACTURER: &str = "Schlage";

/// Model reported in accessory information.
pub const DEFAULT_MODEL: &str = "Wi-Fi Lock";

// ============================================================================
// Channels
// ============================================================================

/// Capacity of the hub notification broadcast channel.
pub const HUB_EVENT_CAPACITY: usize = 256;

/// Capacity of the pairing event broadcast channel.
pub const PAIRING_EVENT_CAPACITY: usize = 32;
