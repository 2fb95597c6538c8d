use crate::{Result, constants::MAX_BATTERY_LEVEL, error::Error};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of one physical lock on the account.
///
/// Opaque to this crate: whatever the cloud account listing reports is used
/// verbatim (after trimming) as the routing key between hub requests and
/// remote lock handles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a new device ID with validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidDeviceId` if the identifier is empty or blank.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidDeviceId(
                "device identifier must not be empty".to_string(),
            ));
        }
        Ok(DeviceId(trimmed.to_string()))
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DeviceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DeviceId::new(s)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        DeviceId::new(value)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

/// Physical lock state as reported to the hub.
///
/// Jam is a first-class observation rather than an error: the hub renders
/// it distinctly from both locked and unlocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum LockState {
    Unsecured = 0,
    Secured = 1,
    Jammed = 2,
}

impl LockState {
    /// Create a lock state from its hub characteristic value.
    ///
    /// # Errors
    /// Returns `Error::InvalidLockState` if the value is not 0, 1, or 2.
    #[inline]
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(LockState::Unsecured),
            1 => Ok(LockState::Secured),
            2 => Ok(LockState::Jammed),
            _ => Err(Error::InvalidLockState(value)),
        }
    }

    /// Convert the lock state to its hub characteristic value.
    #[inline]
    #[must_use]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Classify a raw observation of the physical lock.
    ///
    /// A jam wins over the bolt position.
    #[inline]
    #[must_use]
    pub fn from_observation(is_locked: bool, is_jammed: bool) -> Self {
        if is_jammed {
            LockState::Jammed
        } else if is_locked {
            LockState::Secured
        } else {
            LockState::Unsecured
        }
    }

    /// Returns `true` if the lock reported a jam.
    #[inline]
    #[must_use]
    pub fn is_jammed(self) -> bool {
        matches!(self, LockState::Jammed)
    }

    /// The requestable state matching this observation, if any.
    ///
    /// `Jammed` has no requestable counterpart.
    #[inline]
    #[must_use]
    pub fn as_target(self) -> Option<TargetState> {
        match self {
            LockState::Unsecured => Some(TargetState::Unsecured),
            LockState::Secured => Some(TargetState::Secured),
            LockState::Jammed => None,
        }
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LockState::Unsecured => write!(f, "Unsecured"),
            LockState::Secured => write!(f, "Secured"),
            LockState::Jammed => write!(f, "Jammed"),
        }
    }
}

/// State the hub may request. Jammed is never a valid target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TargetState {
    Unsecured = 0,
    Secured = 1,
}

impl TargetState {
    /// Create a target state from a hub characteristic write.
    ///
    /// # Errors
    /// Returns `Error::InvalidTargetState` for anything other than 0 or 1.
    #[inline]
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(TargetState::Unsecured),
            1 => Ok(TargetState::Secured),
            _ => Err(Error::InvalidTargetState(value)),
        }
    }

    #[inline]
    #[must_use]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// The physical state that confirms this target.
    #[inline]
    #[must_use]
    pub fn as_lock_state(self) -> LockState {
        match self {
            TargetState::Unsecured => LockState::Unsecured,
            TargetState::Secured => LockState::Secured,
        }
    }

    /// Returns `true` if `observed` confirms this target.
    #[inline]
    #[must_use]
    pub fn is_satisfied_by(self, observed: LockState) -> bool {
        self.as_lock_state() == observed
    }
}

impl From<TargetState> for LockState {
    fn from(target: TargetState) -> Self {
        target.as_lock_state()
    }
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_lock_state())
    }
}

/// Battery charge percentage (0-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct BatteryLevel(u8);

impl BatteryLevel {
    /// A fully charged battery.
    pub const FULL: BatteryLevel = BatteryLevel(MAX_BATTERY_LEVEL);

    /// Create a battery level with validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidBatteryLevel` if the value exceeds 100.
    pub fn new(level: u8) -> Result<Self> {
        if level > MAX_BATTERY_LEVEL {
            return Err(Error::InvalidBatteryLevel(level));
        }
        Ok(BatteryLevel(level))
    }

    /// Create a battery level, clamping out-of-range readings to 100.
    ///
    /// Cloud readings are occasionally out of range; they are clamped
    /// rather than rejected so a single bad reading never hides the lock.
    #[must_use]
    pub fn saturating(level: u8) -> Self {
        BatteryLevel(level.min(MAX_BATTERY_LEVEL))
    }

    #[must_use]
    pub fn as_u8(&self) -> u8 {
        self.0
    }

    /// Returns `true` if the level is strictly below `threshold`.
    #[inline]
    #[must_use]
    pub fn is_low(&self, threshold: u8) -> bool {
        self.0 < threshold
    }
}

impl TryFrom<u8> for BatteryLevel {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        BatteryLevel::new(value)
    }
}

impl From<BatteryLevel> for u8 {
    fn from(level: BatteryLevel) -> Self {
        level.0
    }
}

impl fmt::Display for BatteryLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}
