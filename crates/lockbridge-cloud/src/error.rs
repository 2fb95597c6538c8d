//! Error types for cloud API operations.
//!
//! Every call into the lock manufacturer's API may be slow and may fail.
//! This module classifies those failures so the engine can tell an unknown
//! device apart from a transport or authentication problem.

use lockbridge_core::DeviceId;

/// Result type alias for cloud operations.
pub type Result<T> = std::result::Result<T, CloudError>;

/// Errors that can occur while talking to the cloud API.
#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    /// The account has no device with this identifier.
    #[error("Device not found: {device}")]
    DeviceNotFound { device: DeviceId },

    /// Network or HTTP level failure.
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Request did not complete within the allowed time.
    #[error("Request timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Credentials were rejected or the session expired.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

}

impl CloudError {
    /// Create a new device-not-found error.
    pub fn device_not_found(device: DeviceId) -> Self {
        Self::DeviceNotFound { device }
    }

    /// Create a new transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a new timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a new authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::AuthenticationFailed {
            message: message.into(),
        }
    }

    /// Returns `true` if the error means the device does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::DeviceNotFound { .. })
    }
}
