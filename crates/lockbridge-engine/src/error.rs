use lockbridge_cloud::CloudError;
use lockbridge_core::DeviceId;
use thiserror::Error;

use crate::cycle::CyclePhase;

/// Errors surfaced by the reconciliation engine.
///
/// Jams and unconfirmed (timed out) cycles are not errors; they are
/// reported as [`CycleOutcome`](crate::reconciler::CycleOutcome) values.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No device with this identifier exists in the current registry snapshot.
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceId),

    /// The remote `lock()`/`unlock()` call failed.
    #[error("Actuation failed for {device}: {source}")]
    ActuationFailed {
        device: DeviceId,
        #[source]
        source: CloudError,
    },

    /// A poll inside a reconciliation cycle could not read the lock.
    #[error("Observation failed for {device}: {source}")]
    ObservationFailed {
        device: DeviceId,
        #[source]
        source: CloudError,
    },

    /// The account-level device listing failed.
    #[error("Device listing failed: {0}")]
    Registry(#[source] CloudError),

    /// The hub wrote a value that is not a requestable target.
    #[error("Invalid target state value: {0}")]
    InvalidTarget(u8),

    /// A cycle phase change that the state machine does not allow.
    #[error("Invalid cycle transition from {from} to {to}")]
    InvalidTransition { from: CyclePhase, to: CyclePhase },

    /// Any other cloud failure.
    #[error("Cloud error: {0}")]
    Cloud(#[from] CloudError),

    /// Value or configuration error from the shared vocabulary.
    #[error(transparent)]
    Core(#[from] lockbridge_core::Error),
}

/// Specialized result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
