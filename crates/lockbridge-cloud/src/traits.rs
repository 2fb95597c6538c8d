//! Cloud client trait definitions.
//!
//! These traits establish the contract between the reconciliation engine
//! and the lock manufacturer's API: an account-level [`CloudClient`] that
//! lists devices and fetches per-device [`LockHandle`] snapshots.
//!
//! Methods are declared as `fn ... -> impl Future + Send` (Edition 2024
//! RPITIT) so generic engine code can spawn them on a multi-threaded
//! runtime. Implementations are free to write them as plain `async fn`.

use std::future::Future;

use chrono::{DateTime, Utc};
use lockbridge_core::{BatteryLevel, DeviceId, LockState};

use crate::error::Result;
use crate::types::DeviceSummary;

/// Account-level cloud client.
///
/// # Object Safety and Dynamic Dispatch
///
/// **NOTE**: This trait is NOT object-safe because its methods return
/// `impl Future`. Use generic type parameters, or the enum wrapper
/// [`AnyCloudClient`](crate::clients::AnyCloudClient) when a concrete type
/// is needed:
///
/// ```no_run
/// use lockbridge_cloud::{AnyCloudClient, CloudClient};
/// use lockbridge_cloud::mock::MockCloud;
///
/// # async fn example() -> lockbridge_cloud::Result<()> {
/// let (cloud, _handle) = MockCloud::new();
/// let client = AnyCloudClient::Mock(cloud);
/// let devices = client.list_devices().await?;
/// # Ok(())
/// # }
/// ```
pub trait CloudClient: Send + Sync + 'static {
    /// Snapshot handle type produced by [`get_device`](Self::get_device).
    type Handle: LockHandle;

    /// List every lock on the account.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The session is not authenticated
    /// - A transport error occurs
    fn list_devices(&self) -> impl Future<Output = Result<Vec<DeviceSummary>>> + Send;

    /// Fetch a fresh handle for one lock.
    ///
    /// Every call goes to the network; the returned handle reflects the
    /// lock's state at the time of this call only.
    ///
    /// # Errors
    ///
    /// Returns `CloudError::DeviceNotFound` if the account has no such
    /// lock, or a transport/authentication error.
    fn get_device(&self, id: &DeviceId) -> impl Future<Output = Result<Self::Handle>> + Send;
}

/// Snapshot of one physical lock plus its remote actuators.
///
/// The observers (`is_locked`, `is_jammed`, `battery_level`) return the
/// values captured when the handle was fetched. They do not refresh.
pub trait LockHandle: Send + Sync {
    /// Identifier of the lock this handle represents.
    fn device_id(&self) -> &DeviceId;

    /// Name given to the lock in the manufacturer's app.
    fn name(&self) -> &str;

    /// Whether the bolt was extended at fetch time.
    fn is_locked(&self) -> bool;

    /// Whether the lock reported a jam at fetch time.
    fn is_jammed(&self) -> bool;

    /// Battery charge at fetch time.
    fn battery_level(&self) -> BatteryLevel;

    /// When this snapshot was taken.
    fn fetched_at(&self) -> DateTime<Utc>;

    /// Ask the lock to extend its bolt.
    ///
    /// Completion of the request does not mean the bolt has moved; the
    /// caller must observe the lock again to confirm.
    ///
    /// # Errors
    ///
    /// Returns an error if the request could not be delivered.
    fn lock(&self) -> impl Future<Output = Result<()>> + Send;

    /// Ask the lock to retract its bolt.
    ///
    /// # Errors
    ///
    /// Returns an error if the request could not be delivered.
    fn unlock(&self) -> impl Future<Output = Result<()>> + Send;

    /// Classified physical state of this snapshot.
    fn observed_state(&self) -> LockState {
        LockState::from_observation(self.is_locked(), self.is_jammed())
    }
}
