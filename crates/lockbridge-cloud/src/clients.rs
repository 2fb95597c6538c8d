//! Enum wrappers for cloud client dispatch.
//!
//! Native async trait methods are not object-safe, so `Box<dyn CloudClient>`
//! is unavailable. These enums give the binary a single concrete client type
//! while keeping static dispatch.
//!
//! # Examples
//!
//! ```
//! use lockbridge_cloud::AnyCloudClient;
//! use lockbridge_cloud::mock::MockCloud;
//!
//! let (cloud, _handle) = MockCloud::new();
//! let client = AnyCloudClient::Mock(cloud);
//! ```

use chrono::{DateTime, Utc};
use lockbridge_core::{BatteryLevel, DeviceId};

use crate::mock::{MockCloud, MockLockHandle};
use crate::traits::{CloudClient, LockHandle};
use crate::{DeviceSummary, Result};

/// Enum wrapper for cloud client dispatch.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyCloudClient {
    /// Simulated account for development and testing.
    Mock(MockCloud),
}

impl CloudClient for AnyCloudClient {
    type Handle = AnyLockHandle;

    async fn list_devices(&self) -> Result<Vec<DeviceSummary>> {
        match self {
            Self::Mock(client) => client.list_devices().await,
        }
    }

    async fn get_device(&self, id: &DeviceId) -> Result<AnyLockHandle> {
        match self {
            Self::Mock(client) => client.get_device(id).await.map(AnyLockHandle::Mock),
        }
    }
}

/// Enum wrapper for lock handle dispatch.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyLockHandle {
    /// Handle produced by [`MockCloud`].
    Mock(MockLockHandle),
}

impl LockHandle for AnyLockHandle {
    fn device_id(&self) -> &DeviceId {
        match self {
            Self::Mock(handle) => handle.device_id(),
        }
    }

    fn name(&self) -> &str {
        match self {
            Self::Mock(handle) => handle.name(),
        }
    }

    fn is_locked(&self) -> bool {
        match self {
            Self::Mock(handle) => handle.is_locked(),
        }
    }

    fn is_jammed(&self) -> bool {
        match self {
            Self::Mock(handle) => handle.is_jammed(),
        }
    }

    fn battery_level(&self) -> BatteryLevel {
        match self {
            Self::Mock(handle) => handle.battery_level(),
        }
    }

    fn fetched_at(&self) -> DateTime<Utc> {
        match self {
            Self::Mock(handle) => handle.fetched_at(),
        }
    }

    async fn lock(&self) -> Result<()> {
        match self {
            Self::Mock(handle) => handle.lock().await,
        }
    }

    async fn unlock(&self) -> Result<()> {
        match self {
            Self::Mock(handle) => handle.unlock().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockbridge_core::LockState;

    #[tokio::test]
    async fn test_any_cloud_client_mock() {
        let (cloud, handle) = MockCloud::new();
        let id = DeviceId::new("A1").unwrap();
        handle.add_lock(id.clone(), "Front Door", false).await;

        let client = AnyCloudClient::Mock(cloud);
        let devices = client.list_devices().await.unwrap();
        assert_eq!(devices.len(), 1);

        let lock = client.get_device(&id).await.unwrap();
        assert_eq!(lock.name(), "Front Door");
        assert_eq!(lock.observed_state(), LockState::Unsecured);

        lock.lock().await.unwrap();
        let lock = client.get_device(&id).await.unwrap();
        assert_eq!(lock.observed_state(), LockState::Secured);
    }
}
