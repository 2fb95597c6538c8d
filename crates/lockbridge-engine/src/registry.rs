//! Device registry.
//!
//! Maps stable device identifiers to the account's locks. The mapping is an
//! immutable snapshot behind an `Arc`: [`DeviceRegistry::refresh`] builds a
//! complete new map and swaps it in with a single pointer write, so readers
//! see either the old or the new listing and never a mix of both.
//!
//! Handles are not cached. Every [`DeviceRegistry::lookup`] goes back to the
//! cloud because the lock may have been turned by hand since the last read.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use lockbridge_cloud::{CloudClient, CloudError, DeviceSummary};
use lockbridge_core::DeviceId;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};

type Snapshot = Arc<BTreeMap<DeviceId, DeviceSummary>>;

/// Devices that appeared or disappeared during a refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryChanges {
    /// Newly listed devices.
    pub added: Vec<DeviceSummary>,

    /// Devices no longer listed.
    pub removed: Vec<DeviceId>,
}

impl RegistryChanges {
    /// Returns `true` if the refresh changed nothing.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Identifier-keyed view of the account's locks.
#[derive(Debug)]
pub struct DeviceRegistry<C> {
    client: Arc<C>,
    snapshot: RwLock<Snapshot>,
}

impl<C: CloudClient> DeviceRegistry<C> {
    /// Create an empty registry. Call [`refresh`](Self::refresh) to populate it.
    pub fn new(client: Arc<C>) -> Self {
        Self {
            client,
            snapshot: RwLock::new(Arc::new(BTreeMap::new())),
        }
    }

    /// The cloud client backing this registry.
    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Re-list the account and replace the mapping atomically.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Registry` if the listing fails; the previous
    /// snapshot stays in place.
    pub async fn refresh(&self) -> Result<RegistryChanges> {
        let listing = self
            .client
            .list_devices()
            .await
            .map_err(EngineError::Registry)?;

        let next: BTreeMap<DeviceId, DeviceSummary> = listing
            .into_iter()
            .map(|summary| (summary.id.clone(), summary))
            .collect();

        let mut snapshot = self.snapshot.write().await;
        let changes = RegistryChanges {
            added: next
                .values()
                .filter(|summary| !snapshot.contains_key(&summary.id))
                .cloned()
                .collect(),
            removed: snapshot
                .keys()
                .filter(|id| !next.contains_key(*id))
                .cloned()
                .collect(),
        };
        *snapshot = Arc::new(next);

        info!(
            devices = snapshot.len(),
            added = changes.added.len(),
            removed = changes.removed.len(),
            "Device registry refreshed"
        );
        Ok(changes)
    }

    /// Fetch a fresh handle for a registered device.
    ///
    /// # Errors
    ///
    /// - `EngineError::DeviceNotFound` if the identifier is not in the
    ///   current snapshot, or the account no longer knows it
    /// - `EngineError::Cloud` for transport or authentication failures
    pub async fn lookup(&self, id: &DeviceId) -> Result<C::Handle> {
        if !self.contains(id).await {
            return Err(EngineError::DeviceNotFound(id.clone()));
        }

        debug!(device = %id, "Fetching lock handle");
        self.client.get_device(id).await.map_err(|error| match error {
            CloudError::DeviceNotFound { .. } => EngineError::DeviceNotFound(id.clone()),
            other => EngineError::Cloud(other),
        })
    }

    /// [`lookup`](Self::lookup) that gives up after `limit`.
    ///
    /// # Errors
    ///
    /// Same as [`lookup`](Self::lookup), plus `EngineError::Cloud` carrying
    /// `CloudError::Timeout` when the fetch does not complete in time.
    pub async fn lookup_within(&self, id: &DeviceId, limit: Duration) -> Result<C::Handle> {
        match tokio::time::timeout(limit, self.lookup(id)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(device = %id, timeout_ms = limit.as_millis() as u64, "Lock fetch timed out");
                Err(EngineError::Cloud(CloudError::timeout(
                    limit.as_millis() as u64
                )))
            }
        }
    }

    /// Current snapshot.
    pub async fn snapshot(&self) -> Snapshot {
        Arc::clone(&*self.snapshot.read().await)
    }

    /// All registered devices, ordered by identifier.
    pub async fn devices(&self) -> Vec<DeviceSummary> {
        self.snapshot().await.values().cloned().collect()
    }

    /// Returns `true` if the identifier is in the current snapshot.
    pub async fn contains(&self, id: &DeviceId) -> bool {
        self.snapshot.read().await.contains_key(id)
    }

    /// Listing entry for one device.
    pub async fn summary(&self, id: &DeviceId) -> Option<DeviceSummary> {
        self.snapshot.read().await.get(id).cloned()
    }

    /// Number of registered devices.
    pub async fn len(&self) -> usize {
        self.snapshot.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
