//! Mock lock account implementation.
//!
//! [`MockCloud`] plays the role of the manufacturer's API. The paired
//! [`MockCloudHandle`] scripts how each simulated lock reacts to
//! actuation requests and lets tests change the physical state behind the
//! engine's back (a manual key turn, another app).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lockbridge_core::{BatteryLevel, DeviceId, LockState, TargetState};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{CloudError, Result};
use crate::traits::{CloudClient, LockHandle};
use crate::types::{Credentials, DeviceSummary};

/// How a simulated lock reacts to `lock()`/`unlock()`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ActuationResponse {
    /// The bolt reaches the requested position before the next fetch.
    #[default]
    Immediate,

    /// The bolt reaches the requested position on the N-th fetch after the
    /// request (the API reports stale state until then).
    AfterFetches(u32),

    /// The request is accepted but the bolt never moves.
    Never,

    /// The bolt jams while moving.
    Jam,

    /// The request itself fails with a transport error.
    Fail(String),
}

#[derive(Debug, Clone, Copy)]
struct PendingMove {
    desired: TargetState,
    remaining: u32,
}

#[derive(Debug)]
struct MockLock {
    name: String,
    locked: bool,
    jammed: bool,
    battery: BatteryLevel,
    response: ActuationResponse,
    pending: Option<PendingMove>,
    fetch_failure: Option<String>,
    fetch_delay: Duration,
    actuation_delay: Duration,
    lock_calls: usize,
    unlock_calls: usize,
    fetches: usize,
}

impl MockLock {
    fn new(name: String, locked: bool) -> Self {
        Self {
            name,
            locked,
            jammed: false,
            battery: BatteryLevel::FULL,
            response: ActuationResponse::default(),
            pending: None,
            fetch_failure: None,
            fetch_delay: Duration::ZERO,
            actuation_delay: Duration::ZERO,
            lock_calls: 0,
            unlock_calls: 0,
            fetches: 0,
        }
    }

    fn apply(&mut self, desired: TargetState) {
        self.locked = matches!(desired, TargetState::Secured);
        self.jammed = false;
        self.pending = None;
    }

    fn actuate(&mut self, desired: TargetState) -> Result<()> {
        match desired {
            TargetState::Secured => self.lock_calls += 1,
            TargetState::Unsecured => self.unlock_calls += 1,
        }

        match self.response.clone() {
            ActuationResponse::Immediate | ActuationResponse::AfterFetches(0) => {
                self.apply(desired)
            }
            ActuationResponse::AfterFetches(n) => {
                self.pending = Some(PendingMove {
                    desired,
                    remaining: n,
                });
            }
            ActuationResponse::Never => self.pending = None,
            ActuationResponse::Jam => {
                self.pending = None;
                self.jammed = true;
            }
            ActuationResponse::Fail(message) => return Err(CloudError::transport(message)),
        }
        Ok(())
    }

    /// Advance any in-flight bolt movement by one fetch.
    fn tick(&mut self) {
        self.fetches += 1;
        if let Some(mut pending) = self.pending.take() {
            pending.remaining = pending.remaining.saturating_sub(1);
            if pending.remaining == 0 {
                self.apply(pending.desired);
            } else {
                self.pending = Some(pending);
            }
        }
    }
}

#[derive(Debug, Default)]
struct MockAccount {
    locks: BTreeMap<DeviceId, MockLock>,
    listing_failure: Option<String>,
    listings: usize,
}

type SharedAccount = Arc<Mutex<MockAccount>>;

/// Simulated network latency. The account is not locked while waiting.
async fn latency(account: &SharedAccount, id: &DeviceId, pick: fn(&MockLock) -> Duration) {
    let delay = account
        .lock()
        .await
        .locks
        .get(id)
        .map_or(Duration::ZERO, pick);
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// Simulated lock account.
///
/// # Examples
///
/// ```
/// use lockbridge_cloud::mock::MockCloud;
/// use lockbridge_cloud::{CloudClient, LockHandle};
/// use lockbridge_core::DeviceId;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let (cloud, handle) = MockCloud::new();
///     let id = DeviceId::new("A1")?;
///     handle.add_lock(id.clone(), "Front Door", false).await;
///
///     let lock = cloud.get_device(&id).await?;
///     lock.lock().await?;
///
///     assert!(cloud.get_device(&id).await?.is_locked());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MockCloud {
    account: SharedAccount,
}

impl MockCloud {
    /// Create an empty simulated account.
    ///
    /// Returns a tuple of (MockCloud, MockCloudHandle) where the handle
    /// scripts the simulated locks.
    pub fn new() -> (Self, MockCloudHandle) {
        let account = Arc::new(Mutex::new(MockAccount::default()));
        let cloud = Self {
            account: Arc::clone(&account),
        };
        (cloud, MockCloudHandle { account })
    }

    /// Open a simulated session.
    ///
    /// # Errors
    ///
    /// Returns `CloudError::AuthenticationFailed` if either the username or
    /// the password is blank.
    pub async fn connect(credentials: &Credentials) -> Result<(Self, MockCloudHandle)> {
        if credentials.username.trim().is_empty() || credentials.password.is_empty() {
            return Err(CloudError::authentication("username and password are required"));
        }
        debug!(username = %credentials.username, "Opened simulated cloud session");
        Ok(Self::new())
    }
}

impl CloudClient for MockCloud {
    type Handle = MockLockHandle;

    async fn list_devices(&self) -> Result<Vec<DeviceSummary>> {
        let mut account = self.account.lock().await;
        account.listings += 1;
        if let Some(message) = &account.listing_failure {
            return Err(CloudError::transport(message.clone()));
        }

        Ok(account
            .locks
            .iter()
            .map(|(id, lock)| DeviceSummary::new(id.clone(), lock.name.clone()))
            .collect())
    }

    async fn get_device(&self, id: &DeviceId) -> Result<MockLockHandle> {
        latency(&self.account, id, |lock| lock.fetch_delay).await;

        let mut account = self.account.lock().await;
        let lock = account
            .locks
            .get_mut(id)
            .ok_or_else(|| CloudError::device_not_found(id.clone()))?;

        if let Some(message) = &lock.fetch_failure {
            return Err(CloudError::transport(message.clone()));
        }

        lock.tick();

        Ok(MockLockHandle {
            id: id.clone(),
            name: lock.name.clone(),
            locked: lock.locked,
            jammed: lock.jammed,
            battery: lock.battery,
            fetched_at: Utc::now(),
            account: Arc::clone(&self.account),
        })
    }
}

/// Snapshot handle produced by [`MockCloud::get_device`].
#[derive(Debug, Clone)]
pub struct MockLockHandle {
    id: DeviceId,
    name: String,
    locked: bool,
    jammed: bool,
    battery: BatteryLevel,
    fetched_at: DateTime<Utc>,
    account: SharedAccount,
}

impl MockLockHandle {
    async fn actuate(&self, desired: TargetState) -> Result<()> {
        latency(&self.account, &self.id, |lock| lock.actuation_delay).await;

        let mut account = self.account.lock().await;
        let lock = account
            .locks
            .get_mut(&self.id)
            .ok_or_else(|| CloudError::device_not_found(self.id.clone()))?;
        debug!(device = %self.id, desired = %desired, "Simulated actuation request");
        lock.actuate(desired)
    }
}

impl LockHandle for MockLockHandle {
    fn device_id(&self) -> &DeviceId {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_locked(&self) -> bool {
        self.locked
    }

    fn is_jammed(&self) -> bool {
        self.jammed
    }

    fn battery_level(&self) -> BatteryLevel {
        self.battery
    }

    fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    async fn lock(&self) -> Result<()> {
        self.actuate(TargetState::Secured).await
    }

    async fn unlock(&self) -> Result<()> {
        self.actuate(TargetState::Unsecured).await
    }
}

/// Handle for scripting a [`MockCloud`] account.
///
/// Can be cloned and shared across tasks.
///
/// # Examples
///
/// ```
/// use lockbridge_cloud::mock::{ActuationResponse, MockCloud};
/// use lockbridge_core::DeviceId;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let (_cloud, handle) = MockCloud::new();
///     let id = DeviceId::new("A1")?;
///
///     handle.add_lock(id.clone(), "Front Door", false).await;
///     handle.set_response(&id, ActuationResponse::AfterFetches(2)).await?;
///     handle.set_battery(&id, 20).await?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MockCloudHandle {
    account: SharedAccount,
}

impl MockCloudHandle {
    /// Add (or replace) a simulated lock.
    pub async fn add_lock(&self, id: DeviceId, name: impl Into<String>, locked: bool) {
        let mut account = self.account.lock().await;
        account.locks.insert(id, MockLock::new(name.into(), locked));
    }

    /// Remove a simulated lock from the account.
    ///
    /// Returns `true` if the lock existed.
    pub async fn remove_lock(&self, id: &DeviceId) -> bool {
        self.account.lock().await.locks.remove(id).is_some()
    }

    /// Script how the lock reacts to future actuation requests.
    ///
    /// # Errors
    ///
    /// Returns `CloudError::DeviceNotFound` if the lock does not exist.
    pub async fn set_response(&self, id: &DeviceId, response: ActuationResponse) -> Result<()> {
        self.with_lock(id, |lock| lock.response = response).await
    }

    /// Move the bolt without going through the API (manual key turn).
    ///
    /// # Errors
    ///
    /// Returns `CloudError::DeviceNotFound` if the lock does not exist.
    pub async fn set_locked(&self, id: &DeviceId, locked: bool) -> Result<()> {
        self.with_lock(id, |lock| {
            lock.locked = locked;
            lock.pending = None;
        })
        .await
    }

    /// Set or clear the jam flag.
    ///
    /// # Errors
    ///
    /// Returns `CloudError::DeviceNotFound` if the lock does not exist.
    pub async fn set_jammed(&self, id: &DeviceId, jammed: bool) -> Result<()> {
        self.with_lock(id, |lock| lock.jammed = jammed).await
    }

    /// Set the battery reading, clamped to 0-100.
    ///
    /// # Errors
    ///
    /// Returns `CloudError::DeviceNotFound` if the lock does not exist.
    pub async fn set_battery(&self, id: &DeviceId, level: u8) -> Result<()> {
        self.with_lock(id, |lock| lock.battery = BatteryLevel::saturating(level))
            .await
    }

    /// Make every fetch of this lock fail with a transport error
    /// (`None` restores normal behavior).
    ///
    /// # Errors
    ///
    /// Returns `CloudError::DeviceNotFound` if the lock does not exist.
    pub async fn set_fetch_failure(&self, id: &DeviceId, failure: Option<String>) -> Result<()> {
        self.with_lock(id, |lock| lock.fetch_failure = failure).await
    }

    /// Delay every fetch of this lock by `delay`.
    ///
    /// # Errors
    ///
    /// Returns `CloudError::DeviceNotFound` if the lock does not exist.
    pub async fn set_fetch_delay(&self, id: &DeviceId, delay: Duration) -> Result<()> {
        self.with_lock(id, |lock| lock.fetch_delay = delay).await
    }

    /// Delay every `lock()`/`unlock()` request by `delay` before it reaches
    /// the lock. A request dropped while waiting is never delivered.
    ///
    /// # Errors
    ///
    /// Returns `CloudError::DeviceNotFound` if the lock does not exist.
    pub async fn set_actuation_delay(&self, id: &DeviceId, delay: Duration) -> Result<()> {
        self.with_lock(id, |lock| lock.actuation_delay = delay).await
    }

    /// Make the account listing fail with a transport error
    /// (`None` restores normal behavior).
    pub async fn set_listing_failure(&self, failure: Option<String>) {
        self.account.lock().await.listing_failure = failure;
    }

    /// Current physical state of a simulated lock.
    pub async fn physical_state(&self, id: &DeviceId) -> Option<LockState> {
        let account = self.account.lock().await;
        account
            .locks
            .get(id)
            .map(|lock| LockState::from_observation(lock.locked, lock.jammed))
    }

    /// Number of `lock()` requests received by a simulated lock.
    pub async fn lock_calls(&self, id: &DeviceId) -> usize {
        self.read(id, |lock| lock.lock_calls).await
    }

    /// Number of `unlock()` requests received by a simulated lock.
    pub async fn unlock_calls(&self, id: &DeviceId) -> usize {
        self.read(id, |lock| lock.unlock_calls).await
    }

    /// Total `lock()` plus `unlock()` requests received by a simulated lock.
    pub async fn actuation_calls(&self, id: &DeviceId) -> usize {
        self.read(id, |lock| lock.lock_calls + lock.unlock_calls)
            .await
    }

    /// Number of successful `get_device` fetches of a simulated lock.
    pub async fn fetch_count(&self, id: &DeviceId) -> usize {
        self.read(id, |lock| lock.fetches).await
    }

    /// Number of account listings served.
    pub async fn listing_count(&self) -> usize {
        self.account.lock().await.listings
    }

    /// Number of locks on the simulated account.
    pub async fn lock_count(&self) -> usize {
        self.account.lock().await.locks.len()
    }

    async fn with_lock(&self, id: &DeviceId, f: impl FnOnce(&mut MockLock)) -> Result<()> {
        let mut account = self.account.lock().await;
        let lock = account
            .locks
            .get_mut(id)
            .ok_or_else(|| CloudError::device_not_found(id.clone()))?;
        f(lock);
        Ok(())
    }

    async fn read(&self, id: &DeviceId, f: impl FnOnce(&MockLock) -> usize) -> usize {
        let account = self.account.lock().await;
        account.locks.get(id).map(f).unwrap_or(0)
    }
}
