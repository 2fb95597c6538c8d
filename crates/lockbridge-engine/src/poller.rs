//! Periodic physical-change poller.
//!
//! Detects changes made outside the hub (a key turned by hand, another app)
//! by observing every registered lock at a fixed interval. Each device gets
//! its own task, so a slow cloud call for one lock never delays the others.
//!
//! ```text
//! ┌──────────┐  sync_physical  ┌────────────┐
//! │ A1 task  │───────────────► │            │
//! └──────────┘                 │ Reconciler │──► HubBus
//! ┌──────────┐  sync_physical  │            │
//! │ B2 task  │───────────────► │            │
//! └──────────┘                 └────────────┘
//! ```
//!
//! A device inside a reconciliation cycle is skipped for that tick. A task
//! ends on its own once its device disappears from the registry; any other
//! failure is logged and retried on the next tick.
//!
//! # Examples
//!
//! ```no_run
//! use lockbridge_engine::poller::{PhysicalPoller, PollerConfig};
//! use lockbridge_engine::reconciler::Reconciler;
//! use lockbridge_cloud::mock::MockCloud;
//!
//! # async fn example(reconciler: Reconciler<MockCloud>) {
//! let handle = PhysicalPoller::new(reconciler, PollerConfig::default())
//!     .start()
//!     .await;
//!
//! // ... run ...
//!
//! handle.shutdown().await;
//! # }
//! ```

use std::collections::HashMap;
use std::time::Duration;

use lockbridge_cloud::CloudClient;
use lockbridge_core::DeviceId;
use lockbridge_core::constants::DEFAULT_SYNC_INTERVAL_MS;
use tokio::task::{AbortHandle, JoinError, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::reconciler::{Reconciler, SyncResult};

/// Poller timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    /// Time between two observations of the same lock.
    pub interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_SYNC_INTERVAL_MS),
        }
    }
}

impl PollerConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Builder for the per-device polling tasks.
pub struct PhysicalPoller<C> {
    reconciler: Reconciler<C>,
    config: PollerConfig,
}

impl<C: CloudClient> PhysicalPoller<C> {
    pub fn new(reconciler: Reconciler<C>, config: PollerConfig) -> Self {
        Self { reconciler, config }
    }

    /// Spawn one task per device currently in the state store.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn start(self) -> PollerHandle<C> {
        let mut handle = PollerHandle {
            reconciler: self.reconciler,
            config: self.config,
            tasks: JoinSet::new(),
            watched: HashMap::new(),
        };

        for id in handle.reconciler.device_ids().await {
            handle.watch(id);
        }
        info!(
            devices = handle.watched.len(),
            interval_ms = handle.config.interval.as_millis() as u64,
            "Physical poller started"
        );
        handle
    }
}

/// Running poller.
///
/// Dropping the handle aborts every task; [`shutdown`](Self::shutdown)
/// also waits for them and reports how they ended.
pub struct PollerHandle<C> {
    reconciler: Reconciler<C>,
    config: PollerConfig,
    tasks: JoinSet<Result<()>>,
    watched: HashMap<DeviceId, AbortHandle>,
}

impl<C: CloudClient> PollerHandle<C> {
    /// Start polling a device. Does nothing if it is already polled.
    ///
    /// Returns `true` if a new task was spawned.
    pub fn watch(&mut self, id: DeviceId) -> bool {
        self.reap();
        if self
            .watched
            .get(&id)
            .is_some_and(|task| !task.is_finished())
        {
            return false;
        }

        debug!(device = %id, "Watching device");
        let task = self.tasks.spawn(poll_device(
            self.reconciler.clone(),
            id.clone(),
            self.config.interval,
        ));
        self.watched.insert(id, task);
        true
    }

    /// Stop polling a device.
    ///
    /// Returns `true` if the device was being polled.
    pub fn unwatch(&mut self, id: &DeviceId) -> bool {
        match self.watched.remove(id) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    /// Number of devices with a live polling task.
    pub fn active_tasks(&self) -> usize {
        self.watched
            .values()
            .filter(|task| !task.is_finished())
            .count()
    }

    /// Returns `true` if the device has a live polling task.
    pub fn is_watching(&self, id: &DeviceId) -> bool {
        self.watched.get(id).is_some_and(|task| !task.is_finished())
    }

    /// Abort every task and wait for all of them to terminate.
    ///
    /// Task errors and panics are counted and logged; they never fail
    /// the shutdown.
    pub async fn shutdown(mut self) {
        self.tasks.abort_all();

        let mut counts = TerminationCounts::default();
        while let Some(result) = self.tasks.join_next().await {
            counts.record(classify_task_result(result));
        }

        if counts.errors + counts.panics > 0 {
            warn!(
                errors = counts.errors,
                panics = counts.panics,
                "Physical poller stopped with failed tasks"
            );
        }
        info!(
            completed = counts.completed,
            cancelled = counts.cancelled,
            "Physical poller stopped"
        );
    }

    /// Collect results of tasks that already finished.
    fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            if classify_task_result(result) == TaskTermination::Panic {
                warn!("A polling task panicked");
            }
        }
        self.watched.retain(|_, task| !task.is_finished());
    }
}

async fn poll_device<C: CloudClient>(
    reconciler: Reconciler<C>,
    id: DeviceId,
    period: Duration,
) -> Result<()> {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match reconciler.sync_physical(&id).await {
            Ok(SyncResult::Skipped) => debug!(device = %id, "Device busy, poll skipped"),
            Ok(_) => {}
            Err(EngineError::DeviceNotFound(_)) => {
                info!(device = %id, "Device no longer registered, polling stopped");
                return Ok(());
            }
            Err(error) => warn!(device = %id, error = %error, "Physical poll failed"),
        }
    }
}

/// Task termination classification for shutdown handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskTermination {
    /// Task returned normally.
    Success,
    /// Task returned an error.
    Error,
    /// Task was aborted (expected during shutdown).
    Cancelled,
    /// Task panicked.
    Panic,
}

fn classify_task_result(result: std::result::Result<Result<()>, JoinError>) -> TaskTermination {
    match result {
        Ok(Ok(())) => TaskTermination::Success,
        Ok(Err(_)) => TaskTermination::Error,
        Err(e) if e.is_cancelled() => TaskTermination::Cancelled,
        Err(_) => TaskTermination::Panic,
    }
}

#[derive(Debug, Default)]
struct TerminationCounts {
    completed: usize,
    errors: usize,
    cancelled: usize,
    panics: usize,
}

impl TerminationCounts {
    fn record(&mut self, termination: TaskTermination) {
        match termination {
            TaskTermination::Success => self.completed += 1,
            TaskTermination::Error => self.errors += 1,
            TaskTermination::Cancelled => self.cancelled += 1,
            TaskTermination::Panic => self.panics += 1,
        }
    }
}
