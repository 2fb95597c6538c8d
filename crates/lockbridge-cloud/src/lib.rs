//! Cloud client boundary for the lock bridge.
//!
//! The lock manufacturer's account-level API is the only way to reach the
//! physical locks. This crate defines the contract the reconciliation engine
//! consumes from that API, so the engine never depends on a concrete client.
//!
//! # Design Philosophy
//!
//! - **Async-first**: Every call that may touch the network is asynchronous
//!   and returns a `Send` future, so engine tasks can be spawned on Tokio.
//! - **Snapshot handles**: [`LockHandle`] values carry the lock's state as
//!   of the fetch that produced them. They are never cached across polls;
//!   callers fetch a fresh handle whenever they need fresh state.
//! - **Explicit ownership**: an authenticated client is constructed once and
//!   passed to the engine as a dependency. There is no ambient session.
//! - **Error-aware**: All operations return [`Result<T>`][error::Result].
//!
//! # Example
//!
//! ```
//! use lockbridge_cloud::{CloudClient, LockHandle};
//! use lockbridge_cloud::error::Result;
//!
//! async fn print_locks<C: CloudClient>(client: &C) -> Result<()> {
//!     for summary in client.list_devices().await? {
//!         let handle = client.get_device(&summary.id).await?;
//!         println!("{}: locked={} battery={}", handle.name(), handle.is_locked(), handle.battery_level());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Mock Implementation
//!
//! [`MockCloud`](mock::MockCloud) simulates an account with scriptable locks
//! for development and testing without network access.

pub mod clients;
pub mod error;
pub mod mock;
pub mod traits;
pub mod types;

// Re-export commonly used types for convenience
pub use clients::{AnyCloudClient, AnyLockHandle};
pub use error::{CloudError, Result};
pub use traits::{CloudClient, LockHandle};
pub use types::{Credentials, DeviceSummary};
