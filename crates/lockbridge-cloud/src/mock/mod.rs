//! Mock cloud implementation for testing and development.
//!
//! This module provides a simulated lock account that can be controlled
//! programmatically without network access or real locks.

pub mod cloud;

// Re-export commonly used types
pub use cloud::{ActuationResponse, MockCloud, MockCloudHandle, MockLockHandle};
