//! Domain vocabulary shared by every lockbridge crate.
//!
//! Defines the identifiers and state values that travel between the hub
//! adapter, the reconciliation engine and the cloud client, together with
//! the core error type and the default tuning constants.

pub mod constants;
pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
