use std::str::FromStr;
use std::time::Duration;

use lockbridge_cloud::Credentials;
use lockbridge_core::constants::{
    DEFAULT_BRIDGE_NAME, DEFAULT_HUB_PORT, DEFAULT_LOW_BATTERY_THRESHOLD,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_POLL_TIMEOUT_MS, DEFAULT_REQUEST_TIMEOUT_MS,
    DEFAULT_SYNC_INTERVAL_MS,
};
use lockbridge_core::{DeviceId, Error, Result};
use lockbridge_engine::{BridgeConfig, PollerConfig, ReconcilerConfig};

const DEFAULT_SIMULATED_LOCKS: &str = "front-door:Front Door";

/// A lock seeded into the simulated account at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedLock {
    pub id: DeviceId,
    pub name: String,
}

/// Process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub credentials: Credentials,
    pub bridge: BridgeConfig,
    pub simulated_locks: Vec<SimulatedLock>,
}

impl AppConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                         | Default                 |
    /// |---------------------------------|-------------------------|
    /// | `LOCKBRIDGE_USERNAME`           | required                |
    /// | `LOCKBRIDGE_PASSWORD`           | required                |
    /// | `LOCKBRIDGE_PORT`               | `51826`                 |
    /// | `LOCKBRIDGE_BRIDGE_NAME`        | `Lock Bridge`           |
    /// | `LOCKBRIDGE_POLL_INTERVAL_MS`   | `2000`                  |
    /// | `LOCKBRIDGE_POLL_TIMEOUT_MS`    | `10000`                 |
    /// | `LOCKBRIDGE_REQUEST_TIMEOUT_MS` | `5000`                  |
    /// | `LOCKBRIDGE_SYNC_INTERVAL_MS`   | `5000`                  |
    /// | `LOCKBRIDGE_LOW_BATTERY`        | `25`                    |
    /// | `LOCKBRIDGE_SIMULATED_LOCKS`    | `front-door:Front Door` |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| Error::MissingConfig(key.to_string()))
        };

        let credentials = Credentials::new(
            required("LOCKBRIDGE_USERNAME")?,
            required("LOCKBRIDGE_PASSWORD")?,
        );

        let port: u16 = parse_or(&lookup, "LOCKBRIDGE_PORT", DEFAULT_HUB_PORT)?;
        let name = lookup("LOCKBRIDGE_BRIDGE_NAME")
            .unwrap_or_else(|| DEFAULT_BRIDGE_NAME.to_string());
        let poll_interval_ms: u64 =
            parse_or(&lookup, "LOCKBRIDGE_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?;
        let poll_timeout_ms: u64 =
            parse_or(&lookup, "LOCKBRIDGE_POLL_TIMEOUT_MS", DEFAULT_POLL_TIMEOUT_MS)?;
        let request_timeout_ms: u64 =
            parse_or(&lookup, "LOCKBRIDGE_REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS)?;
        let sync_interval_ms: u64 =
            parse_or(&lookup, "LOCKBRIDGE_SYNC_INTERVAL_MS", DEFAULT_SYNC_INTERVAL_MS)?;
        let low_battery: u8 =
            parse_or(&lookup, "LOCKBRIDGE_LOW_BATTERY", DEFAULT_LOW_BATTERY_THRESHOLD)?;

        let bridge = BridgeConfig::default()
            .with_name(name)
            .with_port(port)
            .with_low_battery_threshold(low_battery)
            .with_reconciler(
                ReconcilerConfig::default()
                    .with_poll_interval(Duration::from_millis(poll_interval_ms))
                    .with_poll_timeout(Duration::from_millis(poll_timeout_ms))
                    .with_request_timeout(Duration::from_millis(request_timeout_ms)),
            )
            .with_poller(
                PollerConfig::default().with_interval(Duration::from_millis(sync_interval_ms)),
            );
        bridge.validate()?;

        let simulated_locks = parse_locks(
            &lookup("LOCKBRIDGE_SIMULATED_LOCKS")
                .unwrap_or_else(|| DEFAULT_SIMULATED_LOCKS.to_string()),
        )?;

        Ok(Self {
            credentials,
            bridge,
            simulated_locks,
        })
    }
}

fn parse_or<T: FromStr>(lookup: impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{key} must be a valid number, got {raw:?}"))),
        None => Ok(default),
    }
}

/// Parse comma separated `id:name` pairs. A missing name defaults to the id.
fn parse_locks(raw: &str) -> Result<Vec<SimulatedLock>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| -> Result<SimulatedLock> {
            let (id, name) = entry.split_once(':').unwrap_or((entry, entry));
            Ok(SimulatedLock {
                id: DeviceId::new(id)?,
                name: name.trim().to_string(),
            })
        })
        .collect()
}
