use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Value errors
    #[error("Invalid device identifier: {0}")]
    InvalidDeviceId(String),

    #[error("Invalid lock state value: {0}")]
    InvalidLockState(u8),

    #[error("Invalid target state value: {0} (only 0 and 1 are requestable)")]
    InvalidTargetState(u8),

    #[error("Invalid battery level: {0} (expected 0-100)")]
    InvalidBatteryLevel(u8),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing configuration key: {0}")]
    MissingConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
