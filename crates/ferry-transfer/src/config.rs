//! Sender and receiver tuning.
//!
//! Defaults match the protocol constants in [`crate::protocol`]. Binaries
//! override them through `FERRY_*` environment variables (optionally loaded
//! from a `.env` file).

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ConfigError;
use crate::logging::TransferLogger;
use crate::protocol::*;

/// Configuration for the sender.
#[derive(Clone)]
pub struct SenderConfig {
    /// Chunks allowed in flight at once.
    pub window_size: u32,
    /// Transmissions of one chunk before the transfer is abandoned.
    pub max_sends: u32,
    /// How long to wait for an acknowledgment before resending the window.
    pub ack_timeout: Duration,
    /// Send rounds for the end-of-stream marker.
    pub eof_max_rounds: u32,
    /// Payload bytes per chunk.
    pub max_payload: usize,
    /// Wire copies of each data or EOF packet per send.
    pub data_copies: u32,
    pub logger: Option<Arc<dyn TransferLogger>>,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            window_size: WINDOW_SIZE,
            max_sends: MAX_SENDS,
            ack_timeout: Duration::from_millis(ACK_TIMEOUT_MS),
            eof_max_rounds: EOF_MAX_ROUNDS,
            max_payload: MAX_PAYLOAD,
            data_copies: DATA_COPIES,
            logger: None,
        }
    }
}

impl SenderConfig {
    /// Defaults overridden by `FERRY_WINDOW_SIZE`, `FERRY_MAX_SENDS`,
    /// `FERRY_ACK_TIMEOUT_MS`, `FERRY_EOF_MAX_ROUNDS`, `FERRY_MAX_PAYLOAD`
    /// and `FERRY_DATA_COPIES`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            window_size: env_setting("FERRY_WINDOW_SIZE", defaults.window_size)?,
            max_sends: env_setting("FERRY_MAX_SENDS", defaults.max_sends)?,
            ack_timeout: Duration::from_millis(env_setting(
                "FERRY_ACK_TIMEOUT_MS",
                ACK_TIMEOUT_MS,
            )?),
            eof_max_rounds: env_setting("FERRY_EOF_MAX_ROUNDS", defaults.eof_max_rounds)?,
            max_payload: env_setting("FERRY_MAX_PAYLOAD", defaults.max_payload)?,
            data_copies: env_setting("FERRY_DATA_COPIES", defaults.data_copies)?,
            logger: None,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        at_least_one("window_size", self.window_size)?;
        at_least_one("max_sends", self.max_sends)?;
        at_least_one("eof_max_rounds", self.eof_max_rounds)?;
        at_least_one("data_copies", self.data_copies)?;
        if self.ack_timeout.is_zero() {
            return Err(ConfigError::OutOfRange {
                key: "ack_timeout",
                reason: "must be greater than zero".into(),
            });
        }
        if self.max_payload == 0 || self.max_payload > MAX_UDP_PAYLOAD {
            return Err(ConfigError::OutOfRange {
                key: "max_payload",
                reason: format!("must be between 1 and {}", MAX_UDP_PAYLOAD),
            });
        }
        Ok(())
    }
}

/// Configuration for the receiver.
#[derive(Clone)]
pub struct ReceiverConfig {
    /// Wire copies of each acknowledgment.
    pub ack_copies: u32,
    /// How often a blocked receive wakes up to check for cancellation.
    pub poll_interval: Duration,
    /// Largest datagram accepted without truncation.
    pub max_datagram: usize,
    pub logger: Option<Arc<dyn TransferLogger>>,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            ack_copies: ACK_COPIES,
            poll_interval: Duration::from_millis(POLL_INTERVAL_MS),
            max_datagram: HEADER_LEN + MAX_UDP_PAYLOAD,
            logger: None,
        }
    }
}

impl ReceiverConfig {
    /// Defaults overridden by `FERRY_ACK_COPIES` and `FERRY_POLL_INTERVAL_MS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            ack_copies: env_setting("FERRY_ACK_COPIES", ACK_COPIES)?,
            poll_interval: Duration::from_millis(env_setting(
                "FERRY_POLL_INTERVAL_MS",
                POLL_INTERVAL_MS,
            )?),
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        at_least_one("ack_copies", self.ack_copies)?;
        if self.poll_interval.is_zero() {
            return Err(ConfigError::OutOfRange {
                key: "poll_interval",
                reason: "must be greater than zero".into(),
            });
        }
        if self.max_datagram <= HEADER_LEN {
            return Err(ConfigError::OutOfRange {
                key: "max_datagram",
                reason: format!("must exceed the {}-byte header", HEADER_LEN),
            });
        }
        Ok(())
    }
}

fn at_least_one(key: &'static str, value: u32) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::OutOfRange {
            key,
            reason: "must be at least 1".into(),
        });
    }
    Ok(())
}

/// Read `key` from the environment, falling back to `default` when unset.
pub fn env_setting<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    parse_setting(key, std::env::var(key).ok(), default)
}

fn parse_setting<T: FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Unparsable {
                key: key.to_string(),
                value,
            }),
    }
}
