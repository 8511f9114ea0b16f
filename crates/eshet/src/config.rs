//! Client timing and protocol configuration.

use core::fmt;
use std::time::Duration;

use eshet_proto::op;

/// Tunables for a client session.
#[derive(Debug, Clone)]
pub struct Config {
    /// Silence on the connection before the client sends a ping.
    pub idle_ping: Duration,
    /// How long to wait for a ping reply before declaring the connection
    /// dead.
    pub ping_timeout: Duration,
    /// Timeout offered to the server in hello, in whole seconds. Must be
    /// strictly greater than `idle_ping`.
    pub server_timeout: Duration,
    /// Opcode used for state_observe. Defaults to the current protocol's
    /// 0x46; set to [`op::STATE_OBSERVE_LEGACY`] for servers predating the
    /// renumbering.
    pub state_observe_op: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            idle_ping: Duration::from_secs(15),
            ping_timeout: Duration::from_secs(5),
            server_timeout: Duration::from_secs(30),
            state_observe_op: op::STATE_OBSERVE,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_timeout <= self.idle_ping {
            return Err(ConfigError::ServerTimeoutTooShort {
                server_timeout: self.server_timeout,
                idle_ping: self.idle_ping,
            });
        }
        if self.server_timeout.as_secs() > u16::MAX as u64 {
            return Err(ConfigError::ServerTimeoutTooLong(self.server_timeout));
        }
        Ok(())
    }

    pub(crate) fn server_timeout_secs(&self) -> u16 {
        self.server_timeout.as_secs() as u16
    }
}

/// An invalid [`Config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    ServerTimeoutTooShort {
        server_timeout: Duration,
        idle_ping: Duration,
    },
    ServerTimeoutTooLong(Duration),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServerTimeoutTooShort {
                server_timeout,
                idle_ping,
            } => write!(
                f,
                "server_timeout ({server_timeout:?}) must exceed idle_ping ({idle_ping:?})"
            ),
            Self::ServerTimeoutTooLong(timeout) => {
                write!(f, "server_timeout ({timeout:?}) does not fit in 16 bits")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
