
use core::fmt;

use crate::packet::Address;

/// Configuration errors, fatal at MAC construction
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Node address is broadcast or one of the reserved codes
    ReservedAddress(Address),

    /// No operating frequency configured
    FrequencyUnset,

    /// PHY refused the configured frequency
    TuneFailed(u64),

    /// CWmin must be at least one slot
    InvalidContentionWindow,

    /// Packet lifetime must allow at least one attempt
    InvalidLifetime,

    /// Quiet period interval must be at least one DIFS pass
    InvalidQuietInterval,

    /// Occupancy thresholds must descend primary > secondary > quiet period
    ThresholdOrder,

    /// Sensing requires at least one channel
    NoChannels,

    /// More channels than the sensing scan can hold
    TooManyChannels,

    /// Quiet period MAC constructed without a quiet period configuration
    MissingQuietConfig,

    /// Failed to open a diagnostic log file
    LogOpen,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ReservedAddress(a) => write!(f, "address {} is reserved", a),
            ConfigError::FrequencyUnset => write!(f, "no frequency configured"),
            ConfigError::TuneFailed(freq) => write!(f, "unable to tune to {} Hz", freq),
            ConfigError::InvalidContentionWindow => write!(f, "cw_min must be non-zero"),
            ConfigError::InvalidLifetime => write!(f, "packet_lifetime must be non-zero"),
            ConfigError::InvalidQuietInterval => write!(f, "qp_interval must be non-zero"),
            ConfigError::ThresholdOrder => write!(f, "thresholds must descend primary > secondary > quiet"),
            ConfigError::NoChannels => write!(f, "no sensing channels configured"),
            ConfigError::TooManyChannels => write!(f, "too many sensing channels"),
            ConfigError::MissingQuietConfig => write!(f, "quiet period configuration required"),
            ConfigError::LogOpen => write!(f, "unable to open MAC log"),
        }
    }
}

/// MAC errors
#[derive(Debug, Clone, PartialEq)]
pub enum MacError<E> {
    /// Invalid configuration
    Config(ConfigError),

    /// Wrapper for unhandled / underlying PHY errors
    Phy(E),
}

impl<E> From<ConfigError> for MacError<E> {
    fn from(e: ConfigError) -> Self {
        MacError::Config(e)
    }
}

/// Errors returned when enqueuing an outbound packet
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnqueueError {
    /// Transmit queue at capacity
    QueueFull,

    /// MAC has been stopped
    Stopped,
}
