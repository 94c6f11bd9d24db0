
use core::time::Duration;

use alloc::string::String;

use crate::error::ConfigError;
use crate::packet::Address;

/// Maximum number of channels in a sensing scan
pub const MAX_CHANNELS: usize = 16;

/// Channel list for frequency reselection, in Hz
pub type Channels = heapless::Vec<u64, MAX_CHANNELS>;

/// Configuration for the CSMA/CA MAC
#[derive(Clone, PartialEq, Debug)]
pub struct Config {
    /// Local node address
    pub address: Address,

    /// Minimum contention window (CWmin) in backoff slots
    pub cw_min: u32,

    /// Short inter-frame space in microseconds
    pub sifs_us: u32,

    /// Control packet airtime in microseconds
    pub ctl_us: u32,

    /// Backoff slot duration in microseconds
    pub backoff_us: u32,

    /// Number of attempts to send each packet before it is dropped
    pub packet_lifetime: u32,

    /// Maximum number of packets held in the transmit queue
    pub max_queue_len: usize,

    /// Operating frequency in Hz, tuned at startup when set.
    /// Required by the quiet period MAC.
    pub center_freq: Option<u64>,

    /// Diagnostic logging
    pub log: LogConfig,

    /// Quiet period configuration, enables spectrum sensing
    pub quiet: Option<QuietConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: Address(0x01),
            cw_min: 5,
            sifs_us: 200,
            ctl_us: 40_000,
            backoff_us: 100,
            packet_lifetime: 5,
            max_queue_len: 64,
            center_freq: None,
            log: LogConfig::default(),
            quiet: None,
        }
    }
}

impl Config {
    /// Defaults for the quiet period MAC
    pub fn quiet_period() -> Self {
        Self {
            cw_min: 2,
            backoff_us: 5_000,
            quiet: Some(QuietConfig::default()),
            ..Default::default()
        }
    }

    pub fn sifs(&self) -> Duration {
        Duration::from_micros(self.sifs_us as u64)
    }

    pub fn ctl(&self) -> Duration {
        Duration::from_micros(self.ctl_us as u64)
    }

    pub fn backoff_unit(&self) -> Duration {
        Duration::from_micros(self.backoff_us as u64)
    }

    /// DIFS is two backoff slots plus a SIFS
    pub fn difs(&self) -> Duration {
        self.backoff_unit() * 2 + self.sifs()
    }

    /// Check the configuration is usable, called once at startup
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.is_reserved() {
            return Err(ConfigError::ReservedAddress(self.address));
        }
        if self.cw_min == 0 {
            return Err(ConfigError::InvalidContentionWindow);
        }
        if self.packet_lifetime == 0 {
            return Err(ConfigError::InvalidLifetime);
        }

        Ok(())
    }

    /// Check the quiet period section, only used by the quiet period MAC
    pub fn validate_quiet(&self) -> Result<&QuietConfig, ConfigError> {
        self.validate()?;

        let q = self.quiet.as_ref().ok_or(ConfigError::MissingQuietConfig)?;
        if self.center_freq.is_none() {
            return Err(ConfigError::FrequencyUnset);
        }
        q.validate()?;

        Ok(q)
    }
}

/// Quiet period (spectrum sensing) configuration
#[derive(Clone, PartialEq, Debug)]
pub struct QuietConfig {
    /// Transmit / receive sample rate
    pub txrx_rate: u32,

    /// Sample rate used while sensing the channel
    pub channel_rate: u32,

    /// Averaged power (dB) at or above which a primary user is present
    pub thresh_primary: f32,

    /// Averaged power (dB) at or above which a secondary user is present
    pub thresh_second: f32,

    /// Averaged power (dB) at or above which another quiet period user is present
    pub thresh_qp: f32,

    /// Quiet period length in microseconds
    pub quiet_period_us: u32,

    /// Number of DIFS passes between quiet periods
    pub qp_interval: u32,

    /// Channels available for frequency reselection
    pub channels: Channels,

    /// Scan rounds before reselection gives up and holds the current channel
    pub max_scan_rounds: u32,
}

impl Default for QuietConfig {
    fn default() -> Self {
        Self {
            txrx_rate: 800_000,
            channel_rate: 4_000_000,
            thresh_primary: -50.0,
            thresh_second: -60.0,
            thresh_qp: -80.0,
            quiet_period_us: 30_000,
            qp_interval: 1,
            channels: Channels::new(),
            max_scan_rounds: 8,
        }
    }
}

impl QuietConfig {
    pub fn quiet_period(&self) -> Duration {
        Duration::from_micros(self.quiet_period_us as u64)
    }

    /// Replace the channel list
    pub fn with_channels(mut self, channels: &[u64]) -> Result<Self, ConfigError> {
        self.channels = Channels::from_slice(channels).map_err(|_| ConfigError::TooManyChannels)?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.qp_interval == 0 {
            return Err(ConfigError::InvalidQuietInterval);
        }
        if !(self.thresh_primary > self.thresh_second && self.thresh_second > self.thresh_qp) {
            return Err(ConfigError::ThresholdOrder);
        }
        if self.channels.is_empty() {
            return Err(ConfigError::NoChannels);
        }
        Ok(())
    }
}

/// Append-only diagnostic logs, both disabled by default
#[derive(Clone, PartialEq, Debug, Default)]
pub struct LogConfig {
    /// Path for the TX / RX frame log
    pub mac_log: Option<String>,

    /// Path for the received data payload log
    pub rx_data_log: Option<String>,
}
