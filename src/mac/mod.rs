//! Medium Access Control (MAC) layer module.
//! Contains the CSMA/CA state machine, its supporting pieces and the driver
//! that runs it against a PHY.

pub mod backoff;

pub mod config;

pub mod core;

pub mod queue;

pub mod sensing;

#[cfg(feature = "std")]
mod driver;

pub use self::config::{Config, LogConfig, QuietConfig};
pub use self::core::{Core, MacState, MacStats, RxEvent, Step, Trigger};

#[cfg(feature = "std")]
pub use self::driver::{Csma, Mac, MacHandle, Mode, QuietPeriod, Upward, UpwardFn};
