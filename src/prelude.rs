//! qpcsma crate prelude
//
// qpcsma, CSMA/CA MAC for shared radio channels
// Copyright 2026 the qpcsma authors

pub use crate::packet::{Address, Frame, FrameKind};

pub use crate::phy::{Phy, Sensing, SpectrumSample};

pub use crate::mac::{Config as MacConfig, QuietConfig, LogConfig, MacState, MacStats};

#[cfg(feature = "std")]
pub use crate::mac::{Mac, MacHandle, Csma, QuietPeriod, Upward};

pub use crate::mac::sensing::Occupancy;

pub use crate::error::{ConfigError, MacError, EnqueueError};
pub use crate::timer::{Timer as MacTimer};

#[cfg(feature = "std")]
pub use crate::timer::SystemTimer;
