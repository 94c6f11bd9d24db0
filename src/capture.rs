//! Append-only diagnostic frame logs

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::string::String;
use std::sync::Mutex;

use log::{error, warn};

use crate::error::ConfigError;
use crate::mac::config::LogConfig;
use crate::mac::queue::QueueEntry;
use crate::packet::Frame;

/// Optional MAC frame log and received data log.
///
/// Both logs are opened for append at construction, writes after that
/// are best effort and only warn on failure.
#[derive(Debug, Default)]
pub struct FrameLog {
    mac: Option<Mutex<File>>,
    rx_data: Option<Mutex<File>>,
}

fn open_append(path: &str) -> Result<Mutex<File>, ConfigError> {
    let p = Path::new(path);

    if let Some(parent) = p.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            error!("Failed to create log directory {}: {}", parent.display(), e);
            ConfigError::LogOpen
        })?;
    }

    let f = OpenOptions::new().append(true).create(true).open(p).map_err(|e| {
        error!("Failed to open log {}: {}", path, e);
        ConfigError::LogOpen
    })?;

    Ok(Mutex::new(f))
}

fn append(file: &Option<Mutex<File>>, line: core::fmt::Arguments) {
    let f = match file {
        Some(f) => f,
        None => return,
    };

    let mut f = match f.lock() {
        Ok(f) => f,
        Err(e) => e.into_inner(),
    };

    let r: io::Result<()> = f.write_fmt(line).and_then(|_| f.write_all(b"\n"));
    if let Err(e) = r {
        warn!("Failed to write frame log: {}", e);
    }
}

impl FrameLog {
    /// Open the configured logs, a disabled log is never touched
    pub fn open(config: &LogConfig) -> Result<Self, ConfigError> {
        let mac = config.mac_log.as_deref().map(open_append).transpose()?;
        let rx_data = config.rx_data_log.as_deref().map(open_append).transpose()?;

        Ok(Self { mac, rx_data })
    }

    pub fn is_enabled(&self) -> bool {
        self.mac.is_some() || self.rx_data.is_some()
    }

    pub fn tx(&self, frame: &Frame) {
        append(&self.mac, format_args!("TX:{}", frame));
    }

    pub fn rx(&self, frame: &Frame) {
        append(&self.mac, format_args!("RX:{}", frame));
    }

    /// Packet abandoned after exhausting its lifetime
    pub fn dropped(&self, entry: &QueueEntry) {
        append(&self.mac, format_args!("TX: f - {} {}", entry.dest, String::from_utf8_lossy(&entry.payload)));
    }

    /// Reception flagged as corrupt by the PHY
    pub fn rx_not_ok(&self) {
        append(&self.mac, format_args!("RX - not ok"));
    }

    /// Received data payload
    pub fn data(&self, payload: &[u8]) {
        append(&self.rx_data, format_args!("{}", String::from_utf8_lossy(payload)));
    }
}
