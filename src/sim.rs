//! Simulated shared medium
//!
//! [`Air`] connects any number of [`AirPhy`] instances in one process. A
//! transmission is delivered to every other attached MAC tuned to the same
//! frequency. Carrier sense and per-channel noise are set by the test or
//! demo driving the medium.

use core::convert::Infallible;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::vec;
use std::vec::Vec;

use log::trace;

use crate::mac::MacHandle;
use crate::mac::sensing::window_calibration;
use crate::phy::{Phy, Sensing, SpectrumSample};

/// FFT size reported by simulated sensing
pub const SIM_FFT_SIZE: usize = 64;

/// Noise floor for channels without a configured level, in dB
pub const NOISE_FLOOR_DB: f32 = -100.0;

#[derive(Default)]
struct Port {
    freq: Option<u64>,
    handle: Option<MacHandle>,
}

#[derive(Default)]
struct Medium {
    ports: Vec<Port>,
    busy: bool,
    channels: Vec<u64>,
    noise: HashMap<u64, f32>,
    transmissions: usize,
}

/// In-memory broadcast medium
#[derive(Default)]
pub struct Air {
    medium: Mutex<Medium>,
}

impl Air {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn medium(&self) -> MutexGuard<'_, Medium> {
        self.medium.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a PHY attached to this medium
    pub fn phy(self: &Arc<Self>) -> AirPhy {
        let mut m = self.medium();
        m.ports.push(Port::default());

        AirPhy {
            air: self.clone(),
            port: m.ports.len() - 1,
            hold: true,
            sweep: 0,
        }
    }

    /// Route frames received by `phy` to the MAC behind `handle`
    pub fn attach(&self, phy: &AirPhy, handle: MacHandle) {
        self.medium().ports[phy.port].handle = Some(handle);
    }

    /// Force carrier sense on every attached PHY
    pub fn set_busy(&self, busy: bool) {
        self.medium().busy = busy;
    }

    /// Channels visited by a sensing sweep
    pub fn set_channels(&self, channels: &[u64]) {
        self.medium().channels = channels.to_vec();
    }

    /// Set the calibrated power level sensed on `freq`
    pub fn set_power_db(&self, freq: u64, db: f32) {
        let k = window_calibration(SIM_FFT_SIZE);
        self.medium().noise.insert(freq, 10f32.powf((db - k) / 10.0));
    }

    /// Frames transmitted so far
    pub fn transmissions(&self) -> usize {
        self.medium().transmissions
    }

    fn transmit(&self, from: usize, data: &[u8]) {
        let targets: Vec<MacHandle> = {
            let mut m = self.medium();
            m.transmissions += 1;

            let freq = m.ports[from].freq;
            m.ports
                .iter()
                .enumerate()
                .filter(|(i, p)| *i != from && p.freq == freq)
                .filter_map(|(_, p)| p.handle.clone())
                .collect()
        };

        trace!("Air: port {} sent {} bytes to {} listeners", from, data.len(), targets.len());

        for h in targets {
            h.on_frame(true, data);
        }
    }

    fn sample(&self, freq: u64) -> SpectrumSample {
        let m = self.medium();
        let floor = 10f32.powf((NOISE_FLOOR_DB - window_calibration(SIM_FFT_SIZE)) / 10.0);
        let power = m.noise.get(&freq).copied().unwrap_or(floor);

        SpectrumSample::new(freq, vec![power; SIM_FFT_SIZE])
    }
}

/// PHY attached to an [`Air`]
pub struct AirPhy {
    air: Arc<Air>,
    port: usize,
    hold: bool,
    sweep: usize,
}

impl AirPhy {
    pub fn freq(&self) -> Option<u64> {
        self.air.medium().ports[self.port].freq
    }
}

impl Phy for AirPhy {
    type Error = Infallible;

    fn carrier_sensed(&mut self) -> Result<bool, Self::Error> {
        Ok(self.air.medium().busy)
    }

    fn send_pkt(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        self.air.transmit(self.port, data);
        Ok(())
    }

    fn set_freq(&mut self, freq: u64) -> Result<bool, Self::Error> {
        self.air.medium().ports[self.port].freq = Some(freq);
        Ok(true)
    }
}

impl Sensing for AirPhy {
    fn enable_sensing(&mut self, hold_freq: bool) -> Result<(), Self::Error> {
        self.hold = hold_freq;
        self.sweep = 0;
        Ok(())
    }

    fn disable_sensing(&mut self) -> Result<(), Self::Error> {
        self.hold = true;
        Ok(())
    }

    fn set_sample_rate(&mut self, _rate: u32) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_receive_enabled(&mut self, _enabled: bool) -> Result<(), Self::Error> {
        Ok(())
    }

    fn next_spectrum_sample(&mut self) -> Result<SpectrumSample, Self::Error> {
        let freq = match self.hold {
            true => self.freq().unwrap_or(0),
            false => {
                let channels = self.air.medium().channels.clone();
                match channels.is_empty() {
                    true => 0,
                    false => {
                        self.sweep = (self.sweep + 1) % channels.len();
                        channels[self.sweep]
                    }
                }
            }
        };

        Ok(self.air.sample(freq))
    }

    fn fft_size(&self) -> usize {
        SIM_FFT_SIZE
    }
}
