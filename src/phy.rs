//! PHY adapter contract consumed by the MAC driver

use core::fmt::Debug;

use alloc::vec::Vec;

/// Minimal radio interface required by the CSMA/CA MAC
pub trait Phy {
    type Error: Debug;

    /// Check whether energy is currently detected on the channel
    fn carrier_sensed(&mut self) -> Result<bool, Self::Error>;

    /// Transmit a frame, fire and forget
    fn send_pkt(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Tune to the provided frequency in Hz, `false` if the PHY refused
    fn set_freq(&mut self, freq: u64) -> Result<bool, Self::Error>;
}

/// Spectrum sensing extensions, required by the quiet period MAC
pub trait Sensing: Phy {
    /// Start producing spectrum samples.
    /// When `hold_freq` is false the sensing path sweeps the channel set.
    fn enable_sensing(&mut self, hold_freq: bool) -> Result<(), Self::Error>;

    /// Stop producing spectrum samples
    fn disable_sensing(&mut self) -> Result<(), Self::Error>;

    fn set_sample_rate(&mut self, rate: u32) -> Result<(), Self::Error>;

    /// Gate the receive path
    fn set_receive_enabled(&mut self, enabled: bool) -> Result<(), Self::Error>;

    /// Block until the next power spectrum sample is available
    fn next_spectrum_sample(&mut self) -> Result<SpectrumSample, Self::Error>;

    /// Number of FFT bins per spectrum sample
    fn fft_size(&self) -> usize;
}

/// Power spectrum sample as produced by the sensing path
#[derive(Clone, Debug, PartialEq)]
pub struct SpectrumSample {
    /// Center frequency of the sample in Hz, zero if the PHY could not report it
    pub center_freq: u64,

    /// Magnitude squared per FFT bin
    pub bins: Vec<f32>,
}

impl SpectrumSample {
    pub fn new(center_freq: u64, bins: Vec<f32>) -> Self {
        Self { center_freq, bins }
    }

    /// Average bin power in dB, corrected by the window calibration `offset`
    #[cfg(feature = "std")]
    pub fn power_db(&self, offset: f32) -> f32 {
        if self.bins.is_empty() {
            return f32::NEG_INFINITY;
        }

        let sum: f32 = self.bins.iter().map(|b| 10.0 * b.log10() + offset).sum();
        sum / self.bins.len() as f32
    }
}

#[cfg(any(test, feature = "mocks"))]
pub mod mock {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex, MutexGuard};
    use std::vec;
    use std::vec::Vec;

    use bytes::Bytes;

    use super::*;

    /// Operations recorded by [`MockPhy`]
    #[derive(Clone, Debug, PartialEq)]
    pub enum PhyCall {
        Send(Bytes),
        SetFreq(u64),
        EnableSensing(bool),
        DisableSensing,
        SampleRate(u32),
        Receive(bool),
    }

    #[derive(Clone, Copy, Debug, PartialEq)]
    pub enum MockError {
        SendFailed,
        NoSamples,
        RateRejected,
    }

    #[derive(Debug, Default)]
    struct Inner {
        busy: bool,
        fail_send: bool,
        fail_rate: u32,
        freq: Option<u64>,
        refuse: Vec<u64>,
        fft_size: usize,
        samples: VecDeque<SpectrumSample>,
        calls: Vec<PhyCall>,
    }

    /// Recording PHY, shared between clones so tests can program and
    /// inspect it while the MAC owns a copy
    #[derive(Clone, Debug, Default)]
    pub struct MockPhy(Arc<Mutex<Inner>>);

    impl MockPhy {
        pub fn new() -> Self {
            let p = Self::default();
            p.inner().fft_size = 512;
            p
        }

        fn inner(&self) -> MutexGuard<'_, Inner> {
            self.0.lock().unwrap()
        }

        pub fn set_busy(&self, busy: bool) {
            self.inner().busy = busy;
        }

        pub fn set_fail_send(&self, fail: bool) {
            self.inner().fail_send = fail;
        }

        /// Reject the next `n` sample rate changes
        pub fn fail_sample_rate(&self, n: u32) {
            self.inner().fail_rate = n;
        }

        /// Refuse future retunes to `freq`
        pub fn refuse_freq(&self, freq: u64) {
            self.inner().refuse.push(freq);
        }

        pub fn set_fft_size(&self, n: usize) {
            self.inner().fft_size = n;
        }

        /// Queue a spectrum sample with every bin at `power` (magnitude squared)
        pub fn push_sample(&self, center_freq: u64, power: f32) {
            let n = self.inner().fft_size;
            self.push_spectrum(SpectrumSample::new(center_freq, vec![power; n]));
        }

        pub fn push_spectrum(&self, sample: SpectrumSample) {
            self.inner().samples.push_back(sample);
        }

        pub fn freq(&self) -> Option<u64> {
            self.inner().freq
        }

        pub fn calls(&self) -> Vec<PhyCall> {
            self.inner().calls.clone()
        }

        /// Take the frames sent so far
        pub fn take_sent(&self) -> Vec<Bytes> {
            let mut i = self.inner();
            let sent = i.calls.iter().filter_map(|c| match c {
                PhyCall::Send(b) => Some(b.clone()),
                _ => None,
            }).collect();

            i.calls.retain(|c| !matches!(c, PhyCall::Send(_)));

            sent
        }

        pub fn clear_calls(&self) {
            self.inner().calls.clear();
        }
    }

    impl Phy for MockPhy {
        type Error = MockError;

        fn carrier_sensed(&mut self) -> Result<bool, Self::Error> {
            Ok(self.inner().busy)
        }

        fn send_pkt(&mut self, data: &[u8]) -> Result<(), Self::Error> {
            let mut i = self.inner();
            if i.fail_send {
                return Err(MockError::SendFailed);
            }
            i.calls.push(PhyCall::Send(Bytes::copy_from_slice(data)));
            Ok(())
        }

        fn set_freq(&mut self, freq: u64) -> Result<bool, Self::Error> {
            let mut i = self.inner();
            i.calls.push(PhyCall::SetFreq(freq));

            if i.refuse.contains(&freq) {
                return Ok(false);
            }

            i.freq = Some(freq);
            Ok(true)
        }
    }

    impl Sensing for MockPhy {
        fn enable_sensing(&mut self, hold_freq: bool) -> Result<(), Self::Error> {
            self.inner().calls.push(PhyCall::EnableSensing(hold_freq));
            Ok(())
        }

        fn disable_sensing(&mut self) -> Result<(), Self::Error> {
            self.inner().calls.push(PhyCall::DisableSensing);
            Ok(())
        }

        fn set_sample_rate(&mut self, rate: u32) -> Result<(), Self::Error> {
            let mut i = self.inner();
            if i.fail_rate > 0 {
                i.fail_rate -= 1;
                return Err(MockError::RateRejected);
            }
            i.calls.push(PhyCall::SampleRate(rate));
            Ok(())
        }

        fn set_receive_enabled(&mut self, enabled: bool) -> Result<(), Self::Error> {
            self.inner().calls.push(PhyCall::Receive(enabled));
            Ok(())
        }

        fn next_spectrum_sample(&mut self) -> Result<SpectrumSample, Self::Error> {
            self.inner().samples.pop_front().ok_or(MockError::NoSamples)
        }

        fn fft_size(&self) -> usize {
            self.inner().fft_size
        }
    }
}
