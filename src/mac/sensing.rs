//! Quiet period spectrum sensing
//!
//! During a quiet period the node stops transmitting and receiving, samples
//! the power spectrum on its current channel and classifies the occupancy.
//! A primary user on the channel triggers a reselection scan across the
//! configured channel set.

use strum::Display;

use super::config::QuietConfig;

/// Channel occupancy as measured during a quiet period
#[derive(Clone, Copy, Debug, PartialEq, Display)]
pub enum Occupancy {
    Clear,
    Primary,
    Secondary,
    QuietPeriodOnly,
}

/// Classify an averaged power measurement against the configured thresholds
pub fn classify(power_db: f32, config: &QuietConfig) -> Occupancy {
    if power_db >= config.thresh_primary {
        Occupancy::Primary
    } else if power_db >= config.thresh_second {
        Occupancy::Secondary
    } else if power_db >= config.thresh_qp {
        Occupancy::QuietPeriodOnly
    } else {
        Occupancy::Clear
    }
}

/// Result of a completed quiet period
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuietOutcome {
    pub occupancy: Occupancy,
    /// New operating frequency, if the node moved
    pub retuned: Option<u64>,
    /// A primary user was found and no alternate channel could be used
    pub reselect_failed: bool,
}

#[cfg(feature = "std")]
pub use self::controller::*;

#[cfg(feature = "std")]
mod controller {
    use std::vec;
    use std::vec::Vec;

    use log::{debug, info, warn};

    use super::*;
    use crate::phy::{Sensing, SpectrumSample};

    const BH_A0: f64 = 0.35875;
    const BH_A1: f64 = 0.48829;
    const BH_A2: f64 = 0.14128;
    const BH_A3: f64 = 0.01168;

    /// N point, 4 term Blackman-Harris window
    pub fn blackman_harris(n: usize) -> Vec<f64> {
        if n <= 1 {
            return vec![1.0; n];
        }

        let m = (n - 1) as f64;
        (0..n)
            .map(|i| {
                let x = core::f64::consts::PI * i as f64 / m;
                BH_A0 - BH_A1 * (2.0 * x).cos() + BH_A2 * (4.0 * x).cos() - BH_A3 * (6.0 * x).cos()
            })
            .collect()
    }

    /// Calibration offset in dB for an `fft_size` point sensing FFT.
    ///
    /// Removes the FFT gain and the window's power loss so averaged bin
    /// power reads in absolute terms.
    pub fn window_calibration(fft_size: usize) -> f32 {
        if fft_size == 0 {
            return 0.0;
        }

        let n = fft_size as f64;
        let power: f64 = blackman_harris(fft_size).iter().map(|w| w * w).sum();

        (-20.0 * n.log10() - 10.0 * (power / n).log10()) as f32
    }

    /// Runs quiet periods against a sensing capable PHY
    #[derive(Clone, Debug, PartialEq)]
    pub struct SensingController {
        config: QuietConfig,
        offset: f32,
        current: u64,
    }

    impl SensingController {
        /// Create a controller for a node operating on `current`
        pub fn new(config: QuietConfig, fft_size: usize, current: u64) -> Self {
            let offset = window_calibration(fft_size);
            debug!("Sensing calibration offset {:.2} dB for {} bins", offset, fft_size);

            Self {
                config,
                offset,
                current,
            }
        }

        pub fn config(&self) -> &QuietConfig {
            &self.config
        }

        /// Calibration offset applied to every sample
        pub fn offset(&self) -> f32 {
            self.offset
        }

        /// Current operating frequency
        pub fn current(&self) -> u64 {
            self.current
        }

        /// Run a full quiet period: sense the current channel and move
        /// away from a primary user if possible
        pub fn quiet_period<P: Sensing>(&mut self, phy: &mut P) -> Result<QuietOutcome, P::Error> {
            let occupancy = self.sense_current(phy)?;

            if occupancy != Occupancy::Primary {
                return Ok(QuietOutcome {
                    occupancy,
                    retuned: None,
                    reselect_failed: false,
                });
            }

            info!("Primary user detected on {} Hz", self.current);

            let retuned = self.find_alternate(phy)?;

            Ok(QuietOutcome {
                occupancy,
                retuned,
                reselect_failed: retuned.is_none(),
            })
        }

        /// Sample the current channel once and classify it
        pub fn sense_current<P: Sensing>(&mut self, phy: &mut P) -> Result<Occupancy, P::Error> {
            let sample = self.prepare(phy, true).and_then(|_| phy.next_spectrum_sample());
            let restored = self.restore(phy);

            let power = sample?.power_db(self.offset);
            restored?;

            let occupancy = classify(power, &self.config);

            debug!("Quiet period on {} Hz: {:.1} dB, {}", self.current, power, occupancy);

            Ok(occupancy)
        }

        /// Scan the channel set for an alternate without a primary user and
        /// retune to it.
        ///
        /// Gives up after `max_scan_rounds` rounds, leaving the node on its
        /// current channel.
        pub fn find_alternate<P: Sensing>(&mut self, phy: &mut P) -> Result<Option<u64>, P::Error> {
            let candidate = self.prepare(phy, false).and_then(|_| self.scan(phy));
            let restored = self.restore(phy);

            let candidate = candidate?;
            restored?;

            let freq = match candidate {
                Some(f) => f,
                None => {
                    warn!(
                        "No channel free of primary users after {} rounds, holding {} Hz",
                        self.config.max_scan_rounds, self.current
                    );
                    return Ok(None);
                }
            };

            if !phy.set_freq(freq)? {
                warn!("PHY refused retune to {} Hz, holding {} Hz", freq, self.current);
                return Ok(None);
            }

            info!("Moved from {} Hz to {} Hz", self.current, freq);
            self.current = freq;

            Ok(Some(freq))
        }

        fn scan<P: Sensing>(&self, phy: &mut P) -> Result<Option<u64>, P::Error> {
            for round in 0..self.config.max_scan_rounds {
                for _ in 0..self.config.channels.len() {
                    let sample = phy.next_spectrum_sample()?;

                    if let Some(f) = self.acceptable(&sample) {
                        debug!("Found alternate {} Hz in round {}", f, round);
                        return Ok(Some(f));
                    }
                }
            }

            Ok(None)
        }

        fn acceptable(&self, sample: &SpectrumSample) -> Option<u64> {
            let freq = sample.center_freq;

            // Unreported frequency
            if freq == 0 || freq == self.current || !self.config.channels.contains(&freq) {
                return None;
            }

            match sample.power_db(self.offset) < self.config.thresh_primary {
                true => Some(freq),
                false => None,
            }
        }

        fn prepare<P: Sensing>(&self, phy: &mut P, hold_freq: bool) -> Result<(), P::Error> {
            phy.enable_sensing(hold_freq)?;
            phy.set_receive_enabled(false)?;
            phy.set_sample_rate(self.config.channel_rate)
        }

        /// Return the PHY to transmit / receive, every step is attempted
        /// and the first failure reported
        fn restore<P: Sensing>(&self, phy: &mut P) -> Result<(), P::Error> {
            let disabled = phy.disable_sensing();
            let rate = phy.set_sample_rate(self.config.txrx_rate);
            let receive = phy.set_receive_enabled(true);

            disabled.and(rate).and(receive)
        }
    }
}

#[cfg(test)]
mod test {
    use std::vec;

    use super::*;
    use crate::phy::mock::{MockPhy, PhyCall, MockError};
    use crate::phy::{Sensing, SpectrumSample};

    const CH_A: u64 = 915_000_000;
    const CH_B: u64 = 925_000_000;
    const CH_C: u64 = 935_000_000;

    fn config() -> QuietConfig {
        QuietConfig::default().with_channels(&[CH_A, CH_B, CH_C]).unwrap()
    }

    /// Magnitude squared that averages to `db` once calibrated
    fn power_for(db: f32, offset: f32) -> f32 {
        10f32.powf((db - offset) / 10.0)
    }

    fn controller(phy: &MockPhy) -> SensingController {
        let _ = simplelog::SimpleLogger::init(log::LevelFilter::Debug, simplelog::Config::default());
        SensingController::new(config(), phy.fft_size(), CH_A)
    }

    #[test]
    fn classify_thresholds() {
        let c = QuietConfig::default();

        assert_eq!(classify(-40.0, &c), Occupancy::Primary);
        assert_eq!(classify(-50.0, &c), Occupancy::Primary);
        assert_eq!(classify(-55.0, &c), Occupancy::Secondary);
        assert_eq!(classify(-60.0, &c), Occupancy::Secondary);
        assert_eq!(classify(-65.0, &c), Occupancy::QuietPeriodOnly);
        assert_eq!(classify(-85.0, &c), Occupancy::Clear);
    }

    #[test]
    fn window_shape() {
        let w = blackman_harris(64);
        assert_eq!(w.len(), 64);

        // Near zero at the edges, one in the middle of an odd length window
        assert!(w[0] < 1e-4);
        assert!(w[63] < 1e-4);
        assert!((blackman_harris(65)[32] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn calibration_offset() {
        assert_eq!(window_calibration(1), 0.0);
        assert_eq!(window_calibration(0), 0.0);

        let k = window_calibration(512);
        assert!(k.is_finite());
        // FFT gain dominates, window loss adds back roughly 5.9 dB
        assert!(k < -20.0 * 512f32.log10() + 7.0);
        assert!(k > -20.0 * 512f32.log10() + 5.0);
        assert_eq!(k, window_calibration(512));
    }

    #[test]
    fn sense_current_prepares_and_restores() {
        let mut phy = MockPhy::new();
        let mut s = controller(&phy);
        let c = s.config().clone();

        phy.push_sample(CH_A, power_for(-55.0, s.offset()));
        assert_eq!(s.sense_current(&mut phy), Ok(Occupancy::Secondary));

        assert_eq!(
            phy.calls(),
            vec![
                PhyCall::EnableSensing(true),
                PhyCall::Receive(false),
                PhyCall::SampleRate(c.channel_rate),
                PhyCall::DisableSensing,
                PhyCall::SampleRate(c.txrx_rate),
                PhyCall::Receive(true),
            ]
        );
    }

    #[test]
    fn sense_current_levels() {
        let mut phy = MockPhy::new();
        let mut s = controller(&phy);

        phy.push_sample(CH_A, power_for(-65.0, s.offset()));
        phy.push_sample(CH_A, power_for(-85.0, s.offset()));
        phy.push_sample(CH_A, power_for(-45.0, s.offset()));

        assert_eq!(s.sense_current(&mut phy), Ok(Occupancy::QuietPeriodOnly));
        assert_eq!(s.sense_current(&mut phy), Ok(Occupancy::Clear));
        assert_eq!(s.sense_current(&mut phy), Ok(Occupancy::Primary));
    }

    #[test]
    fn sense_restores_after_phy_error() {
        let mut phy = MockPhy::new();
        let mut s = controller(&phy);

        assert_eq!(s.sense_current(&mut phy), Err(MockError::NoSamples));
        assert_eq!(phy.calls().last(), Some(&PhyCall::Receive(true)));
    }

    #[test]
    fn failed_prepare_reenables_receive() {
        let mut phy = MockPhy::new();
        let mut s = controller(&phy);
        let c = s.config().clone();

        phy.push_sample(CH_A, power_for(-85.0, s.offset()));
        phy.fail_sample_rate(1);

        assert_eq!(s.sense_current(&mut phy), Err(MockError::RateRejected));
        assert_eq!(
            phy.calls(),
            vec![
                PhyCall::EnableSensing(true),
                PhyCall::Receive(false),
                PhyCall::DisableSensing,
                PhyCall::SampleRate(c.txrx_rate),
                PhyCall::Receive(true),
            ]
        );

        // The unread sample is still available to the next quiet period
        assert_eq!(s.sense_current(&mut phy), Ok(Occupancy::Clear));
    }

    #[test]
    fn failed_scan_setup_reenables_receive() {
        let mut phy = MockPhy::new();
        let mut s = controller(&phy);

        phy.fail_sample_rate(1);

        assert_eq!(s.find_alternate(&mut phy), Err(MockError::RateRejected));
        assert_eq!(phy.calls().last(), Some(&PhyCall::Receive(true)));
        assert_eq!(s.current(), CH_A);
    }

    #[test]
    fn quiet_period_moves_off_primary() {
        let mut phy = MockPhy::new();
        let mut s = controller(&phy);
        let k = s.offset();

        phy.push_sample(CH_A, power_for(-40.0, k));
        // Scan: unreported, busy, current and then a free channel
        phy.push_sample(0, power_for(-90.0, k));
        phy.push_sample(CH_B, power_for(-45.0, k));
        phy.push_sample(CH_A, power_for(-90.0, k));
        phy.push_sample(CH_C, power_for(-70.0, k));

        let o = s.quiet_period(&mut phy).unwrap();
        assert_eq!(o.occupancy, Occupancy::Primary);
        assert_eq!(o.retuned, Some(CH_C));
        assert!(!o.reselect_failed);

        assert_eq!(s.current(), CH_C);
        assert_eq!(phy.freq(), Some(CH_C));
        assert!(phy.calls().contains(&PhyCall::EnableSensing(false)));
    }

    #[test]
    fn quiet_period_clear_stays() {
        let mut phy = MockPhy::new();
        let mut s = controller(&phy);

        phy.push_sample(CH_A, power_for(-85.0, s.offset()));

        let o = s.quiet_period(&mut phy).unwrap();
        assert_eq!(o.occupancy, Occupancy::Clear);
        assert_eq!(o.retuned, None);
        assert!(!phy.calls().iter().any(|c| matches!(c, PhyCall::SetFreq(_))));
    }

    #[test]
    fn reselection_is_bounded() {
        let mut phy = MockPhy::new();
        let mut s = controller(&phy);
        let k = s.offset();
        let rounds = s.config().max_scan_rounds as usize;

        phy.push_sample(CH_A, power_for(-40.0, k));
        for _ in 0..rounds {
            phy.push_sample(CH_A, power_for(-40.0, k));
            phy.push_sample(CH_B, power_for(-40.0, k));
            phy.push_sample(CH_C, power_for(-40.0, k));
        }
        // Never reached
        phy.push_sample(CH_B, power_for(-90.0, k));

        let o = s.quiet_period(&mut phy).unwrap();
        assert_eq!(o.retuned, None);
        assert!(o.reselect_failed);
        assert_eq!(s.current(), CH_A);
        assert_eq!(phy.freq(), None);
    }

    #[test]
    fn refused_retune_holds_channel() {
        let mut phy = MockPhy::new();
        let mut s = controller(&phy);

        phy.refuse_freq(CH_B);
        phy.push_spectrum(SpectrumSample::new(CH_B, vec![power_for(-90.0, s.offset()); 512]));

        assert_eq!(s.find_alternate(&mut phy), Ok(None));
        assert_eq!(s.current(), CH_A);
    }
}
