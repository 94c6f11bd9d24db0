//! MAC driver, runs the state machine against a PHY
//!
//! [`Mac`] owns the PHY and timer and is the driver context: it waits on the
//! [`WakeScheduler`], samples the carrier and performs every transmission.
//! [`MacHandle`] is the receive context and application surface, it decodes
//! inbound frames into the mailbox and queues outbound packets.
//
// qpcsma, CSMA/CA MAC for shared radio channels
// Copyright 2026 the qpcsma authors

use core::fmt;
use core::time::Duration;

use std::boxed::Box;
use std::format;
use std::string::String;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use log::{trace, debug, info, warn, error};
use rand_core::{OsRng, RngCore};

use crate::capture::FrameLog;
use crate::error::{ConfigError, EnqueueError, MacError};
use crate::packet::{self, Address, Discard, FrameKind};
use crate::phy::{Phy, Sensing};
use crate::timer::Timer;
use crate::wake::{Fire, Wake, WakeScheduler};

use super::config::Config;
use super::core::{Core, MacState, MacStats, RxEvent, Step, Trigger};
use super::sensing::{QuietOutcome, SensingController};

/// Frames passed up to the application
#[derive(Clone, Debug, PartialEq)]
pub enum Upward {
    /// Data payload received from a peer
    Received(Bytes),
    /// Transmission confirmed by the peer
    Transmitted(Bytes),
}

impl fmt::Display for Upward {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Upward::Received(d) => write!(f, "R:{}", String::from_utf8_lossy(d)),
            Upward::Transmitted(d) => write!(f, "T:{}", String::from_utf8_lossy(d)),
        }
    }
}

/// Upward delivery callback
pub type UpwardFn = Box<dyn Fn(Upward) + Send + Sync>;

/// MAC operating mode
pub trait Mode<P: Phy> {
    /// Run a quiet period, `None` if the mode does not sense
    fn quiet_period(&mut self, phy: &mut P) -> Result<Option<QuietOutcome>, P::Error>;

    /// Nominal quiet period length
    fn quiet_duration(&self) -> Duration;
}

/// Plain CSMA/CA, never senses
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Csma;

impl<P: Phy> Mode<P> for Csma {
    fn quiet_period(&mut self, _phy: &mut P) -> Result<Option<QuietOutcome>, P::Error> {
        Ok(None)
    }

    fn quiet_duration(&self) -> Duration {
        Duration::from_micros(0)
    }
}

/// CSMA/CA with periodic quiet periods for spectrum sensing
#[derive(Clone, Debug, PartialEq)]
pub struct QuietPeriod {
    sensing: SensingController,
}

impl QuietPeriod {
    pub fn sensing(&self) -> &SensingController {
        &self.sensing
    }
}

impl<P: Sensing> Mode<P> for QuietPeriod {
    fn quiet_period(&mut self, phy: &mut P) -> Result<Option<QuietOutcome>, P::Error> {
        self.sensing.quiet_period(phy).map(Some)
    }

    fn quiet_duration(&self) -> Duration {
        self.sensing.config().quiet_period()
    }
}

/// State shared between the driver and receive contexts
struct Shared {
    address: Address,
    sifs: Duration,
    core: Mutex<Core>,
    wake: WakeScheduler,
    log: FrameLog,
    upward: Mutex<Option<UpwardFn>>,
}

impl Shared {
    fn core(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, u: Upward) {
        let cb = self.upward.lock().unwrap_or_else(PoisonError::into_inner);
        match cb.as_ref() {
            Some(f) => f(u),
            None => trace!("No upward handler, dropping {}", u),
        }
    }
}

/// CSMA/CA MAC driver.
///
/// Generic over a PHY (P), Timer (T) and Mode (M).
pub struct Mac<P, T, M> {
    phy: P,
    timer: T,
    mode: M,
    rng: Box<dyn RngCore + Send>,
    shared: Arc<Shared>,
}

impl<P, T> Mac<P, T, Csma>
where
    P: Phy,
    T: Timer,
{
    /// Create a plain CSMA/CA MAC
    pub fn new_csma(phy: P, timer: T, config: Config) -> Result<Self, MacError<P::Error>> {
        Self::build(phy, timer, config, Csma, false)
    }
}

impl<P, T> Mac<P, T, QuietPeriod>
where
    P: Sensing,
    T: Timer,
{
    /// Create a quiet period CSMA/CA MAC, requires `config.quiet` and
    /// `config.center_freq`
    pub fn new_quiet(phy: P, timer: T, config: Config) -> Result<Self, MacError<P::Error>> {
        let quiet = config.validate_quiet()?.clone();
        let freq = config.center_freq.ok_or(ConfigError::FrequencyUnset)?;
        let mode = QuietPeriod {
            sensing: SensingController::new(quiet, phy.fft_size(), freq),
        };

        Self::build(phy, timer, config, mode, true)
    }

    /// Current operating frequency
    pub fn frequency(&self) -> u64 {
        self.mode.sensing.current()
    }
}

impl<P, T, M> Mac<P, T, M>
where
    P: Phy,
    T: Timer,
    M: Mode<P>,
{
    fn build(mut phy: P, timer: T, config: Config, mode: M, quiet: bool) -> Result<Self, MacError<P::Error>> {
        config.validate()?;

        if let Some(freq) = config.center_freq {
            if !phy.set_freq(freq).map_err(MacError::Phy)? {
                return Err(ConfigError::TuneFailed(freq).into());
            }
            debug!("Tuned to {} Hz", freq);
        }

        let log = FrameLog::open(&config.log)?;

        let shared = Shared {
            address: config.address,
            sifs: config.sifs(),
            core: Mutex::new(Core::new(config, quiet)),
            wake: WakeScheduler::new(),
            log,
            upward: Mutex::new(None),
        };

        Ok(Self {
            phy,
            timer,
            mode,
            rng: Box::new(OsRng),
            shared: Arc::new(shared),
        })
    }

    /// Replace the random source used for backoff draws
    pub fn with_rng<R: RngCore + Send + 'static>(mut self, rng: R) -> Self {
        self.rng = Box::new(rng);
        self
    }

    /// Fetch a handle for the receive context and application
    pub fn handle(&self) -> MacHandle {
        MacHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn address(&self) -> Address {
        self.shared.address
    }

    pub fn phy(&self) -> &P {
        &self.phy
    }

    pub fn phy_mut(&mut self) -> &mut P {
        &mut self.phy
    }

    pub fn mode(&self) -> &M {
        &self.mode
    }

    pub fn state(&self) -> MacState {
        self.shared.core().state()
    }

    pub fn stats(&self) -> MacStats {
        self.shared.core().stats().clone()
    }

    /// Run a single state machine evaluation
    pub fn step(&mut self, trigger: Trigger) -> Result<Step, MacError<P::Error>> {
        let busy = self.phy.carrier_sensed().map_err(MacError::Phy)?;

        let step = {
            let mut core = self.shared.core();
            self.shared.wake.drain(|e| core.deliver(e));

            let prev = core.state();
            let step = core.evaluate(trigger, busy, &mut *self.rng);

            if prev != core.state() {
                debug!("{}: {} -> {} ({:?})", self.shared.address, prev, core.state(), step.wake);
            }

            step
        };

        if let Some(d) = &step.dropped {
            warn!("{}: dropped packet to {} ({} bytes)", self.shared.address, d.dest, d.payload.len());
            self.shared.log.dropped(d);
        }

        if let Some(f) = &step.transmit {
            debug!("{}: TX {}", self.shared.address, f);
            self.shared.log.tx(f);
            self.phy.send_pkt(&f.encode()).map_err(MacError::Phy)?;
        }

        // Arm under the state machine lock so an enqueue kick either
        // precedes the arm or sees it
        {
            let _core = self.shared.core();
            self.shared.wake.arm(step.wake, self.timer.ticks_us());
        }

        Ok(step)
    }

    /// Run a quiet period and resume the state machine.
    ///
    /// The state machine lock is not held while sensing.
    pub fn quiet_period(&mut self) -> Result<Wake, MacError<P::Error>> {
        let start = self.timer.ticks_us();
        let outcome = self.mode.quiet_period(&mut self.phy);

        let elapsed = Duration::from_micros(self.timer.ticks_us().saturating_sub(start));
        let remaining = self.mode.quiet_duration().checked_sub(elapsed).unwrap_or_default();

        let sensed = match &outcome {
            Ok(o) => *o,
            Err(_) => None,
        };

        let wake = {
            let mut core = self.shared.core();
            let wake = core.finish_quiet_period(sensed, remaining);
            self.shared.wake.arm(wake, self.timer.ticks_us());
            wake
        };

        outcome.map_err(MacError::Phy)?;

        Ok(wake)
    }

    /// Handle a wake from the scheduler, errors are logged and retried
    /// after a SIFS
    pub fn dispatch(&mut self, fire: Fire) {
        trace!("{}: dispatch {:?}", self.shared.address, fire);

        let r = match fire {
            Fire::Timer => self.step(Trigger::Timer).map(|_| ()),
            Fire::Now => self.step(Trigger::Immediate).map(|_| ()),
            Fire::Sensing => self.quiet_period().map(|_| ()),
        };

        if let Err(e) = r {
            error!("{}: MAC evaluation failed: {:?}", self.shared.address, e);
            self.shared.wake.arm(Wake::After(self.shared.sifs), self.timer.ticks_us());
        }
    }

    /// Dispatch a due wake without blocking, returns whether one ran
    pub fn poll(&mut self) -> bool {
        match self.shared.wake.poll(self.timer.ticks_us()) {
            Some(f) => {
                self.dispatch(f);
                true
            }
            None => false,
        }
    }

    /// Run the driver loop until stopped
    pub fn run(&mut self) {
        info!("{}: MAC running", self.shared.address);

        self.shared.wake.kick();

        while let Some(fire) = self.shared.wake.wait(&self.timer) {
            self.dispatch(fire);
        }

        info!("{}: MAC stopped", self.shared.address);
    }

    /// Run the driver loop on a named thread
    pub fn spawn(mut self) -> std::io::Result<JoinHandle<()>>
    where
        P: Send + 'static,
        T: Send + 'static,
        M: Send + 'static,
    {
        thread::Builder::new()
            .name(format!("mac-{:02x}", self.shared.address.0))
            .spawn(move || self.run())
    }
}

/// Cloneable handle for the receive context and the application
#[derive(Clone)]
pub struct MacHandle {
    shared: Arc<Shared>,
}

impl MacHandle {
    pub fn address(&self) -> Address {
        self.shared.address
    }

    /// Set the callback for received data and transmit confirmations
    pub fn set_upward<F>(&self, f: F)
    where
        F: Fn(Upward) + Send + Sync + 'static,
    {
        *self.shared.upward.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(f));
    }

    /// Handle a frame from the PHY, `ok` is the PHY's CRC result
    pub fn on_frame(&self, ok: bool, payload: &[u8]) {
        let s = &self.shared;

        if payload.is_empty() {
            return;
        }

        if !ok {
            debug!("{}: RX failed CRC ({} bytes)", s.address, payload.len());
            s.log.rx_not_ok();
            return;
        }

        let frame = match packet::decode(payload, s.address) {
            Ok(f) => f,
            Err(Discard::SelfEcho) => return,
            Err(d) => {
                debug!("{}: discarding frame: {:?}", s.address, d);
                return;
            }
        };

        debug!("{}: RX {}", s.address, frame);
        s.log.rx(&frame);

        match frame.kind {
            FrameKind::Ack => s.emit(Upward::Transmitted(Bytes::from_static(b"ACK"))),
            FrameKind::Data => {
                s.log.data(&frame.payload);
                s.emit(Upward::Received(frame.payload.clone()));
            }
            _ => (),
        }

        s.wake.post(RxEvent {
            kind: frame.kind,
            src: frame.src,
        });
    }

    /// Queue a packet for transmission to `dest`
    pub fn new_packet(&self, dest: Address, data: impl Into<Bytes>) -> Result<(), EnqueueError> {
        let s = &self.shared;

        if s.wake.is_stopped() {
            return Err(EnqueueError::Stopped);
        }

        let mut core = s.core();

        core.enqueue(dest, data.into()).map_err(|e| {
            warn!("{}: transmit queue full, rejecting packet to {}", s.address, e.dest);
            EnqueueError::QueueFull
        })?;

        // Only wake a sleeping state machine, contention in progress continues
        s.wake.kick();
        drop(core);

        Ok(())
    }

    /// Stop the driver loop
    pub fn stop(&self) {
        info!("{}: stopping MAC", self.shared.address);
        self.shared.wake.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.wake.is_stopped()
    }

    pub fn state(&self) -> MacState {
        self.shared.core().state()
    }

    pub fn stats(&self) -> MacStats {
        self.shared.core().stats().clone()
    }

    /// Number of packets awaiting transmission
    pub fn queue_len(&self) -> usize {
        self.shared.core().queue().len()
    }
}

impl fmt::Debug for MacHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MacHandle").field("address", &self.shared.address).finish()
    }
}

#[cfg(test)]
mod test {
    use std::string::ToString;
    use std::sync::mpsc;
    use std::vec;
    use std::vec::Vec;

    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::mac::config::QuietConfig;
    use crate::packet::Frame;
    use crate::phy::mock::{MockError, MockPhy, PhyCall};
    use crate::timer::mock::MockTimer;

    const LOCAL: Address = Address(0x01);
    const PEER: Address = Address(0x02);

    const CH_A: u64 = 915_000_000;
    const CH_B: u64 = 925_000_000;

    fn setup(config: Config) -> (Mac<MockPhy, MockTimer, Csma>, MockPhy, MockTimer) {
        let _ = simplelog::SimpleLogger::init(log::LevelFilter::Debug, simplelog::Config::default());

        let phy = MockPhy::new();
        let timer = MockTimer::new();
        let mac = Mac::new_csma(phy.clone(), timer.clone(), config)
            .unwrap()
            .with_rng(StdRng::seed_from_u64(11));

        (mac, phy, timer)
    }

    fn quiet_config() -> Config {
        Config {
            center_freq: Some(CH_A),
            quiet: Some(QuietConfig::default().with_channels(&[CH_A, CH_B]).unwrap()),
            ..Config::quiet_period()
        }
    }

    fn frame(kind: FrameKind) -> Bytes {
        match kind {
            FrameKind::Data => Frame::data(LOCAL, PEER, &b"hello"[..]).encode(),
            k => Frame::control(k, LOCAL, PEER).encode(),
        }
    }

    /// Poll the MAC, stepping mock time in SIFS sized increments
    fn run_for<M: Mode<MockPhy>>(mac: &mut Mac<MockPhy, MockTimer, M>, timer: &MockTimer, d: Duration) {
        let end = timer.val_us() + d.as_micros() as u64;
        while timer.val_us() < end {
            while mac.poll() {}
            timer.advance(Duration::from_micros(200));
        }
    }

    fn collect_upward(h: &MacHandle) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        h.set_upward(move |u| {
            let _ = tx.lock().unwrap().send(u.to_string());
        });
        rx
    }

    #[test]
    fn upward_display() {
        assert_eq!(Upward::Received(Bytes::from_static(b"hi")).to_string(), "R:hi");
        assert_eq!(Upward::Transmitted(Bytes::from_static(b"ACK")).to_string(), "T:ACK");
    }

    #[test]
    fn construction_validates_config() {
        let c = Config {
            address: Address::BROADCAST,
            ..Default::default()
        };
        let r = Mac::new_csma(MockPhy::new(), MockTimer::new(), c);
        assert_eq!(r.err(), Some(MacError::Config(ConfigError::ReservedAddress(Address::BROADCAST))));

        let r = Mac::new_quiet(MockPhy::new(), MockTimer::new(), Config::default());
        assert_eq!(r.err(), Some(MacError::Config(ConfigError::MissingQuietConfig)));

        let c = Config {
            center_freq: None,
            ..quiet_config()
        };
        let r = Mac::new_quiet(MockPhy::new(), MockTimer::new(), c);
        assert_eq!(r.err(), Some(MacError::Config(ConfigError::FrequencyUnset)));

        // Plain CSMA/CA ignores the quiet section
        assert!(Mac::new_csma(MockPhy::new(), MockTimer::new(), Config::quiet_period()).is_ok());
    }

    #[test]
    fn construction_tunes_frequency() {
        let phy = MockPhy::new();
        let mac = Mac::new_quiet(phy.clone(), MockTimer::new(), quiet_config()).unwrap();
        assert_eq!(phy.freq(), Some(CH_A));
        assert_eq!(mac.frequency(), CH_A);

        let phy = MockPhy::new();
        phy.refuse_freq(CH_A);
        let c = Config {
            center_freq: Some(CH_A),
            ..Default::default()
        };
        let r = Mac::new_csma(phy, MockTimer::new(), c);
        assert_eq!(r.err(), Some(MacError::Config(ConfigError::TuneFailed(CH_A))));
    }

    #[test]
    fn rts_is_answered_with_cts() {
        let (mut mac, phy, _timer) = setup(Config::default());
        let h = mac.handle();

        h.on_frame(true, &frame(FrameKind::Rts));
        assert!(mac.poll());

        assert_eq!(mac.state(), MacState::CtsSent);
        assert_eq!(phy.take_sent(), vec![Frame::control(FrameKind::Cts, PEER, LOCAL).encode()]);
        assert_eq!(mac.stats().cts_sent, 1);
    }

    #[test]
    fn discarded_frames_do_not_wake() {
        let (mut mac, phy, _timer) = setup(Config::default());
        let h = mac.handle();
        let rx = collect_upward(&h);

        h.on_frame(true, &[]);
        h.on_frame(true, &Frame::data(PEER, LOCAL, &b"echo"[..]).encode());
        h.on_frame(true, &Frame::control(FrameKind::Rts, PEER, LOCAL).encode());
        h.on_frame(true, &[1, 2]);
        h.on_frame(false, &frame(FrameKind::Rts));

        assert!(!mac.poll());
        assert!(phy.take_sent().is_empty());
        assert!(rx.try_recv().is_err());
        assert_eq!(mac.state(), MacState::Idle);
    }

    #[test]
    fn upward_delivery() {
        let (mut mac, _phy, _timer) = setup(Config::default());
        let h = mac.handle();
        let rx = collect_upward(&h);

        h.on_frame(true, &frame(FrameKind::Data));
        h.on_frame(true, &frame(FrameKind::Ack));
        h.on_frame(true, &frame(FrameKind::Cts));

        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec!["R:hello".to_string(), "T:ACK".to_string()]);

        // One evaluation handles the whole batch
        assert!(mac.poll());
        assert!(!mac.poll());
    }

    #[test]
    fn full_exchange_as_sender() {
        let (mut mac, phy, timer) = setup(Config::default());
        let h = mac.handle();

        h.new_packet(PEER, &b"hello"[..]).unwrap();
        run_for(&mut mac, &timer, Duration::from_millis(20));

        assert_eq!(mac.state(), MacState::RtsSent);
        assert_eq!(phy.take_sent(), vec![Frame::control(FrameKind::Rts, PEER, LOCAL).encode()]);

        h.on_frame(true, &frame(FrameKind::Cts));
        run_for(&mut mac, &timer, Duration::from_millis(1));
        assert_eq!(mac.state(), MacState::DataSent);
        assert_eq!(phy.take_sent(), vec![Frame::data(PEER, LOCAL, &b"hello"[..]).encode()]);

        h.on_frame(true, &frame(FrameKind::Ack));
        run_for(&mut mac, &timer, Duration::from_millis(1));

        assert_eq!(mac.state(), MacState::Idle);
        assert_eq!(h.queue_len(), 0);
        assert_eq!(mac.stats().delivered, 1);
        assert_eq!(mac.stats().collisions, 0);
    }

    #[test]
    fn retries_then_drops() {
        let c = Config {
            packet_lifetime: 2,
            ..Default::default()
        };
        let (mut mac, phy, timer) = setup(c);
        let h = mac.handle();

        h.new_packet(PEER, &b"lost"[..]).unwrap();
        run_for(&mut mac, &timer, Duration::from_secs(1));

        let rts = Frame::control(FrameKind::Rts, PEER, LOCAL).encode();
        assert_eq!(phy.take_sent(), vec![rts.clone(), rts]);

        let s = mac.stats();
        assert_eq!(s.collisions, 2);
        assert_eq!(s.dropped, 1);
        assert_eq!(h.queue_len(), 0);
        assert_eq!(mac.state(), MacState::Idle);
    }

    #[test]
    fn busy_channel_defers() {
        let (mut mac, phy, timer) = setup(Config::default());
        let h = mac.handle();

        phy.set_busy(true);
        h.new_packet(PEER, &b"hello"[..]).unwrap();
        run_for(&mut mac, &timer, Duration::from_millis(50));

        assert!(phy.take_sent().is_empty());
        assert_eq!(mac.state(), MacState::Idle);

        phy.set_busy(false);
        run_for(&mut mac, &timer, Duration::from_millis(20));
        assert_eq!(mac.state(), MacState::RtsSent);
    }

    #[test]
    fn enqueue_does_not_reset_contention() {
        let (mut mac, _phy, timer) = setup(Config::default());
        let h = mac.handle();

        h.new_packet(PEER, &b"one"[..]).unwrap();
        assert!(mac.poll());
        assert_eq!(mac.state(), MacState::DifsWait);

        h.new_packet(PEER, &b"two"[..]).unwrap();
        assert!(!mac.poll());
        assert_eq!(mac.state(), MacState::DifsWait);

        timer.advance(Duration::from_micros(400));
        assert!(mac.poll());
        assert_eq!(mac.state(), MacState::Backoff);
    }

    #[test]
    fn enqueue_during_evaluation_keeps_backoff() {
        let (mut mac, phy, timer) = setup(Config::default());
        let h = mac.handle();

        h.new_packet(PEER, &b"one"[..]).unwrap();
        assert!(mac.poll());
        assert_eq!(mac.state(), MacState::DifsWait);

        // Driver takes the DIFS expiry, then a packet arrives before it re-arms
        timer.advance(Duration::from_micros(400));
        let fire = mac.shared.wake.poll(timer.ticks_us());
        assert_eq!(fire, Some(Fire::Timer));

        h.new_packet(PEER, &b"two"[..]).unwrap();
        mac.dispatch(Fire::Timer);
        assert_eq!(mac.state(), MacState::Backoff);

        assert_ne!(mac.shared.wake.poll(timer.ticks_us()), Some(Fire::Now));
        assert_eq!(mac.state(), MacState::Backoff);

        run_for(&mut mac, &timer, Duration::from_millis(20));
        assert_eq!(mac.state(), MacState::RtsSent);
        assert_eq!(phy.take_sent(), vec![Frame::control(FrameKind::Rts, PEER, LOCAL).encode()]);
        assert_eq!(h.queue_len(), 2);
    }

    #[test]
    fn dropped_packet_is_logged() {
        let dir = std::env::temp_dir().join(format!("qpcsma-drop-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("mac.log").to_string_lossy().to_string();

        let c = Config {
            packet_lifetime: 1,
            log: crate::mac::config::LogConfig {
                mac_log: Some(path.clone()),
                rx_data_log: None,
            },
            ..Default::default()
        };
        let (mut mac, _phy, timer) = setup(c);
        let h = mac.handle();

        h.new_packet(PEER, &b"lost"[..]).unwrap();
        run_for(&mut mac, &timer, Duration::from_secs(1));
        assert_eq!(mac.stats().dropped, 1);

        let log = std::fs::read_to_string(&path).unwrap();
        assert!(log.lines().any(|l| l == "TX: f - 0x02 lost"), "{}", log);
    }

    #[test]
    fn send_failure_retries_after_sifs() {
        let (mut mac, phy, timer) = setup(Config::default());
        let h = mac.handle();

        phy.set_fail_send(true);
        h.on_frame(true, &frame(FrameKind::Rts));
        assert!(mac.poll());
        assert_eq!(mac.state(), MacState::CtsSent);

        // A retry is armed rather than an immediate wake
        assert!(!mac.poll());
        timer.advance(Duration::from_micros(200));
        assert!(mac.poll());
        assert_eq!(mac.state(), MacState::Idle);

        h.on_frame(true, &frame(FrameKind::Rts));
        assert_eq!(mac.step(Trigger::Immediate).err(), Some(MacError::Phy(MockError::SendFailed)));
    }

    #[test]
    fn stopped_rejects_packets() {
        let (mut mac, _phy, _timer) = setup(Config::default());
        let h = mac.handle();

        h.stop();
        assert!(h.is_stopped());
        assert_eq!(h.new_packet(PEER, &b"late"[..]), Err(EnqueueError::Stopped));

        // Run returns immediately once stopped
        mac.run();
    }

    #[test]
    fn queue_full() {
        let c = Config {
            max_queue_len: 1,
            ..Default::default()
        };
        let (mac, _phy, _timer) = setup(c);
        let h = mac.handle();

        h.new_packet(PEER, &b"one"[..]).unwrap();
        assert_eq!(h.new_packet(PEER, &b"two"[..]), Err(EnqueueError::QueueFull));
    }

    #[test]
    fn quiet_period_moves_off_primary() {
        let _ = simplelog::SimpleLogger::init(log::LevelFilter::Debug, simplelog::Config::default());

        let phy = MockPhy::new();
        let timer = MockTimer::new();
        let mut mac = Mac::new_quiet(phy.clone(), timer.clone(), quiet_config())
            .unwrap()
            .with_rng(StdRng::seed_from_u64(5));
        let h = mac.handle();
        let k = mac.mode().sensing().offset();

        let primary = 10f32.powf((-40.0 - k) / 10.0);
        let clear = 10f32.powf((-90.0 - k) / 10.0);
        phy.push_sample(CH_A, primary);
        phy.push_sample(CH_B, clear);

        h.new_packet(PEER, &b"hello"[..]).unwrap();
        assert!(mac.poll());
        assert_eq!(mac.state(), MacState::DifsWait);

        timer.advance(Duration::from_micros(10_200));
        assert!(mac.poll());
        assert_eq!(mac.state(), MacState::Backoff);
        phy.clear_calls();

        // Sensing is due immediately
        assert!(mac.poll());
        assert_eq!(mac.state(), MacState::Idle);
        assert_eq!(mac.frequency(), CH_B);
        assert!(phy.calls().contains(&PhyCall::Receive(true)));
        assert_eq!(phy.calls().last(), Some(&PhyCall::SetFreq(CH_B)));

        let s = mac.stats();
        assert_eq!(s.quiet_periods, 1);
        assert_eq!(s.primary_detections, 1);
        assert_eq!(s.retunes, 1);
    }

    #[test]
    fn quiet_period_resumes_backoff() {
        let phy = MockPhy::new();
        let timer = MockTimer::new();
        let mut mac = Mac::new_quiet(phy.clone(), timer.clone(), quiet_config())
            .unwrap()
            .with_rng(StdRng::seed_from_u64(5));
        let k = mac.mode().sensing().offset();

        phy.push_sample(CH_A, 10f32.powf((-85.0 - k) / 10.0));

        mac.handle().new_packet(PEER, &b"hello"[..]).unwrap();
        assert!(mac.poll());
        timer.advance(Duration::from_micros(10_200));
        assert!(mac.poll());

        assert_eq!(mac.quiet_period(), Ok(Wake::After(Duration::from_millis(30))));
        assert_eq!(mac.state(), MacState::Backoff);
    }

    #[test]
    fn sensing_failure_resets_to_idle() {
        let phy = MockPhy::new();
        let timer = MockTimer::new();
        let mut mac = Mac::new_quiet(phy, timer, quiet_config()).unwrap();

        assert_eq!(mac.quiet_period(), Err(MacError::Phy(MockError::NoSamples)));
        assert_eq!(mac.state(), MacState::Idle);
    }
}
