
use core::time::Duration;

use log::{trace, debug, info, warn};

use bytes::Bytes;
use rand_core::RngCore;
use strum::Display;

use crate::packet::{Address, Frame, FrameKind};
use crate::wake::Wake;

use super::backoff;
use super::config::Config;
use super::queue::{QueueEntry, TxQueue};
use super::sensing::{Occupancy, QuietOutcome};

/// Core MAC states
#[derive(Debug, Clone, Copy, PartialEq, Display)]
pub enum MacState {
    Idle,
    DifsWait,
    Backoff,
    RtsSent,
    DataSent,
    CtsSent,
    AckPending,
}

/// What woke the state machine
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trigger {
    /// A scheduled deadline expired
    Timer,
    /// An immediate wake, usually a received frame
    Immediate,
}

/// Control or data frame reception, posted by the receive context
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RxEvent {
    pub kind: FrameKind,
    pub src: Address,
}

/// Received frames not yet consumed by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PendingFlags {
    pub rts: bool,
    pub cts: bool,
    pub data: bool,
    pub ack: bool,
}

/// MAC layer statistics
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MacStats {
    /// Missing CTS or ACK
    pub collisions: u32,
    /// Packets dropped after exhausting their lifetime
    pub dropped: u32,
    /// Packets acknowledged by the peer
    pub delivered: u32,
    pub rts_sent: u32,
    pub cts_sent: u32,
    pub acks_sent: u32,
    /// ACKs withheld because the channel was busy
    pub acks_suppressed: u32,
    pub quiet_periods: u32,
    pub primary_detections: u32,
    pub retunes: u32,
    /// Reselection scans that found no usable channel
    pub reselect_failures: u32,
}

/// Result of a single state machine evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Frame to hand to the PHY
    pub transmit: Option<Frame>,
    /// Packet dropped after exhausting its lifetime
    pub dropped: Option<QueueEntry>,
    /// When to evaluate next
    pub wake: Wake,
}

impl Step {
    fn wake(wake: Wake) -> Self {
        Self {
            transmit: None,
            dropped: None,
            wake,
        }
    }

    fn send(frame: Frame, wake: Wake) -> Self {
        Self {
            transmit: Some(frame),
            dropped: None,
            wake,
        }
    }
}

/// CSMA/CA state machine.
///
/// Owns the transmit queue, pending flags and backoff countdown. Each
/// evaluation consumes at most one cause, emits at most one frame and
/// always returns a wake directive. The core performs no I/O, the driver
/// samples the carrier and transmits on its behalf.
#[derive(Debug, Clone, PartialEq)]
pub struct Core {
    pub(crate) config: Config,
    quiet_interval: Option<u32>,

    pub(crate) state: MacState,
    pub(crate) flags: PendingFlags,
    peer: Option<Address>,

    pub(crate) queue: TxQueue,
    pub(crate) backoff: u32,
    qp_counter: u32,

    pub(crate) stats: MacStats,
}

impl Core {
    /// Create a new state machine, `quiet` enables the quiet period counter
    pub fn new(config: Config, quiet: bool) -> Self {
        let quiet_interval = match quiet {
            true => config.quiet.as_ref().map(|q| q.qp_interval.max(1)),
            false => None,
        };

        Self {
            queue: TxQueue::new(config.max_queue_len),
            config,
            quiet_interval,

            state: MacState::Idle,
            flags: PendingFlags::default(),
            peer: None,

            backoff: 0,
            qp_counter: 0,

            stats: MacStats::default(),
        }
    }

    pub fn address(&self) -> Address {
        self.config.address
    }

    pub fn state(&self) -> MacState {
        self.state
    }

    pub fn flags(&self) -> PendingFlags {
        self.flags
    }

    pub fn stats(&self) -> &MacStats {
        &self.stats
    }

    pub fn queue(&self) -> &TxQueue {
        &self.queue
    }

    /// Current backoff countdown, zero when unset
    pub fn backoff(&self) -> u32 {
        self.backoff
    }

    /// Queue a packet for transmission
    pub fn enqueue(&mut self, dest: Address, payload: Bytes) -> Result<(), QueueEntry> {
        self.queue.push(dest, payload)
    }

    /// Record a received frame for the next evaluation
    pub fn deliver(&mut self, event: RxEvent) {
        trace!("Deliver {} from {} in state {}", event.kind, event.src, self.state);

        self.peer = Some(event.src);

        match event.kind {
            FrameKind::Rts => self.flags.rts = true,
            FrameKind::Cts => self.flags.cts = true,
            FrameKind::Data => self.flags.data = true,
            FrameKind::Ack => self.flags.ack = true,
        }
    }

    /// Run one evaluation of the state machine.
    ///
    /// `busy` is the carrier sense result sampled for this evaluation.
    pub fn evaluate<R: RngCore + ?Sized>(&mut self, trigger: Trigger, busy: bool, rng: &mut R) -> Step {
        trace!("Evaluate {:?} in state {} (busy: {}, queued: {})", trigger, self.state, busy, self.queue.len());

        let sifs = self.config.sifs();
        let ctl = self.config.ctl();

        match self.state {
            MacState::Idle => {
                // Someone wants to send to us
                if self.flags.rts {
                    self.flags.rts = false;

                    if busy {
                        debug!("RTS received while channel busy, withholding CTS");
                        return Step::wake(Wake::After(sifs));
                    }

                    let cts = Frame::control(FrameKind::Cts, self.peer_or_broadcast(), self.address());
                    self.stats.cts_sent += 1;
                    self.state = MacState::CtsSent;

                    return Step::send(cts, Wake::After(sifs + ctl));
                }

                if self.queue.is_empty() {
                    return Step::wake(Wake::Idle);
                }

                let attempts = self.queue.attempts();

                if !busy && attempts < self.config.packet_lifetime {
                    self.state = MacState::DifsWait;
                    if let Some(interval) = self.quiet_interval {
                        self.qp_counter = (self.qp_counter + 1) % interval;
                    }
                    return Step::wake(Wake::After(self.config.difs()));
                }

                if attempts >= self.config.packet_lifetime {
                    let dropped = self.queue.pop();
                    self.stats.dropped += 1;

                    if let Some(d) = &dropped {
                        warn!("Failed to send packet to {} after {} attempts", d.dest, d.attempts);
                    }

                    let wake = match self.queue.is_empty() {
                        true => Wake::After(sifs),
                        false => Wake::Now,
                    };

                    return Step {
                        transmit: None,
                        dropped,
                        wake,
                    };
                }

                Step::wake(Wake::After(sifs))
            }
            MacState::DifsWait => {
                if trigger != Trigger::Timer || busy {
                    debug!("DIFS interrupted, returning to idle");
                    self.state = MacState::Idle;
                    return Step::wake(Wake::Now);
                }

                if self.backoff == 0 {
                    self.backoff = backoff::draw(rng, self.queue.attempts(), self.config.cw_min);
                    debug!("Drew backoff of {} slots (attempt {})", self.backoff, self.queue.attempts());
                }

                self.state = MacState::Backoff;

                match self.quiet_interval.is_some() && self.qp_counter == 0 {
                    true => Step::wake(Wake::Sensing),
                    false => Step::wake(Wake::After(self.config.backoff_unit())),
                }
            }
            MacState::Backoff => {
                if trigger != Trigger::Timer || busy {
                    debug!("Backoff interrupted at {} slots, returning to idle", self.backoff);
                    self.state = MacState::Idle;
                    return Step::wake(Wake::Now);
                }

                self.backoff = backoff::tick(self.backoff);
                if self.backoff > 0 {
                    return Step::wake(Wake::After(self.config.backoff_unit()));
                }

                let dest = match self.queue.head() {
                    Some(h) => h.dest,
                    None => {
                        self.state = MacState::Idle;
                        return Step::wake(Wake::Now);
                    }
                };

                self.queue.record_attempt();
                self.stats.rts_sent += 1;
                self.state = MacState::RtsSent;

                debug!("Backoff complete, sending RTS to {} (attempt {})", dest, self.queue.attempts());

                Step::send(Frame::control(FrameKind::Rts, dest, self.address()), Wake::After(ctl + sifs))
            }
            MacState::RtsSent => {
                self.state = MacState::Idle;

                if !self.flags.cts {
                    debug!("No CTS received, collision");
                    self.stats.collisions += 1;
                    return Step::wake(Wake::Now);
                }

                self.flags.cts = false;

                let data = match self.queue.head() {
                    Some(h) => Frame::data(h.dest, self.address(), h.payload.clone()),
                    None => return Step::wake(Wake::Now),
                };

                self.state = MacState::DataSent;
                Step::send(data, Wake::After(sifs + ctl))
            }
            MacState::DataSent => {
                if self.flags.ack {
                    self.flags.ack = false;
                    if let Some(p) = self.queue.pop() {
                        info!("Packet to {} delivered after {} attempts", p.dest, p.attempts);
                    }
                    self.stats.delivered += 1;
                } else {
                    debug!("No ACK received, collision");
                    self.stats.collisions += 1;
                }

                self.state = MacState::Idle;
                Step::wake(Wake::Now)
            }
            MacState::CtsSent => {
                if self.flags.data {
                    self.flags.data = false;
                    self.state = MacState::AckPending;
                    return Step::wake(Wake::After(sifs));
                }

                debug!("No data received after CTS");
                self.state = MacState::Idle;
                Step::wake(Wake::Now)
            }
            MacState::AckPending => {
                self.state = MacState::Idle;

                if busy {
                    debug!("Channel busy, suppressing ACK");
                    self.stats.acks_suppressed += 1;
                    return Step::wake(Wake::Now);
                }

                let ack = Frame::control(FrameKind::Ack, self.peer_or_broadcast(), self.address());
                self.stats.acks_sent += 1;

                Step::send(ack, Wake::Now)
            }
        }
    }

    /// Resume after a quiet period.
    ///
    /// A primary user restarts contention from idle. Otherwise an
    /// in-progress backoff continues once the quiet period has elapsed.
    pub fn finish_quiet_period(&mut self, outcome: Option<QuietOutcome>, remaining: Duration) -> Wake {
        let outcome = match outcome {
            Some(o) => o,
            None => {
                self.state = MacState::Idle;
                return Wake::Now;
            }
        };

        self.stats.quiet_periods += 1;
        if outcome.retuned.is_some() {
            self.stats.retunes += 1;
        }
        if outcome.reselect_failed {
            self.stats.reselect_failures += 1;
        }

        if outcome.occupancy == Occupancy::Primary {
            self.stats.primary_detections += 1;
            self.state = MacState::Idle;
            return Wake::Now;
        }

        match self.state {
            MacState::Backoff => Wake::After(remaining.max(self.config.backoff_unit())),
            _ => {
                self.state = MacState::Idle;
                Wake::Now
            }
        }
    }

    fn peer_or_broadcast(&self) -> Address {
        self.peer.unwrap_or(Address::BROADCAST)
    }
}
