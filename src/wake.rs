//! Wake directives and the scheduler that turns them into suspension
//! and resumption of the MAC driver.
//!
//! The scheduler also owns the receive mailbox. Posting a received event
//! and the resulting immediate wake happen under the same lock as the
//! driver's drain, so an event is never consumed without its wake, and a
//! wake never outlives the event that caused it.

use core::time::Duration;

use crate::mac::core::RxEvent;

/// Depth of the receive mailbox
pub const MAILBOX_LEN: usize = 16;

/// When the state machine wants to run next, emitted by every evaluation
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Wake {
    /// Re-evaluate immediately
    Now,
    /// Re-evaluate once the duration has elapsed
    After(Duration),
    /// Run a quiet period before the next evaluation
    Sensing,
    /// Sleep until an event arrives
    Idle,
}

/// Why the scheduler released the driver
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Fire {
    /// A `Wake::After` deadline expired
    Timer,
    /// An immediate wake, from the state machine or a received frame
    Now,
    /// A quiet period is due
    Sensing,
}

#[cfg(feature = "std")]
pub use self::scheduler::WakeScheduler;

#[cfg(feature = "std")]
mod scheduler {
    use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

    use heapless::spsc::Queue;
    use log::{trace, warn};

    use super::*;
    use crate::timer::Timer;

    struct Signals {
        mailbox: Queue<RxEvent, MAILBOX_LEN>,
        now: bool,
        deadline: Option<u64>,
        sensing: bool,
        stopped: bool,
    }

    impl Signals {
        fn armed(&self) -> bool {
            self.now || self.sensing || self.deadline.is_some() || !self.mailbox.is_empty()
        }

        fn take(&mut self, now_us: u64) -> Option<Fire> {
            // Pending events override any timer or quiet period
            if self.now || !self.mailbox.is_empty() {
                self.now = false;
                self.sensing = false;
                self.deadline = None;
                return Some(Fire::Now);
            }

            if self.sensing {
                self.sensing = false;
                return Some(Fire::Sensing);
            }

            match self.deadline {
                Some(d) if now_us >= d => {
                    self.deadline = None;
                    Some(Fire::Timer)
                }
                _ => None,
            }
        }
    }

    /// Deadline scheduler shared by the driver and receive contexts
    pub struct WakeScheduler {
        signals: Mutex<Signals>,
        cond: Condvar,
    }

    impl Default for WakeScheduler {
        fn default() -> Self {
            Self::new()
        }
    }

    impl WakeScheduler {
        pub fn new() -> Self {
            Self {
                signals: Mutex::new(Signals {
                    mailbox: Queue::new(),
                    now: false,
                    deadline: None,
                    sensing: false,
                    stopped: false,
                }),
                cond: Condvar::new(),
            }
        }

        fn lock(&self) -> MutexGuard<'_, Signals> {
            self.signals.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// Replace the armed directive with the latest evaluation's.
        ///
        /// Events already in the mailbox keep their immediate wake. A kick
        /// left over from an enqueue is superseded by a timed or sensing
        /// directive, and survives an idle one so the packet is not stranded.
        pub fn arm(&self, wake: Wake, now_us: u64) {
            let mut s = self.lock();

            s.deadline = None;
            s.sensing = false;

            match wake {
                Wake::Now => s.now = true,
                Wake::After(d) => {
                    s.now = false;
                    s.deadline = Some(now_us + d.as_micros() as u64);
                }
                Wake::Sensing => {
                    s.now = false;
                    s.sensing = true;
                }
                Wake::Idle => (),
            }

            trace!("Armed {:?} at {} us", wake, now_us);

            self.cond.notify_all();
        }

        /// Post a received event and request an immediate evaluation
        pub fn post(&self, event: RxEvent) -> bool {
            let mut s = self.lock();

            if let Err(e) = s.mailbox.enqueue(event) {
                warn!("Receive mailbox full, dropping {:?}", e);
                return false;
            }

            self.cond.notify_all();
            true
        }

        /// Request an immediate evaluation only if nothing is armed
        pub fn kick(&self) -> bool {
            let mut s = self.lock();

            if s.armed() {
                return false;
            }

            s.now = true;
            self.cond.notify_all();
            true
        }

        /// Hand every pending event to `f`, in arrival order
        pub fn drain<F: FnMut(RxEvent)>(&self, mut f: F) {
            let mut s = self.lock();
            while let Some(e) = s.mailbox.dequeue() {
                f(e);
            }
        }

        /// Stop the driver, in-flight evaluations complete first
        pub fn stop(&self) {
            let mut s = self.lock();
            s.stopped = true;
            self.cond.notify_all();
        }

        pub fn is_stopped(&self) -> bool {
            self.lock().stopped
        }

        /// Check for a due wake without blocking
        pub fn poll(&self, now_us: u64) -> Option<Fire> {
            let mut s = self.lock();
            if s.stopped {
                return None;
            }
            s.take(now_us)
        }

        /// Block until a wake is due, returns `None` once stopped
        pub fn wait<T: Timer>(&self, timer: &T) -> Option<Fire> {
            let mut s = self.lock();

            loop {
                if s.stopped {
                    return None;
                }

                let now = timer.ticks_us();
                if let Some(f) = s.take(now) {
                    return Some(f);
                }

                let deadline = s.deadline;
                s = match deadline {
                    Some(d) => {
                        let timeout = std::time::Duration::from_micros(d.saturating_sub(now));
                        match self.cond.wait_timeout(s, timeout) {
                            Ok((g, _)) => g,
                            Err(e) => e.into_inner().0,
                        }
                    }
                    None => self.cond.wait(s).unwrap_or_else(PoisonError::into_inner),
                };
            }
        }
    }

}
