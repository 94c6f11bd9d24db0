//! MAC Timer API
//
// qpcsma, CSMA/CA MAC for shared radio channels
// Copyright 2026 the qpcsma authors

/// Timer trait provides mechanisms for accessing monotonic times
/// to drive MAC wake deadlines.
///
/// All methods are monotonic and relative to the same unknown epoc
pub trait Timer {
    /// Returns the number of millisecond ticks since some unknown epoc
    fn ticks_ms(&self) -> u64 {
        self.ticks_us() / 1000
    }

    /// Returns the number of microsecond ticks since some unknown epoc
    fn ticks_us(&self) -> u64;
}

/// Timer backed by `std::time::Instant`, epoc is construction time
#[cfg(feature = "std")]
#[derive(Clone, Debug)]
pub struct SystemTimer {
    start: std::time::Instant,
}

#[cfg(feature = "std")]
impl SystemTimer {
    pub fn new() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for SystemTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Timer for SystemTimer {
    fn ticks_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

#[cfg(any(test, feature = "mocks"))]
pub mod mock {
    use core::time::Duration;
    use std::sync::{Arc, Mutex};

    /// Mock timer, shared between clones so tests can step time
    /// while the MAC holds its own copy
    #[derive(Clone, Debug, Default)]
    pub struct MockTimer(Arc<Mutex<u64>>);

    impl MockTimer {
        pub fn new() -> Self {
            Self(Arc::new(Mutex::new(0)))
        }

        pub fn set_us(&self, val: u64) {
            *self.0.lock().unwrap() = val;
        }

        pub fn set_ms(&self, val: u64) {
            self.set_us(val * 1000);
        }

        pub fn advance(&self, by: Duration) {
            let mut v = self.0.lock().unwrap();
            *v += by.as_micros() as u64;
        }

        pub fn val_us(&self) -> u64 {
            *self.0.lock().unwrap()
        }
    }

    impl super::Timer for MockTimer {
        fn ticks_us(&self) -> u64 {
            *self.0.lock().unwrap()
        }
    }
}
