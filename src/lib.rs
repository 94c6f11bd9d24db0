//! CSMA/CA MAC with RTS/CTS/DATA/ACK handshaking for half-duplex shared
//! radio channels, with an optional quiet period mode that pauses
//! contention to sense the spectrum and moves off channels held by a
//! primary user.
//!
//! The state machine in [`mac::core`] is pure and performs no I/O. The
//! driver in [`mac`] runs it against a [`phy::Phy`] using the
//! [`wake::WakeScheduler`].

#![no_std]

extern crate alloc;

#[cfg(any(test, feature="std"))]
extern crate std;

pub mod timer;

pub mod packet;

pub mod wake;

pub mod mac;

pub mod phy;

pub mod error;

#[cfg(feature = "std")]
pub mod capture;

#[cfg(any(test, feature = "mocks"))]
pub mod sim;

pub mod prelude;
