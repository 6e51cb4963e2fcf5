//! Hardware-independent core for polling an RS-485 energy meter
//!
//! This crate contains the platform-agnostic part of the meter driver: the
//! polling state machine that talks to the bus through a [`Transport`], the
//! interval sampler, the dual-resolution power history and the state mirror
//! that an API layer reads from.
//!
//! It is `#![no_std]` and never allocates after construction, so it compiles
//! on both embedded targets and desktop hosts (for the simulator and tests).

#![no_std]

pub mod clock;
pub mod config;
pub mod driver;
#[cfg(feature = "embassy")]
pub mod embassy;
pub mod error;
pub mod registers;
pub mod state;
pub mod storage;
pub mod transport;

pub use clock::{Clock, Millis};
pub use config::MeterConfig;
pub use driver::{MeterDriver, TickOutcome};
pub use error::MeterError;
pub use registers::{MeterProfile, Reading, RegisterGroup};
pub use state::{ResetStatus, Snapshot};
pub use transport::{Response, Transport, TransportPoll};
