//! Monotonic millisecond timestamps
//!
//! Embedded hosts usually expose time as a free-running `u32` millisecond
//! counter that wraps after ~49.7 days. All comparisons here subtract first
//! and interpret the difference as signed, so deadlines keep working across
//! the wrap as long as they lie less than ~24.8 days apart.

use serde::{Deserialize, Serialize};

/// A point in time on a wrapping millisecond counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Millis(pub u32);

impl Millis {
    pub const fn new(ms: u32) -> Self {
        Self(ms)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// The timestamp `ms` milliseconds after this one.
    pub const fn wrapping_add(self, ms: u32) -> Self {
        Self(self.0.wrapping_add(ms))
    }

    /// Milliseconds elapsed since `earlier`.
    ///
    /// Only meaningful if `earlier` really lies in the past; a future
    /// timestamp yields a huge value.
    pub const fn elapsed_since(self, earlier: Millis) -> u32 {
        self.0.wrapping_sub(earlier.0)
    }

    /// Whether `deadline` has been reached at this point in time.
    pub const fn has_reached(self, deadline: Millis) -> bool {
        (self.0.wrapping_sub(deadline.0) as i32) >= 0
    }
}

impl From<u32> for Millis {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Source of the current time for the driver.
pub trait Clock {
    fn now(&self) -> Millis;
}

impl<F> Clock for F
where
    F: Fn() -> u32,
{
    fn now(&self) -> Millis {
        Millis(self())
    }
}
