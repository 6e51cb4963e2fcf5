//! Error taxonomy of the meter driver
//!
//! None of these are fatal. The polling state machine recovers from all of
//! them locally; callers only see them through [`crate::TickOutcome`], the
//! error counters and the `hardware_available` flag.

use thiserror_no_std::Error;

use crate::registers::RegisterGroup;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeterError {
    #[error("no response for {group} within {waited_ms} ms")]
    TransportTimeout { group: RegisterGroup, waited_ms: u32 },
    #[error("bus transport failed while requesting {group}")]
    TransportFailure { group: RegisterGroup },
    #[error("response id {received} does not match expected id {expected}")]
    ResponseMismatch { expected: u8, received: u8 },
    #[error("malformed payload for {group}")]
    DecodeError { group: RegisterGroup },
    #[error("energy reset not confirmed after {attempts} attempts")]
    ResetVerificationFailed { attempts: u8 },
    #[error("no meter detected yet")]
    Unconfigured,
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("encoding failed: {0}")]
    Encode(postcard::Error),
}

impl From<postcard::Error> for MeterError {
    fn from(value: postcard::Error) -> Self {
        Self::Encode(value)
    }
}
