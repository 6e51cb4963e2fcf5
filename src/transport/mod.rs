//! Interface to the RS-485 bus adapter
//!
//! The adapter owns the physical connection and the Modbus framing. The
//! driver only starts requests and polls for their outcome; none of these
//! calls may block.

#[cfg(test)]
pub(crate) mod mock;

use crate::registers::RegisterGroup;

/// Largest register payload any group transfers.
pub const MAX_RESPONSE_REGISTERS: usize = 8;

pub type Registers = heapless::Vec<u16, MAX_RESPONSE_REGISTERS>;

/// A completed exchange as reported by the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Id of the request this response answers
    pub request_id: u8,
    /// Register payload; empty for acknowledged writes
    pub registers: Registers,
}

/// State of the outstanding request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportPoll {
    Pending,
    Ok(Response),
    Error,
}

/// Non-blocking request/response primitives of the bus adapter.
///
/// A `false` return from one of the `begin_*` methods (bus busy, adapter
/// not ready) is handled exactly like a later [`TransportPoll::Error`].
pub trait Transport {
    /// Minimal discovery hook: whether a meter has been found on the bus.
    fn is_configured(&mut self) -> bool {
        true
    }

    fn begin_read(&mut self, group: RegisterGroup, request_id: u8) -> bool;

    fn begin_write(&mut self, group: RegisterGroup, value: u16, request_id: u8) -> bool;

    fn poll(&mut self) -> TransportPoll;
}
