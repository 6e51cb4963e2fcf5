//! Scripted bus adapter for driving the state machine in tests

use heapless::Deque;

use super::{Registers, Response, Transport, TransportPoll};
use crate::registers::{RegisterGroup, encode_f32};

/// How the mock answers one request.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    /// Answer with the simulated meter values on the first poll
    Auto,
    /// Stay pending for this many polls, then answer like `Auto`
    Delay(u8),
    /// Answer with this payload
    Registers(Registers),
    /// Answer with an id that does not match the request
    WrongId,
    /// Report a transport error on the first poll
    Error,
    /// Never answer
    Silent,
    /// Refuse to begin the request
    Refuse,
}

#[derive(Debug)]
struct Outstanding {
    group: RegisterGroup,
    request_id: u8,
    write: Option<u16>,
    reply: Reply,
}

pub(crate) struct MockTransport {
    script: Deque<Reply, 64>,
    outstanding: Option<Outstanding>,
    pub configured: bool,
    pub power_w: f32,
    pub import_kwh: f32,
    pub resettable_kwh: f32,
    pub checksum_errors: u32,
    /// Whether an acknowledged reset write zeroes the resettable energy
    pub reset_clears_energy: bool,
    pub reads: u32,
    pub writes: u32,
    pub last_write: Option<(RegisterGroup, u16)>,
    /// Requests started while another one was still outstanding
    pub overlapping_requests: u32,
    pub requested: heapless::Vec<RegisterGroup, 64>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self {
            script: Deque::new(),
            outstanding: None,
            configured: true,
            power_w: 1000.0,
            import_kwh: 1500.0,
            resettable_kwh: 12.5,
            checksum_errors: 0,
            reset_clears_energy: true,
            reads: 0,
            writes: 0,
            last_write: None,
            overlapping_requests: 0,
            requested: heapless::Vec::new(),
        }
    }

    /// Queue the reply for the next request that does not have one yet.
    pub(crate) fn script(&mut self, reply: Reply) {
        if self.script.push_back(reply).is_err() {
            panic!("mock script is full");
        }
    }

    pub(crate) fn has_outstanding(&self) -> bool {
        self.outstanding.is_some()
    }

    fn begin(&mut self, group: RegisterGroup, request_id: u8, write: Option<u16>) -> bool {
        if self.outstanding.is_some() {
            self.overlapping_requests += 1;
        }
        let _ = self.requested.push(group);
        let reply = self.script.pop_front().unwrap_or(Reply::Auto);
        if matches!(reply, Reply::Refuse) {
            return false;
        }
        self.outstanding = Some(Outstanding {
            group,
            request_id,
            write,
            reply,
        });
        true
    }

    fn auto_registers(&mut self, group: RegisterGroup, write: Option<u16>) -> Registers {
        match group {
            RegisterGroup::Power => registers_from(&encode_f32(self.power_w)),
            RegisterGroup::ImportEnergy => registers_from(&encode_f32(self.import_kwh)),
            RegisterGroup::ResettableEnergy => registers_from(&encode_f32(self.resettable_kwh)),
            RegisterGroup::Diagnostics => registers_from(&[
                (self.checksum_errors >> 16) as u16,
                self.checksum_errors as u16,
                0,
                0,
            ]),
            RegisterGroup::EnergyReset => {
                if write.is_some() && self.reset_clears_energy {
                    self.resettable_kwh = 0.0;
                }
                Registers::new()
            }
        }
    }
}

fn registers_from(words: &[u16]) -> Registers {
    let mut registers = Registers::new();
    for word in words {
        let _ = registers.push(*word);
    }
    registers
}

impl Transport for MockTransport {
    fn is_configured(&mut self) -> bool {
        self.configured
    }

    fn begin_read(&mut self, group: RegisterGroup, request_id: u8) -> bool {
        self.reads += 1;
        self.begin(group, request_id, None)
    }

    fn begin_write(&mut self, group: RegisterGroup, value: u16, request_id: u8) -> bool {
        self.writes += 1;
        self.last_write = Some((group, value));
        self.begin(group, request_id, Some(value))
    }

    fn poll(&mut self) -> TransportPoll {
        let Some(mut outstanding) = self.outstanding.take() else {
            return TransportPoll::Pending;
        };
        match outstanding.reply.clone() {
            Reply::Silent => {
                self.outstanding = Some(outstanding);
                TransportPoll::Pending
            }
            Reply::Delay(polls) if polls > 0 => {
                outstanding.reply = Reply::Delay(polls - 1);
                self.outstanding = Some(outstanding);
                TransportPoll::Pending
            }
            Reply::Error | Reply::Refuse => TransportPoll::Error,
            Reply::Registers(registers) => TransportPoll::Ok(Response {
                request_id: outstanding.request_id,
                registers,
            }),
            Reply::WrongId => TransportPoll::Ok(Response {
                request_id: outstanding.request_id.wrapping_add(1),
                registers: self.auto_registers(outstanding.group, None),
            }),
            Reply::Auto | Reply::Delay(_) => TransportPoll::Ok(Response {
                request_id: outstanding.request_id,
                registers: self.auto_registers(outstanding.group, outstanding.write),
            }),
        }
    }
}
