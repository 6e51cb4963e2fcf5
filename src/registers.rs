//! Register groups and the field descriptor table
//!
//! The polling state machine never knows what a register means. It walks a
//! [`MeterProfile`]: a table of [`FieldDescriptor`]s mapping a register group
//! to a decode function and a destination. Supporting another meter model
//! means writing another profile, not touching the driver.

use core::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::error::MeterError;

/// A set of meter values retrievable by one bus request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterGroup {
    /// Total system active power in W (float, 2 registers)
    Power,
    /// Total import active energy in kWh (float, 2 registers)
    ImportEnergy,
    /// Resettable total active energy in kWh (float, 2 registers)
    ResettableEnergy,
    /// Error counters kept by the RS-485 adapter itself (2 × u32)
    Diagnostics,
    /// Holding register that resets the meter's historical energy data
    EnergyReset,
}

impl RegisterGroup {
    /// Start address of the group on an SDM72DM-V2.
    ///
    /// `None` for groups the bus adapter answers locally.
    pub const fn address(self) -> Option<u16> {
        match self {
            Self::Power => Some(0x0034),
            Self::ImportEnergy => Some(0x0048),
            Self::ResettableEnergy => Some(0x0180),
            Self::Diagnostics => None,
            Self::EnergyReset => Some(0xF010),
        }
    }

    /// Number of 16 bit registers transferred for this group.
    pub const fn register_count(self) -> usize {
        match self {
            Self::Power | Self::ImportEnergy | Self::ResettableEnergy => 2,
            Self::Diagnostics => 4,
            Self::EnergyReset => 1,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Power => "power",
            Self::ImportEnergy => "import energy",
            Self::ResettableEnergy => "resettable energy",
            Self::Diagnostics => "diagnostics",
            Self::EnergyReset => "energy reset",
        }
    }
}

impl Display for RegisterGroup {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

/// Error counters reported by the RS-485 adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MeterDiagnostics {
    pub checksum_errors: u32,
    pub framing_errors: u32,
}

/// A decoded register group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Power { watts: f32 },
    ImportEnergy { kwh: f32 },
    ResettableEnergy { kwh: f32 },
    Diagnostics(MeterDiagnostics),
}

impl Reading {
    /// The numeric value of single-value readings.
    pub fn scalar(&self) -> Option<f32> {
        match *self {
            Self::Power { watts } => Some(watts),
            Self::ImportEnergy { kwh } | Self::ResettableEnergy { kwh } => Some(kwh),
            Self::Diagnostics(_) => None,
        }
    }
}

/// Where a decoded reading goes besides the state mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// Mirror only
    Mirror,
    /// Mirror and the interval sampler
    Sampler,
}

pub type DecodeFn = fn(&[u16]) -> Result<Reading, MeterError>;

/// One row of the polling table.
#[derive(Debug, Clone, Copy)]
pub struct FieldDescriptor {
    pub group: RegisterGroup,
    pub decode: DecodeFn,
    pub destination: Destination,
}

impl FieldDescriptor {
    pub fn decode(&self, registers: &[u16]) -> Result<Reading, MeterError> {
        (self.decode)(registers)
    }
}

/// Command that resets the meter's resettable energy counter.
#[derive(Debug, Clone, Copy)]
pub struct ResetCommand {
    pub group: RegisterGroup,
    pub value: u16,
    /// Field read back to confirm the reset took effect
    pub verify: FieldDescriptor,
    /// Value the verification read must return (within the configured tolerance)
    pub expected_kwh: f32,
}

/// Everything the driver needs to know about a meter model.
#[derive(Debug, Clone, Copy)]
pub struct MeterProfile {
    /// Fields polled in order, wrapping around after the last one
    pub fields: &'static [FieldDescriptor],
    pub reset: ResetCommand,
}

const POWER: FieldDescriptor = FieldDescriptor {
    group: RegisterGroup::Power,
    decode: decode_power,
    destination: Destination::Sampler,
};

const IMPORT_ENERGY: FieldDescriptor = FieldDescriptor {
    group: RegisterGroup::ImportEnergy,
    decode: decode_import_energy,
    destination: Destination::Mirror,
};

const RESETTABLE_ENERGY: FieldDescriptor = FieldDescriptor {
    group: RegisterGroup::ResettableEnergy,
    decode: decode_resettable_energy,
    destination: Destination::Mirror,
};

const DIAGNOSTICS: FieldDescriptor = FieldDescriptor {
    group: RegisterGroup::Diagnostics,
    decode: decode_diagnostics,
    destination: Destination::Mirror,
};

impl MeterProfile {
    /// Eastron SDM72DM(-V2) three phase meter.
    ///
    /// Power is read every other request so it reaches the sampler's maximum
    /// rate while the slower values still refresh a few times per second.
    pub const SDM72DM: MeterProfile = MeterProfile {
        fields: &[
            POWER,
            IMPORT_ENERGY,
            POWER,
            RESETTABLE_ENERGY,
            POWER,
            DIAGNOSTICS,
        ],
        reset: ResetCommand {
            group: RegisterGroup::EnergyReset,
            value: 0x0003,
            verify: RESETTABLE_ENERGY,
            expected_kwh: 0.0,
        },
    };
}

/// Decode a big-endian IEEE 754 float spread over two registers.
fn decode_f32(registers: &[u16]) -> Option<f32> {
    let [hi, lo] = registers else {
        return None;
    };
    let value = f32::from_bits(((*hi as u32) << 16) | *lo as u32);
    value.is_finite().then_some(value)
}

/// Inverse of the float decoding, used by simulated meters.
pub fn encode_f32(value: f32) -> [u16; 2] {
    let bits = value.to_bits();
    [(bits >> 16) as u16, bits as u16]
}

fn decode_u32(hi: u16, lo: u16) -> u32 {
    ((hi as u32) << 16) | lo as u32
}

fn decode_power(registers: &[u16]) -> Result<Reading, MeterError> {
    decode_f32(registers)
        .map(|watts| Reading::Power { watts })
        .ok_or(MeterError::DecodeError {
            group: RegisterGroup::Power,
        })
}

fn decode_import_energy(registers: &[u16]) -> Result<Reading, MeterError> {
    decode_f32(registers)
        .map(|kwh| Reading::ImportEnergy { kwh })
        .ok_or(MeterError::DecodeError {
            group: RegisterGroup::ImportEnergy,
        })
}

fn decode_resettable_energy(registers: &[u16]) -> Result<Reading, MeterError> {
    decode_f32(registers)
        .map(|kwh| Reading::ResettableEnergy { kwh })
        .ok_or(MeterError::DecodeError {
            group: RegisterGroup::ResettableEnergy,
        })
}

fn decode_diagnostics(registers: &[u16]) -> Result<Reading, MeterError> {
    let [checksum_hi, checksum_lo, framing_hi, framing_lo] = registers else {
        return Err(MeterError::DecodeError {
            group: RegisterGroup::Diagnostics,
        });
    };
    Ok(Reading::Diagnostics(MeterDiagnostics {
        checksum_errors: decode_u32(*checksum_hi, *checksum_lo),
        framing_errors: decode_u32(*framing_hi, *framing_lo),
    }))
}

/// Convert a power reading into a history sample.
///
/// Rounds half away from zero and saturates at the `i16` range. `as` on a
/// float truncates towards zero, so shifting by 0.5 first gives the rounding.
pub fn power_to_sample(watts: f32) -> i16 {
    let shifted = if watts >= 0.0 {
        watts + 0.5
    } else {
        watts - 0.5
    };
    // Float to int casts saturate; NaN never gets here thanks to decode_f32.
    shifted as i16
}
