//! Externally visible meter state
//!
//! The driver is the only writer; an API layer reads through
//! [`crate::MeterDriver::snapshot`]. Everything runs on the tick context, so
//! no locking is involved.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::MeterError;
use crate::registers::{MeterDiagnostics, Reading};
use crate::storage::HistoryView;

/// Last known good values decoded from the meter.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MeterValues {
    pub power_w: f32,
    pub import_kwh: f32,
    pub resettable_kwh: f32,
    pub diagnostics: MeterDiagnostics,
}

impl MeterValues {
    fn apply(&mut self, reading: Reading) {
        match reading {
            Reading::Power { watts } => self.power_w = watts,
            Reading::ImportEnergy { kwh } => self.import_kwh = kwh,
            Reading::ResettableEnergy { kwh } => self.resettable_kwh = kwh,
            Reading::Diagnostics(diagnostics) => self.diagnostics = diagnostics,
        }
    }
}

/// Errors the driver recovered from, by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ErrorCounters {
    pub timeouts: u32,
    pub transport_failures: u32,
    pub mismatches: u32,
    pub decode_errors: u32,
    pub reset_failures: u32,
}

impl ErrorCounters {
    pub fn record(&mut self, error: &MeterError) {
        let counter = match error {
            MeterError::TransportTimeout { .. } => &mut self.timeouts,
            MeterError::TransportFailure { .. } => &mut self.transport_failures,
            MeterError::ResponseMismatch { .. } => &mut self.mismatches,
            MeterError::DecodeError { .. } => &mut self.decode_errors,
            MeterError::ResetVerificationFailed { .. } => &mut self.reset_failures,
            MeterError::Unconfigured | MeterError::InvalidConfig(_) | MeterError::Encode(_) => {
                return;
            }
        };
        *counter = counter.saturating_add(1);
    }
}

/// Holds the values an external reader sees.
///
/// Readings of one pass over the field table are staged and only published
/// together once the pass completes, so readers never see a mix of two
/// passes.
#[derive(Debug, Clone, Default)]
pub struct StateMirror {
    published: MeterValues,
    staged: MeterValues,
    hardware_available: bool,
    counters: ErrorCounters,
    completed_cycles: u32,
}

impl StateMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a freshly decoded reading.
    pub fn update(&mut self, reading: Reading) {
        self.staged.apply(reading);
    }

    /// Publish everything staged since the last commit.
    pub fn commit(&mut self) {
        self.published = self.staged;
        self.completed_cycles = self.completed_cycles.wrapping_add(1);
    }

    pub fn values(&self) -> &MeterValues {
        &self.published
    }

    pub fn counters(&self) -> &ErrorCounters {
        &self.counters
    }

    pub fn completed_cycles(&self) -> u32 {
        self.completed_cycles
    }

    pub fn hardware_available(&self) -> bool {
        self.hardware_available
    }

    pub fn record_error(&mut self, error: &MeterError) {
        self.counters.record(error);
    }

    /// Update the availability flag, logging transitions only.
    pub fn set_hardware_available(&mut self, available: bool) {
        if available == self.hardware_available {
            return;
        }
        if available {
            info!("Energy meter available");
        } else {
            warn!("Energy meter not responding, marking hardware unavailable");
        }
        self.hardware_available = available;
    }
}

/// Outcome of the most recent energy reset request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResetStatus {
    /// No reset was requested since start-up
    #[default]
    Idle,
    /// A reset is being written or verified
    Pending,
    Success,
    Failed,
}

/// Next bus exchange a pending reset needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetStep {
    Write,
    Verify,
}

/// Tracks an energy reset from request through verification.
#[derive(Debug, Clone, Default)]
pub struct ResetCoordinator {
    step: Option<ResetStep>,
    status: ResetStatus,
    failed_attempts: u8,
}

impl ResetCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for a reset. Returns `false` if one is already in progress.
    pub fn request(&mut self) -> bool {
        if self.step.is_some() {
            return false;
        }
        self.step = Some(ResetStep::Write);
        self.status = ResetStatus::Pending;
        self.failed_attempts = 0;
        true
    }

    pub fn status(&self) -> ResetStatus {
        self.status
    }

    pub fn step(&self) -> Option<ResetStep> {
        self.step
    }

    /// The meter acknowledged the reset command.
    pub fn write_acknowledged(&mut self) {
        self.step = Some(ResetStep::Verify);
    }

    /// Check the value read back after the reset.
    ///
    /// A mismatch counts as a failed attempt.
    pub fn verify(
        &mut self,
        kwh: f32,
        expected_kwh: f32,
        tolerance_kwh: f32,
        max_attempts: u8,
    ) -> Result<bool, MeterError> {
        let deviation = kwh - expected_kwh;
        if deviation <= tolerance_kwh && deviation >= -tolerance_kwh {
            info!("Energy meter reset verified ({} kWh)", kwh);
            self.step = None;
            self.status = ResetStatus::Success;
            return Ok(true);
        }
        warn!(
            "Energy meter reset not yet visible: read {} kWh, expected {} kWh",
            kwh, expected_kwh
        );
        self.attempt_failed(max_attempts).map(|()| false)
    }

    /// Give up a pending reset because no meter is there to receive it.
    pub fn abandon(&mut self) -> Option<MeterError> {
        self.step?;
        warn!("Energy meter reset abandoned, no meter on the bus");
        self.step = None;
        self.status = ResetStatus::Failed;
        Some(MeterError::ResetVerificationFailed {
            attempts: self.failed_attempts,
        })
    }

    /// A reset write or verification did not go through.
    ///
    /// Gives up once `max_attempts` attempts have failed.
    pub fn attempt_failed(&mut self, max_attempts: u8) -> Result<(), MeterError> {
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        if self.failed_attempts < max_attempts {
            return Ok(());
        }
        warn!(
            "Energy meter reset failed after {} attempts",
            self.failed_attempts
        );
        self.step = None;
        self.status = ResetStatus::Failed;
        Err(MeterError::ResetVerificationFailed {
            attempts: self.failed_attempts,
        })
    }
}

/// Read-only view of everything the API layer exposes.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Snapshot<'a, const FINE: usize, const COARSE: usize> {
    pub hardware_available: bool,
    pub reset_status: ResetStatus,
    pub values: MeterValues,
    pub counters: ErrorCounters,
    pub history: HistoryView<'a, FINE, COARSE>,
}
