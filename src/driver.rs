//! Polling state machine
//!
//! [`MeterDriver`] owns everything belonging to one physical meter: the bus
//! handle, the sampler, the history and the mirror. The host calls
//! [`MeterDriver::tick`] at a bounded period; each tick does a bounded amount
//! of non-blocking work and returns.
//!
//! ```text
//! Idle ──deadline──▶ RequestSent ──ok──────▶ Idle (next read after read_period)
//!                         │ ──error/mismatch─▶ Idle (retry on next tick)
//!                         └─timeout─────────▶ Idle (retry on next tick)
//! ```
//!
//! At most one request is outstanding at any time; the bus is half-duplex
//! and the meter is addressed serially.

use log::{debug, info};

use crate::clock::{Clock, Millis};
use crate::config::{COARSE_SLOTS, FINE_SLOTS, MeterConfig};
use crate::error::MeterError;
use crate::registers::{
    Destination, FieldDescriptor, MeterProfile, Reading, RegisterGroup, power_to_sample,
};
use crate::state::{ResetCoordinator, ResetStatus, ResetStep, Snapshot, StateMirror};
use crate::storage::{HistoryStore, IntervalSampler};
use crate::transport::{Transport, TransportPoll};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    Idle,
    RequestSent,
}

/// Completion status of an in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    NotDone,
    Done,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPurpose {
    /// Regular read from the field table
    Poll,
    ResetWrite,
    ResetVerify,
}

/// Correlates the single outstanding request with its response.
#[derive(Debug, Clone, Copy)]
pub struct InFlightRequest {
    pub group: RegisterGroup,
    pub expected_id: u8,
    pub issued_at: Millis,
    pub purpose: RequestPurpose,
    pub status: RequestStatus,
    /// How to decode the answer; `None` for writes
    field: Option<FieldDescriptor>,
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// The bus adapter has not found a meter yet
    Unconfigured,
    /// Nothing in flight and the next read is not due yet
    Idle,
    /// A request was started
    Issued(RegisterGroup),
    /// Still waiting for the response
    Pending(RegisterGroup),
    ResponseOk(RegisterGroup),
    /// Failed, mismatched or undecodable response; retried on the next tick
    ResponseError(MeterError),
    /// No response in time; retried on the next tick
    Timeout(RegisterGroup),
}

/// Driver for one energy meter on the RS-485 bus.
///
/// `FINE` and `COARSE` are the slot counts of the two history buffers (one
/// slot of each is the ring buffer sentinel).
pub struct MeterDriver<T, const FINE: usize = FINE_SLOTS, const COARSE: usize = COARSE_SLOTS> {
    transport: T,
    config: MeterConfig,
    profile: MeterProfile,
    state: ReadState,
    in_flight: Option<InFlightRequest>,
    last_request: Option<InFlightRequest>,
    next_request_id: u8,
    next_read_deadline: Millis,
    /// Position in the profile's field table
    field_index: usize,
    sampler: IntervalSampler,
    history: HistoryStore<FINE, COARSE>,
    mirror: StateMirror,
    reset: ResetCoordinator,
}

impl<T: Transport, const FINE: usize, const COARSE: usize> MeterDriver<T, FINE, COARSE> {
    /// Create a driver whose first averaging interval starts at `now`.
    ///
    /// Fails if the sample spacing lets one interval outgrow the fine history.
    pub fn new(
        transport: T,
        config: MeterConfig,
        profile: MeterProfile,
        now: Millis,
    ) -> Result<Self, MeterError> {
        config.validate_for_capacity(FINE.saturating_sub(1))?;
        if profile.fields.is_empty() {
            return Err(MeterError::InvalidConfig("meter profile has no fields"));
        }

        Ok(Self {
            transport,
            config,
            profile,
            state: ReadState::Idle,
            in_flight: None,
            last_request: None,
            next_request_id: 0,
            next_read_deadline: now,
            field_index: 0,
            sampler: IntervalSampler::new(&config, now),
            history: HistoryStore::new(),
            mirror: StateMirror::new(),
            reset: ResetCoordinator::new(),
        })
    }

    /// Advance the driver by one scheduling step. Never blocks.
    pub fn tick(&mut self, now: Millis) -> TickOutcome {
        // Intervals close on time even while the meter is silent.
        self.sampler.advance(now, &mut self.history);

        if let Some(request) = self.in_flight {
            return self.poll_in_flight(request, now);
        }

        if !self.transport.is_configured() {
            self.mirror.set_hardware_available(false);
            if let Some(error) = self.reset.abandon() {
                self.mirror.record_error(&error);
            }
            return TickOutcome::Unconfigured;
        }

        if !now.has_reached(self.next_read_deadline) {
            return TickOutcome::Idle;
        }

        self.issue(now)
    }

    /// [`tick`](Self::tick) with the time taken from `clock`.
    pub fn tick_with<C: Clock>(&mut self, clock: &C) -> TickOutcome {
        self.tick(clock.now())
    }

    /// Ask for the meter's resettable energy counter to be reset.
    ///
    /// Returns immediately; the outcome shows up in
    /// [`reset_status`](Self::reset_status) on a later tick. Returns `false`
    /// if a reset is already in progress.
    pub fn request_energy_reset(&mut self) -> bool {
        let accepted = self.reset.request();
        if accepted {
            info!("Energy meter reset requested");
        }
        accepted
    }

    pub fn reset_status(&self) -> ResetStatus {
        self.reset.status()
    }

    pub fn hardware_available(&self) -> bool {
        self.mirror.hardware_available()
    }

    pub fn state(&self) -> ReadState {
        self.state
    }

    pub fn in_flight(&self) -> Option<&InFlightRequest> {
        self.in_flight.as_ref()
    }

    /// The most recently resolved request.
    pub fn last_request(&self) -> Option<&InFlightRequest> {
        self.last_request.as_ref()
    }

    pub fn config(&self) -> &MeterConfig {
        &self.config
    }

    pub fn mirror(&self) -> &StateMirror {
        &self.mirror
    }

    pub fn history(&self) -> &HistoryStore<FINE, COARSE> {
        &self.history
    }

    pub fn sampler(&self) -> &IntervalSampler {
        &self.sampler
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Everything the API layer exposes, borrowed from the driver.
    pub fn snapshot(&self) -> Snapshot<'_, FINE, COARSE> {
        Snapshot {
            hardware_available: self.mirror.hardware_available(),
            reset_status: self.reset.status(),
            values: *self.mirror.values(),
            counters: *self.mirror.counters(),
            history: self
                .history
                .view(self.sampler.interval_ms(), self.sampler.samples_last_interval()),
        }
    }

    /// Serialize the snapshot into `buf` with postcard, returning the length.
    pub fn encode_snapshot(&self, buf: &mut [u8]) -> Result<usize, MeterError> {
        let used = postcard::to_slice(&self.snapshot(), buf)?;
        Ok(used.len())
    }

    fn issue(&mut self, now: Millis) -> TickOutcome {
        let (purpose, field) = match self.reset.step() {
            Some(ResetStep::Write) => (RequestPurpose::ResetWrite, None),
            Some(ResetStep::Verify) => (
                RequestPurpose::ResetVerify,
                Some(self.profile.reset.verify),
            ),
            None => (
                RequestPurpose::Poll,
                Some(self.profile.fields[self.field_index]),
            ),
        };
        let group = match field {
            Some(field) => field.group,
            None => self.profile.reset.group,
        };

        let expected_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);

        let started = match purpose {
            RequestPurpose::ResetWrite => {
                self.transport
                    .begin_write(group, self.profile.reset.value, expected_id)
            }
            RequestPurpose::Poll | RequestPurpose::ResetVerify => {
                self.transport.begin_read(group, expected_id)
            }
        };

        let request = InFlightRequest {
            group,
            expected_id,
            issued_at: now,
            purpose,
            status: RequestStatus::NotDone,
            field,
        };

        if !started {
            return self.fail(request, MeterError::TransportFailure { group }, now);
        }

        debug!("Requested {} (id {})", group, expected_id);
        self.in_flight = Some(request);
        self.state = ReadState::RequestSent;
        TickOutcome::Issued(group)
    }

    fn poll_in_flight(&mut self, request: InFlightRequest, now: Millis) -> TickOutcome {
        let group = request.group;
        match self.transport.poll() {
            TransportPoll::Pending => {
                let waited_ms = now.elapsed_since(request.issued_at);
                if waited_ms >= self.config.response_timeout_ms {
                    self.fail(request, MeterError::TransportTimeout { group, waited_ms }, now)
                } else {
                    TickOutcome::Pending(group)
                }
            }
            TransportPoll::Error => self.fail(request, MeterError::TransportFailure { group }, now),
            TransportPoll::Ok(response) => {
                if response.request_id != request.expected_id {
                    let error = MeterError::ResponseMismatch {
                        expected: request.expected_id,
                        received: response.request_id,
                    };
                    return self.fail(request, error, now);
                }
                self.complete(request, &response.registers, now)
            }
        }
    }

    fn complete(
        &mut self,
        mut request: InFlightRequest,
        registers: &[u16],
        now: Millis,
    ) -> TickOutcome {
        let decoded = match request.field {
            Some(field) => match field.decode(registers) {
                Ok(reading) => Some((field, reading)),
                Err(error) => return self.fail(request, error, now),
            },
            None => None,
        };

        request.status = RequestStatus::Done;
        self.finish(request);
        self.mirror.set_hardware_available(true);
        self.next_read_deadline = now.wrapping_add(self.config.read_period_ms);

        match (request.purpose, decoded) {
            (RequestPurpose::Poll, Some((field, reading))) => self.route(field, reading, now),
            (RequestPurpose::ResetWrite, _) => {
                info!("Energy meter acknowledged reset command");
                self.reset.write_acknowledged();
            }
            (RequestPurpose::ResetVerify, Some((_, reading))) => self.verify_reset(reading),
            _ => {}
        }

        TickOutcome::ResponseOk(request.group)
    }

    fn route(&mut self, field: FieldDescriptor, reading: Reading, now: Millis) {
        self.mirror.update(reading);

        if field.destination == Destination::Sampler {
            if let Some(watts) = reading.scalar() {
                self.sampler.record(power_to_sample(watts), now, &mut self.history);
            }
        }

        self.field_index += 1;
        if self.field_index == self.profile.fields.len() {
            self.field_index = 0;
            self.mirror.commit();
        }
    }

    fn verify_reset(&mut self, reading: Reading) {
        let Some(value) = reading.scalar() else {
            if let Err(error) = self.reset.attempt_failed(self.config.reset_max_attempts) {
                self.mirror.record_error(&error);
            }
            return;
        };

        // The value read back is as current as any other reading.
        self.mirror.update(reading);

        match self.reset.verify(
            value,
            self.profile.reset.expected_kwh,
            self.config.reset_tolerance_kwh,
            self.config.reset_max_attempts,
        ) {
            Ok(true) => self.mirror.commit(),
            Ok(false) => {}
            Err(error) => self.mirror.record_error(&error),
        }
    }

    fn fail(
        &mut self,
        mut request: InFlightRequest,
        error: MeterError,
        now: Millis,
    ) -> TickOutcome {
        request.status = RequestStatus::Error;
        self.finish(request);
        debug!("Request for {} failed: {}", request.group, error);

        self.mirror.record_error(&error);
        self.mirror.set_hardware_available(false);
        // No backoff: the same field is retried on the next tick.
        self.next_read_deadline = now;

        if request.purpose != RequestPurpose::Poll {
            if let Err(reset_error) = self.reset.attempt_failed(self.config.reset_max_attempts) {
                self.mirror.record_error(&reset_error);
            }
        }

        match error {
            MeterError::TransportTimeout { group, .. } => TickOutcome::Timeout(group),
            _ => TickOutcome::ResponseError(error),
        }
    }

    fn finish(&mut self, request: InFlightRequest) {
        self.in_flight = None;
        self.last_request = Some(request);
        self.state = ReadState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::encode_f32;
    use crate::storage::CloseCause;
    use crate::transport::Registers;
    use crate::transport::mock::{MockTransport, Reply};

    /// 31 fine entries hold a full 10 s interval at 330 ms spacing.
    type TestDriver = MeterDriver<MockTransport, 32, 8>;

    const STEP_MS: u32 = 10;

    fn test_config() -> MeterConfig {
        MeterConfig {
            interval_ms: 10_000,
            read_period_ms: 10,
            response_timeout_ms: 100,
            min_sample_spacing_ms: 330,
            reset_max_attempts: 3,
            reset_tolerance_kwh: 0.01,
        }
    }

    fn driver() -> TestDriver {
        MeterDriver::new(
            MockTransport::new(),
            test_config(),
            MeterProfile::SDM72DM,
            Millis::new(0),
        )
        .unwrap()
    }

    /// Tick every `STEP_MS` from `*now` for `ticks` ticks.
    fn run(driver: &mut TestDriver, now: &mut u32, ticks: u32) {
        for _ in 0..ticks {
            driver.tick(Millis::new(*now));
            *now += STEP_MS;
        }
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = MeterConfig {
            response_timeout_ms: 0,
            ..test_config()
        };
        let result: Result<TestDriver, _> =
            MeterDriver::new(MockTransport::new(), config, MeterProfile::SDM72DM, Millis::new(0));
        assert!(matches!(result, Err(MeterError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_spacing_that_overflows_fine_history() {
        // ceil(10_000 / 320) = 32 samples per interval, one more than fits.
        let config = MeterConfig {
            min_sample_spacing_ms: 320,
            ..test_config()
        };
        let result: Result<TestDriver, _> =
            MeterDriver::new(MockTransport::new(), config, MeterProfile::SDM72DM, Millis::new(0));
        assert!(matches!(result, Err(MeterError::InvalidConfig(_))));

        let result: Result<MeterDriver<MockTransport>, _> = MeterDriver::new(
            MockTransport::new(),
            MeterConfig::default(),
            MeterProfile::SDM72DM,
            Millis::new(0),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_read_cycle() {
        let mut driver = driver();
        assert!(!driver.hardware_available());

        assert_eq!(driver.tick(Millis::new(0)), TickOutcome::Issued(RegisterGroup::Power));
        assert_eq!(driver.state(), ReadState::RequestSent);
        assert_eq!(driver.in_flight().unwrap().status, RequestStatus::NotDone);

        assert_eq!(driver.tick(Millis::new(10)), TickOutcome::ResponseOk(RegisterGroup::Power));
        assert_eq!(driver.state(), ReadState::Idle);
        assert!(driver.in_flight().is_none());
        assert_eq!(driver.last_request().unwrap().status, RequestStatus::Done);
        assert!(driver.hardware_available());
        assert_eq!(driver.history().fine().newest(), Some(1000));
    }

    #[test]
    fn test_read_period_between_requests() {
        let mut driver = driver();
        driver.tick(Millis::new(0));
        driver.tick(Millis::new(5));

        assert_eq!(driver.tick(Millis::new(14)), TickOutcome::Idle);
        assert_eq!(
            driver.tick(Millis::new(15)),
            TickOutcome::Issued(RegisterGroup::ImportEnergy)
        );
    }

    #[test]
    fn test_fields_cycle_and_publish_together() {
        let mut driver = driver();
        let mut now = 0;
        let fields = MeterProfile::SDM72DM.fields.len();

        // Everything but the last response of the first pass.
        run(&mut driver, &mut now, 2 * fields as u32 - 1);
        assert_eq!(driver.mirror().completed_cycles(), 0);
        assert_eq!(driver.mirror().values().import_kwh, 0.0);

        run(&mut driver, &mut now, 1);
        assert_eq!(driver.mirror().completed_cycles(), 1);

        let values = driver.mirror().values();
        assert_eq!(values.power_w, 1000.0);
        assert_eq!(values.import_kwh, 1500.0);
        assert_eq!(values.resettable_kwh, 12.5);

        let requested = &driver.transport().requested;
        for (field, group) in MeterProfile::SDM72DM.fields.iter().zip(requested.iter()) {
            assert_eq!(field.group, *group);
        }
    }

    #[test]
    fn test_single_request_in_flight() {
        let mut driver = driver();
        for i in 0..40 {
            let reply = match i % 4 {
                0 => Reply::Delay(3),
                1 => Reply::Error,
                2 => Reply::Delay(1),
                _ => Reply::Auto,
            };
            driver.transport_mut().script(reply);
        }

        let mut now = 0;
        for _ in 0..400 {
            driver.tick(Millis::new(now));
            assert_eq!(driver.in_flight().is_some(), driver.transport().has_outstanding());
            now += STEP_MS;
        }
        assert_eq!(driver.transport().overlapping_requests, 0);
        assert!(driver.transport().reads > 40);
    }

    #[test]
    fn test_mismatched_response_is_discarded() {
        let mut driver = driver();
        let mut now = 0;
        // One full pass so there is published state to compare against.
        run(&mut driver, &mut now, 12);
        let published = *driver.mirror().values();
        let fine_len = driver.history().fine().len();

        // Far enough from the last sample that a real one would be accepted.
        now += 1_000;
        driver.transport_mut().power_w = 4321.0;
        driver.transport_mut().script(Reply::WrongId);

        assert_eq!(driver.tick(Millis::new(now)), TickOutcome::Issued(RegisterGroup::Power));
        let outcome = driver.tick(Millis::new(now + 10));
        assert!(matches!(
            outcome,
            TickOutcome::ResponseError(MeterError::ResponseMismatch { .. })
        ));

        assert!(!driver.hardware_available());
        assert_eq!(driver.mirror().counters().mismatches, 1);
        assert_eq!(driver.history().fine().len(), fine_len);
        assert_eq!(driver.mirror().values(), &published);

        // The same field is re-armed right away.
        assert_eq!(
            driver.tick(Millis::new(now + 20)),
            TickOutcome::Issued(RegisterGroup::Power)
        );
        assert_eq!(
            driver.tick(Millis::new(now + 30)),
            TickOutcome::ResponseOk(RegisterGroup::Power)
        );
        assert!(driver.hardware_available());
        assert_eq!(driver.history().fine().newest(), Some(4321));
    }

    #[test]
    fn test_timeout_marks_hardware_unavailable() {
        let mut driver = driver();
        driver.transport_mut().script(Reply::Silent);

        assert_eq!(driver.tick(Millis::new(0)), TickOutcome::Issued(RegisterGroup::Power));
        assert_eq!(driver.tick(Millis::new(50)), TickOutcome::Pending(RegisterGroup::Power));
        assert_eq!(driver.tick(Millis::new(99)), TickOutcome::Pending(RegisterGroup::Power));
        assert_eq!(driver.tick(Millis::new(100)), TickOutcome::Timeout(RegisterGroup::Power));

        assert!(driver.in_flight().is_none());
        assert_eq!(driver.last_request().unwrap().status, RequestStatus::Error);
        assert!(!driver.hardware_available());
        assert_eq!(driver.mirror().counters().timeouts, 1);

        // Retried on the very next tick, same cadence as ever.
        assert_eq!(driver.tick(Millis::new(110)), TickOutcome::Issued(RegisterGroup::Power));
    }

    #[test]
    fn test_refused_request_counts_as_error() {
        let mut driver = driver();
        driver.transport_mut().script(Reply::Refuse);

        assert_eq!(
            driver.tick(Millis::new(0)),
            TickOutcome::ResponseError(MeterError::TransportFailure {
                group: RegisterGroup::Power
            })
        );
        assert!(driver.in_flight().is_none());
        assert_eq!(driver.mirror().counters().transport_failures, 1);
        assert_eq!(driver.tick(Millis::new(10)), TickOutcome::Issued(RegisterGroup::Power));
    }

    #[test]
    fn test_malformed_payload_is_a_decode_error() {
        let mut driver = driver();
        driver.transport_mut().script(Reply::Registers(Registers::new()));

        driver.tick(Millis::new(0));
        assert_eq!(
            driver.tick(Millis::new(10)),
            TickOutcome::ResponseError(MeterError::DecodeError {
                group: RegisterGroup::Power
            })
        );
        assert_eq!(driver.mirror().counters().decode_errors, 1);
        assert!(driver.history().fine().is_empty());
    }

    #[test]
    fn test_scripted_payload_is_decoded() {
        let mut driver = driver();
        let mut registers = Registers::new();
        for word in encode_f32(-250.4) {
            registers.push(word).unwrap();
        }
        driver.transport_mut().script(Reply::Registers(registers));

        driver.tick(Millis::new(0));
        driver.tick(Millis::new(10));
        assert_eq!(driver.history().fine().newest(), Some(-250));
    }

    #[test]
    fn test_unconfigured_bus_issues_nothing() {
        let mut driver = driver();
        driver.transport_mut().configured = false;

        assert_eq!(driver.tick(Millis::new(0)), TickOutcome::Unconfigured);
        assert_eq!(driver.transport().reads, 0);

        // Intervals keep closing so the history stays aligned with time.
        driver.tick(Millis::new(10_000));
        assert_eq!(driver.history().coarse().newest(), Some(0));
    }

    #[test]
    fn test_reset_without_meter_fails() {
        let mut driver = driver();
        driver.transport_mut().configured = false;

        assert!(driver.request_energy_reset());
        assert_eq!(driver.tick(Millis::new(0)), TickOutcome::Unconfigured);

        assert_eq!(driver.reset_status(), ResetStatus::Failed);
        assert_eq!(driver.mirror().counters().reset_failures, 1);
        assert_eq!(driver.transport().writes, 0);

        // A later request is accepted again once the meter shows up.
        driver.transport_mut().configured = true;
        assert!(driver.request_energy_reset());
        assert_eq!(
            driver.tick(Millis::new(10)),
            TickOutcome::Issued(RegisterGroup::EnergyReset)
        );
    }

    #[test]
    fn test_request_ids_change_per_request() {
        let mut driver = driver();
        driver.tick(Millis::new(0));
        let first = driver.in_flight().unwrap().expected_id;
        driver.tick(Millis::new(10));
        driver.tick(Millis::new(20));
        let second = driver.in_flight().unwrap().expected_id;
        assert_ne!(first, second);
    }

    #[test]
    fn test_interval_average_reaches_coarse_history() {
        let mut driver = driver();
        let mut now = 0;
        run(&mut driver, &mut now, 1_001);

        // 10 s of operation: one interval closed from rate limited samples.
        assert_eq!(driver.history().coarse().len(), 1);
        assert_eq!(driver.sampler().last_closed().unwrap().cause, CloseCause::Deadline);
        assert_eq!(driver.history().coarse().newest(), Some(1000));
        let samples = driver.sampler().samples_last_interval();
        assert!(samples > 20 && samples <= 31, "got {samples} samples");
    }

    #[test]
    fn test_energy_reset_success() {
        let mut driver = driver();
        let mut now = 0;
        run(&mut driver, &mut now, 12);
        assert_eq!(driver.mirror().values().resettable_kwh, 12.5);

        assert!(driver.request_energy_reset());
        assert!(!driver.request_energy_reset());
        assert_eq!(driver.reset_status(), ResetStatus::Pending);

        let mut ticks = 0;
        while driver.reset_status() == ResetStatus::Pending && ticks < 10 {
            run(&mut driver, &mut now, 1);
            ticks += 1;
        }

        assert_eq!(driver.reset_status(), ResetStatus::Success);
        assert_eq!(
            driver.transport().last_write,
            Some((RegisterGroup::EnergyReset, 0x0003))
        );
        assert_eq!(driver.mirror().values().resettable_kwh, 0.0);
        assert!(driver.hardware_available());
    }

    #[test]
    fn test_energy_reset_not_confirmed() {
        let mut driver = driver();
        driver.transport_mut().reset_clears_energy = false;
        let mut now = 0;
        run(&mut driver, &mut now, 12);

        driver.request_energy_reset();
        let mut ticks = 0;
        while driver.reset_status() == ResetStatus::Pending && ticks < 50 {
            run(&mut driver, &mut now, 1);
            ticks += 1;
        }

        assert_eq!(driver.reset_status(), ResetStatus::Failed);
        assert!(driver.hardware_available());
        assert_eq!(driver.mirror().counters().reset_failures, 1);
        assert_eq!(driver.transport().writes, 1);

        // Regular polling resumes.
        let reads_before = driver.transport().reads;
        run(&mut driver, &mut now, 12);
        assert!(driver.transport().reads > reads_before);
        assert_eq!(driver.last_request().unwrap().purpose, RequestPurpose::Poll);
    }

    #[test]
    fn test_energy_reset_write_refused() {
        let mut driver = driver();
        driver.request_energy_reset();
        for _ in 0..3 {
            driver.transport_mut().script(Reply::Refuse);
        }

        let mut now = 0;
        run(&mut driver, &mut now, 3);

        assert_eq!(driver.reset_status(), ResetStatus::Failed);
        assert_eq!(driver.transport().writes, 3);
        assert!(!driver.hardware_available());
    }

    #[test]
    fn test_snapshot_encoding() {
        let mut driver = driver();
        let mut now = 0;
        run(&mut driver, &mut now, 1_001);

        let mut buf = [0u8; 256];
        let len = driver.encode_snapshot(&mut buf).unwrap();
        assert!(len > 0);

        let ((available, reset_status), _) =
            postcard::take_from_bytes::<(bool, ResetStatus)>(&buf[..len]).unwrap();
        assert!(available);
        assert_eq!(reset_status, ResetStatus::Idle);

        let snapshot = driver.snapshot();
        assert_eq!(snapshot.history.interval_ms, 10_000);
        assert_eq!(snapshot.history.coarse.len(), 1);
    }

    #[test]
    fn test_snapshot_buffer_too_small() {
        let driver = driver();
        let mut buf = [0u8; 4];
        assert!(matches!(
            driver.encode_snapshot(&mut buf),
            Err(MeterError::Encode(_))
        ));
    }
}
