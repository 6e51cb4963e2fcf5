//! Desktop simulator for the energy meter driver.
//!
//! Runs the `sdm-meter` driver against a synthetic SDM72DM behind a simulated
//! RS-485 adapter with bus latency and occasional faults. Simulated time runs
//! faster than wall time so averaging intervals close within seconds.
//!
//! # Commands (stdin)
//!
//! | Command   | Action                               |
//! |-----------|--------------------------------------|
//! | `reset`   | Reset the meter's resettable energy  |
//! | `status`  | Log the published values             |
//! | `history` | Log the power history                |
//! | `quit`    | Exit                                 |
//!
//! An optional argument names a postcard encoded config file. It is created
//! with the default settings if it does not exist.

use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::{debug, error, info, warn};

use sdm_meter::registers::encode_f32;
use sdm_meter::transport::Registers;
use sdm_meter::{
    Clock, MeterConfig, MeterDriver, MeterProfile, Millis, RegisterGroup, Response, TickOutcome,
    Transport, TransportPoll,
};

// ---------------------------------------------------------------------------
// Simulation constants
// ---------------------------------------------------------------------------

/// Simulated milliseconds per wall clock millisecond.
const TIME_SCALE: u32 = 10;

/// Wall clock time between two driver ticks.
const TICK_PERIOD: Duration = Duration::from_millis(5);

/// Simulated time between a request and its response.
const BUS_LATENCY_MS: u32 = 25;

/// Every n-th request is answered with a bus error.
const FAULT_EVERY: u32 = 53;

/// Every n-th request is never answered.
const DROP_EVERY: u32 = 211;

/// Simulated time between two periodic status lines.
const STATUS_PERIOD_MS: u32 = 60_000;

/// Large enough for a snapshot with both history buffers full.
const SNAPSHOT_BUF_LEN: usize = 8 * 1024;

// ---------------------------------------------------------------------------
// Console commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Command {
    Reset,
    Status,
    History,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        match line {
            "reset" | "r" => Some(Self::Reset),
            "status" | "s" => Some(Self::Status),
            "history" | "h" => Some(Self::History),
            "quit" | "q" => Some(Self::Quit),
            _ => None,
        }
    }
}

const COMMAND_CAPACITY: usize = 4;

static COMMANDS: Channel<CriticalSectionRawMutex, Command, COMMAND_CAPACITY> = Channel::new();

// ---------------------------------------------------------------------------
// Synthetic meter
// ---------------------------------------------------------------------------

/// Simulated time shared by the driver and the simulated bus.
#[derive(Clone)]
struct SimClock {
    now_ms: Arc<AtomicU32>,
}

impl SimClock {
    fn advance(&self, ms: u32) {
        self.now_ms.fetch_add(ms, Ordering::Relaxed);
    }
}

impl Clock for SimClock {
    fn now(&self) -> Millis {
        Millis::new(self.now_ms.load(Ordering::Relaxed))
    }
}

/// An SDM72DM whose load follows a slow sine with some faster ripple.
struct SyntheticMeter {
    import_kwh: f64,
    resettable_kwh: f64,
    last_update: Millis,
    checksum_errors: u32,
    framing_errors: u32,
}

impl SyntheticMeter {
    fn new(now: Millis) -> Self {
        Self {
            import_kwh: 18_342.7,
            resettable_kwh: 96.4,
            last_update: now,
            checksum_errors: 0,
            framing_errors: 0,
        }
    }

    fn power_w(now: Millis) -> f64 {
        let t = now.as_u32() as f64 / 1000.0;
        1500.0 + 1200.0 * (t / 90.0).sin() + 150.0 * (t / 7.0).sin()
    }

    /// Integrate the load into the energy counters up to `now`.
    fn update(&mut self, now: Millis) {
        let hours = now.elapsed_since(self.last_update) as f64 / 3_600_000.0;
        let kwh = Self::power_w(now) / 1000.0 * hours;
        self.import_kwh += kwh;
        self.resettable_kwh += kwh;
        self.last_update = now;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    None,
    BusError,
    Dropped,
}

struct PendingRequest {
    group: RegisterGroup,
    request_id: u8,
    write: Option<u16>,
    ready_at: Millis,
    fault: Fault,
}

/// RS-485 adapter talking to a [`SyntheticMeter`].
struct SimTransport {
    clock: SimClock,
    meter: SyntheticMeter,
    pending: Option<PendingRequest>,
    requests: u32,
}

impl SimTransport {
    fn new(clock: SimClock) -> Self {
        let meter = SyntheticMeter::new(clock.now());
        Self {
            clock,
            meter,
            pending: None,
            requests: 0,
        }
    }

    fn begin(&mut self, group: RegisterGroup, request_id: u8, write: Option<u16>) -> bool {
        if let Some(stale) = self.pending.take() {
            debug!("Adapter abandoned unanswered request {}", stale.request_id);
        }

        self.requests = self.requests.wrapping_add(1);
        let fault = if self.requests % DROP_EVERY == 0 {
            self.meter.framing_errors += 1;
            Fault::Dropped
        } else if self.requests % FAULT_EVERY == 0 {
            Fault::BusError
        } else {
            Fault::None
        };

        self.pending = Some(PendingRequest {
            group,
            request_id,
            write,
            ready_at: self.clock.now().wrapping_add(BUS_LATENCY_MS),
            fault,
        });
        true
    }

    fn answer(&mut self, group: RegisterGroup, write: Option<u16>, now: Millis) -> Registers {
        self.meter.update(now);
        match group {
            RegisterGroup::Power => {
                registers_from(&encode_f32(SyntheticMeter::power_w(now) as f32))
            }
            RegisterGroup::ImportEnergy => {
                registers_from(&encode_f32(self.meter.import_kwh as f32))
            }
            RegisterGroup::ResettableEnergy => {
                registers_from(&encode_f32(self.meter.resettable_kwh as f32))
            }
            RegisterGroup::Diagnostics => registers_from(&[
                (self.meter.checksum_errors >> 16) as u16,
                self.meter.checksum_errors as u16,
                (self.meter.framing_errors >> 16) as u16,
                self.meter.framing_errors as u16,
            ]),
            RegisterGroup::EnergyReset => {
                if write == Some(0x0003) {
                    info!("Synthetic meter: resettable energy cleared");
                    self.meter.resettable_kwh = 0.0;
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

impl Transport for SimTransport {
    fn begin_read(&mut self, group: RegisterGroup, request_id: u8) -> bool {
        self.begin(group, request_id, None)
    }

    fn begin_write(&mut self, group: RegisterGroup, value: u16, request_id: u8) -> bool {
        self.begin(group, request_id, Some(value))
    }

    fn poll(&mut self) -> TransportPoll {
        let now = self.clock.now();
        let ready = match &self.pending {
            Some(pending) => pending.fault != Fault::Dropped && now.has_reached(pending.ready_at),
            None => false,
        };
        if !ready {
            return TransportPoll::Pending;
        }
        let Some(pending) = self.pending.take() else {
            return TransportPoll::Pending;
        };

        if pending.fault == Fault::BusError {
            self.meter.checksum_errors += 1;
            return TransportPoll::Error;
        }

        TransportPoll::Ok(Response {
            request_id: pending.request_id,
            registers: self.answer(pending.group, pending.write, now),
        })
    }
}

// ---------------------------------------------------------------------------
// Reporting
// ---------------------------------------------------------------------------

fn log_status(driver: &MeterDriver<SimTransport>) {
    let snapshot = driver.snapshot();
    let values = snapshot.values;
    info!(
        "Meter {}: {:.0} W, import {:.3} kWh, resettable {:.3} kWh, reset {:?}",
        if snapshot.hardware_available { "online" } else { "offline" },
        values.power_w,
        values.import_kwh,
        values.resettable_kwh,
        snapshot.reset_status,
    );

    let counters = snapshot.counters;
    info!(
        "Recovered errors: {} timeouts, {} bus, {} mismatched, {} undecodable, {} failed resets",
        counters.timeouts,
        counters.transport_failures,
        counters.mismatches,
        counters.decode_errors,
        counters.reset_failures,
    );

    let mut buf = vec![0u8; SNAPSHOT_BUF_LEN];
    match driver.encode_snapshot(&mut buf) {
        Ok(len) => debug!("Encoded snapshot: {} bytes", len),
        Err(e) => error!("Failed to encode snapshot: {}", e),
    }
}

fn log_history(driver: &MeterDriver<SimTransport>) {
    let history = driver.history();
    let sampler = driver.sampler();
    info!(
        "Open interval: {} samples, closes at {} ms",
        history.fine().len(),
        sampler.interval_end().as_u32()
    );

    let coarse: Vec<i16> = history.coarse().iter().collect();
    let tail = &coarse[coarse.len().saturating_sub(10)..];
    info!(
        "Interval averages ({} kept, newest last): {:?} W",
        coarse.len(),
        tail
    );
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

fn load_config(path: &str) -> MeterConfig {
    match std::fs::read(path) {
        Ok(bytes) => match MeterConfig::from_bytes(&bytes) {
            Ok(config) => {
                info!("Loaded config from {}", path);
                config
            }
            Err(e) => {
                warn!("Ignoring config {}: {}", path, e);
                MeterConfig::default()
            }
        },
        Err(_) => {
            let config = MeterConfig::default();
            let mut buf = [0u8; 64];
            match config.to_slice(&mut buf) {
                Ok(bytes) => match std::fs::write(path, bytes) {
                    Ok(()) => info!("Wrote default config to {}", path),
                    Err(e) => warn!("Could not write config {}: {}", path, e),
                },
                Err(e) => warn!("Could not encode default config: {}", e),
            }
            config
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    env_logger::init();
    info!("Starting energy meter simulator ({}x real time)", TIME_SCALE);
    info!("Commands: reset  status  history  quit");

    let config = match std::env::args().nth(1) {
        Some(path) => load_config(&path),
        None => MeterConfig::default(),
    };

    let clock = SimClock {
        now_ms: Arc::new(AtomicU32::new(0)),
    };
    let transport = SimTransport::new(clock.clone());

    let mut driver: MeterDriver<SimTransport> =
        match MeterDriver::new(transport, config, MeterProfile::SDM72DM, clock.now()) {
            Ok(driver) => driver,
            Err(e) => {
                error!("Cannot start driver: {}", e);
                std::process::exit(1);
            }
        };

    std::thread::spawn(|| {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            let line = line.trim();
            match Command::parse(line) {
                Some(command) => {
                    if COMMANDS.try_send(command).is_err() {
                        warn!("Command queue full, dropping {:?}", command);
                    }
                }
                None if line.is_empty() => {}
                None => warn!("Unknown command {:?}", line),
            }
        }
    });

    let sim_step_ms = TICK_PERIOD.as_millis() as u32 * TIME_SCALE;
    let mut next_status = clock.now().wrapping_add(STATUS_PERIOD_MS);

    'running: loop {
        let tick_start = Instant::now();

        while let Ok(command) = COMMANDS.try_receive() {
            match command {
                Command::Quit => break 'running,
                Command::Reset => {
                    if !driver.request_energy_reset() {
                        warn!("Energy reset already in progress");
                    }
                }
                Command::Status => log_status(&driver),
                Command::History => log_history(&driver),
            }
        }

        let interval_end = driver.sampler().interval_end();
        let outcome = driver.tick_with(&clock);
        if let TickOutcome::Timeout(group) = outcome {
            debug!("Timed out waiting for {}", group);
        }
        if driver.sampler().interval_end() != interval_end {
            info!(
                "Interval closed: {:?} W from {} samples",
                driver.history().coarse().newest(),
                driver.sampler().samples_last_interval()
            );
        }

        if clock.now().has_reached(next_status) {
            log_status(&driver);
            next_status = next_status.wrapping_add(STATUS_PERIOD_MS);
        }

        let elapsed = tick_start.elapsed();
        if elapsed < TICK_PERIOD {
            std::thread::sleep(TICK_PERIOD - elapsed);
        }
        clock.advance(sim_step_ms);
    }

    info!("Simulator exiting");
}
