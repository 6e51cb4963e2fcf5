use log::{debug, warn};

use super::HistoryStore;
use crate::clock::Millis;
use crate::config::MeterConfig;

/// Running count and sum of the samples of the open interval
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntervalAccumulator {
    count: u32,
    sum: i64,
}

impl IntervalAccumulator {
    fn add(&mut self, sample: i16) {
        self.count += 1;
        self.sum += sample as i64;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Arithmetic mean rounded half away from zero; 0 if nothing was added.
    pub fn average(&self) -> i16 {
        if self.count == 0 {
            return 0;
        }
        let count = self.count as i64;
        let half = count / 2;
        let rounded = if self.sum >= 0 {
            (self.sum + half) / count
        } else {
            (self.sum - half) / count
        };
        // The mean of i16 values is always an i16.
        rounded as i16
    }
}

/// Why an interval was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCause {
    /// The interval deadline passed
    Deadline,
    /// The fine buffer could not take another sample
    BufferFull,
}

/// Result of closing one interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosedInterval {
    /// Value pushed into the coarse history
    pub average: i16,
    /// Samples the average was computed from
    pub samples: u32,
    pub cause: CloseCause,
}

impl ClosedInterval {
    /// The average is a zero placeholder, not a measurement.
    pub fn is_estimated(&self) -> bool {
        self.samples == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Accepted,
    /// Arrived sooner than the minimum spacing after the previous sample
    RateLimited,
}

/// Reduces high-frequency power readings to one average per interval
///
/// Accepted samples go into the fine history and the accumulator. When the
/// interval deadline passes, the average goes into the coarse history and
/// the fine history starts over.
///
/// ## Closing rules
///
/// - The deadline is checked first, on every [`advance`](Self::advance) and
///   before every [`record`](Self::record). It moves forward by exactly one
///   interval per close, so scheduling jitter does not accumulate.
/// - Every missed interval is closed on its own (with a zero placeholder),
///   keeping coarse positions aligned with time. After more missed intervals
///   than the coarse history can hold, the deadline is resynchronised.
/// - If the fine history is full when a sample arrives, the interval is
///   closed early and a fresh window starts at that sample.
#[derive(Debug, Clone)]
pub struct IntervalSampler {
    interval_ms: u32,
    min_spacing_ms: u32,
    accumulator: IntervalAccumulator,
    interval_end: Millis,
    last_accepted: Option<Millis>,
    samples_last_interval: u32,
    last_closed: Option<ClosedInterval>,
}

impl IntervalSampler {
    /// Create a sampler whose first interval starts at `start`.
    pub fn new(config: &MeterConfig, start: Millis) -> Self {
        Self {
            interval_ms: config.interval_ms,
            min_spacing_ms: config.min_sample_spacing_ms,
            accumulator: IntervalAccumulator::default(),
            interval_end: start.wrapping_add(config.interval_ms),
            last_accepted: None,
            samples_last_interval: 0,
            last_closed: None,
        }
    }

    pub fn interval_ms(&self) -> u32 {
        self.interval_ms
    }

    /// When the open interval closes.
    pub fn interval_end(&self) -> Millis {
        self.interval_end
    }

    /// Samples accepted in the most recently closed interval.
    pub fn samples_last_interval(&self) -> u32 {
        self.samples_last_interval
    }

    /// The most recently closed interval.
    pub fn last_closed(&self) -> Option<ClosedInterval> {
        self.last_closed
    }

    pub fn accumulator(&self) -> &IntervalAccumulator {
        &self.accumulator
    }

    /// Add a raw reading taken at `now`.
    pub fn record<const FINE: usize, const COARSE: usize>(
        &mut self,
        sample: i16,
        now: Millis,
        history: &mut HistoryStore<FINE, COARSE>,
    ) -> RecordOutcome {
        self.advance(now, history);

        if let Some(last) = self.last_accepted {
            if now.elapsed_since(last) < self.min_spacing_ms {
                return RecordOutcome::RateLimited;
            }
        }

        if history.fine_is_full() {
            warn!(
                "Fine history full after {} samples, closing interval early",
                self.accumulator.count()
            );
            self.close(CloseCause::BufferFull, history);
            self.interval_end = now.wrapping_add(self.interval_ms);
        }

        history.push_fine(sample);
        self.accumulator.add(sample);
        self.last_accepted = Some(now);
        RecordOutcome::Accepted
    }

    /// Close every interval whose deadline has passed by `now`.
    ///
    /// Returns the most recently closed interval, if any.
    pub fn advance<const FINE: usize, const COARSE: usize>(
        &mut self,
        now: Millis,
        history: &mut HistoryStore<FINE, COARSE>,
    ) -> Option<ClosedInterval> {
        let mut closed = None;
        let mut closes = 0;

        while now.has_reached(self.interval_end) {
            if closes == history.coarse().capacity() {
                warn!("Missed more intervals than the coarse history holds, resynchronising");
                self.interval_end = now.wrapping_add(self.interval_ms);
                break;
            }
            closed = Some(self.close(CloseCause::Deadline, history));
            self.interval_end = self.interval_end.wrapping_add(self.interval_ms);
            closes += 1;
        }

        closed
    }

    fn close<const FINE: usize, const COARSE: usize>(
        &mut self,
        cause: CloseCause,
        history: &mut HistoryStore<FINE, COARSE>,
    ) -> ClosedInterval {
        let closed = ClosedInterval {
            average: self.accumulator.average(),
            samples: self.accumulator.count(),
            cause,
        };

        if closed.is_estimated() {
            warn!("Interval closed without samples, storing 0");
        } else {
            debug!(
                "Interval closed ({:?}): avg {} from {} samples",
                cause, closed.average, closed.samples
            );
        }

        history.push_coarse(closed.average);
        history.clear_fine();
        self.samples_last_interval = closed.samples;
        self.last_closed = Some(closed);
        self.accumulator = IntervalAccumulator::default();
        closed
    }
}
