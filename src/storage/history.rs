use serde::Serialize;

use super::RingBuffer;

/// Dual-resolution power history kept entirely in RAM
///
/// - fine: raw samples of the interval that is currently open
/// - coarse: one average per closed interval, oldest overwritten first
///
/// ## Memory Usage
///
/// With the default geometry both buffers have 721 slots of `i16`, about
/// 2.8 KB in total, allocated inline when the store is created.
#[derive(Debug, Clone)]
pub struct HistoryStore<const FINE: usize, const COARSE: usize> {
    fine: RingBuffer<i16, FINE>,
    coarse: RingBuffer<i16, COARSE>,
}

impl<const FINE: usize, const COARSE: usize> Default for HistoryStore<FINE, COARSE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const FINE: usize, const COARSE: usize> HistoryStore<FINE, COARSE> {
    pub fn new() -> Self {
        Self {
            fine: RingBuffer::new(),
            coarse: RingBuffer::new(),
        }
    }

    pub fn push_fine(&mut self, sample: i16) {
        self.fine.push(sample);
    }

    pub fn push_coarse(&mut self, average: i16) {
        self.coarse.push(average);
    }

    /// Forget the raw samples of the interval that just closed.
    pub fn clear_fine(&mut self) {
        self.fine.clear();
    }

    pub fn fine_is_full(&self) -> bool {
        self.fine.is_full()
    }

    pub fn fine(&self) -> &RingBuffer<i16, FINE> {
        &self.fine
    }

    pub fn coarse(&self) -> &RingBuffer<i16, COARSE> {
        &self.coarse
    }

    /// Read-only view for serialization, carrying the timing metadata a
    /// consumer needs to place the entries on a time axis.
    pub fn view(
        &self,
        interval_ms: u32,
        samples_last_interval: u32,
    ) -> HistoryView<'_, FINE, COARSE> {
        HistoryView {
            interval_ms,
            samples_last_interval,
            fine: &self.fine,
            coarse: &self.coarse,
        }
    }
}

/// Serializable view of a [`HistoryStore`].
///
/// The newest coarse entry belongs to the interval that ended most recently;
/// each older entry lies one `interval_ms` further in the past.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct HistoryView<'a, const FINE: usize, const COARSE: usize> {
    pub interval_ms: u32,
    pub samples_last_interval: u32,
    pub fine: &'a RingBuffer<i16, FINE>,
    pub coarse: &'a RingBuffer<i16, COARSE>,
}
