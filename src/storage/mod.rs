pub mod accumulator;
pub mod history;
pub mod ring_buffer;

pub use accumulator::{ClosedInterval, CloseCause, IntervalSampler, RecordOutcome};
pub use history::{HistoryStore, HistoryView};
pub use ring_buffer::RingBuffer;
