//! Fixed-capacity circular buffer

use core::iter::FusedIterator;

use serde::{Serialize, Serializer};

/// Circular buffer over `SLOTS` pre-allocated slots.
///
/// One slot is kept free to tell "empty" from "full", so the buffer holds at
/// most `SLOTS - 1` entries. A push onto a full buffer overwrites the oldest
/// entry; entries are never removed individually.
#[derive(Debug, Clone)]
pub struct RingBuffer<T, const SLOTS: usize> {
    slots: [T; SLOTS],
    /// Index of the oldest entry
    head: usize,
    /// Index the next push writes to
    tail: usize,
}

impl<T: Copy + Default, const SLOTS: usize> Default for RingBuffer<T, SLOTS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy + Default, const SLOTS: usize> RingBuffer<T, SLOTS> {
    const HAS_SENTINEL: () = assert!(SLOTS >= 2, "a ring buffer needs at least two slots");

    pub fn new() -> Self {
        let _ = Self::HAS_SENTINEL;
        Self {
            slots: [T::default(); SLOTS],
            head: 0,
            tail: 0,
        }
    }
}

impl<T: Copy, const SLOTS: usize> RingBuffer<T, SLOTS> {
    /// Maximum number of entries the buffer holds.
    pub const fn capacity(&self) -> usize {
        SLOTS - 1
    }

    /// Append `value`, overwriting the oldest entry if the buffer is full.
    pub fn push(&mut self, value: T) {
        self.slots[self.tail] = value;
        self.tail = (self.tail + 1) % SLOTS;
        if self.tail == self.head {
            self.head = (self.head + 1) % SLOTS;
        }
    }

    pub fn len(&self) -> usize {
        (self.tail + SLOTS - self.head) % SLOTS
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub fn is_full(&self) -> bool {
        (self.tail + 1) % SLOTS == self.head
    }

    /// Drop all entries at once.
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
    }

    /// Most recently pushed entry.
    pub fn newest(&self) -> Option<T> {
        if self.is_empty() {
            None
        } else {
            Some(self.slots[(self.tail + SLOTS - 1) % SLOTS])
        }
    }

    /// Entries from oldest to newest, independent of the wrap position.
    pub fn iter(&self) -> Iter<'_, T, SLOTS> {
        Iter {
            buffer: self,
            position: self.head,
            remaining: self.len(),
        }
    }
}

impl<'a, T: Copy, const SLOTS: usize> IntoIterator for &'a RingBuffer<T, SLOTS> {
    type Item = T;
    type IntoIter = Iter<'a, T, SLOTS>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Chronological iterator over a [`RingBuffer`].
#[derive(Debug, Clone)]
pub struct Iter<'a, T, const SLOTS: usize> {
    buffer: &'a RingBuffer<T, SLOTS>,
    position: usize,
    remaining: usize,
}

impl<T: Copy, const SLOTS: usize> Iterator for Iter<'_, T, SLOTS> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.remaining == 0 {
            return None;
        }
        let value = self.buffer.slots[self.position];
        self.position = (self.position + 1) % SLOTS;
        self.remaining -= 1;
        Some(value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T: Copy, const SLOTS: usize> ExactSizeIterator for Iter<'_, T, SLOTS> {}

impl<T: Copy, const SLOTS: usize> FusedIterator for Iter<'_, T, SLOTS> {}

/// Serialized as a plain sequence, oldest entry first.
impl<T: Copy + Serialize, const SLOTS: usize> Serialize for RingBuffer<T, SLOTS> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}
