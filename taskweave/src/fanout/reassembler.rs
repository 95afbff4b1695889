//! Restores input order over a completion-order stream.

use std::collections::BTreeMap;

/// Buffers out-of-order items and releases them in index order.
///
/// Items arrive tagged with their original index. [`push`](Self::push)
/// returns every item that is now contiguous with the last one released.
#[derive(Debug)]
pub struct OrderedReassembler<T> {
    next: usize,
    buffered: BTreeMap<usize, T>,
}

impl<T> Default for OrderedReassembler<T> {
    fn default() -> Self {
        Self {
            next: 0,
            buffered: BTreeMap::new(),
        }
    }
}

impl<T> OrderedReassembler<T> {
    /// Creates an empty reassembler starting at index 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts one item and returns the items now ready, in order.
    ///
    /// Indices below the release cursor, or already buffered, are ignored.
    pub fn push(&mut self, index: usize, item: T) -> Vec<(usize, T)> {
        if index < self.next || self.buffered.contains_key(&index) {
            tracing::warn!(index, next = self.next, "Ignoring duplicate slot");
            return Vec::new();
        }
        self.buffered.insert(index, item);

        let mut ready = Vec::new();
        while let Some(item) = self.buffered.remove(&self.next) {
            ready.push((self.next, item));
            self.next += 1;
        }
        ready
    }

    /// Returns the next index waiting to be released.
    #[must_use]
    pub fn next_index(&self) -> usize {
        self.next
    }

    /// Returns the number of buffered items.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffered.len()
    }
}
