//! A fixed-capacity ring buffer.
//!
//! Grounded on the monorepo's `fixed::queue::FixedQueue`, re-expressed with a
//! `VecDeque`-backed implementation instead of a const-generic
//! `[MaybeUninit<T>; LEN]` array (the latter needs nightly
//! `maybe_uninit_uninit_array`, which this workspace does not require).
//! Used for the synchronous connection pool's bounded LIFO of idle sockets.

use std::collections::VecDeque;

pub struct FixedQueue<T> {
    data: VecDeque<T>,
    capacity: usize,
}

impl<T> FixedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.data.len() >= self.capacity
    }

    /// Pushes onto the back (most-recently-used end). Returns the value back
    /// if the queue is already at capacity, so the caller can dispose of it.
    pub fn push_back(&mut self, value: T) -> Option<T> {
        if self.is_full() {
            return Some(value);
        }

        self.data.push_back(value);
        None
    }

    /// Pops from the back, making this a LIFO stack (most recently returned
    /// socket is reused first, which keeps a warm TCP connection hot instead
    /// of round-robining through cold ones).
    pub fn pop_back(&mut self) -> Option<T> {
        self.data.pop_back()
    }

    pub fn drain(&mut self) -> std::collections::vec_deque::Drain<'_, T> {
        self.data.drain(..)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_lifo_order() {
        let mut q = FixedQueue::new(2);
        assert!(q.push_back(1).is_none());
        assert!(q.push_back(2).is_none());
        assert_eq!(q.push_back(3), Some(3));

        assert_eq!(q.pop_back(), Some(2));
        assert_eq!(q.pop_back(), Some(1));
        assert_eq!(q.pop_back(), None);
    }
}
