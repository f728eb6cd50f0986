//! A thread-safe bounded ring buffer holding the most recent data snapshots.

use std::collections::VecDeque;
use std::sync::Mutex;

/// A fixed-capacity ordered buffer. Pushing to a full ring overwrites the
/// oldest entry. Push is O(1); reading copies out O(capacity) entries.
#[derive(Debug)]
pub struct Ring<T> {
    capacity: usize,
    buf: Mutex<VecDeque<T>>,
}

impl<T: Clone> Ring<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buf: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, data: T) {
        let mut buf = self.buf.lock().unwrap();
        if buf.len() == self.capacity {
            buf.pop_front();
        }
        buf.push_back(data);
    }

    /// Returns a newly allocated list of all entries, oldest first.
    pub fn read_all_ordered(&self) -> Vec<T> {
        let buf = self.buf.lock().unwrap();
        buf.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_to_full_ring_and_read_all() {
        let ring = Ring::new(10);
        for i in 1..12 {
            ring.push(i);
        }

        assert_eq!(ring.read_all_ordered(), vec![2, 3, 4, 5, 6, 7, 8, 9, 10, 11]);

        ring.push(12);
        assert_eq!(ring.read_all_ordered(), vec![3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn push_partial_ring_and_read_all() {
        let ring = Ring::new(10);
        for i in 1..5 {
            ring.push(i);
        }

        assert_eq!(ring.read_all_ordered(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn read_all_from_empty_ring() {
        let ring: Ring<i32> = Ring::new(10);
        assert_eq!(ring.read_all_ordered(), Vec::<i32>::new());
    }

    #[test]
    fn capacity_four_keeps_latest_four() {
        let ring = Ring::new(4);
        for i in 1..=5 {
            ring.push(i);
        }

        assert_eq!(ring.read_all_ordered(), vec![2, 3, 4, 5]);
    }

    #[derive(Clone, Debug, PartialEq)]
    struct Snapshot {
        a: i32,
        b: i32,
    }

    #[test]
    fn read_all_with_structs() {
        let ring = Ring::new(4);
        for i in 1..6 {
            ring.push(Snapshot { a: i, b: i * 2 });
        }

        assert_eq!(
            ring.read_all_ordered(),
            vec![
                Snapshot { a: 2, b: 4 },
                Snapshot { a: 3, b: 6 },
                Snapshot { a: 4, b: 8 },
                Snapshot { a: 5, b: 10 },
            ]
        );
    }
}
