use std::cmp::Ordering;
use std::collections::BinaryHeap;

struct Entry<T> {
    priority: u8,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    // Max-heap: higher priority first, then earlier admission
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Bounded queue of tasks waiting for a worker.
/// FIFO within a priority level; higher levels leave first.
pub(crate) struct PendingQueue<T> {
    heap: BinaryHeap<Entry<T>>,
    capacity: usize,
    next_seq: u64,
}

impl<T> PendingQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::new(),
            capacity,
            next_seq: 0,
        }
    }

    /// Hands the item back when the queue is at capacity (backpressure)
    pub fn push(&mut self, priority: u8, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry {
            priority,
            seq,
            item,
        });
        Ok(())
    }

    pub fn pop(&mut self) -> Option<T> {
        self.heap.pop().map(|entry| entry.item)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Remove everything, in the order it would have been dispatched
    pub fn drain(&mut self) -> Vec<T> {
        let mut items = Vec::with_capacity(self.len());
        while let Some(item) = self.pop() {
            items.push(item);
        }
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_operations() {
        let mut queue = PendingQueue::new(3);

        assert!(queue.is_empty());
        assert_eq!(queue.capacity(), 3);

        assert!(queue.push(0, 1).is_ok());
        assert!(queue.push(0, 2).is_ok());
        assert!(queue.push(0, 3).is_ok());

        // Full
        assert!(queue.is_full());
        assert_eq!(queue.push(0, 4), Err(4));

        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.len(), 2);
        assert!(queue.push(0, 4).is_ok());
    }

    #[test]
    fn test_fifo_within_priority() {
        let mut queue = PendingQueue::new(10);
        for i in 0..5 {
            queue.push(1, i).unwrap();
        }
        assert_eq!(queue.drain(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_higher_priority_first() {
        let mut queue = PendingQueue::new(10);
        queue.push(0, "low-a").unwrap();
        queue.push(5, "high-a").unwrap();
        queue.push(0, "low-b").unwrap();
        queue.push(9, "urgent").unwrap();
        queue.push(5, "high-b").unwrap();

        assert_eq!(
            queue.drain(),
            vec!["urgent", "high-a", "high-b", "low-a", "low-b"]
        );
        assert!(queue.is_empty());
    }
}
