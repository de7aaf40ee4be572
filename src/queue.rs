//! First-in, first-out queue used for idle resources and pending requests.

use std::collections::{linked_list, LinkedList};

use crate::error::EmptyContainer;

/// FIFO queue with constant-time insertion at the tail and removal from the head.
///
/// Backed by a doubly linked list of owned nodes. A node is freed as soon as its element is
/// removed, nodes are never reused.
pub struct FifoQueue<T> {
    nodes: LinkedList<T>,
}

impl<T> FifoQueue<T> {
    /// Create an empty queue.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            nodes: LinkedList::new(),
        }
    }

    /// Append an element at the tail of the queue.
    pub fn enqueue(&mut self, element: T) {
        self.nodes.push_back(element);
    }

    /// Remove and return the oldest element.
    ///
    /// # Errors
    ///
    /// Returns [`EmptyContainer`] if there is nothing to remove.
    pub fn dequeue(&mut self) -> Result<T, EmptyContainer> {
        self.nodes.pop_front().ok_or(EmptyContainer)
    }

    /// Remove and return the oldest element, if there is one.
    pub fn try_dequeue(&mut self) -> Option<T> {
        self.nodes.pop_front()
    }

    /// Borrow the oldest element without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<&T> {
        self.nodes.front()
    }

    /// Number of queued elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the queue holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate over queued elements, oldest first.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            inner: self.nodes.iter(),
        }
    }
}

impl<T> Default for FifoQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for FifoQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.nodes.iter()).finish()
    }
}

impl<T> Extend<T> for FifoQueue<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.nodes.extend(iter);
    }
}

impl<T> FromIterator<T> for FifoQueue<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            nodes: iter.into_iter().collect(),
        }
    }
}

/// Borrowing iterator over a [`FifoQueue`], oldest element first.
pub struct Iter<'a, T> {
    inner: linked_list::Iter<'a, T>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<'a, T> IntoIterator for &'a FifoQueue<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fresh queue is empty.
    #[test]
    fn new_queue_is_empty() {
        let queue = FifoQueue::<u32>::new();
        assert_eq!(queue.len(), 0);
        assert!(queue.is_empty());
        assert!(queue.peek().is_none());
    }

    /// Elements leave in insertion order.
    #[test]
    fn dequeue_preserves_insertion_order() {
        let mut queue = FifoQueue::new();
        queue.enqueue("a");
        queue.enqueue("b");
        queue.enqueue("c");
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dequeue().unwrap(), "a");
        assert_eq!(queue.dequeue().unwrap(), "b");
        queue.enqueue("d");
        assert_eq!(queue.dequeue().unwrap(), "c");
        assert_eq!(queue.dequeue().unwrap(), "d");
        assert!(queue.is_empty());
    }

    /// Removal from an empty queue fails.
    #[test]
    fn dequeue_empty_fails() {
        let mut queue = FifoQueue::<i32>::new();
        assert!(matches!(queue.dequeue(), Err(EmptyContainer)));
        queue.enqueue(1);
        assert_eq!(queue.dequeue().unwrap(), 1);
        assert!(matches!(queue.dequeue(), Err(EmptyContainer)));
        assert!(queue.try_dequeue().is_none());
    }

    /// Size tracks every insertion and removal.
    #[test]
    fn len_follows_operations() {
        let mut queue: FifoQueue<usize> = (0..5).collect();
        assert_eq!(queue.len(), 5);
        queue.try_dequeue();
        queue.try_dequeue();
        assert_eq!(queue.len(), 3);
        queue.extend([10, 11]);
        assert_eq!(queue.len(), 5);
        assert_eq!(queue.peek(), Some(&2));
    }

    /// Iteration does not consume and goes oldest first.
    #[test]
    fn iter_oldest_first() {
        let mut queue = FifoQueue::new();
        for i in 1..=4 {
            queue.enqueue(i);
        }
        let seen: Vec<_> = queue.iter().copied().collect();
        assert_eq!(seen, vec![1, 2, 3, 4]);
        assert_eq!(queue.len(), 4);
        assert_eq!(format!("{queue:?}"), "[1, 2, 3, 4]");
    }
}
