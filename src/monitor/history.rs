//! Bounded FIFO history

use std::collections::VecDeque;

/// Default number of entries kept
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Keeps the most recent `capacity` entries in insertion order
#[derive(Debug, Clone)]
pub struct BoundedHistory<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> BoundedHistory<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_LIMIT)),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest once over capacity
    pub fn push(&mut self, entry: T) {
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// The last `limit` entries, oldest first
    pub fn recent(&self, limit: usize) -> Vec<T> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// The last `limit` entries matching `filter`, oldest first
    pub fn recent_matching<F>(&self, limit: usize, filter: F) -> Vec<T>
    where
        F: Fn(&T) -> bool,
    {
        let mut matched: Vec<T> = self
            .entries
            .iter()
            .rev()
            .filter(|e| filter(e))
            .take(limit)
            .cloned()
            .collect();
        matched.reverse();
        matched
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T: Clone> Default for BoundedHistory<T> {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest() {
        let mut history = BoundedHistory::default();
        for i in 0..1001 {
            history.push(i);
        }

        assert_eq!(history.len(), 1000);
        assert_eq!(history.recent(1), vec![1000]);
        assert_eq!(history.recent(1000)[0], 1);
    }

    #[test]
    fn test_recent_preserves_insertion_order() {
        let mut history = BoundedHistory::new(10);
        for i in 0..5 {
            history.push(i);
        }

        assert_eq!(history.recent(3), vec![2, 3, 4]);
        assert_eq!(history.recent(100), vec![0, 1, 2, 3, 4]);
        assert!(history.recent(0).is_empty());
    }

    #[test]
    fn test_recent_matching() {
        let mut history = BoundedHistory::new(10);
        for i in 0..10 {
            history.push(i);
        }

        assert_eq!(history.recent_matching(2, |i| i % 2 == 0), vec![6, 8]);
    }
}
