//! Consumer registration and the service queue.
//!
//! Registration resolves a `checkout` command's `(tag, pid)` to a canonical
//! [`ConsumerKey`] (its attach-time [`LogIndex`] under the v4 wire format),
//! merges re-attachment of an already-known consumer, and maintains the
//! [`ServiceQueue`] the checkout engine drains from.

use std::collections::{BTreeMap, VecDeque};

use quorumq_types::ConsumerKey;
use serde::{Deserialize, Serialize};

/// Priority-ordered FIFO of consumers eligible for delivery: `up` status
/// and `credit > 0`.
///
/// Consumers at the same priority are served in the order they entered the
/// queue; across priorities, strictly higher priority always wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ServiceQueue {
    by_priority: BTreeMap<i32, VecDeque<ConsumerKey>>,
}

impl ServiceQueue {
    pub fn push(&mut self, key: ConsumerKey, priority: i32) {
        let queue = self.by_priority.entry(priority).or_default();
        if !queue.contains(&key) {
            queue.push_back(key);
        }
    }

    /// Pops the next consumer to service: highest priority first, FIFO
    /// within a priority level.
    pub fn pop(&mut self) -> Option<ConsumerKey> {
        let &top_priority = self.by_priority.keys().next_back()?;
        let queue = self.by_priority.get_mut(&top_priority)?;
        let key = queue.pop_front();
        if queue.is_empty() {
            self.by_priority.remove(&top_priority);
        }
        key
    }

    pub fn remove(&mut self, key: ConsumerKey, priority: i32) {
        if let Some(queue) = self.by_priority.get_mut(&priority) {
            queue.retain(|&k| k != key);
            if queue.is_empty() {
                self.by_priority.remove(&priority);
            }
        }
    }

    /// Removes `key` wherever it is, regardless of the priority it was
    /// pushed under. Used when a consumer's eligibility changes and the
    /// caller doesn't want to track which bucket it landed in.
    pub fn remove_anywhere(&mut self, key: ConsumerKey) {
        let mut empty_priorities = Vec::new();
        for (&priority, queue) in &mut self.by_priority {
            queue.retain(|&k| k != key);
            if queue.is_empty() {
                empty_priorities.push(priority);
            }
        }
        for priority in empty_priorities {
            self.by_priority.remove(&priority);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_priority.is_empty()
    }

    pub fn contains(&self, key: ConsumerKey) -> bool {
        self.by_priority.values().any(|q| q.contains(&key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_priority_serviced_first() {
        let mut sq = ServiceQueue::default();
        sq.push(ConsumerKey::new(1), 0);
        sq.push(ConsumerKey::new(2), 10);
        sq.push(ConsumerKey::new(3), 0);

        assert_eq!(sq.pop(), Some(ConsumerKey::new(2)));
        assert_eq!(sq.pop(), Some(ConsumerKey::new(1)));
        assert_eq!(sq.pop(), Some(ConsumerKey::new(3)));
        assert_eq!(sq.pop(), None);
    }

    #[test]
    fn same_priority_is_fifo() {
        let mut sq = ServiceQueue::default();
        sq.push(ConsumerKey::new(1), 5);
        sq.push(ConsumerKey::new(2), 5);
        assert_eq!(sq.pop(), Some(ConsumerKey::new(1)));
        assert_eq!(sq.pop(), Some(ConsumerKey::new(2)));
    }

    #[test]
    fn push_is_idempotent() {
        let mut sq = ServiceQueue::default();
        sq.push(ConsumerKey::new(1), 0);
        sq.push(ConsumerKey::new(1), 0);
        assert_eq!(sq.pop(), Some(ConsumerKey::new(1)));
        assert_eq!(sq.pop(), None);
    }
}
