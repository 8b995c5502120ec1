//! Outbound update queue.
//!
//! Local CRDT deltas produced while the relay is unreachable wait here until
//! the connection comes back. Entries move through the queue in this order:
//! 1. `enqueue()` - add to the back
//! 2. `dequeue()` - take the front entry and mark it in flight
//! 3. `ack()` - the relay accepted it
//!
//! If sending fails, `nack()` returns the entry to the front so delivery
//! order per device is preserved.

use inkwell_sync_types::{ProjectId, UpdateId};
use std::collections::{HashMap, VecDeque};
use thiserror::Error;

/// Error type for queue operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Queue is at capacity.
    #[error("update queue full (capacity: {capacity})")]
    Full {
        /// Configured capacity.
        capacity: usize,
    },
}

/// A local delta waiting to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedUpdate {
    /// Queue entry identifier.
    pub update_id: UpdateId,
    /// Project the delta belongs to.
    pub project_id: ProjectId,
    /// Opaque CRDT delta.
    pub payload: Vec<u8>,
}

impl QueuedUpdate {
    /// Wrap a delta with a fresh id.
    pub fn new(project_id: ProjectId, payload: Vec<u8>) -> Self {
        Self {
            update_id: UpdateId::new(),
            project_id,
            payload,
        }
    }
}

/// Bounded FIFO of outbound deltas with in-flight tracking.
#[derive(Debug)]
pub struct UpdateQueue {
    /// Maximum number of entries (queued + in flight).
    capacity: usize,
    queue: VecDeque<QueuedUpdate>,
    in_flight: HashMap<UpdateId, QueuedUpdate>,
}

impl UpdateQueue {
    /// Create a queue holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queue: VecDeque::new(),
            in_flight: HashMap::new(),
        }
    }

    /// Append an update. Fails when queued + in-flight reaches capacity.
    pub fn enqueue(&mut self, update: QueuedUpdate) -> Result<(), QueueError> {
        if self.total_count() >= self.capacity {
            return Err(QueueError::Full {
                capacity: self.capacity,
            });
        }
        self.queue.push_back(update);
        Ok(())
    }

    /// Take the next update and mark it in flight.
    pub fn dequeue(&mut self) -> Option<QueuedUpdate> {
        let update = self.queue.pop_front()?;
        self.in_flight.insert(update.update_id, update.clone());
        Some(update)
    }

    /// Delivery confirmed.
    pub fn ack(&mut self, update_id: &UpdateId) {
        self.in_flight.remove(update_id);
    }

    /// Delivery failed: put the update back at the front.
    pub fn nack(&mut self, update_id: &UpdateId) {
        if let Some(update) = self.in_flight.remove(update_id) {
            self.queue.push_front(update);
        }
    }

    /// Whether `update_id` is currently in flight.
    pub fn is_in_flight(&self, update_id: &UpdateId) -> bool {
        self.in_flight.contains_key(update_id)
    }

    /// Entries waiting to be sent (excluding in flight).
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True if nothing is waiting to be sent.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Queued + in flight.
    pub fn total_count(&self) -> usize {
        self.queue.len() + self.in_flight.len()
    }

    /// Queued + in-flight entries for one project.
    pub fn count_for(&self, project_id: &ProjectId) -> usize {
        self.queue
            .iter()
            .chain(self.in_flight.values())
            .filter(|u| &u.project_id == project_id)
            .count()
    }

    /// Discard everything belonging to `project_id` (sync disabled).
    ///
    /// Returns the number of entries removed.
    pub fn remove_project(&mut self, project_id: &ProjectId) -> usize {
        let before = self.total_count();
        self.queue.retain(|u| &u.project_id != project_id);
        self.in_flight.retain(|_, u| &u.project_id != project_id);
        before - self.total_count()
    }

    /// Clear all entries.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.in_flight.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(name: &str) -> ProjectId {
        ProjectId::new(name).unwrap()
    }

    fn update(payload: Vec<u8>) -> QueuedUpdate {
        QueuedUpdate::new(project("/project/A"), payload)
    }

    #[test]
    fn dequeues_in_order() {
        let mut queue = UpdateQueue::new(10);
        queue.enqueue(update(vec![1])).unwrap();
        queue.enqueue(update(vec![2])).unwrap();

        assert_eq!(queue.dequeue().unwrap().payload, vec![1]);
        assert_eq!(queue.dequeue().unwrap().payload, vec![2]);
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn in_flight_counts_toward_capacity() {
        let mut queue = UpdateQueue::new(2);
        queue.enqueue(update(vec![1])).unwrap();
        queue.enqueue(update(vec![2])).unwrap();
        let _ = queue.dequeue();

        assert_eq!(
            queue.enqueue(update(vec![3])),
            Err(QueueError::Full { capacity: 2 })
        );
    }

    #[test]
    fn ack_frees_space() {
        let mut queue = UpdateQueue::new(1);
        queue.enqueue(update(vec![1])).unwrap();

        let sent = queue.dequeue().unwrap();
        assert!(queue.is_in_flight(&sent.update_id));

        queue.ack(&sent.update_id);
        assert!(!queue.is_in_flight(&sent.update_id));
        assert!(queue.enqueue(update(vec![2])).is_ok());
    }

    #[test]
    fn nack_returns_update_to_front() {
        let mut queue = UpdateQueue::new(10);
        queue.enqueue(update(vec![1])).unwrap();
        queue.enqueue(update(vec![2])).unwrap();

        let first = queue.dequeue().unwrap();
        queue.nack(&first.update_id);

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dequeue().unwrap().payload, vec![1]);
    }

    #[test]
    fn unknown_ids_are_no_ops() {
        let mut queue = UpdateQueue::new(10);
        let fake = UpdateId::new();
        queue.ack(&fake);
        queue.nack(&fake);
        assert_eq!(queue.total_count(), 0);
    }

    #[test]
    fn counts_and_removes_per_project() {
        let mut queue = UpdateQueue::new(10);
        let a = project("/project/A");
        let b = project("/project/B");

        queue.enqueue(QueuedUpdate::new(a.clone(), vec![1])).unwrap();
        queue.enqueue(QueuedUpdate::new(b.clone(), vec![2])).unwrap();
        queue.enqueue(QueuedUpdate::new(a.clone(), vec![3])).unwrap();
        let _ = queue.dequeue();

        assert_eq!(queue.count_for(&a), 2);
        assert_eq!(queue.count_for(&b), 1);

        assert_eq!(queue.remove_project(&a), 2);
        assert_eq!(queue.count_for(&a), 0);
        assert_eq!(queue.total_count(), 1);
    }

    #[test]
    fn clear_removes_all() {
        let mut queue = UpdateQueue::new(10);
        queue.enqueue(update(vec![1])).unwrap();
        queue.enqueue(update(vec![2])).unwrap();
        queue.dequeue();

        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.total_count(), 0);
    }
}
