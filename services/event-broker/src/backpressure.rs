//! Backpressure for subscriber fan-out
//!
//! Every subscriber owns a bounded outbound queue. A slow subscriber
//! only ever fills its own queue; what happens on overflow is decided by
//! the queue's drop policy, never by blocking the publisher.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Drop policy when a subscriber's outbound queue overflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropPolicy {
    /// Disconnect the lagging subscriber.
    Disconnect,
    /// Drop the oldest queued message to make room.
    DropOldest,
}

/// Action to take when backpressure is triggered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackpressureAction {
    DisconnectClient,
}

/// Per-subscriber outbound queue with bounded capacity.
#[derive(Debug)]
pub struct ClientQueue<T> {
    messages: VecDeque<T>,
    capacity: usize,
    drop_policy: DropPolicy,
    messages_dropped: u64,
    /// Set on overflow, cleared once the queue falls below half capacity.
    is_lagging: bool,
}

impl<T> ClientQueue<T> {
    pub fn new(capacity: usize, drop_policy: DropPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            messages: VecDeque::with_capacity(capacity),
            capacity,
            drop_policy,
            messages_dropped: 0,
            is_lagging: false,
        }
    }

    /// Enqueue a message. Returns Err if the subscriber should be disconnected.
    pub fn enqueue(&mut self, message: T) -> Result<(), BackpressureAction> {
        if self.messages.len() >= self.capacity {
            self.is_lagging = true;

            match self.drop_policy {
                DropPolicy::Disconnect => {
                    return Err(BackpressureAction::DisconnectClient);
                }
                DropPolicy::DropOldest => {
                    self.messages.pop_front();
                    self.messages_dropped += 1;
                }
            }
        }

        self.messages.push_back(message);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<T> {
        let message = self.messages.pop_front();
        if self.messages.len() < self.capacity / 2 {
            self.is_lagging = false;
        }
        message
    }

    /// Drain all queued messages for sending.
    pub fn drain(&mut self) -> Vec<T> {
        self.is_lagging = false;
        self.messages.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn is_lagging(&self) -> bool {
        self.is_lagging
    }

    /// Total messages dropped for this subscriber.
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_queue_basic() {
        let mut queue = ClientQueue::new(10, DropPolicy::Disconnect);

        queue.enqueue(1).unwrap();
        queue.enqueue(2).unwrap();

        assert_eq!(queue.len(), 2);
        assert!(!queue.is_lagging());
        assert_eq!(queue.pop(), Some(1));
    }

    #[test]
    fn test_queue_overflow_disconnect() {
        let mut queue = ClientQueue::new(2, DropPolicy::Disconnect);

        queue.enqueue(1).unwrap();
        queue.enqueue(2).unwrap();

        let result = queue.enqueue(3);
        assert_eq!(result.unwrap_err(), BackpressureAction::DisconnectClient);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_queue_overflow_drop_oldest() {
        let mut queue = ClientQueue::new(2, DropPolicy::DropOldest);

        queue.enqueue(1).unwrap();
        queue.enqueue(2).unwrap();
        queue.enqueue(3).unwrap(); // drops 1

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.messages_dropped(), 1);
        assert!(queue.is_lagging());

        assert_eq!(queue.drain(), vec![2, 3]);
        assert!(!queue.is_lagging());
    }

    #[test]
    fn test_lagging_clears_below_half() {
        let mut queue = ClientQueue::new(4, DropPolicy::DropOldest);
        for i in 0..5 {
            queue.enqueue(i).unwrap();
        }
        assert!(queue.is_lagging());

        queue.pop();
        queue.pop();
        assert!(queue.is_lagging());
        queue.pop();
        assert!(!queue.is_lagging());
    }
}
