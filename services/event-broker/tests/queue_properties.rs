//! Property tests for the per-subscriber outbound queue

use event_broker::backpressure::{BackpressureAction, ClientQueue};
use event_broker::DropPolicy;
use proptest::prelude::*;

proptest! {
    #[test]
    fn prop_drop_oldest_keeps_newest_suffix(capacity in 1usize..16, count in 0usize..64) {
        let mut queue = ClientQueue::new(capacity, DropPolicy::DropOldest);
        for i in 0..count {
            prop_assert!(queue.enqueue(i).is_ok());
            prop_assert!(queue.len() <= capacity);
        }

        let kept = count.min(capacity);
        let expected: Vec<usize> = (count - kept..count).collect();
        prop_assert_eq!(queue.messages_dropped() as usize, count - kept);
        prop_assert_eq!(queue.drain(), expected);
    }

    #[test]
    fn prop_disconnect_policy_never_reorders(capacity in 1usize..16, count in 0usize..64) {
        let mut queue = ClientQueue::new(capacity, DropPolicy::Disconnect);
        let mut accepted = Vec::new();
        for i in 0..count {
            match queue.enqueue(i) {
                Ok(()) => accepted.push(i),
                Err(action) => {
                    prop_assert_eq!(action, BackpressureAction::DisconnectClient);
                    prop_assert_eq!(queue.len(), capacity);
                }
            }
        }

        prop_assert_eq!(accepted.len(), count.min(capacity));
        prop_assert_eq!(queue.messages_dropped(), 0);
        prop_assert_eq!(queue.drain(), accepted);
    }
}
