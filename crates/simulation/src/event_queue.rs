//! Deterministic ordering key for the global event queue.

use arbor_core::EventPriority;
use std::time::Duration;

/// Total order over queued events: time, then priority (internal events
/// before external ones at the same instant), then insertion sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventKey {
    pub time: Duration,
    pub priority: EventPriority,
    pub seq: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_time_then_priority_then_seq() {
        let early = EventKey {
            time: Duration::from_millis(1),
            priority: EventPriority::Client,
            seq: 9,
        };
        let later_internal = EventKey {
            time: Duration::from_millis(2),
            priority: EventPriority::Internal,
            seq: 0,
        };
        assert!(early < later_internal);

        let same_time_network = EventKey {
            time: Duration::from_millis(2),
            priority: EventPriority::Network,
            seq: 0,
        };
        assert!(later_internal < same_time_network);

        let same_everything_later_seq = EventKey {
            time: Duration::from_millis(2),
            priority: EventPriority::Internal,
            seq: 1,
        };
        assert!(later_internal < same_everything_later_seq);
    }
}
